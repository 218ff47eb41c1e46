//! Transaction atomique pour le commit d'une version
//!
//! La transaction prend un verrou consultatif : les commits concurrents sont
//! sérialisés et deux runs ne reçoivent jamais le même numéro de version.
//! Un drop sans commit annule tout.

use deadpool_postgres::{Object, Transaction};
use tracing::{error, info};

use crate::error::{FreeplotError, Result};

/// Clé du verrou consultatif des commits de version
pub const VERSION_LOCK_KEY: i64 = 0x6672_6565_706c_6f74;

/// Statut d'un commit de version
#[derive(Debug, Clone, PartialEq)]
pub enum CommitStatus {
    Committed,
    RolledBack,
}

/// Rapport de commit
#[derive(Debug)]
pub struct CommitReport {
    pub version: i32,
    pub shapes_inserted: usize,
    pub status: CommitStatus,
}

/// Transaction de commit d'une version
pub struct VersionCommit<'a> {
    transaction: Transaction<'a>,
    schema: String,
    version: Option<i32>,
    shapes_inserted: usize,
}

impl<'a> VersionCommit<'a> {
    /// Démarre la transaction et attend le verrou des versions
    pub async fn begin(client: &'a mut Object, schema: &str) -> Result<Self> {
        let transaction = client.transaction().await?;
        transaction
            .execute("SELECT pg_advisory_xact_lock($1)", &[&VERSION_LOCK_KEY])
            .await?;

        Ok(Self {
            transaction,
            schema: schema.to_string(),
            version: None,
            shapes_inserted: 0,
        })
    }

    pub fn transaction(&self) -> &Transaction<'a> {
        &self.transaction
    }

    /// Dernière version commitée (0 si aucune)
    pub async fn latest_version(&self) -> Result<i32> {
        let row = self
            .transaction
            .query_one(
                &format!(
                    "SELECT COALESCE(MAX(version), 0) FROM {}.shape_versions",
                    self.schema
                ),
                &[],
            )
            .await?;
        Ok(row.get(0))
    }

    /// Réserve `max(version) + 1`
    pub async fn allocate_next(&mut self) -> Result<i32> {
        let version = self.latest_version().await? + 1;
        self.register(version).await?;
        Ok(version)
    }

    /// Réserve une version choisie par l'appelant
    pub async fn claim(&mut self, version: i32) -> Result<()> {
        let latest = self.latest_version().await?;
        if version <= latest {
            return Err(FreeplotError::Persistence(format!(
                "version {} is not greater than the latest committed version {}",
                version, latest
            )));
        }
        self.register(version).await
    }

    async fn register(&mut self, version: i32) -> Result<()> {
        self.transaction
            .execute(
                &format!(
                    "INSERT INTO {}.shape_versions (version, shape_count) VALUES ($1, 0)",
                    self.schema
                ),
                &[&version],
            )
            .await?;

        info!(version, "Version reserved");
        self.version = Some(version);
        Ok(())
    }

    pub fn version(&self) -> Option<i32> {
        self.version
    }

    pub fn record_insert(&mut self, count: usize) {
        self.shapes_inserted += count;
    }

    pub fn shapes_inserted(&self) -> usize {
        self.shapes_inserted
    }

    /// Enregistre le nombre de shapes et commit
    pub async fn commit(self) -> Result<CommitReport> {
        let version = self.version.ok_or_else(|| {
            FreeplotError::Persistence("commit without a reserved version".into())
        })?;

        self.transaction
            .execute(
                &format!(
                    "UPDATE {}.shape_versions SET shape_count = $2 WHERE version = $1",
                    self.schema
                ),
                &[&version, &(self.shapes_inserted as i32)],
            )
            .await?;
        self.transaction.commit().await?;

        info!(
            version,
            shapes = self.shapes_inserted,
            "Version committed"
        );

        Ok(CommitReport {
            version,
            shapes_inserted: self.shapes_inserted,
            status: CommitStatus::Committed,
        })
    }

    /// Annule la transaction ; aucune ligne de la version n'est visible
    pub async fn rollback(self, reason: &str) -> CommitReport {
        error!(
            version = ?self.version,
            reason = %reason,
            shapes_attempted = self.shapes_inserted,
            "Rolling back version commit"
        );

        if let Err(e) = self.transaction.rollback().await {
            error!(error = %e, "Explicit rollback failed (will rollback on drop anyway)");
        }

        CommitReport {
            version: self.version.unwrap_or(0),
            shapes_inserted: 0,
            status: CommitStatus::RolledBack,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_is_stable() {
        assert_eq!(VERSION_LOCK_KEY.to_be_bytes(), *b"freeplot");
    }

    #[test]
    fn test_commit_report_debug() {
        let report = CommitReport {
            version: 4,
            shapes_inserted: 100,
            status: CommitStatus::Committed,
        };
        let debug_str = format!("{:?}", report);
        assert!(debug_str.contains("Committed"));
        assert!(debug_str.contains("100"));
    }
}
