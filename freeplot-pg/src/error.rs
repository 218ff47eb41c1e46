//! Erreurs du pipeline freeplot

use std::time::Duration;

use shpfile::ShpError;
use thiserror::Error;

/// Erreurs du moteur : lecture, reprojection, overlay, persistance
#[derive(Debug, Error)]
pub enum FreeplotError {
    /// Source illisible
    #[error("Format error in {file}: {reason}")]
    Format { file: String, reason: String },

    /// Texte d'attribut non décodable
    #[error("Encoding error: field {field} is not valid {encoding}")]
    Encoding { field: String, encoding: String },

    /// Aucun CRS déclaré et aucun CRS de repli configuré
    #[error("Layer {0} declares no coordinate reference system")]
    MissingCrs(String),

    /// Type de géométrie non géré par la transformation ou l'overlay
    #[error("Unsupported geometry type {geometry_type} in layer {layer}")]
    UnsupportedGeometry {
        layer: String,
        geometry_type: String,
    },

    /// Échec de reprojection
    #[error("Cannot reproject from {from} to {to}: {reason}")]
    Reprojection {
        from: String,
        to: String,
        reason: String,
    },

    /// Géométrie dégénérée ou opération booléenne en échec
    #[error("Topology error in layer {layer}: {reason}")]
    Topology { layer: String, reason: String },

    /// Échec de stockage
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Shape, version ou artefact inconnu
    #[error("Not found: {0}")]
    NotFound(String),

    /// Overlay trop long
    #[error("Overlay exceeded the {0:?} bound")]
    Timeout(Duration),

    /// Couche de base inutilisable : le run est abandonné
    #[error("Pipeline failed on base layer {layer}: {source}")]
    Pipeline {
        layer: String,
        #[source]
        source: Box<FreeplotError>,
    },

    /// Configuration invalide
    #[error("Configuration error: {0}")]
    Config(String),

    /// Le générateur de commentaires a échoué
    #[error("Comment generator failed: {0}")]
    Generator(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FreeplotError>;

impl FreeplotError {
    /// Enveloppe une erreur de couche de base
    pub fn pipeline(layer: impl Into<String>, source: FreeplotError) -> Self {
        Self::Pipeline {
            layer: layer.into(),
            source: Box::new(source),
        }
    }

    pub fn topology(layer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Topology {
            layer: layer.into(),
            reason: reason.into(),
        }
    }

    /// Nom court de la catégorie, utilisé dans les warnings de run
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Format { .. } => "format",
            Self::Encoding { .. } => "encoding",
            Self::MissingCrs(_) => "missing_crs",
            Self::UnsupportedGeometry { .. } => "unsupported_geometry",
            Self::Reprojection { .. } => "reprojection",
            Self::Topology { .. } => "topology",
            Self::Persistence(_) => "persistence",
            Self::NotFound(_) => "not_found",
            Self::Timeout(_) => "timeout",
            Self::Pipeline { .. } => "pipeline",
            Self::Config(_) => "config",
            Self::Generator(_) => "generator",
            Self::Io(_) => "io",
        }
    }
}

impl From<ShpError> for FreeplotError {
    fn from(err: ShpError) -> Self {
        match err {
            ShpError::Io(e) => Self::Io(e),
            ShpError::Format { file, reason } => Self::Format { file, reason },
            ShpError::Encoding { field, encoding } => Self::Encoding { field, encoding },
            ShpError::MissingFile(file) => Self::Format {
                file,
                reason: "required member is missing".into(),
            },
            ShpError::MissingCrs(layer) => Self::MissingCrs(layer),
            ShpError::UnsupportedGeometry(geometry_type) => Self::UnsupportedGeometry {
                layer: String::new(),
                geometry_type,
            },
            ShpError::UnknownEncoding(label) => {
                Self::Config(format!("unknown character encoding: {}", label))
            }
            other @ ShpError::AttributeTypeMismatch { .. } => Self::Format {
                file: "attributes".into(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<tokio_postgres::Error> for FreeplotError {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for FreeplotError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for FreeplotError {
    fn from(err: serde_json::Error) -> Self {
        Self::Format {
            file: "json".into(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_errors_keep_their_category() {
        let err: FreeplotError = ShpError::format("a.shp", "bad header").into();
        assert_eq!(err.kind(), "format");

        let err: FreeplotError = ShpError::encoding("name", "UTF-8").into();
        assert!(matches!(err, FreeplotError::Encoding { ref field, .. } if field == "name"));

        let err: FreeplotError = ShpError::UnsupportedGeometry("MultiPatch".into()).into();
        assert_eq!(err.kind(), "unsupported_geometry");
    }

    #[test]
    fn test_pipeline_wraps_source() {
        let err = FreeplotError::pipeline("base_layer", FreeplotError::MissingCrs("base".into()));
        let message = err.to_string();
        assert!(message.contains("base_layer"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
