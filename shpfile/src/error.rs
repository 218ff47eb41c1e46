//! Types d'erreurs pour le crate shpfile

use thiserror::Error;

/// Erreurs pouvant survenir lors de la lecture ou de l'écriture d'un shapefile
#[derive(Debug, Error)]
pub enum ShpError {
    /// Erreur d'I/O lors de la lecture du bundle
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Conteneur illisible (en-tête, longueur d'enregistrement, archive...)
    #[error("Format error in {file}: {reason}")]
    Format { file: String, reason: String },

    /// Texte d'attribut non décodable dans l'encodage demandé
    #[error("Cannot decode field {field} as {encoding}")]
    Encoding { field: String, encoding: String },

    /// Fichier obligatoire absent du bundle
    #[error("Missing required file: {0}")]
    MissingFile(String),

    /// Aucun système de coordonnées déclaré (.prj absent ou vide)
    #[error("No coordinate reference system declared for layer {0}")]
    MissingCrs(String),

    /// Type de géométrie non géré
    #[error("Unsupported geometry type: {0}")]
    UnsupportedGeometry(String),

    /// Libellé d'encodage inconnu
    #[error("Unknown character encoding: {0}")]
    UnknownEncoding(String),

    /// Accès typé sur un attribut d'un autre type
    #[error("Attribute type mismatch: expected {expected}, found {found}")]
    AttributeTypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

impl ShpError {
    /// Crée une erreur de format avec contexte
    pub fn format(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Format {
            file: file.into(),
            reason: reason.into(),
        }
    }

    /// Crée une erreur d'encodage
    pub fn encoding(field: impl Into<String>, encoding: impl Into<String>) -> Self {
        Self::Encoding {
            field: field.into(),
            encoding: encoding.into(),
        }
    }
}
