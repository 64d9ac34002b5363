//! Types d'erreurs pour le crate geosource

use thiserror::Error;

/// Erreurs pouvant survenir lors de la lecture d'un fichier source
#[derive(Debug, Error)]
pub enum GeoSourceError {
    /// Erreur d'I/O lors de l'ouverture ou de la lecture du fichier
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shapefile illisible (.shp, .shx ou .dbf)
    #[error("Shapefile error in {path}: {reason}")]
    Shapefile { path: String, reason: String },

    /// FeatureCollection GeoJSON mal formée
    #[error("GeoJSON error in {path}: {reason}")]
    GeoJson { path: String, reason: String },

    /// Extension de fichier non reconnue
    #[error("Unsupported source format: {0}")]
    UnsupportedFormat(String),

    /// Fichier compagnon manquant (.dbf d'un shapefile)
    #[error("Missing companion file: {0}")]
    MissingCompanion(String),
}

impl GeoSourceError {
    /// Crée une erreur shapefile avec contexte
    pub fn shapefile(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::Shapefile {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Crée une erreur GeoJSON avec contexte
    pub fn geojson(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::GeoJson {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
