//! Lecteurs en flux des fichiers sources
//!
//! Le format est choisi d'après l'extension. Les features sont transmises une à une
//! à un visiteur qui peut interrompre la lecture en retournant `ControlFlow::Break`.

pub mod geojson;
mod shp;

use std::fs::File;
use std::io::Read;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::info;

use crate::error::GeoSourceError;
use crate::types::{RawFeature, SourceFormat, StreamStats};

/// Fichier source prêt à être parcouru
#[derive(Debug, Clone)]
pub struct FeatureStream {
    path: PathBuf,
    format: SourceFormat,
}

impl FeatureStream {
    /// Vérifie le fichier et détecte son format
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GeoSourceError> {
        let path = path.as_ref();
        let format = SourceFormat::detect(path)
            .ok_or_else(|| GeoSourceError::UnsupportedFormat(path.display().to_string()))?;

        if !path.is_file() {
            return Err(GeoSourceError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            )));
        }

        if format == SourceFormat::Shapefile && find_companion(path, "dbf").is_none() {
            return Err(GeoSourceError::MissingCompanion(
                path.with_extension("dbf").display().to_string(),
            ));
        }

        Ok(Self {
            path: path.to_path_buf(),
            format,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }

    /// Parcourt toutes les features polygonales du fichier
    ///
    /// Les features sans géométrie ou non polygonales sont ignorées et comptées.
    /// Une erreur de lecture ou de syntaxe interrompt le fichier entier.
    pub fn for_each<F>(self, mut visit: F) -> Result<StreamStats, GeoSourceError>
    where
        F: FnMut(RawFeature) -> ControlFlow<()>,
    {
        let label = self.path.display().to_string();
        info!(file = %label, format = ?self.format, "Streaming source file");

        match self.format {
            SourceFormat::Shapefile => shp::stream(&self.path, &mut visit),
            SourceFormat::GeoJson => {
                let file = File::open(&self.path)?;
                geojson::stream_features(file, &label, &mut visit)
            }
            SourceFormat::GeoJsonGz => {
                let file = File::open(&self.path)?;
                let decoder: Box<dyn Read> = Box::new(GzDecoder::new(file));
                geojson::stream_features(decoder, &label, &mut visit)
            }
        }
    }
}

/// Cherche un fichier compagnon (.dbf, .DBF) à côté du .shp
fn find_companion(path: &Path, ext: &str) -> Option<PathBuf> {
    [ext.to_ascii_lowercase(), ext.to_ascii_uppercase()]
        .into_iter()
        .map(|e| path.with_extension(e))
        .find(|p| p.is_file())
}
