//! Configuration de l'import et des analyses

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::parcel::DatasetKind;

/// Configuration principale
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub forest: DatasetConfig,
    pub cadastre: DatasetConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub raster: RasterConfig,
}

/// Configuration d'un type de jeu de données
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatasetConfig {
    /// Regex appliquée au nom de fichier lors de la découverte
    pub file_pattern: String,

    /// EPSG des géométries sources
    #[serde(default = "default_source_epsg")]
    pub source_epsg: u32,

    /// Attributs sources candidats pour chaque champ canonique, par priorité
    #[serde(default)]
    pub fields: FieldCandidates,
}

/// Noms d'attributs sources candidats, essayés dans l'ordre
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FieldCandidates {
    #[serde(default)]
    pub source_id: Vec<String>,
    #[serde(default)]
    pub species_code: Vec<String>,
    #[serde(default)]
    pub species_name: Vec<String>,
    #[serde(default)]
    pub vegetation_type: Vec<String>,
    #[serde(default)]
    pub area_ha: Vec<String>,
    #[serde(default)]
    pub region_code: Vec<String>,
    #[serde(default)]
    pub label: Vec<String>,
    #[serde(default)]
    pub section: Vec<String>,
    #[serde(default)]
    pub numero: Vec<String>,
}

/// Paramètres du pipeline d'import
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    /// Enregistrements par transaction
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Capacité de la file entre lecteur et écrivain
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Décimales conservées après reprojection
    #[serde(default = "default_precision")]
    pub precision: u8,
}

/// Paramètres des analyses interactives
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysisConfig {
    /// Délai maximal de chaque sous-requête
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_parcel_limit")]
    pub parcel_limit: i64,

    #[serde(default = "default_zone_limit")]
    pub zone_limit: i64,

    /// En dessous de ce zoom, la requête de viewport n'est pas émise
    #[serde(default = "default_min_viewport_zoom")]
    pub min_viewport_zoom: f64,
}

/// Outil externe de statistiques de hauteur LiDAR
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RasterConfig {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    #[serde(default = "default_script")]
    pub script: PathBuf,

    #[serde(default = "default_tile_dir")]
    pub tile_dir: PathBuf,

    #[serde(default = "default_raster_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_source_epsg() -> u32 {
    crate::reproject::LAMBERT93_EPSG
}

fn default_batch_size() -> usize {
    1000
}

fn default_queue_capacity() -> usize {
    256
}

fn default_precision() -> u8 {
    7
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_parcel_limit() -> i64 {
    30
}

fn default_zone_limit() -> i64 {
    5
}

fn default_min_viewport_zoom() -> f64 {
    10.5
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_script() -> PathBuf {
    PathBuf::from("scripts/lidar_processor.py")
}

fn default_tile_dir() -> PathBuf {
    PathBuf::from("data/lidar")
}

fn default_raster_timeout_secs() -> u64 {
    120
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            queue_capacity: default_queue_capacity(),
            precision: default_precision(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            parcel_limit: default_parcel_limit(),
            zone_limit: default_zone_limit(),
            min_viewport_zoom: default_min_viewport_zoom(),
        }
    }
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            script: default_script(),
            tile_dir: default_tile_dir(),
            timeout_secs: default_raster_timeout_secs(),
        }
    }
}

impl Config {
    /// Charge une configuration depuis un fichier
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        serde_json::from_str(&content).context("Failed to parse config JSON")
    }

    /// Charge une configuration depuis un preset embarqué
    pub fn from_preset(preset: &str) -> Result<Self> {
        match preset {
            "default" => serde_json::from_str(include_str!("presets/default.json"))
                .context("Failed to parse embedded config"),
            _ => anyhow::bail!("Unknown preset: {}. Use: default", preset),
        }
    }

    /// Nom de preset ou chemin de fichier
    pub fn resolve(name_or_path: &str) -> Result<Self> {
        match name_or_path {
            "default" => Self::from_preset(name_or_path),
            _ => Self::load(Path::new(name_or_path)),
        }
    }

    pub fn dataset(&self, kind: DatasetKind) -> &DatasetConfig {
        match kind {
            DatasetKind::Forest => &self.forest,
            DatasetKind::Cadastre => &self.cadastre,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_preset() {
        let config = Config::from_preset("default").unwrap();

        assert_eq!(config.forest.source_epsg, 2154);
        assert_eq!(config.cadastre.source_epsg, 4326);
        assert_eq!(config.forest.fields.species_name, vec!["ESSENCE"]);
        assert_eq!(config.cadastre.fields.label, vec!["idu", "parcelle"]);
        assert_eq!(config.ingest.batch_size, 1000);
        assert_eq!(config.analysis.parcel_limit, 30);
        assert_eq!(config.analysis.zone_limit, 5);
        assert!((config.analysis.min_viewport_zoom - 10.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_preset() {
        assert!(Config::from_preset("full").is_err());
    }

    #[test]
    fn test_sections_default_when_omitted() {
        let json = r#"{
            "forest": {"file_pattern": "^a\\.shp$"},
            "cadastre": {"file_pattern": "^b\\.json$", "source_epsg": 4326}
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.forest.source_epsg, 2154);
        assert!(config.forest.fields.source_id.is_empty());
        assert_eq!(config.ingest.queue_capacity, 256);
        assert_eq!(config.analysis.timeout_secs, 30);
        assert_eq!(config.raster.interpreter, "python3");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, include_str!("presets/default.json")).unwrap();

        let config = Config::resolve(path.to_str().unwrap()).unwrap();
        assert_eq!(config.dataset(DatasetKind::Cadastre).fields.region_code[0], "code_dep");
    }
}
