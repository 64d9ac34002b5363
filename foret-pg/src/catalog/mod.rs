//! Catalogue spatial : interfaces d'écriture, de maintenance et de requête
//!
//! Le catalogue PostGIS implémente les trois traits. Les requêtes reçoivent la
//! géométrie utilisateur sérialisée en GeoJSON (EPSG:4326) et ne font aucun calcul
//! géométrique côté Rust.

pub mod pool;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::parcel::VectorParcel;

pub use pool::{create_pool, DatabaseConfig, SslMode};
pub use postgres::PgCatalog;

/// Écriture des lots normalisés
#[async_trait]
pub trait CatalogWriter: Send + Sync {
    /// Écrit un lot dans une seule transaction et retourne le nombre de lignes écrites
    async fn write_batch(&self, batch: &[VectorParcel]) -> Result<u64>;
}

/// Maintenance du catalogue : post-traitements et registre des fichiers importés
#[async_trait]
pub trait CatalogMaintenance: Send + Sync {
    /// Exécute une instruction SQL et retourne le nombre de lignes affectées
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Un fichier de même checksum a-t-il déjà été importé ?
    async fn is_file_ingested(&self, checksum: &str) -> Result<bool>;

    /// Enregistre un fichier importé
    async fn record_ingested_file(&self, path: &str, checksum: &str, records: u64) -> Result<()>;
}

/// Rectangle de viewport en degrés (EPSG:4326)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    /// Construit un rectangle si les quatre bornes sont présentes
    pub fn from_bounds(
        west: Option<f64>,
        south: Option<f64>,
        east: Option<f64>,
        north: Option<f64>,
    ) -> Option<Self> {
        Some(Self {
            west: west?,
            south: south?,
            east: east?,
            north: north?,
        })
    }
}

impl std::str::FromStr for BoundingBox {
    type Err = String;

    /// Format `west,south,east,north`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values: Vec<f64> = s
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| format!("Invalid bbox {s}: {e}"))?;

        match values.as_slice() {
            [west, south, east, north] => Ok(Self {
                west: *west,
                south: *south,
                east: *east,
                north: *north,
            }),
            _ => Err(format!("Invalid bbox {s}: expected west,south,east,north")),
        }
    }
}

/// Surface d'intersection cumulée d'une essence
#[derive(Debug, Clone, PartialEq)]
pub struct SpeciesArea {
    pub name: Option<String>,
    pub area_ha: f64,
}

/// Parcelle forestière retournée par une requête de viewport
#[derive(Debug, Clone, PartialEq)]
pub struct ViewportRow {
    pub id: i64,
    pub source_id: Option<String>,
    pub species_name: Option<String>,
    pub area_ha: Option<f64>,
    pub geometry: geojson::Geometry,
}

/// Centre d'une zone
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneLocation {
    pub lng: f64,
    pub lat: f64,
}

/// Requêtes spatiales en lecture seule
#[async_trait]
pub trait SpatialCatalog: Send + Sync {
    /// Surface d'intersection par essence (ha), triée par surface décroissante
    async fn species_areas(&self, geometry: &str) -> Result<Vec<SpeciesArea>>;

    /// Libellés distincts des parcelles cadastrales intersectées, ordre alphabétique
    async fn parcel_labels(&self, geometry: &str, limit: i64) -> Result<Vec<Option<String>>>;

    /// Noms de zones distincts des parcelles forestières intersectées
    async fn zone_names(&self, geometry: &str, limit: i64) -> Result<Vec<Option<String>>>;

    /// Parcelles forestières entièrement contenues dans le rectangle (toutes si `None`)
    async fn parcels_within(&self, bbox: Option<BoundingBox>) -> Result<Vec<ViewportRow>>;

    /// Noms de zones d'un département, triés
    async fn zone_names_for_region(&self, region: &str) -> Result<Vec<String>>;

    /// Centroïde de toutes les parcelles d'une zone dans un département
    async fn zone_centroid(&self, zone: &str, region: &str) -> Result<Option<ZoneLocation>>;
}
