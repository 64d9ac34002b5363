//! Analyse d'intersection d'un polygone utilisateur
//!
//! Trois requêtes concurrentes (surfaces par essence, parcelles cadastrales, zones)
//! puis agrégation. Un échec ou un dépassement de délai sur l'une d'elles fait
//! échouer toute l'analyse : aucun résultat partiel n'est produit.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use geojson::{GeoJson, Geometry, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::catalog::{SpatialCatalog, SpeciesArea};
use crate::config::AnalysisConfig;

/// Essence sans nom
pub const UNKNOWN_SPECIES: &str = "Unknown";

/// Parcelle cadastrale sans libellé
pub const UNKNOWN_PARCEL: &str = "Unknown Parcel";

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Unsupported geometry: {0} (expected Polygon or MultiPolygon)")]
    UnsupportedGeometry(String),

    #[error("Query {query} failed: {message}")]
    Query { query: &'static str, message: String },

    #[error("Query {query} timed out after {seconds}s")]
    Timeout { query: &'static str, seconds: u64 },
}

/// Part d'une essence dans la surface analysée
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesShare {
    pub name: String,
    /// Hectares, 2 décimales
    pub area: f64,
    /// Pourcentage, 1 décimale
    pub percentage: f64,
}

/// Résultat d'une analyse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Somme des surfaces par essence (ha), pas la surface du polygone
    pub total_analysis_area: f64,
    pub species: Vec<SpeciesShare>,
    pub parcels: Vec<String>,
    /// Noms de zones intersectées
    pub communes: Vec<String>,
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

/// Classement et arrondis des surfaces par essence
///
/// Retourne la surface totale (2 décimales) et les parts triées par surface décroissante.
pub fn summarize_species(rows: &[SpeciesArea]) -> (f64, Vec<SpeciesShare>) {
    let total: f64 = rows.iter().map(|r| r.area_ha).sum();

    let mut shares: Vec<SpeciesShare> = rows
        .iter()
        .map(|r| SpeciesShare {
            name: r
                .name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .unwrap_or(UNKNOWN_SPECIES)
                .to_string(),
            area: round_to(r.area_ha, 2),
            percentage: if total > 0.0 {
                (r.area_ha / total * 1000.0).round() / 10.0
            } else {
                0.0
            },
        })
        .collect();

    shares.sort_by(|a, b| b.area.total_cmp(&a.area));
    (round_to(total, 2), shares)
}

/// Libellés nettoyés ; un libellé vide devient "Unknown Parcel"
pub fn clean_labels(labels: Vec<Option<String>>) -> Vec<String> {
    labels
        .into_iter()
        .map(|l| {
            l.map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| UNKNOWN_PARCEL.to_string())
        })
        .collect()
}

/// Noms de zones nettoyés ; les valeurs vides sont retirées
pub fn clean_zones(zones: Vec<Option<String>>) -> Vec<String> {
    zones
        .into_iter()
        .flatten()
        .map(|z| z.trim().to_string())
        .filter(|z| !z.is_empty())
        .collect()
}

/// Lit une géométrie d'analyse : Geometry, ou Feature portant une géométrie
pub fn parse_geometry(input: &str) -> Result<Geometry, AnalysisError> {
    let geojson = GeoJson::from_str(input)
        .map_err(|e| AnalysisError::UnsupportedGeometry(format!("invalid GeoJSON: {e}")))?;

    let geometry = match geojson {
        GeoJson::Geometry(g) => g,
        GeoJson::Feature(f) => f
            .geometry
            .ok_or_else(|| AnalysisError::UnsupportedGeometry("feature without geometry".into()))?,
        GeoJson::FeatureCollection(_) => {
            return Err(AnalysisError::UnsupportedGeometry("FeatureCollection".into()))
        }
    };
    ensure_polygonal(&geometry)?;
    Ok(geometry)
}

fn ensure_polygonal(geometry: &Geometry) -> Result<(), AnalysisError> {
    match geometry.value {
        Value::Polygon(_) | Value::MultiPolygon(_) => Ok(()),
        ref other => Err(AnalysisError::UnsupportedGeometry(type_name(other).to_string())),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Point(_) => "Point",
        Value::MultiPoint(_) => "MultiPoint",
        Value::LineString(_) => "LineString",
        Value::MultiLineString(_) => "MultiLineString",
        Value::Polygon(_) => "Polygon",
        Value::MultiPolygon(_) => "MultiPolygon",
        Value::GeometryCollection(_) => "GeometryCollection",
    }
}

/// Applique le délai d'une sous-requête et type son erreur
async fn guarded<T, F>(query: &'static str, seconds: u64, fut: F) -> Result<T, AnalysisError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(Duration::from_secs(seconds), fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            warn!(query, "Analysis query failed: {e:#}");
            Err(AnalysisError::Query {
                query,
                message: format!("{e:#}"),
            })
        }
        Err(_) => {
            warn!(query, seconds, "Analysis query timed out");
            Err(AnalysisError::Timeout { query, seconds })
        }
    }
}

/// Analyse d'un polygone en coordonnées géodésiques
pub async fn analyze<C>(
    catalog: &C,
    geometry: &Geometry,
    config: &AnalysisConfig,
) -> Result<AnalysisResult, AnalysisError>
where
    C: SpatialCatalog + ?Sized,
{
    ensure_polygonal(geometry)?;
    let geometry_json = serde_json::to_string(geometry)
        .map_err(|e| AnalysisError::UnsupportedGeometry(e.to_string()))?;
    let seconds = config.timeout_secs;

    let (species, labels, zones) = tokio::try_join!(
        guarded("species_areas", seconds, catalog.species_areas(&geometry_json)),
        guarded(
            "parcel_labels",
            seconds,
            catalog.parcel_labels(&geometry_json, config.parcel_limit)
        ),
        guarded(
            "zone_names",
            seconds,
            catalog.zone_names(&geometry_json, config.zone_limit)
        ),
    )?;

    let (total_analysis_area, species) = summarize_species(&species);
    debug!(
        total = total_analysis_area,
        species = species.len(),
        parcels = labels.len(),
        zones = zones.len(),
        "Analysis done"
    );

    Ok(AnalysisResult {
        total_analysis_area,
        species,
        parcels: clean_labels(labels),
        communes: clean_zones(zones),
    })
}
