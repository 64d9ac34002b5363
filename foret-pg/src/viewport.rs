//! Chargement des parcelles forestières visibles dans un viewport

use anyhow::Result;
use geojson::{Feature, FeatureCollection, JsonObject, JsonValue};
use tracing::debug;

use crate::analysis::UNKNOWN_SPECIES;
use crate::catalog::{BoundingBox, SpatialCatalog, ViewportRow};

fn empty_collection() -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features: Vec::new(),
        foreign_members: None,
    }
}

fn row_to_feature(row: ViewportRow) -> Feature {
    let species = row
        .species_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_SPECIES);

    let mut properties = JsonObject::new();
    properties.insert("id".into(), JsonValue::from(row.id));
    properties.insert("source_id".into(), JsonValue::from(row.source_id));
    properties.insert("species".into(), JsonValue::from(species));
    properties.insert("area".into(), JsonValue::from(row.area_ha.unwrap_or(0.0)));

    Feature {
        bbox: None,
        geometry: Some(row.geometry),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Parcelles entièrement contenues dans `bbox`
///
/// Sous `min_zoom` (ou pour un zoom NaN), aucune requête n'est émise et la
/// collection est vide.
/// Sans rectangle complet, tout le catalogue forestier est retourné.
pub async fn viewport_features<C>(
    catalog: &C,
    bbox: Option<BoundingBox>,
    zoom: f64,
    min_zoom: f64,
) -> Result<FeatureCollection>
where
    C: SpatialCatalog + ?Sized,
{
    if zoom.is_nan() || zoom < min_zoom {
        debug!(zoom, min_zoom, "Zoom below threshold, skipping viewport query");
        return Ok(empty_collection());
    }

    let rows = catalog.parcels_within(bbox).await?;
    debug!(count = rows.len(), bbox = ?bbox, "Viewport loaded");

    Ok(FeatureCollection {
        features: rows.into_iter().map(row_to_feature).collect(),
        ..empty_collection()
    })
}
