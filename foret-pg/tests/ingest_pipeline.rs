//! Import puis analyse de bout en bout sur un catalogue en mémoire
//!
//! Le catalogue reproduit les requêtes spatiales avec les prédicats de `geo`
//! (intersection, aire géodésique) à la place de PostGIS.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use geo::{BooleanOps, BoundingRect, GeodesicArea, Intersects, MultiPolygon};

use foret_pg::analysis::{analyze, parse_geometry};
use foret_pg::catalog::{
    BoundingBox, CatalogMaintenance, CatalogWriter, SpatialCatalog, SpeciesArea, ViewportRow,
    ZoneLocation,
};
use foret_pg::ingest::PipelineOptions;
use foret_pg::report::ImportStatus;
use foret_pg::viewport::viewport_features;
use foret_pg::{run_pipeline, Config, DatasetKind, VectorParcel};

#[derive(Default)]
struct MemoryCatalog {
    parcels: Mutex<Vec<VectorParcel>>,
    ledger: Mutex<Vec<String>>,
    executed: Mutex<Vec<String>>,
}

impl MemoryCatalog {
    fn forest(&self) -> Vec<foret_pg::parcel::ForestParcel> {
        self.parcels
            .lock()
            .unwrap()
            .iter()
            .filter_map(|p| match p {
                VectorParcel::Forest(f) => Some(f.clone()),
                VectorParcel::Cadastre(_) => None,
            })
            .collect()
    }

    fn cadastre(&self) -> Vec<foret_pg::parcel::CadastreParcel> {
        self.parcels
            .lock()
            .unwrap()
            .iter()
            .filter_map(|p| match p {
                VectorParcel::Cadastre(c) => Some(c.clone()),
                VectorParcel::Forest(_) => None,
            })
            .collect()
    }
}

fn to_multipolygon(geometry: &str) -> MultiPolygon<f64> {
    let geometry: geojson::Geometry = serde_json::from_str(geometry).unwrap();
    match geo::Geometry::<f64>::try_from(geometry).unwrap() {
        geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
        geo::Geometry::MultiPolygon(mp) => mp,
        other => panic!("unexpected geometry {other:?}"),
    }
}

#[async_trait]
impl CatalogWriter for MemoryCatalog {
    async fn write_batch(&self, batch: &[VectorParcel]) -> Result<u64> {
        self.parcels.lock().unwrap().extend_from_slice(batch);
        Ok(batch.len() as u64)
    }
}

#[async_trait]
impl CatalogMaintenance for MemoryCatalog {
    async fn execute(&self, sql: &str) -> Result<u64> {
        self.executed.lock().unwrap().push(sql.to_string());
        Ok(0)
    }

    async fn is_file_ingested(&self, checksum: &str) -> Result<bool> {
        Ok(self.ledger.lock().unwrap().iter().any(|c| c == checksum))
    }

    async fn record_ingested_file(&self, _path: &str, checksum: &str, _records: u64) -> Result<()> {
        self.ledger.lock().unwrap().push(checksum.to_string());
        Ok(())
    }
}

#[async_trait]
impl SpatialCatalog for MemoryCatalog {
    async fn species_areas(&self, geometry: &str) -> Result<Vec<SpeciesArea>> {
        let input = to_multipolygon(geometry);
        let mut by_species: BTreeMap<Option<String>, f64> = BTreeMap::new();

        for parcel in self.forest() {
            if parcel.geometry.intersects(&input) {
                let overlap = parcel.geometry.intersection(&input);
                *by_species.entry(parcel.species_name.clone()).or_default() +=
                    overlap.geodesic_area_unsigned() / 10_000.0;
            }
        }

        let mut rows: Vec<SpeciesArea> = by_species
            .into_iter()
            .map(|(name, area_ha)| SpeciesArea { name, area_ha })
            .collect();
        rows.sort_by(|a, b| b.area_ha.total_cmp(&a.area_ha));
        Ok(rows)
    }

    async fn parcel_labels(&self, geometry: &str, limit: i64) -> Result<Vec<Option<String>>> {
        let input = to_multipolygon(geometry);
        let mut labels: Vec<String> = self
            .cadastre()
            .into_iter()
            .filter(|c| c.geometry.intersects(&input))
            .map(|c| c.label)
            .collect();
        labels.sort();
        labels.dedup();
        labels.truncate(limit as usize);
        Ok(labels.into_iter().map(Some).collect())
    }

    async fn zone_names(&self, geometry: &str, limit: i64) -> Result<Vec<Option<String>>> {
        let input = to_multipolygon(geometry);
        let mut zones: Vec<Option<String>> = self
            .forest()
            .into_iter()
            .filter(|f| f.geometry.intersects(&input))
            .map(|f| f.zone_label)
            .collect();
        zones.sort();
        zones.dedup();
        zones.truncate(limit as usize);
        Ok(zones)
    }

    async fn parcels_within(&self, bbox: Option<BoundingBox>) -> Result<Vec<ViewportRow>> {
        Ok(self
            .forest()
            .into_iter()
            .enumerate()
            .filter(|(_, f)| match (bbox, f.geometry.bounding_rect()) {
                (None, _) => true,
                (Some(b), Some(r)) => {
                    r.min().x >= b.west && r.min().y >= b.south && r.max().x <= b.east && r.max().y <= b.north
                }
                (Some(_), None) => false,
            })
            .map(|(i, f)| ViewportRow {
                id: i as i64 + 1,
                source_id: f.source_id,
                species_name: f.species_name,
                area_ha: f.area_ha,
                geometry: geojson::Geometry::new(geojson::Value::from(&f.geometry)),
            })
            .collect())
    }

    async fn zone_names_for_region(&self, region: &str) -> Result<Vec<String>> {
        let mut zones: Vec<String> = self
            .forest()
            .into_iter()
            .filter(|f| f.region_code.as_deref() == Some(region))
            .filter_map(|f| f.zone_label)
            .collect();
        zones.sort();
        zones.dedup();
        Ok(zones)
    }

    async fn zone_centroid(&self, _zone: &str, _region: &str) -> Result<Option<ZoneLocation>> {
        Ok(None)
    }
}

/// Rectangle Lambert 93 de 250 m × 500 m (12,5 ha) près de Paris
fn lambert_square(x0: f64, y0: f64) -> String {
    format!(
        "[[[{x0},{y0}],[{x1},{y0}],[{x1},{y1}],[{x0},{y1}],[{x0},{y0}]]]",
        x1 = x0 + 250.0,
        y1 = y0 + 500.0
    )
}

fn write_forest(dir: &Path, name: &str, features: &[(Option<&str>, String)]) {
    let features: Vec<String> = features
        .iter()
        .enumerate()
        .map(|(i, (species, coords))| {
            let essence = species.map(|s| format!(r#","ESSENCE":"{s}""#)).unwrap_or_default();
            format!(
                r#"{{"type":"Feature","properties":{{"ID":"FOR{i:04}","TFV":"Forêt fermée"{essence}}},"geometry":{{"type":"Polygon","coordinates":{coords}}}}}"#
            )
        })
        .collect();
    let body = format!(r#"{{"type":"FeatureCollection","features":[{}]}}"#, features.join(","));
    fs::write(dir.join(name), body).unwrap();
}

fn test_config() -> Config {
    let mut config = Config::from_preset("default").unwrap();
    config.forest.file_pattern = r"^forest.*\.(geojson|shp)$".to_string();
    config.ingest.batch_size = 2;
    config.ingest.queue_capacity = 1;
    config
}

fn options() -> PipelineOptions {
    PipelineOptions {
        kinds: DatasetKind::ALL.to_vec(),
        schema: "foret".into(),
        post_process: true,
    }
}

const COVERING: &str = r#"{"type":"Polygon","coordinates":[[[2.0,48.0],[3.0,48.0],[3.0,49.5],[2.0,49.5],[2.0,48.0]]]}"#;

#[tokio::test]
async fn test_single_oak_parcel_analysis() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("BDF_2-0_SHP_LAMB93_D075");
    fs::create_dir_all(&root).unwrap();
    write_forest(&root, "forest.geojson", &[(Some("Chêne"), lambert_square(652000.0, 6862000.0))]);

    let catalog = MemoryCatalog::default();
    let report = run_pipeline(&catalog, dir.path(), &test_config(), &options()).await.unwrap();

    assert_eq!(report.status, ImportStatus::Success);
    assert_eq!(report.records_written, 1);
    assert_eq!(report.files[0].region_hint.as_deref(), Some("75"));
    assert_eq!(report.post_processing.len(), catalog.executed.lock().unwrap().len());

    let forest = catalog.forest();
    assert_eq!(forest[0].region_code.as_deref(), Some("75"));
    let ring = forest[0].geometry.0[0].exterior();
    assert!(ring.0.iter().all(|c| (2.3..2.4).contains(&c.x) && (48.8..48.9).contains(&c.y)));

    let config = test_config();
    let result = analyze(&catalog, &parse_geometry(COVERING).unwrap(), &config.analysis)
        .await
        .unwrap();
    assert_eq!(result.total_analysis_area, 12.5);
    assert_eq!(result.species.len(), 1);
    assert_eq!(result.species[0].name, "Chêne");
    assert_eq!(result.species[0].area, 12.5);
    assert_eq!(result.species[0].percentage, 100.0);
}

#[tokio::test]
async fn test_species_less_parcel_reported_as_unknown() {
    let dir = tempfile::tempdir().unwrap();
    write_forest(
        dir.path(),
        "forest.geojson",
        &[
            (Some("Hêtre"), lambert_square(652000.0, 6862000.0)),
            (None, lambert_square(653000.0, 6862000.0)),
        ],
    );

    let catalog = MemoryCatalog::default();
    run_pipeline(&catalog, dir.path(), &test_config(), &options()).await.unwrap();

    let config = test_config();
    let result = analyze(&catalog, &parse_geometry(COVERING).unwrap(), &config.analysis)
        .await
        .unwrap();
    let names: Vec<_> = result.species.iter().map(|s| s.name.as_str()).collect();
    assert!(names.contains(&"Unknown"));
    assert!(names.contains(&"Hêtre"));
    assert!((result.total_analysis_area - 25.0).abs() < 0.02);
    assert!(result.species.iter().all(|s| s.percentage == 50.0));
}

#[tokio::test]
async fn test_no_forest_data_is_empty_result() {
    let catalog = MemoryCatalog::default();
    let config = test_config();
    let result = analyze(&catalog, &parse_geometry(COVERING).unwrap(), &config.analysis)
        .await
        .unwrap();
    assert_eq!(result.total_analysis_area, 0.0);
    assert!(result.species.is_empty());
    assert!(result.parcels.is_empty());
}

#[tokio::test]
async fn test_cadastre_labels_and_viewport() {
    let dir = tempfile::tempdir().unwrap();
    write_forest(dir.path(), "forest.geojson", &[(Some("Chêne"), lambert_square(652000.0, 6862000.0))]);
    fs::write(
        dir.path().join("cadastre-75-parcelles.json"),
        r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"idu":"75056000AB0012"},"geometry":{"type":"Polygon","coordinates":[[[2.34,48.85],[2.36,48.85],[2.36,48.87],[2.34,48.85]]]}},
            {"type":"Feature","properties":{"commune":"75056"},"geometry":{"type":"Polygon","coordinates":[[[2.35,48.86],[2.37,48.86],[2.37,48.88],[2.35,48.86]]]}},
            {"type":"Feature","properties":{"idu":"75056000AB0013"},"geometry":null}
        ]}"#,
    )
    .unwrap();

    let catalog = MemoryCatalog::default();
    let report = run_pipeline(&catalog, dir.path(), &test_config(), &options()).await.unwrap();
    assert_eq!(report.by_dataset["cadastre"].written, 2);
    assert_eq!(report.by_dataset["cadastre"].skipped, 1);

    let cadastre = catalog.cadastre();
    assert!(cadastre.iter().all(|c| c.region_code.as_deref() == Some("75")));

    let config = test_config();
    let result = analyze(&catalog, &parse_geometry(COVERING).unwrap(), &config.analysis)
        .await
        .unwrap();
    assert_eq!(result.parcels, vec!["75056000AB0012", "??"]);

    let bbox = BoundingBox::from_bounds(Some(2.3), Some(48.8), Some(2.4), Some(48.9));
    let low = viewport_features(&catalog, bbox, 9.0, config.analysis.min_viewport_zoom).await.unwrap();
    assert!(low.features.is_empty());

    let high = viewport_features(&catalog, bbox, 14.0, config.analysis.min_viewport_zoom).await.unwrap();
    assert_eq!(high.features.len(), 1);
    let props = high.features[0].properties.as_ref().unwrap();
    assert_eq!(props["species"], "Chêne");
    assert_eq!(props["source_id"], "FOR0000");

    let elsewhere = BoundingBox::from_bounds(Some(5.0), Some(45.0), Some(5.1), Some(45.1));
    let none = viewport_features(&catalog, elsewhere, 14.0, 10.5).await.unwrap();
    assert!(none.features.is_empty());
}

#[tokio::test]
async fn test_reingest_appends_and_flags_file() {
    let dir = tempfile::tempdir().unwrap();
    write_forest(
        dir.path(),
        "forest.geojson",
        &[
            (Some("Chêne"), lambert_square(652000.0, 6862000.0)),
            (Some("Chêne"), lambert_square(652500.0, 6862000.0)),
            (Some("Pin sylvestre"), lambert_square(653000.0, 6862000.0)),
        ],
    );

    let catalog = MemoryCatalog::default();
    let first = run_pipeline(&catalog, dir.path(), &test_config(), &options()).await.unwrap();
    assert!(!first.files[0].already_ingested);
    assert_eq!(first.files[0].flushes, 2);

    let second = run_pipeline(&catalog, dir.path(), &test_config(), &options()).await.unwrap();
    assert!(second.files[0].already_ingested);
    assert_eq!(catalog.forest().len(), 6);
}

#[tokio::test]
async fn test_broken_file_does_not_stop_run() {
    let dir = tempfile::tempdir().unwrap();
    write_forest(dir.path(), "forest.geojson", &[(Some("Chêne"), lambert_square(652000.0, 6862000.0))]);
    // Shapefile sans .dbf
    fs::write(dir.path().join("forest_broken.shp"), b"").unwrap();

    let catalog = MemoryCatalog::default();
    let mut opts = options();
    opts.post_process = false;
    let report = run_pipeline(&catalog, dir.path(), &test_config(), &opts).await.unwrap();

    assert_eq!(report.files_failed, 1);
    assert_eq!(report.records_written, 1);
    assert_eq!(report.status, ImportStatus::PartialSuccess);
    assert!(report.post_processing.is_empty());
    assert!(catalog.executed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_truncated_file_keeps_committed_rows() {
    let dir = tempfile::tempdir().unwrap();
    let squares: Vec<_> = (0..4)
        .map(|i| (Some("Chêne"), lambert_square(652000.0 + 500.0 * i as f64, 6862000.0)))
        .collect();
    write_forest(dir.path(), "forest.geojson", &squares);

    // Cinquième feature coupée en plein milieu
    let path = dir.path().join("forest.geojson");
    let body = fs::read_to_string(&path).unwrap();
    let truncated = format!(
        r#"{},{{"type":"Feature","properties":{{"ID":"FOR0004"}},"geometry":{{"type":"Polygon","coordinates":[[[652"#,
        body.trim_end_matches("]}")
    );
    fs::write(&path, truncated).unwrap();

    let catalog = MemoryCatalog::default();
    let mut opts = options();
    opts.post_process = false;
    let report = run_pipeline(&catalog, dir.path(), &test_config(), &opts).await.unwrap();

    assert_eq!(catalog.forest().len(), 4);
    assert_eq!(report.records_written, 4);
    assert_eq!(report.files_failed, 1);
    assert_eq!(report.status, ImportStatus::PartialSuccess);

    let file = &report.files[0];
    assert_eq!(file.written, 4);
    assert_eq!(file.flushes, 2);
    assert_eq!(file.read, 4);
    assert!(file.error.as_deref().is_some_and(|e| e.contains("GeoJSON")));
    assert_eq!(report.failures.len(), 1);
    assert_eq!(catalog.ledger.lock().unwrap().len(), 1);
}
