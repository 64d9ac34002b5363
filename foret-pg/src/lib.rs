//! # foret-pg
//!
//! Import des parcelles forestières (BD Forêt) et cadastrales vers PostGIS,
//! puis analyses spatiales interactives.
//!
//! ## Features
//!
//! - Lecture en flux des shapefiles et GeoJSON (gzip compris), mémoire bornée
//! - Reprojection Lambert 93 → WGS84 en Rust pur (PROJ en option)
//! - Réparation des libellés doublement encodés
//! - Écriture par lots en COPY, file bornée entre lecture et écriture
//! - Analyse d'intersection (essences, parcelles, zones) et requêtes de viewport
//!
//! ## Usage CLI
//!
//! ```bash
//! # Import BD Forêt + cadastre
//! foret-pg import --root ./data
//!
//! # Analyse d'un polygone
//! foret-pg analyze --geometry zone.geojson
//!
//! # Parcelles d'un viewport
//! foret-pg viewport --zoom 12 --bbox 2.2,48.8,2.4,48.9
//! ```

pub mod analysis;
pub mod catalog;
pub mod config;
pub mod ingest;
pub mod normalize;
pub mod parcel;
pub mod raster;
pub mod report;
pub mod reproject;
pub mod viewport;

pub use analysis::{analyze, AnalysisError, AnalysisResult, SpeciesShare};
pub use catalog::{create_pool, DatabaseConfig, PgCatalog};
pub use config::Config;
pub use ingest::{run_pipeline, PipelineOptions};
pub use parcel::{DatasetKind, VectorParcel};
pub use report::{IngestReport, ImportStatus};
pub use reproject::{ReprojectError, Reprojector};
