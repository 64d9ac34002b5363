//! # geosource
//!
//! Lecture en flux de jeux de données vectoriels polygonaux (Shapefile, GeoJSON).
//!
//! ## Features
//!
//! - Shapefile lu enregistrement par enregistrement (.shp + .dbf)
//! - FeatureCollection GeoJSON, brute ou compressée gzip, désérialisée feature par feature
//! - Réparation des libellés doublement encodés (`memchr`, `simdutf8`, `encoding_rs`)
//! - Types `geo` pour l'interopérabilité avec l'écosystème Rust géospatial
//!
//! ## Usage
//!
//! ```rust,ignore
//! use geosource::FeatureStream;
//! use std::ops::ControlFlow;
//!
//! let stats = FeatureStream::open("FORMATION_VEGETALE.shp")?.for_each(|feature| {
//!     println!("{} rings", feature.geometry.ring_count());
//!     ControlFlow::Continue(())
//! })?;
//! println!("{} features, {} skipped", stats.emitted, stats.skipped());
//! ```

pub mod error;
pub mod reader;
pub mod repair;
pub mod types;

pub use error::GeoSourceError;
pub use reader::geojson::polygonal_from_value;
pub use reader::FeatureStream;
pub use repair::{repair_text, MOJIBAKE_TABLE};
pub use types::{Polygonal, RawFeature, SourceFormat, StreamStats};
