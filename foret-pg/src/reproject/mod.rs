//! Reprojection des géométries sources vers les coordonnées géodésiques (EPSG:4326)
//!
//! Backends :
//! - identité si la source est déjà en EPSG:4326
//! - Lambert 93 (EPSG:2154) en Rust pur
//! - PROJ pour toute autre paire (feature `reproject`)
//!
//! Chaque anneau est transformé point par point : le nombre de points, leur ordre
//! et l'ordre des anneaux (extérieur puis trous) sont conservés.

mod lambert;
#[cfg(feature = "reproject")]
mod proj_backend;

pub use lambert::Lambert93;

use geo::{Coord, LineString, MultiPolygon, Polygon};
use geosource::Polygonal;
use thiserror::Error;

/// SRID des géométries persistées
pub const TARGET_EPSG: u32 = 4326;

/// SRID des sources BD Forêt
pub const LAMBERT93_EPSG: u32 = 2154;

/// Erreurs de reprojection (elles invalident une seule feature)
#[derive(Debug, Error)]
pub enum ReprojectError {
    #[error("Unsupported projection EPSG:{from} -> EPSG:{to}")]
    UnsupportedProjection { from: u32, to: u32 },

    #[error("Coordinate ({x}, {y}) is outside the projection domain")]
    OutOfDomain { x: f64, y: f64 },

    #[error("Projection backend error: {0}")]
    Backend(String),
}

enum Backend {
    Identity,
    Lambert93(Lambert93),
    #[cfg(feature = "reproject")]
    Proj(proj_backend::ProjBackend),
}

/// Reprojection d'une projection source vers une cible géodésique
pub struct Reprojector {
    source_epsg: u32,
    target_epsg: u32,
    backend: Backend,
}

impl std::fmt::Debug for Reprojector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reprojector")
            .field("source_epsg", &self.source_epsg)
            .field("target_epsg", &self.target_epsg)
            .finish()
    }
}

impl Reprojector {
    /// Crée un reprojector entre deux EPSG
    pub fn new(source_epsg: u32, target_epsg: u32) -> Result<Self, ReprojectError> {
        let backend = match (source_epsg, target_epsg) {
            (s, t) if s == t => Backend::Identity,
            (LAMBERT93_EPSG, TARGET_EPSG) => Backend::Lambert93(Lambert93::new()),
            #[cfg(feature = "reproject")]
            (s, t) => Backend::Proj(proj_backend::ProjBackend::new(s, t)?),
            #[cfg(not(feature = "reproject"))]
            (s, t) => {
                return Err(ReprojectError::UnsupportedProjection { from: s, to: t });
            }
        };

        Ok(Self {
            source_epsg,
            target_epsg,
            backend,
        })
    }

    /// Reprojector vers EPSG:4326
    pub fn to_wgs84(source_epsg: u32) -> Result<Self, ReprojectError> {
        Self::new(source_epsg, TARGET_EPSG)
    }

    pub fn source_epsg(&self) -> u32 {
        self.source_epsg
    }

    pub fn target_epsg(&self) -> u32 {
        self.target_epsg
    }

    pub fn is_identity(&self) -> bool {
        matches!(self.backend, Backend::Identity)
    }

    /// Transforme une coordonnée
    pub fn transform_coord(&self, c: Coord) -> Result<Coord, ReprojectError> {
        if !c.x.is_finite() || !c.y.is_finite() {
            return Err(ReprojectError::OutOfDomain { x: c.x, y: c.y });
        }

        let (lon, lat) = match &self.backend {
            Backend::Identity => (c.x, c.y),
            Backend::Lambert93(l93) => l93.inverse(c.x, c.y),
            #[cfg(feature = "reproject")]
            Backend::Proj(p) => p.convert(c.x, c.y)?,
        };

        if !lon.is_finite() || !lat.is_finite() || lat.abs() > 90.0 {
            return Err(ReprojectError::OutOfDomain { x: c.x, y: c.y });
        }
        Ok(Coord { x: lon, y: lat })
    }

    /// Transforme un anneau (même nombre de points, même ordre)
    pub fn transform_ring(&self, ring: &LineString<f64>) -> Result<LineString<f64>, ReprojectError> {
        ring.0
            .iter()
            .map(|c| self.transform_coord(*c))
            .collect::<Result<Vec<_>, _>>()
            .map(LineString::new)
    }

    /// Transforme un polygone : anneau extérieur puis trous, chacun indépendamment
    pub fn transform_polygon(&self, poly: &Polygon<f64>) -> Result<Polygon<f64>, ReprojectError> {
        let exterior = self.transform_ring(poly.exterior())?;
        let interiors = poly
            .interiors()
            .iter()
            .map(|ring| self.transform_ring(ring))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Polygon::new(exterior, interiors))
    }

    /// Transforme une géométrie source en MultiPolygon géodésique
    pub fn transform(&self, geom: &Polygonal) -> Result<MultiPolygon<f64>, ReprojectError> {
        match geom {
            Polygonal::Polygon(p) => Ok(MultiPolygon::new(vec![self.transform_polygon(p)?])),
            Polygonal::MultiPolygon(mp) => mp
                .0
                .iter()
                .map(|p| self.transform_polygon(p))
                .collect::<Result<Vec<_>, _>>()
                .map(MultiPolygon::new),
        }
    }
}

/// Arrondit les coordonnées à `decimals` décimales (7 ≈ 1 cm en degrés)
pub fn round_coords(mp: &MultiPolygon<f64>, decimals: u8) -> MultiPolygon<f64> {
    let factor = 10_f64.powi(i32::from(decimals));
    let round_ring = |ls: &LineString<f64>| -> LineString<f64> {
        ls.0.iter()
            .map(|c| Coord {
                x: (c.x * factor).round() / factor,
                y: (c.y * factor).round() / factor,
            })
            .collect()
    };

    mp.0.iter()
        .map(|p| Polygon::new(round_ring(p.exterior()), p.interiors().iter().map(round_ring).collect()))
        .collect()
}
