//! Projection Lambert 93 (EPSG:2154), sens inverse
//!
//! Lambert conique conforme à deux parallèles standards sur l'ellipsoïde GRS80.
//! Les constantes de projection sont calculées une seule fois à la construction.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

/// Demi-grand axe GRS80 (m)
const GRS80_A: f64 = 6_378_137.0;
/// Aplatissement GRS80
const GRS80_F: f64 = 1.0 / 298.257_222_101;

/// Paramètres Lambert 93 précalculés
#[derive(Debug, Clone, Copy)]
pub struct Lambert93 {
    /// Première excentricité
    e: f64,
    /// Exposant de la projection
    n: f64,
    /// Constante de la projection
    c: f64,
    /// Longitude origine (radians)
    lon0: f64,
    /// Coordonnées du pôle de la projection
    x_s: f64,
    y_s: f64,
}

impl Default for Lambert93 {
    fn default() -> Self {
        Self::new()
    }
}

impl Lambert93 {
    pub fn new() -> Self {
        let e2 = 2.0 * GRS80_F - GRS80_F * GRS80_F;
        let e = e2.sqrt();

        let lat0 = 46.5_f64.to_radians();
        let lat1 = 44.0_f64.to_radians();
        let lat2 = 49.0_f64.to_radians();

        let m1 = normal_radius(lat1, e2) * lat1.cos();
        let m2 = normal_radius(lat2, e2) * lat2.cos();
        let l1 = isometric_latitude(lat1, e);
        let l2 = isometric_latitude(lat2, e);

        let n = (m1.ln() - m2.ln()) / (l2 - l1);
        let c = (m1 / n) * (n * l1).exp();
        let r0 = c * (-n * isometric_latitude(lat0, e)).exp();

        Self {
            e,
            n,
            c,
            lon0: 3.0_f64.to_radians(),
            x_s: 700_000.0,
            y_s: 6_600_000.0 + r0,
        }
    }

    /// (x, y) en mètres → (longitude, latitude) en degrés
    ///
    /// Le résultat peut être non fini pour des coordonnées hors domaine ;
    /// la vérification est faite par l'appelant.
    pub fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let dx = x - self.x_s;
        let dy = self.y_s - y;

        let r = dx.hypot(dy);
        let gamma = dx.atan2(dy);

        let iso_lat = -(r / self.c).ln() / self.n;
        let lat = latitude_from_isometric(iso_lat, self.e);
        let lon = self.lon0 + gamma / self.n;

        (lon.to_degrees(), lat.to_degrees())
    }
}

/// Grande normale (rayon de courbure du premier vertical)
fn normal_radius(lat: f64, e2: f64) -> f64 {
    GRS80_A / (1.0 - e2 * lat.sin().powi(2)).sqrt()
}

fn isometric_latitude(lat: f64, e: f64) -> f64 {
    let e_sin = e * lat.sin();
    ((FRAC_PI_4 + lat / 2.0).tan() * ((1.0 - e_sin) / (1.0 + e_sin)).powf(e / 2.0)).ln()
}

/// Latitude depuis la latitude isométrique (itération de point fixe)
fn latitude_from_isometric(iso_lat: f64, e: f64) -> f64 {
    let exp_iso = iso_lat.exp();
    let mut lat = 2.0 * exp_iso.atan() - FRAC_PI_2;

    for _ in 0..12 {
        let e_sin = e * lat.sin();
        let next = 2.0 * (exp_iso * ((1.0 + e_sin) / (1.0 - e_sin)).powf(e / 2.0)).atan() - FRAC_PI_2;
        if (next - lat).abs() < 1e-12 {
            return next;
        }
        lat = next;
    }
    lat
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_origin() {
        let (lon, lat) = Lambert93::new().inverse(700_000.0, 6_600_000.0);
        assert!((lon - 3.0).abs() < 1e-9, "lon={lon}");
        assert!((lat - 46.5).abs() < 1e-9, "lat={lat}");
    }

    #[test]
    fn test_paris() {
        // Notre-Dame de Paris
        let (lon, lat) = Lambert93::new().inverse(652_470.0, 6_861_970.0);
        assert!((lon - 2.3499).abs() < 0.02, "lon={lon}");
        assert!((lat - 48.853).abs() < 0.02, "lat={lat}");
    }

    #[test]
    fn test_marseille() {
        let (lon, lat) = Lambert93::new().inverse(893_193.0, 6_245_829.0);
        assert!((lon - 5.37).abs() < 0.1, "lon={lon}");
        assert!((lat - 43.30).abs() < 0.1, "lat={lat}");
    }
}
