//! Backend PROJ pour les paires EPSG sans implémentation native
//!
//! Disponible uniquement avec la feature `reproject` (nécessite libproj).

use proj::Proj;

use super::ReprojectError;

pub(super) struct ProjBackend {
    proj: Proj,
}

impl ProjBackend {
    pub(super) fn new(from: u32, to: u32) -> Result<Self, ReprojectError> {
        let proj = Proj::new_known_crs(&format!("EPSG:{from}"), &format!("EPSG:{to}"), None)
            .map_err(|e| ReprojectError::Backend(format!("EPSG:{from} -> EPSG:{to}: {e}")))?;
        Ok(Self { proj })
    }

    /// Retourne (longitude, latitude) : `new_known_crs` normalise l'ordre des axes
    pub(super) fn convert(&self, x: f64, y: f64) -> Result<(f64, f64), ReprojectError> {
        self.proj
            .convert((x, y))
            .map_err(|e| ReprojectError::Backend(e.to_string()))
    }
}
