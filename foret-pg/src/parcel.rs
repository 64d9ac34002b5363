//! Modèle des parcelles persistées dans le catalogue

use std::fmt;
use std::str::FromStr;

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};

/// Type de jeu de données importé
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    /// BD Forêt : formations végétales (shapefile Lambert 93)
    Forest,
    /// Parcelles cadastrales Etalab (GeoJSON par département)
    Cadastre,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 2] = [DatasetKind::Forest, DatasetKind::Cadastre];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forest => "forest",
            Self::Cadastre => "cadastre",
        }
    }

    /// Table cible dans le catalogue
    pub fn table_name(self) -> &'static str {
        match self {
            Self::Forest => "forest_parcels",
            Self::Cadastre => "cadastre_parcels",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "forest" | "foret" => Ok(Self::Forest),
            "cadastre" => Ok(Self::Cadastre),
            _ => Err(format!("Invalid dataset kind: {s}. Use: forest, cadastre")),
        }
    }
}

/// Parcelle forestière (formation végétale)
#[derive(Debug, Clone, PartialEq)]
pub struct ForestParcel {
    pub source_id: Option<String>,
    pub species_code: Option<String>,
    pub species_name: Option<String>,
    pub vegetation_type: Option<String>,
    /// Surface en hectares, jamais négative
    pub area_ha: Option<f64>,
    pub region_code: Option<String>,
    /// Libellé de zone, synthétisé en post-traitement s'il est absent
    pub zone_label: Option<String>,
    /// Géométrie en EPSG:4326
    pub geometry: MultiPolygon<f64>,
}

/// Parcelle cadastrale
#[derive(Debug, Clone, PartialEq)]
pub struct CadastreParcel {
    pub source_id: Option<String>,
    /// Libellé affiché ("75056000AB0012", "Section AB n°12", "??")
    pub label: String,
    pub region_code: Option<String>,
    /// Géométrie en EPSG:4326
    pub geometry: MultiPolygon<f64>,
}

/// Enregistrement normalisé prêt pour le catalogue
#[derive(Debug, Clone, PartialEq)]
pub enum VectorParcel {
    Forest(ForestParcel),
    Cadastre(CadastreParcel),
}

impl VectorParcel {
    pub fn kind(&self) -> DatasetKind {
        match self {
            Self::Forest(_) => DatasetKind::Forest,
            Self::Cadastre(_) => DatasetKind::Cadastre,
        }
    }

    pub fn geometry(&self) -> &MultiPolygon<f64> {
        match self {
            Self::Forest(p) => &p.geometry,
            Self::Cadastre(p) => &p.geometry,
        }
    }

    pub fn source_id(&self) -> Option<&str> {
        match self {
            Self::Forest(p) => p.source_id.as_deref(),
            Self::Cadastre(p) => p.source_id.as_deref(),
        }
    }

    pub fn region_code(&self) -> Option<&str> {
        match self {
            Self::Forest(p) => p.region_code.as_deref(),
            Self::Cadastre(p) => p.region_code.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_kind_parse() {
        assert_eq!("forest".parse::<DatasetKind>(), Ok(DatasetKind::Forest));
        assert_eq!("CADASTRE".parse::<DatasetKind>(), Ok(DatasetKind::Cadastre));
        assert!("roads".parse::<DatasetKind>().is_err());
        assert_eq!(DatasetKind::Forest.table_name(), "forest_parcels");
    }
}
