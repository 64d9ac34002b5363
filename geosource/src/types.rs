//! Types de données pour le crate geosource

use std::collections::HashMap;
use std::path::Path;

use geo::{MultiPolygon, Polygon};

/// Géométrie polygonale d'une feature source
///
/// Les coordonnées sont celles de la projection du fichier source.
#[derive(Debug, Clone, PartialEq)]
pub enum Polygonal {
    Polygon(Polygon<f64>),
    MultiPolygon(MultiPolygon<f64>),
}

impl Polygonal {
    /// Nombre total d'anneaux (extérieurs + trous)
    pub fn ring_count(&self) -> usize {
        match self {
            Self::Polygon(p) => 1 + p.interiors().len(),
            Self::MultiPolygon(mp) => mp.0.iter().map(|p| 1 + p.interiors().len()).sum(),
        }
    }

    /// Nombre total de sommets
    pub fn coord_count(&self) -> usize {
        fn polygon_coords(p: &Polygon<f64>) -> usize {
            p.exterior().0.len() + p.interiors().iter().map(|r| r.0.len()).sum::<usize>()
        }
        match self {
            Self::Polygon(p) => polygon_coords(p),
            Self::MultiPolygon(mp) => mp.0.iter().map(polygon_coords).sum(),
        }
    }

    /// Convertit en MultiPolygon (un Polygon devient un MultiPolygon à un élément)
    pub fn into_multi(self) -> MultiPolygon<f64> {
        match self {
            Self::Polygon(p) => MultiPolygon::new(vec![p]),
            Self::MultiPolygon(mp) => mp,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Polygon(_) => "Polygon",
            Self::MultiPolygon(_) => "MultiPolygon",
        }
    }
}

/// Une feature brute lue depuis un fichier source
///
/// Produite par le lecteur, consommée immédiatement par l'étape de transformation.
#[derive(Debug, Clone)]
pub struct RawFeature {
    /// Position de la feature dans le fichier (0-based, features ignorées comprises)
    pub index: usize,

    /// Géométrie dans la projection source
    pub geometry: Polygonal,

    /// Attributs aplatis (les valeurs nulles, vides ou imbriquées sont omises)
    pub attributes: HashMap<String, String>,
}

impl RawFeature {
    /// Valeur d'un attribut, sans espaces de bordure, si non vide
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Première valeur non vide parmi une liste de noms d'attributs candidats
    pub fn first_attribute<S: AsRef<str>>(&self, names: &[S]) -> Option<&str> {
        names.iter().find_map(|n| self.attribute(n.as_ref()))
    }
}

/// Format de fichier source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// Shapefile (.shp + .dbf), lu enregistrement par enregistrement
    Shapefile,
    /// FeatureCollection GeoJSON (.json / .geojson)
    GeoJson,
    /// FeatureCollection GeoJSON compressée gzip (.json.gz / .geojson.gz)
    GeoJsonGz,
}

impl SourceFormat {
    /// Détecte le format depuis l'extension du fichier
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();

        if name.ends_with(".shp") {
            Some(Self::Shapefile)
        } else if name.ends_with(".json.gz") || name.ends_with(".geojson.gz") {
            Some(Self::GeoJsonGz)
        } else if name.ends_with(".json") || name.ends_with(".geojson") {
            Some(Self::GeoJson)
        } else {
            None
        }
    }
}

/// Statistiques de lecture d'un fichier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Features lues dans le fichier
    pub read: usize,
    /// Features transmises au consommateur
    pub emitted: usize,
    /// Features sans géométrie
    pub skipped_null: usize,
    /// Features de type non polygonal (Point, LineString, ...)
    pub skipped_non_polygonal: usize,
    /// Features polygonales inexploitables (anneau vide, position incomplète)
    pub skipped_invalid: usize,
    /// Le consommateur a interrompu la lecture avant la fin du fichier
    pub interrupted: bool,
}

impl StreamStats {
    pub fn skipped(&self) -> usize {
        self.skipped_null + self.skipped_non_polygonal + self.skipped_invalid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, LineString};

    #[test]
    fn test_detect_format() {
        assert_eq!(
            SourceFormat::detect(Path::new("a/FORMATION_VEGETALE.shp")),
            Some(SourceFormat::Shapefile)
        );
        assert_eq!(
            SourceFormat::detect(Path::new("cadastre-75-parcelles.json")),
            Some(SourceFormat::GeoJson)
        );
        assert_eq!(
            SourceFormat::detect(Path::new("cadastre-75-parcelles.JSON.GZ")),
            Some(SourceFormat::GeoJsonGz)
        );
        assert_eq!(SourceFormat::detect(Path::new("notes.txt")), None);
    }

    #[test]
    fn test_ring_count_and_into_multi() {
        let mut poly = polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 0.0)];
        poly.interiors_push(LineString::from(vec![(1.0, 1.0), (2.0, 1.0), (2.0, 2.0), (1.0, 1.0)]));
        let geom = Polygonal::Polygon(poly);

        assert_eq!(geom.ring_count(), 2);
        assert_eq!(geom.coord_count(), 8);
        assert_eq!(geom.type_name(), "Polygon");

        let multi = geom.into_multi();
        assert_eq!(multi.0.len(), 1);
    }

    #[test]
    fn test_first_attribute_skips_blank_values() {
        let feature = RawFeature {
            index: 0,
            geometry: Polygonal::MultiPolygon(MultiPolygon::new(vec![])),
            attributes: [
                ("idu".to_string(), "   ".to_string()),
                ("id".to_string(), " 75056000AB0012 ".to_string()),
            ]
            .into_iter()
            .collect(),
        };

        assert_eq!(feature.first_attribute(&["idu", "id"]), Some("75056000AB0012"));
        assert_eq!(feature.attribute("idu"), None);
    }
}
