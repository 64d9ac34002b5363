//! Lecture d'un shapefile enregistrement par enregistrement

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::Path;

use geo::{Coord, LineString, MultiPolygon, Polygon};
use shapefile::dbase::{FieldValue, Record};
use shapefile::{PolygonRing, Shape};
use tracing::{debug, trace};

use crate::error::GeoSourceError;
use crate::types::{Polygonal, RawFeature, StreamStats};

/// Résultat de conversion d'une forme shapefile
enum ShapeOutcome {
    Polygonal(Polygonal),
    Null,
    NonPolygonal,
    Invalid(&'static str),
}

/// Parcourt un shapefile et transmet chaque feature polygonale au visiteur
pub(crate) fn stream<F>(path: &Path, visit: &mut F) -> Result<StreamStats, GeoSourceError>
where
    F: FnMut(RawFeature) -> ControlFlow<()>,
{
    let label = path.display().to_string();
    let mut reader =
        shapefile::Reader::from_path(path).map_err(|e| GeoSourceError::shapefile(&label, e))?;
    let mut stats = StreamStats::default();

    for (index, item) in reader.iter_shapes_and_records().enumerate() {
        let (shape, record) = item.map_err(|e| GeoSourceError::shapefile(&label, e))?;
        stats.read += 1;

        let geometry = match convert_shape(shape) {
            ShapeOutcome::Polygonal(g) => g,
            ShapeOutcome::Null => {
                stats.skipped_null += 1;
                continue;
            }
            ShapeOutcome::NonPolygonal => {
                stats.skipped_non_polygonal += 1;
                continue;
            }
            ShapeOutcome::Invalid(reason) => {
                trace!(file = %label, index, reason, "Skipping invalid shape");
                stats.skipped_invalid += 1;
                continue;
            }
        };

        let feature = RawFeature {
            index,
            geometry,
            attributes: record_attributes(record),
        };
        stats.emitted += 1;

        if visit(feature).is_break() {
            stats.interrupted = true;
            break;
        }
    }

    debug!(
        file = %label,
        read = stats.read,
        emitted = stats.emitted,
        skipped = stats.skipped(),
        "Shapefile streamed"
    );
    Ok(stats)
}

fn convert_shape(shape: Shape) -> ShapeOutcome {
    match shape {
        Shape::Polygon(p) => rings_to_polygonal(p.rings(), |pt| Coord { x: pt.x, y: pt.y }),
        Shape::PolygonM(p) => rings_to_polygonal(p.rings(), |pt| Coord { x: pt.x, y: pt.y }),
        Shape::PolygonZ(p) => rings_to_polygonal(p.rings(), |pt| Coord { x: pt.x, y: pt.y }),
        Shape::NullShape => ShapeOutcome::Null,
        _ => ShapeOutcome::NonPolygonal,
    }
}

/// Regroupe les anneaux shapefile en polygones
///
/// Un anneau extérieur ouvre un polygone, les anneaux intérieurs suivants en sont les
/// trous. L'ordre des anneaux est conservé.
fn rings_to_polygonal<P>(rings: &[PolygonRing<P>], to_coord: impl Fn(&P) -> Coord) -> ShapeOutcome {
    let mut polygons: Vec<Polygon<f64>> = Vec::new();
    let mut orphans: Vec<LineString<f64>> = Vec::new();

    for ring in rings {
        let points = ring.points();
        if points.is_empty() {
            return ShapeOutcome::Invalid("empty ring");
        }
        let line = LineString::new(points.iter().map(&to_coord).collect());

        match ring {
            PolygonRing::Outer(_) => polygons.push(Polygon::new(line, vec![])),
            PolygonRing::Inner(_) => match polygons.last_mut() {
                Some(poly) => poly.interiors_push(line),
                None => orphans.push(line),
            },
        }
    }

    // Trous écrits avant leur anneau extérieur : rattachés au premier polygone
    if !orphans.is_empty() {
        match polygons.first_mut() {
            Some(first) => {
                for hole in orphans {
                    first.interiors_push(hole);
                }
            }
            None => return ShapeOutcome::Invalid("no outer ring"),
        }
    }

    match polygons.len() {
        0 => ShapeOutcome::Invalid("no ring"),
        1 => ShapeOutcome::Polygonal(Polygonal::Polygon(polygons.remove(0))),
        _ => ShapeOutcome::Polygonal(Polygonal::MultiPolygon(MultiPolygon::new(polygons))),
    }
}

/// Aplatit un enregistrement dBase en attributs texte
fn record_attributes(record: Record) -> HashMap<String, String> {
    let fields: HashMap<String, FieldValue> = record.into();
    fields
        .into_iter()
        .filter_map(|(name, value)| field_to_text(value).map(|text| (name, text)))
        .collect()
}

fn field_to_text(value: FieldValue) -> Option<String> {
    let text = match value {
        FieldValue::Character(Some(s)) => s.trim_end().to_string(),
        FieldValue::Memo(s) => s,
        FieldValue::Numeric(Some(n)) => n.to_string(),
        FieldValue::Float(Some(f)) => f.to_string(),
        FieldValue::Double(d) => d.to_string(),
        FieldValue::Integer(i) => i.to_string(),
        FieldValue::Currency(c) => c.to_string(),
        FieldValue::Logical(Some(b)) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shapefile::Point;

    fn square(x0: f64, y0: f64, size: f64) -> Vec<Point> {
        vec![
            Point::new(x0, y0),
            Point::new(x0, y0 + size),
            Point::new(x0 + size, y0 + size),
            Point::new(x0 + size, y0),
            Point::new(x0, y0),
        ]
    }

    #[test]
    fn test_outer_with_holes_keeps_ring_order() {
        let rings = vec![
            PolygonRing::Outer(square(0.0, 0.0, 100.0)),
            PolygonRing::Inner(square(10.0, 10.0, 5.0)),
            PolygonRing::Inner(square(50.0, 50.0, 5.0)),
        ];
        let ShapeOutcome::Polygonal(Polygonal::Polygon(poly)) =
            rings_to_polygonal(&rings, |pt| Coord { x: pt.x, y: pt.y })
        else {
            panic!("expected a single polygon");
        };

        assert_eq!(poly.interiors().len(), 2);
        assert_eq!(poly.interiors()[0].0[0], Coord { x: 10.0, y: 10.0 });
        assert_eq!(poly.interiors()[1].0[0], Coord { x: 50.0, y: 50.0 });
    }

    #[test]
    fn test_two_outers_become_multipolygon() {
        let rings = vec![
            PolygonRing::Outer(square(0.0, 0.0, 10.0)),
            PolygonRing::Outer(square(20.0, 0.0, 10.0)),
            PolygonRing::Inner(square(22.0, 2.0, 2.0)),
        ];
        let ShapeOutcome::Polygonal(Polygonal::MultiPolygon(mp)) =
            rings_to_polygonal(&rings, |pt| Coord { x: pt.x, y: pt.y })
        else {
            panic!("expected a multipolygon");
        };

        assert_eq!(mp.0.len(), 2);
        assert!(mp.0[0].interiors().is_empty());
        assert_eq!(mp.0[1].interiors().len(), 1);
    }

    #[test]
    fn test_only_holes_is_invalid() {
        let rings = vec![PolygonRing::Inner(square(0.0, 0.0, 1.0))];
        assert!(matches!(
            rings_to_polygonal(&rings, |pt| Coord { x: pt.x, y: pt.y }),
            ShapeOutcome::Invalid(_)
        ));
    }

    #[test]
    fn test_field_to_text() {
        assert_eq!(
            field_to_text(FieldValue::Character(Some("Chêne   ".into()))),
            Some("Chêne".into())
        );
        assert_eq!(field_to_text(FieldValue::Numeric(Some(12.5))), Some("12.5".into()));
        assert_eq!(field_to_text(FieldValue::Character(None)), None);
        assert_eq!(field_to_text(FieldValue::Character(Some("  ".into()))), None);
    }
}
