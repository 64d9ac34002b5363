//! Lecture incrémentale d'une FeatureCollection GeoJSON
//!
//! Les features sont désérialisées une par une : la collection complète n'est
//! jamais chargée en mémoire, ce qui permet de traiter les exports départementaux
//! de plusieurs gigaoctets.

use std::collections::HashMap;
use std::fmt;
use std::io::{BufReader, Read};
use std::ops::ControlFlow;

use geo::{Coord, LineString, MultiPolygon, Polygon};
use geojson::{Feature, JsonObject, JsonValue, PolygonType, Position, Value};
use serde::de::{self, DeserializeSeed, Deserializer as _, IgnoredAny, MapAccess, SeqAccess, Visitor};
use tracing::{debug, trace};

use crate::error::GeoSourceError;
use crate::types::{Polygonal, RawFeature, StreamStats};

/// Parcourt une FeatureCollection depuis n'importe quel flux
///
/// Les membres de premier niveau peuvent apparaître dans n'importe quel ordre
/// (`bbox`, `crs`, `name` avant `features`) : ils sont ignorés sans être chargés.
/// `source` sert uniquement au contexte des erreurs et des logs.
pub fn stream_features<R, F>(
    reader: R,
    source: &str,
    visit: &mut F,
) -> Result<StreamStats, GeoSourceError>
where
    R: Read,
    F: FnMut(RawFeature) -> ControlFlow<()>,
{
    let mut sink = FeatureSink {
        source,
        visit,
        stats: StreamStats::default(),
        next_index: 0,
    };

    let mut deserializer = serde_json::Deserializer::from_reader(BufReader::new(reader));
    let result = (&mut deserializer)
        .deserialize_map(CollectionVisitor(&mut sink))
        .and_then(|()| deserializer.end());

    match result {
        Ok(()) => {}
        // Interruption demandée par le visiteur : le reste du fichier n'est pas lu
        Err(_) if sink.stats.interrupted => {}
        // Une erreur de syntaxe invalide tout le fichier
        Err(e) => return Err(GeoSourceError::geojson(source, e)),
    }

    let stats = sink.stats;
    debug!(
        source,
        read = stats.read,
        emitted = stats.emitted,
        skipped = stats.skipped(),
        "GeoJSON streamed"
    );
    Ok(stats)
}

/// Destination des features au fil de la désérialisation
struct FeatureSink<'a, F> {
    source: &'a str,
    visit: &'a mut F,
    stats: StreamStats,
    next_index: usize,
}

impl<F> FeatureSink<'_, F>
where
    F: FnMut(RawFeature) -> ControlFlow<()>,
{
    fn accept(&mut self, feature: Feature) -> ControlFlow<()> {
        let index = self.next_index;
        self.next_index += 1;
        self.stats.read += 1;

        let Some(geometry) = feature.geometry else {
            self.stats.skipped_null += 1;
            return ControlFlow::Continue(());
        };

        let geometry = match polygonal_from_value(&geometry.value) {
            Ok(Some(g)) => g,
            Ok(None) => {
                self.stats.skipped_non_polygonal += 1;
                return ControlFlow::Continue(());
            }
            Err(reason) => {
                trace!(source = self.source, index, reason, "Skipping invalid geometry");
                self.stats.skipped_invalid += 1;
                return ControlFlow::Continue(());
            }
        };

        self.stats.emitted += 1;
        let raw = RawFeature {
            index,
            geometry,
            attributes: flatten_properties(feature.properties),
        };

        let flow = (self.visit)(raw);
        if flow.is_break() {
            self.stats.interrupted = true;
        }
        flow
    }
}

/// Objet de premier niveau : seul le membre `features` est parcouru
struct CollectionVisitor<'s, 'a, F>(&'s mut FeatureSink<'a, F>);

impl<'de, F> Visitor<'de> for CollectionVisitor<'_, '_, F>
where
    F: FnMut(RawFeature) -> ControlFlow<()>,
{
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a GeoJSON FeatureCollection object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<(), A::Error> {
        while let Some(key) = map.next_key::<String>()? {
            if key == "features" {
                map.next_value_seed(FeatureArray(&mut *self.0))?;
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(())
    }
}

/// Tableau `features`, désérialisé un élément à la fois
struct FeatureArray<'s, 'a, F>(&'s mut FeatureSink<'a, F>);

impl<'de, F> DeserializeSeed<'de> for FeatureArray<'_, '_, F>
where
    F: FnMut(RawFeature) -> ControlFlow<()>,
{
    type Value = ();

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de, F> Visitor<'de> for FeatureArray<'_, '_, F>
where
    F: FnMut(RawFeature) -> ControlFlow<()>,
{
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an array of GeoJSON features")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
        while let Some(feature) = seq.next_element::<Feature>()? {
            if self.0.accept(feature).is_break() {
                return Err(de::Error::custom("feature stream interrupted"));
            }
        }
        Ok(())
    }
}

/// Convertit une géométrie GeoJSON en géométrie polygonale
///
/// `Ok(None)` pour les types non polygonaux, `Err` pour un polygone inexploitable.
pub fn polygonal_from_value(value: &Value) -> Result<Option<Polygonal>, &'static str> {
    match value {
        Value::Polygon(rings) => polygon_from_rings(rings).map(|p| Some(Polygonal::Polygon(p))),
        Value::MultiPolygon(polygons) => {
            if polygons.is_empty() {
                return Err("empty multipolygon");
            }
            let parts = polygons
                .iter()
                .map(|rings| polygon_from_rings(rings))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(Polygonal::MultiPolygon(MultiPolygon::new(parts))))
        }
        _ => Ok(None),
    }
}

fn polygon_from_rings(rings: &PolygonType) -> Result<Polygon<f64>, &'static str> {
    let mut iter = rings.iter();
    let exterior = iter.next().ok_or("polygon without rings")?;
    let exterior = ring_from_positions(exterior)?;
    let interiors = iter.map(|r| ring_from_positions(r)).collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn ring_from_positions(positions: &[Position]) -> Result<LineString<f64>, &'static str> {
    if positions.is_empty() {
        return Err("empty ring");
    }
    positions
        .iter()
        .map(|pos| match pos.as_slice() {
            [x, y, ..] => Ok(Coord { x: *x, y: *y }),
            _ => Err("position with fewer than 2 ordinates"),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(LineString::new)
}

/// Aplatit les propriétés : nombres, chaînes et booléens sont convertis en texte,
/// les valeurs nulles ou imbriquées sont omises.
fn flatten_properties(properties: Option<JsonObject>) -> HashMap<String, String> {
    let Some(properties) = properties else {
        return HashMap::new();
    };

    properties
        .into_iter()
        .filter_map(|(key, value)| {
            let text = match value {
                JsonValue::String(s) => s,
                JsonValue::Number(n) => n.to_string(),
                JsonValue::Bool(b) => b.to_string(),
                JsonValue::Null | JsonValue::Array(_) | JsonValue::Object(_) => return None,
            };
            (!text.is_empty()).then_some((key, text))
        })
        .collect()
}
