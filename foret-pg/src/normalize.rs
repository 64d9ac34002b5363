//! Normalisation des attributs sources
//!
//! Répare les libellés doublement encodés et dérive les champs canoniques
//! (code département, libellé cadastral, surface). La géométrie n'est jamais modifiée ici.

use std::path::Path;

use geo::MultiPolygon;
use geosource::{repair_text, RawFeature};
use regex::Regex;

use crate::config::FieldCandidates;
use crate::parcel::{CadastreParcel, DatasetKind, ForestParcel, VectorParcel};

/// Libellé d'une parcelle cadastrale sans identifiant exploitable
pub const UNKNOWN_LABEL: &str = "??";

/// Transforme les attributs bruts d'un fichier en enregistrement canonique
#[derive(Debug, Clone)]
pub struct Normalizer {
    kind: DatasetKind,
    fields: FieldCandidates,
    region_hint: Option<String>,
}

impl Normalizer {
    /// `region_hint` : code département extrait du chemin du fichier, prioritaire
    pub fn new(kind: DatasetKind, fields: FieldCandidates, region_hint: Option<String>) -> Self {
        Self {
            kind,
            fields,
            region_hint,
        }
    }

    pub fn kind(&self) -> DatasetKind {
        self.kind
    }

    /// Construit l'enregistrement à partir des attributs et de la géométrie reprojetée
    pub fn normalize(&self, feature: &RawFeature, geometry: MultiPolygon<f64>) -> VectorParcel {
        let source_id = feature
            .first_attribute(&self.fields.source_id)
            .map(str::to_string);
        let region_code = derive_region_code(
            self.region_hint.as_deref(),
            feature.first_attribute(&self.fields.region_code),
            source_id.as_deref(),
        );

        match self.kind {
            DatasetKind::Forest => VectorParcel::Forest(ForestParcel {
                species_code: feature
                    .first_attribute(&self.fields.species_code)
                    .map(str::to_string),
                species_name: repaired(feature, &self.fields.species_name),
                vegetation_type: repaired(feature, &self.fields.vegetation_type),
                area_ha: feature
                    .first_attribute(&self.fields.area_ha)
                    .and_then(parse_area),
                source_id,
                region_code,
                zone_label: None,
                geometry,
            }),
            DatasetKind::Cadastre => VectorParcel::Cadastre(CadastreParcel {
                label: self.cadastre_label(feature),
                source_id,
                region_code,
                geometry,
            }),
        }
    }

    /// Libellé cadastral : identifiant, puis "Section X n°Y", puis "??"
    fn cadastre_label(&self, feature: &RawFeature) -> String {
        if let Some(label) = repaired(feature, &self.fields.label) {
            return label;
        }

        match (
            feature.first_attribute(&self.fields.section),
            feature.first_attribute(&self.fields.numero),
        ) {
            (Some(section), Some(numero)) => format!("Section {} n°{}", section, numero),
            _ => UNKNOWN_LABEL.to_string(),
        }
    }
}

fn repaired(feature: &RawFeature, names: &[String]) -> Option<String> {
    feature
        .first_attribute(names)
        .map(|v| repair_text(v).into_owned())
}

/// Code département : indice du chemin, puis attribut explicite, puis préfixe de l'identifiant
pub fn derive_region_code(
    path_hint: Option<&str>,
    explicit: Option<&str>,
    source_id: Option<&str>,
) -> Option<String> {
    path_hint
        .and_then(normalize_region_code)
        .or_else(|| explicit.and_then(normalize_region_code))
        .or_else(|| source_id.and_then(region_from_identifier))
}

/// Préfixe département d'un identifiant cadastral (IDU) : 3 caractères outre-mer, 2 sinon
fn region_from_identifier(id: &str) -> Option<String> {
    let width = if id.starts_with("97") { 3 } else { 2 };
    id.get(..width).and_then(normalize_region_code)
}

/// "075" → "75", "02A" → "2A", "971" → "971"
pub fn normalize_region_code(code: &str) -> Option<String> {
    let code = code.trim().to_ascii_uppercase();
    let code = match code.len() {
        3 if code.starts_with('0') => code[1..].to_string(),
        1 if code.as_bytes()[0].is_ascii_digit() => format!("0{}", code),
        _ => code,
    };

    let valid = matches!(code.len(), 2 | 3)
        && (code.chars().all(|c| c.is_ascii_digit()) || code == "2A" || code == "2B");
    valid.then_some(code)
}

/// Extrait un code département du chemin d'un fichier découvert
///
/// - BD Forêt : composant de chemin contenant `_D075`, `_D02A`, `_D971`...
/// - Cadastre : nom de fichier `cadastre-75-parcelles.json(.gz)`
pub fn region_hint_from_path(kind: DatasetKind, path: &Path) -> Option<String> {
    match kind {
        DatasetKind::Forest => {
            let re = Regex::new(r"(?:^|_)D(0\d{2}|0?2[AB]|97\d)(?:_|$)").ok()?;
            path.components().rev().find_map(|component| {
                let name = component.as_os_str().to_str()?;
                let caps = re.captures(name)?;
                normalize_region_code(caps.get(1)?.as_str())
            })
        }
        DatasetKind::Cadastre => {
            let re = Regex::new(r"^cadastre-([0-9AB]{2,3})-parcelles").ok()?;
            let name = path.file_name()?.to_str()?;
            let caps = re.captures(name)?;
            normalize_region_code(caps.get(1)?.as_str())
        }
    }
}

/// Surface en hectares : virgule décimale acceptée, valeurs négatives ou non finies rejetées
pub fn parse_area(value: &str) -> Option<f64> {
    let value = value.trim().replace(',', ".");
    let area: f64 = fast_float::parse(&value).ok()?;
    (area.is_finite() && area >= 0.0).then_some(area)
}
