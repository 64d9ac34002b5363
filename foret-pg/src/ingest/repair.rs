//! Post-traitements SQL exécutés après l'import
//!
//! Ordre : encodage, géométries invalides, codes département, libellés de zone,
//! surfaces. Chaque instruction est indépendante : un échec est journalisé et
//! les suivantes sont tout de même exécutées.

use geosource::MOJIBAKE_TABLE;
use serde::Serialize;
use tracing::{error, info};

use crate::catalog::CatalogMaintenance;

/// Instruction nommée de post-traitement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairStatement {
    pub name: &'static str,
    pub sql: String,
}

/// Résultat d'une instruction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairOutcome {
    pub name: String,
    pub rows: Option<u64>,
    pub error: Option<String>,
}

impl RepairOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Expression SQL appliquant la table de correspondance à une colonne
///
/// `replace(replace(col, 'Ã©', 'é'), 'Ã¨', 'è')...`
pub fn sql_repair_expression(column: &str) -> String {
    MOJIBAKE_TABLE
        .iter()
        .fold(column.to_string(), |expr, (broken, fixed)| {
            format!("replace({}, {}, {})", expr, sql_literal(broken), sql_literal(fixed))
        })
}

fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Condition de sélection des lignes potentiellement corrompues
fn mojibake_filter(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| format!("{c} ~ '[ÃÂâÅ]'"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn encoding_update(schema: &str, table: &str, columns: &[&str]) -> String {
    let assignments = columns
        .iter()
        .map(|c| format!("{c} = {}", sql_repair_expression(c)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {schema}.{table} SET {assignments} WHERE {}",
        mojibake_filter(columns)
    )
}

fn make_valid(schema: &str, table: &str) -> String {
    format!(
        "UPDATE {schema}.{table} \
         SET geom = ST_Multi(ST_CollectionExtract(ST_MakeValid(geom), 3)) \
         WHERE NOT ST_IsValid(geom)"
    )
}

/// Liste ordonnée des post-traitements pour un schéma
pub fn post_processing_statements(schema: &str) -> Vec<RepairStatement> {
    vec![
        RepairStatement {
            name: "forest_encoding",
            sql: encoding_update(schema, "forest_parcels", &["species_name", "vegetation_type"]),
        },
        RepairStatement {
            name: "cadastre_encoding",
            sql: encoding_update(schema, "cadastre_parcels", &["label"]),
        },
        RepairStatement {
            name: "forest_make_valid",
            sql: make_valid(schema, "forest_parcels"),
        },
        RepairStatement {
            name: "cadastre_make_valid",
            sql: make_valid(schema, "cadastre_parcels"),
        },
        RepairStatement {
            name: "cadastre_region_code",
            sql: format!(
                "UPDATE {schema}.cadastre_parcels \
                 SET region_code = CASE WHEN source_id LIKE '97%' \
                     THEN LEFT(source_id, 3) ELSE LEFT(source_id, 2) END \
                 WHERE region_code IS NULL AND length(source_id) >= 5"
            ),
        },
        RepairStatement {
            name: "forest_region_code",
            sql: format!(
                "UPDATE {schema}.forest_parcels f \
                 SET region_code = c.region_code \
                 FROM {schema}.cadastre_parcels c \
                 WHERE f.region_code IS NULL \
                   AND c.region_code IS NOT NULL \
                   AND ST_Intersects(c.geom, ST_PointOnSurface(f.geom))"
            ),
        },
        RepairStatement {
            name: "forest_zone_label",
            sql: format!(
                "UPDATE {schema}.forest_parcels \
                 SET zone_label = COALESCE(NULLIF(TRIM(species_name), ''), 'Unknown') \
                     || ' - ' || COALESCE(NULLIF(TRIM(vegetation_type), ''), 'Zone') \
                 WHERE zone_label IS NULL"
            ),
        },
        RepairStatement {
            name: "forest_area",
            sql: format!(
                "UPDATE {schema}.forest_parcels \
                 SET area_ha = ST_Area(geom::geography) / 10000.0 \
                 WHERE area_ha IS NULL OR area_ha = 0"
            ),
        },
    ]
}

/// Exécute les instructions dans l'ordre, sans s'arrêter au premier échec
pub async fn run_post_processing<C>(catalog: &C, statements: &[RepairStatement]) -> Vec<RepairOutcome>
where
    C: CatalogMaintenance + ?Sized,
{
    let mut outcomes = Vec::with_capacity(statements.len());

    for statement in statements {
        let outcome = match catalog.execute(&statement.sql).await {
            Ok(rows) => {
                info!(statement = statement.name, rows, "Post-processing done");
                RepairOutcome {
                    name: statement.name.to_string(),
                    rows: Some(rows),
                    error: None,
                }
            }
            Err(e) => {
                error!(statement = statement.name, "Post-processing failed: {e:#}");
                RepairOutcome {
                    name: statement.name.to_string(),
                    rows: None,
                    error: Some(format!("{e:#}")),
                }
            }
        };
        outcomes.push(outcome);
    }

    outcomes
}
