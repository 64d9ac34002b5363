//! Catalogue PostgreSQL/PostGIS

use std::fmt::Write as _;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::BytesMut;
use deadpool_postgres::Pool;
use futures::SinkExt;
use geo::Geometry;
use geozero::wkt::WktWriter;
use geozero::GeozeroGeometry;
use tracing::{debug, info, warn};

use super::pool::{create_pool, test_connection, DatabaseConfig};
use super::{
    BoundingBox, CatalogMaintenance, CatalogWriter, SpatialCatalog, SpeciesArea, ViewportRow,
    ZoneLocation,
};
use crate::parcel::{DatasetKind, VectorParcel};
use crate::reproject::TARGET_EPSG;

/// Table de registre des fichiers importés
pub const LEDGER_TABLE: &str = "_ingested_files";

/// Catalogue PostGIS : pool de connexions + schéma cible
///
/// Cycle de vie explicite : `connect` à l'ouverture, `close` en fin de traitement.
pub struct PgCatalog {
    pool: Pool,
    schema: String,
}

impl PgCatalog {
    /// Ouvre le pool et vérifie la connexion
    pub async fn connect(config: &DatabaseConfig, schema: &str) -> Result<Self> {
        validate_identifier(schema)?;
        let pool = create_pool(config)?;
        test_connection(&pool).await?;
        info!(host = %config.host, dbname = %config.dbname, schema, "Connected to catalog");
        Ok(Self {
            pool,
            schema: schema.to_string(),
        })
    }

    /// Catalogue sur un pool existant
    pub fn from_pool(pool: Pool, schema: &str) -> Result<Self> {
        validate_identifier(schema)?;
        Ok(Self {
            pool,
            schema: schema.to_string(),
        })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Ferme le pool (les connexions en cours sont rendues puis fermées)
    pub fn close(&self) {
        self.pool.close();
    }

    fn table(&self, kind: DatasetKind) -> String {
        format!("{}.{}", self.schema, kind.table_name())
    }

    /// Crée le schéma, l'extension PostGIS, les tables et le registre
    pub async fn prepare(&self) -> Result<()> {
        let client = self.pool.get().await?;

        client
            .execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema), &[])
            .await
            .context("Failed to create schema")?;

        // L'extension peut exister sans que l'utilisateur ait le droit de la créer
        if let Err(e) = client.execute("CREATE EXTENSION IF NOT EXISTS postgis", &[]).await {
            warn!("CREATE EXTENSION postgis failed (will check if already installed): {e}");
            let installed = client
                .query_opt("SELECT 1 FROM pg_extension WHERE extname = 'postgis'", &[])
                .await
                .context("Failed to check pg_extension")?
                .is_some();
            if !installed {
                anyhow::bail!("PostGIS extension is not installed and could not be created: {e}");
            }
        }

        client
            .batch_execute(&schema_ddl(&self.schema))
            .await
            .context("Failed to create catalog tables")?;

        debug!(schema = %self.schema, "Catalog tables ready");
        Ok(())
    }

    /// Vide les tables de parcelles et le registre
    pub async fn reset(&self) -> Result<()> {
        let client = self.pool.get().await?;
        let sql = format!(
            "TRUNCATE TABLE {}, {}, {}.{} RESTART IDENTITY",
            self.table(DatasetKind::Forest),
            self.table(DatasetKind::Cadastre),
            self.schema,
            LEDGER_TABLE
        );
        client.execute(&sql, &[]).await.context("Failed to reset catalog")?;
        warn!(schema = %self.schema, "Catalog reset: parcel tables truncated");
        Ok(())
    }

    /// Index spatiaux (GiST) et attributaires (B-tree)
    pub async fn create_indexes(&self) -> Result<()> {
        let client = self.pool.get().await?;
        let statements = [
            ("forest_parcels", "geom", "USING GIST (geom)"),
            ("forest_parcels", "region_zone", "(region_code, zone_label)"),
            ("forest_parcels", "species", "(species_name)"),
            ("cadastre_parcels", "geom", "USING GIST (geom)"),
            ("cadastre_parcels", "region", "(region_code)"),
        ];

        for (table, suffix, definition) in statements {
            let sql = format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_{suffix} ON {schema}.{table} {definition}",
                schema = self.schema
            );
            client
                .execute(&sql, &[])
                .await
                .with_context(|| format!("Failed to create index {suffix} on {}.{table}", self.schema))?;
        }

        client
            .batch_execute(&format!(
                "ANALYZE {}; ANALYZE {};",
                self.table(DatasetKind::Forest),
                self.table(DatasetKind::Cadastre)
            ))
            .await
            .context("Failed to analyze tables")?;

        info!(schema = %self.schema, "Indexes created");
        Ok(())
    }
}

/// Vérifie qu'un nom de schéma est un identifiant SQL simple
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid {
        anyhow::bail!("Invalid schema name: {name:?} (expected [a-z_][a-z0-9_]*)");
    }
    Ok(())
}

/// DDL des tables du catalogue
pub fn schema_ddl(schema: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {schema}.forest_parcels (
            id BIGSERIAL PRIMARY KEY,
            source_id TEXT,
            species_code TEXT,
            species_name TEXT,
            vegetation_type TEXT,
            area_ha DOUBLE PRECISION CHECK (area_ha IS NULL OR area_ha >= 0),
            region_code VARCHAR(3),
            zone_label TEXT,
            geom geometry(MultiPolygon, {srid}) NOT NULL
        );

        CREATE TABLE IF NOT EXISTS {schema}.cadastre_parcels (
            id BIGSERIAL PRIMARY KEY,
            source_id TEXT,
            label TEXT,
            region_code VARCHAR(3),
            geom geometry(MultiPolygon, {srid}) NOT NULL
        );

        CREATE TABLE IF NOT EXISTS {schema}.{ledger} (
            path TEXT NOT NULL,
            checksum TEXT NOT NULL,
            records BIGINT NOT NULL,
            ingested_at TIMESTAMPTZ DEFAULT NOW()
        );
        "#,
        schema = schema,
        srid = TARGET_EPSG,
        ledger = LEDGER_TABLE,
    )
}

/// Instruction COPY (CSV, séparateur `|`) d'un type de parcelle
fn copy_sql(schema: &str, kind: DatasetKind) -> String {
    let columns = match kind {
        DatasetKind::Forest => {
            "source_id, species_code, species_name, vegetation_type, area_ha, region_code, zone_label, geom"
        }
        DatasetKind::Cadastre => "source_id, label, region_code, geom",
    };
    format!(
        "COPY {}.{} ({}) FROM STDIN WITH (FORMAT csv, DELIMITER '|', QUOTE '\"', ESCAPE '\"', NULL '')",
        schema,
        kind.table_name(),
        columns
    )
}

/// Champ texte CSV : toujours entre guillemets, sauts de ligne remplacés
fn push_text(buf: &mut BytesMut, value: &str) {
    buf.extend_from_slice(b"\"");
    for b in value.as_bytes() {
        match *b {
            b'"' => buf.extend_from_slice(b"\"\""),
            b'\n' | b'\r' => buf.extend_from_slice(b" "),
            other => buf.extend_from_slice(&[other]),
        }
    }
    buf.extend_from_slice(b"\"");
}

/// Champ optionnel : vide (NULL) si absent
fn push_opt_text(buf: &mut BytesMut, value: Option<&str>) {
    if let Some(v) = value {
        push_text(buf, v);
    }
}

/// Géométrie en EWKT (`SRID=4326;MULTIPOLYGON(...)`)
fn push_geometry(buf: &mut BytesMut, parcel: &VectorParcel, wkt_buf: &mut Vec<u8>) -> Result<()> {
    wkt_buf.clear();
    {
        let mut writer = WktWriter::new(&mut *wkt_buf);
        Geometry::MultiPolygon(parcel.geometry().clone())
            .process_geom(&mut writer)
            .context("Failed to encode geometry to WKT")?;
    }
    buf.extend_from_slice(b"\"SRID=");
    write!(buf, "{}", TARGET_EPSG)?;
    buf.extend_from_slice(b";");
    buf.extend_from_slice(wkt_buf);
    buf.extend_from_slice(b"\"");
    Ok(())
}

/// Ajoute une ligne CSV pour COPY
pub(crate) fn write_copy_row(buf: &mut BytesMut, parcel: &VectorParcel, wkt_buf: &mut Vec<u8>) -> Result<()> {
    match parcel {
        VectorParcel::Forest(p) => {
            push_opt_text(buf, p.source_id.as_deref());
            buf.extend_from_slice(b"|");
            push_opt_text(buf, p.species_code.as_deref());
            buf.extend_from_slice(b"|");
            push_opt_text(buf, p.species_name.as_deref());
            buf.extend_from_slice(b"|");
            push_opt_text(buf, p.vegetation_type.as_deref());
            buf.extend_from_slice(b"|");
            if let Some(area) = p.area_ha {
                write!(buf, "{}", area)?;
            }
            buf.extend_from_slice(b"|");
            push_opt_text(buf, p.region_code.as_deref());
            buf.extend_from_slice(b"|");
            push_opt_text(buf, p.zone_label.as_deref());
            buf.extend_from_slice(b"|");
        }
        VectorParcel::Cadastre(p) => {
            push_opt_text(buf, p.source_id.as_deref());
            buf.extend_from_slice(b"|");
            push_text(buf, &p.label);
            buf.extend_from_slice(b"|");
            push_opt_text(buf, p.region_code.as_deref());
            buf.extend_from_slice(b"|");
        }
    }
    push_geometry(buf, parcel, wkt_buf)?;
    buf.extend_from_slice(b"\n");
    Ok(())
}

#[async_trait]
impl CatalogWriter for PgCatalog {
    async fn write_batch(&self, batch: &[VectorParcel]) -> Result<u64> {
        let mut client = self
            .pool
            .get()
            .await
            .context("Failed to get connection from pool")?;
        let tx = client.transaction().await?;
        let mut written = 0u64;
        let mut wkt_buf = Vec::with_capacity(4096);

        for kind in DatasetKind::ALL {
            let mut buf = BytesMut::with_capacity(batch.len() * 512);
            let mut rows = 0usize;
            for parcel in batch.iter().filter(|p| p.kind() == kind) {
                write_copy_row(&mut buf, parcel, &mut wkt_buf)?;
                rows += 1;
            }
            if rows == 0 {
                continue;
            }

            let sink = tx.copy_in(&copy_sql(&self.schema, kind)).await?;
            let mut pinned = std::pin::pin!(sink);
            pinned
                .as_mut()
                .send(buf.freeze())
                .await
                .context("Failed to send COPY data")?;
            written += pinned.as_mut().finish().await.context("COPY failed")?;
        }

        tx.commit().await.context("Failed to commit batch")?;
        Ok(written)
    }
}

#[async_trait]
impl CatalogMaintenance for PgCatalog {
    async fn execute(&self, sql: &str) -> Result<u64> {
        let client = self.pool.get().await?;
        Ok(client.execute(sql, &[]).await?)
    }

    async fn is_file_ingested(&self, checksum: &str) -> Result<bool> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT 1 FROM {}.{} WHERE checksum = $1 LIMIT 1", self.schema, LEDGER_TABLE),
                &[&checksum],
            )
            .await?;
        Ok(row.is_some())
    }

    async fn record_ingested_file(&self, path: &str, checksum: &str, records: u64) -> Result<()> {
        let client = self.pool.get().await?;
        let records = i64::try_from(records).unwrap_or(i64::MAX);
        client
            .execute(
                &format!(
                    "INSERT INTO {}.{} (path, checksum, records) VALUES ($1, $2, $3)",
                    self.schema, LEDGER_TABLE
                ),
                &[&path, &checksum, &records],
            )
            .await
            .context("Failed to record ingested file")?;
        Ok(())
    }
}

/// Géométrie utilisateur (GeoJSON, EPSG:4326) en paramètre $1
const INPUT_GEOM: &str = "ST_SetSRID(ST_GeomFromGeoJSON($1), 4326)";

#[async_trait]
impl SpatialCatalog for PgCatalog {
    async fn species_areas(&self, geometry: &str) -> Result<Vec<SpeciesArea>> {
        let client = self.pool.get().await?;
        let sql = format!(
            r#"
            WITH input AS (SELECT {INPUT_GEOM} AS g)
            SELECT f.species_name AS name,
                   SUM(ST_Area(ST_Intersection(f.geom, input.g)::geography)) / 10000 AS area_ha
            FROM {table} f, input
            WHERE ST_Intersects(f.geom, input.g)
            GROUP BY f.species_name
            ORDER BY area_ha DESC
            "#,
            table = self.table(DatasetKind::Forest)
        );

        let rows = client.query(&sql, &[&geometry]).await?;
        Ok(rows
            .iter()
            .map(|row| SpeciesArea {
                name: row.get("name"),
                area_ha: row.get::<_, Option<f64>>("area_ha").unwrap_or(0.0),
            })
            .collect())
    }

    async fn parcel_labels(&self, geometry: &str, limit: i64) -> Result<Vec<Option<String>>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT DISTINCT c.label FROM {table} c WHERE ST_Intersects(c.geom, {INPUT_GEOM}) ORDER BY c.label LIMIT $2",
            table = self.table(DatasetKind::Cadastre)
        );
        let rows = client.query(&sql, &[&geometry, &limit]).await?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn zone_names(&self, geometry: &str, limit: i64) -> Result<Vec<Option<String>>> {
        let client = self.pool.get().await?;
        let sql = format!(
            r#"
            SELECT DISTINCT f.zone_label FROM {table} f
            WHERE ST_Intersects(f.geom, {INPUT_GEOM}) AND f.zone_label IS NOT NULL
            ORDER BY f.zone_label
            LIMIT $2
            "#,
            table = self.table(DatasetKind::Forest)
        );
        let rows = client.query(&sql, &[&geometry, &limit]).await?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn parcels_within(&self, bbox: Option<BoundingBox>) -> Result<Vec<ViewportRow>> {
        let client = self.pool.get().await?;
        let select = format!(
            "SELECT f.id, f.source_id, f.species_name, f.area_ha, ST_AsGeoJSON(f.geom) AS geometry FROM {} f",
            self.table(DatasetKind::Forest)
        );

        let rows = match bbox {
            Some(b) => {
                let sql = format!(
                    "{select} WHERE ST_Within(f.geom, ST_MakeEnvelope($1, $2, $3, $4, {TARGET_EPSG}))"
                );
                client
                    .query(&sql, &[&b.west, &b.south, &b.east, &b.north])
                    .await?
            }
            None => client.query(&select, &[]).await?,
        };

        rows.iter()
            .map(|row| {
                let geometry: String = row.get("geometry");
                Ok(ViewportRow {
                    id: row.get("id"),
                    source_id: row.get("source_id"),
                    species_name: row.get("species_name"),
                    area_ha: row.get("area_ha"),
                    geometry: serde_json::from_str(&geometry)
                        .context("Invalid GeoJSON returned by ST_AsGeoJSON")?,
                })
            })
            .collect()
    }

    async fn zone_names_for_region(&self, region: &str) -> Result<Vec<String>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT DISTINCT zone_label FROM {} WHERE region_code = $1 AND zone_label IS NOT NULL ORDER BY zone_label",
            self.table(DatasetKind::Forest)
        );
        let rows = client.query(&sql, &[&region]).await?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn zone_centroid(&self, zone: &str, region: &str) -> Result<Option<ZoneLocation>> {
        let client = self.pool.get().await?;
        let sql = format!(
            r#"
            SELECT ST_X(c) AS lng, ST_Y(c) AS lat
            FROM (SELECT ST_Centroid(ST_Collect(geom)) AS c FROM {} WHERE zone_label = $1 AND region_code = $2) s
            "#,
            self.table(DatasetKind::Forest)
        );
        let row = client.query_one(&sql, &[&zone, &region]).await?;
        let lng: Option<f64> = row.get("lng");
        let lat: Option<f64> = row.get("lat");
        Ok(lng.zip(lat).map(|(lng, lat)| ZoneLocation { lng, lat }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parcel::{CadastreParcel, ForestParcel};
    use geo::{LineString, MultiPolygon, Polygon};

    fn square() -> MultiPolygon<f64> {
        MultiPolygon::new(vec![Polygon::new(
            LineString::from(vec![(2.0, 48.0), (2.5, 48.0), (2.5, 48.5), (2.0, 48.0)]),
            vec![],
        )])
    }

    #[test]
    fn test_forest_copy_row() {
        let parcel = VectorParcel::Forest(ForestParcel {
            source_id: Some("FOR0001".into()),
            species_code: None,
            species_name: Some("Chêne \"rouvre\"".into()),
            vegetation_type: Some("Forêt\nfermée".into()),
            area_ha: Some(12.5),
            region_code: Some("75".into()),
            zone_label: None,
            geometry: square(),
        });

        let mut buf = BytesMut::new();
        let mut wkt = Vec::new();
        write_copy_row(&mut buf, &parcel, &mut wkt).unwrap();
        let line = String::from_utf8(buf.to_vec()).unwrap();

        assert!(line.starts_with("\"FOR0001\"||\"Chêne \"\"rouvre\"\"\"|\"Forêt fermée\"|12.5|\"75\"||\"SRID=4326;MULTIPOLYGON((("));
        assert!(line.ends_with(")))\"\n"));
    }

    #[test]
    fn test_cadastre_copy_row() {
        let parcel = VectorParcel::Cadastre(CadastreParcel {
            source_id: None,
            label: "??".into(),
            region_code: None,
            geometry: square(),
        });

        let mut buf = BytesMut::new();
        let mut wkt = Vec::new();
        write_copy_row(&mut buf, &parcel, &mut wkt).unwrap();
        let line = String::from_utf8(buf.to_vec()).unwrap();

        assert!(line.starts_with("|\"??\"||\"SRID=4326;MULTIPOLYGON"));
    }

    #[test]
    fn test_copy_sql_columns() {
        let sql = copy_sql("foret", DatasetKind::Cadastre);
        assert!(sql.starts_with("COPY foret.cadastre_parcels (source_id, label, region_code, geom)"));
        assert!(sql.contains("DELIMITER '|'"));
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("foret").is_ok());
        assert!(validate_identifier("_staging_2024").is_ok());
        assert!(validate_identifier("Foret").is_err());
        assert!(validate_identifier("foret; DROP TABLE x").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn test_schema_ddl() {
        let ddl = schema_ddl("foret");
        assert!(ddl.contains("foret.forest_parcels"));
        assert!(ddl.contains("geometry(MultiPolygon, 4326)"));
        assert!(ddl.contains("foret._ingested_files"));
    }
}
