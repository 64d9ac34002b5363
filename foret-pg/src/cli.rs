//! Définition et implémentation des commandes CLI
//!
//! - `import` : fichiers BD Forêt / cadastre → PostGIS
//! - `repair` : post-traitements seuls
//! - `analyze`, `viewport`, `zones`, `zone-location` : requêtes sur le catalogue
//! - `lidar` : statistiques de hauteur via l'outil raster externe

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tracing::{info, warn};

use foret_pg::analysis::{analyze, parse_geometry};
use foret_pg::catalog::{BoundingBox, DatabaseConfig, PgCatalog, SpatialCatalog};
use foret_pg::ingest::{post_processing_statements, run_pipeline, run_post_processing, PipelineOptions};
use foret_pg::raster::{ProcessRasterAnalyzer, RasterAnalyzer};
use foret_pg::report::ImportStatus;
use foret_pg::viewport::viewport_features;
use foret_pg::{Config, DatasetKind};

/// Connexion PostgreSQL (défauts : variables PG* puis valeurs intégrées)
#[derive(Args, Debug, Clone, Default)]
pub struct DatabaseArgs {
    /// PostgreSQL host (défaut : env PGHOST / localhost)
    #[arg(long)]
    pub host: Option<String>,

    /// PostgreSQL port (défaut : env PGPORT / 5432)
    #[arg(long)]
    pub port: Option<u16>,

    /// PostgreSQL database name (défaut : env PGDATABASE / foret)
    #[arg(long)]
    pub database: Option<String>,

    /// PostgreSQL user (défaut : env PGUSER / postgres)
    #[arg(long)]
    pub user: Option<String>,

    /// PostgreSQL password (défaut : env PGPASSWORD)
    #[arg(long)]
    pub password: Option<String>,

    /// SSL mode: disable, prefer, require (défaut : env PGSSLMODE / disable)
    #[arg(long)]
    pub ssl: Option<String>,
}

impl DatabaseArgs {
    /// Applique les options de ligne de commande sur une configuration
    pub fn apply_to(&self, config: &mut DatabaseConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(database) = &self.database {
            config.dbname = database.clone();
        }
        if let Some(user) = &self.user {
            config.user = user.clone();
        }
        if let Some(password) = &self.password {
            config.password = Some(password.clone());
        }
        if let Some(ssl) = &self.ssl {
            match ssl.parse() {
                Ok(mode) => config.ssl_mode = mode,
                Err(e) => warn!("{e}"),
            }
        }
    }

    fn to_config(&self) -> DatabaseConfig {
        let mut config = DatabaseConfig::from_env();
        self.apply_to(&mut config);
        config
    }

    async fn connect(&self, schema: &str) -> Result<PgCatalog> {
        PgCatalog::connect(&self.to_config(), schema).await
    }
}

/// Arguments de la commande import
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Root directory scanned recursively for source files
    #[arg(short, long)]
    pub root: PathBuf,

    /// Dataset to import: forest, cadastre (défaut : les deux)
    #[arg(long)]
    pub kind: Option<DatasetKind>,

    /// Config preset name (default) or path to a JSON config
    #[arg(long, default_value = "default")]
    pub config: String,

    /// Target PostgreSQL schema
    #[arg(long, default_value = "foret")]
    pub schema: String,

    /// Truncate parcel tables before loading
    #[arg(long)]
    pub reset: bool,

    /// Skip the post-processing pass
    #[arg(long)]
    pub skip_repair: bool,

    /// Skip index creation at the end of the import
    #[arg(long)]
    pub skip_indexes: bool,

    /// Records per transaction (défaut : config)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Write the import report as JSON
    #[arg(long)]
    pub report: Option<PathBuf>,

    #[command(flatten)]
    pub db: DatabaseArgs,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Import forest and cadastral parcels into PostGIS
    Import(ImportArgs),

    /// Run the post-processing statements on an existing catalog
    Repair {
        #[arg(long, default_value = "foret")]
        schema: String,

        #[command(flatten)]
        db: DatabaseArgs,
    },

    /// Analyze a GeoJSON polygon (file path or "-" for stdin)
    Analyze {
        #[arg(short, long)]
        geometry: String,

        #[arg(long, default_value = "default")]
        config: String,

        #[arg(long, default_value = "foret")]
        schema: String,

        #[command(flatten)]
        db: DatabaseArgs,
    },

    /// Forest parcels fully inside a viewport, as a FeatureCollection
    Viewport {
        /// Current map zoom level
        #[arg(long)]
        zoom: f64,

        /// west,south,east,north (défaut : tout le catalogue)
        #[arg(long, allow_hyphen_values = true)]
        bbox: Option<BoundingBox>,

        #[arg(long, default_value = "default")]
        config: String,

        #[arg(long, default_value = "foret")]
        schema: String,

        #[command(flatten)]
        db: DatabaseArgs,
    },

    /// List zone labels of a region
    Zones {
        #[arg(long)]
        region: String,

        #[arg(long, default_value = "foret")]
        schema: String,

        #[command(flatten)]
        db: DatabaseArgs,
    },

    /// Centroid of a zone within a region
    ZoneLocation {
        #[arg(long)]
        name: String,

        #[arg(long)]
        region: String,

        #[arg(long, default_value = "foret")]
        schema: String,

        #[command(flatten)]
        db: DatabaseArgs,
    },

    /// Vegetation height statistics from LiDAR tiles
    Lidar {
        /// Tile directory (défaut : config)
        #[arg(long)]
        tile_dir: Option<PathBuf>,

        /// GeoJSON polygon restricting the analysis
        #[arg(long)]
        geometry: Option<String>,

        #[arg(long, default_value = "default")]
        config: String,
    },
}

/// Lit un fichier, ou l'entrée standard pour "-"
fn read_input(source: &str) -> Result<String> {
    if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        Ok(buf)
    } else {
        std::fs::read_to_string(source).with_context(|| format!("Failed to read {}", source))
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Exécute la commande import
pub async fn cmd_import(args: ImportArgs) -> Result<()> {
    let mut config = Config::resolve(&args.config)?;
    if let Some(batch_size) = args.batch_size {
        config.ingest.batch_size = batch_size;
    }
    let kinds = match args.kind {
        Some(kind) => vec![kind],
        None => DatasetKind::ALL.to_vec(),
    };

    info!(
        root = %args.root.display(),
        schema = %args.schema,
        kinds = ?kinds,
        batch_size = config.ingest.batch_size,
        "Starting import"
    );

    let catalog = args.db.connect(&args.schema).await?;
    catalog.prepare().await?;
    if args.reset {
        catalog.reset().await?;
    }

    let options = PipelineOptions {
        kinds,
        schema: args.schema.clone(),
        post_process: false,
    };
    let mut report = run_pipeline(&catalog, &args.root, &config, &options).await?;

    // Index avant les post-traitements : la jointure spatiale en dépend
    if !args.skip_indexes {
        catalog.create_indexes().await?;
    }
    if !args.skip_repair {
        let statements = post_processing_statements(&args.schema);
        report.record_post_processing(run_post_processing(&catalog, &statements).await);
        report.finalize();
    }

    catalog.close();
    report.display();

    if let Some(path) = &args.report {
        report
            .save_to_file(path)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        info!(path = %path.display(), "Report saved");
    }

    if report.status == ImportStatus::Failed {
        anyhow::bail!("Import failed: {}", report.summary());
    }
    Ok(())
}

/// Exécute les post-traitements seuls
pub async fn cmd_repair(schema: &str, db: &DatabaseArgs) -> Result<()> {
    let catalog = db.connect(schema).await?;
    let outcomes = run_post_processing(&catalog, &post_processing_statements(schema)).await;
    catalog.close();

    print_json(&outcomes)?;
    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    if failed > 0 {
        anyhow::bail!("{failed} post-processing statement(s) failed");
    }
    Ok(())
}

/// Analyse d'un polygone
pub async fn cmd_analyze(geometry: &str, config: &str, schema: &str, db: &DatabaseArgs) -> Result<()> {
    let config = Config::resolve(config)?;
    let geometry = parse_geometry(&read_input(geometry)?)?;

    let catalog = db.connect(schema).await?;
    let result = analyze(&catalog, &geometry, &config.analysis).await;
    catalog.close();

    print_json(&result?)
}

/// Parcelles d'un viewport
pub async fn cmd_viewport(
    zoom: f64,
    bbox: Option<BoundingBox>,
    config: &str,
    schema: &str,
    db: &DatabaseArgs,
) -> Result<()> {
    let config = Config::resolve(config)?;
    let catalog = db.connect(schema).await?;
    let collection = viewport_features(&catalog, bbox, zoom, config.analysis.min_viewport_zoom).await;
    catalog.close();

    print_json(&collection?)
}

/// Zones d'un département
pub async fn cmd_zones(region: &str, schema: &str, db: &DatabaseArgs) -> Result<()> {
    let catalog = db.connect(schema).await?;
    let zones = catalog.zone_names_for_region(region).await;
    catalog.close();

    print_json(&zones?)
}

/// Centroïde d'une zone
pub async fn cmd_zone_location(name: &str, region: &str, schema: &str, db: &DatabaseArgs) -> Result<()> {
    let catalog = db.connect(schema).await?;
    let location = catalog.zone_centroid(name, region).await;
    catalog.close();

    print_json(&location?)
}

/// Statistiques LiDAR ; une erreur de l'outil est imprimée comme `{"error": ...}`
pub async fn cmd_lidar(tile_dir: Option<&Path>, geometry: Option<&str>, config: &str) -> Result<()> {
    let config = Config::resolve(config)?;
    let tile_dir = tile_dir.unwrap_or(config.raster.tile_dir.as_path());
    let geometry = match geometry {
        Some(source) => Some(parse_geometry(&read_input(source)?)?),
        None => None,
    };

    let analyzer = ProcessRasterAnalyzer::new(&config.raster);
    match analyzer.analyze(tile_dir, geometry.as_ref()).await {
        Ok(stats) => print_json(&stats),
        Err(e) => {
            warn!(tile_dir = %tile_dir.display(), "LiDAR analysis failed: {e}");
            print_json(&e.to_payload())
        }
    }
}
