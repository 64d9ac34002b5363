//! Point d'entrée CLI pour foret-pg

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

mod cli;

use cli::Commands;

// Charger .env au démarrage
fn load_env() {
    if dotenvy::dotenv().is_err() {
        // Essayer depuis le répertoire du binaire
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let _ = dotenvy::from_path(dir.join(".env"));
            }
        }
    }
}

/// Importer BD Forêt et cadastre dans PostGIS, puis analyser les peuplements
#[derive(Parser)]
#[command(name = "foret-pg")]
#[command(author, version)]
#[command(about = "Importer les parcelles forestières et cadastrales dans PostGIS et les analyser")]
struct Cli {
    /// Augmenter la verbosité (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Mode silencieux
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();

    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Import(args) => cli::cmd_import(args).await,
        Commands::Repair { schema, db } => cli::cmd_repair(&schema, &db).await,
        Commands::Analyze {
            geometry,
            config,
            schema,
            db,
        } => cli::cmd_analyze(&geometry, &config, &schema, &db).await,
        Commands::Viewport {
            zoom,
            bbox,
            config,
            schema,
            db,
        } => cli::cmd_viewport(zoom, bbox, &config, &schema, &db).await,
        Commands::Zones { region, schema, db } => cli::cmd_zones(&region, &schema, &db).await,
        Commands::ZoneLocation {
            name,
            region,
            schema,
            db,
        } => cli::cmd_zone_location(&name, &region, &schema, &db).await,
        Commands::Lidar {
            tile_dir,
            geometry,
            config,
        } => cli::cmd_lidar(tile_dir.as_deref(), geometry.as_deref(), &config).await,
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Level::WARN,
        (_, 0) => Level::INFO,
        (_, 1) => Level::DEBUG,
        (_, _) => Level::TRACE,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Les commandes de requête impriment du JSON sur stdout : les logs vont sur stderr
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}
