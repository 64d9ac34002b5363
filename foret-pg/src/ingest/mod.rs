//! Pipeline d'import : découverte, lecture en flux, reprojection, normalisation, écriture par lots
//!
//! Chaque fichier est lu dans une tâche bloquante qui pousse les enregistrements
//! normalisés dans une file bornée. La tâche asynchrone consomme la file et écrit
//! par lots : quand l'écriture ralentit, la file se remplit et la lecture attend.

pub mod batch;
pub mod discovery;
pub mod repair;

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use geo::{LineString, MultiPolygon};
use geosource::{FeatureStream, RawFeature, StreamStats};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::catalog::{CatalogMaintenance, CatalogWriter};
use crate::config::{Config, FieldCandidates};
use crate::normalize::Normalizer;
use crate::parcel::{DatasetKind, VectorParcel};
use crate::report::{FileStats, IngestReport};
use crate::reproject::{round_coords, ReprojectError, Reprojector, TARGET_EPSG};

pub use batch::{BatchStats, BatchWriter};
pub use discovery::{discover, discover_all, DiscoveredFile};
pub use repair::{post_processing_statements, run_post_processing, RepairOutcome, RepairStatement};

/// Erreur de transformation d'une feature (la feature est ignorée)
#[derive(Debug, Error)]
pub enum TransformError {
    #[error(transparent)]
    Reproject(#[from] ReprojectError),

    #[error("Degenerate ring after reprojection")]
    DegenerateRing,
}

/// Options d'un import complet
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub kinds: Vec<DatasetKind>,
    /// Schéma cible des post-traitements
    pub schema: String,
    pub post_process: bool,
}

/// Anneau acceptable par PostGIS : au moins 4 points, fermé
fn ring_ok(ring: &LineString<f64>) -> bool {
    ring.0.len() >= 4 && ring.0.first() == ring.0.last()
}

/// MultiPolygon non vide dont tous les anneaux sont valides
pub fn geometry_ok_for_postgis(mp: &MultiPolygon<f64>) -> bool {
    !mp.0.is_empty()
        && mp
            .0
            .iter()
            .all(|p| ring_ok(p.exterior()) && p.interiors().iter().all(ring_ok))
}

/// Reprojette, arrondit, contrôle puis normalise une feature
pub fn transform_feature(
    feature: &RawFeature,
    reprojector: &Reprojector,
    normalizer: &Normalizer,
    precision: u8,
) -> Result<VectorParcel, TransformError> {
    let geometry = round_coords(&reprojector.transform(&feature.geometry)?, precision);
    if !geometry_ok_for_postgis(&geometry) {
        return Err(TransformError::DegenerateRing);
    }
    Ok(normalizer.normalize(feature, geometry))
}

/// Tout ce dont la tâche de lecture a besoin, possédé
struct ProducerJob {
    path: PathBuf,
    kind: DatasetKind,
    source_epsg: u32,
    fields: FieldCandidates,
    region_hint: Option<String>,
    precision: u8,
}

#[derive(Debug, Default)]
struct ProducerStats {
    stream: StreamStats,
    /// Features transmises par le lecteur, connues même si le fichier échoue ensuite
    forwarded: u64,
    transform_failures: u64,
}

/// Lecture bloquante : pousse chaque enregistrement dans la file
///
/// Les compteurs sont rendus même quand la lecture échoue en cours de fichier.
fn produce(job: ProducerJob, tx: mpsc::Sender<VectorParcel>) -> (ProducerStats, Result<()>) {
    let mut stats = ProducerStats::default();
    let result = stream_into(job, &tx, &mut stats);
    (stats, result)
}

/// S'arrête proprement si le consommateur a fermé la file.
fn stream_into(job: ProducerJob, tx: &mpsc::Sender<VectorParcel>, stats: &mut ProducerStats) -> Result<()> {
    let reprojector = Reprojector::new(job.source_epsg, TARGET_EPSG)?;
    let normalizer = Normalizer::new(job.kind, job.fields, job.region_hint);

    let stream = FeatureStream::open(&job.path)?;
    stats.stream = stream.for_each(|feature| {
        stats.forwarded += 1;
        match transform_feature(&feature, &reprojector, &normalizer, job.precision) {
            Ok(parcel) => {
                if tx.blocking_send(parcel).is_err() {
                    return ControlFlow::Break(());
                }
            }
            Err(e) => {
                stats.transform_failures += 1;
                debug!(index = feature.index, "Skipping feature: {e}");
            }
        }
        ControlFlow::Continue(())
    })?;
    Ok(())
}

/// Empreinte blake3 du contenu d'un fichier
pub fn compute_file_checksum(path: &Path) -> Result<String> {
    use std::fs::File;
    use std::io::Read;

    let mut file = File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0u8; 65536];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

/// Importe un fichier découvert
///
/// Une erreur de lecture en cours de fichier est portée par `FileStats::error`,
/// avec les enregistrements déjà écrits. Un fichier déjà présent dans le registre est signalé puis réimporté : les
/// enregistrements sont ajoutés, jamais fusionnés.
pub async fn ingest_file<C>(catalog: &C, file: &DiscoveredFile, config: &Config) -> Result<FileStats>
where
    C: CatalogWriter + CatalogMaintenance + ?Sized,
{
    let started = Instant::now();
    let dataset = config.dataset(file.kind);
    let path_str = file.path.display().to_string();

    let checksum_path = file.path.clone();
    let checksum = tokio::task::spawn_blocking(move || compute_file_checksum(&checksum_path))
        .await
        .context("Checksum task panicked")??;

    let already_ingested = catalog.is_file_ingested(&checksum).await?;
    if already_ingested {
        warn!(path = %path_str, "File already ingested, records will be appended again");
    }

    info!(
        path = %path_str,
        kind = %file.kind,
        region = file.region_hint.as_deref().unwrap_or("-"),
        "Ingesting file"
    );

    let (tx, mut rx) = mpsc::channel(config.ingest.queue_capacity.max(1));
    let job = ProducerJob {
        path: file.path.clone(),
        kind: file.kind,
        source_epsg: dataset.source_epsg,
        fields: dataset.fields.clone(),
        region_hint: file.region_hint.clone(),
        precision: config.ingest.precision,
    };
    let producer = tokio::task::spawn_blocking(move || produce(job, tx));

    let batch_stats = BatchWriter::new(catalog, config.ingest.batch_size)
        .drain(&mut rx)
        .await;
    let (produced, read_result) = producer.await.context("Reader task panicked")?;

    // Les lots déjà validés restent dans le catalogue même si la lecture a échoué
    let error = match read_result {
        Ok(()) => None,
        Err(e) => {
            error!(
                path = %path_str,
                written = batch_stats.written,
                "Reading failed partway through file: {e:#}"
            );
            Some(format!("{e:#}"))
        }
    };

    if error.is_none() || batch_stats.written > 0 {
        if let Err(e) = catalog
            .record_ingested_file(&path_str, &checksum, batch_stats.written)
            .await
        {
            warn!(path = %path_str, "Failed to record ingested file: {e:#}");
        }
    }

    let stats = FileStats {
        path: path_str,
        kind: Some(file.kind),
        region_hint: file.region_hint.clone(),
        checksum: Some(checksum),
        already_ingested,
        read: (produced.stream.read as u64).max(produced.forwarded),
        skipped_null: produced.stream.skipped_null as u64,
        skipped_non_polygonal: produced.stream.skipped_non_polygonal as u64,
        skipped_invalid: produced.stream.skipped_invalid as u64,
        skipped_transform: produced.transform_failures,
        written: batch_stats.written,
        flushes: batch_stats.flushes,
        failed_batches: batch_stats.failed_batches,
        lost: batch_stats.lost,
        duration_secs: started.elapsed().as_secs_f64(),
        error,
    };

    info!(
        path = %stats.path,
        read = stats.read,
        written = stats.written,
        skipped = stats.skipped(),
        lost = stats.lost,
        "File ingested"
    );
    Ok(stats)
}

/// Import complet d'un répertoire racine
///
/// Un fichier en échec est consigné dans le rapport et n'arrête pas les suivants.
pub async fn run_pipeline<C>(
    catalog: &C,
    root: &Path,
    config: &Config,
    options: &PipelineOptions,
) -> Result<IngestReport>
where
    C: CatalogWriter + CatalogMaintenance + ?Sized,
{
    let started = Instant::now();
    let mut report = IngestReport::new(root);

    let files = discover_all(root, config, &options.kinds)?;
    if files.is_empty() {
        warn!(root = %root.display(), "No matching files found");
    } else {
        info!(root = %root.display(), count = files.len(), "Files discovered");
    }

    for file in &files {
        match ingest_file(catalog, file, config).await {
            Ok(stats) => report.record_file(stats),
            Err(e) => {
                error!(path = %file.path.display(), "Ingest failed: {e:#}");
                report.record_failure(&file.path, file.kind, &format!("{e:#}"));
            }
        }
    }

    if options.post_process {
        info!("Running post-processing");
        let statements = post_processing_statements(&options.schema);
        report.record_post_processing(run_post_processing(catalog, &statements).await);
    }

    report.set_duration(started.elapsed());
    report.finalize();
    Ok(report)
}
