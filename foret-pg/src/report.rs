//! Rapport d'import
//!
//! Collecte les compteurs par fichier et par jeu de données, les fichiers en échec
//! et le résultat des post-traitements, puis détermine le statut global.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use crate::ingest::RepairOutcome;
use crate::parcel::DatasetKind;

/// Statut global de l'import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImportStatus {
    /// Tous les fichiers et lots écrits
    Success,
    /// Des enregistrements ont été écrits malgré des erreurs
    PartialSuccess,
    /// Rien n'a été écrit et des erreurs sont survenues
    Failed,
}

/// Compteurs d'un fichier importé
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileStats {
    pub path: String,
    pub kind: Option<DatasetKind>,
    pub region_hint: Option<String>,
    pub checksum: Option<String>,
    /// Un fichier de même contenu figurait déjà dans le registre
    pub already_ingested: bool,
    pub read: u64,
    pub skipped_null: u64,
    pub skipped_non_polygonal: u64,
    pub skipped_invalid: u64,
    /// Reprojection impossible ou anneau dégénéré
    pub skipped_transform: u64,
    pub written: u64,
    pub flushes: usize,
    pub failed_batches: usize,
    pub lost: u64,
    pub duration_secs: f64,
    /// Lecture interrompue par une erreur après d'éventuelles écritures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileStats {
    pub fn skipped(&self) -> u64 {
        self.skipped_null + self.skipped_non_polygonal + self.skipped_invalid + self.skipped_transform
    }
}

/// Cumul par jeu de données
#[derive(Debug, Clone, Default, Serialize)]
pub struct DatasetStats {
    pub files: usize,
    pub written: u64,
    pub skipped: u64,
    pub lost: u64,
}

/// Fichier dont l'import a échoué avant la fin
#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub path: String,
    pub kind: DatasetKind,
    pub message: String,
}

/// Rapport complet d'un import
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub root: String,
    pub duration_secs: f64,
    pub status: ImportStatus,

    pub files_processed: usize,
    pub files_failed: usize,
    pub records_written: u64,
    pub records_skipped: u64,
    pub records_lost: u64,

    pub by_dataset: BTreeMap<String, DatasetStats>,
    pub files: Vec<FileStats>,
    pub failures: Vec<FileFailure>,
    pub post_processing: Vec<RepairOutcome>,
}

impl IngestReport {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.display().to_string(),
            duration_secs: 0.0,
            status: ImportStatus::Success,
            files_processed: 0,
            files_failed: 0,
            records_written: 0,
            records_skipped: 0,
            records_lost: 0,
            by_dataset: BTreeMap::new(),
            files: Vec::new(),
            failures: Vec::new(),
            post_processing: Vec::new(),
        }
    }

    /// Enregistre un fichier importé, éventuellement en partie
    ///
    /// Un fichier porteur d'une erreur compte aussi comme fichier en échec.
    pub fn record_file(&mut self, stats: FileStats) {
        self.files_processed += 1;
        if let Some(message) = &stats.error {
            self.files_failed += 1;
            if let Some(kind) = stats.kind {
                self.failures.push(FileFailure {
                    path: stats.path.clone(),
                    kind,
                    message: message.clone(),
                });
            }
        }
        self.records_written += stats.written;
        self.records_skipped += stats.skipped();
        self.records_lost += stats.lost;

        if let Some(kind) = stats.kind {
            let entry = self.by_dataset.entry(kind.to_string()).or_default();
            entry.files += 1;
            entry.written += stats.written;
            entry.skipped += stats.skipped();
            entry.lost += stats.lost;
        }
        self.files.push(stats);
    }

    /// Enregistre un fichier en échec
    pub fn record_failure(&mut self, path: &Path, kind: DatasetKind, message: &str) {
        self.files_processed += 1;
        self.files_failed += 1;
        self.failures.push(FileFailure {
            path: path.display().to_string(),
            kind,
            message: message.to_string(),
        });
    }

    pub fn record_post_processing(&mut self, outcomes: Vec<RepairOutcome>) {
        self.post_processing = outcomes;
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_secs = duration.as_secs_f64();
    }

    /// Détermine le statut final
    pub fn finalize(&mut self) {
        let has_errors = self.files_failed > 0
            || self.records_lost > 0
            || self.post_processing.iter().any(|o| !o.is_ok());

        self.status = match (has_errors, self.records_written > 0) {
            (false, _) => ImportStatus::Success,
            (true, true) => ImportStatus::PartialSuccess,
            (true, false) => ImportStatus::Failed,
        };
    }

    /// Affiche le rapport sur la console
    pub fn display(&self) {
        println!("\n{}", "=".repeat(60));
        println!("INGEST REPORT - {}", self.root);
        println!("{}", "=".repeat(60));

        println!("\nStatus: {:?}", self.status);
        println!("Duration: {:.2}s", self.duration_secs);

        println!("\n--- SUMMARY ---");
        println!(
            "Files: {} processed, {} failed",
            self.files_processed, self.files_failed
        );
        println!(
            "Records: {} written, {} skipped, {} lost",
            self.records_written, self.records_skipped, self.records_lost
        );

        if !self.by_dataset.is_empty() {
            println!("\n--- BY DATASET ---");
            for (name, stats) in &self.by_dataset {
                println!(
                    "  {}: {} files, {} written, {} skipped, {} lost",
                    name, stats.files, stats.written, stats.skipped, stats.lost
                );
            }
        }

        let reingested: Vec<_> = self.files.iter().filter(|f| f.already_ingested).collect();
        if !reingested.is_empty() {
            println!("\n--- ALREADY INGESTED ({}) ---", reingested.len());
            for f in reingested.iter().take(10) {
                println!("  {}", f.path);
            }
        }

        if !self.post_processing.is_empty() {
            println!("\n--- POST-PROCESSING ---");
            for o in &self.post_processing {
                match (&o.rows, &o.error) {
                    (_, Some(err)) => println!("  {}: FAILED {}", o.name, err),
                    (Some(rows), None) => println!("  {}: {} rows", o.name, rows),
                    (None, None) => println!("  {}: done", o.name),
                }
            }
        }

        if !self.failures.is_empty() {
            println!("\n--- ERRORS ({}) ---", self.failures.len());
            for f in self.failures.iter().take(20) {
                println!("  [{}] {}: {}", f.kind, f.path, f.message);
            }
            if self.failures.len() > 20 {
                println!("  ... and {} more", self.failures.len() - 20);
            }
        }

        println!("\n{}", "=".repeat(60));
    }

    /// Sauvegarde le rapport en JSON
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Affichage compact
    pub fn summary(&self) -> String {
        format!(
            "{:?}: {} files, {} written, {} skipped, {} lost, {} failed files",
            self.status,
            self.files_processed,
            self.records_written,
            self.records_skipped,
            self.records_lost,
            self.files_failed
        )
    }
}
