//! Regroupement des enregistrements en lots avant écriture
//!
//! Le consommateur ne lit plus la file pendant qu'un lot est en cours d'écriture :
//! la file bornée se remplit et bloque le lecteur. La mémoire reste ainsi bornée
//! par `batch_size + queue_capacity` enregistrements.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::catalog::CatalogWriter;
use crate::parcel::VectorParcel;

/// Compteurs d'écriture d'un fichier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    /// Lignes confirmées par le catalogue
    pub written: u64,
    /// Nombre d'appels à `write_batch`
    pub flushes: usize,
    pub failed_batches: usize,
    /// Enregistrements des lots en échec
    pub lost: u64,
}

/// Tampon de lot devant un [`CatalogWriter`]
pub struct BatchWriter<'a, W: CatalogWriter + ?Sized> {
    writer: &'a W,
    batch_size: usize,
    buffer: Vec<VectorParcel>,
    stats: BatchStats,
}

impl<'a, W: CatalogWriter + ?Sized> BatchWriter<'a, W> {
    pub fn new(writer: &'a W, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            writer,
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            stats: BatchStats::default(),
        }
    }

    /// Ajoute un enregistrement et écrit le lot dès qu'il est plein
    pub async fn push(&mut self, parcel: VectorParcel) {
        self.buffer.push(parcel);
        if self.buffer.len() >= self.batch_size {
            self.flush().await;
        }
    }

    /// Écrit le tampon courant s'il n'est pas vide
    ///
    /// Un lot en échec est journalisé puis abandonné, sans nouvelle tentative.
    pub async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        let batch = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.batch_size));
        self.stats.flushes += 1;

        match self.writer.write_batch(&batch).await {
            Ok(rows) => {
                self.stats.written += rows;
                debug!(rows, flush = self.stats.flushes, "Batch written");
            }
            Err(e) => {
                self.stats.failed_batches += 1;
                self.stats.lost += batch.len() as u64;
                error!(batch_size = batch.len(), "Batch write failed, records dropped: {e:#}");
            }
        }
    }

    /// Écrit le reliquat et retourne les compteurs
    pub async fn finish(mut self) -> BatchStats {
        self.flush().await;
        self.stats
    }

    /// Consomme la file jusqu'à sa fermeture par le producteur
    pub async fn drain(mut self, rx: &mut mpsc::Receiver<VectorParcel>) -> BatchStats {
        while let Some(parcel) = rx.recv().await {
            self.push(parcel).await;
        }
        self.finish().await
    }

    pub fn stats(&self) -> BatchStats {
        self.stats
    }
}
