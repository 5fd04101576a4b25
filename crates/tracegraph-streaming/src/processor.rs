//! # Log Processor
//!
//! Writes one `ParsedLog` into the store: both endpoint vertices, then the
//! edge. Event edges are deduplicated under a shared lock unless `repeat`
//! is set; net edges are always written.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracegraph_core::model::{EdgeRecord, ParsedLog};
use tracegraph_store::{ProvenanceStore, StoreError};

/// Ingestion errors
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Channel closed")]
    ChannelClosed,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Malformed log: {0}")]
    Malformed(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// What happened to one log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Endpoint vertices this log created, 0 to 2
    pub vertices_created: u64,
    /// False when the event edge already existed
    pub edge_written: bool,
}

/// Per-worker counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub processed: u64,
    pub vertices_written: u64,
    pub edges_written: u64,
    pub duplicates: u64,
    pub failed: u64,
}

impl WorkerStats {
    pub fn merge(&mut self, other: &WorkerStats) {
        self.processed += other.processed;
        self.vertices_written += other.vertices_written;
        self.edges_written += other.edges_written;
        self.duplicates += other.duplicates;
        self.failed += other.failed;
    }
}

/// Store writer shared by all workers
#[derive(Clone)]
pub struct Inserter {
    store: Arc<dyn ProvenanceStore>,
    dedup: Arc<Mutex<()>>,
    repeat: bool,
}

impl Inserter {
    pub fn new(store: Arc<dyn ProvenanceStore>, repeat: bool) -> Self {
        Self {
            store,
            dedup: Arc::new(Mutex::new(())),
            repeat,
        }
    }

    pub async fn insert(&self, log: &ParsedLog) -> Result<InsertOutcome, IngestError> {
        if !log.is_well_formed() {
            return Err(IngestError::Malformed(format!(
                "{} -> {} for {:?}",
                log.start.kind(),
                log.end.kind(),
                log.edge.table()
            )));
        }

        let (src_id, src_created) = self.store.write_vertex(&log.start).await?;
        let (dst_id, dst_created) = self.store.write_vertex(&log.end).await?;
        let vertices_created = u64::from(src_created) + u64::from(dst_created);

        match &log.edge {
            EdgeRecord::Event(edge) if self.repeat => {
                self.store.insert_event(src_id, dst_id, edge).await?;
            }
            EdgeRecord::Event(edge) => {
                let _guard = self.dedup.lock().await;
                if self.store.event_exists(src_id, dst_id, edge).await? {
                    return Ok(InsertOutcome { vertices_created, edge_written: false });
                }
                self.store.insert_event(src_id, dst_id, edge).await?;
            }
            EdgeRecord::Net(edge) => {
                self.store.insert_net(src_id, dst_id, edge).await?;
            }
        }
        Ok(InsertOutcome { vertices_created, edge_written: true })
    }
}

/// Producer handle onto the bounded ingestion queue
#[derive(Clone, Debug)]
pub struct LogSender {
    sender: mpsc::Sender<ParsedLog>,
}

impl LogSender {
    pub(crate) fn new(sender: mpsc::Sender<ParsedLog>) -> Self {
        Self { sender }
    }

    /// Enqueue a log, waiting while the queue is full
    pub async fn send(&self, log: ParsedLog) -> Result<(), IngestError> {
        self.sender.send(log).await.map_err(|_| IngestError::ChannelClosed)
    }
}
