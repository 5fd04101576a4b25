//! # Tracegraph Streaming
//!
//! Ingestion of parsed trace logs: producers parse raw lines into a bounded
//! queue, a pool of workers writes them into the provenance store.

pub mod pipeline;
pub mod processor;
pub mod producer;

pub use pipeline::{ingest_files, IngestPipeline, IngestReport, IngestSources};
pub use processor::{IngestError, InsertOutcome, Inserter, LogSender, WorkerStats};
pub use producer::{parse_channel, parse_file, ProduceStats};
