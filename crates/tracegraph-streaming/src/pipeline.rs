//! # Ingestion Pipeline
//!
//! One bounded queue feeding a fixed pool of insertion workers. The
//! pipeline completes when every sender is dropped and the workers have
//! drained the queue.

use crate::processor::{IngestError, Inserter, LogSender, WorkerStats};
use crate::producer::{parse_file, ProduceStats};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracegraph_core::config::{IngestConfig, TraceGraphConfig};
use tracegraph_core::model::ParsedLog;
use tracegraph_parser::{NetParser, Parser, SyscallParser};
use tracegraph_store::ProvenanceStore;
use tracing::{error, info};

const PROGRESS_INTERVAL: u64 = 1000;

/// Aggregated result of an ingestion run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub workers: usize,
    pub totals: WorkerStats,
    pub per_worker: Vec<WorkerStats>,
    pub elapsed_ms: u128,
}

/// Running worker pool
pub struct IngestPipeline {
    sender: LogSender,
    workers: Vec<JoinHandle<WorkerStats>>,
    started: Instant,
}

impl IngestPipeline {
    pub fn start(store: Arc<dyn ProvenanceStore>, config: &IngestConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let inserter = Inserter::new(store, config.repeat);

        let workers = (0..config.workers.max(1))
            .map(|idx| {
                let inserter = inserter.clone();
                let rx = Arc::clone(&rx);
                tokio::spawn(async move { run_worker(idx, inserter, rx).await })
            })
            .collect();

        info!(
            "Started ingestion pipeline: {} workers, queue capacity {}, repeat {}",
            config.workers, config.queue_capacity, config.repeat
        );
        Self {
            sender: LogSender::new(tx),
            workers,
            started: Instant::now(),
        }
    }

    /// Handle for a producer; the pipeline finishes once all handles are dropped
    pub fn sender(&self) -> LogSender {
        self.sender.clone()
    }

    /// Close the pipeline's own handle and wait for the workers to drain
    pub async fn finish(self) -> Result<IngestReport, IngestError> {
        let IngestPipeline { sender, workers, started } = self;
        drop(sender);

        let mut report = IngestReport {
            workers: workers.len(),
            ..IngestReport::default()
        };
        for result in join_all(workers).await {
            let stats = result?;
            report.totals.merge(&stats);
            report.per_worker.push(stats);
        }
        report.elapsed_ms = started.elapsed().as_millis();

        info!(
            "Ingestion finished: {} logs, {} vertices and {} edges written, {} duplicates, {} failed in {} ms",
            report.totals.processed,
            report.totals.vertices_written,
            report.totals.edges_written,
            report.totals.duplicates,
            report.totals.failed,
            report.elapsed_ms
        );
        Ok(report)
    }
}

async fn run_worker(idx: usize, inserter: Inserter, rx: Arc<Mutex<mpsc::Receiver<ParsedLog>>>) -> WorkerStats {
    let mut stats = WorkerStats::default();
    loop {
        let next = { rx.lock().await.recv().await };
        let Some(log) = next else {
            break;
        };

        stats.processed += 1;
        match inserter.insert(&log).await {
            Ok(outcome) => {
                stats.vertices_written += outcome.vertices_created;
                if outcome.edge_written {
                    stats.edges_written += 1;
                } else {
                    stats.duplicates += 1;
                }
            }
            Err(e) => {
                error!("Worker {} dropped log: {}", idx, e);
                stats.failed += 1;
            }
        }
        if stats.processed % PROGRESS_INTERVAL == 0 {
            info!("Worker {} processed {} logs", idx, stats.processed);
        }
    }
    info!("Worker {} finished after {} logs", idx, stats.processed);
    stats
}

/// Trace files to ingest in one run
#[derive(Debug, Clone, Default)]
pub struct IngestSources {
    pub syscalls: Option<PathBuf>,
    pub net: Option<PathBuf>,
}

/// Parse the given files concurrently into a fresh pipeline and wait for completion
pub async fn ingest_files(
    store: Arc<dyn ProvenanceStore>,
    config: &TraceGraphConfig,
    sources: &IngestSources,
) -> Result<(IngestReport, Vec<ProduceStats>), IngestError> {
    let pipeline = IngestPipeline::start(store, &config.ingest);

    let mut producers: Vec<JoinHandle<Result<ProduceStats, IngestError>>> = Vec::new();
    if let Some(path) = &sources.syscalls {
        producers.push(spawn_file_producer(path.clone(), Box::new(SyscallParser::new(config)), pipeline.sender()));
    }
    if let Some(path) = &sources.net {
        producers.push(spawn_file_producer(path.clone(), Box::new(NetParser::new(config)), pipeline.sender()));
    }

    let mut produced = Vec::new();
    let mut first_error = None;
    for result in join_all(producers).await {
        match result? {
            Ok(stats) => produced.push(stats),
            Err(e) => {
                error!("Producer failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
    }

    let report = pipeline.finish().await?;
    match first_error {
        Some(e) => Err(e),
        None => Ok((report, produced)),
    }
}

fn spawn_file_producer(
    path: PathBuf,
    mut parser: Box<dyn Parser>,
    sink: LogSender,
) -> JoinHandle<Result<ProduceStats, IngestError>> {
    tokio::spawn(async move { parse_file(&path, parser.as_mut(), &sink).await })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use tracegraph_core::config::ContainerRef;
    use tracegraph_store::MemoryStore;

    fn trace_file(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    #[tokio::test]
    async fn test_pipeline_drains_after_senders_drop() {
        let store = Arc::new(MemoryStore::new());
        let config = IngestConfig { workers: 3, queue_capacity: 2, repeat: false };
        let pipeline = IngestPipeline::start(store.clone(), &config);

        let file = trace_file(&[
            "2023-05-10 10:00:00.1 node 1 1 7 < write /tmp/a 1 node 5 c1 hello res=5",
            "2023-05-10 10:00:00.2 node 1 1 7 < write /tmp/b 1 node 5 c1 hello res=5",
            "2023-05-10 10:00:00.3 node 1 1 7 < write /tmp/a 1 node 5 c1 hello res=5",
        ]);
        let mut parser = SyscallParser::new(&TraceGraphConfig::default());
        let sink = pipeline.sender();
        let produced = parse_file(file.path(), &mut parser, &sink).await.unwrap();
        drop(sink);
        assert_eq!(produced.emitted, 3);

        let report = pipeline.finish().await.unwrap();
        assert_eq!(report.workers, 3);
        assert_eq!(report.totals.processed, 3);
        assert_eq!(report.totals.edges_written, 2);
        assert_eq!(report.totals.duplicates, 1);
        assert_eq!(report.per_worker.iter().map(|w| w.processed).sum::<u64>(), 3);

        let stats = store.statistics().await.unwrap();
        assert_eq!((stats.processes, stats.files, stats.events), (1, 2, 2));
        assert_eq!(report.totals.vertices_written, stats.vertices());
    }

    #[tokio::test]
    async fn test_vertices_written_counts_new_rows_only() {
        let store = Arc::new(MemoryStore::new());
        let config = IngestConfig { workers: 1, queue_capacity: 4, repeat: false };
        let lines = [
            "2023-05-10 10:00:00.1 node 1 1 7 < write /tmp/a 1 node 5 c1 hello res=5",
            "2023-05-10 10:00:00.2 node 1 1 7 < write /tmp/b 1 node 5 c1 hello res=5",
            "2023-05-10 10:00:00.3 node 1 1 7 < write /tmp/a 1 node 5 c1 hello res=5",
        ];

        let mut written = Vec::new();
        for _ in 0..2 {
            let pipeline = IngestPipeline::start(store.clone(), &config);
            let file = trace_file(&lines);
            let mut parser = SyscallParser::new(&TraceGraphConfig::default());
            let sink = pipeline.sender();
            parse_file(file.path(), &mut parser, &sink).await.unwrap();
            drop(sink);
            written.push(pipeline.finish().await.unwrap().totals);
        }

        // process + two files on the first pass, nothing new on the second
        assert_eq!(written[0].vertices_written, 3);
        assert_eq!(written[1].vertices_written, 0);
        assert_eq!(written[1].duplicates, 3);
        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.processes + stats.files, 3);
    }

    #[tokio::test]
    async fn test_ingest_files_mixes_sources() {
        let mut config = TraceGraphConfig::default();
        config
            .topology
            .ip_map
            .insert("10.62.0.3".into(), ContainerRef::new("hello", "c1"));

        let syscalls = trace_file(&[
            "2023-05-10 10:00:00.1 sh 1 1 7 > execve <NA> 1 /bin/sh <NA> c1 hello filename=/usr/bin/node",
            "2023-05-10 10:00:00.2 node 1 1 7 < execve <NA> 1 /usr/bin/node 0 c1 hello res=0",
            "not a trace line",
        ]);
        let packet = serde_json::json!({
            "ip_src": "8.8.8.8", "port_src": 443, "ip_dst": "9.9.9.9", "port_dst": 80,
            "sequence_num": 1, "acknowledge_num": 1, "payload_len": 3, "payload": "GET / x",
            "time_stamp": 1683684000.5,
        });
        let record = packet.to_string();
        let net = trace_file(&[record.as_str(), record.as_str()]);

        let store = Arc::new(MemoryStore::new());
        let sources = IngestSources {
            syscalls: Some(syscalls.path().to_path_buf()),
            net: Some(net.path().to_path_buf()),
        };
        let (report, produced) = ingest_files(store.clone(), &config, &sources).await.unwrap();

        assert_eq!(report.totals.processed, 3);
        assert_eq!(produced.iter().map(|p| p.rejected).sum::<u64>(), 1);
        let stats = store.statistics().await.unwrap();
        assert_eq!((stats.processes, stats.events, stats.sockets, stats.nets), (2, 1, 2, 2));
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let sources = IngestSources {
            syscalls: Some(PathBuf::from("/nonexistent/trace.log")),
            net: None,
        };
        let result = ingest_files(store, &TraceGraphConfig::default(), &sources).await;
        assert!(matches!(result, Err(IngestError::Io { .. })));
    }
}
