//! # Log Producers
//!
//! Feed raw lines through a parser into the ingestion queue, either from a
//! file (batch mode) or from a channel that stays open (live mode).

use crate::processor::{IngestError, LogSender};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracegraph_parser::Parser;
use tracing::{debug, info, warn};

/// Per-source counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProduceStats {
    pub source: String,
    pub lines: u64,
    pub emitted: u64,
    pub rejected: u64,
}

impl ProduceStats {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            ..Self::default()
        }
    }
}

async fn feed_line<P: Parser + ?Sized>(
    line: &str,
    parser: &mut P,
    sink: &LogSender,
    stats: &mut ProduceStats,
) -> Result<(), IngestError> {
    stats.lines += 1;
    match parser.parse_line(line) {
        Ok(Some(log)) => {
            sink.send(log).await?;
            stats.emitted += 1;
        }
        Ok(None) => {}
        Err(e) => {
            warn!("Rejected {} line {}: {}", parser.source(), stats.lines, e);
            stats.rejected += 1;
        }
    }
    Ok(())
}

/// Parse a file line by line into the queue
pub async fn parse_file<P: Parser + ?Sized>(
    path: &Path,
    parser: &mut P,
    sink: &LogSender,
) -> Result<ProduceStats, IngestError> {
    let file = File::open(path).await.map_err(|source| IngestError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut lines = BufReader::new(file).lines();
    let mut stats = ProduceStats::new(parser.source());

    while let Some(line) = lines.next_line().await.map_err(|source| IngestError::Io {
        path: path.display().to_string(),
        source,
    })? {
        feed_line(&line, parser, sink, &mut stats).await?;
    }

    info!(
        "Parsed {} {} lines from {}: {} emitted, {} rejected",
        stats.lines,
        stats.source,
        path.display(),
        stats.emitted,
        stats.rejected
    );
    Ok(stats)
}

/// Parse raw lines from a channel until every raw sender is dropped
pub async fn parse_channel<P: Parser + ?Sized>(
    mut raw: mpsc::Receiver<String>,
    parser: &mut P,
    sink: &LogSender,
) -> Result<ProduceStats, IngestError> {
    let mut stats = ProduceStats::new(parser.source());
    while let Some(line) = raw.recv().await {
        feed_line(&line, parser, sink, &mut stats).await?;
    }
    debug!("Live {} source closed after {} lines", stats.source, stats.lines);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::IngestPipeline;
    use std::sync::Arc;
    use tracegraph_core::config::{IngestConfig, TraceGraphConfig};
    use tracegraph_parser::SyscallParser;
    use tracegraph_store::{MemoryStore, ProvenanceStore};

    #[tokio::test]
    async fn test_live_mode_runs_until_raw_senders_drop() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = IngestPipeline::start(store.clone(), &IngestConfig::default());
        let (raw_tx, raw_rx) = mpsc::channel(16);

        let sink = pipeline.sender();
        let producer = tokio::spawn(async move {
            let mut parser = SyscallParser::new(&TraceGraphConfig::default());
            parse_channel(raw_rx, &mut parser, &sink).await
        });

        raw_tx
            .send("2023-05-10 10:00:00.1 node 1 1 7 < write /tmp/a 1 node 5 c1 hello res=5".to_string())
            .await
            .unwrap();
        raw_tx.send("short line".to_string()).await.unwrap();
        raw_tx
            .send("2023-05-10 10:00:00.2 node 1 1 7 > write /tmp/a 1 node <NA> c1 hello size=5".to_string())
            .await
            .unwrap();
        drop(raw_tx);

        let stats = producer.await.unwrap().unwrap();
        assert_eq!((stats.lines, stats.emitted, stats.rejected), (3, 1, 1));
        assert_eq!(stats.source, "syscall");

        let report = pipeline.finish().await.unwrap();
        assert_eq!(report.totals.edges_written, 1);
        assert_eq!(store.statistics().await.unwrap().events, 1);
    }
}
