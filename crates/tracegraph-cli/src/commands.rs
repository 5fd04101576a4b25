//! CLI command definitions and handlers

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracegraph_core::config::TraceGraphConfig;
use tracegraph_core::model::VertexKey;
use tracegraph_engine::{to_dot, GraphBuilder, GraphView, ProvenanceQuery};
use tracegraph_store::{open_store, ProvenanceStore, StoreBackend};
use tracegraph_streaming::{ingest_files, IngestSources};
use tracing::info;

/// Main CLI structure
#[derive(Parser)]
#[command(name = "tracegraph")]
#[command(about = "Provenance graphs from syscall traces and packet captures")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// YAML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Store url, overrides the configuration (`memory` or `sqlite://...`)
    #[arg(long, global = true)]
    pub database: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest trace files into the store
    Ingest {
        /// sysdig syscall trace
        #[arg(long)]
        syscalls: Option<PathBuf>,

        /// Packet records, one JSON object per line
        #[arg(long)]
        net: Option<PathBuf>,

        /// Keep duplicate event edges
        #[arg(long)]
        repeat: bool,

        /// Worker count, overrides the configuration
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Build the provenance subgraph around a process
    Subgraph {
        /// Container id of the root process
        #[arg(long)]
        container: String,

        /// Virtual pid of the root process
        #[arg(long)]
        pid: String,

        /// Name of the root process
        #[arg(long)]
        name: String,

        /// Host id, defaults to the configured local host
        #[arg(long)]
        host: Option<String>,

        /// Maximum hop depth
        #[arg(short, long)]
        depth: Option<usize>,

        /// Only follow time-ordered edges
        #[arg(long)]
        time_filter: bool,

        /// Time of the root in microseconds since epoch
        #[arg(long)]
        seed_time: Option<i64>,

        /// Output format
        #[arg(short, long, default_value = "json")]
        format: GraphFormat,

        /// Keep only edges carrying this correlation id
        #[arg(long)]
        uuid: Option<String>,

        /// Output file, stdout when absent
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show store statistics
    Stats,
}

/// Subgraph output formats
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum GraphFormat {
    Json,
    Dot,
}

/// Command execution result
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

/// Execute CLI commands
pub struct CommandExecutor {
    config: TraceGraphConfig,
}

impl CommandExecutor {
    pub fn new(config: TraceGraphConfig) -> Self {
        Self { config }
    }

    /// Load the configuration named on the command line and apply overrides
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => TraceGraphConfig::load(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => TraceGraphConfig::default(),
        };
        if let Some(url) = &cli.database {
            config.database.url = url.clone();
        }
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &TraceGraphConfig {
        &self.config
    }

    async fn open_store(&self) -> Result<Arc<dyn ProvenanceStore>> {
        let backend = StoreBackend::from_config(&self.config.database)?;
        Ok(open_store(&backend).await?)
    }

    /// Execute a CLI command
    pub async fn execute(&mut self, command: Commands) -> Result<CommandResult> {
        match command {
            Commands::Ingest { syscalls, net, repeat, workers } => {
                self.execute_ingest(syscalls, net, repeat, workers).await
            }
            Commands::Subgraph {
                container,
                pid,
                name,
                host,
                depth,
                time_filter,
                seed_time,
                format,
                uuid,
                output,
            } => {
                let root = VertexKey::Process {
                    host_id: host.unwrap_or_else(|| self.config.topology.local_host.id.clone()),
                    container_id: container,
                    vpid: pid,
                    name,
                };
                let mut query = ProvenanceQuery::with_config(root, &self.config.traversal);
                if let Some(depth) = depth {
                    query = query.depth(depth);
                }
                if time_filter || seed_time.is_some() {
                    query = query.time_filtered(seed_time);
                }
                self.execute_subgraph(query, format, uuid, output).await
            }
            Commands::Stats => self.execute_stats().await,
        }
    }

    async fn execute_ingest(
        &mut self,
        syscalls: Option<PathBuf>,
        net: Option<PathBuf>,
        repeat: bool,
        workers: Option<usize>,
    ) -> Result<CommandResult> {
        if syscalls.is_none() && net.is_none() {
            bail!("Either --syscalls or --net must be specified");
        }
        if repeat {
            self.config.ingest.repeat = true;
        }
        if let Some(workers) = workers {
            self.config.ingest.workers = workers;
        }
        self.config.validate()?;

        let store = self.open_store().await?;
        let sources = IngestSources { syscalls, net };
        let (report, produced) = ingest_files(store.clone(), &self.config, &sources).await?;
        let stats = store.statistics().await?;

        let mut message = format!(
            "Ingested {} logs with {} workers in {} ms: {} vertices and {} edges written, {} duplicates, {} failed",
            report.totals.processed,
            report.workers,
            report.elapsed_ms,
            report.totals.vertices_written,
            report.totals.edges_written,
            report.totals.duplicates,
            report.totals.failed
        );
        for source in &produced {
            message.push_str(&format!(
                "\n  {}: {} lines, {} emitted, {} rejected",
                source.source, source.lines, source.emitted, source.rejected
            ));
        }
        message.push_str(&format!("\nStore now holds {} vertices and {} edges", stats.vertices(), stats.edges()));

        Ok(CommandResult {
            success: report.totals.failed == 0,
            message,
            data: Some(serde_json::json!({
                "report": report,
                "sources": produced,
                "store": stats,
            })),
        })
    }

    async fn execute_subgraph(
        &self,
        query: ProvenanceQuery,
        format: GraphFormat,
        uuid: Option<String>,
        output: Option<PathBuf>,
    ) -> Result<CommandResult> {
        let store = self.open_store().await?;
        let graph = GraphBuilder::new(store).build(&query).await?;
        let view = GraphView::from_graph(&graph, uuid.as_deref());

        let rendered = match format {
            GraphFormat::Json => view.to_json_pretty()?,
            GraphFormat::Dot => to_dot(&graph, uuid.as_deref()),
        };

        let message = match output {
            Some(path) => {
                tokio::fs::write(&path, &rendered)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?;
                info!("Wrote subgraph to {}", path.display());
                format!(
                    "Wrote {} nodes and {} links to {}",
                    view.nodes.len(),
                    view.links.len(),
                    path.display()
                )
            }
            None => rendered,
        };

        Ok(CommandResult {
            success: true,
            message,
            data: Some(serde_json::to_value(&view.stats)?),
        })
    }

    async fn execute_stats(&self) -> Result<CommandResult> {
        let store = self.open_store().await?;
        let stats = store.statistics().await?;
        Ok(CommandResult {
            success: true,
            message: format!(
                "Processes: {}\nFiles: {}\nSockets: {}\nEvents: {}\nNets: {}",
                stats.processes, stats.files, stats.sockets, stats.events, stats.nets
            ),
            data: Some(serde_json::to_value(stats)?),
        })
    }
}
