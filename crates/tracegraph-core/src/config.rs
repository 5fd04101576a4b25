//! # Tracegraph Configuration
//!
//! Deployment settings shared by the parser, the ingestion pipeline,
//! the store and the graph builder. Loaded from YAML; every section
//! falls back to its defaults when omitted.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid container reference '{0}', expected name$id")]
    ContainerRef(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TraceGraphConfig {
    /// Store connection
    pub database: DatabaseConfig,

    /// Ingestion pipeline sizing
    pub ingest: IngestConfig,

    /// Static network topology
    pub topology: TopologyConfig,

    /// Trace line interpretation
    pub trace: TraceConfig,

    /// Graph builder defaults
    pub traversal: TraversalConfig,
}

impl TraceGraphConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: TraceGraphConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ingest.workers == 0 {
            return Err(ConfigError::Invalid("ingest.workers must be at least 1".into()));
        }
        if self.ingest.queue_capacity == 0 {
            return Err(ConfigError::Invalid("ingest.queue_capacity must be at least 1".into()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid("database.max_connections must be at least 1".into()));
        }
        if self.trace.utc_offset_seconds.abs() >= 86_400 {
            return Err(ConfigError::Invalid(format!(
                "trace.utc_offset_seconds out of range: {}",
                self.trace.utc_offset_seconds
            )));
        }
        Ok(())
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// sqlx connection url, `memory` selects the in-process store
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "sqlite://tracegraph.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    16
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// Ingestion pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestConfig {
    /// Number of insertion workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Bounded queue capacity between parsers and workers
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Keep duplicate event edges
    #[serde(default)]
    pub repeat: bool,
}

fn default_workers() -> usize {
    10
}

fn default_queue_capacity() -> usize {
    1000
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            repeat: false,
        }
    }
}

/// Container identity as written in the ip map: `name$id`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerRef {
    pub name: String,
    pub id: String,
}

impl ContainerRef {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self { name: name.into(), id: id.into() }
    }
}

impl TryFrom<String> for ContainerRef {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.split_once('$') {
            Some((name, id)) if !name.is_empty() && !id.is_empty() => Ok(Self::new(name, id)),
            _ => Err(ConfigError::ContainerRef(value)),
        }
    }
}

impl From<ContainerRef> for String {
    fn from(value: ContainerRef) -> Self {
        format!("{}${}", value.name, value.id)
    }
}

/// Host identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostIdentity {
    pub id: String,
    pub name: String,
}

impl Default for HostIdentity {
    fn default() -> Self {
        Self {
            id: "ServerID".to_string(),
            name: "ServerName".to_string(),
        }
    }
}

/// Static topology of the traced deployment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopologyConfig {
    /// Container ip → container identity
    #[serde(default)]
    pub ip_map: HashMap<String, ContainerRef>,

    /// Gateway ips
    #[serde(default)]
    pub gateways: HashSet<String>,

    /// Host ip used for socket normalisation
    #[serde(default)]
    pub host_ip: Option<String>,

    /// Container bridge ip
    #[serde(default)]
    pub cin0_ip: Option<String>,

    /// Identity stamped on every traced vertex
    #[serde(default)]
    pub local_host: HostIdentity,

    /// Pseudo container owning sockets outside the traced containers
    #[serde(default = "default_outer_container")]
    pub outer_container: ContainerRef,

    /// Paths under these prefixes collapse to the prefix
    #[serde(default = "default_collapse_prefixes")]
    pub collapse_prefixes: Vec<String>,
}

fn default_outer_container() -> ContainerRef {
    ContainerRef::new("OuterContainerName", "OuterContainerID")
}

fn default_collapse_prefixes() -> Vec<String> {
    vec!["/home/app/node_modules".to_string()]
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            ip_map: HashMap::new(),
            gateways: HashSet::new(),
            host_ip: None,
            cin0_ip: None,
            local_host: HostIdentity::default(),
            outer_container: default_outer_container(),
            collapse_prefixes: default_collapse_prefixes(),
        }
    }
}

impl TopologyConfig {
    pub fn container_for(&self, ip: &str) -> Option<&ContainerRef> {
        self.ip_map.get(ip)
    }

    pub fn is_container_ip(&self, ip: &str) -> bool {
        self.ip_map.contains_key(ip)
    }

    pub fn is_gateway(&self, ip: &str) -> bool {
        self.gateways.contains(ip)
    }

    /// Replace a path under a collapse prefix by the prefix itself
    pub fn collapse_path<'a>(&'a self, path: &'a str) -> &'a str {
        self.collapse_prefixes
            .iter()
            .find(|prefix| path.starts_with(prefix.as_str()))
            .map(String::as_str)
            .unwrap_or(path)
    }
}

/// Trace line settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceConfig {
    /// Offset of the tracer's wall clock from UTC
    #[serde(default = "default_utc_offset")]
    pub utc_offset_seconds: i32,
}

fn default_utc_offset() -> i32 {
    8 * 3600
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self { utc_offset_seconds: default_utc_offset() }
    }
}

/// Graph builder defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TraversalConfig {
    /// Level bound, unbounded when absent
    #[serde(default)]
    pub max_depth: Option<usize>,

    /// Enforce time-ordered traversal
    #[serde(default)]
    pub time_filter: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = TraceGraphConfig::default();
        assert_eq!(config.ingest.workers, 10);
        assert_eq!(config.ingest.queue_capacity, 1000);
        assert!(!config.ingest.repeat);
        assert_eq!(config.trace.utc_offset_seconds, 28_800);
        assert_eq!(config.topology.local_host.id, "ServerID");
        assert_eq!(config.topology.outer_container.id, "OuterContainerID");
        assert_eq!(config.traversal.max_depth, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_falls_back_to_defaults() {
        let yaml = r#"
ingest:
  workers: 4
topology:
  ip_map:
    "10.62.0.3": "hello$c0ffee"
  gateways: ["10.62.0.1"]
  host_ip: "192.168.1.10"
"#;
        let config = TraceGraphConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.ingest.workers, 4);
        assert_eq!(config.ingest.queue_capacity, 1000);
        assert_eq!(
            config.topology.container_for("10.62.0.3"),
            Some(&ContainerRef::new("hello", "c0ffee"))
        );
        assert!(config.topology.is_gateway("10.62.0.1"));
        assert_eq!(config.topology.host_ip.as_deref(), Some("192.168.1.10"));
        assert_eq!(config.topology.collapse_prefixes, vec!["/home/app/node_modules"]);
        assert_eq!(config.database, DatabaseConfig::default());
    }

    #[test]
    fn test_bad_container_ref() {
        let yaml = "topology:\n  ip_map:\n    \"10.0.0.1\": \"no-separator\"\n";
        assert!(TraceGraphConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let yaml = "ingest:\n  workers: 0\n";
        let err = TraceGraphConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_yaml_round_trip_through_file() {
        let mut config = TraceGraphConfig::default();
        config
            .topology
            .ip_map
            .insert("10.62.0.5".into(), ContainerRef::new("fn", "abc"));
        config.traversal.max_depth = Some(3);

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(config.to_yaml_string().unwrap().as_bytes()).unwrap();

        let loaded = TraceGraphConfig::load(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file() {
        let err = TraceGraphConfig::load("/nonexistent/tracegraph.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_collapse_path() {
        let topology = TopologyConfig::default();
        assert_eq!(
            topology.collapse_path("/home/app/node_modules/express/index.js"),
            "/home/app/node_modules"
        );
        assert_eq!(topology.collapse_path("/etc/hosts"), "/etc/hosts");
    }
}
