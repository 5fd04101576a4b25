//! Backend selection for the provenance store

use crate::adapter::SqliteStore;
use crate::memory::MemoryStore;
use crate::store::{ProvenanceStore, StoreError};
use std::sync::Arc;
use tracegraph_core::config::DatabaseConfig;
use tracing::info;

/// Store backend types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-memory only, lost on exit
    Memory,
    /// SQLite file or `sqlite::memory:` url
    Sqlite { url: String, max_connections: u32 },
}

impl StoreBackend {
    /// `memory` selects the in-process store, `sqlite:` urls the SQLite adapter
    pub fn from_url(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        if url == "memory" {
            Ok(StoreBackend::Memory)
        } else if url.starts_with("sqlite:") {
            Ok(StoreBackend::Sqlite {
                url: url.to_string(),
                max_connections,
            })
        } else {
            Err(StoreError::UnsupportedBackend(url.to_string()))
        }
    }

    pub fn from_config(config: &DatabaseConfig) -> Result<Self, StoreError> {
        Self::from_url(&config.url, config.max_connections)
    }
}

/// Open the store behind a backend
pub async fn open_store(backend: &StoreBackend) -> Result<Arc<dyn ProvenanceStore>, StoreError> {
    match backend {
        StoreBackend::Memory => {
            info!("Using in-memory provenance store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Sqlite { url, max_connections } => {
            info!("Opening SQLite provenance store at {}", url);
            let store = SqliteStore::connect(url, *max_connections).await?;
            Ok(Arc::new(store))
        }
    }
}
