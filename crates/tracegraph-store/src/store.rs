//! Store boundary shared by the ingestion pipeline and the graph builder

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracegraph_core::model::{
    EdgeClass, EventEdge, NetEdge, RecordLoc, StoredEvent, StoredNet, Vertex, VertexKey, VertexKind,
};

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{kind} vertex already exists: {key}")]
    DuplicateVertex { kind: VertexKind, key: VertexKey },

    #[error("corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },

    #[error("unsupported store url: {0}")]
    UnsupportedBackend(String),
}

/// Which endpoint column an edge lookup matches on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeEnd {
    Src,
    Dst,
}

impl EdgeEnd {
    pub fn column(&self) -> &'static str {
        match self {
            EdgeEnd::Src => "src_id",
            EdgeEnd::Dst => "dst_id",
        }
    }
}

/// Row counts per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStatistics {
    pub processes: u64,
    pub files: u64,
    pub sockets: u64,
    pub events: u64,
    pub nets: u64,
}

impl StoreStatistics {
    pub fn vertices(&self) -> u64 {
        self.processes + self.files + self.sockets
    }

    pub fn edges(&self) -> u64 {
        self.events + self.nets
    }
}

/// Persistent provenance store
///
/// Vertex ids are unique per kind only; an edge's class tells which tables
/// its `src_id` and `dst_id` point into.
#[async_trait]
pub trait ProvenanceStore: Send + Sync {
    /// Insert a new vertex; fails if its natural key already exists
    async fn insert_vertex(&self, vertex: &Vertex) -> Result<i64, StoreError>;

    async fn find_vertex_id(&self, key: &VertexKey) -> Result<Option<i64>, StoreError>;

    async fn get_vertex(&self, loc: RecordLoc) -> Result<Option<Vertex>, StoreError>;

    /// Whether an identical (src, dst, class, operation, uuid) event row exists
    async fn event_exists(&self, src_id: i64, dst_id: i64, edge: &EventEdge) -> Result<bool, StoreError>;

    async fn insert_event(&self, src_id: i64, dst_id: i64, edge: &EventEdge) -> Result<i64, StoreError>;

    async fn insert_net(&self, src_id: i64, dst_id: i64, edge: &NetEdge) -> Result<i64, StoreError>;

    /// Event rows of the given classes whose `end` column equals `vertex_id`, ordered by id
    async fn fetch_events(
        &self,
        vertex_id: i64,
        end: EdgeEnd,
        classes: &[EdgeClass],
    ) -> Result<Vec<StoredEvent>, StoreError>;

    /// Net rows whose `end` column equals `socket_id`, ordered by id
    async fn fetch_nets(&self, socket_id: i64, end: EdgeEnd) -> Result<Vec<StoredNet>, StoreError>;

    async fn statistics(&self) -> Result<StoreStatistics, StoreError>;

    /// Insert, falling back to the existing row with the same natural key
    async fn upsert_vertex(&self, vertex: &Vertex) -> Result<i64, StoreError> {
        Ok(self.write_vertex(vertex).await?.0)
    }

    /// Like `upsert_vertex`, also reporting whether this call created the row
    async fn write_vertex(&self, vertex: &Vertex) -> Result<(i64, bool), StoreError> {
        match self.insert_vertex(vertex).await {
            Ok(id) => Ok((id, true)),
            Err(insert_err) => match self.find_vertex_id(&vertex.key()).await? {
                Some(id) => Ok((id, false)),
                None => Err(insert_err),
            },
        }
    }
}
