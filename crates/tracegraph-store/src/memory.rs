//! In-process store with natural-key and per-endpoint indexes

use crate::store::{EdgeEnd, ProvenanceStore, StoreError, StoreStatistics};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use tracegraph_core::model::{
    EdgeClass, EventEdge, NetEdge, RecordLoc, StoredEvent, StoredNet, Vertex, VertexKey, VertexKind,
};

#[derive(Debug, Default)]
struct Tables {
    /// Rows per kind; id = position + 1
    vertices: HashMap<VertexKind, Vec<Vertex>>,
    keys: HashMap<VertexKey, i64>,
    events: Vec<StoredEvent>,
    nets: Vec<StoredNet>,
    /// (endpoint kind, vertex id) → event positions
    events_by_src: HashMap<(VertexKind, i64), Vec<usize>>,
    events_by_dst: HashMap<(VertexKind, i64), Vec<usize>>,
    nets_by_src: HashMap<i64, Vec<usize>>,
    nets_by_dst: HashMap<i64, Vec<usize>>,
}

/// Store kept entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProvenanceStore for MemoryStore {
    async fn insert_vertex(&self, vertex: &Vertex) -> Result<i64, StoreError> {
        let mut tables = self.tables.write().await;
        let key = vertex.key();
        if tables.keys.contains_key(&key) {
            return Err(StoreError::DuplicateVertex { kind: vertex.kind(), key });
        }
        let rows = tables.vertices.entry(vertex.kind()).or_default();
        rows.push(vertex.clone());
        let id = rows.len() as i64;
        tables.keys.insert(key, id);
        Ok(id)
    }

    async fn find_vertex_id(&self, key: &VertexKey) -> Result<Option<i64>, StoreError> {
        Ok(self.tables.read().await.keys.get(key).copied())
    }

    async fn get_vertex(&self, loc: RecordLoc) -> Result<Option<Vertex>, StoreError> {
        let tables = self.tables.read().await;
        let vertex = usize::try_from(loc.key - 1)
            .ok()
            .and_then(|pos| tables.vertices.get(&loc.kind)?.get(pos).cloned());
        Ok(vertex)
    }

    async fn event_exists(&self, src_id: i64, dst_id: i64, edge: &EventEdge) -> Result<bool, StoreError> {
        let tables = self.tables.read().await;
        let (src_kind, _) = edge.class.endpoints();
        let exists = tables
            .events_by_src
            .get(&(src_kind, src_id))
            .map(|positions| {
                positions.iter().any(|&pos| {
                    let row = &tables.events[pos];
                    row.dst_id == dst_id
                        && row.edge.class == edge.class
                        && row.edge.operation == edge.operation
                        && row.edge.uuid == edge.uuid
                })
            })
            .unwrap_or(false);
        Ok(exists)
    }

    async fn insert_event(&self, src_id: i64, dst_id: i64, edge: &EventEdge) -> Result<i64, StoreError> {
        let mut tables = self.tables.write().await;
        let pos = tables.events.len();
        let id = pos as i64 + 1;
        tables.events.push(StoredEvent {
            id,
            src_id,
            dst_id,
            edge: edge.clone(),
        });
        let (src_kind, dst_kind) = edge.class.endpoints();
        tables.events_by_src.entry((src_kind, src_id)).or_default().push(pos);
        tables.events_by_dst.entry((dst_kind, dst_id)).or_default().push(pos);
        Ok(id)
    }

    async fn insert_net(&self, src_id: i64, dst_id: i64, edge: &NetEdge) -> Result<i64, StoreError> {
        let mut tables = self.tables.write().await;
        let pos = tables.nets.len();
        let id = pos as i64 + 1;
        tables.nets.push(StoredNet {
            id,
            src_id,
            dst_id,
            edge: edge.clone(),
        });
        tables.nets_by_src.entry(src_id).or_default().push(pos);
        tables.nets_by_dst.entry(dst_id).or_default().push(pos);
        Ok(id)
    }

    async fn fetch_events(
        &self,
        vertex_id: i64,
        end: EdgeEnd,
        classes: &[EdgeClass],
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let tables = self.tables.read().await;
        let index = match end {
            EdgeEnd::Src => &tables.events_by_src,
            EdgeEnd::Dst => &tables.events_by_dst,
        };

        let mut positions = BTreeSet::new();
        for class in classes {
            let (src_kind, dst_kind) = class.endpoints();
            let kind = match end {
                EdgeEnd::Src => src_kind,
                EdgeEnd::Dst => dst_kind,
            };
            if let Some(found) = index.get(&(kind, vertex_id)) {
                positions.extend(
                    found
                        .iter()
                        .copied()
                        .filter(|&pos| tables.events[pos].edge.class == *class),
                );
            }
        }
        Ok(positions.into_iter().map(|pos| tables.events[pos].clone()).collect())
    }

    async fn fetch_nets(&self, socket_id: i64, end: EdgeEnd) -> Result<Vec<StoredNet>, StoreError> {
        let tables = self.tables.read().await;
        let index = match end {
            EdgeEnd::Src => &tables.nets_by_src,
            EdgeEnd::Dst => &tables.nets_by_dst,
        };
        Ok(index
            .get(&socket_id)
            .map(|positions| positions.iter().map(|&pos| tables.nets[pos].clone()).collect())
            .unwrap_or_default())
    }

    async fn statistics(&self) -> Result<StoreStatistics, StoreError> {
        let tables = self.tables.read().await;
        let count = |kind| tables.vertices.get(&kind).map(|rows| rows.len() as u64).unwrap_or(0);
        Ok(StoreStatistics {
            processes: count(VertexKind::Process),
            files: count(VertexKind::File),
            sockets: count(VertexKind::Socket),
            events: tables.events.len() as u64,
            nets: tables.nets.len() as u64,
        })
    }
}
