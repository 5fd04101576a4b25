//! # Graph Builder
//!
//! Resolves a root vertex by natural key and grows a provenance graph
//! around it: a forward pass, then a backward pass over the same node map.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracegraph_core::config::TraversalConfig;
use tracegraph_core::model::{RecordLoc, VertexKey};
use tracegraph_store::{ProvenanceStore, StoreError};
use tracing::info;

use crate::graph::{GraphNode, ProvenanceGraph};
use crate::traversal::{run_pass, PassOptions, TraversalDirection};

/// Graph builder errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("root vertex not found: {0}")]
    RootNotFound(VertexKey),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Which subgraph to build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceQuery {
    pub root: VertexKey,
    /// Propagated time of the root when the time filter is on
    pub seed_time: Option<i64>,
    pub max_depth: Option<usize>,
    pub time_filter: bool,
}

impl ProvenanceQuery {
    pub fn new(root: VertexKey) -> Self {
        Self {
            root,
            seed_time: None,
            max_depth: None,
            time_filter: false,
        }
    }

    /// Query with the configured traversal defaults
    pub fn with_config(root: VertexKey, config: &TraversalConfig) -> Self {
        Self {
            root,
            seed_time: None,
            max_depth: config.max_depth,
            time_filter: config.time_filter,
        }
    }

    pub fn depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    pub fn time_filtered(mut self, seed_time: Option<i64>) -> Self {
        self.time_filter = true;
        self.seed_time = seed_time;
        self
    }

    fn pass_options(&self) -> PassOptions {
        PassOptions {
            max_depth: self.max_depth,
            time_filter: self.time_filter,
            seed_time: self.seed_time,
        }
    }
}

/// Builds provenance graphs from a shared read-only store handle
#[derive(Clone)]
pub struct GraphBuilder {
    store: Arc<dyn ProvenanceStore>,
}

impl GraphBuilder {
    pub fn new(store: Arc<dyn ProvenanceStore>) -> Self {
        Self { store }
    }

    async fn resolve_root(&self, key: &VertexKey) -> Result<GraphNode, EngineError> {
        let id = self
            .store
            .find_vertex_id(key)
            .await?
            .ok_or_else(|| EngineError::RootNotFound(key.clone()))?;
        let loc = RecordLoc::new(key.kind(), id);
        let vertex = self
            .store
            .get_vertex(loc)
            .await?
            .ok_or_else(|| EngineError::RootNotFound(key.clone()))?;
        Ok(GraphNode::new(loc, vertex))
    }

    pub async fn build(&self, query: &ProvenanceQuery) -> Result<ProvenanceGraph, EngineError> {
        let started = Instant::now();
        let root = self.resolve_root(&query.root).await?;
        info!("Building provenance graph from {} ({})", root.loc, root.label());

        let mut graph = ProvenanceGraph::new(root);
        let options = query.pass_options();
        for direction in [TraversalDirection::Forward, TraversalDirection::Backward] {
            let stats = run_pass(self.store.as_ref(), &mut graph, direction, options).await;
            graph.record_pass(stats);
        }

        info!(
            "Provenance graph built: {} nodes, {} edges in {} ms",
            graph.node_count(),
            graph.edge_count(),
            started.elapsed().as_millis()
        );
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::{HashMap, HashSet, VecDeque};
    use tracegraph_core::model::{
        EdgeClass, EventEdge, FileVertex, NetEdge, Placement, ProcessVertex, SocketVertex, Vertex, VertexKind,
        UNKNOWN,
    };
    use tracegraph_store::MemoryStore;

    fn placement() -> Placement {
        Placement::new("ServerID", "ServerName", "c1", "hello")
    }

    fn process(vpid: usize) -> Vertex {
        Vertex::Process(ProcessVertex {
            placement: placement(),
            vpid: vpid.to_string(),
            name: format!("p{}", vpid),
            exe_path: format!("/bin/p{}", vpid),
        })
    }

    fn file(path: &str) -> Vertex {
        Vertex::File(FileVertex { placement: placement(), path: path.into() })
    }

    fn socket(ip: &str) -> Vertex {
        Vertex::Socket(SocketVertex { placement: placement(), dst_ip: ip.into(), dst_port: "80".into() })
    }

    fn event(class: EdgeClass, relation: &str, time: i64) -> EventEdge {
        EventEdge {
            class,
            relation: relation.into(),
            operation: relation.into(),
            time,
            uuid: UNKNOWN.into(),
        }
    }

    fn loc(kind: VertexKind, id: i64) -> RecordLoc {
        RecordLoc::new(kind, id)
    }

    /// P1 --execve@100--> P2 --write@150--> F1
    async fn scenario() -> (Arc<MemoryStore>, i64, i64, i64) {
        let store = Arc::new(MemoryStore::new());
        let p1 = store.upsert_vertex(&process(1)).await.unwrap();
        let p2 = store.upsert_vertex(&process(2)).await.unwrap();
        let f1 = store.upsert_vertex(&file("/tmp/out")).await.unwrap();
        store.insert_event(p1, p2, &event(EdgeClass::Process, "execve", 100)).await.unwrap();
        store.insert_event(p2, f1, &event(EdgeClass::FileV1, "write", 150)).await.unwrap();
        (store, p1, p2, f1)
    }

    fn node_set(graph: &ProvenanceGraph) -> HashSet<RecordLoc> {
        graph.nodes().map(|(_, n)| n.loc).collect()
    }

    #[tokio::test]
    async fn test_forward_from_process() {
        let (store, p1, p2, f1) = scenario().await;
        let builder = GraphBuilder::new(store);
        let graph = builder.build(&ProvenanceQuery::new(process(1).key()).depth(2)).await.unwrap();

        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);
        assert!(graph.has_edge(&loc(VertexKind::Process, p1), &loc(VertexKind::Process, p2), "execve"));
        assert!(graph.has_edge(&loc(VertexKind::Process, p2), &loc(VertexKind::File, f1), "write"));
        assert!(graph.edges().all(|(_, _, e)| e.weight == 0.0));
    }

    #[tokio::test]
    async fn test_backward_from_file_keeps_orientation() {
        let (store, p1, p2, f1) = scenario().await;
        let builder = GraphBuilder::new(store);
        let graph = builder.build(&ProvenanceQuery::new(file("/tmp/out").key()).depth(2)).await.unwrap();

        assert_eq!(graph.root().loc, loc(VertexKind::File, f1));
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);
        assert!(graph.has_edge(&loc(VertexKind::Process, p1), &loc(VertexKind::Process, p2), "execve"));
        assert!(graph.has_edge(&loc(VertexKind::Process, p2), &loc(VertexKind::File, f1), "write"));
    }

    #[tokio::test]
    async fn test_depth_one_stops_at_neighbours() {
        let (store, _, _, f1) = scenario().await;
        let graph = GraphBuilder::new(store)
            .build(&ProvenanceQuery::new(process(1).key()).depth(1))
            .await
            .unwrap();
        assert_eq!(graph.node_count(), 2);
        assert!(!graph.contains(&loc(VertexKind::File, f1)));
        assert_eq!(graph.passes()[0].levels, 1);
    }

    #[tokio::test]
    async fn test_middle_process_reaches_both_sides() {
        let (store, _, _, _) = scenario().await;
        let graph = GraphBuilder::new(store)
            .build(&ProvenanceQuery::new(process(2).key()))
            .await
            .unwrap();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.passes()[0].direction, TraversalDirection::Forward);
        assert_eq!(graph.passes()[0].nodes_added, 1);
        assert_eq!(graph.passes()[1].nodes_added, 1);
    }

    #[tokio::test]
    async fn test_missing_root() {
        let (store, _, _, _) = scenario().await;
        let err = GraphBuilder::new(store)
            .build(&ProvenanceQuery::new(process(42).key()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RootNotFound(_)));
    }

    #[tokio::test]
    async fn test_time_filter_blocks_effects_before_cause() {
        let store = Arc::new(MemoryStore::new());
        let p1 = store.upsert_vertex(&process(1)).await.unwrap();
        let p2 = store.upsert_vertex(&process(2)).await.unwrap();
        let f1 = store.upsert_vertex(&file("/tmp/early")).await.unwrap();
        store.insert_event(p1, p2, &event(EdgeClass::Process, "execve", 200)).await.unwrap();
        store.insert_event(p2, f1, &event(EdgeClass::FileV1, "write", 100)).await.unwrap();
        let builder = GraphBuilder::new(store);

        let forward = builder
            .build(&ProvenanceQuery::new(process(1).key()).time_filtered(Some(0)))
            .await
            .unwrap();
        assert!(forward.contains(&loc(VertexKind::Process, p2)));
        assert!(!forward.contains(&loc(VertexKind::File, f1)));
        assert_eq!(forward.passes()[0].filtered, 1);

        let backward = builder
            .build(&ProvenanceQuery::new(file("/tmp/early").key()).time_filtered(None))
            .await
            .unwrap();
        assert!(backward.contains(&loc(VertexKind::Process, p2)));
        assert!(!backward.contains(&loc(VertexKind::Process, p1)));

        let unfiltered = builder.build(&ProvenanceQuery::new(process(1).key())).await.unwrap();
        assert_eq!(unfiltered.node_count(), 3);
    }

    #[tokio::test]
    async fn test_revisit_tightens_forward_time() {
        // P1 reaches P2 twice (t=300 then t=50); the tightened time 50 lets
        // the write at t=100 through.
        let store = Arc::new(MemoryStore::new());
        let p1 = store.upsert_vertex(&process(1)).await.unwrap();
        let p2 = store.upsert_vertex(&process(2)).await.unwrap();
        let f1 = store.upsert_vertex(&file("/tmp/x")).await.unwrap();
        store.insert_event(p1, p2, &event(EdgeClass::Process, "clone", 300)).await.unwrap();
        store.insert_event(p1, p2, &event(EdgeClass::Process, "execve", 50)).await.unwrap();
        store.insert_event(p2, f1, &event(EdgeClass::FileV1, "write", 100)).await.unwrap();

        let graph = GraphBuilder::new(store)
            .build(&ProvenanceQuery::new(process(1).key()).time_filtered(None))
            .await
            .unwrap();
        assert!(graph.contains(&loc(VertexKind::File, f1)));
        assert_eq!(graph.passes()[0].edges_added, 3);
    }

    #[tokio::test]
    async fn test_socket_expands_through_net_edges() {
        let store = Arc::new(MemoryStore::new());
        let p1 = store.upsert_vertex(&process(1)).await.unwrap();
        let s1 = store.upsert_vertex(&socket("10.0.0.1")).await.unwrap();
        let s2 = store.upsert_vertex(&socket("10.0.0.2")).await.unwrap();
        store.insert_event(p1, s1, &event(EdgeClass::NetworkV1, "sendto", 10)).await.unwrap();
        let packet = NetEdge {
            method: "GET".into(),
            payload: "GET / HTTP/1.1".into(),
            payload_len: 14,
            seq_num: 1,
            ack_num: 1,
            time: 20,
            uuid: "req-1".into(),
        };
        store.insert_net(s1, s2, &packet).await.unwrap();
        store.insert_net(s1, s2, &packet).await.unwrap();

        let graph = GraphBuilder::new(store)
            .build(&ProvenanceQuery::new(process(1).key()))
            .await
            .unwrap();
        assert!(graph.contains(&loc(VertexKind::Socket, s2)));
        assert!(graph.has_edge(&loc(VertexKind::Socket, s1), &loc(VertexKind::Socket, s2), "GET"));
        // two rows, two parallel edges
        assert_eq!(graph.passes()[0].edges_added, 3);
    }

    #[tokio::test]
    async fn test_root_never_readded() {
        // a cycle back to the root
        let store = Arc::new(MemoryStore::new());
        let p1 = store.upsert_vertex(&process(1)).await.unwrap();
        let p2 = store.upsert_vertex(&process(2)).await.unwrap();
        store.insert_event(p1, p2, &event(EdgeClass::Process, "clone", 1)).await.unwrap();
        store.insert_event(p2, p1, &event(EdgeClass::Process, "kill", 2)).await.unwrap();

        let graph = GraphBuilder::new(store)
            .build(&ProvenanceQuery::new(process(1).key()))
            .await
            .unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.nodes().filter(|(_, n)| n.loc == loc(VertexKind::Process, p1)).count(), 1);
        assert!(graph.passes().iter().all(|p| p.nodes_added <= 1));
    }

    /// Hop distances from `root` following `adjacency`
    fn reach(adjacency: &HashMap<usize, Vec<usize>>, root: usize, depth: usize) -> HashSet<usize> {
        let mut seen = HashSet::from([root]);
        let mut queue = VecDeque::from([(root, 0usize)]);
        while let Some((v, d)) = queue.pop_front() {
            if d == depth {
                continue;
            }
            for &w in adjacency.get(&v).into_iter().flatten() {
                if seen.insert(w) {
                    queue.push_back((w, d + 1));
                }
            }
        }
        seen
    }

    proptest! {
        #[test]
        fn prop_depth_bound(
            edges in proptest::collection::vec((0usize..8, 0usize..8), 0..20),
            depth in 0usize..4,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let store = Arc::new(MemoryStore::new());
                let mut ids = Vec::new();
                for v in 0..8 {
                    ids.push(store.upsert_vertex(&process(v)).await.unwrap());
                }
                let mut out: HashMap<usize, Vec<usize>> = HashMap::new();
                let mut inc: HashMap<usize, Vec<usize>> = HashMap::new();
                for (i, (a, b)) in edges.iter().enumerate() {
                    store
                        .insert_event(ids[*a], ids[*b], &event(EdgeClass::Process, "clone", i as i64))
                        .await
                        .unwrap();
                    out.entry(*a).or_default().push(*b);
                    inc.entry(*b).or_default().push(*a);
                }

                let graph = GraphBuilder::new(store)
                    .build(&ProvenanceQuery::new(process(0).key()).depth(depth))
                    .await
                    .unwrap();

                let expected: HashSet<RecordLoc> = reach(&out, 0, depth)
                    .union(&reach(&inc, 0, depth))
                    .map(|v| loc(VertexKind::Process, ids[*v]))
                    .collect();
                assert_eq!(node_set(&graph), expected);
            });
        }

        #[test]
        fn prop_forward_edges_respect_causality(times in proptest::collection::vec(0i64..50, 1..8)) {
            // a chain P0 -> P1 -> ... with arbitrary edge times
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let store = Arc::new(MemoryStore::new());
                let mut ids = Vec::new();
                for v in 0..=times.len() {
                    ids.push(store.upsert_vertex(&process(v)).await.unwrap());
                }
                for (i, t) in times.iter().enumerate() {
                    store.insert_event(ids[i], ids[i + 1], &event(EdgeClass::Process, "clone", *t)).await.unwrap();
                }

                let graph = GraphBuilder::new(store)
                    .build(&ProvenanceQuery::new(process(0).key()).time_filtered(None))
                    .await
                    .unwrap();

                // the followed prefix is exactly the non-decreasing run of times
                let mut expected = 1;
                for (i, t) in times.iter().enumerate() {
                    if i > 0 && *t < times[i - 1] {
                        break;
                    }
                    expected += 1;
                }
                assert_eq!(graph.node_count(), expected);
                let edge_times: Vec<i64> = graph.edges().map(|(_, _, e)| e.timestamp).collect();
                assert!(edge_times.windows(2).all(|w| w[0] <= w[1]));
            });
        }

        #[test]
        fn prop_backward_edges_respect_causality(times in proptest::collection::vec(0i64..50, 1..8)) {
            // P0 <- P1 <- ... where P(i+1) spawned P(i) at times[i]
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let store = Arc::new(MemoryStore::new());
                let mut ids = Vec::new();
                for v in 0..=times.len() {
                    ids.push(store.upsert_vertex(&process(v)).await.unwrap());
                }
                for (i, t) in times.iter().enumerate() {
                    store.insert_event(ids[i + 1], ids[i], &event(EdgeClass::Process, "clone", *t)).await.unwrap();
                }

                let graph = GraphBuilder::new(store)
                    .build(&ProvenanceQuery::new(process(0).key()).time_filtered(None))
                    .await
                    .unwrap();

                // the followed prefix is exactly the non-increasing run of times
                let mut expected = 1;
                for (i, t) in times.iter().enumerate() {
                    if i > 0 && *t > times[i - 1] {
                        break;
                    }
                    expected += 1;
                }
                assert_eq!(graph.node_count(), expected);
                assert_eq!(graph.passes()[0].edges_added, 0);

                // each edge is no later than the edge that reached its head
                let mut bound: HashMap<RecordLoc, i64> = HashMap::new();
                for (from, to, edge) in graph.edges() {
                    if let Some(limit) = bound.get(&to.loc) {
                        assert!(edge.timestamp <= *limit);
                    }
                    bound.insert(from.loc, edge.timestamp);
                }
            });
        }
    }
}
