//! # Provenance Graph
//!
//! Arena multigraph produced by the builder. Nodes are addressed by petgraph
//! indices and located by the `RecordLoc` of the row they were loaded from.

use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracegraph_core::model::{EdgeTable, RecordLoc, Vertex, VertexKind};

use crate::traversal::PassStats;

/// A vertex loaded into the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub loc: RecordLoc,
    pub vertex: Vertex,
}

impl GraphNode {
    pub fn new(loc: RecordLoc, vertex: Vertex) -> Self {
        Self { loc, vertex }
    }

    pub fn kind(&self) -> VertexKind {
        self.vertex.kind()
    }

    pub fn label(&self) -> String {
        self.vertex.label()
    }

    pub fn category(&self) -> String {
        self.vertex.placement().category()
    }

    pub fn symbol(&self) -> &'static str {
        self.kind().symbol()
    }
}

/// A persisted edge row materialised in causal order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub relation: String,
    /// microseconds since epoch
    pub timestamp: i64,
    pub uuid: String,
    /// Reserved for an interest score, always 0
    pub weight: f64,
    pub table: EdgeTable,
    pub row_id: i64,
}

impl GraphEdge {
    pub fn info(&self) -> String {
        format!(
            "table:{}\nrow:{}\nrelation:{}\ntime:{}\nuuid:{}",
            self.table.table(),
            self.row_id,
            self.relation,
            self.timestamp,
            self.uuid
        )
    }
}

/// Weighted directed multigraph rooted at one vertex
#[derive(Debug, Clone)]
pub struct ProvenanceGraph {
    graph: StableDiGraph<GraphNode, GraphEdge>,
    index: HashMap<RecordLoc, NodeIndex>,
    root: NodeIndex,
    passes: Vec<PassStats>,
}

impl ProvenanceGraph {
    pub fn new(root: GraphNode) -> Self {
        let mut graph = StableDiGraph::new();
        let loc = root.loc;
        let root = graph.add_node(root);
        let mut index = HashMap::new();
        index.insert(loc, root);
        Self {
            graph,
            index,
            root,
            passes: Vec::new(),
        }
    }

    pub fn root(&self) -> &GraphNode {
        &self.graph[self.root]
    }

    pub fn root_index(&self) -> NodeIndex {
        self.root
    }

    pub fn contains(&self, loc: &RecordLoc) -> bool {
        self.index.contains_key(loc)
    }

    pub fn node_index(&self, loc: &RecordLoc) -> Option<NodeIndex> {
        self.index.get(loc).copied()
    }

    pub fn node(&self, loc: &RecordLoc) -> Option<&GraphNode> {
        self.node_index(loc).and_then(|idx| self.graph.node_weight(idx))
    }

    /// Add a node, returning the existing index when its row is already loaded
    pub fn add_node(&mut self, node: GraphNode) -> NodeIndex {
        if let Some(idx) = self.index.get(&node.loc) {
            return *idx;
        }
        let loc = node.loc;
        let idx = self.graph.add_node(node);
        self.index.insert(loc, idx);
        idx
    }

    /// Add an edge between two loaded rows.
    ///
    /// # Panics
    ///
    /// Panics when either endpoint has no node; traversal always loads a
    /// vertex before linking it.
    pub fn add_edge(&mut self, from: RecordLoc, to: RecordLoc, edge: GraphEdge) -> EdgeIndex {
        let a = match self.index.get(&from) {
            Some(idx) => *idx,
            None => panic!("edge {} references unmapped vertex {}", edge.row_id, from),
        };
        let b = match self.index.get(&to) {
            Some(idx) => *idx,
            None => panic!("edge {} references unmapped vertex {}", edge.row_id, to),
        };
        self.graph.add_edge(a, b, edge)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &GraphNode)> + '_ {
        self.graph.node_indices().map(move |idx| (idx, &self.graph[idx]))
    }

    /// Edges in insertion order as (from, to, edge)
    pub fn edges(&self) -> impl Iterator<Item = (&GraphNode, &GraphNode, &GraphEdge)> + '_ {
        self.graph.edge_indices().filter_map(move |idx| {
            let (a, b) = self.graph.edge_endpoints(idx)?;
            Some((&self.graph[a], &self.graph[b], &self.graph[idx]))
        })
    }

    /// Whether an edge from `from` to `to` with the given relation exists
    pub fn has_edge(&self, from: &RecordLoc, to: &RecordLoc, relation: &str) -> bool {
        self.edges()
            .any(|(a, b, e)| a.loc == *from && b.loc == *to && e.relation == relation)
    }

    pub fn inner(&self) -> &StableDiGraph<GraphNode, GraphEdge> {
        &self.graph
    }

    pub fn passes(&self) -> &[PassStats] {
        &self.passes
    }

    pub(crate) fn record_pass(&mut self, stats: PassStats) {
        self.passes.push(stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracegraph_core::model::{FileVertex, Placement, ProcessVertex};

    fn process_node(id: i64) -> GraphNode {
        GraphNode::new(
            RecordLoc::new(VertexKind::Process, id),
            Vertex::Process(ProcessVertex {
                placement: Placement::new("h", "host", "c", "app"),
                vpid: id.to_string(),
                name: "node".into(),
                exe_path: "node".into(),
            }),
        )
    }

    fn file_node(id: i64) -> GraphNode {
        GraphNode::new(
            RecordLoc::new(VertexKind::File, id),
            Vertex::File(FileVertex {
                placement: Placement::new("h", "host", "c", "app"),
                path: format!("/tmp/{}", id),
            }),
        )
    }

    fn edge(row_id: i64) -> GraphEdge {
        GraphEdge {
            relation: "write".into(),
            timestamp: 10,
            uuid: "unknown".into(),
            weight: 0.0,
            table: EdgeTable::Event,
            row_id,
        }
    }

    #[test]
    fn test_nodes_deduplicated_by_location() {
        let mut graph = ProvenanceGraph::new(process_node(1));
        let a = graph.add_node(file_node(1));
        let b = graph.add_node(file_node(1));
        assert_eq!(a, b);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.root().kind(), VertexKind::Process);
    }

    #[test]
    fn test_parallel_edges_stay_distinct() {
        let mut graph = ProvenanceGraph::new(process_node(1));
        graph.add_node(file_node(1));
        let p = RecordLoc::new(VertexKind::Process, 1);
        let f = RecordLoc::new(VertexKind::File, 1);
        graph.add_edge(p, f, edge(1));
        graph.add_edge(p, f, edge(2));
        assert_eq!(graph.edge_count(), 2);
        assert!(graph.has_edge(&p, &f, "write"));
        assert!(!graph.has_edge(&f, &p, "write"));
    }

    #[test]
    #[should_panic(expected = "unmapped vertex")]
    fn test_unmapped_endpoint_panics() {
        let mut graph = ProvenanceGraph::new(process_node(1));
        graph.add_edge(
            RecordLoc::new(VertexKind::Process, 1),
            RecordLoc::new(VertexKind::File, 9),
            edge(1),
        );
    }
}
