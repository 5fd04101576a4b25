//! # Graph Export
//!
//! Renders a `ProvenanceGraph` for consumers: a JSON view grouped by
//! host/container, or Graphviz DOT text with one cluster per container.

use petgraph::stable_graph::NodeIndex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracegraph_core::model::{correlation_ids, EdgeTable, VertexKind};

use crate::graph::{GraphEdge, GraphNode, ProvenanceGraph};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewNode {
    pub id: String,
    pub name: String,
    /// Index into `GraphView::categories`
    pub category: usize,
    pub symbol: String,
    pub info: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewLink {
    pub source: String,
    pub target: String,
    pub name: String,
    pub info: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewStats {
    pub host_num: usize,
    pub container_num: usize,
    pub process_num: usize,
    pub file_num: usize,
    pub socket_num: usize,
    pub event_num: usize,
    pub net_num: usize,
    pub relation_num: usize,
}

/// Serializable view of a provenance graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphView {
    pub nodes: Vec<ViewNode>,
    pub links: Vec<ViewLink>,
    pub categories: Vec<Category>,
    pub stats: ViewStats,
    /// Link count per relation label
    pub relations: BTreeMap<String, usize>,
}

fn carries_uuid(edge: &GraphEdge, uuid: &str) -> bool {
    correlation_ids(&edge.uuid).any(|id| id == uuid)
}

/// Node indices and edges kept by an optional correlation-id filter
fn select<'a>(
    graph: &'a ProvenanceGraph,
    uuid: Option<&str>,
) -> (Vec<(NodeIndex, &'a GraphNode)>, Vec<(&'a GraphNode, &'a GraphNode, &'a GraphEdge)>) {
    let edges: Vec<_> = graph
        .edges()
        .filter(|(_, _, edge)| uuid.map_or(true, |id| carries_uuid(edge, id)))
        .collect();

    let nodes = match uuid {
        None => graph.nodes().collect(),
        Some(_) => {
            let touched: BTreeSet<_> = edges.iter().flat_map(|(a, b, _)| [a.loc, b.loc]).collect();
            graph.nodes().filter(|(_, node)| touched.contains(&node.loc)).collect()
        }
    };
    (nodes, edges)
}

impl GraphView {
    /// Build the view, keeping only edges carrying `uuid` when given
    pub fn from_graph(graph: &ProvenanceGraph, uuid: Option<&str>) -> Self {
        let (nodes, edges) = select(graph, uuid);
        let mut view = GraphView::default();
        let mut category_index: HashMap<String, usize> = HashMap::new();
        let mut hosts = BTreeSet::new();

        for (_, node) in nodes {
            let name = node.category();
            let category = *category_index.entry(name.clone()).or_insert_with(|| {
                view.categories.push(Category { name });
                view.categories.len() - 1
            });
            hosts.insert(node.vertex.placement().host_id.clone());
            match node.kind() {
                VertexKind::Process => view.stats.process_num += 1,
                VertexKind::File => view.stats.file_num += 1,
                VertexKind::Socket => view.stats.socket_num += 1,
            }
            view.nodes.push(ViewNode {
                id: node.vertex.link_id(),
                name: node.label(),
                category,
                symbol: node.symbol().to_string(),
                info: node.vertex.info(),
            });
        }

        for (from, to, edge) in edges {
            match edge.table {
                EdgeTable::Event => view.stats.event_num += 1,
                EdgeTable::Net => view.stats.net_num += 1,
            }
            *view.relations.entry(edge.relation.clone()).or_insert(0) += 1;
            view.links.push(ViewLink {
                source: from.vertex.link_id(),
                target: to.vertex.link_id(),
                name: edge.relation.clone(),
                info: edge.info(),
            });
        }

        view.stats.host_num = hosts.len();
        view.stats.container_num = view.categories.len();
        view.stats.relation_num = view.relations.len();
        view
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Graphviz rendering of a provenance graph
pub struct Dot<'a> {
    graph: &'a ProvenanceGraph,
    uuid: Option<&'a str>,
}

impl<'a> Dot<'a> {
    pub fn new(graph: &'a ProvenanceGraph) -> Self {
        Self { graph, uuid: None }
    }

    pub fn with_uuid(mut self, uuid: &'a str) -> Self {
        self.uuid = Some(uuid);
        self
    }
}

impl fmt::Display for Dot<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (nodes, edges) = select(self.graph, self.uuid);

        let mut clusters: BTreeMap<String, Vec<&GraphNode>> = BTreeMap::new();
        for (_, node) in nodes {
            clusters.entry(node.category()).or_default().push(node);
        }

        writeln!(f, "digraph provenance {{")?;
        for (i, (category, members)) in clusters.iter().enumerate() {
            writeln!(f, "  subgraph cluster_{} {{", i)?;
            writeln!(f, "    label={};", quote(category))?;
            for node in members {
                writeln!(
                    f,
                    "    {} [label={}, shape={}];",
                    quote(&node.vertex.link_id()),
                    quote(&node.label()),
                    node.kind().shape()
                )?;
            }
            writeln!(f, "  }}")?;
        }
        for (from, to, edge) in edges {
            writeln!(
                f,
                "  {} -> {} [label={}];",
                quote(&from.vertex.link_id()),
                quote(&to.vertex.link_id()),
                quote(&edge.relation)
            )?;
        }
        writeln!(f, "}}")
    }
}

pub fn to_dot(graph: &ProvenanceGraph, uuid: Option<&str>) -> String {
    let dot = Dot::new(graph);
    match uuid {
        Some(id) => dot.with_uuid(id).to_string(),
        None => dot.to_string(),
    }
}
