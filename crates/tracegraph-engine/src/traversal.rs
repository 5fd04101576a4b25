//! # Traversal
//!
//! One breadth-first pass over the store in a single causal direction.
//! Passes share the graph's node map but keep their own frontier, visited
//! set, propagated times and per-table edge dedup sets.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::time::Instant;
use tracegraph_core::model::{EdgeClass, EdgeTable, RecordLoc, VertexKind};
use tracegraph_store::{EdgeEnd, ProvenanceStore};
use tracing::{debug, info, warn};

use crate::graph::{GraphEdge, GraphNode, ProvenanceGraph};

/// Causal direction of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraversalDirection {
    /// What the root affected
    Forward,
    /// What caused the root
    Backward,
}

impl TraversalDirection {
    /// Column the current vertex is matched on
    pub fn end(&self) -> EdgeEnd {
        match self {
            TraversalDirection::Forward => EdgeEnd::Src,
            TraversalDirection::Backward => EdgeEnd::Dst,
        }
    }

    /// Event classes a vertex of `kind` can be expanded through
    pub fn eligible_classes(&self, kind: VertexKind) -> &'static [EdgeClass] {
        match (self, kind) {
            (TraversalDirection::Forward, VertexKind::Process) => {
                &[EdgeClass::Process, EdgeClass::FileV1, EdgeClass::NetworkV1]
            }
            (TraversalDirection::Forward, VertexKind::File) => &[EdgeClass::FileV2],
            (TraversalDirection::Forward, VertexKind::Socket) => &[EdgeClass::NetworkV2],
            (TraversalDirection::Backward, VertexKind::Process) => {
                &[EdgeClass::Process, EdgeClass::FileV2, EdgeClass::NetworkV2]
            }
            (TraversalDirection::Backward, VertexKind::File) => &[EdgeClass::FileV1],
            (TraversalDirection::Backward, VertexKind::Socket) => &[EdgeClass::NetworkV1],
        }
    }

    /// Kind of the vertex reached through an edge of `class`
    pub fn far_kind(&self, class: EdgeClass) -> VertexKind {
        let (src, dst) = class.endpoints();
        match self {
            TraversalDirection::Forward => dst,
            TraversalDirection::Backward => src,
        }
    }

    /// Whether an edge at `edge_time` may follow a vertex at `current`
    pub fn admits(&self, current: Option<i64>, edge_time: i64) -> bool {
        match (self, current) {
            (_, None) => true,
            (TraversalDirection::Forward, Some(t)) => t <= edge_time,
            (TraversalDirection::Backward, Some(t)) => t >= edge_time,
        }
    }

    /// Narrow a revisited vertex's time by another admitted edge
    pub fn tighten(&self, current: i64, edge_time: i64) -> i64 {
        match self {
            TraversalDirection::Forward => current.min(edge_time),
            TraversalDirection::Backward => current.max(edge_time),
        }
    }

    /// (from, to) of the materialised edge
    pub fn orient(&self, current: RecordLoc, far: RecordLoc) -> (RecordLoc, RecordLoc) {
        match self {
            TraversalDirection::Forward => (current, far),
            TraversalDirection::Backward => (far, current),
        }
    }
}

impl fmt::Display for TraversalDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraversalDirection::Forward => write!(f, "forward"),
            TraversalDirection::Backward => write!(f, "backward"),
        }
    }
}

/// Bounds of one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassOptions {
    pub max_depth: Option<usize>,
    pub time_filter: bool,
    pub seed_time: Option<i64>,
}

/// Counters for one pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassStats {
    pub direction: TraversalDirection,
    pub levels: usize,
    pub expanded: usize,
    pub nodes_added: usize,
    pub edges_added: usize,
    pub filtered: usize,
    pub skipped: usize,
    pub elapsed_ms: u128,
}

impl PassStats {
    fn new(direction: TraversalDirection) -> Self {
        Self {
            direction,
            levels: 0,
            expanded: 0,
            nodes_added: 0,
            edges_added: 0,
            filtered: 0,
            skipped: 0,
            elapsed_ms: 0,
        }
    }
}

/// An edge row seen from the vertex being expanded
#[derive(Debug, Clone)]
struct Step {
    table: EdgeTable,
    row_id: i64,
    far: RecordLoc,
    relation: String,
    time: i64,
    uuid: String,
}

async fn fetch_steps(
    store: &dyn ProvenanceStore,
    current: RecordLoc,
    direction: TraversalDirection,
) -> Option<Vec<Step>> {
    let end = direction.end();
    let classes = direction.eligible_classes(current.kind);

    let events = match store.fetch_events(current.key, end, classes).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!("Skipping {} in {} pass, event fetch failed: {}", current, direction, e);
            return None;
        }
    };

    let mut steps: Vec<Step> = events
        .into_iter()
        .map(|row| {
            let far_id = match direction {
                TraversalDirection::Forward => row.dst_id,
                TraversalDirection::Backward => row.src_id,
            };
            Step {
                table: EdgeTable::Event,
                row_id: row.id,
                far: RecordLoc::new(direction.far_kind(row.edge.class), far_id),
                relation: row.edge.relation,
                time: row.edge.time,
                uuid: row.edge.uuid,
            }
        })
        .collect();

    if current.kind == VertexKind::Socket {
        match store.fetch_nets(current.key, end).await {
            Ok(rows) => steps.extend(rows.into_iter().map(|row| {
                let far_id = match direction {
                    TraversalDirection::Forward => row.dst_id,
                    TraversalDirection::Backward => row.src_id,
                };
                Step {
                    table: EdgeTable::Net,
                    row_id: row.id,
                    far: RecordLoc::new(VertexKind::Socket, far_id),
                    relation: row.edge.method,
                    time: row.edge.time,
                    uuid: row.edge.uuid,
                }
            })),
            Err(e) => {
                warn!("Skipping {} in {} pass, net fetch failed: {}", current, direction, e);
                return None;
            }
        }
    }
    Some(steps)
}

/// Load a vertex into the graph unless it is already there
async fn ensure_node(store: &dyn ProvenanceStore, graph: &mut ProvenanceGraph, loc: RecordLoc) -> Option<bool> {
    if graph.contains(&loc) {
        return Some(false);
    }
    match store.get_vertex(loc).await {
        Ok(Some(vertex)) => {
            graph.add_node(GraphNode::new(loc, vertex));
            Some(true)
        }
        Ok(None) => {
            warn!("Vertex {} referenced by an edge does not exist", loc);
            None
        }
        Err(e) => {
            warn!("Failed to load vertex {}: {}", loc, e);
            None
        }
    }
}

/// Run one pass from the graph's root, adding what it reaches to `graph`
pub async fn run_pass(
    store: &dyn ProvenanceStore,
    graph: &mut ProvenanceGraph,
    direction: TraversalDirection,
    options: PassOptions,
) -> PassStats {
    let started = Instant::now();
    let mut stats = PassStats::new(direction);
    let root = graph.root().loc;

    let mut visited: HashSet<RecordLoc> = HashSet::from([root]);
    let mut times: HashMap<RecordLoc, i64> = HashMap::new();
    if options.time_filter {
        if let Some(seed) = options.seed_time {
            times.insert(root, seed);
        }
    }
    let mut seen_events: HashSet<i64> = HashSet::new();
    let mut seen_nets: HashSet<i64> = HashSet::new();

    let mut frontier = VecDeque::from([root]);
    let mut level = 0usize;

    while !frontier.is_empty() {
        if options.max_depth.is_some_and(|max| level >= max) {
            break;
        }
        let mut next = VecDeque::new();

        while let Some(current) = frontier.pop_front() {
            stats.expanded += 1;
            let Some(steps) = fetch_steps(store, current, direction).await else {
                stats.skipped += 1;
                continue;
            };

            for step in steps {
                if options.time_filter && !direction.admits(times.get(&current).copied(), step.time) {
                    stats.filtered += 1;
                    continue;
                }

                if visited.contains(&step.far) {
                    if options.time_filter {
                        if let Some(t) = times.get_mut(&step.far) {
                            *t = direction.tighten(*t, step.time);
                        }
                    }
                } else {
                    match ensure_node(store, graph, step.far).await {
                        Some(added) => {
                            if added {
                                stats.nodes_added += 1;
                            }
                        }
                        None => {
                            stats.skipped += 1;
                            continue;
                        }
                    }
                    visited.insert(step.far);
                    if options.time_filter {
                        times.insert(step.far, step.time);
                    }
                    next.push_back(step.far);
                }

                let seen = match step.table {
                    EdgeTable::Event => &mut seen_events,
                    EdgeTable::Net => &mut seen_nets,
                };
                if seen.insert(step.row_id) {
                    let (from, to) = direction.orient(current, step.far);
                    graph.add_edge(
                        from,
                        to,
                        GraphEdge {
                            relation: step.relation,
                            timestamp: step.time,
                            uuid: step.uuid,
                            weight: 0.0,
                            table: step.table,
                            row_id: step.row_id,
                        },
                    );
                    stats.edges_added += 1;
                }
            }
        }

        level += 1;
        debug!("{} pass level {} done, {} queued", direction, level, next.len());
        frontier = next;
    }

    stats.levels = level;
    stats.elapsed_ms = started.elapsed().as_millis();
    info!(
        "{} pass from {}: {} levels, {} nodes and {} edges added, {} filtered, {} skipped in {} ms",
        direction,
        root,
        stats.levels,
        stats.nodes_added,
        stats.edges_added,
        stats.filtered,
        stats.skipped,
        stats.elapsed_ms
    );
    stats
}
