//! # Tracegraph Engine
//!
//! Provenance graph construction over a tracegraph store.
//! Bidirectional breadth-first traversal bounded by depth and, optionally,
//! by time causality, plus JSON and Graphviz export of the result.

pub mod builder;
pub mod export;
pub mod graph;
pub mod traversal;

pub use builder::{EngineError, GraphBuilder, ProvenanceQuery};
pub use export::{to_dot, Dot, GraphView};
pub use graph::{GraphEdge, GraphNode, ProvenanceGraph};
pub use traversal::{run_pass, PassOptions, PassStats, TraversalDirection};
