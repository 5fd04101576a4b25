//! # Tracegraph Store
//!
//! Persistence for provenance vertices and edges. Vertices are deduplicated
//! by natural key; event edges can be deduplicated by the caller through
//! `event_exists`; net edges are kept as observed.

pub mod adapter;
pub mod memory;
pub mod persistence;
pub mod store;

pub use adapter::SqliteStore;
pub use memory::MemoryStore;
pub use persistence::{open_store, StoreBackend};
pub use store::{EdgeEnd, ProvenanceStore, StoreError, StoreStatistics};
