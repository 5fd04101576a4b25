//! # Tracegraph CLI Library
//!
//! Command line front end: ingest trace files, query provenance subgraphs
//! and inspect the store.

pub mod commands;

pub use commands::*;
