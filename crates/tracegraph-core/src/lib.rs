//! # Tracegraph Core
//!
//! Shared data model for provenance graphs built from syscall traces and
//! packet captures: process, file and socket vertices, event and net edges,
//! and the deployment configuration.

pub mod config;
pub mod model;

pub use config::*;
pub use model::*;
