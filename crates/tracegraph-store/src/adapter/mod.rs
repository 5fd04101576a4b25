//! Relational backends for the provenance store

pub mod sqlite;

pub use sqlite::SqliteStore;
