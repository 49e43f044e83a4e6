//! # FiberDB
//!
//! An embeddable hybrid document/graph database: a write-ahead log for
//! durability, a three-tier cache, a pluggable index manager, a query
//! engine with index-aware candidate selection, a graph traversal layer,
//! and a performance monitor with alerting.
//!
//! ## Architecture
//!
//! - `error`: the crate's error taxonomy
//! - `value`: the tagged JSON-shaped value tree
//! - `entity`: entities, edges, and metadata — the shared data model
//! - `config`: engine configuration, defaulted and env-overridable
//! - `predicate`: the operator/condition vocabulary shared by indexes and queries
//! - `wal`: the durable write-ahead log and snapshot compaction
//! - `cache`: the document/query/file-existence cache tier
//! - `index`: hash, range, and text indexes behind a common manager
//! - `store`: the entity store tying WAL, cache, and indexes together
//! - `query`: the query engine's eight-phase execution pipeline
//! - `graph`: breadth-first traversal and shortest-path search
//! - `perf`: rolling performance sampling and alert rules
//! - `engine`: the top-level façade composing every component
//! - `migrate`: the legacy anchors/attached file-layout migrator

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod engine;
pub mod entity;
pub mod error;
pub mod graph;
pub mod index;
pub mod migrate;
pub mod perf;
pub mod predicate;
pub mod query;
pub mod store;
pub mod value;
pub mod wal;

pub use engine::Engine;
pub use error::{FiberError, FiberResult};

/// Crate version, re-exported for adapters that report it in diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name, re-exported for adapters that report it in diagnostics.
pub const NAME: &str = env!("CARGO_PKG_NAME");
