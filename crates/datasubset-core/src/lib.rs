//! Core model for datasubset.
//!
//! This crate defines the generic directed graph, the table dependency graph
//! built on top of it, the graph builder and its discoverer contract, the
//! export configuration, and the row/value model shared by row sources and
//! exporters.

pub mod builder;
pub mod config;
pub mod database;
pub mod error;
pub mod graph;
pub mod redaction;
pub mod row;
pub mod table;

pub use builder::{DependencyDiscoverer, GraphSummary, TableDependencyGraphBuilder};
pub use config::{
    ExportConfig, ImplicitRelation, PrimaryKeyValue, TableConfiguration, TableExportConfig,
    TableToIgnore, is_ignored,
};
pub use database::{DatabaseGraph, TableGraph};
pub use error::{Error, Result};
pub use graph::{CycleError, DirectedGraph, GraphEdge, GraphStatistics};
pub use redaction::{RedactedConnection, redact_connection_string};
pub use row::{Row, Value};
pub use table::{ColumnBinding, EdgeKind, TableDependencyEdge, TableNode, TableRef, table_key};

/// Contract version written into binary export headers.
pub const FORMAT_VERSION: &str = "1.0";
