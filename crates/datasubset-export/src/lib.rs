//! Dependency-first row export.
//!
//! [`ExportTraversal`] walks the table dependency graph from configured root
//! rows, pulling rows from a [`RowSource`] and turning each one into output
//! items with an [`ItemGenerator`]. Referenced rows are always emitted before
//! the rows that reference them, and every physical row at most once per run.

pub mod dialect;
pub mod insert;
pub mod record;
pub mod selection;
pub mod source;
pub mod traversal;

pub use dialect::{GenericDialect, SqlDialect, quote_string};
pub use insert::InsertStatementExporter;
pub use record::{
    ColumnMetadata, ExportHeader, ExportRecord, RecordExporter, RowData, TableMetadata,
    decode_frames, encode_frame, write_frame,
};
pub use selection::SelectionCondition;
pub use source::{ItemGenerator, RowSource};
pub use traversal::{ExportRun, ExportTraversal, row_identity_key};
