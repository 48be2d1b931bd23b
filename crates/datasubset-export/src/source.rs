use async_trait::async_trait;
use datasubset_core::{Result, Row, TableDependencyEdge, TableNode};

use crate::record::ColumnMetadata;
use crate::selection::SelectionCondition;

/// Fetches rows for one table.
///
/// Implementations own their connection handling; any connection taken for
/// a fetch must be released before the future completes, on every path.
#[async_trait]
pub trait RowSource: Send {
    /// Reset per-run caches. Called once at the start of every export.
    fn init_export(&mut self) {}

    /// Rows of `table` matching every part of `selection`. `edge` is the
    /// edge that led here, `None` for an export root.
    async fn fetch_rows(
        &mut self,
        table: &TableNode,
        edge: Option<&TableDependencyEdge>,
        selection: &SelectionCondition,
    ) -> Result<Vec<Row>>;

    /// Catalog column names and types of `table`, once known. Sources that
    /// cannot tell return `None` and consumers fall back to the row values.
    fn column_types(&self, _table: &TableNode) -> Option<Vec<ColumnMetadata>> {
        None
    }
}

/// Turns an exported row into output items.
pub trait ItemGenerator: Send {
    type Item: Send;

    /// Reset per-run state. Called once at the start of every export.
    fn init_export(&mut self) {}

    /// Column types reported by the row source, delivered at most once per
    /// table and run, before that table's first `generate` call.
    fn describe_table(&mut self, _table: &TableNode, _columns: &[ColumnMetadata]) {}

    /// Items for `row`, in output order. Formats with side-channel metadata
    /// return it ahead of the row item.
    fn generate(&mut self, table: &TableNode, row: &Row) -> Result<Vec<Self::Item>>;
}
