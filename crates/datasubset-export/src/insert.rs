use std::collections::HashMap;

use datasubset_core::{Result, Row, TableNode};

use crate::dialect::SqlDialect;
use crate::source::ItemGenerator;

/// Renders each row as one `INSERT` statement.
///
/// The `INSERT INTO <table> (<columns>) VALUES (` prefix is built once per
/// table and reused until the next run.
pub struct InsertStatementExporter<D> {
    dialect: D,
    prefixes: HashMap<String, String>,
}

impl<D: SqlDialect> InsertStatementExporter<D> {
    pub fn new(dialect: D) -> Self {
        Self {
            dialect,
            prefixes: HashMap::new(),
        }
    }

    pub fn dialect(&self) -> &D {
        &self.dialect
    }

    fn prefix(&mut self, table: &TableNode, row: &Row) -> &str {
        let dialect = &self.dialect;
        self.prefixes
            .entry(table.key().to_string())
            .or_insert_with(|| {
                let columns: Vec<String> = row
                    .column_names()
                    .map(|column| dialect.quote_identifier(column))
                    .collect();
                format!(
                    "INSERT INTO {} ({}) VALUES (",
                    dialect.qualified_table(table),
                    columns.join(", ")
                )
            })
            .as_str()
    }

    /// Statement for one row.
    pub fn statement(&mut self, table: &TableNode, row: &Row) -> String {
        let values: Vec<String> = row.values().map(|v| self.dialect.literal(v)).collect();
        let prefix = self.prefix(table, row);
        format!("{prefix}{});", values.join(", "))
    }
}

impl<D: SqlDialect> ItemGenerator for InsertStatementExporter<D> {
    type Item = String;

    fn init_export(&mut self) {
        self.prefixes.clear();
    }

    fn generate(&mut self, table: &TableNode, row: &Row) -> Result<Vec<String>> {
        Ok(vec![self.statement(table, row)])
    }
}
