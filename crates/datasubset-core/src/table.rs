use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Shared handle to a table node. The same allocation is held by the graph
/// and by the name index, so a primary key set once is visible everywhere.
pub type TableRef = Arc<TableNode>;

/// Lowercased `schema.table` used for case-insensitive lookups.
pub fn table_key(schema: &str, table: &str) -> String {
    format!("{schema}.{table}").to_lowercase()
}

/// One table in the dependency graph.
///
/// Equality and hashing are case-insensitive over the full name.
#[derive(Debug)]
pub struct TableNode {
    schema: String,
    name: String,
    full_name: String,
    key: String,
    primary_key_columns: OnceLock<Vec<String>>,
}

impl TableNode {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        let schema = schema.into();
        let name = name.into();
        let full_name = format!("{schema}.{name}");
        let key = full_name.to_lowercase();
        Self {
            schema,
            name,
            full_name,
            key,
            primary_key_columns: OnceLock::new(),
        }
    }

    pub fn with_primary_key<I, S>(self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_primary_key_columns(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `schema.name` as declared.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Lowercased full name.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Primary key columns in key order; empty until known or when the
    /// table has none.
    pub fn primary_key_columns(&self) -> &[String] {
        self.primary_key_columns
            .get()
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key_columns().is_empty()
    }

    /// Record the primary key. Only the first call has an effect; returns
    /// whether this call set it.
    pub fn set_primary_key_columns(&self, columns: Vec<String>) -> bool {
        self.primary_key_columns.set(columns).is_ok()
    }

    /// Whether `columns` names exactly the primary key, ignoring case and order.
    pub fn is_primary_key<'a, I>(&self, columns: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        let primary_key = self.primary_key_columns();
        if primary_key.is_empty() {
            return false;
        }
        let mut columns: Vec<String> = columns.into_iter().map(str::to_lowercase).collect();
        columns.sort();
        columns.dedup();
        let mut expected: Vec<String> = primary_key.iter().map(|c| c.to_lowercase()).collect();
        expected.sort();
        columns == expected
    }
}

impl PartialEq for TableNode {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for TableNode {}

impl Hash for TableNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for TableNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name)
    }
}

/// Join column pair from the source table of an edge to its target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ColumnBinding {
    pub source_column: String,
    pub target_column: String,
}

impl ColumnBinding {
    pub fn new(source_column: impl Into<String>, target_column: impl Into<String>) -> Self {
        Self {
            source_column: source_column.into(),
            target_column: target_column.into(),
        }
    }
}

/// Why an edge exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeKind {
    /// Catalog foreign key; the edge points from the referencing table to
    /// the referenced one.
    ForeignKey { constraint_name: String },
    /// Relation declared in configuration; `where_clause` filters the target side.
    Implicit { where_clause: Option<String> },
}

/// Payload carried by every table dependency edge.
#[derive(Debug, Clone)]
pub struct TableDependencyEdge {
    kind: EdgeKind,
    source_schema: String,
    source_table: String,
    column_bindings: Vec<ColumnBinding>,
    target_by_source: HashMap<String, usize>,
}

impl TableDependencyEdge {
    pub fn foreign_key(
        constraint_name: impl Into<String>,
        source: &TableNode,
        column_bindings: Vec<ColumnBinding>,
    ) -> Self {
        Self::new(
            EdgeKind::ForeignKey {
                constraint_name: constraint_name.into(),
            },
            source,
            column_bindings,
        )
    }

    pub fn implicit(
        source: &TableNode,
        column_bindings: Vec<ColumnBinding>,
        where_clause: Option<String>,
    ) -> Self {
        let where_clause = where_clause.filter(|clause| !clause.trim().is_empty());
        Self::new(EdgeKind::Implicit { where_clause }, source, column_bindings)
    }

    fn new(kind: EdgeKind, source: &TableNode, column_bindings: Vec<ColumnBinding>) -> Self {
        let mut target_by_source = HashMap::with_capacity(column_bindings.len());
        for (index, binding) in column_bindings.iter().enumerate() {
            target_by_source
                .entry(binding.source_column.to_lowercase())
                .or_insert(index);
        }
        Self {
            kind,
            source_schema: source.schema().to_string(),
            source_table: source.name().to_string(),
            column_bindings,
            target_by_source,
        }
    }

    pub fn kind(&self) -> &EdgeKind {
        &self.kind
    }

    pub fn is_foreign_key(&self) -> bool {
        matches!(self.kind, EdgeKind::ForeignKey { .. })
    }

    pub fn is_implicit(&self) -> bool {
        matches!(self.kind, EdgeKind::Implicit { .. })
    }

    pub fn constraint_name(&self) -> Option<&str> {
        match &self.kind {
            EdgeKind::ForeignKey { constraint_name } => Some(constraint_name),
            EdgeKind::Implicit { .. } => None,
        }
    }

    pub fn where_clause(&self) -> Option<&str> {
        match &self.kind {
            EdgeKind::Implicit { where_clause } => where_clause.as_deref(),
            EdgeKind::ForeignKey { .. } => None,
        }
    }

    pub fn source_schema(&self) -> &str {
        &self.source_schema
    }

    pub fn source_table(&self) -> &str {
        &self.source_table
    }

    pub fn column_bindings(&self) -> &[ColumnBinding] {
        &self.column_bindings
    }

    /// Target column bound to `source_column` (case-insensitive).
    pub fn target_column_for(&self, source_column: &str) -> Option<&str> {
        self.target_by_source
            .get(&source_column.to_lowercase())
            .map(|index| self.column_bindings[*index].target_column.as_str())
    }
}

impl PartialEq for TableDependencyEdge {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.source_schema.eq_ignore_ascii_case(&other.source_schema)
            && self.source_table.eq_ignore_ascii_case(&other.source_table)
            && self.column_bindings == other.column_bindings
    }
}

impl fmt::Display for TableDependencyEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bindings = self
            .column_bindings
            .iter()
            .map(|binding| format!("{} -> {}", binding.source_column, binding.target_column))
            .collect::<Vec<_>>()
            .join(", ");
        match &self.kind {
            EdgeKind::ForeignKey { constraint_name } => {
                write!(f, "FK {constraint_name}: {bindings}")
            }
            EdgeKind::Implicit {
                where_clause: Some(clause),
            } => write!(f, "IMPLICIT: {bindings} WHERE {clause}"),
            EdgeKind::Implicit { where_clause: None } => write!(f, "IMPLICIT: {bindings}"),
        }
    }
}
