use datasubset_core::{Row, TableDependencyEdge, TableExportConfig, TableNode, Value};

/// Filter for one row fetch. Every part is combined with AND.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionCondition {
    /// `target column = value` pairs taken from the row that led here.
    pub parent_values: Vec<(String, Value)>,
    /// Free-form predicate, appended verbatim.
    pub where_clause: Option<String>,
    /// Explicit `column = value` pairs from a root config.
    pub primary_key_values: Vec<(String, Value)>,
}

impl SelectionCondition {
    /// Selection for an export root.
    pub fn for_root(config: &TableExportConfig) -> Self {
        Self {
            parent_values: Vec::new(),
            where_clause: config.where_clause().map(str::to_string),
            primary_key_values: config
                .primary_key_values()
                .iter()
                .map(|pk| (pk.column_name.clone(), Value::from_json(&pk.value)))
                .collect(),
        }
    }

    /// Selection for the rows `row` points at through `edge`.
    ///
    /// `None` when a bound source column is missing or NULL: no related row
    /// can exist, so there is nothing to fetch.
    pub fn for_edge(edge: &TableDependencyEdge, row: &Row) -> Option<Self> {
        let mut parent_values = Vec::with_capacity(edge.column_bindings().len());
        for binding in edge.column_bindings() {
            let value = row.get(&binding.source_column)?;
            if value.is_null() {
                return None;
            }
            parent_values.push((binding.target_column.clone(), value.clone()));
        }
        if parent_values.is_empty() {
            return None;
        }
        Some(Self {
            parent_values,
            where_clause: edge.where_clause().map(str::to_string),
            primary_key_values: Vec::new(),
        })
    }

    /// Column equality conditions, parent values first.
    pub fn equalities(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.parent_values
            .iter()
            .chain(self.primary_key_values.iter())
            .map(|(column, value)| (column.as_str(), value))
    }

    pub fn is_empty(&self) -> bool {
        self.parent_values.is_empty()
            && self.primary_key_values.is_empty()
            && self.where_clause.is_none()
    }

    /// Whether the equalities pin down the full primary key of `table`, so at
    /// most one row may match.
    pub fn is_unique_lookup(&self, table: &TableNode) -> bool {
        let keyed = |pairs: &[(String, Value)]| {
            !pairs.is_empty() && table.is_primary_key(pairs.iter().map(|(c, _)| c.as_str()))
        };
        keyed(&self.parent_values) || keyed(&self.primary_key_values)
    }
}
