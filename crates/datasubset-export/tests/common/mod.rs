#![allow(dead_code)]

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use datasubset_core::{
    ColumnBinding, DatabaseGraph, DependencyDiscoverer, Error, Result, Row, TableDependencyEdge,
    TableNode, TableRef, TableToIgnore, Value, is_ignored, table_key,
};
use datasubset_export::{ColumnMetadata, ItemGenerator, RowSource, SelectionCondition};

pub fn int(value: i64) -> Value {
    Value::Int(value)
}

pub fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

pub fn row(values: &[(&str, Value)]) -> Row {
    values.iter().cloned().collect()
}

pub fn add_table(graph: &mut DatabaseGraph, schema: &str, name: &str, pk: &[&str]) -> TableRef {
    let node = graph.get_or_create_node(schema, name);
    node.set_primary_key_columns(pk.iter().map(|c| c.to_string()).collect());
    node
}

fn bindings(pairs: &[(&str, &str)]) -> Vec<ColumnBinding> {
    pairs
        .iter()
        .map(|(source, target)| ColumnBinding::new(*source, *target))
        .collect()
}

pub fn add_fk(
    graph: &mut DatabaseGraph,
    name: &str,
    from: &TableRef,
    to: &TableRef,
    pairs: &[(&str, &str)],
) {
    let edge = TableDependencyEdge::foreign_key(name, from, bindings(pairs));
    graph.add_edge(from, to, edge);
}

pub fn add_implicit(
    graph: &mut DatabaseGraph,
    from: &TableRef,
    to: &TableRef,
    pairs: &[(&str, &str)],
    where_clause: Option<&str>,
) {
    let edge =
        TableDependencyEdge::implicit(from, bindings(pairs), where_clause.map(str::to_string));
    graph.add_edge(from, to, edge);
}

/// Row source over in-memory tables. Where clauses are resolved through
/// registered predicates.
#[derive(Default)]
pub struct MemoryRowSource {
    tables: HashMap<String, Vec<Row>>,
    predicates: HashMap<String, fn(&Row) -> bool>,
    columns: HashMap<String, Vec<ColumnMetadata>>,
    failing: HashSet<String>,
    pub fetches: Vec<String>,
    pub init_calls: usize,
}

impl MemoryRowSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(mut self, schema: &str, name: &str, rows: Vec<Row>) -> Self {
        self.tables.insert(table_key(schema, name), rows);
        self
    }

    pub fn predicate(mut self, clause: &str, predicate: fn(&Row) -> bool) -> Self {
        self.predicates.insert(clause.to_string(), predicate);
        self
    }

    pub fn columns(mut self, schema: &str, name: &str, columns: &[(&str, &str)]) -> Self {
        let columns = columns
            .iter()
            .map(|(name, data_type)| ColumnMetadata {
                name: name.to_string(),
                data_type: data_type.to_string(),
            })
            .collect();
        self.columns.insert(table_key(schema, name), columns);
        self
    }

    pub fn failing(mut self, schema: &str, name: &str) -> Self {
        self.failing.insert(table_key(schema, name));
        self
    }

    pub fn fetched(&self, schema: &str, name: &str) -> usize {
        let key = table_key(schema, name);
        self.fetches.iter().filter(|fetch| **fetch == key).count()
    }
}

#[async_trait]
impl RowSource for MemoryRowSource {
    fn init_export(&mut self) {
        self.init_calls += 1;
    }

    async fn fetch_rows(
        &mut self,
        table: &TableNode,
        _edge: Option<&TableDependencyEdge>,
        selection: &SelectionCondition,
    ) -> Result<Vec<Row>> {
        self.fetches.push(table.key().to_string());
        if self.failing.contains(table.key()) {
            return Err(Error::Db(format!("query failed for {}", table.full_name())));
        }

        let predicate = match &selection.where_clause {
            Some(clause) => Some(
                *self
                    .predicates
                    .get(clause)
                    .ok_or_else(|| Error::Db(format!("unknown predicate: {clause}")))?,
            ),
            None => None,
        };

        let rows = self.tables.get(table.key()).cloned().unwrap_or_default();
        Ok(rows
            .into_iter()
            .filter(|row| {
                selection
                    .equalities()
                    .all(|(column, value)| row.get(column) == Some(value))
            })
            .filter(|row| predicate.is_none_or(|matches| matches(row)))
            .collect())
    }

    fn column_types(&self, table: &TableNode) -> Option<Vec<ColumnMetadata>> {
        self.columns.get(table.key()).cloned()
    }
}

/// Labels each row as `table:v1,v2,...`.
#[derive(Default)]
pub struct LabelGenerator;

pub fn render(value: &Value) -> String {
    match value {
        Value::Int(int) => int.to_string(),
        Value::Text(text) => text.clone(),
        Value::Null => "null".to_string(),
        other => other.key_fragment(),
    }
}

impl ItemGenerator for LabelGenerator {
    type Item = String;

    fn generate(&mut self, table: &TableNode, row: &Row) -> Result<Vec<String>> {
        let values: Vec<String> = row.values().map(render).collect();
        Ok(vec![format!("{}:{}", table.name(), values.join(","))])
    }
}

/// Discoverer over a fixed catalog.
pub struct CatalogDiscoverer {
    pub tables: Vec<(String, String, Vec<String>)>,
    pub foreign_keys: Vec<CatalogForeignKey>,
}

/// `(name, (schema, table), (referenced schema, referenced table), column pairs)`.
pub type CatalogForeignKey = (String, (String, String), (String, String), Vec<(String, String)>);

#[async_trait]
impl DependencyDiscoverer for CatalogDiscoverer {
    fn engine(&self) -> &'static str {
        "memory"
    }

    async fn discover_tables(
        &self,
        graph: &mut DatabaseGraph,
        schemas: &[String],
        ignored: &[TableToIgnore],
    ) -> Result<()> {
        for (schema, name, pk) in &self.tables {
            if !schemas.iter().any(|s| s.eq_ignore_ascii_case(schema))
                || is_ignored(ignored, schema, name)
            {
                continue;
            }
            graph
                .get_or_create_node(schema, name)
                .set_primary_key_columns(pk.clone());
        }
        Ok(())
    }

    async fn build_foreign_key_relationships(
        &self,
        graph: &mut DatabaseGraph,
        _schemas: &[String],
        _ignored: &[TableToIgnore],
    ) -> Result<()> {
        for (name, (from_schema, from_table), (to_schema, to_table), pairs) in &self.foreign_keys {
            let (Some(from), Some(to)) = (
                graph.find_table(from_schema, from_table).cloned(),
                graph.find_table(to_schema, to_table).cloned(),
            ) else {
                continue;
            };
            let bindings = pairs
                .iter()
                .map(|(source, target)| ColumnBinding::new(source.as_str(), target.as_str()))
                .collect();
            let edge = TableDependencyEdge::foreign_key(name.as_str(), &from, bindings);
            graph.add_edge(&from, &to, edge);
        }
        Ok(())
    }
}

/// `export.table1(id, name)` and `export.table2(id, table1_id -> table1.id, data)`.
pub fn two_table_graph() -> DatabaseGraph {
    let mut graph = DatabaseGraph::new();
    let table1 = add_table(&mut graph, "export", "table1", &["id"]);
    let table2 = add_table(&mut graph, "export", "table2", &["id"]);
    add_fk(&mut graph, "fk_table2_table1", &table2, &table1, &[("table1_id", "id")]);
    graph
}

pub fn two_table_rows() -> MemoryRowSource {
    MemoryRowSource::new()
        .table(
            "export",
            "table1",
            vec![
                row(&[("id", int(1)), ("name", text("Alice"))]),
                row(&[("id", int(2)), ("name", text("Useless"))]),
            ],
        )
        .table(
            "export",
            "table2",
            vec![
                row(&[("id", int(1)), ("table1_id", int(1)), ("data", text("Bob"))]),
                row(&[("id", int(2)), ("table1_id", int(2)), ("data", text("Useless"))]),
            ],
        )
}
