use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;

use datasubset_core::{
    ColumnBinding, DatabaseGraph, DependencyDiscoverer, Result, TableDependencyEdge,
    TableToIgnore, is_ignored, table_key,
};

use crate::queries::{self, RawForeignKey, RawPrimaryKey, RawTable};

/// Catalog discovery over `pg_catalog`.
#[derive(Clone)]
pub struct PostgresDiscoverer {
    pool: PgPool,
}

impl PostgresDiscoverer {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DependencyDiscoverer for PostgresDiscoverer {
    fn engine(&self) -> &'static str {
        "postgres"
    }

    async fn discover_tables(
        &self,
        graph: &mut DatabaseGraph,
        schemas: &[String],
        ignored: &[TableToIgnore],
    ) -> Result<()> {
        let tables = queries::list_tables(&self.pool, schemas).await?;
        let primary_keys = queries::list_primary_keys(&self.pool, schemas).await?;
        add_tables(graph, tables, primary_keys, ignored);
        Ok(())
    }

    async fn build_foreign_key_relationships(
        &self,
        graph: &mut DatabaseGraph,
        schemas: &[String],
        ignored: &[TableToIgnore],
    ) -> Result<()> {
        let foreign_keys = queries::list_foreign_keys(&self.pool, schemas).await?;
        add_foreign_keys(graph, foreign_keys, ignored);
        Ok(())
    }
}

pub(crate) fn add_tables(
    graph: &mut DatabaseGraph,
    tables: Vec<RawTable>,
    primary_keys: Vec<RawPrimaryKey>,
    ignored: &[TableToIgnore],
) {
    let mut keys: HashMap<String, Vec<String>> = primary_keys
        .into_iter()
        .map(|pk| (table_key(&pk.schema, &pk.table), pk.columns))
        .collect();

    for table in tables {
        if is_ignored(ignored, &table.schema, &table.name) {
            tracing::debug!(event = "table_ignored", schema = %table.schema, table = %table.name);
            continue;
        }
        let node = graph.get_or_create_node(&table.schema, &table.name);
        let columns = keys.remove(node.key()).unwrap_or_default();
        if columns.is_empty() {
            tracing::debug!(event = "table_without_primary_key", table = %node.full_name());
        }
        node.set_primary_key_columns(columns);
    }
}

pub(crate) fn add_foreign_keys(
    graph: &mut DatabaseGraph,
    foreign_keys: Vec<RawForeignKey>,
    ignored: &[TableToIgnore],
) {
    for fk in foreign_keys {
        if is_ignored(ignored, &fk.schema, &fk.table)
            || is_ignored(ignored, &fk.referenced_schema, &fk.referenced_table)
        {
            continue;
        }
        let Some(source) = graph.find_table(&fk.schema, &fk.table).cloned() else {
            continue;
        };
        let Some(target) = graph
            .find_table(&fk.referenced_schema, &fk.referenced_table)
            .cloned()
        else {
            tracing::warn!(
                event = "foreign_key_target_missing",
                constraint = %fk.name,
                source = %source.full_name(),
                target = %format!("{}.{}", fk.referenced_schema, fk.referenced_table)
            );
            continue;
        };

        let bindings: Vec<ColumnBinding> = fk
            .columns
            .iter()
            .zip(&fk.referenced_columns)
            .map(|(source_column, target_column)| ColumnBinding::new(source_column, target_column))
            .collect();
        let edge = TableDependencyEdge::foreign_key(fk.name, &source, bindings);
        graph.add_edge(&source, &target, edge);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_table(schema: &str, name: &str) -> RawTable {
        RawTable {
            schema: schema.into(),
            name: name.into(),
        }
    }

    fn catalog() -> (Vec<RawTable>, Vec<RawPrimaryKey>, Vec<RawForeignKey>) {
        let tables = vec![
            raw_table("public", "customers"),
            raw_table("public", "orders"),
            raw_table("public", "order_lines"),
            raw_table("public", "audit_log"),
        ];
        let keys = vec![
            RawPrimaryKey {
                schema: "public".into(),
                table: "customers".into(),
                columns: vec!["id".into()],
            },
            RawPrimaryKey {
                schema: "public".into(),
                table: "orders".into(),
                columns: vec!["id".into()],
            },
            RawPrimaryKey {
                schema: "public".into(),
                table: "order_lines".into(),
                columns: vec!["order_id".into(), "line_no".into()],
            },
        ];
        let foreign_keys = vec![
            RawForeignKey {
                name: "fk_orders_customer".into(),
                schema: "public".into(),
                table: "orders".into(),
                columns: vec!["customer_id".into()],
                referenced_schema: "public".into(),
                referenced_table: "customers".into(),
                referenced_columns: vec!["id".into()],
            },
            RawForeignKey {
                name: "fk_lines_order".into(),
                schema: "public".into(),
                table: "order_lines".into(),
                columns: vec!["order_id".into()],
                referenced_schema: "public".into(),
                referenced_table: "orders".into(),
                referenced_columns: vec!["id".into()],
            },
            RawForeignKey {
                name: "fk_orders_region".into(),
                schema: "public".into(),
                table: "orders".into(),
                columns: vec!["region_id".into()],
                referenced_schema: "geo".into(),
                referenced_table: "regions".into(),
                referenced_columns: vec!["id".into()],
            },
        ];
        (tables, keys, foreign_keys)
    }

    #[test]
    fn tables_get_their_primary_keys_in_order() {
        let (tables, keys, _) = catalog();
        let mut graph = DatabaseGraph::new();
        add_tables(&mut graph, tables, keys, &[]);

        assert_eq!(graph.node_count(), 4);
        let lines = graph.find_table("public", "order_lines").unwrap();
        assert_eq!(lines.primary_key_columns(), ["order_id", "line_no"]);
        assert!(!graph.find_table("public", "audit_log").unwrap().has_primary_key());
    }

    #[test]
    fn ignored_tables_and_their_foreign_keys_are_skipped() {
        let (tables, keys, foreign_keys) = catalog();
        let ignored = vec![TableToIgnore::new("public", "customers")];
        let mut graph = DatabaseGraph::new();
        add_tables(&mut graph, tables, keys, &ignored);
        add_foreign_keys(&mut graph, foreign_keys, &ignored);

        assert!(graph.find_table("public", "customers").is_none());
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn foreign_keys_become_edges_and_repeat_runs_are_idempotent() {
        let (tables, keys, foreign_keys) = catalog();
        let mut graph = DatabaseGraph::new();
        add_tables(&mut graph, tables, keys, &[]);
        add_foreign_keys(&mut graph, foreign_keys, &[]);

        let (tables, keys, foreign_keys) = catalog();
        add_tables(&mut graph, tables, keys, &[]);
        add_foreign_keys(&mut graph, foreign_keys, &[]);

        // fk_orders_region points outside the discovered schemas
        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.edge_count(), 2);

        let orders = graph.find_table("public", "orders").unwrap();
        let edges = graph.outgoing_edges(orders);
        assert_eq!(edges.len(), 1);
        let edge = edges[0].data.as_ref().unwrap();
        assert_eq!(edge.constraint_name(), Some("fk_orders_customer"));
        assert_eq!(edge.target_column_for("customer_id"), Some("id"));
    }
}
