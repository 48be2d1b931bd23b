//! Populates a [`DatabaseGraph`] from a catalog discoverer and declared relations.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{TableConfiguration, TableToIgnore};
use crate::database::DatabaseGraph;
use crate::error::Result;
use crate::graph::GraphStatistics;
use crate::table::{EdgeKind, TableDependencyEdge, TableRef, table_key};

/// Catalog access used to add tables and foreign keys to a graph.
///
/// Implementations must skip ignored tables, must be idempotent, and must
/// produce one edge per foreign key constraint.
#[async_trait]
pub trait DependencyDiscoverer: Send + Sync {
    /// Engine identifier (e.g. `postgres`).
    fn engine(&self) -> &'static str;

    /// Add a node per table of `schemas` and record its primary key.
    async fn discover_tables(
        &self,
        graph: &mut DatabaseGraph,
        schemas: &[String],
        ignored: &[TableToIgnore],
    ) -> Result<()>;

    /// Add a referencing -> referenced edge per foreign key constraint.
    async fn build_foreign_key_relationships(
        &self,
        graph: &mut DatabaseGraph,
        schemas: &[String],
        ignored: &[TableToIgnore],
    ) -> Result<()>;
}

/// Machine-readable overview of a built graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSummary {
    pub statistics: GraphStatistics,
    pub root_tables: Vec<String>,
    pub leaf_tables: Vec<String>,
    pub tables_without_primary_key: Vec<String>,
    pub cycles: Vec<Vec<String>>,
}

pub struct TableDependencyGraphBuilder<D> {
    discoverer: D,
    graph: DatabaseGraph,
}

impl<D: DependencyDiscoverer> TableDependencyGraphBuilder<D> {
    pub fn new(discoverer: D) -> Self {
        Self {
            discoverer,
            graph: DatabaseGraph::new(),
        }
    }

    /// Build a fresh graph: tables and primary keys, then foreign keys, then
    /// declared relations whose target is present.
    pub async fn build_dependency_graph(
        &mut self,
        schemas: &[String],
        table_configs: &[TableConfiguration],
        ignored: &[TableToIgnore],
    ) -> Result<&DatabaseGraph> {
        tracing::info!(
            event = "graph_build_started",
            engine = self.discoverer.engine(),
            schemas = %schemas.join(", ")
        );

        let mut graph = DatabaseGraph::new();
        self.discoverer
            .discover_tables(&mut graph, schemas, ignored)
            .await?;
        self.discoverer
            .build_foreign_key_relationships(&mut graph, schemas, ignored)
            .await?;
        add_implicit_relations(&mut graph, table_configs);

        tracing::info!(
            event = "graph_build_finished",
            tables = graph.node_count(),
            edges = graph.edge_count()
        );
        self.graph = graph;
        Ok(&self.graph)
    }

    pub fn discoverer(&self) -> &D {
        &self.discoverer
    }

    pub fn graph(&self) -> &DatabaseGraph {
        &self.graph
    }

    pub fn into_graph(self) -> DatabaseGraph {
        self.graph
    }

    /// Topological order (referencing tables before the tables they
    /// reference). On a cycle the cycles are logged and every table is
    /// returned in insertion order.
    pub fn tables_in_dependency_order(&self) -> Vec<TableRef> {
        match self.graph.topological_sort() {
            Ok(order) => order,
            Err(err) => {
                tracing::warn!(event = "dependency_order_cycle", error = %err);
                for cycle in self.cycles() {
                    tracing::warn!(event = "cycle_detected", tables = %cycle.join(" -> "));
                }
                self.graph.nodes().to_vec()
            }
        }
    }

    /// Topological order, failing with [`crate::Error::Cycle`] instead of falling back.
    pub fn strict_dependency_order(&self) -> Result<Vec<TableRef>> {
        Ok(self.graph.topological_sort()?)
    }

    pub fn root_tables(&self) -> Vec<TableRef> {
        self.graph.root_nodes().cloned().collect()
    }

    pub fn leaf_tables(&self) -> Vec<TableRef> {
        self.graph.leaf_nodes().cloned().collect()
    }

    pub fn find_table(&self, schema: &str, table: &str) -> Option<&TableRef> {
        self.graph.find_table(schema, table)
    }

    pub fn all_tables(&self) -> &[TableRef] {
        self.graph.nodes()
    }

    /// Tables `table` points at.
    pub fn dependencies(&self, table: &TableRef) -> Vec<TableRef> {
        self.graph.successors(table).cloned().collect()
    }

    /// Tables pointing at `table`.
    pub fn dependents(&self, table: &TableRef) -> Vec<TableRef> {
        self.graph.predecessors(table).cloned().collect()
    }

    /// Strongly connected components with more than one table.
    pub fn cycles(&self) -> Vec<Vec<String>> {
        self.graph
            .strongly_connected_components()
            .into_iter()
            .filter(|component| component.len() > 1)
            .map(|component| {
                component
                    .iter()
                    .map(|node| node.full_name().to_string())
                    .collect()
            })
            .collect()
    }

    pub fn summary(&self) -> GraphSummary {
        let names = |nodes: Vec<TableRef>| -> Vec<String> {
            nodes
                .iter()
                .map(|node| node.full_name().to_string())
                .collect()
        };
        let statistics = self.graph.statistics();
        GraphSummary {
            statistics,
            root_tables: names(self.root_tables()),
            leaf_tables: names(self.leaf_tables()),
            tables_without_primary_key: self
                .graph
                .nodes()
                .iter()
                .filter(|node| !node.has_primary_key())
                .map(|node| node.full_name().to_string())
                .collect(),
            cycles: if statistics.has_cycles {
                self.cycles()
            } else {
                Vec::new()
            },
        }
    }

    /// Indented tree of everything `schema.table` depends on, with the edge
    /// bindings under each dependency. `None` when the table is not indexed.
    pub fn dependency_tree(&self, schema: &str, table: &str) -> Option<String> {
        let root = self.graph.find_table(schema, table)?;
        let mut out = String::new();
        let _ = writeln!(out, "{}{}", root.full_name(), primary_key_label(root));
        let mut visited = HashSet::new();
        self.write_dependencies(root, 0, &mut visited, &mut out);
        Some(out)
    }

    fn write_dependencies(
        &self,
        node: &TableRef,
        indent: usize,
        visited: &mut HashSet<TableRef>,
        out: &mut String,
    ) {
        if !visited.insert(Arc::clone(node)) {
            let _ = writeln!(out, "{:indent$}- {} (already visited)", "", node.full_name());
            return;
        }

        for edge in self.graph.outgoing_edges(node) {
            let target = &edge.target;
            let _ = writeln!(
                out,
                "{:indent$}- {}{}",
                "",
                target.full_name(),
                primary_key_label(target)
            );
            if let Some(data) = &edge.data {
                write_edge_details(node, target, data, indent + 4, out);
            }
            self.write_dependencies(target, indent + 2, visited, out);
        }
    }
}

fn primary_key_label(node: &TableRef) -> String {
    if node.has_primary_key() {
        format!(" [PK: {}]", node.primary_key_columns().join(", "))
    } else {
        " [No PK]".to_string()
    }
}

fn write_edge_details(
    source: &TableRef,
    target: &TableRef,
    edge: &TableDependencyEdge,
    indent: usize,
    out: &mut String,
) {
    let suffix = match edge.kind() {
        EdgeKind::ForeignKey { constraint_name } => format!(" (Constraint: {constraint_name})"),
        EdgeKind::Implicit {
            where_clause: Some(clause),
        } => format!(" WHERE {clause}"),
        EdgeKind::Implicit { where_clause: None } => String::new(),
    };
    let label = if edge.is_foreign_key() { "FK" } else { "IMPLICIT" };

    if edge.column_bindings().is_empty() {
        let _ = writeln!(
            out,
            "{:indent$}{label}: {} -> {}{suffix}",
            "",
            source.full_name(),
            target.full_name()
        );
        return;
    }
    for binding in edge.column_bindings() {
        let _ = writeln!(
            out,
            "{:indent$}{label}: {}.{} -> {}.{}{suffix}",
            "",
            source.full_name(),
            binding.source_column,
            target.full_name(),
            binding.target_column
        );
    }
}

fn add_implicit_relations(graph: &mut DatabaseGraph, table_configs: &[TableConfiguration]) {
    let configs: HashMap<String, &TableConfiguration> = table_configs
        .iter()
        .map(|config| (table_key(&config.schema, &config.table_name), config))
        .collect();

    let nodes = graph.nodes().to_vec();
    for node in nodes {
        let Some(config) = configs.get(node.key()) else {
            continue;
        };
        for relation in &config.implicit_relations {
            let Some(target) = graph
                .find_table(&relation.target_schema, &relation.target_table)
                .cloned()
            else {
                tracing::warn!(
                    event = "implicit_target_missing",
                    source = %node.full_name(),
                    target = %relation.target_full_name()
                );
                continue;
            };

            for binding in &relation.column_bindings {
                tracing::debug!(
                    event = "implicit_relation_added",
                    source = %format!("{}.{}", node.full_name(), binding.source_column),
                    target = %format!("{}.{}", target.full_name(), binding.target_column)
                );
            }
            let edge = TableDependencyEdge::implicit(
                &node,
                relation.column_bindings.clone(),
                relation.where_clause.clone(),
            );
            graph.add_edge(&node, &target, edge);
        }
    }
}
