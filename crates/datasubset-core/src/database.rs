use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use crate::graph::DirectedGraph;
use crate::table::{TableDependencyEdge, TableNode, TableRef, table_key};

/// Directed graph of tables connected by dependency edges.
pub type TableGraph = DirectedGraph<TableRef, TableDependencyEdge>;

/// Table dependency graph plus a case-insensitive `schema.table` index.
///
/// Only nodes obtained through [`DatabaseGraph::get_or_create_node`] are
/// indexed. Nodes inserted with [`DatabaseGraph::add_node`] stay invisible to
/// [`DatabaseGraph::find_table`], and [`DatabaseGraph::remove_node`] leaves the
/// index untouched.
#[derive(Debug, Clone, Default)]
pub struct DatabaseGraph {
    graph: TableGraph,
    nodes_by_name: HashMap<String, TableRef>,
}

impl DatabaseGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the indexed node for `schema.table`, creating and registering
    /// it in both the index and the graph when absent.
    pub fn get_or_create_node(&mut self, schema: &str, table: &str) -> TableRef {
        let key = table_key(schema, table);
        if let Some(node) = self.nodes_by_name.get(&key) {
            return Arc::clone(node);
        }
        let node = Arc::new(TableNode::new(schema, table));
        self.nodes_by_name.insert(key, Arc::clone(&node));
        self.graph.add_node(Arc::clone(&node));
        node
    }

    /// Index lookup only; never scans the graph.
    pub fn find_table(&self, schema: &str, table: &str) -> Option<&TableRef> {
        self.nodes_by_name.get(&table_key(schema, table))
    }

    /// Insert a node without registering it in the name index.
    pub fn add_node(&mut self, node: TableRef) {
        self.graph.add_node(node);
    }

    /// Remove a node and its edges from the graph. The name index keeps
    /// whatever it held.
    pub fn remove_node(&mut self, node: &TableRef) -> bool {
        self.graph.remove_node(node)
    }

    pub fn add_edge(&mut self, source: &TableRef, target: &TableRef, edge: TableDependencyEdge) {
        self.graph
            .add_edge(Arc::clone(source), Arc::clone(target), Some(edge));
    }

    pub fn remove_edge(&mut self, source: &TableRef, target: &TableRef) -> bool {
        self.graph.remove_edge(source, target)
    }

    /// Number of entries in the name index.
    pub fn indexed_count(&self) -> usize {
        self.nodes_by_name.len()
    }

    pub fn graph(&self) -> &TableGraph {
        &self.graph
    }
}

impl Deref for DatabaseGraph {
    type Target = TableGraph;

    fn deref(&self) -> &Self::Target {
        &self.graph
    }
}
