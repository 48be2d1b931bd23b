//! Generic directed graph with adjacency and reverse-adjacency indices.
//!
//! Nodes keep their insertion order so that every query, including the
//! topological sort tie-break, is deterministic. The graph is not internally
//! synchronized; callers that mutate it from several tasks must lock it
//! themselves.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Directed edge. `source` is `None` only for the synthetic root edge that
/// starts a traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge<N, E> {
    pub source: Option<N>,
    pub target: N,
    pub data: Option<E>,
}

impl<N, E> GraphEdge<N, E> {
    pub fn new(source: Option<N>, target: N, data: Option<E>) -> Self {
        Self {
            source,
            target,
            data,
        }
    }

    /// Edge with no source and no payload pointing at `target`.
    pub fn root(target: N) -> Self {
        Self::new(None, target, None)
    }
}

impl<N: fmt::Display, E> fmt::Display for GraphEdge<N, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{source} -> {}", self.target),
            None => write!(f, "<root> -> {}", self.target),
        }
    }
}

/// Basic counts describing a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStatistics {
    pub node_count: usize,
    pub edge_count: usize,
    pub root_node_count: usize,
    pub leaf_node_count: usize,
    pub has_cycles: bool,
}

impl fmt::Display for GraphStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Nodes: {}, Edges: {}, Roots: {}, Leaves: {}, Cycles: {}",
            self.node_count,
            self.edge_count,
            self.root_node_count,
            self.leaf_node_count,
            self.has_cycles
        )
    }
}

/// Returned by [`DirectedGraph::topological_sort`] when some nodes never reach
/// in-degree zero.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cycle detected in graph - topological sort not possible ({unresolved} of {total} nodes unresolved)")]
pub struct CycleError {
    pub unresolved: usize,
    pub total: usize,
}

/// Directed multigraph. Distinct payloads between the same pair of nodes are
/// kept as distinct edges; inserting a structurally identical edge twice is a
/// no-op.
#[derive(Debug, Clone)]
pub struct DirectedGraph<N, E> {
    nodes: Vec<N>,
    outgoing: HashMap<N, Vec<GraphEdge<N, E>>>,
    incoming: HashMap<N, Vec<GraphEdge<N, E>>>,
}

impl<N, E> Default for DirectedGraph<N, E> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
        }
    }
}

impl<N, E> DirectedGraph<N, E>
where
    N: Clone + Eq + Hash,
    E: Clone + PartialEq,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure `node` exists. Existing nodes keep their edges.
    pub fn add_node(&mut self, node: N) {
        if self.outgoing.contains_key(&node) {
            return;
        }
        self.outgoing.insert(node.clone(), Vec::new());
        self.incoming.insert(node.clone(), Vec::new());
        self.nodes.push(node);
    }

    /// Add `source -> target`, creating missing endpoints.
    pub fn add_edge(&mut self, source: N, target: N, data: Option<E>) {
        self.add_node(source.clone());
        self.add_node(target.clone());

        let edge = GraphEdge::new(Some(source.clone()), target.clone(), data);
        let outgoing = self.outgoing.entry(source).or_default();
        if outgoing.contains(&edge) {
            return;
        }
        outgoing.push(edge.clone());
        self.incoming.entry(target).or_default().push(edge);
    }

    /// Remove the first edge from `source` whose target is `target`.
    pub fn remove_edge(&mut self, source: &N, target: &N) -> bool {
        let Some(outgoing) = self.outgoing.get_mut(source) else {
            return false;
        };
        let Some(position) = outgoing.iter().position(|edge| &edge.target == target) else {
            return false;
        };
        let removed = outgoing.remove(position);

        if let Some(incoming) = self.incoming.get_mut(target) {
            if let Some(position) = incoming.iter().position(|edge| edge == &removed) {
                incoming.remove(position);
            }
        }
        true
    }

    /// Remove `node` and every edge touching it.
    pub fn remove_node(&mut self, node: &N) -> bool {
        let Some(outgoing) = self.outgoing.remove(node) else {
            return false;
        };
        for edge in &outgoing {
            if let Some(incoming) = self.incoming.get_mut(&edge.target) {
                incoming.retain(|candidate| candidate != edge);
            }
        }

        if let Some(incoming) = self.incoming.remove(node) {
            for edge in &incoming {
                let Some(source) = edge.source.as_ref() else {
                    continue;
                };
                if let Some(edges) = self.outgoing.get_mut(source) {
                    edges.retain(|candidate| candidate != edge);
                }
            }
        }

        self.nodes.retain(|candidate| candidate != node);
        true
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> &[N] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.outgoing.values().map(Vec::len).sum()
    }

    /// Edges leaving `node`; empty for unknown nodes.
    pub fn outgoing_edges(&self, node: &N) -> &[GraphEdge<N, E>] {
        self.outgoing.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Edges entering `node`; empty for unknown nodes.
    pub fn incoming_edges(&self, node: &N) -> &[GraphEdge<N, E>] {
        self.incoming.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn successors<'a>(&'a self, node: &N) -> impl Iterator<Item = &'a N> + 'a {
        self.outgoing_edges(node).iter().map(|edge| &edge.target)
    }

    pub fn predecessors<'a>(&'a self, node: &N) -> impl Iterator<Item = &'a N> + 'a {
        self.incoming_edges(node)
            .iter()
            .filter_map(|edge| edge.source.as_ref())
    }

    pub fn has_edge(&self, source: &N, target: &N) -> bool {
        self.outgoing_edges(source)
            .iter()
            .any(|edge| &edge.target == target)
    }

    pub fn has_node(&self, node: &N) -> bool {
        self.outgoing.contains_key(node)
    }

    /// Nodes with in-degree zero.
    pub fn root_nodes(&self) -> impl Iterator<Item = &N> + '_ {
        self.nodes
            .iter()
            .filter(|node| self.incoming_edges(node).is_empty())
    }

    /// Nodes with out-degree zero.
    pub fn leaf_nodes(&self) -> impl Iterator<Item = &N> + '_ {
        self.nodes
            .iter()
            .filter(|node| self.outgoing_edges(node).is_empty())
    }

    /// Kahn's algorithm. Every node appears after all nodes pointing at it;
    /// ready nodes are taken in insertion order.
    pub fn topological_sort(&self) -> Result<Vec<N>, CycleError> {
        let mut in_degree: HashMap<&N, usize> = self
            .nodes
            .iter()
            .map(|node| (node, self.incoming_edges(node).len()))
            .collect();

        let mut queue: VecDeque<&N> = self
            .nodes
            .iter()
            .filter(|node| in_degree.get(node).copied() == Some(0))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(current) = queue.pop_front() {
            order.push(current.clone());

            for successor in self.successors(current) {
                if let Some(count) = in_degree.get_mut(successor) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        queue.push_back(successor);
                    }
                }
            }
        }

        if order.len() == self.nodes.len() {
            Ok(order)
        } else {
            Err(CycleError {
                unresolved: self.nodes.len() - order.len(),
                total: self.nodes.len(),
            })
        }
    }

    /// Depth-first search for a back edge. Self-loops only count when
    /// `consider_self_cycles` is set.
    pub fn has_cycles(&self, consider_self_cycles: bool) -> bool {
        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();

        self.nodes.iter().any(|node| {
            !visited.contains(node)
                && self.has_cycle_from(node, &mut visited, &mut on_stack, consider_self_cycles)
        })
    }

    fn has_cycle_from<'a>(
        &'a self,
        node: &'a N,
        visited: &mut HashSet<&'a N>,
        on_stack: &mut HashSet<&'a N>,
        consider_self_cycles: bool,
    ) -> bool {
        visited.insert(node);
        on_stack.insert(node);

        for successor in self.successors(node) {
            if !consider_self_cycles && successor == node {
                continue;
            }
            if !visited.contains(successor) {
                if self.has_cycle_from(successor, visited, on_stack, consider_self_cycles) {
                    return true;
                }
            } else if on_stack.contains(successor) {
                return true;
            }
        }

        on_stack.remove(node);
        false
    }

    /// Tarjan's algorithm. Every node belongs to exactly one component;
    /// acyclic nodes come back as singletons.
    pub fn strongly_connected_components(&self) -> Vec<Vec<N>> {
        let mut tarjan = Tarjan {
            graph: self,
            next_index: 0,
            stack: Vec::new(),
            on_stack: HashSet::new(),
            indices: HashMap::new(),
            low_links: HashMap::new(),
            components: Vec::new(),
        };

        for node in &self.nodes {
            if !tarjan.indices.contains_key(node) {
                tarjan.strong_connect(node);
            }
        }

        tarjan.components
    }

    pub fn statistics(&self) -> GraphStatistics {
        GraphStatistics {
            node_count: self.node_count(),
            edge_count: self.edge_count(),
            root_node_count: self.root_nodes().count(),
            leaf_node_count: self.leaf_nodes().count(),
            has_cycles: self.has_cycles(false),
        }
    }
}

struct Tarjan<'a, N, E> {
    graph: &'a DirectedGraph<N, E>,
    next_index: usize,
    stack: Vec<&'a N>,
    on_stack: HashSet<&'a N>,
    indices: HashMap<&'a N, usize>,
    low_links: HashMap<&'a N, usize>,
    components: Vec<Vec<N>>,
}

impl<'a, N, E> Tarjan<'a, N, E>
where
    N: Clone + Eq + Hash,
    E: Clone + PartialEq,
{
    fn strong_connect(&mut self, node: &'a N) {
        let index = self.next_index;
        self.next_index += 1;
        self.indices.insert(node, index);
        self.low_links.insert(node, index);
        self.stack.push(node);
        self.on_stack.insert(node);

        for successor in self.graph.successors(node) {
            if !self.indices.contains_key(successor) {
                self.strong_connect(successor);
                let low = self.low_links[node].min(self.low_links[successor]);
                self.low_links.insert(node, low);
            } else if self.on_stack.contains(successor) {
                let low = self.low_links[node].min(self.indices[successor]);
                self.low_links.insert(node, low);
            }
        }

        if self.low_links[node] == self.indices[node] {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack.remove(member);
                component.push(member.clone());
                if member == node {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type StrGraph = DirectedGraph<&'static str, &'static str>;

    fn position(order: &[&'static str], node: &str) -> usize {
        order.iter().position(|item| *item == node).unwrap()
    }

    #[test]
    fn add_edge_creates_nodes_and_edges() {
        let mut graph = StrGraph::new();
        graph.add_edge("A", "B", Some("edge_ab"));

        assert!(graph.has_node(&"A"));
        assert!(graph.has_node(&"B"));
        assert!(graph.has_edge(&"A", &"B"));
        assert_eq!(graph.outgoing_edges(&"A").len(), 1);
        assert_eq!(graph.incoming_edges(&"B").len(), 1);
    }

    #[test]
    fn parallel_edges_with_distinct_data_are_kept() {
        let mut graph = StrGraph::new();
        graph.add_edge("A", "B", Some("fk_1"));
        graph.add_edge("A", "B", Some("fk_2"));
        graph.add_edge("A", "B", Some("fk_1"));

        assert_eq!(graph.outgoing_edges(&"A").len(), 2);
        assert_eq!(graph.incoming_edges(&"B").len(), 2);
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn add_node_is_idempotent() {
        let mut graph = StrGraph::new();
        graph.add_edge("A", "B", None);
        graph.add_node("A");

        assert_eq!(graph.node_count(), 2);
        assert!(graph.has_edge(&"A", &"B"));
    }

    #[test]
    fn unknown_nodes_have_no_edges() {
        let graph = StrGraph::new();
        assert!(graph.outgoing_edges(&"missing").is_empty());
        assert!(graph.incoming_edges(&"missing").is_empty());
        assert_eq!(graph.successors(&"missing").count(), 0);
    }

    #[test]
    fn remove_edge_removes_only_that_edge() {
        let mut graph = StrGraph::new();
        graph.add_edge("A", "B", None);
        graph.add_edge("A", "C", None);

        assert!(graph.remove_edge(&"A", &"B"));
        assert!(!graph.has_edge(&"A", &"B"));
        assert!(graph.has_edge(&"A", &"C"));
        assert!(graph.incoming_edges(&"B").is_empty());
        assert!(!graph.remove_edge(&"A", &"B"));
    }

    #[test]
    fn remove_node_removes_incident_edges() {
        let mut graph = StrGraph::new();
        graph.add_edge("A", "B", None);
        graph.add_edge("B", "C", None);

        assert!(graph.remove_node(&"B"));
        assert_eq!(graph.successors(&"A").count(), 0);
        assert_eq!(graph.predecessors(&"C").count(), 0);
        assert!(!graph.has_node(&"B"));
        assert!(!graph.remove_node(&"B"));
        assert_eq!(graph.nodes(), &["A", "C"]);
    }

    #[test]
    fn roots_and_leaves() {
        let mut graph = StrGraph::new();
        graph.add_edge("A", "B", None);
        graph.add_edge("B", "C", None);
        graph.add_node("D");

        let roots: Vec<_> = graph.root_nodes().copied().collect();
        let leaves: Vec<_> = graph.leaf_nodes().copied().collect();
        assert_eq!(roots, vec!["A", "D"]);
        assert_eq!(leaves, vec!["C", "D"]);
    }

    #[test]
    fn topological_sort_orders_dag() {
        let mut graph = StrGraph::new();
        graph.add_edge("A", "B", None);
        graph.add_edge("A", "C", None);
        graph.add_edge("B", "D", None);
        graph.add_edge("C", "D", None);

        let order = graph.topological_sort().unwrap();
        assert_eq!(order.len(), graph.node_count());
        for node in graph.nodes() {
            for successor in graph.successors(node) {
                assert!(position(&order, node) < position(&order, successor));
            }
        }
    }

    #[test]
    fn topological_sort_handles_parallel_edges() {
        let mut graph = StrGraph::new();
        graph.add_edge("A", "B", Some("one"));
        graph.add_edge("A", "B", Some("two"));

        assert_eq!(graph.topological_sort().unwrap(), vec!["A", "B"]);
    }

    #[test]
    fn topological_sort_fails_on_cycle() {
        let mut graph = StrGraph::new();
        graph.add_edge("A", "B", None);
        graph.add_edge("B", "C", None);
        graph.add_edge("C", "A", None);
        graph.add_node("D");

        let err = graph.topological_sort().unwrap_err();
        assert_eq!(err.unresolved, 3);
        assert_eq!(err.total, 4);
        assert!(graph.has_cycles(false));
        assert!(graph
            .strongly_connected_components()
            .iter()
            .any(|component| component.len() > 1));
    }

    #[test]
    fn self_loop_honors_flag() {
        let mut graph = StrGraph::new();
        graph.add_edge("A", "A", None);

        assert!(!graph.has_cycles(false));
        assert!(graph.has_cycles(true));
        assert!(graph.topological_sort().is_err());
    }

    #[test]
    fn strongly_connected_components_are_detected() {
        let mut graph = StrGraph::new();
        graph.add_edge("A", "B", None);
        graph.add_edge("B", "A", None);
        graph.add_node("C");
        graph.add_edge("D", "E", None);
        graph.add_edge("E", "D", None);

        let components = graph.strongly_connected_components();
        assert_eq!(components.len(), 3);
        let has = |members: &[&str]| {
            components.iter().any(|component| {
                component.len() == members.len()
                    && members.iter().all(|member| component.contains(member))
            })
        };
        assert!(has(&["A", "B"]));
        assert!(has(&["C"]));
        assert!(has(&["D", "E"]));
    }

    #[test]
    fn statistics_report_counts() {
        let mut graph = StrGraph::new();
        graph.add_edge("A", "B", None);
        graph.add_edge("B", "C", None);
        graph.add_node("D");

        let stats = graph.statistics();
        assert_eq!(stats.node_count, 4);
        assert_eq!(stats.edge_count, 2);
        assert_eq!(stats.root_node_count, 2);
        assert_eq!(stats.leaf_node_count, 2);
        assert!(!stats.has_cycles);
        assert_eq!(
            stats.to_string(),
            "Nodes: 4, Edges: 2, Roots: 2, Leaves: 2, Cycles: false"
        );
    }
}
