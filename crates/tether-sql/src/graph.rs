//! Table dependency graph and topological ordering.
//!
//! The write orchestrator needs referenced tables written before referring
//! tables. This graph is transaction-local and never shared, so it needs no
//! locking; cycle detection and ordering both run a single DFS.

use std::collections::{BTreeMap, BTreeSet};

use tether_types::TableRef;

use crate::error::SqlError;

/// DFS visit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// Not yet visited.
    White,
    /// On the current DFS stack; revisiting means a cycle.
    Grey,
    /// Fully explored.
    Black,
}

/// Directed dependency graph over tables.
///
/// An edge `A -> B` means "A depends on B": B must be written first.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: BTreeSet<TableRef>,
    edges: BTreeMap<TableRef, BTreeSet<TableRef>>,
}

impl DependencyGraph {
    /// Create an empty graph.
    pub const fn new() -> Self {
        Self {
            nodes: BTreeSet::new(),
            edges: BTreeMap::new(),
        }
    }

    /// Add a table with no dependencies (yet).
    pub fn add_node(&mut self, table: TableRef) {
        self.nodes.insert(table);
    }

    /// Record that `dependent` must be written after `dependency`.
    ///
    /// Self-edges are ignored; a table never depends on itself for
    /// ordering purposes.
    pub fn add_edge(&mut self, dependent: TableRef, dependency: TableRef) {
        if dependent == dependency {
            return;
        }
        self.nodes.insert(dependent.clone());
        self.nodes.insert(dependency.clone());
        self.edges.entry(dependent).or_default().insert(dependency);
    }

    /// Compute a write order in which every table follows its dependencies.
    ///
    /// DFS post-order; deterministic because nodes and edges iterate in
    /// `BTree` order.
    ///
    /// # Errors
    ///
    /// Returns [`SqlError::DependencyCycle`] naming the cycle if the graph
    /// is not a DAG. Detection happens before any ordering is returned, so
    /// callers can fail before touching the store.
    pub fn topological_order(&self) -> Result<Vec<TableRef>, SqlError> {
        let mut marks: BTreeMap<&TableRef, Mark> =
            self.nodes.iter().map(|n| (n, Mark::White)).collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = Vec::new();

        for node in &self.nodes {
            if marks.get(node) == Some(&Mark::White) {
                self.visit(node, &mut marks, &mut stack, &mut order)?;
            }
        }
        Ok(order)
    }

    /// Recursive DFS visit. `stack` holds the grey path for cycle reports.
    fn visit<'a>(
        &'a self,
        node: &'a TableRef,
        marks: &mut BTreeMap<&'a TableRef, Mark>,
        stack: &mut Vec<TableRef>,
        order: &mut Vec<TableRef>,
    ) -> Result<(), SqlError> {
        marks.insert(node, Mark::Grey);
        stack.push(node.clone());

        if let Some(deps) = self.edges.get(node) {
            for dep in deps {
                match marks.get(dep) {
                    Some(Mark::Grey) => {
                        // Trim the stack down to where the cycle re-enters.
                        let from = stack.iter().position(|t| t == dep).unwrap_or(0);
                        let mut cycle: Vec<TableRef> = stack.iter().skip(from).cloned().collect();
                        cycle.push(dep.clone());
                        return Err(SqlError::DependencyCycle(cycle));
                    }
                    Some(Mark::White) => self.visit(dep, marks, stack, order)?,
                    _ => {}
                }
            }
        }

        stack.pop();
        marks.insert(node, Mark::Black);
        order.push(node.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use crate::error::SqlError;

    fn t(name: &str) -> TableRef {
        TableRef::new("public", name)
    }

    #[test]
    fn dependencies_precede_dependents() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(t("friends"), t("users"));
        graph.add_edge(t("friends"), t("groups"));
        graph.add_node(t("islands"));

        let order = graph.topological_order().expect("acyclic");
        let pos = |name: &str| order.iter().position(|x| x.table == name).expect("present");
        assert!(pos("users") < pos("friends"));
        assert!(pos("groups") < pos("friends"));
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn chain_orders_leaf_first() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(t("c"), t("b"));
        graph.add_edge(t("b"), t("a"));
        let order = graph.topological_order().expect("acyclic");
        let names: Vec<&str> = order.iter().map(|x| x.table.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn cycle_is_reported_with_its_members() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(t("a"), t("b"));
        graph.add_edge(t("b"), t("a"));

        match graph.topological_order() {
            Err(SqlError::DependencyCycle(cycle)) => {
                assert!(cycle.iter().any(|x| x.table == "a"));
                assert!(cycle.iter().any(|x| x.table == "b"));
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn self_edges_are_ignored() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(t("a"), t("a"));
        assert_eq!(graph.topological_order().expect("acyclic").len(), 1);
    }
}
