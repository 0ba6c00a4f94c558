//! [`ResourceGraph`] – arena of [`GraphNode`]s keyed by [`ResourceName`].
//!
//! Only *required* dependencies are stored as edges.  An edge points from a
//! dependency to its dependent, so a topological order lists dependencies
//! first.  Optional and weak relations are never stored; they are looked up
//! by name whenever a live dependency set is assembled, which is what lets
//! them form cycles.
//!
//! Required edges are kept acyclic: [`ResourceGraph::add_edge`] refuses any
//! edge that would close a cycle.

use std::collections::{HashMap, HashSet};

use mechos_types::{MechError, ResourceName};
use petgraph::Direction;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{Dfs, EdgeRef, Reversed};

use crate::node::GraphNode;
use crate::resolve::NameIndex;

/// The resource graph.
#[derive(Default)]
pub struct ResourceGraph {
    graph: StableDiGraph<GraphNode, ()>,
    index: HashMap<ResourceName, NodeIndex>,
    clock: u64,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, name: &ResourceName) -> bool {
        self.index.contains_key(name)
    }

    pub fn node(&self, name: &ResourceName) -> Option<&GraphNode> {
        self.index.get(name).map(|&idx| &self.graph[idx])
    }

    pub fn node_mut(&mut self, name: &ResourceName) -> Option<&mut GraphNode> {
        self.index.get(name).map(|&idx| &mut self.graph[idx])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.graph.node_indices().map(move |idx| &self.graph[idx])
    }

    /// Every node name, sorted.
    pub fn names(&self) -> Vec<ResourceName> {
        let mut names: Vec<ResourceName> = self.index.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of nodes waiting for a build or reconfigure.
    pub fn dirty_names(&self) -> HashSet<ResourceName> {
        self.nodes()
            .filter(|n| n.dirty)
            .map(|n| n.name.clone())
            .collect()
    }

    /// Advance and return the logical clock used to stamp instance swaps.
    pub(crate) fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    // ── Topology mutation ────────────────────────────────────────────────────

    /// Insert a node.
    ///
    /// # Errors
    ///
    /// Returns [`MechError::DuplicateName`] if a node with the same name
    /// already exists.
    pub fn add_node(&mut self, node: GraphNode) -> Result<(), MechError> {
        if self.index.contains_key(&node.name) {
            return Err(MechError::DuplicateName {
                kind: "resource".to_string(),
                name: node.name.to_string(),
            });
        }
        let name = node.name.clone();
        let idx = self.graph.add_node(node);
        self.index.insert(name, idx);
        Ok(())
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, name: &ResourceName) -> Option<GraphNode> {
        let idx = self.index.remove(name)?;
        self.graph.remove_node(idx)
    }

    /// Record that `dependent` requires `dependency`.
    ///
    /// # Errors
    ///
    /// Returns [`MechError::NotFound`] if either node is missing and
    /// [`MechError::CircularDependency`] if the edge would close a cycle.
    pub fn add_edge(
        &mut self,
        dependency: &ResourceName,
        dependent: &ResourceName,
    ) -> Result<(), MechError> {
        let from = self.idx(dependency)?;
        let to = self.idx(dependent)?;
        if from == to || has_path_connecting(&self.graph, to, from, None) {
            return Err(MechError::CircularDependency {
                from: dependent.to_string(),
                to: dependency.to_string(),
            });
        }
        self.graph.update_edge(from, to, ());
        Ok(())
    }

    /// Drop every required edge into `name`.
    pub fn clear_parents(&mut self, name: &ResourceName) {
        let Some(&idx) = self.index.get(name) else {
            return;
        };
        let edges: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| e.id())
            .collect();
        for edge in edges {
            self.graph.remove_edge(edge);
        }
    }

    // ── Topology queries ─────────────────────────────────────────────────────

    /// Required dependencies of `name`.
    pub fn parents(&self, name: &ResourceName) -> Vec<ResourceName> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Direct dependents of `name`.
    pub fn children(&self, name: &ResourceName) -> Vec<ResourceName> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// Every transitive dependent of `name`, excluding `name` itself.
    pub fn descendants(&self, name: &ResourceName) -> Vec<ResourceName> {
        let Some(&start) = self.index.get(name) else {
            return Vec::new();
        };
        let mut dfs = Dfs::new(&self.graph, start);
        let mut out = Vec::new();
        while let Some(idx) = dfs.next(&self.graph) {
            if idx != start {
                out.push(self.graph[idx].name.clone());
            }
        }
        out.sort();
        out
    }

    /// Every transitive required dependency of `name`.
    pub fn ancestors(&self, name: &ResourceName) -> Vec<ResourceName> {
        let Some(&start) = self.index.get(name) else {
            return Vec::new();
        };
        let reversed = Reversed(&self.graph);
        let mut dfs = Dfs::new(reversed, start);
        let mut out = Vec::new();
        while let Some(idx) = dfs.next(reversed) {
            if idx != start {
                out.push(self.graph[idx].name.clone());
            }
        }
        out.sort();
        out
    }

    /// Dependencies before dependents.
    pub fn topological_order(&self) -> Vec<ResourceName> {
        match toposort(&self.graph, None) {
            Ok(order) => order
                .into_iter()
                .map(|idx| self.graph[idx].name.clone())
                .collect(),
            // add_edge keeps the graph acyclic; fall back to name order.
            Err(_) => self.names(),
        }
    }

    /// Dependents before dependencies; the order resources are closed in.
    pub fn reverse_topological_order(&self) -> Vec<ResourceName> {
        let mut order = self.topological_order();
        order.reverse();
        order
    }

    /// Nodes grouped by depth: level 0 has no required dependencies, level
    /// `n` depends on something in level `n - 1`.  Each level is sorted by
    /// name; the order inside a level carries no meaning.
    pub fn topological_levels(&self) -> Vec<Vec<ResourceName>> {
        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        let Ok(order) = toposort(&self.graph, None) else {
            return vec![self.names()];
        };
        for idx in &order {
            let level = self
                .graph
                .neighbors_directed(*idx, Direction::Incoming)
                .filter_map(|p| depth.get(&p))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(*idx, level);
        }
        let levels = depth.values().copied().max().map_or(0, |m| m + 1);
        let mut out = vec![Vec::new(); levels];
        for (idx, level) in depth {
            out[level].push(self.graph[idx].name.clone());
        }
        for level in &mut out {
            level.sort();
        }
        out
    }

    /// Name index over every local node and every reachable proxy.
    pub fn name_index(&self) -> NameIndex {
        NameIndex::new(
            self.nodes()
                .filter(|n| !n.is_proxy() || n.reachable)
                .map(|n| n.name.clone()),
        )
    }

    fn idx(&self, name: &ResourceName) -> Result<NodeIndex, MechError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| MechError::NotFound(name.to_string()))
    }

    fn neighbors(&self, name: &ResourceName, dir: Direction) -> Vec<ResourceName> {
        let Some(&idx) = self.index.get(name) else {
            return Vec::new();
        };
        let mut out: Vec<ResourceName> = self
            .graph
            .neighbors_directed(idx, dir)
            .map(|n| self.graph[n].name.clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mechos_types::{Api, ResourceConfig};

    fn name(n: &str) -> ResourceName {
        ResourceName::new(Api::component("motor"), n)
    }

    fn graph_with(names: &[&str]) -> ResourceGraph {
        let mut g = ResourceGraph::new();
        for n in names {
            g.add_node(GraphNode::local(ResourceConfig::new(
                Api::component("motor"),
                n,
                "rdk:builtin:fake",
            )))
            .unwrap();
        }
        g
    }

    #[test]
    fn duplicate_node_is_rejected() {
        let mut g = graph_with(&["a"]);
        let dup = GraphNode::local(ResourceConfig::new(Api::component("motor"), "a", "x"));
        assert!(matches!(g.add_node(dup), Err(MechError::DuplicateName { .. })));
    }

    #[test]
    fn edges_and_queries() {
        let mut g = graph_with(&["a", "b", "c", "d"]);
        g.add_edge(&name("a"), &name("b")).unwrap();
        g.add_edge(&name("b"), &name("c")).unwrap();
        g.add_edge(&name("a"), &name("d")).unwrap();

        assert_eq!(g.parents(&name("b")), vec![name("a")]);
        assert_eq!(g.children(&name("a")), vec![name("b"), name("d")]);
        assert_eq!(g.descendants(&name("a")), vec![name("b"), name("c"), name("d")]);
        assert_eq!(g.ancestors(&name("c")), vec![name("a"), name("b")]);
        assert!(g.ancestors(&name("a")).is_empty());

        let order = g.topological_order();
        let pos = |n: &str| order.iter().position(|x| *x == name(n)).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));

        assert_eq!(
            g.topological_levels(),
            vec![vec![name("a")], vec![name("b"), name("d")], vec![name("c")]]
        );
    }

    #[test]
    fn cycles_are_rejected() {
        let mut g = graph_with(&["a", "b", "c"]);
        g.add_edge(&name("a"), &name("b")).unwrap();
        g.add_edge(&name("b"), &name("c")).unwrap();
        assert!(matches!(
            g.add_edge(&name("c"), &name("a")),
            Err(MechError::CircularDependency { .. })
        ));
        assert!(matches!(
            g.add_edge(&name("a"), &name("a")),
            Err(MechError::CircularDependency { .. })
        ));
        assert!(matches!(
            g.add_edge(&name("a"), &name("zz")),
            Err(MechError::NotFound(_))
        ));
    }

    #[test]
    fn clear_parents_and_remove() {
        let mut g = graph_with(&["a", "b", "c"]);
        g.add_edge(&name("a"), &name("c")).unwrap();
        g.add_edge(&name("b"), &name("c")).unwrap();
        g.clear_parents(&name("c"));
        assert!(g.parents(&name("c")).is_empty());

        g.add_edge(&name("a"), &name("c")).unwrap();
        assert!(g.remove_node(&name("a")).is_some());
        assert!(g.parents(&name("c")).is_empty());
        assert!(!g.contains(&name("a")));
        assert_eq!(g.len(), 2);
        assert!(g.remove_node(&name("a")).is_none());
    }

    #[test]
    fn reverse_order_closes_dependents_first() {
        let mut g = graph_with(&["base", "arm"]);
        g.add_edge(&name("base"), &name("arm")).unwrap();
        assert_eq!(g.reverse_topological_order(), vec![name("arm"), name("base")]);
    }
}
