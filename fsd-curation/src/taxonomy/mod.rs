//! Taxonomy graph
//!
//! Typed, in-memory view of the taxonomy: nodes plus two independent
//! directed relations, the structural `parent`/`child` hierarchy and the
//! curated `propagate_to_parent`/`propagate_from` relation along which ground
//! truth is copied upward.
//!
//! The graph is read-mostly: it is built once (from the database or a JSON
//! import) and then shared immutably, typically behind an `Arc`.

pub mod loader;
pub mod store;
pub mod tree;

use fsd_common::db::TaxonomyNode;
use fsd_common::{Error, Result};
use std::collections::{HashMap, HashSet, VecDeque};

pub use loader::{parse_beginner_categories, parse_taxonomy_json, BeginnerCategory, TaxonomyImport};
pub use tree::TreeNode;

/// Edge direction used by neighbour and closure queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Parents,
    Children,
    PropagateTo,
    PropagateFrom,
}

#[derive(Debug, Clone, Default)]
pub struct TaxonomyGraph {
    nodes: HashMap<String, TaxonomyNode>,
    /// Node ids in insertion order, for deterministic iteration
    order: Vec<String>,
    parents: HashMap<String, Vec<String>>,
    children: HashMap<String, Vec<String>>,
    propagate_to: HashMap<String, Vec<String>>,
    propagate_from: HashMap<String, Vec<String>>,
}

impl TaxonomyGraph {
    /// Build a graph from nodes and `(node_id, parent_id)` edge lists
    ///
    /// Duplicate nodes or edges are collapsed. An edge naming an unknown node
    /// is rejected as invalid input.
    pub fn new(
        nodes: Vec<TaxonomyNode>,
        parent_edges: &[(String, String)],
        propagation_edges: &[(String, String)],
    ) -> Result<Self> {
        let mut graph = TaxonomyGraph::default();

        for node in nodes {
            if !graph.nodes.contains_key(&node.node_id) {
                graph.order.push(node.node_id.clone());
            }
            graph.nodes.insert(node.node_id.clone(), node);
        }

        for (node_id, parent_id) in parent_edges {
            graph.check_edge(node_id, parent_id, "parent")?;
            push_unique(&mut graph.parents, node_id, parent_id);
            push_unique(&mut graph.children, parent_id, node_id);
        }

        for (node_id, parent_id) in propagation_edges {
            graph.check_edge(node_id, parent_id, "propagation")?;
            push_unique(&mut graph.propagate_to, node_id, parent_id);
            push_unique(&mut graph.propagate_from, parent_id, node_id);
        }

        Ok(graph)
    }

    fn check_edge(&self, node_id: &str, parent_id: &str, kind: &str) -> Result<()> {
        for id in [node_id, parent_id] {
            if !self.nodes.contains_key(id) {
                return Err(Error::InvalidInput(format!(
                    "{} edge {} -> {} references unknown node {}",
                    kind, node_id, parent_id, id
                )));
            }
        }
        Ok(())
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn get_node(&self, node_id: &str) -> Result<&TaxonomyNode> {
        self.nodes
            .get(node_id)
            .ok_or_else(|| Error::NotFound(format!("Taxonomy node {}", node_id)))
    }

    /// All nodes sorted by name (ties broken by node id)
    pub fn get_all_nodes(&self) -> Vec<&TaxonomyNode> {
        let mut nodes: Vec<&TaxonomyNode> = self.nodes.values().collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.node_id.cmp(&b.node_id)));
        nodes
    }

    /// Edge lists as `(node_id, parent_id)` pairs, for persisting the graph
    pub fn parent_edges(&self) -> Vec<(String, String)> {
        self.edge_pairs(&self.parents)
    }

    pub fn propagation_edges(&self) -> Vec<(String, String)> {
        self.edge_pairs(&self.propagate_to)
    }

    fn edge_pairs(&self, relation: &HashMap<String, Vec<String>>) -> Vec<(String, String)> {
        self.order
            .iter()
            .flat_map(|id| {
                relation
                    .get(id)
                    .into_iter()
                    .flatten()
                    .map(move |parent| (id.clone(), parent.clone()))
            })
            .collect()
    }

    /// Nodes without structural parents, in insertion order
    pub fn roots(&self) -> Vec<&TaxonomyNode> {
        self.order
            .iter()
            .filter(|id| self.neighbor_ids(id, Direction::Parents).is_empty())
            .filter_map(|id| self.nodes.get(id))
            .collect()
    }

    pub fn get_parents(&self, node_id: &str) -> Result<Vec<&TaxonomyNode>> {
        self.neighbors(node_id, Direction::Parents)
    }

    pub fn get_children(&self, node_id: &str) -> Result<Vec<&TaxonomyNode>> {
        self.neighbors(node_id, Direction::Children)
    }

    /// Immediate propagation targets
    pub fn get_propagate_to_parents(&self, node_id: &str) -> Result<Vec<&TaxonomyNode>> {
        self.neighbors(node_id, Direction::PropagateTo)
    }

    pub fn get_propagate_from_children(&self, node_id: &str) -> Result<Vec<&TaxonomyNode>> {
        self.neighbors(node_id, Direction::PropagateFrom)
    }

    pub fn get_all_ancestors(&self, node_id: &str) -> Result<Vec<&TaxonomyNode>> {
        self.closure(node_id, Direction::Parents)
    }

    pub fn get_all_descendants(&self, node_id: &str) -> Result<Vec<&TaxonomyNode>> {
        self.closure(node_id, Direction::Children)
    }

    /// Every node that receives ground truth propagated from `node_id`,
    /// directly or through a chain of propagation edges
    pub fn get_all_propagate_to_parents(&self, node_id: &str) -> Result<Vec<&TaxonomyNode>> {
        self.closure(node_id, Direction::PropagateTo)
    }

    pub fn get_all_propagate_from_children(&self, node_id: &str) -> Result<Vec<&TaxonomyNode>> {
        self.closure(node_id, Direction::PropagateFrom)
    }

    /// Nodes sharing at least one structural parent with `node_id`
    pub fn get_siblings(&self, node_id: &str) -> Result<Vec<&TaxonomyNode>> {
        self.get_node(node_id)?;

        let mut seen: HashSet<&str> = HashSet::new();
        seen.insert(node_id);

        let mut siblings = Vec::new();
        for parent in self.neighbor_ids(node_id, Direction::Parents) {
            for child in self.neighbor_ids(parent, Direction::Children) {
                if seen.insert(child.as_str()) {
                    siblings.extend(self.nodes.get(child));
                }
            }
        }
        Ok(siblings)
    }

    /// Nodes exactly `level` structural hops below a root
    ///
    /// Level 0 is every root; level k is the union of the children of level
    /// k-1. A node reachable by chains of different length shows up at each
    /// of those levels.
    pub fn get_nodes_at_level(&self, level: usize) -> Vec<&TaxonomyNode> {
        let mut current: Vec<&str> = self.roots().into_iter().map(|n| n.node_id.as_str()).collect();

        for _ in 0..level {
            let mut seen: HashSet<&str> = HashSet::new();
            let mut next = Vec::new();
            for id in current {
                for child in self.neighbor_ids(id, Direction::Children) {
                    if seen.insert(child.as_str()) {
                        next.push(child.as_str());
                    }
                }
            }
            if next.is_empty() {
                return Vec::new();
            }
            current = next;
        }

        current.into_iter().filter_map(|id| self.nodes.get(id)).collect()
    }

    /// Every distinct root-to-node path, each ending with `node_id`
    ///
    /// A root yields the single path `[node_id]`. Paths are returned sorted.
    pub fn get_hierarchy_paths(&self, node_id: &str) -> Result<Vec<Vec<String>>> {
        self.get_node(node_id)?;

        let mut on_path: Vec<&str> = Vec::new();
        let mut paths = self.paths_to(node_id, &mut on_path);
        paths.sort();
        paths.dedup();
        Ok(paths)
    }

    fn paths_to<'a>(&'a self, node_id: &'a str, on_path: &mut Vec<&'a str>) -> Vec<Vec<String>> {
        on_path.push(node_id);

        let mut paths = Vec::new();
        for parent in self.neighbor_ids(node_id, Direction::Parents) {
            // A parent already on the current chain would be a cycle
            if on_path.contains(&parent.as_str()) {
                continue;
            }
            for mut path in self.paths_to(parent, on_path) {
                path.push(node_id.to_string());
                paths.push(path);
            }
        }

        on_path.pop();

        if paths.is_empty() {
            paths.push(vec![node_id.to_string()]);
        }
        paths
    }

    fn neighbors(&self, node_id: &str, direction: Direction) -> Result<Vec<&TaxonomyNode>> {
        self.get_node(node_id)?;
        Ok(self
            .neighbor_ids(node_id, direction)
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .collect())
    }

    fn neighbor_ids(&self, node_id: &str, direction: Direction) -> &[String] {
        let relation = match direction {
            Direction::Parents => &self.parents,
            Direction::Children => &self.children,
            Direction::PropagateTo => &self.propagate_to,
            Direction::PropagateFrom => &self.propagate_from,
        };
        relation.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Transitive closure in breadth-first order, self excluded
    ///
    /// The visited set makes diamonds (and stray cycles) yield each node
    /// once. There is no depth limit.
    fn closure(&self, node_id: &str, direction: Direction) -> Result<Vec<&TaxonomyNode>> {
        self.get_node(node_id)?;

        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        visited.insert(node_id);
        queue.push_back(node_id);

        let mut out = Vec::new();
        while let Some(id) = queue.pop_front() {
            for next in self.neighbor_ids(id, direction) {
                if visited.insert(next.as_str()) {
                    out.extend(self.nodes.get(next));
                    queue.push_back(next.as_str());
                }
            }
        }
        Ok(out)
    }
}

fn push_unique(relation: &mut HashMap<String, Vec<String>>, from: &str, to: &str) {
    let targets = relation.entry(from.to_string()).or_default();
    if !targets.iter().any(|t| t == to) {
        targets.push(to.to_string());
    }
}
