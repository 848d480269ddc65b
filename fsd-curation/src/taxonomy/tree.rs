//! Nested tree serialization of the taxonomy, for visualization

use super::TaxonomyGraph;
use fsd_common::db::TaxonomyNode;
use serde::Serialize;

/// Name of the synthetic node placed above all roots
pub const TREE_ROOT_NAME: &str = "Ontology";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeNode {
    /// `None` only for the synthetic root
    pub node_id: Option<String>,
    pub name: String,
    #[serde(rename = "abstract")]
    pub is_abstract: bool,
    pub omitted: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

impl TaxonomyGraph {
    /// Full nested tree under a synthetic root over every level-0 node
    ///
    /// Nodes with several parents appear once under each of them.
    pub fn as_tree(&self) -> TreeNode {
        let mut on_path = Vec::new();
        TreeNode {
            node_id: None,
            name: TREE_ROOT_NAME.to_string(),
            is_abstract: false,
            omitted: false,
            children: self
                .roots()
                .into_iter()
                .map(|root| self.subtree(root, &mut on_path))
                .collect(),
        }
    }

    fn subtree<'a>(&'a self, node: &'a TaxonomyNode, on_path: &mut Vec<&'a str>) -> TreeNode {
        on_path.push(node.node_id.as_str());

        let children = self
            .get_children(&node.node_id)
            .unwrap_or_default()
            .into_iter()
            .filter(|child| !on_path.contains(&child.node_id.as_str()))
            .collect::<Vec<_>>()
            .into_iter()
            .map(|child| self.subtree(child, on_path))
            .collect();

        on_path.pop();

        TreeNode {
            node_id: Some(node.node_id.clone()),
            name: node.name.clone(),
            is_abstract: node.is_abstract,
            omitted: node.omitted,
            children,
        }
    }
}
