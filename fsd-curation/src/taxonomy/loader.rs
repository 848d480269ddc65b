//! Taxonomy JSON import
//!
//! Accepts the ontology export format, either a map keyed by node id or a
//! plain list of entries:
//!
//! ```json
//! {
//!   "/m/0dgw9r": {
//!     "id": "/m/0dgw9r",
//!     "name": "Human sounds",
//!     "child_ids": ["/m/09l8g"],
//!     "restrictions": ["abstract"]
//!   },
//!   "/m/09l8g": {
//!     "id": "/m/09l8g",
//!     "name": "Human voice",
//!     "propagate_to_parent_ids": ["/m/0dgw9r"]
//!   }
//! }
//! ```
//!
//! Parent edges are the union of the `child_ids` of every entry and any
//! explicit `parent_ids`.

use super::TaxonomyGraph;
use fsd_common::db::TaxonomyNode;
use fsd_common::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;

const RESTRICTION_ABSTRACT: &str = "abstract";
const RESTRICTION_OMITTED: &str = "omittedTT";

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    citation_uri: String,
    #[serde(default)]
    child_ids: Vec<String>,
    #[serde(default)]
    parent_ids: Vec<String>,
    #[serde(default)]
    propagate_to_parent_ids: Vec<String>,
    #[serde(default)]
    restrictions: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTaxonomy {
    Map(BTreeMap<String, RawEntry>),
    List(Vec<RawEntry>),
}

/// Parsed taxonomy, ready to be persisted or turned into a graph
#[derive(Debug, Clone, Default)]
pub struct TaxonomyImport {
    pub nodes: Vec<TaxonomyNode>,
    /// `(node_id, parent_id)` structural edges
    pub parent_edges: Vec<(String, String)>,
    /// `(node_id, parent_id)` propagation edges
    pub propagation_edges: Vec<(String, String)>,
}

impl TaxonomyImport {
    /// Validate edges and build the in-memory graph
    pub fn to_graph(&self) -> Result<TaxonomyGraph> {
        TaxonomyGraph::new(
            self.nodes.clone(),
            &self.parent_edges,
            &self.propagation_edges,
        )
    }
}

/// Parse a taxonomy JSON document
pub fn parse_taxonomy_json(content: &str) -> Result<TaxonomyImport> {
    let raw: RawTaxonomy = serde_json::from_str(content)?;
    let entries: Vec<(String, RawEntry)> = match raw {
        RawTaxonomy::Map(map) => map
            .into_iter()
            .map(|(key, entry)| (entry.id.clone().unwrap_or(key), entry))
            .collect(),
        RawTaxonomy::List(list) => list
            .into_iter()
            .map(|entry| {
                let id = entry.id.clone().ok_or_else(|| {
                    Error::InvalidInput(format!("Taxonomy entry '{}' has no id", entry.name))
                })?;
                Ok((id, entry))
            })
            .collect::<Result<_>>()?,
    };

    let mut import = TaxonomyImport::default();
    for (id, entry) in entries {
        for child_id in &entry.child_ids {
            push_edge(&mut import.parent_edges, child_id, &id);
        }
        for parent_id in &entry.parent_ids {
            push_edge(&mut import.parent_edges, &id, parent_id);
        }
        for parent_id in &entry.propagate_to_parent_ids {
            push_edge(&mut import.propagation_edges, &id, parent_id);
        }

        let mut node = TaxonomyNode::new(id, entry.name);
        node.description = entry.description;
        node.citation_uri = entry.citation_uri;
        node.is_abstract = entry.restrictions.iter().any(|r| r == RESTRICTION_ABSTRACT);
        node.omitted = entry.restrictions.iter().any(|r| r == RESTRICTION_OMITTED);
        import.nodes.push(node);
    }

    // Surface dangling references now rather than at persist time
    import.to_graph()?;
    Ok(import)
}

fn push_edge(edges: &mut Vec<(String, String)>, node_id: &str, parent_id: &str) {
    if !edges.iter().any(|(n, p)| n == node_id && p == parent_id) {
        edges.push((node_id.to_string(), parent_id.to_string()));
    }
}

/// Beginner-task flag for one category
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BeginnerCategory {
    pub id: String,
    #[serde(default)]
    pub beginner_category: bool,
}

/// Parse a list of `{"id": ..., "beginner_category": bool}` entries
pub fn parse_beginner_categories(content: &str) -> Result<Vec<BeginnerCategory>> {
    Ok(serde_json::from_str(content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_NODES: &str = r#"{
        "/m/0dgw9r": {
            "id": "/m/0dgw9r",
            "name": "Sorted second",
            "description": "This item should be second if sorted",
            "child_ids": ["/m/09l8g"],
            "restrictions": ["abstract"],
            "citation_uri": ""
        },
        "/m/09l8g": {
            "id": "/m/09l8g",
            "name": "Sorted first",
            "description": "This item should be first if sorted",
            "child_ids": [],
            "parent_ids": ["/m/0dgw9r"],
            "restrictions": ["omittedTT"],
            "citation_uri": ""
        }
    }"#;

    #[test]
    fn test_parse_map_format() {
        let import = parse_taxonomy_json(TWO_NODES).unwrap();
        assert_eq!(import.nodes.len(), 2);
        // child_ids and parent_ids describe the same edge once
        assert_eq!(
            import.parent_edges,
            vec![("/m/09l8g".to_string(), "/m/0dgw9r".to_string())]
        );

        let graph = import.to_graph().unwrap();
        let parent = graph.get_node("/m/0dgw9r").unwrap();
        assert!(parent.is_abstract);
        assert!(!parent.omitted);
        assert!(graph.get_node("/m/09l8g").unwrap().omitted);
        assert_eq!(graph.get_parents("/m/09l8g").unwrap()[0].node_id, "/m/0dgw9r");
    }

    #[test]
    fn test_parse_list_format_with_propagation() {
        let json = r#"[
            {"id": "1", "name": "Root", "child_ids": ["2"]},
            {"id": "2", "name": "Leaf", "propagate_to_parent_ids": ["1"]}
        ]"#;
        let graph = parse_taxonomy_json(json).unwrap().to_graph().unwrap();
        assert_eq!(graph.get_all_propagate_to_parents("2").unwrap()[0].node_id, "1");
        assert_eq!(graph.get_children("1").unwrap()[0].node_id, "2");
    }

    #[test]
    fn test_dangling_reference_rejected() {
        let json = r#"[{"id": "1", "name": "Root", "child_ids": ["404"]}]"#;
        assert!(matches!(parse_taxonomy_json(json), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(matches!(parse_taxonomy_json("{not json"), Err(Error::Json(_))));
    }

    #[test]
    fn test_parse_beginner_categories() {
        let json = r#"[{"id": "1", "beginner_category": true}, {"id": "2"}]"#;
        let categories = parse_beginner_categories(json).unwrap();
        assert!(categories[0].beginner_category);
        assert!(!categories[1].beginner_category);
    }
}
