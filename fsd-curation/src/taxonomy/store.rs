//! Taxonomy persistence
//!
//! Loads the graph from `taxonomy_nodes`, `taxonomy_parents` and
//! `taxonomy_propagation`, and writes imports back in one transaction.

use super::{BeginnerCategory, TaxonomyGraph, TaxonomyImport};
use fsd_common::db::TaxonomyNode;
use fsd_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::collections::HashSet;
use tracing::{info, warn};

/// Summary of a taxonomy import
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub nodes: usize,
    pub parent_edges: usize,
    pub propagation_edges: usize,
    /// Nodes absent from the import that were removed
    pub removed_nodes: usize,
    /// Nodes absent from the import that are still annotated and were kept
    pub kept_stale_nodes: usize,
}

/// Load the whole taxonomy into memory
pub async fn load_taxonomy(pool: &SqlitePool) -> Result<TaxonomyGraph> {
    let rows = sqlx::query(
        r#"
        SELECT node_id, name, description, citation_uri, is_abstract, omitted,
               advanced_task, beginner_task, nb_ground_truth
        FROM taxonomy_nodes
        ORDER BY rowid
        "#,
    )
    .fetch_all(pool)
    .await?;

    let nodes = rows
        .iter()
        .map(node_from_row)
        .collect::<Result<Vec<_>>>()?;

    let parent_edges: Vec<(String, String)> =
        sqlx::query_as("SELECT node_id, parent_id FROM taxonomy_parents ORDER BY rowid")
            .fetch_all(pool)
            .await?;

    let propagation_edges: Vec<(String, String)> =
        sqlx::query_as("SELECT node_id, parent_id FROM taxonomy_propagation ORDER BY rowid")
            .fetch_all(pool)
            .await?;

    let graph = TaxonomyGraph::new(nodes, &parent_edges, &propagation_edges)?;
    info!(
        "Loaded taxonomy: {} nodes, {} parent edges, {} propagation edges",
        graph.num_nodes(),
        parent_edges.len(),
        propagation_edges.len()
    );
    Ok(graph)
}

fn node_from_row(row: &SqliteRow) -> Result<TaxonomyNode> {
    Ok(TaxonomyNode {
        node_id: row.try_get("node_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        citation_uri: row.try_get("citation_uri")?,
        is_abstract: row.try_get("is_abstract")?,
        omitted: row.try_get("omitted")?,
        advanced_task: row.try_get("advanced_task")?,
        beginner_task: row.try_get("beginner_task")?,
        ground_truth_count: row.try_get("nb_ground_truth")?,
    })
}

/// Replace the stored taxonomy with `import`
///
/// Node rows are upserted (cached counters and task flags survive), edges are
/// replaced wholesale. Nodes missing from the import are deleted unless
/// annotations still reference them.
pub async fn save_taxonomy(pool: &SqlitePool, import: &TaxonomyImport) -> Result<ImportSummary> {
    // Validates every edge before anything is written
    import.to_graph()?;

    let mut tx = pool.begin().await?;

    for node in &import.nodes {
        sqlx::query(
            r#"
            INSERT INTO taxonomy_nodes (node_id, name, description, citation_uri, is_abstract, omitted)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(node_id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                citation_uri = excluded.citation_uri,
                is_abstract = excluded.is_abstract,
                omitted = excluded.omitted
            "#,
        )
        .bind(&node.node_id)
        .bind(&node.name)
        .bind(&node.description)
        .bind(&node.citation_uri)
        .bind(node.is_abstract)
        .bind(node.omitted)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("DELETE FROM taxonomy_parents").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM taxonomy_propagation").execute(&mut *tx).await?;

    for (node_id, parent_id) in &import.parent_edges {
        sqlx::query("INSERT INTO taxonomy_parents (node_id, parent_id) VALUES (?, ?)")
            .bind(node_id)
            .bind(parent_id)
            .execute(&mut *tx)
            .await?;
    }

    for (node_id, parent_id) in &import.propagation_edges {
        sqlx::query("INSERT INTO taxonomy_propagation (node_id, parent_id) VALUES (?, ?)")
            .bind(node_id)
            .bind(parent_id)
            .execute(&mut *tx)
            .await?;
    }

    let imported: HashSet<&str> = import.nodes.iter().map(|n| n.node_id.as_str()).collect();
    let existing: Vec<String> = sqlx::query_scalar("SELECT node_id FROM taxonomy_nodes")
        .fetch_all(&mut *tx)
        .await?;

    let mut summary = ImportSummary {
        nodes: import.nodes.len(),
        parent_edges: import.parent_edges.len(),
        propagation_edges: import.propagation_edges.len(),
        ..Default::default()
    };

    for node_id in existing.iter().filter(|id| !imported.contains(id.as_str())) {
        let references: i64 = sqlx::query_scalar(
            r#"
            SELECT (SELECT COUNT(*) FROM candidate_annotations WHERE taxonomy_node_id = ?1)
                 + (SELECT COUNT(*) FROM ground_truth_annotations WHERE taxonomy_node_id = ?1)
            "#,
        )
        .bind(node_id)
        .fetch_one(&mut *tx)
        .await?;

        if references == 0 {
            sqlx::query("DELETE FROM taxonomy_nodes WHERE node_id = ?")
                .bind(node_id)
                .execute(&mut *tx)
                .await?;
            summary.removed_nodes += 1;
        } else {
            warn!(
                node_id = %node_id,
                references,
                "Node missing from import is still annotated, keeping it"
            );
            summary.kept_stale_nodes += 1;
        }
    }

    tx.commit().await?;

    info!(
        "Imported taxonomy: {} nodes, {} parent edges, {} propagation edges ({} removed)",
        summary.nodes, summary.parent_edges, summary.propagation_edges, summary.removed_nodes
    );
    Ok(summary)
}

/// Set `beginner_task` flags; unknown ids are an error and nothing is written
pub async fn set_beginner_categories(
    pool: &SqlitePool,
    categories: &[BeginnerCategory],
) -> Result<usize> {
    let mut tx = pool.begin().await?;

    for category in categories {
        let result = sqlx::query("UPDATE taxonomy_nodes SET beginner_task = ? WHERE node_id = ?")
            .bind(category.beginner_category)
            .bind(&category.id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Taxonomy node {}", category.id)));
        }
    }

    tx.commit().await?;
    Ok(categories.len())
}

/// Current persisted ground truth counter of a node
pub async fn ground_truth_count(pool: &SqlitePool, node_id: &str) -> Result<i64> {
    sqlx::query_scalar("SELECT nb_ground_truth FROM taxonomy_nodes WHERE node_id = ?")
        .bind(node_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Taxonomy node {}", node_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::parse_taxonomy_json;
    use fsd_common::db::open_in_memory;

    const ADVANCED: &str = r#"{
        "1": {"id": "1", "name": "1", "child_ids": ["2", "4"]},
        "2": {"id": "2", "name": "2", "child_ids": ["3"], "propagate_to_parent_ids": ["1"]},
        "3": {"id": "3", "name": "3", "propagate_to_parent_ids": ["5"]},
        "4": {"id": "4", "name": "4", "propagate_to_parent_ids": ["1"]},
        "5": {"id": "5", "name": "5", "child_ids": ["3"]}
    }"#;

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let pool = open_in_memory().await.unwrap();
        let import = parse_taxonomy_json(ADVANCED).unwrap();

        let summary = save_taxonomy(&pool, &import).await.unwrap();
        assert_eq!(summary.nodes, 5);
        assert_eq!(summary.parent_edges, 4);
        assert_eq!(summary.propagation_edges, 3);

        let graph = load_taxonomy(&pool).await.unwrap();
        assert_eq!(graph.num_nodes(), 5);
        assert_eq!(graph.get_hierarchy_paths("3").unwrap().len(), 2);
        assert_eq!(graph.get_all_propagate_from_children("1").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reimport_removes_unreferenced_nodes() {
        let pool = open_in_memory().await.unwrap();
        save_taxonomy(&pool, &parse_taxonomy_json(ADVANCED).unwrap())
            .await
            .unwrap();

        let smaller = r#"[{"id": "1", "name": "1", "child_ids": ["2"]}, {"id": "2", "name": "2"}]"#;
        let summary = save_taxonomy(&pool, &parse_taxonomy_json(smaller).unwrap())
            .await
            .unwrap();
        assert_eq!(summary.removed_nodes, 3);

        let graph = load_taxonomy(&pool).await.unwrap();
        assert_eq!(graph.num_nodes(), 2);
        assert!(graph.get_all_propagate_to_parents("2").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_beginner_categories() {
        let pool = open_in_memory().await.unwrap();
        save_taxonomy(&pool, &parse_taxonomy_json(ADVANCED).unwrap())
            .await
            .unwrap();

        let categories = vec![BeginnerCategory { id: "4".into(), beginner_category: true }];
        assert_eq!(set_beginner_categories(&pool, &categories).await.unwrap(), 1);
        assert!(load_taxonomy(&pool).await.unwrap().get_node("4").unwrap().beginner_task);

        let unknown = vec![BeginnerCategory { id: "404".into(), beginner_category: true }];
        assert!(matches!(
            set_beginner_categories(&pool, &unknown).await,
            Err(Error::NotFound(_))
        ));
    }
}
