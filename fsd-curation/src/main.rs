//! fsd-curation - administration CLI for the curation database
//!
//! Imports taxonomies, records votes and runs the batch jobs that keep
//! ground truth, node counters and priority scores up to date.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fsd_common::config::{
    load_config_with_source, log_config_source, resolve_database_path, DATABASE_ENV_VAR,
};
use fsd_common::db::{init_database, VoteTask, VoteTest, VoteValue};
use fsd_curation::db::datasets::{
    get_dataset, get_dataset_by_short_name, get_sound, mark_sound_deleted,
};
use fsd_curation::ledger::{vote_exists, NewVote};
use fsd_curation::taxonomy::{parse_beginner_categories, parse_taxonomy_json, store};
use fsd_curation::{maintenance, CurationEngine};
use sqlx::SqlitePool;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "fsd-curation",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")"),
    about = "Freesound Datasets curation tools"
)]
struct Cli {
    /// SQLite database file (overrides FSD_DATABASE and the config file)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// TOML config file (default: ~/.config/fsd/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database and its tables
    Init,
    /// Import a taxonomy JSON file, replacing the stored one
    LoadTaxonomy { file: PathBuf },
    /// Set beginner task flags from a JSON list
    LoadBeginnerCategories { file: PathBuf },
    /// Submit a vote on a candidate annotation
    Vote {
        #[arg(long)]
        user: String,
        #[arg(long)]
        candidate: i64,
        /// 1, 0.5, 0 or -1
        #[arg(long, allow_hyphen_values = true)]
        value: String,
        #[arg(long)]
        expert: bool,
        /// Quality-control tag (UN, AP, FA, NA)
        #[arg(long, default_value = "UN")]
        test: String,
        /// Task the vote comes from (BE, AD)
        #[arg(long, default_value = "AD")]
        task: String,
        /// The vote was cast on a quality-control test page
        #[arg(long)]
        test_page: bool,
    },
    /// Recompute priority scores of every candidate in a dataset (id or short name)
    RecomputePriorityScores { dataset: String },
    /// Recompute the ground truth counter of every taxonomy node
    RefreshGroundTruthCounts,
    /// Re-propagate every direct ground truth annotation
    PropagateGroundTruth,
    /// Delete unvoted candidates superseded by a more specific one
    RemoveNonLeafAnnotations { dataset: String },
    /// Reassign all votes of one user to another
    TransferUserVotes { from: String, to: String },
    /// Flag a sound as deleted upstream (or restore it)
    MarkSoundDeleted {
        sound: i64,
        #[arg(long)]
        restore: bool,
    },
    /// Print dataset statistics as JSON (id or short name)
    Stats { dataset: String },
    /// Print the taxonomy tree as JSON
    Tree,
    /// Print every root-to-node path of a node
    Paths { node_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, config_source) =
        load_config_with_source(cli.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!(
        "fsd-curation v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    log_config_source(&config_source);

    let db_path = resolve_database_path(cli.database.as_deref(), DATABASE_ENV_VAR, &config);
    info!("Database: {}", db_path.display());
    let pool = init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    match cli.command {
        Command::Init => {
            println!("Database ready at {}", db_path.display());
        }
        Command::LoadTaxonomy { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Cannot read {}", file.display()))?;
            let import = parse_taxonomy_json(&content).context("Invalid taxonomy file")?;
            let summary = store::save_taxonomy(&pool, &import).await?;
            println!(
                "Loaded {} nodes ({} parent edges, {} propagation edges, {} removed, {} stale kept)",
                summary.nodes,
                summary.parent_edges,
                summary.propagation_edges,
                summary.removed_nodes,
                summary.kept_stale_nodes
            );
        }
        Command::LoadBeginnerCategories { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Cannot read {}", file.display()))?;
            let categories = parse_beginner_categories(&content)?;
            let updated = store::set_beginner_categories(&pool, &categories).await?;
            println!("Updated {} taxonomy nodes", updated);
        }
        Command::Vote {
            user,
            candidate,
            value,
            expert,
            test,
            task,
            test_page,
        } => {
            let value: VoteValue = value.parse()?;
            let test: VoteTest = test.parse()?;
            let task: VoteTask = task.parse()?;

            {
                let mut conn = pool.acquire().await?;
                if vote_exists(&mut conn, &user, candidate).await? {
                    bail!("User {} already voted on candidate annotation {}", user, candidate);
                }
            }

            let mut new = NewVote::new(user, candidate, value).with_test(test).with_task(task);
            if expert {
                new = new.expert();
            }
            if test_page {
                new = new.from_test_page();
            }

            let engine = CurationEngine::load(pool.clone()).await?;
            let outcome = engine.submit_vote(new).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::RecomputePriorityScores { dataset } => {
            let dataset = resolve_dataset(&pool, &dataset).await?;
            let engine = CurationEngine::load(pool.clone())
                .await?
                .with_chunk_size(config.batch_chunk_size);
            let report = engine.recompute_priority_scores(dataset).await?;
            println!(
                "Scored {} candidate annotations in {} chunks",
                report.processed, report.chunks
            );
        }
        Command::RefreshGroundTruthCounts => {
            let nodes = maintenance::refresh_all_ground_truth_counts(&pool).await?;
            println!("Refreshed {} taxonomy nodes", nodes);
        }
        Command::PropagateGroundTruth => {
            let taxonomy = store::load_taxonomy(&pool).await?;
            let report = maintenance::propagate_all(&pool, &taxonomy, config.batch_chunk_size).await?;
            println!("Propagated {} ground truth annotations", report.processed);
        }
        Command::RemoveNonLeafAnnotations { dataset } => {
            let dataset = resolve_dataset(&pool, &dataset).await?;
            let taxonomy = store::load_taxonomy(&pool).await?;
            let removed = maintenance::remove_non_leaf_annotations(&pool, &taxonomy, dataset).await?;
            println!("{} annotations were deleted", removed);
        }
        Command::TransferUserVotes { from, to } => {
            let moved = maintenance::transfer_user_votes(&pool, &from, &to).await?;
            println!("Transferred {} votes from {} to {}", moved, from, to);
        }
        Command::MarkSoundDeleted { sound, restore } => {
            let mut conn = pool.acquire().await?;
            mark_sound_deleted(&mut conn, sound, !restore).await?;
            let sound = get_sound(&mut conn, sound).await?;
            println!(
                "Sound {} (freesound {}) deleted: {}",
                sound.name, sound.freesound_id, sound.deleted_in_freesound
            );
        }
        Command::Stats { dataset } => {
            let dataset = resolve_dataset(&pool, &dataset).await?;
            let stats = maintenance::dataset_stats(&pool, dataset).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Tree => {
            let taxonomy = store::load_taxonomy(&pool).await?;
            println!("{}", serde_json::to_string_pretty(&taxonomy.as_tree())?);
        }
        Command::Paths { node_id } => {
            let taxonomy = store::load_taxonomy(&pool).await?;
            for path in taxonomy.get_hierarchy_paths(&node_id)? {
                println!("{}", path.join(" > "));
            }
        }
    }

    Ok(())
}

/// Dataset id from a numeric id or a short name
async fn resolve_dataset(pool: &SqlitePool, dataset: &str) -> Result<i64> {
    let mut conn = pool.acquire().await?;
    let found = match dataset.parse::<i64>() {
        Ok(id) => get_dataset(&mut conn, id).await?,
        Err(_) => get_dataset_by_short_name(&mut conn, dataset).await?,
    };
    Ok(found.id)
}
