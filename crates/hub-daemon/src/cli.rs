//! CLI argument parsing for the index hub.
//!
//! CLI flags override every other configuration source.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use hub_indexing::PublishSteps;
use hub_types::{IndexMode, IndexSteps};

/// Index Hub
///
/// Builds search indices from versioned collections, snapshots them and
/// publishes releases.
#[derive(Parser, Debug)]
#[command(name = "hub-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/index-hub/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override database path
    #[arg(long, global = true)]
    pub db_path: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

fn parse_mode(s: &str) -> Result<IndexMode, String> {
    s.parse().map_err(|e: hub_types::HubError| e.to_string())
}

fn parse_index_steps(s: &str) -> Result<IndexSteps, String> {
    s.parse().map_err(|e: hub_types::HubError| e.to_string())
}

fn parse_publish_steps(s: &str) -> Result<PublishSteps, String> {
    s.parse()
        .map_err(|e: hub_indexing::IndexerError| e.to_string())
}

/// Hub commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load JSON-lines documents into a collection and register its build
    Import {
        /// Collection / build name
        collection: String,

        /// File with one JSON document per line, each carrying an `_id`
        file: PathBuf,

        /// Document type of the build
        #[arg(long, default_value = "doc")]
        doc_type: String,

        /// Build version recorded in the build metadata
        #[arg(long)]
        build_version: Option<String>,

        /// Optional JSON file holding the field mapping
        #[arg(long)]
        mapping: Option<PathBuf>,

        /// Cold build this build is merged over
        #[arg(long)]
        cold: Option<String>,
    },

    /// Index a collection
    Index {
        /// Collection / build name
        collection: String,

        /// Indexing environment
        #[arg(short, long, default_value = "local")]
        env: String,

        /// Target index (default: collection name)
        #[arg(short, long)]
        index_name: Option<String>,

        /// create, purge, resume or merge
        #[arg(short, long, default_value = "create", value_parser = parse_mode)]
        mode: IndexMode,

        /// Comma separated steps: index, post
        #[arg(long, default_value = "index,post", value_parser = parse_index_steps)]
        steps: IndexSteps,

        /// Documents per batch (default from config)
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Index only these ids
        #[arg(long, value_delimiter = ',')]
        ids: Option<Vec<String>>,
    },

    /// Snapshot an index and wait for completion
    Snapshot {
        index: String,

        #[arg(short, long, default_value = "local")]
        env: String,

        /// Snapshot name (default: index name)
        #[arg(short, long)]
        snapshot: Option<String>,

        /// `purge` replaces an existing snapshot of the same name
        #[arg(short, long, default_value = "create", value_parser = parse_mode)]
        mode: IndexMode,

        /// Snapshot repository (default from config)
        #[arg(short, long)]
        repository: Option<String>,
    },

    /// Publish release metadata for a snapshot
    Publish {
        /// Object store folder receiving the release
        folder: String,

        #[arg(short, long, default_value = "local")]
        env: String,

        /// Previous release name
        #[arg(long)]
        prev: Option<String>,

        #[arg(short, long)]
        snapshot: Option<String>,

        /// Folder holding release notes
        #[arg(long)]
        release_folder: Option<PathBuf>,

        #[arg(short, long)]
        index: Option<String>,

        #[arg(short, long)]
        repository: Option<String>,

        /// Comma separated steps: meta, post
        #[arg(long, default_value = "meta,post", value_parser = parse_publish_steps)]
        steps: PublishSteps,
    },

    /// Check that the engine accepts a mapping
    ValidateMapping {
        /// JSON file holding the mapping
        mapping: PathBuf,

        #[arg(short, long, default_value = "local")]
        env: String,
    },

    /// Replace the `_meta` of an index
    UpdateMeta {
        index: String,

        #[arg(short, long, default_value = "local")]
        env: String,

        /// Take metadata from this build
        #[arg(long, conflicts_with = "meta_file", required_unless_present = "meta_file")]
        build: Option<String>,

        /// Take metadata from this JSON file
        #[arg(long)]
        meta_file: Option<PathBuf>,
    },

    /// Show a build's job log and indices
    Status {
        collection: String,
    },

    /// Show configured environments
    Envs {
        /// Only this environment
        #[arg(short, long)]
        env: Option<String>,
    },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_index_defaults() {
        let cli = Cli::parse_from(["hub-daemon", "index", "genes_build1"]);
        match cli.command {
            Commands::Index {
                collection,
                env,
                mode,
                steps,
                batch_size,
                ids,
                ..
            } => {
                assert_eq!(collection, "genes_build1");
                assert_eq!(env, "local");
                assert_eq!(mode, IndexMode::Create);
                assert_eq!(steps, IndexSteps::all());
                assert!(batch_size.is_none());
                assert!(ids.is_none());
            }
            _ => panic!("Expected Index command"),
        }
    }

    #[test]
    fn test_cli_index_options() {
        let cli = Cli::parse_from([
            "hub-daemon",
            "index",
            "genes_build1",
            "-e",
            "prod",
            "--mode",
            "resume",
            "--steps",
            "index",
            "--ids",
            "g1,g2",
            "-b",
            "500",
        ]);
        match cli.command {
            Commands::Index {
                env,
                mode,
                steps,
                ids,
                batch_size,
                ..
            } => {
                assert_eq!(env, "prod");
                assert_eq!(mode, IndexMode::Resume);
                assert_eq!(steps, IndexSteps::index_only());
                assert_eq!(ids, Some(vec!["g1".to_string(), "g2".to_string()]));
                assert_eq!(batch_size, Some(500));
            }
            _ => panic!("Expected Index command"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["hub-daemon", "index", "g", "--mode", "wipe"]).is_err());
    }

    #[test]
    fn test_cli_publish_steps() {
        let cli = Cli::parse_from(["hub-daemon", "publish", "genes", "--steps", "meta", "-s", "snap"]);
        match cli.command {
            Commands::Publish { steps, snapshot, .. } => {
                assert!(steps.meta);
                assert!(!steps.post);
                assert_eq!(snapshot.as_deref(), Some("snap"));
            }
            _ => panic!("Expected Publish command"),
        }
    }

    #[test]
    fn test_cli_update_meta_needs_a_source() {
        assert!(Cli::try_parse_from(["hub-daemon", "update-meta", "genes"]).is_err());
        assert!(Cli::try_parse_from([
            "hub-daemon",
            "update-meta",
            "genes",
            "--build",
            "b",
            "--meta-file",
            "m.json"
        ])
        .is_err());
        assert!(Cli::try_parse_from(["hub-daemon", "update-meta", "genes", "--build", "b"]).is_ok());
    }

    #[test]
    fn test_cli_with_config() {
        let cli = Cli::parse_from(["hub-daemon", "--config", "/path/to/config.toml", "envs"]);
        assert_eq!(cli.config, Some("/path/to/config.toml".to_string()));
    }

    #[test]
    fn test_cli_with_log_level() {
        let cli = Cli::parse_from(["hub-daemon", "status", "genes", "--log-level", "debug"]);
        assert_eq!(cli.log_level, Some("debug".to_string()));
    }
}
