//! Index Hub
//!
//! Builds search indices from versioned collections, snapshots them and
//! publishes releases.
//!
//! # Usage
//!
//! ```bash
//! hub-daemon import genes_build1 genes.jsonl --doc-type gene
//! hub-daemon index genes_build1 --env prod --mode purge --batch-size 10000
//! hub-daemon snapshot genes_build1 --env prod
//! hub-daemon publish genes --env prod --snapshot genes_build1
//! hub-daemon status genes_build1
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/index-hub/config.toml)
//! 3. Environment variables (HUB_*)
//! 4. CLI flags

use anyhow::Result;

use hub_daemon::{run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    run(cli).await
}
