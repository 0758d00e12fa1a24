//! Index hub command-line library.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (import, index, snapshot, publish, ...)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{
    build_status, import_collection, init_logging, load_settings, run, run_index, run_publish,
    run_snapshot, HubRuntime, ImportOptions,
};
