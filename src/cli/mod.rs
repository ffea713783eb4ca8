//! CLI argument parsing for jobrepo.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Jobrepo: file-based job repository with multi-session locking.
///
/// State is expressed as files under a shared repository root:
/// - One JSON record per job, partitioned by ID
/// - A plain-text counter file hands out globally unique IDs
/// - Session liveness markers and lock-set files arbitrate ownership
#[derive(Parser, Debug)]
#[command(name = "jobrepo")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Repository root directory.
    #[arg(long, global = true, default_value = ".")]
    pub root: PathBuf,

    /// Registry name. Defaults to the configured registry.
    #[arg(long, global = true)]
    pub registry: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands for jobrepo.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize a repository at the root.
    ///
    /// Creates the sessions, registry, and events directories and writes a
    /// default configuration file.
    Init,

    /// Show repository status.
    ///
    /// Displays the counter value, job count, sessions, and lock state.
    Status,

    /// List sessions and their liveness.
    Sessions,

    /// Lock management commands.
    ///
    /// List or clear registry fixed locks.
    Lock(LockCommand),

    /// Remove files left behind by dead sessions.
    ///
    /// Deletes liveness markers past the expiry window and lock-set files
    /// without a live owner.
    Reap,

    /// Allocate fresh job IDs.
    ///
    /// Opens a short-lived session, allocates IDs from the shared counter,
    /// and prints them.
    Alloc(AllocArgs),
}

/// Lock subcommands.
#[derive(Parser, Debug)]
pub struct LockCommand {
    #[command(subcommand)]
    pub action: LockAction,
}

/// Available lock actions.
#[derive(Subcommand, Debug)]
pub enum LockAction {
    /// List registry fixed locks with owner and age.
    List,

    /// Clear this registry's fixed lock.
    ///
    /// A stale lock (owner session dead) can be cleared outright; clearing
    /// a live one requires --force.
    Clear(LockClearArgs),
}

/// Arguments for the `lock clear` command.
#[derive(Parser, Debug)]
pub struct LockClearArgs {
    /// Clear the lock even if the owning session looks alive.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `alloc` command.
#[derive(Parser, Debug)]
pub struct AllocArgs {
    /// How many IDs to allocate.
    #[arg(default_value_t = 1)]
    pub count: u64,
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
