//! Implementation of the `jobrepo init` command.
//!
//! Bootstraps the repository layout under the root:
//!
//! 1. Creates the `sessions/`, `<registry>/`, and `events/` directories
//! 2. Writes a default `config.yaml` (if missing)
//! 3. Bootstraps the counter file with the configured minimum (if missing)
//! 4. Appends an `init` audit event

use crate::config::Config;
use crate::context::RepositoryContext;
use crate::error::Result;
use crate::events::{Event, EventAction, append_event};
use crate::fs::atomic_write_file;
use serde_json::json;

/// Execute the `jobrepo init` command.
///
/// Idempotent: running it again against an initialized repository reports
/// what already exists and changes nothing.
pub fn cmd_init(ctx: &RepositoryContext, config: &Config) -> Result<()> {
    let already = ctx.is_initialized();

    ctx.ensure_dirs()?;

    let config_path = ctx.config_path();
    let wrote_config = if config_path.exists() {
        false
    } else {
        config.save(&config_path)?;
        true
    };

    let counter_path = ctx.counter_path();
    let wrote_counter = if counter_path.exists() {
        false
    } else {
        atomic_write_file(&counter_path, &format!("{}\n", config.minimum_count))?;
        true
    };

    let event = Event::new(EventAction::Init).with_details(json!({
        "registry": ctx.registry,
        "reinit": already,
    }));
    append_event(ctx, &event)?;

    if already {
        println!(
            "Repository at {} is already initialized.",
            ctx.root.display()
        );
    } else {
        println!("Initialized job repository at {}.", ctx.root.display());
    }
    println!();
    println!("Registry:   {}", ctx.registry);
    println!(
        "Config:     {}{}",
        config_path.display(),
        if wrote_config { "  (created)" } else { "" }
    );
    println!(
        "Counter:    {}{}",
        counter_path.display(),
        if wrote_counter {
            "  (created)"
        } else {
            ""
        }
    );
    println!("Sessions:   {}/", ctx.sessions_dir().display());
    println!("Events:     {}", ctx.events_file().display());

    Ok(())
}
