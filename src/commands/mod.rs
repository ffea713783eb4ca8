//! Command implementations for jobrepo.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations. Commands resolve the repository context from the global
//! `--root`/`--registry` arguments, load the repository configuration, and
//! call into the library layers.

mod init;

use crate::cli::{AllocArgs, Cli, Command, LockAction, LockClearArgs, LockCommand};
use crate::config::Config;
use crate::context::RepositoryContext;
use crate::coordinator::{Coordinator, NoMonitoring};
use crate::error::{RepoError, Result};
use crate::events::{Event, EventAction, append_event};
use crate::locks;
use crate::registry::JobRegistry;
use crate::session;
use serde_json::json;
use std::fs;
use std::sync::Arc;

/// Dispatch a command to its implementation.
///
/// This is the main entry point for command execution. The repository
/// context is resolved once here; the registry name comes from the flag when
/// given, otherwise from the configuration at the root.
pub fn dispatch(cli: Cli) -> Result<()> {
    let config = Config::load(cli.root.join("config.yaml"))?;
    let registry = cli
        .registry
        .clone()
        .unwrap_or_else(|| config.registry.clone());
    let ctx = RepositoryContext::new(&cli.root, &registry);

    match cli.command {
        Command::Init => init::cmd_init(&ctx, &config),
        Command::Status => cmd_status(&ctx, &config),
        Command::Sessions => cmd_sessions(&ctx, &config),
        Command::Lock(lock_cmd) => dispatch_lock(&ctx, &config, lock_cmd),
        Command::Reap => cmd_reap(&ctx, &config),
        Command::Alloc(args) => cmd_alloc(&ctx, &config, args),
    }
}

/// Dispatch lock subcommands.
fn dispatch_lock(ctx: &RepositoryContext, config: &Config, lock_cmd: LockCommand) -> Result<()> {
    match lock_cmd.action {
        LockAction::List => cmd_lock_list(ctx, config),
        LockAction::Clear(args) => cmd_lock_clear(ctx, config, args),
    }
}

fn cmd_status(ctx: &RepositoryContext, config: &Config) -> Result<()> {
    ctx.ensure_initialized()?;

    let counter = match fs::read_to_string(ctx.counter_path()) {
        Ok(content) => content.trim().to_string(),
        Err(_) => "(not yet created)".to_string(),
    };

    let job_count = fs::read_dir(ctx.registry_dir())
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| e.file_name().to_string_lossy().ends_with(".json"))
                .count()
        })
        .unwrap_or(0);

    let sessions = session::list_sessions(ctx, config)?;
    let live = sessions.iter().filter(|(_, l)| *l).count();
    let stale = sessions.len() - live;

    println!("Repository:  {}", ctx.root.display());
    println!("Registry:    {}", ctx.registry);
    println!("Next ID:     {}", counter);
    println!("Jobs:        {}", job_count);
    println!("Sessions:    {} live, {} stale", live, stale);

    let locks = locks::list_locks(ctx, config)?;
    match locks.iter().find(|l| l.registry == ctx.registry) {
        Some(lock) => println!("Fixed lock:  {}", lock),
        None => println!("Fixed lock:  free"),
    }

    Ok(())
}

fn cmd_sessions(ctx: &RepositoryContext, config: &Config) -> Result<()> {
    ctx.ensure_initialized()?;

    let sessions = session::list_sessions(ctx, config)?;
    if sessions.is_empty() {
        println!("No sessions.");
        return Ok(());
    }

    println!("Sessions ({}):", sessions.len());
    for (name, live) in &sessions {
        println!("  {}  [{}]", name, if *live { "live" } else { "STALE" });
    }

    let stale = sessions.iter().filter(|(_, l)| !*l).count();
    if stale > 0 {
        println!();
        println!(
            "Note: {} stale session(s). Run `jobrepo reap` to remove their files.",
            stale
        );
    }

    Ok(())
}

fn cmd_lock_list(ctx: &RepositoryContext, config: &Config) -> Result<()> {
    ctx.ensure_initialized()?;

    let locks = locks::list_locks(ctx, config)?;
    if locks.is_empty() {
        println!("No fixed locks.");
        return Ok(());
    }

    println!("Fixed locks ({}):", locks.len());
    println!();
    for lock in &locks {
        println!("  {}:", lock.registry);
        if let Some(meta) = &lock.metadata {
            println!("    Owner:      {}", meta.owner);
            if let Some(pid) = meta.pid {
                println!("    PID:        {}", pid);
            }
            println!("    Session:    {}", meta.session);
            println!(
                "    Created:    {}",
                meta.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            println!("    Age:        {}", meta.age_string());
            println!("    Action:     {}", meta.action);
        } else {
            println!("    (no readable metadata)");
        }
        if lock.is_stale {
            println!("    Status:     STALE (owning session is dead)");
        }
        println!("    Path:       {}", lock.path.display());
        println!();
    }

    let stale_count = locks.iter().filter(|l| l.is_stale).count();
    if stale_count > 0 {
        println!(
            "Note: {} lock(s) are stale. Use `jobrepo lock clear` to remove.",
            stale_count
        );
    }

    Ok(())
}

fn cmd_lock_clear(ctx: &RepositoryContext, config: &Config, args: LockClearArgs) -> Result<()> {
    ctx.ensure_initialized()?;

    let lock_path = ctx.fixed_lock_path();
    if !args.force && locks::is_locked(&lock_path) {
        let stale = locks::list_locks(ctx, config)?
            .into_iter()
            .find(|l| l.registry == ctx.registry)
            .is_some_and(|l| l.is_stale);
        if !stale {
            return Err(RepoError::UserError(format!(
                "refusing to clear a lock whose owning session looks alive.\n\n\
                 Clearing a live lock can corrupt the counter or session lock sets.\n\
                 If you are certain the holder is gone, run:\n  \
                 jobrepo lock clear --registry {} --force",
                ctx.registry
            )));
        }
    }

    let cleared = locks::clear_lock(ctx, config)?;

    let event = Event::new(EventAction::LockClear).with_details(json!({
        "registry": cleared.registry,
        "was_stale": cleared.is_stale,
        "force": args.force,
        "owner": cleared.metadata.as_ref().map(|m| m.owner.clone()),
        "original_action": cleared.metadata.as_ref().map(|m| m.action.clone()),
    }));
    // Best-effort logging: the lock is already gone, and failing the command
    // now would only confuse the operator.
    if let Err(e) = append_event(ctx, &event) {
        eprintln!("Warning: failed to log lock_clear event: {}", e);
    }

    println!("Cleared fixed lock: {}", cleared);
    Ok(())
}

fn cmd_reap(ctx: &RepositoryContext, config: &Config) -> Result<()> {
    ctx.ensure_initialized()?;

    let reaped = session::reap_dead_sessions(ctx, config, None)?;
    if reaped {
        let event = Event::new(EventAction::Reap).with_details(json!({}));
        if let Err(e) = append_event(ctx, &event) {
            eprintln!("Warning: failed to log reap event: {}", e);
        }
        println!("Removed files of dead sessions.");
    } else {
        println!("Nothing to reap.");
    }
    Ok(())
}

fn cmd_alloc(ctx: &RepositoryContext, config: &Config, args: AllocArgs) -> Result<()> {
    ctx.ensure_initialized()?;

    let coordinator = Arc::new(Coordinator::new(
        ctx.clone(),
        Box::new(NoMonitoring),
        Vec::new(),
    ));
    let mut registry = JobRegistry::new(ctx.clone(), config.clone(), coordinator);
    registry.startup()?;

    let ids = registry.make_new_ids(args.count)?;
    // The transient session is about to end; leave the IDs free for whoever
    // registers records under them.
    registry.release_ids(&ids)?;
    registry.shutdown();

    for id in ids {
        println!("{}", id);
    }
    Ok(())
}
