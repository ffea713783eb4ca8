use super::*;
use crate::coordinator::NoMonitoring;
use crate::locks::acquire_fixed_lock;
use crate::test_support::{create_test_repo, mark_session_stale};
use tempfile::TempDir;

fn coordinator(ctx: &RepositoryContext) -> Arc<Coordinator> {
    Arc::new(Coordinator::new(ctx.clone(), Box::new(NoMonitoring), vec![]))
}

fn open_registry(ctx: &RepositoryContext, config: &Config) -> JobRegistry {
    let mut registry = JobRegistry::new(ctx.clone(), config.clone(), coordinator(ctx));
    registry.startup().unwrap();
    registry
}

#[test]
fn test_startup_requires_initialized_repository() {
    let tmp = TempDir::new().unwrap();
    let ctx = RepositoryContext::new(tmp.path(), "jobs");

    let mut registry = JobRegistry::new(ctx.clone(), Config::default(), coordinator(&ctx));
    let err = registry.startup().unwrap_err();
    assert!(matches!(err, RepoError::UserError(_)));
    assert!(err.to_string().contains("jobrepo init"));
}

#[test]
fn test_startup_bootstraps_the_counter() {
    let (_tmp, ctx, config) = create_test_repo();
    let _registry = open_registry(&ctx, &config);

    let content = fs::read_to_string(ctx.counter_path()).unwrap();
    assert_eq!(content.trim(), "0");
}

#[test]
fn test_startup_is_idempotent() {
    let (_tmp, ctx, config) = create_test_repo();
    let mut registry = open_registry(&ctx, &config);
    registry.startup().unwrap();
}

#[test]
fn test_startup_fails_on_stale_fixed_lock() {
    let (_tmp, ctx, config) = create_test_repo();
    mark_session_stale(&ctx, "dead");
    let guard = acquire_fixed_lock(&ctx, &config, "dead", "allocate").unwrap();
    std::mem::forget(guard);

    let mut registry = JobRegistry::new(ctx.clone(), config.clone(), coordinator(&ctx));
    let err = registry.startup().unwrap_err();
    assert!(matches!(err, RepoError::Repository(_)));
    assert!(err.to_string().contains("stale fixed lock"));

    std::fs::remove_file(ctx.fixed_lock_path()).unwrap();
}

#[test]
fn test_make_new_ids_are_unique_across_sessions() {
    let (_tmp, ctx, config) = create_test_repo();
    let mut a = open_registry(&ctx, &config);
    let mut b = open_registry(&ctx, &config);

    let first = a.make_new_ids(2).unwrap();
    let second = b.make_new_ids(3).unwrap();

    assert_eq!(first, vec![0, 1]);
    assert_eq!(second, vec![2, 3, 4]);

    // Allocated IDs are locked to the allocating session.
    assert_eq!(
        b.get_lock_session(0).unwrap().as_deref(),
        Some(a.session_name())
    );
}

#[test]
fn test_register_flush_get_roundtrip() {
    let (_tmp, ctx, config) = create_test_repo();
    let mut a = open_registry(&ctx, &config);

    let id = a.make_new_ids(1).unwrap()[0];
    let mut record = JobRecord::new(id);
    record.data = json!({"application": "athena"});
    a.register(record).unwrap();

    // Registered but not yet durable.
    assert_eq!(a.dirty_ids(), vec![id]);
    assert!(!ctx.record_path(id).exists());

    a.flush(id).unwrap();
    assert!(a.dirty_ids().is_empty());
    assert!(ctx.record_path(id).exists());

    // Another session reads the flushed record from disk.
    let mut b = open_registry(&ctx, &config);
    let seen = b.get(id).unwrap();
    assert_eq!(seen.id, id);
    assert_eq!(seen.status, JobStatus::New);
    assert_eq!(seen.data["application"], "athena");
}

#[test]
fn test_register_twice_is_an_error() {
    let (_tmp, ctx, config) = create_test_repo();
    let mut registry = open_registry(&ctx, &config);

    let id = registry.make_new_ids(1).unwrap()[0];
    registry.register(JobRecord::new(id)).unwrap();

    let err = registry.register(JobRecord::new(id)).unwrap_err();
    assert!(matches!(err, RepoError::UserError(_)));
    assert!(err.to_string().contains("already registered"));
}

#[test]
fn test_update_requires_the_per_id_lock() {
    let (_tmp, ctx, config) = create_test_repo();
    let mut a = open_registry(&ctx, &config);
    let mut b = open_registry(&ctx, &config);

    let id = a.make_new_ids(1).unwrap()[0];
    a.register(JobRecord::new(id)).unwrap();
    a.flush(id).unwrap();

    // B cannot touch the record while A holds the lock.
    let err = b
        .update(id, JobStatus::Running, json!({}))
        .unwrap_err();
    assert!(matches!(err, RepoError::Lock(_)));
    assert!(err.to_string().contains(a.session_name()));

    // After A releases, B can take over.
    a.release_ids(&[id]).unwrap();
    b.update(id, JobStatus::Running, json!({"backend": "lcg"}))
        .unwrap();
    b.flush(id).unwrap();

    let record = JobRecord::load(&ctx.record_path(id)).unwrap();
    assert_eq!(record.status, JobStatus::Running);
}

#[test]
fn test_flush_all_writes_only_dirty_records() {
    let (_tmp, ctx, config) = create_test_repo();
    let mut registry = open_registry(&ctx, &config);

    let ids = registry.make_new_ids(2).unwrap();
    for &id in &ids {
        registry.register(JobRecord::new(id)).unwrap();
    }
    registry.flush_all().unwrap();

    registry
        .update(ids[0], JobStatus::Submitted, json!({}))
        .unwrap();
    assert_eq!(registry.dirty_ids(), vec![ids[0]]);

    registry.flush_all().unwrap();
    assert!(registry.dirty_ids().is_empty());

    let record = JobRecord::load(&ctx.record_path(ids[0])).unwrap();
    assert_eq!(record.status, JobStatus::Submitted);
}

#[test]
fn test_remove_deletes_record_and_releases_lock() {
    let (_tmp, ctx, config) = create_test_repo();
    let mut registry = open_registry(&ctx, &config);

    let id = registry.make_new_ids(1).unwrap()[0];
    registry.register(JobRecord::new(id)).unwrap();
    registry.flush(id).unwrap();

    registry.remove(id).unwrap();
    assert!(!ctx.record_path(id).exists());
    assert_eq!(registry.get_lock_session(id).unwrap(), None);
}

#[test]
fn test_remove_unknown_id_is_a_user_error() {
    let (_tmp, ctx, config) = create_test_repo();
    let mut registry = open_registry(&ctx, &config);

    let err = registry.remove(999).unwrap_err();
    assert!(matches!(err, RepoError::UserError(_)));
    assert!(err.to_string().contains("no job record"));
}

#[test]
fn test_closed_gate_blocks_mutations_but_not_reads() {
    let (_tmp, ctx, config) = create_test_repo();
    let coordinator = coordinator(&ctx);
    let mut registry = JobRegistry::new(ctx.clone(), config.clone(), Arc::clone(&coordinator));
    registry.startup().unwrap();

    let id = registry.make_new_ids(1).unwrap()[0];
    registry.register(JobRecord::new(id)).unwrap();
    registry.flush(id).unwrap();

    coordinator.disable("disk space exhausted").unwrap();

    for err in [
        registry.make_new_ids(1).unwrap_err(),
        registry.register(JobRecord::new(999)).unwrap_err(),
        registry.update(id, JobStatus::Failed, json!({})).unwrap_err(),
        registry.remove(id).unwrap_err(),
        registry.flush_all().unwrap_err(),
        registry.lock_ids(&[id]).unwrap_err(),
    ] {
        assert!(matches!(err, RepoError::ReadOnly(_)), "got: {}", err);
    }

    // Reads still work on a disabled repository.
    assert_eq!(registry.get(id).unwrap().id, id);
    assert_eq!(registry.ids().unwrap(), vec![id]);
}

#[test]
fn test_shutdown_flushes_dirty_records_and_withdraws() {
    let (_tmp, ctx, config) = create_test_repo();
    let mut registry = open_registry(&ctx, &config);
    let session = registry.session_name().to_string();

    let id = registry.make_new_ids(1).unwrap()[0];
    registry.register(JobRecord::new(id)).unwrap();

    registry.shutdown();

    assert!(ctx.record_path(id).exists());
    assert!(!ctx.session_file_path(&session).exists());
    assert!(!ctx.session_locks_path(&session).exists());
}

#[test]
fn test_ids_lists_records_on_disk() {
    let (_tmp, ctx, config) = create_test_repo();
    let mut registry = open_registry(&ctx, &config);

    let ids = registry.make_new_ids(3).unwrap();
    for &id in &ids {
        registry.register(JobRecord::new(id)).unwrap();
    }
    registry.flush_all().unwrap();

    assert_eq!(registry.ids().unwrap(), ids);
}

#[test]
fn test_operations_are_audited() {
    let (_tmp, ctx, config) = create_test_repo();
    let mut registry = open_registry(&ctx, &config);

    let id = registry.make_new_ids(1).unwrap()[0];
    registry.register(JobRecord::new(id)).unwrap();
    registry.flush_all().unwrap();
    registry.remove(id).unwrap();

    let content = fs::read_to_string(ctx.events_file()).unwrap();
    for action in ["startup", "allocate", "register", "flush", "remove"] {
        assert!(
            content.contains(&format!("\"{}\"", action)),
            "missing {} in audit log",
            action
        );
    }
}
