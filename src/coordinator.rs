//! Internal-services coordinator.
//!
//! One process-wide gate decides whether repository mutations are allowed.
//! When something load-bearing goes wrong (credentials expired, disk full,
//! operator intervention) the coordinator disables internal services: the
//! monitoring loop is stopped and drained first, then the gate closes and
//! every subsequent mutation fails with `RepoError::ReadOnly` until services
//! are re-enabled.
//!
//! Re-enabling is refused while a required credential is invalid, so a flapping
//! proxy cannot bounce the gate open and shut. The disk-space monitor fails
//! closed: a checker that cannot answer is treated the same as a full disk,
//! since continuing to write with unknown headroom is how repositories get
//! corrupted.

use crate::context::RepositoryContext;
use crate::error::{RepoError, Result};
use crate::events::{Event, EventAction, append_event};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A credential whose validity gates service re-enablement.
pub trait CredentialCheck: Send + Sync {
    /// Human-readable credential name for messages.
    fn name(&self) -> &str;

    /// Whether the credential is currently valid.
    fn is_valid(&self) -> bool;

    /// Whether services must stay down while this credential is invalid.
    fn is_required(&self) -> bool;
}

/// Control over the monitoring loop, stopped before the gate closes so no
/// half-finished monitoring cycle writes into a disabled repository.
pub trait MonitoringControl: Send + Sync {
    fn stop_and_drain(&self) -> Result<()>;
    fn start(&self) -> Result<()>;
}

/// Monitoring control for deployments without a monitoring loop.
pub struct NoMonitoring;

impl MonitoringControl for NoMonitoring {
    fn stop_and_drain(&self) -> Result<()> {
        Ok(())
    }

    fn start(&self) -> Result<()> {
        Ok(())
    }
}

/// Answers whether the repository volume has enough free space.
pub trait DiskSpaceChecker: Send + Sync {
    fn has_free_space(&self) -> Result<bool>;
}

/// The services gate.
///
/// Shared behind an `Arc` between the owning registry and the disk monitor
/// thread; all methods take `&self`.
pub struct Coordinator {
    ctx: RepositoryContext,
    enabled: AtomicBool,
    disable_reason: Mutex<Option<String>>,
    monitoring: Box<dyn MonitoringControl>,
    credentials: Vec<Box<dyn CredentialCheck>>,
}

impl Coordinator {
    /// Create a coordinator with services enabled.
    pub fn new(
        ctx: RepositoryContext,
        monitoring: Box<dyn MonitoringControl>,
        credentials: Vec<Box<dyn CredentialCheck>>,
    ) -> Self {
        Self {
            ctx,
            enabled: AtomicBool::new(true),
            disable_reason: Mutex::new(None),
            monitoring,
            credentials,
        }
    }

    /// Whether internal services are currently enabled.
    pub fn services_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// The reason services were disabled, if they are.
    pub fn disable_reason(&self) -> Option<String> {
        self.disable_reason
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    /// Fail with `ReadOnly` if the gate is closed.
    ///
    /// Every mutating repository operation calls this first.
    pub fn check_internal_services(&self) -> Result<()> {
        if self.services_enabled() {
            return Ok(());
        }
        let reason = self
            .disable_reason()
            .unwrap_or_else(|| "unknown".to_string());
        Err(RepoError::ReadOnly(format!(
            "Internal services disabled ({}).\n\
             Resolve the underlying problem, then re-enable services.",
            reason
        )))
    }

    /// Disable internal services.
    ///
    /// Monitoring is stopped and drained before the gate closes. Disabling
    /// twice is an error: the second caller's reason would silently replace
    /// the first, hiding the original failure from the operator.
    pub fn disable(&self, reason: &str) -> Result<()> {
        if !self.services_enabled() {
            return Err(RepoError::UserError(format!(
                "internal services are already disabled ({})",
                self.disable_reason()
                    .unwrap_or_else(|| "unknown".to_string())
            )));
        }

        self.monitoring.stop_and_drain()?;

        *self
            .disable_reason
            .lock()
            .unwrap_or_else(|poison| poison.into_inner()) = Some(reason.to_string());
        self.enabled.store(false, Ordering::Release);

        eprintln!("Warning: internal services disabled: {}", reason);
        self.log_event(EventAction::Disable, json!({ "reason": reason }));
        Ok(())
    }

    /// Re-enable internal services.
    ///
    /// Refused (with `Ok`, not an error) while a required credential is
    /// invalid; the caller fixed nothing, so the gate stays closed and the
    /// blocking credential is named on stderr. Enabling twice, like
    /// disabling twice, is an error.
    pub fn enable(&self) -> Result<()> {
        if self.services_enabled() {
            return Err(RepoError::UserError(
                "internal services are already enabled".to_string(),
            ));
        }

        for credential in &self.credentials {
            if credential.is_required() && !credential.is_valid() {
                eprintln!(
                    "Warning: not enabling internal services: credential '{}' is invalid",
                    credential.name()
                );
                return Ok(());
            }
        }

        self.monitoring.start()?;
        *self
            .disable_reason
            .lock()
            .unwrap_or_else(|poison| poison.into_inner()) = None;
        self.enabled.store(true, Ordering::Release);

        self.log_event(EventAction::Enable, json!({}));
        Ok(())
    }

    /// React to a credential becoming invalid.
    ///
    /// A required invalid credential closes the gate; an optional one is only
    /// reported.
    pub fn notify_invalid_credential(&self, name: &str) {
        let Some(credential) = self.credentials.iter().find(|c| c.name() == name) else {
            eprintln!("Warning: unknown credential '{}' reported invalid", name);
            return;
        };
        if credential.is_valid() {
            return;
        }

        if !credential.is_required() {
            eprintln!(
                "Warning: optional credential '{}' is invalid; services stay up",
                name
            );
            return;
        }

        if self.services_enabled()
            && let Err(e) = self.disable(&format!("credential '{}' is invalid", name))
        {
            eprintln!("Warning: failed to disable internal services: {}", e);
        }
    }

    /// Run one disk-space check, closing the gate on shortage.
    ///
    /// A checker that errors counts as a shortage.
    pub fn run_disk_space_check(&self, checker: &dyn DiskSpaceChecker) {
        let ok = match checker.has_free_space() {
            Ok(ok) => ok,
            Err(e) => {
                eprintln!("Warning: disk space check failed: {}", e);
                false
            }
        };

        if !ok
            && self.services_enabled()
            && let Err(e) = self.disable("disk space exhausted on repository volume")
        {
            eprintln!("Warning: failed to disable internal services: {}", e);
        }
    }

    fn log_event(&self, action: EventAction, details: serde_json::Value) {
        let event = Event::new(action).with_details(details);
        if let Err(e) = append_event(&self.ctx, &event) {
            eprintln!("Warning: failed to record audit event: {}", e);
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("enabled", &self.services_enabled())
            .field("disable_reason", &self.disable_reason())
            .finish()
    }
}

/// Granularity of the stop-flag poll between disk checks.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Background thread running periodic disk-space checks.
#[derive(Debug)]
pub struct DiskMonitor {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DiskMonitor {
    pub fn spawn(
        coordinator: Arc<Coordinator>,
        checker: Box<dyn DiskSpaceChecker>,
        interval: Duration,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("disk-monitor".to_string())
            .spawn(move || {
                while !thread_stop.load(Ordering::Acquire) {
                    coordinator.run_disk_space_check(checker.as_ref());

                    let deadline = Instant::now() + interval;
                    while Instant::now() < deadline {
                        if thread_stop.load(Ordering::Acquire) {
                            return;
                        }
                        thread::sleep(POLL_INTERVAL);
                    }
                }
            })
            .ok();
        if handle.is_none() {
            eprintln!("Warning: could not start disk monitor thread; disk checks are off");
        }

        Self { stop, handle }
    }

    /// Signal the thread and wait for it to finish.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            eprintln!("Warning: disk monitor thread panicked");
        }
    }
}

impl Drop for DiskMonitor {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::create_test_repo;
    use std::sync::atomic::AtomicUsize;

    struct StubCredential {
        name: &'static str,
        valid: AtomicBool,
        required: bool,
    }

    impl StubCredential {
        fn new(name: &'static str, valid: bool, required: bool) -> Self {
            Self {
                name,
                valid: AtomicBool::new(valid),
                required,
            }
        }
    }

    impl CredentialCheck for Arc<StubCredential> {
        fn name(&self) -> &str {
            self.name
        }

        fn is_valid(&self) -> bool {
            self.valid.load(Ordering::Relaxed)
        }

        fn is_required(&self) -> bool {
            self.required
        }
    }

    #[derive(Default)]
    struct CountingMonitoring {
        stops: AtomicUsize,
        starts: AtomicUsize,
    }

    impl MonitoringControl for Arc<CountingMonitoring> {
        fn stop_and_drain(&self) -> Result<()> {
            self.stops.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn start(&self) -> Result<()> {
            self.starts.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    struct StubDisk(Result<bool>);

    impl DiskSpaceChecker for StubDisk {
        fn has_free_space(&self) -> Result<bool> {
            match &self.0 {
                Ok(ok) => Ok(*ok),
                Err(_) => Err(RepoError::Repository("statvfs failed".to_string())),
            }
        }
    }

    fn coordinator_with(
        ctx: &RepositoryContext,
        credentials: Vec<Box<dyn CredentialCheck>>,
    ) -> (Coordinator, Arc<CountingMonitoring>) {
        let monitoring = Arc::new(CountingMonitoring::default());
        let coordinator = Coordinator::new(
            ctx.clone(),
            Box::new(Arc::clone(&monitoring)),
            credentials,
        );
        (coordinator, monitoring)
    }

    #[test]
    fn test_gate_starts_open() {
        let (_tmp, ctx, _config) = create_test_repo();
        let (coordinator, _) = coordinator_with(&ctx, vec![]);

        assert!(coordinator.services_enabled());
        coordinator.check_internal_services().unwrap();
    }

    #[test]
    fn test_disable_closes_the_gate() {
        let (_tmp, ctx, _config) = create_test_repo();
        let (coordinator, monitoring) = coordinator_with(&ctx, vec![]);

        coordinator.disable("manual intervention").unwrap();

        assert!(!coordinator.services_enabled());
        assert_eq!(monitoring.stops.load(Ordering::Relaxed), 1);

        let err = coordinator.check_internal_services().unwrap_err();
        assert!(matches!(err, RepoError::ReadOnly(_)));
        assert!(err.to_string().contains("Internal services disabled"));
        assert!(err.to_string().contains("manual intervention"));
    }

    #[test]
    fn test_double_enable_is_an_error() {
        let (_tmp, ctx, _config) = create_test_repo();
        let (coordinator, _) = coordinator_with(&ctx, vec![]);

        let err = coordinator.enable().unwrap_err();
        assert!(matches!(err, RepoError::UserError(_)));
        assert!(err.to_string().contains("already enabled"));
    }

    #[test]
    fn test_double_disable_is_an_error() {
        let (_tmp, ctx, _config) = create_test_repo();
        let (coordinator, _) = coordinator_with(&ctx, vec![]);

        coordinator.disable("first").unwrap();
        let err = coordinator.disable("second").unwrap_err();
        assert!(matches!(err, RepoError::UserError(_)));
        assert!(err.to_string().contains("first"));
    }

    #[test]
    fn test_enable_reopens_the_gate() {
        let (_tmp, ctx, _config) = create_test_repo();
        let (coordinator, monitoring) = coordinator_with(&ctx, vec![]);

        coordinator.disable("maintenance").unwrap();
        coordinator.enable().unwrap();

        assert!(coordinator.services_enabled());
        assert!(coordinator.disable_reason().is_none());
        assert_eq!(monitoring.starts.load(Ordering::Relaxed), 1);
        coordinator.check_internal_services().unwrap();
    }

    #[test]
    fn test_enable_refused_while_required_credential_invalid() {
        let (_tmp, ctx, _config) = create_test_repo();
        let proxy = Arc::new(StubCredential::new("grid_proxy", false, true));
        let (coordinator, _) = coordinator_with(&ctx, vec![Box::new(Arc::clone(&proxy))]);

        coordinator.disable("proxy expired").unwrap();

        // Ok, but the gate stays closed.
        coordinator.enable().unwrap();
        assert!(!coordinator.services_enabled());

        proxy.valid.store(true, Ordering::Relaxed);
        coordinator.enable().unwrap();
        assert!(coordinator.services_enabled());
    }

    #[test]
    fn test_optional_credential_does_not_block_enable() {
        let (_tmp, ctx, _config) = create_test_repo();
        let afs = Arc::new(StubCredential::new("afs_token", false, false));
        let (coordinator, _) = coordinator_with(&ctx, vec![Box::new(afs)]);

        coordinator.disable("maintenance").unwrap();
        coordinator.enable().unwrap();
        assert!(coordinator.services_enabled());
    }

    #[test]
    fn test_invalid_required_credential_disables_services() {
        let (_tmp, ctx, _config) = create_test_repo();
        let proxy = Arc::new(StubCredential::new("grid_proxy", false, true));
        let (coordinator, _) = coordinator_with(&ctx, vec![Box::new(Arc::clone(&proxy))]);

        coordinator.notify_invalid_credential("grid_proxy");
        assert!(!coordinator.services_enabled());
        assert!(
            coordinator
                .disable_reason()
                .unwrap()
                .contains("grid_proxy")
        );
    }

    #[test]
    fn test_invalid_optional_credential_keeps_services_up() {
        let (_tmp, ctx, _config) = create_test_repo();
        let afs = Arc::new(StubCredential::new("afs_token", false, false));
        let (coordinator, _) = coordinator_with(&ctx, vec![Box::new(afs)]);

        coordinator.notify_invalid_credential("afs_token");
        assert!(coordinator.services_enabled());
    }

    #[test]
    fn test_disk_check_failure_fails_closed() {
        let (_tmp, ctx, _config) = create_test_repo();
        let (coordinator, _) = coordinator_with(&ctx, vec![]);

        coordinator.run_disk_space_check(&StubDisk(Err(RepoError::Repository(String::new()))));
        assert!(!coordinator.services_enabled());
    }

    #[test]
    fn test_disk_shortage_closes_the_gate() {
        let (_tmp, ctx, _config) = create_test_repo();
        let (coordinator, _) = coordinator_with(&ctx, vec![]);

        coordinator.run_disk_space_check(&StubDisk(Ok(true)));
        assert!(coordinator.services_enabled());

        coordinator.run_disk_space_check(&StubDisk(Ok(false)));
        assert!(!coordinator.services_enabled());

        // Repeated shortage reports do not error on the closed gate.
        coordinator.run_disk_space_check(&StubDisk(Ok(false)));
        assert!(!coordinator.services_enabled());
    }

    #[test]
    fn test_disk_monitor_runs_and_stops() {
        let (_tmp, ctx, _config) = create_test_repo();
        let (coordinator, _) = coordinator_with(&ctx, vec![]);
        let coordinator = Arc::new(coordinator);

        let monitor = DiskMonitor::spawn(
            Arc::clone(&coordinator),
            Box::new(StubDisk(Ok(false))),
            Duration::from_secs(60),
        );

        // First check runs immediately.
        let deadline = Instant::now() + Duration::from_secs(5);
        while coordinator.services_enabled() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!coordinator.services_enabled());

        monitor.stop();
    }
}
