//! Centralized process-shutdown coordination.
//!
//! Cleanup work is registered as named, prioritized handlers. The first
//! registration installs the process hooks exactly once: Ctrl+C,
//! SIGTERM/SIGHUP on unix, and a panic hook for fatal faults. A shutdown
//! trigger runs every handler once, in descending priority, each awaited
//! before the next; the run itself is latched so the full pass happens
//! at most once per process lifetime.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::Notify;

/// Named priority tiers for positioning cleanup handlers.
///
/// Higher tiers run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityTier {
    CriticalResources,
    Monitoring,
    Workers,
    Caches,
    Logging,
    Default,
    Final,
}

impl PriorityTier {
    pub fn value(&self) -> i32 {
        match self {
            PriorityTier::CriticalResources => 100,
            PriorityTier::Monitoring => 90,
            PriorityTier::Workers => 80,
            PriorityTier::Caches => 70,
            PriorityTier::Logging => 60,
            PriorityTier::Default => 50,
            PriorityTier::Final => 10,
        }
    }

    pub fn all() -> &'static [PriorityTier] {
        &[
            PriorityTier::CriticalResources,
            PriorityTier::Monitoring,
            PriorityTier::Workers,
            PriorityTier::Caches,
            PriorityTier::Logging,
            PriorityTier::Default,
            PriorityTier::Final,
        ]
    }
}

/// Why shutdown was triggered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// A termination signal (Ctrl+C, SIGTERM, SIGHUP).
    Signal(&'static str),
    /// A fatal fault (panic).
    Fault(String),
    /// Normal end of the process's work.
    Drain,
    /// Explicit programmatic shutdown.
    Manual(String),
}

impl ShutdownReason {
    /// Exit code the process should report for this reason.
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownReason::Fault(_) => 1,
            _ => 0,
        }
    }
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::Signal(name) => write!(f, "signal:{name}"),
            ShutdownReason::Fault(message) => write!(f, "fault:{message}"),
            ShutdownReason::Drain => f.write_str("drain"),
            ShutdownReason::Manual(reason) => write!(f, "manual:{reason}"),
        }
    }
}

/// Result of one full cleanup pass.
#[derive(Debug)]
pub struct ShutdownReport {
    pub reason: ShutdownReason,
    /// Handlers attempted (all of them; failures don't stop the pass).
    pub handlers_run: usize,
    /// Handler name and rendered error for each failure.
    pub failures: Vec<(String, String)>,
}

/// Introspection view of one registered handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerInfo {
    pub name: String,
    pub priority: i32,
}

type CleanupFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct HandlerEntry {
    name: String,
    priority: i32,
    seq: u64,
    run: CleanupFn,
}

impl std::fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

/// Flags set by signal/panic hooks and read by `wait_for_shutdown`.
///
/// The signal-hook callbacks only touch `terminate` (async-signal-safe);
/// everything else goes through `request`, which runs on ordinary
/// threads.
#[derive(Debug, Default)]
struct SignalState {
    requested: Mutex<Option<ShutdownReason>>,
    terminate: AtomicBool,
    notify: Notify,
}

impl SignalState {
    fn request(&self, reason: ShutdownReason) {
        let mut slot = self.requested.lock().unwrap();
        if slot.is_none() {
            *slot = Some(reason);
        }
        drop(slot);
        self.notify.notify_waiters();
    }

    fn requested(&self) -> Option<ShutdownReason> {
        if let Some(reason) = self.requested.lock().unwrap().clone() {
            return Some(reason);
        }
        if self.terminate.load(Ordering::SeqCst) {
            return Some(ShutdownReason::Signal("terminate"));
        }
        None
    }
}

/// Idempotent, priority-ordered shutdown coordinator.
#[derive(Debug)]
pub struct LifecycleManager {
    handlers: Mutex<Vec<HandlerEntry>>,
    next_seq: AtomicU64,
    handlers_registered: AtomicBool,
    shutting_down: AtomicBool,
    install_process_hooks: bool,
    signal: Arc<SignalState>,
}

impl LifecycleManager {
    /// Manager that installs OS/panic hooks at first registration.
    pub fn new() -> Self {
        Self::build(true)
    }

    /// Manager that never touches process-global hooks. For tests and
    /// hosts that own their own signal handling.
    pub fn without_process_hooks() -> Self {
        Self::build(false)
    }

    fn build(install_process_hooks: bool) -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            next_seq: AtomicU64::new(0),
            handlers_registered: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            install_process_hooks,
            signal: Arc::new(SignalState::default()),
        }
    }

    /// Inserts or replaces the named handler. Higher priority runs
    /// first; ties run in registration order. The very first
    /// registration subscribes to process termination and fault events.
    pub fn register_cleanup_handler<F, Fut>(&self, name: impl Into<String>, priority: i32, cleanup: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        let run: CleanupFn = Arc::new(move || cleanup().boxed());
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        {
            let mut handlers = self.handlers.lock().unwrap();
            if let Some(existing) = handlers.iter_mut().find(|entry| entry.name == name) {
                tracing::debug!(handler = %name, priority, "replaced cleanup handler");
                existing.priority = priority;
                existing.seq = seq;
                existing.run = run;
            } else {
                tracing::debug!(handler = %name, priority, "registered cleanup handler");
                handlers.push(HandlerEntry {
                    name,
                    priority,
                    seq,
                    run,
                });
            }
        }

        if !self.handlers_registered.swap(true, Ordering::SeqCst) && self.install_process_hooks {
            self.install_hooks();
        }
    }

    /// Unregisters a handler. Returns false when absent.
    pub fn remove_cleanup_handler(&self, name: &str) -> bool {
        let mut handlers = self.handlers.lock().unwrap();
        let before = handlers.len();
        handlers.retain(|entry| entry.name != name);
        handlers.len() != before
    }

    /// Handlers in execution order (priority desc, then registration).
    pub fn registered_handlers(&self) -> Vec<HandlerInfo> {
        let mut entries: Vec<(i32, u64, String)> = self
            .handlers
            .lock()
            .unwrap()
            .iter()
            .map(|entry| (entry.priority, entry.seq, entry.name.clone()))
            .collect();
        entries.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        entries
            .into_iter()
            .map(|(priority, _, name)| HandlerInfo { name, priority })
            .collect()
    }

    pub fn are_handlers_registered(&self) -> bool {
        self.handlers_registered.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Requests shutdown without running cleanup here; wakes
    /// `wait_for_shutdown`.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        self.signal.request(reason);
    }

    /// Suspends until a shutdown is requested by a signal, a fault, or
    /// `trigger_shutdown`.
    pub async fn wait_for_shutdown(&self) -> ShutdownReason {
        loop {
            if let Some(reason) = self.signal.requested() {
                return reason;
            }
            // The terminate flag is set from a signal handler that can't
            // call into Notify, so poll it on a short fallback interval.
            tokio::select! {
                () = self.signal.notify.notified() => {}
                () = tokio::time::sleep(Duration::from_millis(200)) => {}
            }
        }
    }

    /// Runs every handler once, in order. At most one full pass per
    /// process lifetime: a concurrent or repeated trigger is logged and
    /// returns `None`.
    pub async fn execute_cleanup(&self, reason: ShutdownReason) -> Option<ShutdownReport> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            tracing::warn!(%reason, "shutdown already in progress; ignoring trigger");
            return None;
        }
        self.signal.request(reason.clone());
        tracing::info!(%reason, "running cleanup handlers");

        let mut entries: Vec<(String, i32, u64, CleanupFn)> = {
            let handlers = self.handlers.lock().unwrap();
            handlers
                .iter()
                .map(|entry| {
                    (
                        entry.name.clone(),
                        entry.priority,
                        entry.seq,
                        Arc::clone(&entry.run),
                    )
                })
                .collect()
        };
        entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

        let mut handlers_run = 0;
        let mut failures = Vec::new();
        for (name, priority, _, run) in entries {
            handlers_run += 1;
            match run().await {
                Ok(()) => {
                    tracing::debug!(handler = %name, priority, "cleanup handler finished");
                }
                Err(error) => {
                    let rendered = format!("{error:#}");
                    tracing::error!(
                        handler = %name,
                        priority,
                        error = %rendered,
                        "cleanup handler failed"
                    );
                    failures.push((name, rendered));
                }
            }
        }
        tracing::info!(handlers_run, failures = failures.len(), "cleanup complete");
        Some(ShutdownReport {
            reason,
            handlers_run,
            failures,
        })
    }

    /// Normal-exit path: runs cleanup only if shutdown has not already
    /// started.
    pub async fn shutdown_on_drain(&self) -> Option<ShutdownReport> {
        if self.is_shutting_down() {
            return None;
        }
        self.execute_cleanup(ShutdownReason::Drain).await
    }

    /// Installs Ctrl+C, SIGTERM/SIGHUP, and panic hooks. Called at most
    /// once per manager, guarded by `handlers_registered`.
    fn install_hooks(&self) {
        let state = Arc::clone(&self.signal);
        if let Err(error) = ctrlc::set_handler(move || {
            state.request(ShutdownReason::Signal("interrupt"));
        }) {
            tracing::error!(error = %error, "failed to install Ctrl+C handler");
        }

        #[cfg(unix)]
        {
            use signal_hook::consts::{SIGHUP, SIGTERM};

            // SAFETY: the closures only store an AtomicBool, which is
            // async-signal-safe.
            let sigterm = unsafe {
                let state = Arc::clone(&self.signal);
                signal_hook::low_level::register(SIGTERM, move || {
                    state.terminate.store(true, Ordering::SeqCst);
                })
            };
            // SAFETY: same as above.
            let sighup = unsafe {
                let state = Arc::clone(&self.signal);
                signal_hook::low_level::register(SIGHUP, move || {
                    state.terminate.store(true, Ordering::SeqCst);
                })
            };
            if let Err(error) = sigterm.and(sighup) {
                tracing::error!(error = %error, "failed to install termination signal handlers");
            }
        }

        let state = Arc::clone(&self.signal);
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            previous(info);
            state.request(ShutdownReason::Fault(info.to_string()));
        }));

        tracing::debug!("process shutdown hooks installed");
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}
