//! Per-plugin refresh scheduling.
//!
//! One tokio task per enabled plugin owns its cadence: a fixed interval
//! tick (or manual-only when no interval is declared), a manual-refresh
//! signal, and a shutdown signal. Executions are serialized per plugin;
//! refresh requests arriving while a run is in flight coalesce into at
//! most one follow-up run. New trees are published by whole-`Arc` swap
//! through a watch channel, so subscribers always observe a complete
//! tree, never a torn one.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot, watch};
use tokio::time::MissedTickBehavior;

use crate::menu::{self, MenuTree};
use crate::plugins::PluginSource;
use crate::script_exec::ScriptRunner;
use crate::state::EngineState;

/// A live binding to one plugin's published trees. Dropped receivers
/// tear themselves down; the channel closes when the plugin is disabled
/// or removed.
pub type RefreshSubscription = watch::Receiver<Arc<MenuTree>>;

/// The per-plugin "currently executing" flag plus the coalesced-request
/// marker, mutated under one lock.
pub(crate) struct RunGuard {
    inner: Mutex<RunState>,
}

#[derive(Default)]
struct RunState {
    in_flight: bool,
    pending: bool,
}

impl RunGuard {
    pub(crate) fn new() -> Arc<RunGuard> {
        Arc::new(RunGuard {
            inner: Mutex::new(RunState::default()),
        })
    }

    /// Mark an execution started. Returns false if one is already in
    /// flight (the request is recorded instead).
    pub(crate) fn try_begin(&self) -> bool {
        let mut s = self.inner.lock();
        if s.in_flight {
            s.pending = true;
            false
        } else {
            s.in_flight = true;
            true
        }
    }

    /// Record an external refresh request. Returns true when the caller
    /// should wake the plugin task; false when an in-flight run will
    /// satisfy the request.
    pub(crate) fn note_request(&self) -> bool {
        let mut s = self.inner.lock();
        if s.in_flight {
            s.pending = true;
            false
        } else {
            true
        }
    }

    /// Mark the execution finished. Returns true if requests were
    /// coalesced while it ran and exactly one follow-up run is owed.
    pub(crate) fn finish(&self) -> bool {
        let mut s = self.inner.lock();
        s.in_flight = false;
        std::mem::take(&mut s.pending)
    }
}

struct PluginHandle {
    tree_rx: watch::Receiver<Arc<MenuTree>>,
    refresh: Arc<Notify>,
    guard: Arc<RunGuard>,
    cancelled: Arc<AtomicBool>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

/// Owns every plugin timer task. Disabling one plugin never perturbs
/// the others.
pub struct Scheduler {
    state: Arc<EngineState>,
    runner: ScriptRunner,
    handles: DashMap<String, PluginHandle>,
}

impl Scheduler {
    pub fn new(state: Arc<EngineState>, runner: ScriptRunner) -> Arc<Scheduler> {
        Arc::new(Scheduler {
            state,
            runner,
            handles: DashMap::new(),
        })
    }

    /// Register a plugin and, if enabled, start its timer task. The
    /// interval's first tick fires immediately, which doubles as the
    /// initial load.
    pub fn register(&self, source: PluginSource) {
        self.state
            .plugins
            .insert(source.id.clone(), source.clone());
        if !source.enabled {
            return;
        }
        self.start_task(source);
    }

    fn start_task(&self, source: PluginSource) {
        let (tree_tx, tree_rx) = watch::channel(Arc::new(MenuTree::unavailable()));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let refresh = Arc::new(Notify::new());
        let guard = RunGuard::new();
        let cancelled = Arc::new(AtomicBool::new(false));

        let handle = PluginHandle {
            tree_rx,
            refresh: refresh.clone(),
            guard: guard.clone(),
            cancelled: cancelled.clone(),
            shutdown: Mutex::new(Some(shutdown_tx)),
        };
        if let Some(old) = self.handles.insert(source.id.clone(), handle) {
            stop_handle(&old);
        }

        let env = source.env_overlay();
        let runner = self.runner.clone();
        tokio::spawn(plugin_loop(
            source,
            runner,
            env,
            tree_tx,
            refresh,
            guard,
            cancelled,
            shutdown_rx,
        ));
    }

    /// Subscribe to a plugin's published trees. The receiver currently
    /// holds the sentinel tree until the first run completes.
    pub fn subscribe(&self, id: &str) -> Option<RefreshSubscription> {
        self.handles.get(id).map(|h| h.tree_rx.clone())
    }

    /// Ask for a manual refresh. Requests made while a run is in flight
    /// coalesce: any number of them result in exactly one follow-up
    /// execution. Returns false for unknown or disabled plugins.
    pub fn request_refresh(&self, id: &str) -> bool {
        let Some(handle) = self.handles.get(id) else {
            tracing::debug!(plugin = id, "refresh requested for inactive plugin");
            return false;
        };
        if handle.guard.note_request() {
            handle.refresh.notify_one();
        }
        true
    }

    /// Manual refresh for every active plugin.
    pub fn refresh_all(&self) {
        for entry in self.handles.iter() {
            if entry.guard.note_request() {
                entry.refresh.notify_one();
            }
        }
    }

    /// Cancel the plugin's timer and drop its subscriptions. Safe to
    /// call while a run is in flight: the run completes but its result
    /// is discarded rather than published.
    pub fn disable(&self, id: &str) {
        self.state.set_enabled(id, false);
        if let Some((_, handle)) = self.handles.remove(id) {
            stop_handle(&handle);
            tracing::info!(plugin = id, "plugin disabled");
        }
    }

    /// Re-enable a previously registered plugin.
    pub fn enable(&self, id: &str) {
        let Some(source) = self.state.set_enabled(id, true) else {
            tracing::warn!(plugin = id, "enable requested for unknown plugin");
            return;
        };
        if !self.handles.contains_key(id) {
            self.start_task(source);
        }
    }

    /// True if the plugin has a running timer task.
    pub fn is_active(&self, id: &str) -> bool {
        self.handles.contains_key(id)
    }

    /// Stop every plugin task. Registered sources stay in the state so
    /// the engine can be restarted.
    pub fn shutdown(&self) {
        let ids: Vec<String> = self.handles.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, handle)) = self.handles.remove(&id) {
                stop_handle(&handle);
            }
        }
    }
}

fn stop_handle(handle: &PluginHandle) {
    handle.cancelled.store(true, Ordering::SeqCst);
    if let Some(tx) = handle.shutdown.lock().take() {
        let _ = tx.send(());
    }
}

#[allow(clippy::too_many_arguments)]
async fn plugin_loop(
    source: PluginSource,
    runner: ScriptRunner,
    env: HashMap<String, String>,
    tree_tx: watch::Sender<Arc<MenuTree>>,
    refresh: Arc<Notify>,
    guard: Arc<RunGuard>,
    cancelled: Arc<AtomicBool>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut ticker = source.refresh_interval().map(|d| {
        let mut t = tokio::time::interval(d);
        t.set_missed_tick_behavior(MissedTickBehavior::Delay);
        t
    });

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            _ = refresh.notified() => {}
            _ = tick(&mut ticker) => {}
        }
        if cancelled.load(Ordering::SeqCst) {
            break;
        }
        run_cycle(&source, &runner, &env, &tree_tx, &guard, &cancelled).await;
        if cancelled.load(Ordering::SeqCst) {
            break;
        }
    }
    tracing::debug!(plugin = %source.id, "scheduler task stopped");
}

/// Tick the interval, or park forever for manual-only plugins.
async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Execute, compile, publish — then run once more if requests were
/// coalesced while the execution was in flight.
async fn run_cycle(
    source: &PluginSource,
    runner: &ScriptRunner,
    env: &HashMap<String, String>,
    tree_tx: &watch::Sender<Arc<MenuTree>>,
    guard: &RunGuard,
    cancelled: &AtomicBool,
) {
    loop {
        if !guard.try_begin() {
            return;
        }

        let result = runner.run_sync(&source.path, &[], env).await;
        if let Some(failure) = &result.failure {
            tracing::warn!(
                plugin = %source.id,
                ?failure,
                stderr = %result.stderr,
                "plugin execution failed"
            );
        }
        let tree = Arc::new(menu::compile(&result));

        let rerun = guard.finish();
        if cancelled.load(Ordering::SeqCst) {
            // Disabled mid-run: the result is discarded, not published.
            return;
        }
        let _ = tree_tx.send(tree);

        if !rerun {
            return;
        }
        tracing::debug!(plugin = %source.id, "running coalesced refresh");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod guard_tests {
    use super::*;

    #[test]
    fn begin_finish_cycle() {
        let guard = RunGuard::new();
        assert!(guard.try_begin());
        assert!(!guard.try_begin());
        // The rejected begin recorded a pending request.
        assert!(guard.finish());
        assert!(!guard.finish());
    }

    #[test]
    fn requests_mid_flight_coalesce_to_one() {
        let guard = RunGuard::new();
        assert!(guard.try_begin());
        assert!(!guard.note_request());
        assert!(!guard.note_request());
        // Exactly one follow-up run is owed for both requests.
        assert!(guard.finish());
        assert!(guard.try_begin());
        assert!(!guard.finish());
    }

    #[test]
    fn idle_request_wakes_the_task() {
        let guard = RunGuard::new();
        assert!(guard.note_request());
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use serial_test::serial;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn source(id: &str, path: PathBuf, refresh_secs: Option<u64>) -> PluginSource {
        PluginSource {
            id: id.to_string(),
            name: id.to_string(),
            path,
            refresh_secs,
            enabled: true,
        }
    }

    fn scheduler() -> Arc<Scheduler> {
        Scheduler::new(
            EngineState::new(AppConfig::default()),
            ScriptRunner::default(),
        )
    }

    async fn next_tree(rx: &mut RefreshSubscription) -> Arc<MenuTree> {
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("timed out waiting for a published tree")
            .expect("publisher dropped");
        rx.borrow_and_update().clone()
    }

    #[tokio::test]
    #[serial]
    async fn manual_refresh_publishes_a_compiled_tree() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "hello.sh", "echo 'Hello|color=blue'");
        let sched = scheduler();
        sched.register(source("hello.sh", script, None));

        let mut rx = sched.subscribe("hello.sh").unwrap();
        assert!(rx.borrow().unavailable);

        assert!(sched.request_refresh("hello.sh"));
        let tree = next_tree(&mut rx).await;
        assert_eq!(tree.title, "Hello");
        assert!(!tree.unavailable);
        sched.shutdown();
    }

    #[tokio::test]
    #[serial]
    async fn two_requests_mid_flight_cause_one_extra_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("count");
        let script = write_script(
            dir.path(),
            "slow.sh",
            &format!("echo x >> {}\nsleep 0.4\necho Title", counter.display()),
        );
        let sched = scheduler();
        sched.register(source("slow.sh", script, None));
        let mut rx = sched.subscribe("slow.sh").unwrap();

        sched.request_refresh("slow.sh");
        // Let the first execution get in flight, then pile on requests.
        tokio::time::sleep(Duration::from_millis(150)).await;
        sched.request_refresh("slow.sh");
        sched.request_refresh("slow.sh");

        // First publish, then the single coalesced follow-up.
        next_tree(&mut rx).await;
        next_tree(&mut rx).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let invocations = std::fs::read_to_string(&counter).unwrap().lines().count();
        assert_eq!(invocations, 2);
        sched.shutdown();
    }

    #[tokio::test]
    #[serial]
    async fn interval_plugin_runs_repeatedly() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("count");
        let script = write_script(
            dir.path(),
            "tick.1s.sh",
            &format!("echo x >> {}\necho Tick", counter.display()),
        );
        let sched = scheduler();
        sched.register(source("tick.1s.sh", script, Some(1)));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let invocations = std::fs::read_to_string(&counter).unwrap().lines().count();
        // Immediate first tick plus at least one scheduled repeat.
        assert!(invocations >= 2, "expected >= 2 runs, got {invocations}");
        sched.shutdown();
    }

    #[tokio::test]
    #[serial]
    async fn disable_discards_in_flight_result() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "slow.sh", "sleep 0.3\necho Done");
        let sched = scheduler();
        sched.register(source("slow.sh", script, None));
        let mut rx = sched.subscribe("slow.sh").unwrap();

        sched.request_refresh("slow.sh");
        tokio::time::sleep(Duration::from_millis(100)).await;
        sched.disable("slow.sh");

        // The channel closes without ever publishing the in-flight tree.
        let outcome = tokio::time::timeout(Duration::from_secs(5), rx.changed()).await;
        assert!(matches!(outcome, Ok(Err(_))));
        assert!(rx.borrow().unavailable);
        assert!(!sched.is_active("slow.sh"));
    }

    #[tokio::test]
    #[serial]
    async fn disabling_one_plugin_leaves_siblings_scheduled() {
        let dir = tempfile::tempdir().unwrap();
        let slow = write_script(dir.path(), "slow.sh", "sleep 0.3\necho Slow");
        let counter = dir.path().join("count");
        let fast = write_script(
            dir.path(),
            "fast.sh",
            &format!("echo x >> {}\necho Fast", counter.display()),
        );

        let sched = scheduler();
        sched.register(source("slow.sh", slow, None));
        sched.register(source("fast.sh", fast, Some(1)));

        sched.request_refresh("slow.sh");
        tokio::time::sleep(Duration::from_millis(100)).await;
        sched.disable("slow.sh");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let invocations = std::fs::read_to_string(&counter).unwrap().lines().count();
        assert!(invocations >= 2, "sibling schedule was disturbed");
        assert!(sched.is_active("fast.sh"));
        assert!(!sched.state.plugin("slow.sh").unwrap().enabled);
        sched.shutdown();
    }

    #[tokio::test]
    #[serial]
    async fn enable_restarts_a_disabled_plugin() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "p.sh", "echo Back");
        let sched = scheduler();
        sched.register(source("p.sh", script, None));
        sched.disable("p.sh");
        assert!(!sched.is_active("p.sh"));

        sched.enable("p.sh");
        assert!(sched.is_active("p.sh"));
        let mut rx = sched.subscribe("p.sh").unwrap();
        sched.request_refresh("p.sh");
        let tree = next_tree(&mut rx).await;
        assert_eq!(tree.title, "Back");
        sched.shutdown();
    }

    #[tokio::test]
    #[serial]
    async fn failing_plugin_publishes_sentinel_and_stays_registered() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "bad.sh", "exit 7");
        let sched = scheduler();
        sched.register(source("bad.sh", script, None));
        let mut rx = sched.subscribe("bad.sh").unwrap();

        sched.request_refresh("bad.sh");
        let tree = next_tree(&mut rx).await;
        assert!(tree.unavailable);
        // Still schedulable for the next cycle.
        assert!(sched.is_active("bad.sh"));
        sched.shutdown();
    }
}
