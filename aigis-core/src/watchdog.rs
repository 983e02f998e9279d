//! The cooperative scheduler and watchdog.
//!
//! One dedicated worker thread hosts a `tokio` runtime pinned to a single
//! worker, replacing a blocking-OS-thread-per-watched-child model with a
//! single-threaded async reactor sized for this host's expected plugin
//! counts. The supervisor thread submits work onto it via
//! [`Scheduler::block_on`] (child spawn blocks the caller until the spawn
//! completes) and [`Scheduler::watch`] (the non-busy exit await, which never
//! blocks a thread).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::process::Child;
use tokio::sync::oneshot;

use crate::loader::{STOP_GRACE, STOP_POLL_INTERVAL};
use crate::registry::PluginRegistry;

/// A handle the Watchdog task holds to let `loader::stop` request a
/// graceful TERM/KILL without the supervisor thread itself touching the
/// child, and without ever blocking the supervisor thread indefinitely.
pub struct StopHandle {
    tx: Option<oneshot::Sender<oneshot::Sender<()>>>,
}

impl StopHandle {
    /// Synchronously requests the watchdog task perform TERM-then-KILL and
    /// blocks (on the scheduler, not the caller's own thread) until it has
    /// reaped the child.
    pub fn request_stop(&mut self, scheduler: &Scheduler) {
        let Some(tx) = self.tx.take() else { return };
        let (done_tx, done_rx) = oneshot::channel();
        if tx.send(done_tx).is_ok() {
            let _ = scheduler.block_on(done_rx);
        }
    }
}

pub struct Scheduler {
    runtime: tokio::runtime::Runtime,
}

impl Scheduler {
    pub fn start() -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("aigis-scheduler")
            .enable_all()
            .build()?;
        Ok(Scheduler { runtime })
    }

    /// Drives a future to completion on the scheduler, blocking the
    /// calling (supervisor) thread until it resolves — used for child
    /// spawn, a deliberate blocking suspension point.
    pub fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    /// Schedules an arbitrary future onto the scheduler thread without
    /// waiting for it — used by the `internal-remote` loader, whose watch
    /// task does not fit the local-`Child`-specific shape of [`Self::watch`].
    pub fn spawn<F>(&self, fut: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.spawn(fut)
    }

    /// Spawns the Watchdog task for a child: awaits exit (OS-notified via
    /// the runtime's reactor, never polled) and then calls
    /// `registry.bury(name)`, unless a [`StopHandle::request_stop`] arrives
    /// first, in which case it performs graceful TERM/KILL instead and does
    /// *not* bury (the caller already owns that transition via its own
    /// cleanup path).
    pub fn watch(&self, registry: Arc<PluginRegistry>, name: String, child: Child) -> StopHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        self.runtime.spawn(watch_task(registry, name, child, stop_rx));
        StopHandle { tx: Some(stop_tx) }
    }
}

async fn watch_task(
    registry: Arc<PluginRegistry>,
    name: String,
    mut child: Child,
    stop_rx: oneshot::Receiver<oneshot::Sender<()>>,
) {
    tokio::select! {
        exit = child.wait() => {
            match exit {
                Ok(status) => tracing::info!(plugin = %name, %status, "child exited"),
                Err(e) => {
                    tracing::warn!(plugin = %name, "error awaiting child exit: {e}, polling for a readable status");
                    match readback_exit_code(&mut child, Duration::from_millis(200)).await {
                        Some(status) => tracing::info!(plugin = %name, %status, "child exited"),
                        None => tracing::warn!(plugin = %name, "exit status never became readable"),
                    }
                }
            }
            registry.bury(&name);
        }
        done_tx = stop_rx => {
            graceful_kill(&mut child).await;
            if let Ok(done_tx) = done_tx {
                let _ = done_tx.send(());
            }
        }
    }
}

/// TERM, poll for up to 5s at 100Hz, then KILL.
async fn graceful_kill(child: &mut Child) {
    if let Some(pid) = child.id() {
        send_term(pid);
    } else {
        return; // already reaped
    }

    let deadline = Instant::now() + STOP_GRACE;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => {
                if Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep(STOP_POLL_INTERVAL).await;
            }
            Err(_) => return, // ProcessLookupError equivalent: already gone
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

#[cfg(unix)]
fn send_term(pid: u32) {
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn send_term(_pid: u32) {}

/// The post-exit readback loop internal-local watchdogs need: a small
/// bounded poll because, for a cross-process-spawned child, the
/// exit code may take a moment to become readable after the kernel-level
/// notification. `try_wait` already returns `Ok(Some(status))` only once
/// the status is populated, so this just bounds how long we'll retry a
/// `None` read that arrives spuriously close to the real exit.
pub async fn readback_exit_code(child: &mut Child, bound: Duration) -> Option<std::process::ExitStatus> {
    let deadline = Instant::now() + bound;
    loop {
        if let Ok(Some(status)) = child.try_wait() {
            return Some(status);
        }
        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
