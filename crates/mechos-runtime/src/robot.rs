//! [`RobotRuntime`] – the background task that keeps a [`ResourceManager`]
//! converging.
//!
//! Passes are triggered by:
//!
//! | Trigger | Action |
//! |---|---|
//! | [`RobotRuntime::update`] | [`ResourceManager::reconfigure`] with the new snapshot |
//! | [`RobotRuntime::nudge`] | [`ResourceManager::retry_now`] |
//! | every `retry_interval` while a node still needs work | [`ResourceManager::retry_now`] |
//! | every `remote_probe_interval` | [`ResourceManager::sync_remotes`] |
//!
//! Only one pass runs at a time; the manager serialises them.  Snapshot
//! updates that arrive while a pass is running coalesce, and only the
//! latest one is applied.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use mechos_hal::Registry;
//! use mechos_kernel::{KernelSettings, ResourceManager};
//! use mechos_runtime::RobotRuntime;
//! use mechos_types::Snapshot;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let manager = Arc::new(ResourceManager::new(
//!     Arc::new(Registry::new()),
//!     KernelSettings::default(),
//! ));
//! let runtime = RobotRuntime::start(manager, Snapshot::default());
//! runtime.nudge();
//! runtime.shutdown().await;
//! # }
//! ```

use std::sync::Arc;

use mechos_kernel::ResourceManager;
use mechos_types::Snapshot;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handle to a running trigger loop.
pub struct RobotRuntime {
    manager: Arc<ResourceManager>,
    updates: watch::Sender<Snapshot>,
    nudge: Arc<Notify>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl RobotRuntime {
    /// Spawn the trigger loop and apply `initial` as its first pass.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(manager: Arc<ResourceManager>, initial: Snapshot) -> Self {
        let (updates, rx) = watch::channel(initial);
        let nudge = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(
            manager.clone(),
            rx,
            nudge.clone(),
            shutdown.clone(),
        ));
        info!("robot runtime started");
        Self {
            manager,
            updates,
            nudge,
            shutdown,
            task,
        }
    }

    pub fn manager(&self) -> &Arc<ResourceManager> {
        &self.manager
    }

    /// Hand the loop a new desired snapshot.
    pub fn update(&self, snapshot: Snapshot) {
        self.updates.send_replace(snapshot);
    }

    /// Request a pass over everything still waiting for work.  Several
    /// nudges before the loop wakes up collapse into one pass.
    pub fn nudge(&self) {
        self.nudge.notify_one();
    }

    /// Stop the loop, cancel any pass in progress, and close every resource.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.manager.cancel_pass();
        if let Err(e) = self.task.await {
            warn!(error = %e, "robot runtime task ended abnormally");
        }
        self.manager.close().await;
        info!("robot runtime stopped");
    }
}

async fn run(
    manager: Arc<ResourceManager>,
    mut updates: watch::Receiver<Snapshot>,
    nudge: Arc<Notify>,
    shutdown: CancellationToken,
) {
    let initial = updates.borrow_and_update().clone();
    apply(&manager, initial).await;

    let mut retry = interval(manager.settings().retry_interval);
    retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut probe = interval(manager.settings().remote_probe_interval);
    probe.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Both fire immediately on the first tick.
    retry.tick().await;
    probe.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                apply(&manager, snapshot).await;
            }
            _ = nudge.notified() => {
                debug!("nudged");
                retry_pass(&manager).await;
            }
            _ = retry.tick() => {
                if manager.needs_retry() {
                    retry_pass(&manager).await;
                }
            }
            _ = probe.tick() => {
                if let Err(e) = manager.sync_remotes().await {
                    warn!(error = %e, "remote sync failed");
                }
            }
        }
    }
    debug!("robot runtime loop exited");
}

async fn apply(manager: &ResourceManager, snapshot: Snapshot) {
    match manager.reconfigure(snapshot).await {
        Ok(report) if !report.is_clean() => {
            warn!(
                failed = report.failed.len(),
                unresolved = report.unresolved.len(),
                "snapshot applied with errors"
            );
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "snapshot rejected"),
    }
}

async fn retry_pass(manager: &ResourceManager) {
    if let Err(e) = manager.retry_now().await {
        warn!(error = %e, "retry pass failed");
    }
}
