//! [`ResourceManager`] – the facade callers use to drive the resource graph.
//!
//! Every operation that mutates the graph (a new snapshot, a retry, a
//! remote merge or probe, shutdown) takes the manager's pass lock first, so
//! passes never overlap.  Lookups only take the graph's read lock and may
//! run at any time, including in the middle of a pass.
//!
//! # Pass flow
//!
//! ```text
//! snapshot ──► diff ──► remotes ──► remove / add / modify nodes
//!                                              │
//!                         scheduler pass ◄─────┘ (dirty nodes)
//!                               │
//!                  soft-dependency refresh pass
//! ```
//!
//! # Example
//!
//! ```rust
//! use mechos_hal::sim_registry::{SimRegistry, FAKE_MODEL};
//! use mechos_kernel::{KernelSettings, ResourceManager};
//! use mechos_types::{Api, ResourceConfig, ResourceName, Snapshot};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let sim = SimRegistry::builder().with_fake(Api::component("motor")).build();
//! let manager = ResourceManager::new(sim.registry.clone(), KernelSettings::default());
//!
//! let snapshot = Snapshot {
//!     components: vec![ResourceConfig::new(Api::component("motor"), "left", FAKE_MODEL)],
//!     ..Snapshot::default()
//! };
//! let report = manager.reconfigure(snapshot).await.unwrap();
//! assert!(report.is_clean());
//!
//! let left = ResourceName::new(Api::component("motor"), "left");
//! assert!(manager.resource_by_name(&left).is_ok());
//! manager.close().await;
//! # }
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use mechos_hal::{RemoteConnection, RemoteConnector, Registry, Resource};
use mechos_types::{MechError, RemoteConfig, ResourceName, Snapshot};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::diff::{KindDiff, diff_snapshots};
use crate::federation::{Federation, MergeReport, RemoteStatus};
use crate::graph::ResourceGraph;
use crate::node::{GraphNode, NodeState, NodeStatus};
use crate::scheduler::{PassReport, Scheduler, close_with_deadline};
use crate::settings::KernelSettings;
use crate::updater::refresh_soft_dependents;

/// Owns the resource graph and applies snapshots to it.
pub struct ResourceManager {
    registry: Arc<Registry>,
    settings: KernelSettings,
    graph: RwLock<ResourceGraph>,
    /// Lock order: `graph` before `federation`.
    federation: Mutex<Federation>,
    connector: Option<Arc<dyn RemoteConnector>>,
    applied: RwLock<Snapshot>,
    pass_lock: tokio::sync::Mutex<()>,
    current_pass: Mutex<CancellationToken>,
    closed: AtomicBool,
}

impl ResourceManager {
    pub fn new(registry: Arc<Registry>, settings: KernelSettings) -> Self {
        Self {
            registry,
            settings,
            graph: RwLock::new(ResourceGraph::new()),
            federation: Mutex::new(Federation::new()),
            connector: None,
            applied: RwLock::new(Snapshot::default()),
            pass_lock: tokio::sync::Mutex::new(()),
            current_pass: Mutex::new(CancellationToken::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Use `connector` to open connections to configured remotes.
    pub fn with_connector(mut self, connector: Arc<dyn RemoteConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn settings(&self) -> &KernelSettings {
        &self.settings
    }

    /// The last snapshot passed to [`reconfigure`](Self::reconfigure).
    pub fn applied_snapshot(&self) -> Snapshot {
        self.applied.read().clone()
    }

    // ── Passes ───────────────────────────────────────────────────────────────

    /// Bring the running resource set in line with `snapshot`.
    ///
    /// An identical snapshot is a no-op: no pass runs and no resource is
    /// called.  Otherwise removed resources are closed, added and modified
    /// ones are built or reconfigured, and soft dependents are refreshed.
    /// Failures stay on their nodes and are reported in the returned
    /// [`PassReport`]; they are retried by later passes.
    ///
    /// # Errors
    ///
    /// Returns [`MechError::Shutdown`] after [`close`](Self::close) and
    /// [`MechError::DuplicateName`] if `snapshot` repeats a name.
    pub async fn reconfigure(&self, snapshot: Snapshot) -> Result<PassReport, MechError> {
        self.ensure_open()?;
        let _pass = self.pass_lock.lock().await;
        self.ensure_open()?;

        let diff = diff_snapshots(&self.applied.read(), &snapshot)?;
        if diff.resources_equal {
            debug!("snapshot unchanged; skipping pass");
            return Ok(PassReport::default());
        }

        if !diff.processes.is_empty() || !diff.modules.is_empty() {
            info!(
                processes = diff.processes.added.len() + diff.processes.modified.len(),
                modules = diff.modules.added.len() + diff.modules.modified.len(),
                "process and module configs recorded"
            );
        }

        self.apply_remote_changes(&diff.remotes).await;

        let removed: Vec<ResourceName> = diff.removed_resources().map(|c| c.resource_name()).collect();
        self.remove_nodes(removed).await;
        {
            let mut graph = self.graph.write();
            for conf in diff.added_resources().chain(diff.modified_resources()) {
                let name = conf.resource_name();
                match graph.node_mut(&name) {
                    Some(node) => node.set_config(conf.clone()),
                    None => {
                        if let Err(e) = graph.add_node(GraphNode::local(conf.clone())) {
                            warn!(resource = %name, error = %e, "could not add resource");
                        }
                    }
                }
            }
        }

        let report = self.run_full_pass().await;
        *self.applied.write() = snapshot;
        Ok(report)
    }

    /// Run a pass over every node still waiting for work, without a new
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`MechError::Shutdown`] after [`close`](Self::close).
    pub async fn retry_now(&self) -> Result<PassReport, MechError> {
        self.ensure_open()?;
        let _pass = self.pass_lock.lock().await;
        self.ensure_open()?;
        Ok(self.run_full_pass().await)
    }

    /// Whether some local node is still waiting for a build or reconfigure.
    pub fn needs_retry(&self) -> bool {
        self.graph
            .read()
            .nodes()
            .any(|n| n.is_dirty() && !n.is_proxy())
    }

    /// Cancel the pass in progress, if any.  Nodes already running finish;
    /// nothing new is started.
    pub fn cancel_pass(&self) {
        self.current_pass.lock().cancel();
    }

    /// Scheduler pass over dirty nodes followed by the soft-dependency
    /// refresh.  The caller holds the pass lock.
    async fn run_full_pass(&self) -> PassReport {
        let cancel = CancellationToken::new();
        *self.current_pass.lock() = cancel.clone();
        let span = info_span!("reconfigure_pass", pass = %Uuid::new_v4());

        async {
            let scheduler = Scheduler::new(&self.graph, &self.registry, &self.settings);
            let touched = self.graph.read().dirty_names();
            let mut report = scheduler.run_pass(touched, HashSet::new(), &cancel).await;
            if cancel.is_cancelled() {
                warn!("pass cancelled; skipping soft-dependency refresh");
                return report;
            }
            let refresh = refresh_soft_dependents(&self.graph.read(), &self.registry);
            if !refresh.is_empty() {
                debug!(nodes = refresh.len(), "refreshing soft dependents");
                report.merge(scheduler.run_pass(HashSet::new(), refresh, &cancel).await);
            }
            report
        }
        .instrument(span)
        .await
    }

    /// Close and remove `names`, dependents first.  Surviving direct
    /// dependents are marked dirty so the next pass re-resolves them.
    async fn remove_nodes(&self, names: Vec<ResourceName>) {
        if names.is_empty() {
            return;
        }
        let (order, closing) = {
            let mut graph = self.graph.write();
            let doomed: HashSet<ResourceName> = names.into_iter().filter(|n| graph.contains(n)).collect();
            let order: Vec<ResourceName> = graph
                .reverse_topological_order()
                .into_iter()
                .filter(|n| doomed.contains(n))
                .collect();
            let mut closing = Vec::new();
            for name in &order {
                for child in graph.children(name) {
                    if doomed.contains(&child) {
                        continue;
                    }
                    if let Some(node) = graph.node_mut(&child) {
                        debug!(resource = %child, dependency = %name, "dependency removed");
                        node.dirty = true;
                    }
                }
                if let Some(node) = graph.node_mut(name) {
                    node.transition_to(NodeState::Closing);
                    if let Some(instance) = node.instance.take() {
                        closing.push((name.clone(), instance));
                    }
                }
            }
            (order, closing)
        };

        for (name, instance) in closing {
            close_with_deadline(name, instance, self.settings.close_timeout).await;
        }

        let mut graph = self.graph.write();
        for name in order {
            if let Some(mut node) = graph.remove_node(&name) {
                node.transition_to(NodeState::Absent);
                info!(resource = %name, "removed resource");
            }
        }
    }

    // ── Remotes ──────────────────────────────────────────────────────────────

    async fn apply_remote_changes(&self, remotes: &KindDiff<RemoteConfig>) {
        for config in remotes.removed.iter().chain(&remotes.modified) {
            self.drop_remote(&config.name).await;
        }
        for config in remotes.added.iter().chain(&remotes.modified) {
            let added = self.federation.lock().add_view(config.clone());
            if let Err(e) = added {
                warn!(remote = %config.name, error = %e, "could not track remote");
                continue;
            }
            if let Err(e) = self.connect_remote(&config.name).await {
                warn!(remote = %config.name, error = %e, "remote not reachable yet");
            }
        }
    }

    /// Forget a remote: remove its proxies and close its connection.
    async fn drop_remote(&self, remote: &str) {
        let view = self.federation.lock().remove_view(remote);
        let Some(view) = view else {
            return;
        };
        let proxies: Vec<ResourceName> = self
            .graph
            .read()
            .nodes()
            .filter(|n| n.remote() == Some(remote))
            .map(|n| n.name().clone())
            .collect();
        self.remove_nodes(proxies).await;
        if let Some(conn) = view.take_connection() {
            self.close_connection(remote, conn).await;
        }
        info!(remote, "remote removed");
    }

    async fn close_connection(&self, remote: &str, conn: Arc<dyn RemoteConnection>) {
        match timeout(self.settings.close_timeout, conn.close()).await {
            Ok(Ok(())) => debug!(remote, "closed remote connection"),
            Ok(Err(e)) => warn!(remote, error = %e, "error closing remote connection"),
            Err(_) => warn!(remote, "timed out closing remote connection"),
        }
    }

    /// Open a connection to a tracked remote and merge what it serves.
    async fn connect_remote(&self, remote: &str) -> Result<MergeReport, MechError> {
        let Some(connector) = self.connector.clone() else {
            return Err(MechError::RemoteUnavailable {
                remote: remote.to_string(),
                details: "no remote connector configured".to_string(),
            });
        };
        let config = self.federation.lock().view(remote).map(|v| v.config().clone());
        let config = config.ok_or_else(|| MechError::NotFound(format!("remote {remote}")))?;

        let conn = self.bounded(remote, connector.connect(&config)).await?;
        let names = self.bounded(remote, conn.resource_names()).await?;
        let bound = self.federation.lock().view(remote).map(|v| v.bind(conn));
        if bound.is_none() {
            return Err(MechError::NotFound(format!("remote {remote}")));
        }
        info!(remote, address = %config.address, "connected to remote");
        self.merge_names(remote, names).await
    }

    /// Await a remote call for at most `remote_connect_timeout`.
    async fn bounded<T>(
        &self,
        remote: &str,
        call: impl Future<Output = Result<T, MechError>>,
    ) -> Result<T, MechError> {
        let after = self.settings.remote_connect_timeout;
        match timeout(after, call).await {
            Ok(result) => result,
            Err(_) => Err(MechError::RemoteUnavailable {
                remote: remote.to_string(),
                details: format!("no answer within {after:?}"),
            }),
        }
    }

    async fn merge_names(
        &self,
        remote: &str,
        names: Vec<ResourceName>,
    ) -> Result<MergeReport, MechError> {
        let report = {
            let mut graph = self.graph.write();
            self.federation.lock().merge(&mut graph, remote, names)?
        };
        self.remove_nodes(report.stale.clone()).await;
        Ok(report)
    }

    /// Merge the resource names a remote reports into the graph and run a
    /// pass.  Unknown names become proxies; names no longer reported are
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns [`MechError::NotFound`] for an untracked remote and
    /// [`MechError::Shutdown`] after [`close`](Self::close).
    pub async fn merge_remote_resources(
        &self,
        remote: &str,
        names: Vec<ResourceName>,
    ) -> Result<PassReport, MechError> {
        self.ensure_open()?;
        let _pass = self.pass_lock.lock().await;
        self.merge_names(remote, names).await?;
        Ok(self.run_full_pass().await)
    }

    /// Mark every proxy of `remote` unreachable and run a pass.  Local
    /// resources holding required handles to those proxies keep them.
    ///
    /// # Errors
    ///
    /// Returns [`MechError::Shutdown`] after [`close`](Self::close).
    pub async fn unmerge_remote_resources(&self, remote: &str) -> Result<PassReport, MechError> {
        self.ensure_open()?;
        let _pass = self.pass_lock.lock().await;
        {
            let mut graph = self.graph.write();
            self.federation.lock().unmerge(&mut graph, remote);
        }
        Ok(self.run_full_pass().await)
    }

    /// Probe every remote once.
    ///
    /// Connected remotes are asked for their current resource set; lost ones
    /// are unmerged and a reconnect is attempted.  A pass runs only if
    /// something changed.
    ///
    /// # Errors
    ///
    /// Returns [`MechError::Shutdown`] after [`close`](Self::close).
    pub async fn sync_remotes(&self) -> Result<PassReport, MechError> {
        self.ensure_open()?;
        let _pass = self.pass_lock.lock().await;

        let remotes = self.federation.lock().remotes();
        let mut changed = false;
        for remote in remotes {
            let conn = self.federation.lock().view(&remote).and_then(|v| v.connection());
            let names = match conn {
                Some(conn) if conn.is_connected() => {
                    match self.bounded(&remote, conn.resource_names()).await {
                        Ok(names) => Some(names),
                        Err(e) => {
                            warn!(remote = %remote, error = %e, "remote listing failed");
                            None
                        }
                    }
                }
                _ => None,
            };

            if let Some(names) = names {
                match self.merge_names(&remote, names).await {
                    Ok(report) => changed |= !report.is_empty(),
                    Err(e) => warn!(remote = %remote, error = %e, "remote merge failed"),
                }
                continue;
            }

            let lost = {
                let mut graph = self.graph.write();
                self.federation.lock().unmerge(&mut graph, &remote)
            };
            changed |= !lost.is_empty();
            match self.connect_remote(&remote).await {
                Ok(report) => changed |= !report.is_empty(),
                Err(e) => debug!(remote = %remote, error = %e, "remote still unreachable"),
            }
        }

        if !changed {
            return Ok(PassReport::default());
        }
        Ok(self.run_full_pass().await)
    }

    pub fn remote_statuses(&self) -> Vec<RemoteStatus> {
        self.federation.lock().statuses()
    }

    // ── Lookup ───────────────────────────────────────────────────────────────

    /// The instance registered under `name`.
    ///
    /// A local name not in the graph falls back to the one reachable remote
    /// resource with the same API and simple name.
    ///
    /// # Errors
    ///
    /// - [`MechError::NotFound`] if no such resource is ready, including
    ///   resources waiting on dependencies.
    /// - The build error of a resource whose last build or reconfigure
    ///   failed.
    /// - [`MechError::AmbiguousDependency`] if the fallback matches more than
    ///   one remote.
    pub fn resource_by_name(&self, name: &ResourceName) -> Result<Arc<dyn Resource>, MechError> {
        let graph = self.graph.read();
        if let Some(node) = graph.node(name) {
            return node.lookup();
        }
        if name.is_remote() {
            return Err(MechError::NotFound(name.to_string()));
        }

        let matches: Vec<&GraphNode> = graph
            .nodes()
            .filter(|n| n.is_proxy() && n.is_reachable())
            .filter(|n| n.name().api == name.api && n.name().name == name.name)
            .collect();
        match matches.as_slice() {
            [] => Err(MechError::NotFound(name.to_string())),
            [only] => only.lookup(),
            many => {
                let mut candidates: Vec<String> = many.iter().map(|n| n.name().short_name()).collect();
                candidates.sort();
                Err(MechError::AmbiguousDependency {
                    reference: name.to_string(),
                    candidates,
                })
            }
        }
    }

    /// Every ready, reachable resource, local and remote, sorted.
    pub fn resource_names(&self) -> Vec<ResourceName> {
        let graph = self.graph.read();
        let mut names: Vec<ResourceName> = graph
            .nodes()
            .filter(|n| n.is_available())
            .map(|n| n.name().clone())
            .collect();
        names.sort();
        names
    }

    /// Forward a command to the named resource.
    ///
    /// # Errors
    ///
    /// Lookup errors as in [`resource_by_name`](Self::resource_by_name), or
    /// whatever the resource returns.
    pub async fn do_command(&self, name: &ResourceName, cmd: Value) -> Result<Value, MechError> {
        let resource = self.resource_by_name(name)?;
        resource.do_command(cmd).await
    }

    /// Ask the named resource for its status.
    ///
    /// # Errors
    ///
    /// Lookup errors as in [`resource_by_name`](Self::resource_by_name), or
    /// whatever the resource returns.
    pub async fn status(&self, name: &ResourceName) -> Result<Value, MechError> {
        let resource = self.resource_by_name(name)?;
        resource.status().await
    }

    /// Lifecycle state of every node, local and proxy, sorted by name.
    pub fn statuses(&self) -> Vec<NodeStatus> {
        let graph = self.graph.read();
        let mut out: Vec<NodeStatus> = graph.nodes().map(GraphNode::status).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Lifecycle state of one node.
    pub fn node_state(&self, name: &ResourceName) -> Option<NodeState> {
        self.graph.read().node(name).map(GraphNode::state)
    }

    /// Required dependencies currently bound for `name`.
    pub fn dependencies_of(&self, name: &ResourceName) -> Vec<ResourceName> {
        self.graph.read().parents(name)
    }

    /// Local resources in dependency order.
    pub fn build_order(&self) -> Vec<ResourceName> {
        let graph = self.graph.read();
        graph
            .topological_order()
            .into_iter()
            .filter(|n| graph.node(n).is_some_and(|node| !node.is_proxy()))
            .collect()
    }

    // ── Shutdown ─────────────────────────────────────────────────────────────

    /// Cancel any pass in progress, close every resource dependents-first,
    /// and disconnect every remote.  Further passes fail with
    /// [`MechError::Shutdown`].  Calling `close` twice is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_pass();
        let _pass = self.pass_lock.lock().await;

        let names = self.graph.read().names();
        self.remove_nodes(names).await;

        let remotes = self.federation.lock().remotes();
        for remote in remotes {
            let view = self.federation.lock().remove_view(&remote);
            let conn = view.and_then(|v| v.take_connection());
            if let Some(conn) = conn {
                self.close_connection(&remote, conn).await;
            }
        }
        *self.applied.write() = Snapshot::default();
        info!("resource manager closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), MechError> {
        if self.is_closed() {
            return Err(MechError::Shutdown);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mechos_hal::sim_registry::{FAKE_MODEL, SimRegistry, SimStats};
    use mechos_types::{Api, ResourceConfig};
    use serde_json::json;

    fn motor(name: &str) -> ResourceConfig {
        ResourceConfig::new(Api::component("motor"), name, FAKE_MODEL)
    }

    fn rn(name: &str) -> ResourceName {
        ResourceName::new(Api::component("motor"), name)
    }

    fn snapshot(components: Vec<ResourceConfig>) -> Snapshot {
        Snapshot {
            components,
            ..Snapshot::default()
        }
    }

    fn manager() -> (ResourceManager, Arc<SimStats>) {
        let sim = SimRegistry::builder().with_fake(Api::component("motor")).build();
        (
            ResourceManager::new(sim.registry, KernelSettings::default()),
            sim.stats,
        )
    }

    #[tokio::test]
    async fn builds_and_looks_up() {
        let (mgr, stats) = manager();
        let report = mgr
            .reconfigure(snapshot(vec![motor("base"), motor("arm").with_depends_on("base")]))
            .await
            .unwrap();

        assert!(report.is_clean());
        assert_eq!(mgr.resource_names(), vec![rn("arm"), rn("base")]);
        assert_eq!(mgr.dependencies_of(&rn("arm")), vec![rn("base")]);
        assert_eq!(mgr.build_order(), vec![rn("base"), rn("arm")]);
        assert_eq!(stats.constructs("base"), 1);
        assert!(!mgr.needs_retry());

        let reply = mgr.do_command(&rn("arm"), json!({"go": 1})).await.unwrap();
        assert_eq!(reply["echo"]["go"], 1);
        assert!(mgr.status(&rn("base")).await.is_ok());
        assert!(matches!(
            mgr.resource_by_name(&rn("ghost")),
            Err(MechError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn removal_closes_and_unresolves_dependents() {
        let (mgr, stats) = manager();
        mgr.reconfigure(snapshot(vec![motor("base"), motor("arm").with_depends_on("base")]))
            .await
            .unwrap();

        let report = mgr
            .reconfigure(snapshot(vec![motor("arm").with_depends_on("base")]))
            .await
            .unwrap();

        assert_eq!(stats.closes("base"), 1);
        assert_eq!(report.unresolved, vec![rn("arm")]);
        assert!(mgr.node_state(&rn("base")).is_none());
        assert!(matches!(
            mgr.resource_by_name(&rn("arm")),
            Err(MechError::NotFound(_))
        ));
        assert!(mgr.needs_retry());
    }

    #[tokio::test]
    async fn statuses_report_every_node() {
        let (mgr, _) = manager();
        mgr.reconfigure(snapshot(vec![
            motor("ok"),
            motor("bad").with_attribute("fail_build", true),
        ]))
        .await
        .unwrap();

        let statuses = mgr.statuses();
        assert_eq!(statuses.len(), 2);
        let bad = statuses.iter().find(|s| s.name.ends_with("/bad")).unwrap();
        assert!(bad.error.as_deref().unwrap().contains("injected build failure"));
        let ok = statuses.iter().find(|s| s.name.ends_with("/ok")).unwrap();
        assert_eq!(ok.state, NodeState::Ready);
        assert!(ok.error.is_none());
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected_before_any_change() {
        let (mgr, stats) = manager();
        let err = mgr
            .reconfigure(snapshot(vec![motor("a"), motor("a")]))
            .await
            .unwrap_err();
        assert!(matches!(err, MechError::DuplicateName { .. }));
        assert_eq!(stats.total_calls(), 0);
        assert_eq!(mgr.applied_snapshot(), Snapshot::default());
    }

    #[tokio::test]
    async fn close_tears_down_dependents_first() {
        let (mgr, stats) = manager();
        mgr.reconfigure(snapshot(vec![
            motor("base"),
            motor("arm").with_depends_on("base"),
            motor("gripper").with_depends_on("arm"),
        ]))
        .await
        .unwrap();

        mgr.close().await;
        let closes: Vec<String> = stats
            .calls()
            .into_iter()
            .filter(|(c, _)| *c == mechos_hal::sim_registry::SimCall::Close)
            .map(|(_, n)| n)
            .collect();
        assert_eq!(closes, vec!["gripper", "arm", "base"]);
        assert!(mgr.resource_names().is_empty());
        assert!(matches!(
            mgr.reconfigure(Snapshot::default()).await,
            Err(MechError::Shutdown)
        ));
        mgr.close().await;
    }

    #[tokio::test]
    async fn slow_close_is_bounded() {
        let sim = SimRegistry::builder().with_fake(Api::component("motor")).build();
        let settings = KernelSettings {
            close_timeout: std::time::Duration::from_millis(50),
            ..KernelSettings::default()
        };
        let mgr = ResourceManager::new(sim.registry, settings);
        mgr.reconfigure(snapshot(vec![
            motor("stuck").with_attribute("close_delay_ms", 10_000),
            motor("fine"),
        ]))
        .await
        .unwrap();

        let started = std::time::Instant::now();
        mgr.close().await;
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        assert_eq!(sim.stats.closes("fine"), 1);
    }
}
