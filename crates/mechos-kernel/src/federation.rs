//! [`Federation`] – remote robots merged into the local graph as proxies.
//!
//! Each configured remote gets a [`RemoteView`]: its config, the
//! [`ConnectionSlot`] shared by all of its proxies, and the set of resource
//! names it last reported.  Every reported name becomes a proxy
//! [`GraphNode`] keyed by the remote-qualified name (`r1:arm`), whose
//! instance is a [`RemoteProxy`] forwarding through the slot.  Binding a
//! proxy cannot fail.
//!
//! # Connection loss
//!
//! [`Federation::unmerge`] does not remove anything.  It clears the slot and
//! marks the remote's proxies unreachable, which hides them from name
//! resolution, lookup, and optional or weak dependency sets.  Required edges
//! already bound to them stay in place, so dependents are not rebuilt when a
//! link flaps; their calls fail with [`MechError::RemoteUnavailable`] until
//! [`Federation::merge`] makes the proxies reachable again.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mechos_hal::{ConnectionSlot, RemoteConnection, RemoteProxy};
use mechos_types::{MechError, RemoteConfig, ResourceName};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::graph::ResourceGraph;
use crate::node::GraphNode;

/// One configured remote.
pub struct RemoteView {
    config: RemoteConfig,
    slot: Arc<ConnectionSlot>,
    /// Names as the remote reports them.
    names: BTreeSet<ResourceName>,
    connected: bool,
    last_seen: Option<DateTime<Utc>>,
}

impl RemoteView {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            config,
            slot: Arc::new(ConnectionSlot::new()),
            names: BTreeSet::new(),
            connected: false,
            last_seen: None,
        }
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }

    /// The connection currently bound, if any.
    pub fn connection(&self) -> Option<Arc<dyn RemoteConnection>> {
        self.slot.get()
    }

    /// Bind a fresh connection.  Existing proxies start using it at once.
    pub fn bind(&self, conn: Arc<dyn RemoteConnection>) {
        self.slot.set(conn);
    }

    /// Unbind the connection so every proxy starts failing, and hand it
    /// back for closing.
    pub fn take_connection(&self) -> Option<Arc<dyn RemoteConnection>> {
        self.slot.clear()
    }

    /// Graph key of a resource this remote calls `upstream`.
    pub fn local_name(&self, upstream: &ResourceName) -> ResourceName {
        let mut name = upstream.prepend_remote(&self.config.name);
        if let Some(prefix) = &self.config.prefix {
            name.name = format!("{prefix}{}", name.name);
        }
        name
    }

    /// Graph keys of every resource this remote last reported.
    pub fn local_names(&self) -> Vec<ResourceName> {
        self.names.iter().map(|n| self.local_name(n)).collect()
    }

    pub fn status(&self) -> RemoteStatus {
        RemoteStatus {
            name: self.config.name.clone(),
            address: self.config.address.clone(),
            connected: self.connected,
            last_seen: self.last_seen,
            resources: self.names.len(),
        }
    }
}

/// Externally visible state of a remote.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteStatus {
    pub name: String,
    pub address: String,
    pub connected: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub resources: usize,
}

/// Result of one [`Federation::merge`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeReport {
    /// Proxies created by this merge.
    pub added: Vec<ResourceName>,
    /// Existing proxies made reachable again.
    pub restored: Vec<ResourceName>,
    /// Proxies whose resource the remote no longer reports.  The caller
    /// removes them through its normal removal path.
    pub stale: Vec<ResourceName>,
}

impl MergeReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.restored.is_empty() && self.stale.is_empty()
    }
}

/// Every configured remote, keyed by remote name.
#[derive(Default)]
pub struct Federation {
    views: HashMap<String, RemoteView>,
}

impl Federation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a remote.  Nothing is merged until [`merge`](Self::merge).
    ///
    /// # Errors
    ///
    /// Returns [`MechError::DuplicateName`] if the remote is already tracked.
    pub fn add_view(&mut self, config: RemoteConfig) -> Result<(), MechError> {
        if self.views.contains_key(&config.name) {
            return Err(MechError::DuplicateName {
                kind: "remote".to_string(),
                name: config.name,
            });
        }
        debug!(remote = %config.name, address = %config.address, "tracking remote");
        self.views.insert(config.name.clone(), RemoteView::new(config));
        Ok(())
    }

    /// Stop tracking a remote.  Its proxies are left in the graph for the
    /// caller to remove.
    pub fn remove_view(&mut self, remote: &str) -> Option<RemoteView> {
        self.views.remove(remote)
    }

    pub fn view(&self, remote: &str) -> Option<&RemoteView> {
        self.views.get(remote)
    }

    /// Tracked remote names, sorted.
    pub fn remotes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.views.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn statuses(&self) -> Vec<RemoteStatus> {
        let mut out: Vec<RemoteStatus> = self.views.values().map(RemoteView::status).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Bring the graph in line with the names `remote` reports now.
    ///
    /// New names become ready proxies, known unreachable ones become
    /// reachable again, and names the remote stopped reporting come back in
    /// [`MergeReport::stale`].
    ///
    /// # Errors
    ///
    /// Returns [`MechError::NotFound`] if `remote` is not tracked.
    pub fn merge(
        &mut self,
        graph: &mut ResourceGraph,
        remote: &str,
        upstream_names: impl IntoIterator<Item = ResourceName>,
    ) -> Result<MergeReport, MechError> {
        let view = self
            .views
            .get_mut(remote)
            .ok_or_else(|| MechError::NotFound(format!("remote {remote}")))?;
        let incoming: BTreeSet<ResourceName> = upstream_names.into_iter().collect();
        let mut report = MergeReport::default();

        for upstream in &incoming {
            let local = view.local_name(upstream);
            if let Some(node) = graph.node_mut(&local) {
                if node.remote() != Some(remote) {
                    warn!(resource = %local, remote, "remote resource shadows an existing node");
                    continue;
                }
                if !node.reachable {
                    node.reachable = true;
                    report.restored.push(local);
                }
                continue;
            }
            let proxy = RemoteProxy::new(local.clone(), upstream.clone(), remote, view.slot.clone());
            let clock = graph.tick();
            graph.add_node(GraphNode::proxy(local.clone(), remote, Arc::new(proxy), clock))?;
            report.added.push(local);
        }
        for upstream in view.names.difference(&incoming) {
            report.stale.push(view.local_name(upstream));
        }

        view.names = incoming;
        view.connected = true;
        view.last_seen = Some(Utc::now());
        if !report.is_empty() {
            info!(
                remote,
                added = report.added.len(),
                restored = report.restored.len(),
                stale = report.stale.len(),
                "merged remote resources"
            );
        }
        Ok(report)
    }

    /// Mark every proxy of `remote` unreachable and drop its connection.
    /// Returns the proxies that were reachable until now.
    pub fn unmerge(&mut self, graph: &mut ResourceGraph, remote: &str) -> Vec<ResourceName> {
        let Some(view) = self.views.get_mut(remote) else {
            return Vec::new();
        };
        view.slot.clear();
        view.connected = false;

        let mut lost = Vec::new();
        for local in view.local_names() {
            if let Some(node) = graph.node_mut(&local) {
                if node.reachable {
                    node.reachable = false;
                    lost.push(local);
                }
            }
        }
        if !lost.is_empty() {
            warn!(remote, proxies = lost.len(), "remote unreachable");
        }
        lost
    }
}
