//! [`GraphNode`] – one resource in the graph and its lifecycle state.
//!
//! # State machine
//!
//! ```text
//! Absent ──► Configuring ──► Ready
//!   │             │    ▲       │
//!   │             ▼    │       ▼
//!   └──────────► Errored(cause)
//!
//! any ──► Closing ──► Absent
//! ```
//!
//! Unexpected transitions are still applied but logged at `warn`, so a bug
//! in the scheduler shows up in the logs instead of wedging a node.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mechos_hal::{DeclaredDependencies, Resource};
use mechos_types::{MechError, Model, ResourceConfig, ResourceName};
use serde::Serialize;
use tracing::{debug, warn};

/// Why a node is errored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCause {
    /// A required dependency is missing, ambiguous, or not ready.  Looks
    /// like "not found" from outside.
    UnresolvedDependencies,
    /// The constructor or `reconfigure` failed.  The error is surfaced on
    /// lookup.
    BuildFailure,
}

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeState {
    Absent,
    Configuring,
    Ready,
    Errored(ErrorCause),
    Closing,
}

impl NodeState {
    fn can_transition_to(self, next: NodeState) -> bool {
        use NodeState::*;
        match (self, next) {
            (_, Closing) => true,
            (Closing, Absent) => true,
            (Absent, Configuring | Errored(_)) => true,
            (Configuring, Ready | Errored(_)) => true,
            (Ready, Configuring | Errored(_)) => true,
            (Errored(_), Configuring | Errored(_)) => true,
            _ => false,
        }
    }
}

/// Whether a node is built locally or forwarded to a remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Local,
    Proxy { remote: String },
}

/// Externally visible snapshot of a node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub name: String,
    pub state: NodeState,
    pub last_updated: DateTime<Utc>,
    /// Logical clock value of the current instance, 0 when none was built.
    pub updated_at: u64,
    pub error: Option<String>,
    pub reachable: bool,
    pub remote: Option<String>,
}

/// A resource in the graph.
///
/// Fields are crate-visible; only the scheduler, the federation code, and
/// the manager mutate nodes, and always under the graph's write lock.
pub struct GraphNode {
    pub(crate) name: ResourceName,
    pub(crate) kind: NodeKind,
    pub(crate) config: Option<ResourceConfig>,
    pub(crate) instance: Option<Arc<dyn Resource>>,
    /// Model the current instance was built from.
    pub(crate) instance_model: Option<Model>,
    pub(crate) state: NodeState,
    pub(crate) last_error: Option<MechError>,
    /// Cached validator output for the current config.
    pub(crate) declared: Option<DeclaredDependencies>,
    /// Set during resolution; blocks any call into the resource.
    pub(crate) resolution_error: Option<MechError>,
    /// Set when the registration is missing or validation failed.
    pub(crate) config_error: Option<MechError>,
    /// Needs resolution and a build or reconfigure on the next pass.
    pub(crate) dirty: bool,
    /// `false` while a proxy's remote is disconnected.
    pub(crate) reachable: bool,
    /// Names in the live dependency set last handed to the instance.
    pub(crate) live_dependencies: BTreeSet<ResourceName>,
    pub(crate) updated_at: u64,
    pub(crate) transitioned_at: DateTime<Utc>,
}

impl GraphNode {
    /// An unbuilt local node for `config`.
    pub fn local(config: ResourceConfig) -> Self {
        Self::blank(config.resource_name(), NodeKind::Local, Some(config))
    }

    /// A ready proxy node already bound to its forwarding handle.
    pub fn proxy(name: ResourceName, remote: &str, instance: Arc<dyn Resource>, clock: u64) -> Self {
        let mut node = Self::blank(
            name,
            NodeKind::Proxy {
                remote: remote.to_string(),
            },
            None,
        );
        node.instance = Some(instance);
        node.state = NodeState::Ready;
        node.dirty = false;
        node.updated_at = clock;
        node
    }

    fn blank(name: ResourceName, kind: NodeKind, config: Option<ResourceConfig>) -> Self {
        Self {
            name,
            kind,
            config,
            instance: None,
            instance_model: None,
            state: NodeState::Absent,
            last_error: None,
            declared: None,
            resolution_error: None,
            config_error: None,
            dirty: true,
            reachable: true,
            live_dependencies: BTreeSet::new(),
            updated_at: 0,
            transitioned_at: Utc::now(),
        }
    }

    pub fn name(&self) -> &ResourceName {
        &self.name
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self.kind, NodeKind::Proxy { .. })
    }

    /// Remote this node belongs to, if it is a proxy.
    pub fn remote(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Proxy { remote } => Some(remote),
            NodeKind::Local => None,
        }
    }

    pub fn config(&self) -> Option<&ResourceConfig> {
        self.config.as_ref()
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn last_error(&self) -> Option<&MechError> {
        self.last_error.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable
    }

    pub fn updated_at(&self) -> u64 {
        self.updated_at
    }

    /// Reachable and serving an instance.  A node being reconfigured keeps
    /// serving its current one.
    pub fn is_available(&self) -> bool {
        matches!(self.state, NodeState::Ready | NodeState::Configuring)
            && self.reachable
            && self.instance.is_some()
    }

    /// The instance a dependent may be handed right now.
    pub fn available_instance(&self) -> Option<Arc<dyn Resource>> {
        if self.is_available() {
            self.instance.clone()
        } else {
            None
        }
    }

    /// Move to `next`, logging transitions the state machine does not allow.
    pub(crate) fn transition_to(&mut self, next: NodeState) {
        if self.state == next {
            debug!(resource = %self.name, state = ?next, "state unchanged");
            return;
        }
        if !self.state.can_transition_to(next) {
            warn!(
                resource = %self.name,
                from = ?self.state,
                to = ?next,
                "unexpected state transition"
            );
        }
        self.state = next;
        self.transitioned_at = Utc::now();
    }

    /// Put back a state saved before a skipped attempt.
    pub(crate) fn restore_state(&mut self, previous: NodeState) {
        self.state = previous;
    }

    /// Replace the desired config.  Validation runs again on the next pass.
    pub(crate) fn set_config(&mut self, config: ResourceConfig) {
        self.config = Some(config);
        self.declared = None;
        self.config_error = None;
        self.dirty = true;
    }

    pub(crate) fn mark_ready(&mut self) {
        self.transition_to(NodeState::Ready);
        self.last_error = None;
        self.dirty = false;
    }

    pub(crate) fn mark_errored(&mut self, cause: ErrorCause, error: MechError) {
        self.transition_to(NodeState::Errored(cause));
        self.last_error = Some(error);
        self.dirty = true;
    }

    /// Lookup semantics: ready instances are returned, build failures
    /// surface their error, and everything else looks absent.
    pub fn lookup(&self) -> Result<Arc<dyn Resource>, MechError> {
        let not_found = || MechError::NotFound(self.name.to_string());
        if !self.reachable {
            return Err(not_found());
        }
        match self.state {
            NodeState::Ready | NodeState::Configuring => self.instance.clone().ok_or_else(not_found),
            NodeState::Errored(ErrorCause::BuildFailure) => Err(self
                .last_error
                .clone()
                .unwrap_or_else(|| MechError::Build {
                    name: self.name.to_string(),
                    details: "unknown failure".to_string(),
                })),
            NodeState::Errored(ErrorCause::UnresolvedDependencies)
            | NodeState::Absent
            | NodeState::Closing => Err(not_found()),
        }
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            name: self.name.to_string(),
            state: self.state,
            last_updated: self.transitioned_at,
            updated_at: self.updated_at,
            error: self.last_error.as_ref().map(ToString::to_string),
            reachable: self.reachable,
            remote: self.remote().map(str::to_string),
        }
    }
}
