//! [`Scheduler`] – runs one reconfiguration pass over the resource graph.
//!
//! A pass takes a set of *touched* nodes and brings every one of them to a
//! terminal state (`Ready` or `Errored`):
//!
//! 1. **Resolve** – dirty nodes run their validator (once per config) and
//!    their required references are re-resolved into graph edges.
//! 2. **Dispatch** – a touched node becomes eligible once none of its
//!    ancestors is still pending or running.  Eligible nodes are spawned
//!    onto a [`JoinSet`]; a [`Semaphore`] bounds how many constructor or
//!    `reconfigure` calls run at once.
//! 3. **Run** – each task acquires a permit, then checks the pass's
//!    [`CancellationToken`].  A cancelled task returns without ever entering
//!    the resource.  Otherwise it reconfigures in place or constructs a new
//!    instance under the per-resource deadline.  A
//!    [`Reconfigure::NeedsRebuild`] answer falls through to the constructor
//!    in the same task.
//! 4. **Apply** – results are written back under a short graph write lock.
//!    When a node gets a new instance, or stops being usable, its direct
//!    dependents join the pass.
//!
//! Replaced instances are closed in the background under the close
//! deadline, independent of cancellation; the pass waits for them before
//! returning.
//!
//! The graph lock is never held across an `.await`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use mechos_hal::{
    DeclaredDependencies, Dependencies, Reconfigure, Registration, Registry, Resource,
};
use mechos_types::{MechError, ResourceConfig, ResourceName};
use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, error, info, warn};

use crate::graph::ResourceGraph;
use crate::node::{ErrorCause, GraphNode, NodeState};
use crate::resolve::{NameIndex, Resolution, resolve_reference};
use crate::settings::KernelSettings;

// ─────────────────────────────────────────────────────────────────────────────
// Pass report
// ─────────────────────────────────────────────────────────────────────────────

/// What happened to each touched node during a pass.
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    /// Nodes that received a new instance.
    pub built: Vec<ResourceName>,
    /// Nodes reconfigured in place.
    pub reconfigured: Vec<ResourceName>,
    /// Nodes whose constructor or `reconfigure` failed.
    pub failed: Vec<(ResourceName, MechError)>,
    /// Nodes left waiting on required dependencies.
    pub unresolved: Vec<ResourceName>,
    /// Nodes never started because the pass was cancelled.
    pub skipped: Vec<ResourceName>,
    /// Every node that reached a terminal state, in completion order.
    pub completed: Vec<ResourceName>,
}

impl PassReport {
    /// Nothing failed, nothing is waiting, nothing was skipped.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.unresolved.is_empty() && self.skipped.is_empty()
    }

    pub fn merge(&mut self, other: PassReport) {
        self.built.extend(other.built);
        self.reconfigured.extend(other.reconfigured);
        self.failed.extend(other.failed);
        self.unresolved.extend(other.unresolved);
        self.skipped.extend(other.skipped);
        self.completed.extend(other.completed);
    }

    /// Position of `name` in completion order.
    pub fn completion_index(&self, name: &ResourceName) -> Option<usize> {
        self.completed.iter().position(|n| n == name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Jobs
// ─────────────────────────────────────────────────────────────────────────────

enum JobMode {
    Build,
    Reconfigure(Arc<dyn Resource>),
}

/// One constructor or `reconfigure` call, ready to be spawned.
struct Job {
    name: ResourceName,
    config: ResourceConfig,
    deps: Dependencies,
    registration: Registration,
    mode: JobMode,
    deadline: Duration,
}

enum Outcome {
    Built(Arc<dyn Resource>),
    Reconfigured,
    ReconfigureFailed(MechError),
    BuildFailed(MechError),
    Skipped,
}

/// Bookkeeping kept on the scheduler side while a job runs.
struct Attempt {
    previous: NodeState,
    live: BTreeSet<ResourceName>,
}

impl Job {
    /// Acquire a permit, check cancellation, then call into the resource.
    async fn run(self, permits: Arc<Semaphore>, cancel: CancellationToken) -> (ResourceName, Outcome) {
        let Ok(_permit) = permits.acquire_owned().await else {
            return (self.name, Outcome::Skipped);
        };
        if cancel.is_cancelled() {
            debug!(resource = %self.name, "pass cancelled before start");
            return (self.name, Outcome::Skipped);
        }

        let reconfiguring = matches!(self.mode, JobMode::Reconfigure(_));
        let name = self.name.clone();
        match AssertUnwindSafe(self.call()).catch_unwind().await {
            Ok(outcome) => (name, outcome),
            Err(_) => {
                let err = MechError::Build {
                    name: name.to_string(),
                    details: "resource panicked".to_string(),
                };
                if reconfiguring {
                    (name, Outcome::ReconfigureFailed(err))
                } else {
                    (name, Outcome::BuildFailed(err))
                }
            }
        }
    }

    async fn call(self) -> Outcome {
        if let JobMode::Reconfigure(instance) = &self.mode {
            match timeout(self.deadline, instance.reconfigure(&self.deps, &self.config)).await {
                Ok(Ok(Reconfigure::Applied)) => return Outcome::Reconfigured,
                Ok(Ok(Reconfigure::NeedsRebuild)) => {
                    debug!(resource = %self.name, "reconfigure requested a rebuild");
                }
                Ok(Err(e)) => return Outcome::ReconfigureFailed(e),
                Err(_) => return Outcome::ReconfigureFailed(self.timed_out("reconfigure")),
            }
        }

        let construct = self.registration.construct(self.config.clone(), self.deps.clone());
        match timeout(self.deadline, construct).await {
            Ok(Ok(instance)) => Outcome::Built(instance),
            Ok(Err(e)) => Outcome::BuildFailed(e),
            Err(_) => Outcome::BuildFailed(self.timed_out("construct")),
        }
    }

    fn timed_out(&self, operation: &str) -> MechError {
        MechError::Timeout {
            name: self.name.to_string(),
            operation: operation.to_string(),
            after: self.deadline,
        }
    }
}

enum Prepared {
    Job(Job, Attempt),
    /// Reached a terminal state without calling into the resource.
    Settled { cascade: bool },
    /// Nothing to do for this node.
    Unchanged,
}

/// Close `instance` under `deadline`, logging and swallowing any failure.
pub(crate) async fn close_with_deadline(
    name: ResourceName,
    instance: Arc<dyn Resource>,
    deadline: Duration,
) {
    match timeout(deadline, instance.close()).await {
        Ok(Ok(())) => debug!(resource = %name, "closed resource"),
        Ok(Err(e)) => warn!(resource = %name, error = %e, "error closing resource"),
        Err(_) => error!(resource = %name, after = ?deadline, "timed out closing resource"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Executes passes against a shared graph.
///
/// The caller guarantees that only one pass runs at a time.
pub struct Scheduler<'a> {
    graph: &'a RwLock<ResourceGraph>,
    registry: &'a Registry,
    settings: &'a KernelSettings,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        graph: &'a RwLock<ResourceGraph>,
        registry: &'a Registry,
        settings: &'a KernelSettings,
    ) -> Self {
        Self {
            graph,
            registry,
            settings,
        }
    }

    /// Bring every node in `touched` to a terminal state.
    ///
    /// Nodes in `refresh` are re-run even though nothing about them changed:
    /// reconfigurable ones are reconfigured in place with a fresh dependency
    /// set, others are rebuilt only if that set differs from the last one.
    pub async fn run_pass(
        &self,
        touched: HashSet<ResourceName>,
        refresh: HashSet<ResourceName>,
        cancel: &CancellationToken,
    ) -> PassReport {
        let mut report = PassReport::default();
        let (mut pending, index) = {
            let mut graph = self.graph.write();
            let pending: HashSet<ResourceName> = touched
                .iter()
                .chain(refresh.iter())
                .filter(|n| graph.node(n).is_some_and(|node| !node.is_proxy()))
                .cloned()
                .collect();
            self.resolve(&mut graph, &pending);
            let index = graph.name_index();
            (pending, index)
        };
        if pending.is_empty() {
            return report;
        }
        debug!(nodes = pending.len(), "starting pass");

        let permits = Arc::new(Semaphore::new(self.settings.max_concurrent_builds.max(1)));
        let mut jobs: JoinSet<(ResourceName, Outcome)> = JoinSet::new();
        let mut running: HashMap<ResourceName, Attempt> = HashMap::new();
        let mut done: HashSet<ResourceName> = HashSet::new();
        let mut closers: JoinSet<()> = JoinSet::new();

        loop {
            let eligible = self.eligible(&pending, &running);
            for name in eligible {
                pending.remove(&name);
                if cancel.is_cancelled() {
                    debug!(resource = %name, "pass cancelled before start");
                    report.skipped.push(name);
                    continue;
                }
                let prepared = {
                    let mut graph = self.graph.write();
                    self.prepare(&mut graph, &name, refresh.contains(&name), &index, &mut report)
                };
                match prepared {
                    Prepared::Job(job, attempt) => {
                        let span = debug_span!("resource", name = %name);
                        jobs.spawn(job.run(permits.clone(), cancel.clone()).instrument(span));
                        running.insert(name, attempt);
                    }
                    Prepared::Settled { cascade } => {
                        report.completed.push(name.clone());
                        done.insert(name.clone());
                        if cascade {
                            self.add_children(&name, &mut pending, &running, &done);
                        }
                    }
                    Prepared::Unchanged => {
                        done.insert(name);
                    }
                }
            }

            if jobs.is_empty() {
                if pending.is_empty() {
                    break;
                }
                if self.eligible(&pending, &running).is_empty() {
                    // Only reachable if the required edges stopped being acyclic.
                    error!(nodes = pending.len(), "pass stalled; skipping remaining nodes");
                    report.skipped.extend(pending.drain());
                    break;
                }
                continue;
            }

            let Some(joined) = jobs.join_next().await else {
                continue;
            };
            let (name, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    error!(error = %e, "resource task failed to complete");
                    continue;
                }
            };
            let Some(attempt) = running.remove(&name) else {
                continue;
            };
            let skipped = matches!(outcome, Outcome::Skipped);
            let cascade = {
                let mut graph = self.graph.write();
                self.apply(&mut graph, &name, attempt, outcome, &mut closers, &mut report)
            };
            if !skipped {
                report.completed.push(name.clone());
                done.insert(name.clone());
            }
            if cascade {
                self.add_children(&name, &mut pending, &running, &done);
            }
        }

        // Tasks that never reported back leave their nodes mid-flight.
        if !running.is_empty() {
            let mut graph = self.graph.write();
            for (name, attempt) in running.drain() {
                if let Some(node) = graph.node_mut(&name) {
                    node.restore_state(attempt.previous);
                }
                report.skipped.push(name);
            }
        }

        while closers.join_next().await.is_some() {}

        info!(
            built = report.built.len(),
            reconfigured = report.reconfigured.len(),
            failed = report.failed.len(),
            unresolved = report.unresolved.len(),
            skipped = report.skipped.len(),
            "pass finished"
        );
        report
    }

    // ── Resolution ───────────────────────────────────────────────────────────

    /// Validate dirty nodes and turn their required references into edges.
    fn resolve(&self, graph: &mut ResourceGraph, pending: &HashSet<ResourceName>) {
        let index = graph.name_index();
        let mut names: Vec<&ResourceName> = pending.iter().collect();
        names.sort();

        for name in names {
            let Some(node) = graph.node(name) else {
                continue;
            };
            if !node.dirty {
                continue;
            }
            let Some(config) = node.config.clone() else {
                continue;
            };
            let declared = match node.declared.clone() {
                Some(declared) => Ok(declared),
                None => match self.registry.lookup(&config.api, &config.model) {
                    Some(registration) => validate(&registration, &config),
                    None => Err(not_registered(&config)),
                },
            };

            graph.clear_parents(name);
            let declared = match declared {
                Ok(declared) => declared,
                Err(e) => {
                    warn!(resource = %name, error = %e, "config rejected");
                    if let Some(node) = graph.node_mut(name) {
                        node.declared = None;
                        node.resolution_error = None;
                        node.config_error = Some(e);
                    }
                    continue;
                }
            };

            let mut references = declared.required.clone();
            for reference in &config.depends_on {
                if !references.contains(reference) {
                    references.push(reference.clone());
                }
            }

            let mut missing = Vec::new();
            let mut failure = None;
            for reference in &references {
                match resolve_reference(reference, &index) {
                    Resolution::Resolved(target) if target == *name => {
                        failure.get_or_insert(MechError::CircularDependency {
                            from: name.to_string(),
                            to: target.to_string(),
                        });
                    }
                    Resolution::Resolved(target) => {
                        if let Err(e) = graph.add_edge(&target, name) {
                            failure.get_or_insert(e);
                        }
                    }
                    Resolution::Ambiguous(candidates) => {
                        failure.get_or_insert(MechError::AmbiguousDependency {
                            reference: reference.clone(),
                            candidates: candidates.iter().map(ResourceName::short_name).collect(),
                        });
                    }
                    Resolution::Unresolved => missing.push(reference.clone()),
                }
            }
            let resolution_error = failure.or_else(|| {
                (!missing.is_empty()).then(|| MechError::UnresolvedDependencies {
                    name: name.to_string(),
                    dependencies: missing,
                })
            });
            if let Some(e) = &resolution_error {
                debug!(resource = %name, error = %e, "required dependencies not resolved");
            }

            if let Some(node) = graph.node_mut(name) {
                node.declared = Some(declared);
                node.config_error = None;
                node.resolution_error = resolution_error;
            }
        }
    }

    // ── Dispatch ─────────────────────────────────────────────────────────────

    /// Pending nodes none of whose ancestors is pending or running.
    fn eligible(
        &self,
        pending: &HashSet<ResourceName>,
        running: &HashMap<ResourceName, Attempt>,
    ) -> Vec<ResourceName> {
        let graph = self.graph.read();
        let mut eligible: Vec<ResourceName> = pending
            .iter()
            .filter(|name| {
                graph
                    .ancestors(name)
                    .iter()
                    .all(|a| !pending.contains(a) && !running.contains_key(a))
            })
            .cloned()
            .collect();
        eligible.sort();
        eligible
    }

    fn add_children(
        &self,
        name: &ResourceName,
        pending: &mut HashSet<ResourceName>,
        running: &HashMap<ResourceName, Attempt>,
        done: &HashSet<ResourceName>,
    ) {
        let graph = self.graph.read();
        for child in graph.children(name) {
            if !running.contains_key(&child) && !done.contains(&child) {
                debug!(resource = %child, dependency = %name, "dependency changed");
                pending.insert(child);
            }
        }
    }

    /// Decide what to do with one eligible node.  Runs under the write lock.
    fn prepare(
        &self,
        graph: &mut ResourceGraph,
        name: &ResourceName,
        refresh: bool,
        index: &NameIndex,
        report: &mut PassReport,
    ) -> Prepared {
        let Some(node) = graph.node(name) else {
            return Prepared::Unchanged;
        };
        let Some(config) = node.config.clone() else {
            return Prepared::Unchanged;
        };
        let was_available = node.is_available();

        if let Some(e) = node.config_error.clone() {
            return settle(graph, name, ErrorCause::BuildFailure, e, was_available, report);
        }
        if let Some(e) = node.resolution_error.clone() {
            return settle(graph, name, ErrorCause::UnresolvedDependencies, e, was_available, report);
        }
        let Some(registration) = self.registry.lookup(&config.api, &config.model) else {
            let e = not_registered(&config);
            return settle(graph, name, ErrorCause::BuildFailure, e, was_available, report);
        };

        let parents = graph.parents(name);
        let blocked: Vec<String> = parents
            .iter()
            .filter(|p| {
                !graph
                    .node(p)
                    .is_some_and(|n| n.state == NodeState::Ready && n.instance.is_some())
            })
            .map(ResourceName::short_name)
            .collect();
        if !blocked.is_empty() {
            let e = MechError::UnresolvedDependencies {
                name: name.to_string(),
                dependencies: blocked,
            };
            return settle(graph, name, ErrorCause::UnresolvedDependencies, e, was_available, report);
        }

        let deps = self.live_dependencies(graph, node, &parents, &registration, index);
        let live: BTreeSet<ResourceName> = deps.names().into_iter().collect();

        let Some(node) = graph.node_mut(name) else {
            return Prepared::Unchanged;
        };
        let rebuild = node.instance.is_none()
            || node.instance_model.as_ref() != Some(&config.model)
            || !registration.supports_reconfigure();
        if refresh && !node.dirty && rebuild && live == node.live_dependencies {
            return Prepared::Unchanged;
        }

        let mode = match (&node.instance, rebuild) {
            (Some(instance), false) => JobMode::Reconfigure(instance.clone()),
            _ => JobMode::Build,
        };
        let previous = node.state;
        node.transition_to(NodeState::Configuring);

        Prepared::Job(
            Job {
                name: name.clone(),
                config,
                deps,
                registration,
                mode,
                deadline: self.settings.resource_configuration_timeout,
            },
            Attempt { previous, live },
        )
    }

    /// Required parents plus whatever optional and weak dependencies are
    /// available right now.
    fn live_dependencies(
        &self,
        graph: &ResourceGraph,
        node: &GraphNode,
        parents: &[ResourceName],
        registration: &Registration,
        index: &NameIndex,
    ) -> Dependencies {
        let mut deps = Dependencies::new();
        for parent in parents {
            if let Some(instance) = graph.node(parent).and_then(|p| p.instance.clone()) {
                deps.insert(parent.clone(), instance);
            }
        }

        if let Some(declared) = &node.declared {
            for reference in &declared.optional {
                let target = match resolve_reference(reference, index) {
                    Resolution::Resolved(target) if target != node.name => target,
                    _ => {
                        debug!(resource = %node.name, reference = %reference, "optional dependency not available");
                        continue;
                    }
                };
                match graph.node(&target).and_then(GraphNode::available_instance) {
                    Some(instance) => deps.insert(target, instance),
                    None => {
                        debug!(resource = %node.name, reference = %reference, "optional dependency not ready")
                    }
                }
            }
        }

        for matcher in registration.weak_dependencies() {
            for other in graph.nodes() {
                if other.name == node.name || !matcher.matches(&other.name) {
                    continue;
                }
                if let Some(instance) = other.available_instance() {
                    deps.insert(other.name.clone(), instance);
                }
            }
        }
        deps
    }

    // ── Apply ────────────────────────────────────────────────────────────────

    /// Record a finished job.  Returns whether dependents must join the pass.
    fn apply(
        &self,
        graph: &mut ResourceGraph,
        name: &ResourceName,
        attempt: Attempt,
        outcome: Outcome,
        closers: &mut JoinSet<()>,
        report: &mut PassReport,
    ) -> bool {
        let clock = match outcome {
            Outcome::Built(_) => graph.tick(),
            _ => 0,
        };
        let close_deadline = self.settings.close_timeout;
        let Some(node) = graph.node_mut(name) else {
            if let Outcome::Built(orphan) = outcome {
                closers.spawn(close_with_deadline(name.clone(), orphan, close_deadline));
            }
            return false;
        };
        let was_ready = attempt.previous == NodeState::Ready;

        match outcome {
            Outcome::Built(instance) => {
                let old = node.instance.replace(instance);
                node.instance_model = node.config.as_ref().map(|c| c.model.clone());
                node.updated_at = clock;
                node.live_dependencies = attempt.live;
                node.config_error = None;
                node.mark_ready();
                info!(resource = %name, "built resource");
                report.built.push(name.clone());
                if let Some(old) = old {
                    closers.spawn(close_with_deadline(name.clone(), old, close_deadline));
                }
                true
            }
            Outcome::Reconfigured => {
                node.live_dependencies = attempt.live;
                node.mark_ready();
                debug!(resource = %name, "reconfigured resource");
                report.reconfigured.push(name.clone());
                false
            }
            Outcome::ReconfigureFailed(e) => {
                warn!(resource = %name, error = %e, "reconfigure failed; keeping previous instance");
                node.mark_errored(ErrorCause::BuildFailure, e.clone());
                report.failed.push((name.clone(), e));
                was_ready
            }
            Outcome::BuildFailed(e) => {
                error!(resource = %name, error = %e, "failed to build resource");
                let old = node.instance.take();
                node.instance_model = None;
                node.mark_errored(ErrorCause::BuildFailure, e.clone());
                report.failed.push((name.clone(), e));
                let replaced = old.is_some();
                if let Some(old) = old {
                    closers.spawn(close_with_deadline(name.clone(), old, close_deadline));
                }
                replaced || was_ready
            }
            Outcome::Skipped => {
                node.restore_state(attempt.previous);
                report.skipped.push(name.clone());
                false
            }
        }
    }
}

/// Mark a node errored without calling into it.
fn settle(
    graph: &mut ResourceGraph,
    name: &ResourceName,
    cause: ErrorCause,
    error: MechError,
    was_available: bool,
    report: &mut PassReport,
) -> Prepared {
    if let Some(node) = graph.node_mut(name) {
        debug!(resource = %name, error = %error, ?cause, "resource not built");
        node.mark_errored(cause, error.clone());
    }
    match cause {
        ErrorCause::UnresolvedDependencies => report.unresolved.push(name.clone()),
        ErrorCause::BuildFailure => report.failed.push((name.clone(), error)),
    }
    Prepared::Settled {
        cascade: was_available,
    }
}

/// Run a model's validator; a panic rejects the config like an error would.
fn validate(
    registration: &Registration,
    config: &ResourceConfig,
) -> Result<DeclaredDependencies, MechError> {
    std::panic::catch_unwind(AssertUnwindSafe(|| registration.validate(config))).unwrap_or_else(
        |_| {
            Err(MechError::Validation {
                name: config.name.clone(),
                details: "validator panicked".to_string(),
            })
        },
    )
}

fn not_registered(config: &ResourceConfig) -> MechError {
    MechError::NotRegistered {
        api: config.api.to_string(),
        model: config.model.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
