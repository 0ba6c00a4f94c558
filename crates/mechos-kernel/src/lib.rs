//! `mechos-kernel` – Resource Graph & Reconfiguration Engine
//!
//! The orchestration core of MechOS. It owns the live set of resources,
//! works out what a new configuration snapshot changes, and rebuilds or
//! reconfigures exactly the resources affected, in dependency order.
//!
//! # Modules
//!
//! - [`diff`] – [`diff_snapshots`][diff::diff_snapshots]: per-kind added,
//!   modified, and removed entries between two snapshots.
//! - [`graph`] – [`ResourceGraph`][graph::ResourceGraph]: arena of nodes
//!   keyed by resource name, with required dependencies as acyclic edges.
//! - [`node`] – [`GraphNode`][node::GraphNode] and its lifecycle state
//!   machine.
//! - [`resolve`] – [`resolve_reference`][resolve::resolve_reference]: pure
//!   short-name resolution against local and remote names.
//! - [`scheduler`] – [`Scheduler`][scheduler::Scheduler]: one bounded,
//!   cancellable pass of builds and reconfigures.
//! - [`updater`] – picks nodes with optional or weak dependencies for the
//!   refresh that follows every pass.
//! - [`federation`] – [`Federation`][federation::Federation]: remote robots
//!   merged into the graph as proxy nodes.
//! - [`manager`] – [`ResourceManager`]: the facade tying it all together.
//! - [`settings`] – [`KernelSettings`]: timeouts and concurrency limits.

pub mod diff;
pub mod federation;
pub mod graph;
pub mod manager;
pub mod node;
pub mod resolve;
pub mod scheduler;
pub mod settings;
pub mod updater;

#[cfg(test)]
mod scenarios;

pub use diff::{Diff, KindDiff, diff_snapshots};
pub use federation::{Federation, MergeReport, RemoteStatus, RemoteView};
pub use graph::ResourceGraph;
pub use manager::ResourceManager;
pub use node::{ErrorCause, GraphNode, NodeKind, NodeState, NodeStatus};
pub use resolve::{NameIndex, Resolution, resolve_reference};
pub use scheduler::{PassReport, Scheduler};
pub use settings::KernelSettings;
pub use updater::refresh_soft_dependents;
