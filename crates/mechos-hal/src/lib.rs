//! `mechos-hal` – Resource abstraction layer.
//!
//! Defines what the reconfiguration engine manages and how it learns to
//! build it.
//!
//! # Modules
//!
//! - [`resource`] – the [`Resource`] trait implemented by every device
//!   driver and service, the tagged [`Reconfigure`] result, and the
//!   [`Dependencies`] set handed to constructors.
//! - [`registry`] – [`Registry`], the injected (API, Model) →
//!   [`Registration`] table with validators and weak-dependency
//!   [`Matcher`]s.
//! - [`remote`] – the [`RemoteConnection`] / [`RemoteConnector`] seam to
//!   remote robots and the forwarding [`RemoteProxy`].
//! - [`sim_registry`] – [`SimRegistry`][sim_registry::SimRegistry], fake
//!   models and sim remotes for tests and CI.

pub mod registry;
pub mod remote;
pub mod resource;
pub mod sim_registry;

pub use registry::{DeclaredDependencies, Matcher, Registration, Registry};
pub use remote::{ConnectionSlot, RemoteConnection, RemoteConnector, RemoteProxy};
pub use resource::{Dependencies, Reconfigure, Resource};
