//! `mechos-types` – shared data model for the MechOS resource engine.
//!
//! # Modules
//!
//! - [`name`] – [`Api`], [`Model`] and [`ResourceName`], the identity scheme
//!   used as the resource graph's node key.
//! - [`config`] – [`ResourceConfig`] and the whole-robot [`Snapshot`] handed
//!   to the resource manager on every reconfiguration.
//!
//! The crate root also hosts [`MechError`], the error type shared by every
//! MechOS crate.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod config;
pub mod name;

pub use config::{Attributes, ModuleConfig, ProcessConfig, RemoteConfig, ResourceConfig, Snapshot};
pub use name::{Api, Model, ResourceName};

/// Global error type spanning resource lookup, dependency resolution,
/// construction, and remote federation failures.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MechError {
    #[error("resource {0} not found")]
    NotFound(String),

    #[error("resource {name} has unresolved dependencies: {}", .dependencies.join(", "))]
    UnresolvedDependencies {
        name: String,
        dependencies: Vec<String>,
    },

    #[error("dependency {reference:?} is ambiguous; qualify it with one of: {}", .candidates.join(", "))]
    AmbiguousDependency {
        reference: String,
        candidates: Vec<String>,
    },

    #[error("failed to build {name}: {details}")]
    Build { name: String, details: String },

    #[error("{operation} of {name} timed out after {after:?}")]
    Timeout {
        name: String,
        operation: String,
        after: Duration,
    },

    #[error("invalid config for {name}: {details}")]
    Validation { name: String, details: String },

    #[error("no registration for API {api} with model {model}")]
    NotRegistered { api: String, model: String },

    #[error("dependency {from} -> {to} would introduce a cycle")]
    CircularDependency { from: String, to: String },

    #[error("remote {remote} unavailable: {details}")]
    RemoteUnavailable { remote: String, details: String },

    #[error("not implemented: {0}")]
    Unimplemented(String),

    #[error("invalid resource name: {0}")]
    InvalidName(String),

    #[error("duplicate {kind} name {name}")]
    DuplicateName { kind: String, name: String },

    #[error("resource manager is shut down")]
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mech_error_display() {
        let err = MechError::UnresolvedDependencies {
            name: "rdk:component:arm/oc".to_string(),
            dependencies: vec!["m".to_string(), "m1".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "resource rdk:component:arm/oc has unresolved dependencies: m, m1"
        );

        let err = MechError::AmbiguousDependency {
            reference: "m".to_string(),
            candidates: vec!["r1:m".to_string(), "r2:m".to_string()],
        };
        assert!(err.to_string().contains("r1:m, r2:m"));
    }

    #[test]
    fn mech_error_serialization_roundtrip() {
        let err = MechError::Timeout {
            name: "rdk:component:motor/m".to_string(),
            operation: "construct".to_string(),
            after: Duration::from_millis(250),
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: MechError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
