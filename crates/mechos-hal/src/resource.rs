//! [`Resource`] – the trait every managed device driver and service implements.
//!
//! Instances are created by a registered constructor and then owned by a
//! node of the resource graph.  Dependents receive shared `Arc` handles
//! through [`Dependencies`].
//!
//! # Reconfiguration
//!
//! [`Resource::reconfigure`] returns a tagged [`Reconfigure`] value rather
//! than a special error:
//!
//! | Return | Meaning |
//! |---|---|
//! | `Ok(Reconfigure::Applied)` | New config applied in place; same instance keeps serving. |
//! | `Ok(Reconfigure::NeedsRebuild)` | Tear the instance down and call the constructor instead. |
//! | `Err(e)` | Reconfiguration failed; the previous configuration stays live. |

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use mechos_types::{MechError, ResourceConfig, ResourceName};
use serde_json::{Value, json};

/// Outcome of a successful [`Resource::reconfigure`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconfigure {
    Applied,
    NeedsRebuild,
}

/// A live resource instance.
#[async_trait]
pub trait Resource: Any + Send + Sync {
    /// Name this instance was built for.
    fn name(&self) -> &ResourceName;

    /// Apply a new config and dependency set in place.
    ///
    /// The default asks for a rebuild, which suits resources that cannot
    /// change configuration while running.
    async fn reconfigure(
        &self,
        _deps: &Dependencies,
        _conf: &ResourceConfig,
    ) -> Result<Reconfigure, MechError> {
        Ok(Reconfigure::NeedsRebuild)
    }

    /// Model-specific command pass-through.
    async fn do_command(&self, _cmd: Value) -> Result<Value, MechError> {
        Err(MechError::Unimplemented(format!(
            "do_command on {}",
            self.name()
        )))
    }

    /// Free-form status document.
    async fn status(&self) -> Result<Value, MechError> {
        Ok(json!({ "name": self.name().to_string() }))
    }

    /// Release the underlying device or service.  Called exactly once, when
    /// the instance is replaced or removed.
    async fn close(&self) -> Result<(), MechError> {
        Ok(())
    }
}

impl dyn Resource {
    /// Downcast a handle to its concrete type.
    pub fn downcast_ref<T: Resource>(&self) -> Option<&T> {
        (self as &dyn Any).downcast_ref::<T>()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dependencies
// ─────────────────────────────────────────────────────────────────────────────

/// The live dependency set handed to a constructor or `reconfigure`.
///
/// Contains every resolved required dependency plus whichever optional and
/// weak dependencies were available when the set was assembled.
#[derive(Clone, Default)]
pub struct Dependencies(HashMap<ResourceName, Arc<dyn Resource>>);

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: ResourceName, resource: Arc<dyn Resource>) {
        self.0.insert(name, resource);
    }

    pub fn get(&self, name: &ResourceName) -> Option<&Arc<dyn Resource>> {
        self.0.get(name)
    }

    /// Find a dependency by short name (`m` or `r1:m`).  Returns `None` when
    /// there is no match or more than one.
    pub fn lookup(&self, short_name: &str) -> Option<&Arc<dyn Resource>> {
        let mut matches = self
            .0
            .iter()
            .filter(|(name, _)| name.short_name() == short_name || name.name == short_name);
        match (matches.next(), matches.next()) {
            (Some((_, resource)), None) => Some(resource),
            _ => None,
        }
    }

    pub fn contains(&self, name: &ResourceName) -> bool {
        self.0.contains_key(name)
    }

    /// Dependency names in sorted order.
    pub fn names(&self) -> Vec<ResourceName> {
        let mut names: Vec<ResourceName> = self.0.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceName, &Arc<dyn Resource>)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names().iter().map(ToString::to_string)).finish()
    }
}
