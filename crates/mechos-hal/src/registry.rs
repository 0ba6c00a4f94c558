//! [`Registry`] – per-(API, Model) capability table.
//!
//! Every resource model the robot can build is described by a
//! [`Registration`]: a constructor, an optional attribute validator that
//! reports the model's required and optional dependency references, a flag
//! saying whether instances can be reconfigured in place, and zero or more
//! weak-dependency [`Matcher`]s.
//!
//! The registry is an explicit value injected into the resource manager.
//! Registration and lookup take `&self` and are safe to call from any thread
//! while passes are running.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use mechos_hal::registry::{Registration, Registry};
//! use mechos_hal::sim_registry::FakeResource;
//! use mechos_hal::Resource;
//! use mechos_types::{Api, Model};
//!
//! let registry = Registry::new();
//! registry
//!     .register(
//!         Registration::new(Api::component("motor"), Model::new("acme:motors:dc"), |conf, deps| async move {
//!             Ok(Arc::new(FakeResource::new(&conf, &deps)) as Arc<dyn Resource>)
//!         })
//!         .reconfigurable(true),
//!     )
//!     .unwrap();
//! assert!(registry.lookup(&Api::component("motor"), &Model::new("acme:motors:dc")).is_some());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use mechos_types::{Api, MechError, Model, ResourceConfig, ResourceName};
use parking_lot::RwLock;
use tracing::debug;

use crate::resource::{Dependencies, Resource};

/// Boxed constructor stored in a [`Registration`].
pub type Constructor = Arc<
    dyn Fn(ResourceConfig, Dependencies) -> BoxFuture<'static, Result<Arc<dyn Resource>, MechError>>
        + Send
        + Sync,
>;

/// Boxed attribute validator stored in a [`Registration`].
pub type Validator =
    Arc<dyn Fn(&ResourceConfig) -> Result<DeclaredDependencies, MechError> + Send + Sync>;

/// Dependency references reported by a model's validator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclaredDependencies {
    /// Become graph edges; must resolve before the resource is built.
    pub required: Vec<String>,
    /// Resolved best-effort on every build or reconfigure.
    pub optional: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Weak-dependency matchers
// ─────────────────────────────────────────────────────────────────────────────

/// Selects resources a model depends on weakly, across the whole resource set.
#[derive(Clone)]
pub enum Matcher {
    /// Every resource of a kind (`"component"` or `"service"`).
    Kind(String),
    /// Every resource whose API subtype equals this value.
    Subtype(String),
    /// Every resource implementing exactly this API.
    Api(Api),
    /// Arbitrary predicate.
    Predicate(Arc<dyn Fn(&ResourceName) -> bool + Send + Sync>),
}

impl Matcher {
    /// Matches every component on the robot.
    pub fn all_components() -> Self {
        Self::Kind(mechos_types::name::COMPONENT_KIND.to_string())
    }

    pub fn matches(&self, name: &ResourceName) -> bool {
        match self {
            Self::Kind(kind) => name.api.kind == *kind,
            Self::Subtype(subtype) => name.api.subtype == *subtype,
            Self::Api(api) => name.api == *api,
            Self::Predicate(predicate) => predicate(name),
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kind(kind) => f.debug_tuple("Kind").field(kind).finish(),
            Self::Subtype(subtype) => f.debug_tuple("Subtype").field(subtype).finish(),
            Self::Api(api) => f.debug_tuple("Api").field(&api.to_string()).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registration
// ─────────────────────────────────────────────────────────────────────────────

/// Everything the engine needs to know about one (API, Model) pair.
#[derive(Clone)]
pub struct Registration {
    api: Api,
    model: Model,
    constructor: Constructor,
    validator: Option<Validator>,
    reconfigurable: bool,
    weak_dependencies: Vec<Matcher>,
}

impl Registration {
    /// A registration with no validator, no weak dependencies, and in-place
    /// reconfiguration disabled.
    pub fn new<F, Fut>(api: Api, model: Model, constructor: F) -> Self
    where
        F: Fn(ResourceConfig, Dependencies) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn Resource>, MechError>> + Send + 'static,
    {
        Self {
            api,
            model,
            constructor: Arc::new(
                move |conf: ResourceConfig,
                      deps: Dependencies|
                      -> BoxFuture<'static, Result<Arc<dyn Resource>, MechError>> {
                    Box::pin(constructor(conf, deps))
                },
            ),
            validator: None,
            reconfigurable: false,
            weak_dependencies: Vec::new(),
        }
    }

    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&ResourceConfig) -> Result<DeclaredDependencies, MechError> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Whether instances accept [`Resource::reconfigure`] calls.  When
    /// `false` every config change rebuilds the instance.
    pub fn reconfigurable(mut self, reconfigurable: bool) -> Self {
        self.reconfigurable = reconfigurable;
        self
    }

    pub fn with_weak_dependency(mut self, matcher: Matcher) -> Self {
        self.weak_dependencies.push(matcher);
        self
    }

    pub fn api(&self) -> &Api {
        &self.api
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn supports_reconfigure(&self) -> bool {
        self.reconfigurable
    }

    pub fn weak_dependencies(&self) -> &[Matcher] {
        &self.weak_dependencies
    }

    /// Run the attribute validator.  Models without one declare nothing.
    ///
    /// # Errors
    ///
    /// Propagates the validator's error.
    pub fn validate(&self, conf: &ResourceConfig) -> Result<DeclaredDependencies, MechError> {
        match &self.validator {
            Some(validator) => validator(conf),
            None => Ok(DeclaredDependencies::default()),
        }
    }

    /// Start constructing a new instance.  The returned future is `'static`
    /// and can be spawned.
    pub fn construct(
        &self,
        conf: ResourceConfig,
        deps: Dependencies,
    ) -> BoxFuture<'static, Result<Arc<dyn Resource>, MechError>> {
        (self.constructor)(conf, deps)
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("api", &self.api.to_string())
            .field("model", &self.model.to_string())
            .field("reconfigurable", &self.reconfigurable)
            .field("weak_dependencies", &self.weak_dependencies)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Read-mostly table of [`Registration`]s keyed by (API, Model).
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<(Api, Model), Registration>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a registration.
    ///
    /// # Errors
    ///
    /// Returns [`MechError::DuplicateName`] when the (API, Model) pair is
    /// already registered.  Call [`Registry::deregister`] first to replace it.
    pub fn register(&self, registration: Registration) -> Result<(), MechError> {
        let key = (registration.api.clone(), registration.model.clone());
        let mut entries = self.entries.write();
        if entries.contains_key(&key) {
            return Err(MechError::DuplicateName {
                kind: "registration".to_string(),
                name: format!("{} {}", key.0, key.1),
            });
        }
        debug!(api = %key.0, model = %key.1, "registered resource model");
        entries.insert(key, registration);
        Ok(())
    }

    /// Remove a registration, returning it if present.
    pub fn deregister(&self, api: &Api, model: &Model) -> Option<Registration> {
        let removed = self.entries.write().remove(&(api.clone(), model.clone()));
        if removed.is_some() {
            debug!(api = %api, model = %model, "deregistered resource model");
        }
        removed
    }

    /// Clone out the registration for (API, Model).
    pub fn lookup(&self, api: &Api, model: &Model) -> Option<Registration> {
        self.entries.read().get(&(api.clone(), model.clone())).cloned()
    }

    /// All registered (API, Model) pairs, sorted.
    pub fn registered(&self) -> Vec<(Api, Model)> {
        let mut keys: Vec<(Api, Model)> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
