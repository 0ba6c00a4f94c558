//! [`SimRegistry`] – In-process simulation registry for CI/CD.
//!
//! Builds a [`Registry`] whose every model is backed by a [`FakeResource`]
//! that records lifecycle calls without touching real hardware.  This allows
//! the full reconfiguration engine to run in a unit-test or CI environment
//! without a physical robot.
//!
//! # Fake behaviour
//!
//! A fake's behaviour is driven entirely by its config attributes:
//!
//! | Attribute | Effect |
//! |---|---|
//! | `required` | Names reported as required dependencies by the validator. |
//! | `optional` | Names reported as optional dependencies by the validator. |
//! | `fail_build` | Constructor returns [`MechError::Build`]. |
//! | `fail_reconfigure` | `reconfigure` returns [`MechError::Build`]. |
//! | `rebuild` | `reconfigure` returns [`Reconfigure::NeedsRebuild`]. |
//! | `build_delay_ms` | Constructor sleeps before returning. |
//! | `reconfigure_delay_ms` | `reconfigure` sleeps before returning. |
//! | `close_delay_ms` | `close` sleeps before returning. |
//! | `fail_close` | `close` returns an error after recording the call. |
//!
//! Every call is appended to the shared [`SimStats`] log.
//!
//! # Example
//!
//! ```rust
//! use mechos_hal::sim_registry::{SimRegistry, FAKE_MODEL};
//! use mechos_types::{Api, Model};
//!
//! let sim = SimRegistry::builder()
//!     .with_fake(Api::component("motor"))
//!     .with_fake(Api::component("arm"))
//!     .build();
//!
//! assert!(sim.registry.lookup(&Api::component("motor"), &Model::new(FAKE_MODEL)).is_some());
//! assert_eq!(sim.stats.total_calls(), 0);
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mechos_types::{Api, MechError, Model, RemoteConfig, ResourceConfig, ResourceName};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::registry::{DeclaredDependencies, Matcher, Registration, Registry};
use crate::remote::{RemoteConnection, RemoteConnector};
use crate::resource::{Dependencies, Reconfigure, Resource};

/// Model name of every fake registered by [`SimRegistry`] unless overridden.
pub const FAKE_MODEL: &str = "rdk:builtin:fake";

// ─────────────────────────────────────────────────────────────────────────────
// Call log
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of lifecycle call recorded in [`SimStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimCall {
    /// Constructor entered.
    ConstructStart,
    /// Constructor returned an instance.
    Construct,
    Reconfigure,
    Close,
}

/// Shared, append-only log of every fake lifecycle call.
#[derive(Debug, Default)]
pub struct SimStats {
    calls: Mutex<Vec<(SimCall, String)>>,
}

impl SimStats {
    fn record(&self, call: SimCall, name: &ResourceName) {
        self.calls.lock().push((call, name.short_name()));
    }

    /// Every call in order, keyed by short name.
    pub fn calls(&self) -> Vec<(SimCall, String)> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: SimCall, short_name: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(c, n)| *c == call && n == short_name)
            .count()
    }

    /// Successful constructions of `short_name`.
    pub fn constructs(&self, short_name: &str) -> usize {
        self.count(SimCall::Construct, short_name)
    }

    /// Times the constructor of `short_name` was entered.
    pub fn construct_attempts(&self, short_name: &str) -> usize {
        self.count(SimCall::ConstructStart, short_name)
    }

    /// Successful in-place reconfigurations of `short_name`.
    pub fn reconfigures(&self, short_name: &str) -> usize {
        self.count(SimCall::Reconfigure, short_name)
    }

    pub fn closes(&self, short_name: &str) -> usize {
        self.count(SimCall::Close, short_name)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    /// Position of the first `call` for `short_name` in the log.
    pub fn position(&self, call: SimCall, short_name: &str) -> Option<usize> {
        self.calls
            .lock()
            .iter()
            .position(|(c, n)| *c == call && n == short_name)
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fake resource
// ─────────────────────────────────────────────────────────────────────────────

/// Attribute-driven behaviour switches of a [`FakeResource`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FakeAttributes {
    pub required: Vec<String>,
    pub optional: Vec<String>,
    pub fail_build: bool,
    pub fail_reconfigure: bool,
    pub rebuild: bool,
    pub build_delay_ms: u64,
    pub reconfigure_delay_ms: u64,
    pub close_delay_ms: u64,
    pub fail_close: bool,
}

struct FakeState {
    config: ResourceConfig,
    dependencies: Vec<ResourceName>,
    reconfigure_count: usize,
}

/// A resource that remembers its config and the dependency set it was last
/// handed.
pub struct FakeResource {
    name: ResourceName,
    state: Mutex<FakeState>,
    stats: Option<Arc<SimStats>>,
}

impl FakeResource {
    /// A fake that records nothing.
    pub fn new(conf: &ResourceConfig, deps: &Dependencies) -> Self {
        Self {
            name: conf.resource_name(),
            state: Mutex::new(FakeState {
                config: conf.clone(),
                dependencies: deps.names(),
                reconfigure_count: 0,
            }),
            stats: None,
        }
    }

    fn with_stats(mut self, stats: Arc<SimStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Names of the dependency set last handed to this instance.
    pub fn dependency_names(&self) -> Vec<ResourceName> {
        self.state.lock().dependencies.clone()
    }

    /// Whether the last dependency set contains a resource with this short
    /// name.
    pub fn has_dependency(&self, short_name: &str) -> bool {
        self.state
            .lock()
            .dependencies
            .iter()
            .any(|n| n.short_name() == short_name)
    }

    pub fn reconfigure_count(&self) -> usize {
        self.state.lock().reconfigure_count
    }

    pub fn config(&self) -> ResourceConfig {
        self.state.lock().config.clone()
    }

    fn attributes(&self) -> FakeAttributes {
        self.state
            .lock()
            .config
            .native_config::<FakeAttributes>()
            .unwrap_or_default()
    }

    fn record(&self, call: SimCall) {
        if let Some(stats) = &self.stats {
            stats.record(call, &self.name);
        }
    }
}

#[async_trait]
impl Resource for FakeResource {
    fn name(&self) -> &ResourceName {
        &self.name
    }

    async fn reconfigure(
        &self,
        deps: &Dependencies,
        conf: &ResourceConfig,
    ) -> Result<Reconfigure, MechError> {
        let attrs = conf.native_config::<FakeAttributes>()?;
        if attrs.reconfigure_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(attrs.reconfigure_delay_ms)).await;
        }
        if attrs.rebuild {
            return Ok(Reconfigure::NeedsRebuild);
        }
        if attrs.fail_reconfigure {
            return Err(MechError::Build {
                name: self.name.to_string(),
                details: "injected reconfigure failure".to_string(),
            });
        }
        {
            let mut state = self.state.lock();
            state.config = conf.clone();
            state.dependencies = deps.names();
            state.reconfigure_count += 1;
        }
        self.record(SimCall::Reconfigure);
        Ok(Reconfigure::Applied)
    }

    async fn do_command(&self, cmd: Value) -> Result<Value, MechError> {
        Ok(json!({ "resource": self.name.to_string(), "echo": cmd }))
    }

    async fn status(&self) -> Result<Value, MechError> {
        let state = self.state.lock();
        Ok(json!({
            "name": self.name.to_string(),
            "reconfigure_count": state.reconfigure_count,
            "dependencies": state.dependencies.iter().map(ToString::to_string).collect::<Vec<_>>(),
        }))
    }

    async fn close(&self) -> Result<(), MechError> {
        let attrs = self.attributes();
        if attrs.close_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(attrs.close_delay_ms)).await;
        }
        self.record(SimCall::Close);
        if attrs.fail_close {
            return Err(MechError::Build {
                name: self.name.to_string(),
                details: "injected close failure".to_string(),
            });
        }
        Ok(())
    }
}

/// A [`Registration`] for a fake model that logs into `stats`.
pub fn fake_registration(api: Api, model: Model, stats: Arc<SimStats>) -> Registration {
    Registration::new(api, model, move |conf, deps| {
        let stats = stats.clone();
        async move {
            let name = conf.resource_name();
            stats.record(SimCall::ConstructStart, &name);
            let attrs = conf.native_config::<FakeAttributes>()?;
            if attrs.build_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(attrs.build_delay_ms)).await;
            }
            if attrs.fail_build {
                return Err(MechError::Build {
                    name: name.to_string(),
                    details: "injected build failure".to_string(),
                });
            }
            let resource = FakeResource::new(&conf, &deps).with_stats(stats.clone());
            stats.record(SimCall::Construct, &name);
            Ok(Arc::new(resource) as Arc<dyn Resource>)
        }
    })
    .with_validator(|conf| {
        let attrs = conf.native_config::<FakeAttributes>()?;
        Ok(DeclaredDependencies {
            required: attrs.required,
            optional: attrs.optional,
        })
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// SimRegistry builder
// ─────────────────────────────────────────────────────────────────────────────

struct FakeModel {
    api: Api,
    model: Model,
    reconfigurable: bool,
    weak: Vec<Matcher>,
}

/// Builder that constructs a [`Registry`] populated with fake models.
#[derive(Default)]
pub struct SimRegistryBuilder {
    models: Vec<FakeModel>,
}

/// A populated registry plus the call log shared by all of its fakes.
pub struct SimRegistry {
    pub registry: Arc<Registry>,
    pub stats: Arc<SimStats>,
}

impl SimRegistry {
    /// Create a new builder with no registered fakes.
    pub fn builder() -> SimRegistryBuilder {
        SimRegistryBuilder::default()
    }
}

impl SimRegistryBuilder {
    /// Register a reconfigurable fake under [`FAKE_MODEL`].
    pub fn with_fake(self, api: Api) -> Self {
        self.with_fake_model(api, Model::new(FAKE_MODEL), true)
    }

    pub fn with_fake_model(mut self, api: Api, model: Model, reconfigurable: bool) -> Self {
        self.models.push(FakeModel {
            api,
            model,
            reconfigurable,
            weak: Vec::new(),
        });
        self
    }

    /// Register a reconfigurable fake that weakly depends on everything
    /// `matchers` select.
    pub fn with_weak_fake(mut self, api: Api, model: Model, matchers: Vec<Matcher>) -> Self {
        self.models.push(FakeModel {
            api,
            model,
            reconfigurable: true,
            weak: matchers,
        });
        self
    }

    /// Consume the builder and return the populated registry.
    pub fn build(self) -> SimRegistry {
        let registry = Registry::new();
        let stats = Arc::new(SimStats::default());
        for fake in self.models {
            let mut registration = fake_registration(fake.api, fake.model, stats.clone())
                .reconfigurable(fake.reconfigurable);
            for matcher in fake.weak {
                registration = registration.with_weak_dependency(matcher);
            }
            // The builder never repeats a key unless the caller does.
            if let Err(e) = registry.register(registration) {
                tracing::warn!(error = %e, "skipping duplicate fake registration");
            }
        }
        SimRegistry {
            registry: Arc::new(registry),
            stats,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sim remotes
// ─────────────────────────────────────────────────────────────────────────────

/// An in-process remote robot whose resource set and liveness are set by
/// the test.
pub struct SimRemote {
    name: String,
    names: Mutex<Vec<ResourceName>>,
    connected: AtomicBool,
}

impl SimRemote {
    pub fn new(name: &str, names: Vec<ResourceName>) -> Self {
        Self {
            name: name.to_string(),
            names: Mutex::new(names),
            connected: AtomicBool::new(true),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_resource_names(&self, names: Vec<ResourceName>) {
        *self.names.lock() = names;
    }

    fn unavailable(&self) -> MechError {
        MechError::RemoteUnavailable {
            remote: self.name.clone(),
            details: "sim remote is offline".to_string(),
        }
    }
}

#[async_trait]
impl RemoteConnection for SimRemote {
    async fn resource_names(&self) -> Result<Vec<ResourceName>, MechError> {
        if !self.is_connected() {
            return Err(self.unavailable());
        }
        Ok(self.names.lock().clone())
    }

    async fn do_command(&self, name: &ResourceName, cmd: Value) -> Result<Value, MechError> {
        if !self.is_connected() {
            return Err(self.unavailable());
        }
        Ok(json!({ "resource": name.to_string(), "echo": cmd }))
    }

    async fn status(&self, name: &ResourceName) -> Result<Value, MechError> {
        if !self.is_connected() {
            return Err(self.unavailable());
        }
        Ok(json!({ "name": name.to_string(), "remote": self.name }))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Hands out [`SimRemote`]s by remote name.  Connecting to an offline or
/// unknown remote fails.
#[derive(Default)]
pub struct SimConnector {
    remotes: Mutex<HashMap<String, Arc<SimRemote>>>,
}

impl SimConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, remote: Arc<SimRemote>) {
        self.remotes.lock().insert(remote.name.clone(), remote);
    }

    pub fn get(&self, name: &str) -> Option<Arc<SimRemote>> {
        self.remotes.lock().get(name).cloned()
    }
}

#[async_trait]
impl RemoteConnector for SimConnector {
    async fn connect(&self, config: &RemoteConfig) -> Result<Arc<dyn RemoteConnection>, MechError> {
        match self.get(&config.name) {
            Some(remote) if remote.is_connected() => Ok(remote as Arc<dyn RemoteConnection>),
            Some(remote) => Err(remote.unavailable()),
            None => Err(MechError::RemoteUnavailable {
                remote: config.name.clone(),
                details: format!("no sim remote at {}", config.address),
            }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
