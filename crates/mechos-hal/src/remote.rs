//! Remote robot connections and the [`RemoteProxy`] forwarding resource.
//!
//! The wire protocol to remote robots lives outside this crate.  The engine
//! only sees a [`RemoteConnection`]: something that lists the remote's
//! resources, forwards calls to them, and reports liveness.  A
//! [`RemoteConnector`] opens connections from a [`RemoteConfig`].
//!
//! Each federated resource is represented locally by a [`RemoteProxy`] that
//! reads the current connection out of a shared [`ConnectionSlot`].  When
//! the connection drops and comes back (possibly as a brand new connection)
//! only the slot changes; proxies and the local resources holding them are
//! left untouched.

use std::sync::Arc;

use async_trait::async_trait;
use mechos_types::{MechError, RemoteConfig, ResourceConfig, ResourceName};
use parking_lot::RwLock;
use serde_json::Value;

use crate::resource::{Dependencies, Reconfigure, Resource};

/// A live link to one remote robot.
#[async_trait]
pub trait RemoteConnection: Send + Sync {
    /// Names of every resource the remote currently serves, as the remote
    /// itself names them.
    async fn resource_names(&self) -> Result<Vec<ResourceName>, MechError>;

    async fn do_command(&self, name: &ResourceName, cmd: Value) -> Result<Value, MechError>;

    async fn status(&self, name: &ResourceName) -> Result<Value, MechError>;

    /// Last known liveness of the link.
    fn is_connected(&self) -> bool;

    async fn close(&self) -> Result<(), MechError> {
        Ok(())
    }
}

/// Opens [`RemoteConnection`]s.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(&self, config: &RemoteConfig) -> Result<Arc<dyn RemoteConnection>, MechError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// ConnectionSlot
// ─────────────────────────────────────────────────────────────────────────────

/// The current connection of one remote, shared by all of its proxies.
#[derive(Default)]
pub struct ConnectionSlot {
    inner: RwLock<Option<Arc<dyn RemoteConnection>>>,
}

impl ConnectionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a connection, returning the one it replaces.
    pub fn set(&self, conn: Arc<dyn RemoteConnection>) -> Option<Arc<dyn RemoteConnection>> {
        self.inner.write().replace(conn)
    }

    pub fn clear(&self) -> Option<Arc<dyn RemoteConnection>> {
        self.inner.write().take()
    }

    pub fn get(&self) -> Option<Arc<dyn RemoteConnection>> {
        self.inner.read().clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RemoteProxy
// ─────────────────────────────────────────────────────────────────────────────

/// Local stand-in for a resource served by a remote robot.
///
/// Building a proxy never fails; calls fail with
/// [`MechError::RemoteUnavailable`] while the remote is disconnected.
pub struct RemoteProxy {
    name: ResourceName,
    upstream: ResourceName,
    remote: String,
    slot: Arc<ConnectionSlot>,
}

impl RemoteProxy {
    /// `name` is the local graph key; `upstream` is the name the remote uses.
    pub fn new(
        name: ResourceName,
        upstream: ResourceName,
        remote: &str,
        slot: Arc<ConnectionSlot>,
    ) -> Self {
        Self {
            name,
            upstream,
            remote: remote.to_string(),
            slot,
        }
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn upstream(&self) -> &ResourceName {
        &self.upstream
    }

    fn connection(&self) -> Result<Arc<dyn RemoteConnection>, MechError> {
        self.slot
            .get()
            .filter(|conn| conn.is_connected())
            .ok_or_else(|| MechError::RemoteUnavailable {
                remote: self.remote.clone(),
                details: format!("cannot reach {}", self.upstream),
            })
    }
}

#[async_trait]
impl Resource for RemoteProxy {
    fn name(&self) -> &ResourceName {
        &self.name
    }

    async fn reconfigure(
        &self,
        _deps: &Dependencies,
        _conf: &ResourceConfig,
    ) -> Result<Reconfigure, MechError> {
        Ok(Reconfigure::Applied)
    }

    async fn do_command(&self, cmd: Value) -> Result<Value, MechError> {
        self.connection()?.do_command(&self.upstream, cmd).await
    }

    async fn status(&self) -> Result<Value, MechError> {
        self.connection()?.status(&self.upstream).await
    }
}
