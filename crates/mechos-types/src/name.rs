//! Resource identity: [`Api`], [`Model`], and [`ResourceName`].
//!
//! A [`ResourceName`] is the key of every node in the resource graph.  It is
//! made of the resource's [`Api`] (namespace, kind and subtype), a simple
//! name, and an ordered chain of remotes the resource is reached through.
//!
//! # Text form
//!
//! | Value | Text |
//! |---|---|
//! | [`Api`] | `rdk:component:motor` |
//! | local [`ResourceName`] | `rdk:component:motor/left` |
//! | remote [`ResourceName`] | `rdk:component:motor/arm1:left` |
//!
//! The part after `/` is the *short name*: the remote chain and the simple
//! name joined with `:`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::MechError;

/// Namespace used by every built-in API.
pub const DEFAULT_NAMESPACE: &str = "rdk";
/// Kind of a physical device API.
pub const COMPONENT_KIND: &str = "component";
/// Kind of a software service API.
pub const SERVICE_KIND: &str = "service";

// ─────────────────────────────────────────────────────────────────────────────
// Api
// ─────────────────────────────────────────────────────────────────────────────

/// The API a resource implements, e.g. `rdk:component:motor`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Api {
    pub namespace: String,
    /// `"component"` or `"service"`.
    pub kind: String,
    pub subtype: String,
}

impl Api {
    pub fn new(namespace: &str, kind: &str, subtype: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            kind: kind.to_string(),
            subtype: subtype.to_string(),
        }
    }

    /// A component API in the default namespace.
    pub fn component(subtype: &str) -> Self {
        Self::new(DEFAULT_NAMESPACE, COMPONENT_KIND, subtype)
    }

    /// A service API in the default namespace.
    pub fn service(subtype: &str) -> Self {
        Self::new(DEFAULT_NAMESPACE, SERVICE_KIND, subtype)
    }

    pub fn is_component(&self) -> bool {
        self.kind == COMPONENT_KIND
    }

    pub fn is_service(&self) -> bool {
        self.kind == SERVICE_KIND
    }
}

impl fmt::Display for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.namespace, self.kind, self.subtype)
    }
}

impl FromStr for Api {
    type Err = MechError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [namespace, kind, subtype]
                if !namespace.is_empty() && !kind.is_empty() && !subtype.is_empty() =>
            {
                Ok(Self::new(namespace, kind, subtype))
            }
            _ => Err(MechError::InvalidName(format!(
                "API {s:?} must have the form namespace:kind:subtype"
            ))),
        }
    }
}

impl TryFrom<String> for Api {
    type Error = MechError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Api> for String {
    fn from(api: Api) -> Self {
        api.to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Model
// ─────────────────────────────────────────────────────────────────────────────

/// The implementation family of a resource, e.g. `rdk:builtin:fake`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Model(String);

impl Model {
    pub fn new(model: impl Into<String>) -> Self {
        Self(model.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Model {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ResourceName
// ─────────────────────────────────────────────────────────────────────────────

/// Graph key of a resource.  Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceName {
    pub api: Api,
    /// Outermost remote first.  Empty for local resources.
    pub remote: Vec<String>,
    pub name: String,
}

impl ResourceName {
    /// A local resource name.
    pub fn new(api: Api, name: &str) -> Self {
        Self {
            api,
            remote: Vec::new(),
            name: name.to_string(),
        }
    }

    /// The same resource as seen through `remote`.
    pub fn prepend_remote(&self, remote: &str) -> Self {
        let mut chain = Vec::with_capacity(self.remote.len() + 1);
        chain.push(remote.to_string());
        chain.extend(self.remote.iter().cloned());
        Self {
            api: self.api.clone(),
            remote: chain,
            name: self.name.clone(),
        }
    }

    /// The same resource as seen by the outermost remote in the chain.
    pub fn pop_remote(&self) -> Self {
        Self {
            api: self.api.clone(),
            remote: self.remote.iter().skip(1).cloned().collect(),
            name: self.name.clone(),
        }
    }

    pub fn is_remote(&self) -> bool {
        !self.remote.is_empty()
    }

    /// The remote this resource is reached through, if any.
    pub fn remote_root(&self) -> Option<&str> {
        self.remote.first().map(String::as_str)
    }

    /// Remote chain and simple name joined with `:`, e.g. `arm1:left`.
    pub fn short_name(&self) -> String {
        if self.remote.is_empty() {
            return self.name.clone();
        }
        format!("{}:{}", self.remote.join(":"), self.name)
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api, self.short_name())
    }
}

impl FromStr for ResourceName {
    type Err = MechError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (api, short) = s
            .split_once('/')
            .ok_or_else(|| MechError::InvalidName(format!("{s:?} is missing the API prefix")))?;
        let api: Api = api.parse()?;
        let mut parts: Vec<&str> = short.split(':').collect();
        let name = parts.pop().unwrap_or_default();
        if name.is_empty() || parts.iter().any(|p| p.is_empty()) {
            return Err(MechError::InvalidName(format!(
                "{s:?} has an empty name or remote segment"
            )));
        }
        Ok(Self {
            api,
            remote: parts.into_iter().map(str::to_string).collect(),
            name: name.to_string(),
        })
    }
}

impl TryFrom<String> for ResourceName {
    type Error = MechError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceName> for String {
    fn from(name: ResourceName) -> Self {
        name.to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
