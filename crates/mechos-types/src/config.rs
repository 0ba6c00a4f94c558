//! Desired-state configuration: [`ResourceConfig`] and the whole-robot
//! [`Snapshot`].
//!
//! Snapshots are produced by a config loader and handed to the resource
//! manager as plain values; nothing in the orchestration core mutates them.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::MechError;
use crate::name::{Api, Model, ResourceName};

/// Raw, untyped resource attributes.
pub type Attributes = Map<String, Value>;

/// Desired state of one component or service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub name: String,
    pub api: Api,
    pub model: Model,
    #[serde(default)]
    pub attributes: Attributes,
    /// Attributes after validation/conversion by the loader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converted_attributes: Option<Value>,
    /// Explicit required dependencies, as name references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Opaque placement metadata (frame, parent, pose).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<Value>,
}

impl ResourceConfig {
    pub fn new(api: Api, name: &str, model: impl Into<Model>) -> Self {
        Self {
            name: name.to_string(),
            api,
            model: model.into(),
            attributes: Attributes::new(),
            converted_attributes: None,
            depends_on: Vec::new(),
            placement: None,
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// Builder-style `depends_on` entry.
    pub fn with_depends_on(mut self, reference: &str) -> Self {
        self.depends_on.push(reference.to_string());
        self
    }

    pub fn resource_name(&self) -> ResourceName {
        ResourceName::new(self.api.clone(), &self.name)
    }

    /// Deserialize the attributes into a typed config.
    ///
    /// Converted attributes take precedence over the raw attribute map.
    ///
    /// # Errors
    ///
    /// Returns [`MechError::Validation`] when the attributes do not match `T`.
    pub fn native_config<T: DeserializeOwned>(&self) -> Result<T, MechError> {
        let value = match &self.converted_attributes {
            Some(converted) => converted.clone(),
            None => Value::Object(self.attributes.clone()),
        };
        serde_json::from_value(value).map_err(|e| MechError::Validation {
            name: self.resource_name().to_string(),
            details: e.to_string(),
        })
    }
}

/// A remote robot whose resources are federated into the local graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub name: String,
    pub address: String,
    /// Prepended to the simple name of every resource of this remote.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

/// An OS process kept alongside the robot.  Supervision happens elsewhere;
/// the core only diffs these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default)]
    pub one_shot: bool,
}

/// An out-of-process module providing extra models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub name: String,
    pub exe_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

/// A whole-robot desired state, grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub components: Vec<ResourceConfig>,
    #[serde(default)]
    pub services: Vec<ResourceConfig>,
    #[serde(default)]
    pub remotes: Vec<RemoteConfig>,
    #[serde(default)]
    pub processes: Vec<ProcessConfig>,
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
}

impl Snapshot {
    /// Components followed by services.
    pub fn resources(&self) -> impl Iterator<Item = &ResourceConfig> {
        self.components.iter().chain(self.services.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct MotorAttrs {
        max_rpm: f64,
    }

    #[test]
    fn native_config_prefers_converted_attributes() {
        let mut conf = ResourceConfig::new(Api::component("motor"), "m", "rdk:builtin:fake")
            .with_attribute("max_rpm", 100.0);
        assert_eq!(
            conf.native_config::<MotorAttrs>().unwrap(),
            MotorAttrs { max_rpm: 100.0 }
        );

        conf.converted_attributes = Some(serde_json::json!({ "max_rpm": 250.0 }));
        assert_eq!(
            conf.native_config::<MotorAttrs>().unwrap(),
            MotorAttrs { max_rpm: 250.0 }
        );
    }

    #[test]
    fn native_config_reports_validation_error() {
        let conf = ResourceConfig::new(Api::component("motor"), "m", "rdk:builtin:fake")
            .with_attribute("max_rpm", "fast");
        let err = conf.native_config::<MotorAttrs>().unwrap_err();
        assert!(matches!(err, MechError::Validation { .. }));
        assert!(err.to_string().contains("rdk:component:motor/m"));
    }

    #[test]
    fn snapshot_deserializes_with_missing_kinds() {
        let snap: Snapshot = serde_json::from_value(serde_json::json!({
            "components": [{
                "name": "m",
                "api": "rdk:component:motor",
                "model": "rdk:builtin:fake",
                "depends_on": ["base"]
            }]
        }))
        .unwrap();
        assert_eq!(snap.components.len(), 1);
        assert_eq!(snap.components[0].depends_on, vec!["base".to_string()]);
        assert!(snap.services.is_empty());
        assert_eq!(snap.resources().count(), 1);
    }
}
