//! Robot configuration file – reads/writes `~/.mechos/robot.toml`.
//!
//! The file carries the runtime's own settings, the kernel tunables, and the
//! desired robot [`Snapshot`]:
//!
//! ```toml
//! service_name = "mechos"
//! log_format = "compact"
//!
//! [kernel]
//! resource_configuration_timeout = "2m"
//! close_timeout = "10s"
//! max_concurrent_builds = 16
//! remote_connect_timeout = "10s"
//!
//! [[robot.components]]
//! name = "base"
//! api = "rdk:component:motor"
//! model = "rdk:builtin:fake"
//!
//! [[robot.components]]
//! name = "arm"
//! api = "rdk:component:arm"
//! model = "rdk:builtin:fake"
//! depends_on = ["base"]
//! ```
//!
//! `MECHOS_*` environment variables override file values on load.

use std::fs;
use std::path::{Path, PathBuf};

use mechos_kernel::KernelSettings;
use mechos_kernel::settings::parse_duration;
use mechos_types::Snapshot;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::telemetry::{LogFormat, TelemetryConfig};

const ENV_SERVICE_NAME: &str = "MECHOS_SERVICE_NAME";
const ENV_LOG_FORMAT: &str = "MECHOS_LOG_FORMAT";
const ENV_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Errors raised while reading or writing the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },
}

/// Kernel tunables as written in the file.  Durations are strings such as
/// `250ms`, `30s`, or `2m`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelSection {
    pub resource_configuration_timeout: String,
    pub close_timeout: String,
    pub max_concurrent_builds: usize,
    pub remote_probe_interval: String,
    pub retry_interval: String,
    pub remote_connect_timeout: String,
}

impl Default for KernelSection {
    fn default() -> Self {
        Self {
            resource_configuration_timeout: "2m".to_string(),
            close_timeout: "10s".to_string(),
            max_concurrent_builds: 16,
            remote_probe_interval: "5s".to_string(),
            retry_interval: "5s".to_string(),
            remote_connect_timeout: "10s".to_string(),
        }
    }
}

/// Persisted runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Name reported to the tracing backend.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[serde(default)]
    pub log_format: LogFormat,

    /// OTLP/HTTP collector base URL.  Span export is off when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp_endpoint: Option<String>,

    #[serde(default)]
    pub kernel: KernelSection,

    /// Desired resources, remotes, processes, and modules.
    #[serde(default)]
    pub robot: Snapshot,
}

fn default_service_name() -> String {
    "mechos".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_format: LogFormat::default(),
            otlp_endpoint: None,
            kernel: KernelSection::default(),
            robot: Snapshot::default(),
        }
    }
}

impl RuntimeConfig {
    /// The logging and span export part of the config.
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: self.service_name.clone(),
            log_format: self.log_format,
            otlp_endpoint: self.otlp_endpoint.clone(),
        }
    }

    /// Kernel settings from the `[kernel]` section, then `MECHOS_*`
    /// environment overrides on top.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for an unparseable duration or a
    /// zero build limit.
    pub fn kernel_settings(&self) -> Result<KernelSettings, ConfigError> {
        let k = &self.kernel;
        if k.max_concurrent_builds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "kernel.max_concurrent_builds",
                value: "0".to_string(),
            });
        }
        let mut settings = KernelSettings {
            resource_configuration_timeout: duration(
                "kernel.resource_configuration_timeout",
                &k.resource_configuration_timeout,
            )?,
            close_timeout: duration("kernel.close_timeout", &k.close_timeout)?,
            max_concurrent_builds: k.max_concurrent_builds,
            remote_probe_interval: duration("kernel.remote_probe_interval", &k.remote_probe_interval)?,
            retry_interval: duration("kernel.retry_interval", &k.retry_interval)?,
            remote_connect_timeout: duration(
                "kernel.remote_connect_timeout",
                &k.remote_connect_timeout,
            )?,
        };
        settings.apply_env_overrides();
        Ok(settings)
    }
}

fn duration(field: &'static str, value: &str) -> Result<std::time::Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidValue {
        field,
        value: value.to_string(),
    })
}

/// Return the path to `~/.mechos/robot.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".mechos").join("robot.toml")
}

/// Load the config from `~/.mechos/robot.toml`.  Returns `None` if the file
/// does not exist.
///
/// # Errors
///
/// See [`load_from`].
pub fn load() -> Result<Option<RuntimeConfig>, ConfigError> {
    load_from(&config_path())
}

/// Load the config from `path` and apply environment overrides.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file exists but cannot be read and
/// [`ConfigError::Parse`] if it is not valid.
pub fn load_from(path: &Path) -> Result<Option<RuntimeConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut cfg: RuntimeConfig = toml::from_str(&raw)?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply environment overrides to `cfg`.
///
/// | Variable | Field |
/// |---|---|
/// | `MECHOS_SERVICE_NAME` | `service_name` |
/// | `MECHOS_LOG_FORMAT` | `log_format` (`json` or `compact`) |
/// | `OTEL_EXPORTER_OTLP_ENDPOINT` | `otlp_endpoint` |
///
/// Kernel variables are applied by [`RuntimeConfig::kernel_settings`].
pub fn apply_env_overrides(cfg: &mut RuntimeConfig) {
    if let Ok(v) = std::env::var(ENV_SERVICE_NAME) {
        cfg.service_name = v;
    }
    if let Ok(v) = std::env::var(ENV_LOG_FORMAT) {
        match v.as_str() {
            "json" => cfg.log_format = LogFormat::Json,
            "compact" => cfg.log_format = LogFormat::Compact,
            other => tracing::warn!(value = other, "ignoring unknown {ENV_LOG_FORMAT}"),
        }
    }
    if let Some(v) = std::env::var(ENV_OTLP_ENDPOINT).ok().filter(|v| !v.is_empty()) {
        cfg.otlp_endpoint = Some(v);
    }
}

/// Save the config to `~/.mechos/robot.toml`.
///
/// # Errors
///
/// See [`save_to`].
pub fn save(cfg: &RuntimeConfig) -> Result<(), ConfigError> {
    save_to(cfg, &config_path())
}

/// Save the config to `path`, creating the parent directory if necessary.
///
/// # Errors
///
/// Returns [`ConfigError::Serialize`] if the snapshot cannot be expressed as
/// TOML and [`ConfigError::Io`] on filesystem errors.
pub fn save_to(cfg: &RuntimeConfig, path: &Path) -> Result<(), ConfigError> {
    let io = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io)?;
    }
    let raw = toml::to_string_pretty(cfg)?;
    fs::write(path, raw).map_err(io)
}
