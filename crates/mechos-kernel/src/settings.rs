//! [`KernelSettings`] – timeouts and limits of the reconfiguration engine.
//!
//! # Environment variables
//!
//! | Variable | Field |
//! |---|---|
//! | `MECHOS_RESOURCE_CONFIGURATION_TIMEOUT` | [`KernelSettings::resource_configuration_timeout`] |
//! | `MECHOS_CLOSE_TIMEOUT` | [`KernelSettings::close_timeout`] |
//! | `MECHOS_MAX_CONCURRENT_BUILDS` | [`KernelSettings::max_concurrent_builds`] |
//! | `MECHOS_REMOTE_PROBE_INTERVAL` | [`KernelSettings::remote_probe_interval`] |
//! | `MECHOS_RETRY_INTERVAL` | [`KernelSettings::retry_interval`] |
//! | `MECHOS_REMOTE_CONNECT_TIMEOUT` | [`KernelSettings::remote_connect_timeout`] |
//!
//! Durations accept `250ms`, `30s`, `2m`, or a bare number of seconds.
//! Unparseable values are ignored with a warning.

use std::time::Duration;

use tracing::warn;

/// Default bound on a single constructor or `reconfigure` call.
pub const DEFAULT_RESOURCE_CONFIGURATION_TIMEOUT: Duration = Duration::from_secs(120);
/// Default bound on a single `close` call.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default bound on dialing a remote or listing its resources.
pub const DEFAULT_REMOTE_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const ENV_RESOURCE_CONFIGURATION_TIMEOUT: &str = "MECHOS_RESOURCE_CONFIGURATION_TIMEOUT";
const ENV_CLOSE_TIMEOUT: &str = "MECHOS_CLOSE_TIMEOUT";
const ENV_MAX_CONCURRENT_BUILDS: &str = "MECHOS_MAX_CONCURRENT_BUILDS";
const ENV_REMOTE_PROBE_INTERVAL: &str = "MECHOS_REMOTE_PROBE_INTERVAL";
const ENV_RETRY_INTERVAL: &str = "MECHOS_RETRY_INTERVAL";
const ENV_REMOTE_CONNECT_TIMEOUT: &str = "MECHOS_REMOTE_CONNECT_TIMEOUT";

/// Tunables of the resource manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSettings {
    /// Deadline for one constructor or `reconfigure` call.
    pub resource_configuration_timeout: Duration,
    /// Deadline for one `close` call.
    pub close_timeout: Duration,
    /// Upper bound on constructor/reconfigure calls running at once.
    pub max_concurrent_builds: usize,
    /// How often remotes are probed for liveness and resource changes.
    pub remote_probe_interval: Duration,
    /// How often a pass is triggered while some resource still needs work.
    pub retry_interval: Duration,
    /// Deadline for connecting to a remote and for each resource listing.
    pub remote_connect_timeout: Duration,
}

impl Default for KernelSettings {
    fn default() -> Self {
        Self {
            resource_configuration_timeout: DEFAULT_RESOURCE_CONFIGURATION_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            max_concurrent_builds: 16,
            remote_probe_interval: Duration::from_secs(5),
            retry_interval: Duration::from_secs(5),
            remote_connect_timeout: DEFAULT_REMOTE_CONNECT_TIMEOUT,
        }
    }
}

impl KernelSettings {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.apply_env_overrides();
        settings
    }

    /// Override fields from `MECHOS_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        if let Some(d) = env_duration(ENV_RESOURCE_CONFIGURATION_TIMEOUT) {
            self.resource_configuration_timeout = d;
        }
        if let Some(d) = env_duration(ENV_CLOSE_TIMEOUT) {
            self.close_timeout = d;
        }
        if let Ok(val) = std::env::var(ENV_MAX_CONCURRENT_BUILDS) {
            match val.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.max_concurrent_builds = n,
                _ => warn!(var = ENV_MAX_CONCURRENT_BUILDS, value = %val, "ignoring invalid value"),
            }
        }
        if let Some(d) = env_duration(ENV_REMOTE_PROBE_INTERVAL) {
            self.remote_probe_interval = d;
        }
        if let Some(d) = env_duration(ENV_RETRY_INTERVAL) {
            self.retry_interval = d;
        }
        if let Some(d) = env_duration(ENV_REMOTE_CONNECT_TIMEOUT) {
            self.remote_connect_timeout = d;
        }
    }
}

fn env_duration(var: &str) -> Option<Duration> {
    let val = std::env::var(var).ok()?;
    let parsed = parse_duration(&val);
    if parsed.is_none() {
        warn!(var, value = %val, "ignoring invalid duration");
    }
    parsed
}

/// Parse `250ms`, `30s`, `2m`, or a bare number of seconds.  Zero is
/// rejected.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, "s"),
    };
    let n: u64 = digits.parse().ok()?;
    let d = match unit.trim() {
        "ms" => Duration::from_millis(n),
        "s" => Duration::from_secs(n),
        "m" => Duration::from_secs(n.checked_mul(60)?),
        _ => return None,
    };
    (!d.is_zero()).then_some(d)
}
