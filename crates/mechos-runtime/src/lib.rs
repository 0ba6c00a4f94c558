//! `mechos-runtime` – Process-level wiring around the resource manager.
//!
//! # Modules
//!
//! - [`config`] – [`RuntimeConfig`]: `~/.mechos/robot.toml` with the
//!   desired robot snapshot, kernel tunables, and logging options, plus
//!   `MECHOS_*` environment overrides.
//! - [`robot`] – [`RobotRuntime`]: the background task that turns snapshot
//!   updates, nudges, retry ticks, and remote probes into passes of the
//!   [`ResourceManager`].
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to export every
//!   reconfiguration pass as a trace.
//!
//! [`ResourceManager`] and [`KernelSettings`] are re-exported so a binary
//! needs no direct dependency on `mechos-kernel`.

pub mod config;
pub mod robot;
pub mod telemetry;

pub use config::{ConfigError, KernelSection, RuntimeConfig};
pub use robot::RobotRuntime;
pub use telemetry::{LogFormat, TelemetryConfig, TracerProviderGuard, init_tracing};

pub use mechos_kernel::{KernelSettings, ResourceManager};
