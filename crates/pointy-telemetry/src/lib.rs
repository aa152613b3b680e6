mod metrics;

pub use crate::metrics::*;

use std::str::FromStr;

use metrics_exporter_prometheus::PrometheusHandle;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(String),

    #[error("failed to install metrics recorder: {0}")]
    Recorder(String),

    #[error("unknown log level: {0}")]
    Level(String),
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "pointy_store" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines on stdout; otherwise the compact human format.
    pub json: bool,
    /// Install the global Prometheus recorder.
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: true,
            metrics_enabled: true,
        }
    }
}

impl TelemetryConfig {
    /// Parse a level name such as `"debug"` or `"WARN"`.
    pub fn with_level_str(mut self, level: &str) -> Result<Self, TelemetryError> {
        self.log_level =
            Level::from_str(level).map_err(|_| TelemetryError::Level(level.to_string()))?;
        Ok(self)
    }

    fn filter_directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }
}

/// Keeps handles to the installed telemetry backends.
pub struct TelemetryGuard {
    prometheus: Option<PrometheusHandle>,
}

impl TelemetryGuard {
    /// Handle for rendering `/metrics`, if the recorder was installed.
    pub fn prometheus(&self) -> Option<&PrometheusHandle> {
        self.prometheus.as_ref()
    }
}

/// Initialize logging and metrics. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    let prometheus = if config.metrics_enabled {
        Some(install_recorder()?)
    } else {
        None
    };

    Ok(TelemetryGuard { prometheus })
}
