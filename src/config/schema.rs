//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the instrumented service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings (metrics, tracing, logs).
    pub observability: ObservabilityConfig,

    /// Route templates used to bound the `route` label.
    pub routes: RoutesConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Output format of the process diagnostics subscriber.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Destination of per-request structured log records.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogSinkKind {
    /// One JSON line per record on stdout.
    #[default]
    Stdout,
    /// Forward records to the `tracing` subscriber.
    Tracing,
}

/// Where closed spans are exported.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TraceExporterKind {
    /// Emit each closed span as a `tracing` event.
    #[default]
    Log,
    /// Drop closed spans.
    None,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Service name recorded on every span.
    pub service_name: String,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Diagnostics output format.
    pub log_format: LogFormat,

    /// Structured request log destination.
    pub log_sink: LogSinkKind,

    /// Span exporter.
    pub trace_exporter: TraceExporterKind,

    /// Expose `GET /metrics`.
    pub metrics_enabled: bool,

    /// Bucket boundaries (seconds) for the request duration histogram.
    pub duration_buckets: Vec<f64>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "api".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            log_sink: LogSinkKind::default(),
            trace_exporter: TraceExporterKind::default(),
            metrics_enabled: true,
            duration_buckets: default_duration_buckets(),
        }
    }
}

/// Buckets tuned for typical web latencies.
pub fn default_duration_buckets() -> Vec<f64> {
    vec![
        0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
    ]
}

/// Known route templates.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutesConfig {
    /// Templates such as `/albums/{id}`; first match wins.
    pub templates: Vec<String>,
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            templates: ["/", "/health", "/metrics", "/trace-test", "/error-test", "/fail-test"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}
