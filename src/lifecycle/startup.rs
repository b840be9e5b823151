//! Startup orchestration.
//!
//! # Responsibilities
//! - Resolve configuration (file or defaults)
//! - Emit the boot telemetry: a `startup-span`, an `error-test-span` and the
//!   startup log records
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Startup records go through the same logger and tracer as requests

use std::path::Path;

use serde_json::json;

use crate::config::{load_config, ConfigError, ServiceConfig};
use crate::observability::trace::{self, KeyValue};
use crate::observability::Telemetry;

/// Load configuration from `path`, or fall back to defaults.
pub fn resolve_config(path: Option<&Path>) -> Result<ServiceConfig, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => Ok(ServiceConfig::default()),
    }
}

/// Emit the boot spans and log records.
///
/// The `error-test-span` and its `Test error log` record let operators check
/// that error records reach the log pipeline with trace IDs attached.
pub fn announce_startup(telemetry: &Telemetry) {
    let span = telemetry.tracer.open_root(
        "startup-span",
        [
            KeyValue::new("custom.operation", "startup"),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ],
    );
    trace::sync_scope(span.clone(), || {
        telemetry
            .logger
            .info("Application started", [("operation", json!("app_startup"))]);
    });
    span.close();

    let span = telemetry.tracer.open_root(
        "error-test-span",
        [
            KeyValue::new("error", true),
            KeyValue::new("custom.operation", "error-simulation"),
        ],
    );
    trace::sync_scope(span.clone(), || {
        telemetry.logger.error(
            "Test error log",
            [
                ("error_type", json!("SimulatedError")),
                ("operation", json!("error_test")),
            ],
        );
    });
    span.close();

    telemetry.logger.info(
        "api_startup",
        [
            ("status", json!("complete")),
            ("version", json!(env!("CARGO_PKG_VERSION"))),
        ],
    );
}
