//! Request observability pipeline.
//!
//! Wraps an HTTP service so that every request produces a trace span,
//! Prometheus metrics with bounded label cardinality, and trace-correlated
//! structured log records.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http::server ──▶ http::interceptor ──▶ handler
//!                                          │
//!                     ┌────────────────────┼─────────────────────┐
//!                     ▼                    ▼                     ▼
//!              routing::normalizer   observability::trace   observability::metrics
//!               (bounded `route`)    (span per request)     (counters, histogram,
//!                                          │                 in-flight gauge)
//!                                          ▼
//!                                 observability::logging
//!                                 (records carry trace/span IDs)
//! ```

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;

pub use config::schema::ServiceConfig;
pub use http::{HttpServer, ObservabilityLayer};
pub use lifecycle::Shutdown;
pub use observability::Telemetry;
