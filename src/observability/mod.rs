//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! The request interceptor produces:
//!     → metrics.rs (counters, histograms, in-flight gauge)
//!     → trace.rs (spans with trace/span IDs)
//!     → logging.rs (JSON records correlated with the active span)
//!
//! Consumers:
//!     → Metrics endpoint (Prometheus scrape)
//!     → OpenTelemetry span exporter (tracing events, in-memory, or none)
//!     → LogSink (stdout, tracing, memory)
//! ```
//!
//! # Design Decisions
//! - One `Telemetry` value is built at startup and cloned into every layer
//! - Structured logging (JSON) for machine parsing
//! - Metrics are cheap (atomic increments)
//! - Sink failures never reach the request path

use std::sync::Arc;

pub mod classify;
pub mod logging;
pub mod metrics;
pub mod trace;

pub use classify::{classify, ErrorClass};
pub use logging::{LogLevel, LogRecord, LogSink, MemorySink, StructuredLogger, TracingSink, WriterSink};
pub use self::metrics::{InFlightGauge, MetricsRegistry, MetricsSnapshot};
pub use trace::{LogSpanExporter, Span, Tracer};

use thiserror::Error;

use crate::config::{LogSinkKind, ServiceConfig, TraceExporterKind};
use crate::routing::{RouteNormalizer, TemplateError};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error(transparent)]
    Metrics(#[from] self::metrics::MetricsError),

    #[error("invalid route template: {0}")]
    Route(#[from] TemplateError),
}

/// Everything the interceptor needs, shared across requests.
#[derive(Clone, Debug)]
pub struct Telemetry {
    pub metrics: MetricsRegistry,
    pub tracer: Tracer,
    pub logger: StructuredLogger,
    pub routes: Arc<RouteNormalizer>,
}

impl Telemetry {
    /// Bundle already built components.
    pub fn new(
        metrics: MetricsRegistry,
        tracer: Tracer,
        logger: StructuredLogger,
        routes: RouteNormalizer,
    ) -> Self {
        Self {
            metrics,
            tracer,
            logger,
            routes: Arc::new(routes),
        }
    }

    /// Build the pipeline described by configuration.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, TelemetryError> {
        let observability = &config.observability;

        let service_name = observability.service_name.clone();
        let tracer = match observability.trace_exporter {
            TraceExporterKind::Log => Tracer::new(service_name, LogSpanExporter),
            TraceExporterKind::None => Tracer::without_export(service_name),
        };
        let sink: Arc<dyn LogSink> = match observability.log_sink {
            LogSinkKind::Stdout => Arc::new(WriterSink::stdout()),
            LogSinkKind::Tracing => Arc::new(TracingSink),
        };

        Ok(Self::new(
            MetricsRegistry::from_config(observability)?,
            tracer,
            StructuredLogger::with_sink(sink),
            RouteNormalizer::from_config(&config.routes)?,
        ))
    }

    /// The process-wide in-flight request gauge.
    pub fn in_flight(&self) -> InFlightGauge {
        self.metrics.gauge(self::metrics::ACTIVE_CONNECTIONS)
    }
}
