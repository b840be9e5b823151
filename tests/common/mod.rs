//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use opentelemetry::Value;
use opentelemetry_sdk::export::trace::SpanData;
use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
use request_observability::config::ServiceConfig;
use request_observability::observability::{
    MemorySink, MetricsRegistry, MetricsSnapshot, StructuredLogger, Telemetry, Tracer,
};
use request_observability::routing::RouteNormalizer;
use request_observability::{HttpServer, Shutdown};
use tokio::net::TcpListener;

/// Telemetry wired to in-memory sinks.
pub struct Harness {
    pub telemetry: Telemetry,
    pub logs: MemorySink,
    pub spans: Spans,
}

impl Harness {
    pub fn new() -> Self {
        let config = ServiceConfig::default();
        let templates: Vec<&str> = config.routes.templates.iter().map(String::as_str).collect();
        Self::with_templates(&templates)
    }

    pub fn with_templates(templates: &[&str]) -> Self {
        let logs = MemorySink::new();
        let exporter = InMemorySpanExporter::default();
        let tracer = Tracer::new("api", exporter.clone());
        let spans = Spans {
            exporter,
            tracer: tracer.clone(),
        };
        let telemetry = Telemetry::new(
            MetricsRegistry::new(&[0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]).unwrap(),
            tracer,
            StructuredLogger::new(logs.clone()),
            RouteNormalizer::new(templates.iter().copied()).unwrap(),
        );
        Self {
            telemetry,
            logs,
            spans,
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.telemetry.metrics.snapshot()
    }

    pub fn in_flight(&self) -> u64 {
        self.telemetry.in_flight().value()
    }
}

/// Finished spans collected by the SDK's in-memory exporter.
pub struct Spans {
    exporter: InMemorySpanExporter,
    tracer: Tracer,
}

impl Spans {
    pub fn all(&self) -> Vec<SpanData> {
        self.tracer.flush();
        self.exporter.get_finished_spans().unwrap()
    }

    /// First finished span with the given name.
    pub fn find(&self, name: &str) -> Option<SpanData> {
        self.all().into_iter().find(|s| s.name == name)
    }
}

/// Attribute value on a finished span.
pub fn attr(span: &SpanData, key: &str) -> Option<Value> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.clone())
}

pub fn trace_hex(span: &SpanData) -> String {
    span.span_context.trace_id().to_string()
}

pub fn span_hex(span: &SpanData) -> String {
    span.span_context.span_id().to_string()
}

pub fn duration(span: &SpanData) -> Duration {
    span.end_time
        .duration_since(span.start_time)
        .unwrap_or_default()
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

/// Start the full service on an ephemeral port.
pub async fn start_server(harness: &Harness, request_secs: u64) -> (SocketAddr, Shutdown) {
    let mut config = ServiceConfig::default();
    config.timeouts.request_secs = request_secs;
    start_server_with(harness, config).await
}

/// Start the service with an explicit configuration.
pub async fn start_server_with(harness: &Harness, config: ServiceConfig) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    let server = HttpServer::new(config, harness.telemetry.clone());
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });

    (addr, shutdown)
}
