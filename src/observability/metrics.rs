//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Hold named, labeled counters/histograms/gauges for the pipeline
//! - Expose a Prometheus text snapshot for scraping
//! - Keep the in-flight gauge correct under concurrent updates
//!
//! # Metrics
//! - `http_requests_total` (counter): requests by method, route, status_code
//! - `http_request_duration_seconds` (histogram): latency by method, route
//! - `http_errors_total` (counter): status >= 400 by method, route, error_class
//! - `application_errors_total` (counter): handler errors by error_type, component
//! - `active_connections` (gauge): requests currently inside the interceptor
//!
//! # Design Decisions
//! - Explicit registry instance, never the process-global recorder
//! - Low-overhead metric updates (atomic operations in the recorder)
//! - Label names fixed per metric on first use; new values create new series
//! - Histogram buckets tuned for typical web latencies (configurable)

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use metrics::{Counter, Gauge, Histogram, Key, KeyName, Label, Level, Metadata, Recorder};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use thiserror::Error;

use crate::config::ObservabilityConfig;

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const HTTP_ERRORS_TOTAL: &str = "http_errors_total";
pub const APPLICATION_ERRORS_TOTAL: &str = "application_errors_total";
pub const ACTIVE_CONNECTIONS: &str = "active_connections";

/// Content type of [`MetricsRegistry::render`] output.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to build metrics recorder: {0}")]
    Build(#[from] BuildError),
}

/// Labeled metrics store shared by every in-flight request.
#[derive(Clone)]
pub struct MetricsRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
    /// Metric name → sorted label names, fixed on first registration.
    schemas: DashMap<String, Vec<String>>,
    gauges: DashMap<String, InFlightGauge>,
}

impl MetricsRegistry {
    /// Build a registry whose histograms use the given bucket boundaries.
    pub fn new(duration_buckets: &[f64]) -> Result<Self, MetricsError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets(duration_buckets)?
            .build_recorder();
        let handle = recorder.handle();

        let registry = Self {
            inner: Arc::new(RegistryInner {
                recorder,
                handle,
                schemas: DashMap::new(),
                gauges: DashMap::new(),
            }),
        };
        registry.describe_http_metrics();
        Ok(registry)
    }

    /// Build a registry with the configured histogram buckets.
    pub fn from_config(config: &ObservabilityConfig) -> Result<Self, MetricsError> {
        Self::new(&config.duration_buckets)
    }

    fn describe_http_metrics(&self) {
        let r = &self.inner.recorder;
        r.describe_counter(
            KeyName::from(HTTP_REQUESTS_TOTAL),
            None,
            "Total HTTP requests by method, route and status code".into(),
        );
        r.describe_histogram(
            KeyName::from(HTTP_REQUEST_DURATION_SECONDS),
            Some(metrics::Unit::Seconds),
            "HTTP request latency by method and route".into(),
        );
        r.describe_counter(
            KeyName::from(HTTP_ERRORS_TOTAL),
            None,
            "HTTP responses with status >= 400 by error class".into(),
        );
        r.describe_counter(
            KeyName::from(APPLICATION_ERRORS_TOTAL),
            None,
            "Unhandled handler errors by type and component".into(),
        );
        r.describe_gauge(
            KeyName::from(ACTIVE_CONNECTIONS),
            None,
            "Requests currently being processed".into(),
        );
    }

    /// Counter series for `name` and `labels`, created on first use.
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> Counter {
        match self.key(name, labels) {
            Some(key) => self.inner.recorder.register_counter(&key, &metadata()),
            None => Counter::noop(),
        }
    }

    /// Histogram series for `name` and `labels`, created on first use.
    pub fn histogram(&self, name: &str, labels: &[(&str, &str)]) -> Histogram {
        match self.key(name, labels) {
            Some(key) => self.inner.recorder.register_histogram(&key, &metadata()),
            None => Histogram::noop(),
        }
    }

    /// Process-lifetime gauge. Repeated calls return the same scalar.
    pub fn gauge(&self, name: &str) -> InFlightGauge {
        self.inner
            .gauges
            .entry(name.to_owned())
            .or_insert_with(|| {
                let exported = self
                    .inner
                    .recorder
                    .register_gauge(&Key::from_name(name.to_owned()), &metadata());
                InFlightGauge::new(exported)
            })
            .clone()
    }

    /// Text exposition of every registered series.
    pub fn render(&self) -> String {
        self.inner.handle.render()
    }

    /// Parsed view of [`render`](Self::render).
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot::parse(&self.render())
    }

    /// Build the series key, enforcing the label-name schema.
    fn key(&self, name: &str, labels: &[(&str, &str)]) -> Option<Key> {
        let mut labels = labels.to_vec();
        labels.sort_by(|a, b| a.0.cmp(b.0));

        let names: Vec<String> = labels.iter().map(|(k, _)| (*k).to_owned()).collect();
        let schema = self
            .inner
            .schemas
            .entry(name.to_owned())
            .or_insert_with(|| names.clone());
        if *schema != names {
            tracing::warn!(
                metric = name,
                expected = ?*schema,
                got = ?names,
                "Label names differ from registered schema, dropping update"
            );
            return None;
        }
        drop(schema);

        let labels: Vec<Label> = labels
            .into_iter()
            .map(|(k, v)| Label::new(k.to_owned(), v.to_owned()))
            .collect();
        Some(Key::from_parts(name.to_owned(), labels))
    }
}

impl fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("metrics", &self.inner.schemas.len())
            .field("gauges", &self.inner.gauges.len())
            .finish()
    }
}

fn metadata() -> Metadata<'static> {
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()))
}

/// Non-negative gauge of requests in flight.
///
/// The authoritative value lives in an atomic that saturates at zero; every
/// accepted change is mirrored into the exported gauge.
#[derive(Clone)]
pub struct InFlightGauge {
    value: Arc<AtomicU64>,
    exported: Gauge,
}

impl InFlightGauge {
    fn new(exported: Gauge) -> Self {
        Self {
            value: Arc::new(AtomicU64::new(0)),
            exported,
        }
    }

    /// Add one in-flight request.
    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::SeqCst);
        self.exported.increment(1.0);
    }

    /// Decrement unless already zero. Returns false if the decrement was refused.
    pub fn decrement(&self) -> bool {
        let mut prev = self.value.load(Ordering::SeqCst);
        loop {
            if prev == 0 {
                tracing::warn!("In-flight gauge decrement below zero refused");
                return false;
            }
            match self.value.compare_exchange_weak(
                prev,
                prev - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(x) => prev = x,
            }
        }
        self.exported.decrement(1.0);
        true
    }

    /// Current number of requests in flight.
    pub fn value(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Increment now and decrement when the guard is released or dropped.
    pub fn track(&self) -> InFlightGuard {
        self.increment();
        InFlightGuard {
            gauge: Some(self.clone()),
        }
    }
}

impl fmt::Debug for InFlightGauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlightGauge")
            .field("value", &self.value())
            .finish()
    }
}

/// RAII guard holding one unit of an [`InFlightGauge`].
#[derive(Debug)]
pub struct InFlightGuard {
    gauge: Option<InFlightGauge>,
}

impl InFlightGuard {
    /// Decrement now. Later calls and the drop are no-ops.
    pub fn release(&mut self) {
        if let Some(gauge) = self.gauge.take() {
            gauge.decrement();
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// One line of the text exposition.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

/// Parsed metrics exposition.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    samples: Vec<Sample>,
}

impl MetricsSnapshot {
    /// Parse Prometheus text exposition, skipping comments and malformed lines.
    pub fn parse(text: &str) -> Self {
        let samples = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .filter_map(parse_sample)
            .collect();
        Self { samples }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Value of the series whose label set is exactly `labels`.
    pub fn value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.samples
            .iter()
            .find(|s| {
                s.name == name
                    && s.labels.len() == labels.len()
                    && labels
                        .iter()
                        .all(|(k, v)| s.labels.get(*k).map(String::as_str) == Some(*v))
            })
            .map(|s| s.value)
    }

    /// Sum over every series of `name` whose labels include `labels`.
    pub fn sum(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        self.samples
            .iter()
            .filter(|s| {
                s.name == name
                    && labels
                        .iter()
                        .all(|(k, v)| s.labels.get(*k).map(String::as_str) == Some(*v))
            })
            .map(|s| s.value)
            .sum()
    }
}

fn parse_sample(line: &str) -> Option<Sample> {
    let name_end = line.find(['{', ' '])?;
    let name = line[..name_end].to_string();
    let mut rest = &line[name_end..];

    let mut labels = BTreeMap::new();
    if let Some(body) = rest.strip_prefix('{') {
        let (parsed, consumed) = parse_labels(body)?;
        labels = parsed;
        rest = &body[consumed..];
    }

    let value = rest.split_whitespace().next()?.parse().ok()?;
    Some(Sample {
        name,
        labels,
        value,
    })
}

/// Parse `k="v",...}` returning the labels and bytes consumed through `}`.
fn parse_labels(body: &str) -> Option<(BTreeMap<String, String>, usize)> {
    let mut labels = BTreeMap::new();
    let mut chars = body.char_indices().peekable();

    loop {
        while let Some((_, c)) = chars.peek() {
            if *c == ',' || c.is_whitespace() {
                chars.next();
            } else {
                break;
            }
        }

        let (start, c) = chars.next()?;
        if c == '}' {
            return Some((labels, start + 1));
        }

        let mut key = String::from(c);
        loop {
            let (_, c) = chars.next()?;
            if c == '=' {
                break;
            }
            key.push(c);
        }

        if chars.next()?.1 != '"' {
            return None;
        }

        let mut value = String::new();
        loop {
            match chars.next()?.1 {
                '"' => break,
                '\\' => match chars.next()?.1 {
                    'n' => value.push('\n'),
                    other => value.push(other),
                },
                other => value.push(other),
            }
        }
        labels.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> MetricsRegistry {
        MetricsRegistry::new(&[0.1, 0.5, 1.0]).unwrap()
    }

    #[test]
    fn test_counter_series_per_label_set() {
        let metrics = registry();
        metrics
            .counter(HTTP_REQUESTS_TOTAL, &[("method", "GET"), ("route", "/"), ("status_code", "200")])
            .increment(1);
        metrics
            .counter(HTTP_REQUESTS_TOTAL, &[("route", "/"), ("status_code", "200"), ("method", "GET")])
            .increment(1);
        metrics
            .counter(HTTP_REQUESTS_TOTAL, &[("method", "POST"), ("route", "/"), ("status_code", "201")])
            .increment(1);

        let snapshot = metrics.snapshot();
        assert_eq!(
            snapshot.value(HTTP_REQUESTS_TOTAL, &[("method", "GET"), ("route", "/"), ("status_code", "200")]),
            Some(2.0)
        );
        assert_eq!(snapshot.sum(HTTP_REQUESTS_TOTAL, &[]), 3.0);
    }

    #[test]
    fn test_label_schema_mismatch_is_dropped() {
        let metrics = registry();
        metrics.counter("jobs_total", &[("queue", "a")]).increment(1);
        metrics.counter("jobs_total", &[("worker", "b")]).increment(5);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sum("jobs_total", &[]), 1.0);
    }

    #[test]
    fn test_histogram_buckets() {
        let metrics = registry();
        let h = metrics.histogram(HTTP_REQUEST_DURATION_SECONDS, &[("method", "GET"), ("route", "/")]);
        h.record(0.05);
        h.record(0.7);

        let snapshot = metrics.snapshot();
        let labels = [("method", "GET"), ("route", "/")];
        assert_eq!(
            snapshot.value("http_request_duration_seconds_count", &labels),
            Some(2.0)
        );
        assert_eq!(
            snapshot.value(
                "http_request_duration_seconds_bucket",
                &[("method", "GET"), ("route", "/"), ("le", "0.1")]
            ),
            Some(1.0)
        );
    }

    #[test]
    fn test_gauge_never_negative() {
        let metrics = registry();
        let gauge = metrics.gauge(ACTIVE_CONNECTIONS);
        assert!(!gauge.decrement());
        assert_eq!(gauge.value(), 0);

        gauge.increment();
        gauge.increment();
        assert!(gauge.decrement());
        assert_eq!(metrics.gauge(ACTIVE_CONNECTIONS).value(), 1);
        assert_eq!(metrics.snapshot().value(ACTIVE_CONNECTIONS, &[]), Some(1.0));
    }

    #[test]
    fn test_guard_releases_once() {
        let metrics = registry();
        let gauge = metrics.gauge(ACTIVE_CONNECTIONS);
        {
            let mut guard = gauge.track();
            assert_eq!(gauge.value(), 1);
            guard.release();
            assert_eq!(gauge.value(), 0);
            gauge.increment();
        }
        // Dropping an already released guard leaves other holders alone.
        assert_eq!(gauge.value(), 1);
    }

    #[test]
    fn test_parse_escaped_labels() {
        let text = "# HELP x test\n\
                    x{route=\"/a/{id}\",msg=\"say \\\"hi\\\"\"} 3\n\
                    y 1.5\n\
                    garbage line\n";
        let snapshot = MetricsSnapshot::parse(text);
        assert_eq!(
            snapshot.value("x", &[("route", "/a/{id}"), ("msg", "say \"hi\"")]),
            Some(3.0)
        );
        assert_eq!(snapshot.value("y", &[]), Some(1.5));
        assert_eq!(snapshot.samples().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_gauge_updates() {
        let metrics = registry();
        let gauge = metrics.gauge(ACTIVE_CONNECTIONS);

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let gauge = gauge.clone();
                tokio::spawn(async move {
                    let _guard = gauge.track();
                    tokio::task::yield_now().await;
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(gauge.value(), 0);
    }
}
