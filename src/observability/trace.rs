//! Distributed tracing support.
//!
//! # Responsibilities
//! - Open spans as children of the span active in the current request
//! - Carry the active span across `.await` points and into nested handlers
//! - Hand closed spans to an OpenTelemetry exporter
//!
//! # Design Decisions
//! - `Tracer` is a thin wrapper over an `opentelemetry_sdk` `TracerProvider`
//! - The active span lives in an `opentelemetry::Context`, attached to futures
//!   with `FutureExt::with_context`; there is no process-global tracer
//! - Close is idempotent; writes after close are rejected
//! - A span whose last handle is dropped is closed and exported by the SDK

use std::borrow::Cow;
use std::fmt;
use std::future::Future;

use futures_util::future::BoxFuture;
use opentelemetry::trace::{
    FutureExt as _, SpanRef, TraceContextExt, Tracer as _, TracerProvider as _, WithContext,
};
use opentelemetry::{Context, Key, Value};
use opentelemetry_sdk::export::trace::{ExportResult, SpanData, SpanExporter};
use opentelemetry_sdk::trace::{Config, Sampler, TracerProvider};
use opentelemetry_sdk::Resource;
use thiserror::Error;

pub use opentelemetry::trace::{SpanId, Status, TraceId};
pub use opentelemetry::KeyValue;

/// Instrumentation scope name reported on every span.
const INSTRUMENTATION_NAME: &str = "request-observability";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpanError {
    #[error("span {0} is already closed")]
    Closed(SpanId),
}

/// Emits each closed span as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSpanExporter;

impl SpanExporter for LogSpanExporter {
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        for span in batch {
            let duration_ms = span
                .end_time
                .duration_since(span.start_time)
                .map(|d| d.as_secs_f64() * 1000.0)
                .unwrap_or(0.0);
            let parent_span_id =
                (span.parent_span_id != SpanId::INVALID).then(|| span.parent_span_id.to_string());
            let parent_span_id = parent_span_id.as_deref();
            tracing::info!(
                target: "request_observability::spans",
                trace_id = %span.span_context.trace_id(),
                span_id = %span.span_context.span_id(),
                parent_span_id,
                name = %span.name,
                status = ?span.status,
                attributes = span.attributes.len(),
                events = span.events.len(),
                duration_ms,
                "Span closed"
            );
        }
        Box::pin(std::future::ready(Ok(())))
    }
}

/// Opens spans for one service.
#[derive(Clone)]
pub struct Tracer {
    service_name: Cow<'static, str>,
    provider: TracerProvider,
    tracer: opentelemetry_sdk::trace::Tracer,
}

impl Tracer {
    /// Tracer that exports every closed span synchronously to `exporter`.
    pub fn new(service_name: impl Into<Cow<'static, str>>, exporter: impl SpanExporter + 'static) -> Self {
        let service_name = service_name.into();
        let provider = TracerProvider::builder()
            .with_simple_exporter(exporter)
            .with_config(config(&service_name))
            .build();
        Self::from_provider(service_name, provider)
    }

    /// Tracer whose spans are recorded but never exported.
    pub fn without_export(service_name: impl Into<Cow<'static, str>>) -> Self {
        let service_name = service_name.into();
        let provider = TracerProvider::builder()
            .with_config(config(&service_name))
            .build();
        Self::from_provider(service_name, provider)
    }

    /// Wrap an already configured provider.
    pub fn from_provider(service_name: impl Into<Cow<'static, str>>, provider: TracerProvider) -> Self {
        let tracer = provider.tracer(INSTRUMENTATION_NAME);
        Self {
            service_name: service_name.into(),
            provider,
            tracer,
        }
    }

    /// Service name carried on the `service.name` resource attribute.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn provider(&self) -> &TracerProvider {
        &self.provider
    }

    /// Open a span as a child of the current span, or as a root if none is active.
    pub fn open<I>(&self, name: impl Into<Cow<'static, str>>, attributes: I) -> Span
    where
        I: IntoIterator<Item = KeyValue>,
    {
        self.start(name.into(), attributes, &Context::current())
    }

    /// Open a span that starts a new trace regardless of the current span.
    pub fn open_root<I>(&self, name: impl Into<Cow<'static, str>>, attributes: I) -> Span
    where
        I: IntoIterator<Item = KeyValue>,
    {
        self.start(name.into(), attributes, &Context::new())
    }

    fn start<I>(&self, name: Cow<'static, str>, attributes: I, parent_cx: &Context) -> Span
    where
        I: IntoIterator<Item = KeyValue>,
    {
        let parent = parent_cx.span().span_context().clone();
        let parent_span_id = parent.is_valid().then(|| parent.span_id());

        let mut builder = self.tracer.span_builder(name);
        builder.attributes = Some(attributes.into_iter().collect());
        let span = self.tracer.build_with_context(builder, parent_cx);

        Span {
            cx: parent_cx.with_span(span).with_value(Parent(parent_span_id)),
        }
    }

    /// Export whatever the provider still buffers.
    pub fn flush(&self) {
        for result in self.provider.force_flush() {
            if let Err(e) = result {
                tracing::debug!(error = %e, "Span flush failed");
            }
        }
    }
}

fn config(service_name: &str) -> Config {
    Config::default()
        .with_sampler(Sampler::AlwaysOn)
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            service_name.to_string(),
        )]))
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("service_name", &self.service_name)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
struct Parent(Option<SpanId>);

/// Handle to an open (or closed) span. Clones share the same span.
///
/// The handle is an OpenTelemetry [`Context`] whose active span is this span,
/// so it can be attached to a future or a synchronous scope directly.
#[derive(Clone)]
pub struct Span {
    cx: Context,
}

impl Span {
    /// Trace this span belongs to.
    pub fn trace_id(&self) -> TraceId {
        self.cx.span().span_context().trace_id()
    }

    /// Identifier of this span.
    pub fn span_id(&self) -> SpanId {
        self.cx.span().span_context().span_id()
    }

    /// Span that was active when this one was opened, if any.
    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.cx.get::<Parent>().and_then(|p| p.0)
    }

    /// The context carrying this span as its active span.
    pub fn context(&self) -> &Context {
        &self.cx
    }

    /// Set or overwrite one attribute.
    pub fn set_attribute(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<(), SpanError> {
        self.recording()?.set_attribute(KeyValue::new(key, value));
        Ok(())
    }

    /// Set the span outcome.
    pub fn set_status(&self, status: Status) -> Result<(), SpanError> {
        self.recording()?.set_status(status);
        Ok(())
    }

    /// Append a timestamped event.
    pub fn add_event(
        &self,
        name: impl Into<Cow<'static, str>>,
        attributes: Vec<KeyValue>,
    ) -> Result<(), SpanError> {
        self.recording()?.add_event(name, attributes);
        Ok(())
    }

    /// Attach an `exception` event carrying the error type and message.
    pub fn record_exception(&self, error_type: &str, message: &str) -> Result<(), SpanError> {
        self.add_event(
            "exception",
            vec![
                KeyValue::new("exception.type", error_type.to_string()),
                KeyValue::new("exception.message", message.to_string()),
            ],
        )
    }

    pub fn is_closed(&self) -> bool {
        !self.cx.span().is_recording()
    }

    /// Close and export the span. Returns false if it was already closed.
    pub fn close(&self) -> bool {
        let span = self.cx.span();
        if !span.is_recording() {
            return false;
        }
        span.end();
        true
    }

    /// Run `fut` with this span as the active span.
    pub fn in_scope<F: Future>(&self, fut: F) -> WithContext<F> {
        scope(self.clone(), fut)
    }

    fn recording(&self) -> Result<SpanRef<'_>, SpanError> {
        let span = self.cx.span();
        if span.is_recording() {
            Ok(span)
        } else {
            Err(SpanError::Closed(span.span_context().span_id()))
        }
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("trace_id", &self.trace_id())
            .field("span_id", &self.span_id())
            .field("parent_span_id", &self.parent_span_id())
            .finish()
    }
}

/// The span active in the calling task, if any.
pub fn current() -> Option<Span> {
    let cx = Context::current();
    let active = cx.span().span_context().is_valid();
    active.then(|| Span { cx })
}

/// Run `fut` with `span` as the active span.
pub fn scope<F: Future>(span: Span, fut: F) -> WithContext<F> {
    fut.with_context(span.cx)
}

/// Run `f` synchronously with `span` as the active span.
pub fn sync_scope<R>(span: Span, f: impl FnOnce() -> R) -> R {
    let _guard = span.cx.attach();
    f()
}
