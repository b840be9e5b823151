//! Per-request observability middleware.
//!
//! # Responsibilities
//! - Open a span per request and make it the active span for the handler
//! - Track requests in flight
//! - Record traffic, latency and error metrics from the outcome
//! - Emit one correlated log record per outcome
//!
//! # State Machine
//! ```text
//! Idle → SpanOpen → HandlerRunning → Success ─┐
//!                                  → Failed  ─┴→ Closed
//! ```
//! `Closed` is reached exactly once, from `Drop`, so the gauge decrement and
//! span close also happen when the response future is cancelled or the
//! handler panics.
//!
//! # Design Decisions
//! - Handler errors are observed and returned unchanged, never turned into responses
//! - Status codes >= 400 are inspected, not raised
//! - All recording is infallible from the caller's point of view

use std::any::Any;
use std::borrow::Cow;
use std::convert::Infallible;
use std::fmt::{self, Display};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::task::{Context, Poll};
use std::time::Instant;

use axum::http::{header, Request, Response};
use futures_util::future::{BoxFuture, FutureExt};
use serde_json::json;
use thiserror::Error;
use tower::{BoxError, Layer, Service};
use tracing::Instrument;

use crate::http::request::RequestDescriptor;
use crate::observability::metrics::{
    InFlightGuard, APPLICATION_ERRORS_TOTAL, HTTP_ERRORS_TOTAL, HTTP_REQUESTS_TOTAL,
    HTTP_REQUEST_DURATION_SECONDS,
};
use crate::observability::trace::{self, KeyValue, Span, Status};
use crate::observability::{classify, Telemetry};
use crate::routing::RouteLabel;

/// `component` label value on `application_errors_total`.
pub const COMPONENT: &str = "middleware";

/// Error type label for futures dropped before the handler finished.
pub const CANCELLED: &str = "Cancelled";

/// Error type label for handlers that panicked.
pub const PANIC: &str = "Panic";

/// Short, stable name of an error's kind, used as the `error_type` label.
pub trait ErrorType {
    /// Label value for this error, e.g. `ValueError` or `TimedOut`.
    fn error_type(&self) -> Cow<'_, str>;
}

/// An error raised by a handler, tagged with a kind such as `ValueError`.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    kind: Cow<'static, str>,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl HandlerError {
    /// Create an error of the given kind with a human-readable message.
    pub fn new(kind: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// The error kind used as the `error_type` label.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The message reported in logs and span status.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl ErrorType for HandlerError {
    fn error_type(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.kind)
    }
}

impl ErrorType for Infallible {
    fn error_type(&self) -> Cow<'_, str> {
        match *self {}
    }
}

impl ErrorType for io::Error {
    fn error_type(&self) -> Cow<'_, str> {
        Cow::Owned(format!("{:?}", self.kind()))
    }
}

impl ErrorType for BoxError {
    fn error_type(&self) -> Cow<'_, str> {
        if let Some(e) = self.downcast_ref::<HandlerError>() {
            e.error_type()
        } else if let Some(e) = self.downcast_ref::<io::Error>() {
            e.error_type()
        } else if self.is::<tower::timeout::error::Elapsed>() {
            Cow::Borrowed("Elapsed")
        } else {
            Cow::Borrowed("Error")
        }
    }
}

/// Position of one request in the interceptor state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    SpanOpen,
    HandlerRunning,
    Success,
    Failed,
    Closed,
}

/// Layer that wraps a service with the request observability pipeline.
#[derive(Debug, Clone)]
pub struct ObservabilityLayer {
    telemetry: Telemetry,
}

impl ObservabilityLayer {
    /// Create a layer recording into `telemetry`.
    pub fn new(telemetry: Telemetry) -> Self {
        Self { telemetry }
    }
}

impl<S> Layer<S> for ObservabilityLayer {
    type Service = Interceptor<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Interceptor {
            inner,
            telemetry: self.telemetry.clone(),
        }
    }
}

/// Service produced by [`ObservabilityLayer`].
#[derive(Debug, Clone)]
pub struct Interceptor<S> {
    inner: S,
    telemetry: Telemetry,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for Interceptor<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: ErrorType + Display + Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let descriptor = RequestDescriptor::from_request(&req);
        let mut exchange = Exchange::begin(&self.telemetry, &descriptor);
        let span = exchange.span.clone();
        let diagnostics = tracing::info_span!(
            "request",
            method = %descriptor.method(),
            route = %exchange.route,
            trace_id = %span.trace_id(),
        );

        exchange.transition(Phase::HandlerRunning);
        let future = trace::sync_scope(span.clone(), || self.inner.call(req));

        Box::pin(
            async move {
                let outcome = AssertUnwindSafe(trace::scope(span, future))
                    .catch_unwind()
                    .await;
                let result = match outcome {
                    Ok(result) => result,
                    Err(payload) => {
                        exchange.panicked(payload.as_ref());
                        panic::resume_unwind(payload)
                    }
                };
                match &result {
                    Ok(response) => exchange.succeed(response),
                    Err(err) => exchange.fail(err),
                }
                result
            }
            .instrument(diagnostics),
        )
    }
}

/// Bookkeeping for one request from span open to close.
struct Exchange {
    telemetry: Telemetry,
    method: String,
    route: RouteLabel,
    span: Span,
    started: Instant,
    in_flight: InFlightGuard,
    phase: Phase,
}

impl Exchange {
    fn begin(telemetry: &Telemetry, descriptor: &RequestDescriptor) -> Self {
        let route = telemetry.routes.normalize(descriptor.path());

        let mut attributes = vec![
            KeyValue::new("http.method", descriptor.method().to_string()),
            KeyValue::new("http.url", descriptor.url().to_string()),
            KeyValue::new("http.route", route.as_str().to_string()),
            KeyValue::new("http.scheme", descriptor.scheme().to_string()),
        ];
        if let Some(host) = descriptor.host() {
            attributes.push(KeyValue::new("http.host", host.to_string()));
        }

        let span = telemetry
            .tracer
            .open_root(format!("{} {}", descriptor.method(), route), attributes);
        let in_flight = telemetry.in_flight().track();

        let mut exchange = Self {
            telemetry: telemetry.clone(),
            method: descriptor.method().to_string(),
            route,
            span,
            started: Instant::now(),
            in_flight,
            phase: Phase::Idle,
        };
        exchange.transition(Phase::SpanOpen);
        exchange
    }

    fn transition(&mut self, next: Phase) {
        tracing::trace!(from = ?self.phase, to = ?next, span_id = %self.span.span_id(), "Interceptor transition");
        self.phase = next;
    }

    fn succeed<B>(&mut self, response: &Response<B>) {
        let status = response.status().as_u16();
        let size = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        let _ = self.span.set_attribute("http.status_code", i64::from(status));
        let _ = self
            .span
            .set_attribute("http.response.size", i64::try_from(size).unwrap_or(i64::MAX));
        let span_status = if status >= 400 {
            Status::error(format!("HTTP {status}"))
        } else {
            Status::Ok
        };
        let _ = self.span.set_status(span_status);

        let duration = self.started.elapsed().as_secs_f64();
        let duration_ms = (duration * 100_000.0).round() / 100.0;
        let method = self.method.as_str();
        let route = self.route.as_str();
        let status_code = status.to_string();

        let metrics = &self.telemetry.metrics;
        metrics
            .counter(
                HTTP_REQUESTS_TOTAL,
                &[("method", method), ("route", route), ("status_code", &status_code)],
            )
            .increment(1);
        metrics
            .histogram(
                HTTP_REQUEST_DURATION_SECONDS,
                &[("method", method), ("route", route)],
            )
            .record(duration);

        let logger = &self.telemetry.logger;
        trace::sync_scope(self.span.clone(), || {
            if status >= 400 {
                let error_class = classify(status.into());
                metrics
                    .counter(
                        HTTP_ERRORS_TOTAL,
                        &[("method", method), ("route", route), ("error_class", error_class.as_str())],
                    )
                    .increment(1);
                logger.error(
                    "http_error",
                    [
                        ("method", json!(method)),
                        ("route", json!(route)),
                        ("status_code", json!(status)),
                        ("error_class", json!(error_class.as_str())),
                        ("duration_ms", json!(duration_ms)),
                    ],
                );
            } else {
                logger.info(
                    "request_processed",
                    [
                        ("method", json!(method)),
                        ("route", json!(route)),
                        ("status_code", json!(status)),
                        ("duration_seconds", json!(duration)),
                        ("duration_ms", json!(duration_ms)),
                    ],
                );
            }
        });

        self.transition(Phase::Success);
    }

    fn fail<E: ErrorType + Display>(&mut self, err: &E) {
        self.record_failure(&err.error_type(), &err.to_string());
        self.transition(Phase::Failed);
    }

    fn panicked(&mut self, payload: &(dyn Any + Send)) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "handler panicked".to_string());
        self.record_failure(PANIC, &message);
        self.transition(Phase::Failed);
    }

    fn record_failure(&self, error_type: &str, message: &str) {
        let _ = self.span.set_status(Status::error(message.to_string()));
        let _ = self.span.record_exception(error_type, message);

        self.telemetry
            .metrics
            .counter(
                APPLICATION_ERRORS_TOTAL,
                &[("error_type", error_type), ("component", COMPONENT)],
            )
            .increment(1);

        trace::sync_scope(self.span.clone(), || {
            self.telemetry.logger.error(
                "request_failed",
                [
                    ("method", json!(self.method)),
                    ("route", json!(self.route.as_str())),
                    ("error", json!(message)),
                    ("error_type", json!(error_type)),
                ],
            );
        });
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        if matches!(self.phase, Phase::SpanOpen | Phase::HandlerRunning) {
            if std::thread::panicking() {
                self.record_failure(PANIC, "handler panicked");
            } else {
                self.record_failure(CANCELLED, "request cancelled before completion");
            }
            self.transition(Phase::Failed);
        }

        self.in_flight.release();
        self.span.close();
        self.transition(Phase::Closed);
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("method", &self.method)
            .field("route", &self.route)
            .field("phase", &self.phase)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_error_type() {
        let err = HandlerError::new("ValueError", "boom");
        assert_eq!(err.error_type(), "ValueError");
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_boxed_error_types() {
        let boxed: BoxError = Box::new(HandlerError::new("KeyError", "missing"));
        assert_eq!(boxed.error_type(), "KeyError");

        let boxed: BoxError = Box::new(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert_eq!(boxed.error_type(), "TimedOut");

        let boxed: BoxError = Box::new(tower::timeout::error::Elapsed::new());
        assert_eq!(boxed.error_type(), "Elapsed");

        let boxed: BoxError = "plain".into();
        assert_eq!(boxed.error_type(), "Error");
    }

    #[test]
    fn test_handler_error_source() {
        use std::error::Error as _;
        let err = HandlerError::new("IOError", "read failed")
            .with_source(io::Error::new(io::ErrorKind::Other, "disk"));
        assert_eq!(err.source().map(|s| s.to_string()), Some("disk".to_string()));
    }
}
