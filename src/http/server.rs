//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the service's handlers
//! - Wire up middleware (request ID, timeout, observability)
//! - Bind server to listener and stop on shutdown
//!
//! # Layer Order (outermost first)
//! ```text
//! SetRequestId → PropagateRequestId → Timeout
//!     → HandleError (escaped handler errors become 500 JSON)
//!     → Interceptor
//!     → AppService (routes + fallible handlers)
//! ```

use std::task::{Context, Poll};
use std::time::Duration;

use axum::{
    body::Body,
    error_handling::HandleErrorLayer,
    extract::State,
    http::{header, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::future::BoxFuture;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::{Service, ServiceBuilder};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
};

use crate::config::ServiceConfig;
use crate::http::interceptor::{ErrorType, HandlerError, ObservabilityLayer};
use crate::observability::metrics::PROMETHEUS_CONTENT_TYPE;
use crate::observability::trace::{self, KeyValue, Status};
use crate::observability::Telemetry;

/// Path served by the handler that always fails with a [`HandlerError`].
pub const FAIL_TEST_PATH: &str = "/fail-test";

/// Application state injected into handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    pub telemetry: Telemetry,
}

/// HTTP server for the instrumented service.
pub struct HttpServer {
    router: Router,
    config: ServiceConfig,
}

impl HttpServer {
    /// Create a server for `config`, recording into `telemetry`.
    pub fn new(config: ServiceConfig, telemetry: Telemetry) -> Self {
        let router = Self::build_router(&config, telemetry);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ServiceConfig, telemetry: Telemetry) -> Router {
        let state = AppState {
            telemetry: telemetry.clone(),
        };
        let mut routes = Router::new()
            .route("/", get(root))
            .route("/health", get(health))
            .route("/trace-test", get(trace_test))
            .route("/error-test", get(error_test));
        if config.observability.metrics_enabled {
            routes = routes.route("/metrics", get(metrics));
        }
        let routes = routes.with_state(state);

        let pipeline = ServiceBuilder::new()
            .layer(HandleErrorLayer::new(handle_escaped_error))
            .layer(ObservabilityLayer::new(telemetry))
            .service(AppService::new(routes));

        Router::new()
            .fallback_service(pipeline)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The fully layered router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until the shutdown channel fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            service = %self.config.observability.service_name,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// The configuration the server was built from.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }
}

/// Routes infallible handlers through the axum router and dispatches the
/// handlers that can fail with a [`HandlerError`].
#[derive(Clone, Debug)]
pub struct AppService {
    routes: Router,
}

impl AppService {
    /// Wrap the demo routes.
    pub fn new(routes: Router) -> Self {
        Self { routes }
    }
}

impl Service<Request<Body>> for AppService {
    type Response = Response;
    type Error = HandlerError;
    type Future = BoxFuture<'static, Result<Response, HandlerError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        if req.uri().path() == FAIL_TEST_PATH {
            return Box::pin(fail_test());
        }

        let future = self.routes.call(req);
        Box::pin(async move {
            match future.await {
                Ok(response) => Ok(response),
                Err(never) => match never {},
            }
        })
    }
}

/// Converts an error that escaped the interceptor into a 500 response.
async fn handle_escaped_error(err: HandlerError) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": "internal server error",
            "error_type": err.error_type(),
        })),
    )
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "Request observability service is running" }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy", "version": env!("CARGO_PKG_VERSION") }))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        state.telemetry.metrics.render(),
    )
}

async fn trace_test(State(state): State<AppState>) -> Json<serde_json::Value> {
    let telemetry = &state.telemetry;
    let span = telemetry.tracer.open(
        "test-span",
        [
            KeyValue::new("test.attribute", "test-value"),
            KeyValue::new("custom.operation", "trace-test"),
        ],
    );
    let trace_id = span.trace_id().to_string();
    let span_id = span.span_id().to_string();

    span.in_scope(async {
        telemetry.logger.info(
            "trace_test_executed",
            [
                ("span_name", json!("test-span")),
                ("service", json!(telemetry.tracer.service_name())),
                ("test_attribute", json!("test-value")),
            ],
        );

        let child = telemetry
            .tracer
            .open("child-span", [KeyValue::new("relationship", "child")]);
        child
            .in_scope(async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                telemetry.logger.info(
                    "child_span_executed",
                    [
                        ("span_name", json!("child-span")),
                        ("service", json!(telemetry.tracer.service_name())),
                        ("parent_span_id", json!(span_id)),
                    ],
                );
            })
            .await;
        child.close();
    })
    .await;
    span.close();

    Json(json!({
        "message": "Test spans created",
        "trace_id": trace_id,
        "span_id": span_id,
    }))
}

async fn error_test(State(state): State<AppState>) -> Response {
    let telemetry = &state.telemetry;
    let span = telemetry.tracer.open(
        "error-span",
        [KeyValue::new("custom.operation", "error-simulation")],
    );
    let _ = span.set_attribute("error", true);
    let _ = span.set_status(Status::error("Simulated error for testing"));

    trace::sync_scope(span.clone(), || {
        telemetry.logger.error(
            "error_test_executed",
            [
                ("span_name", json!("error-span")),
                ("service", json!(telemetry.tracer.service_name())),
                ("error_type", json!("SimulatedError")),
                ("error_reason", json!("Testing error logging and tracing")),
            ],
        );
    });
    span.close();

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": "Simulated error",
            "trace_id": span.trace_id().to_string(),
            "span_id": span.span_id().to_string(),
        })),
    )
        .into_response()
}

async fn fail_test() -> Result<Response, HandlerError> {
    Err(HandlerError::new(
        "SimulatedFailure",
        "handler failed while processing the request",
    ))
}
