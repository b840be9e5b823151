//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, timeout)
//!     → interceptor.rs (span, in-flight gauge, metrics, logs)
//!         → request.rs (method, path, URL, scheme, host)
//!     → handler
//!     → interceptor.rs (outcome recorded, span closed)
//!     → Send to client
//! ```

pub mod interceptor;
pub mod request;
pub mod server;

pub use interceptor::{ErrorType, HandlerError, Interceptor, ObservabilityLayer};
pub use request::RequestDescriptor;
pub use server::{AppService, AppState, HttpServer};
