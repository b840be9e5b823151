//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the process diagnostics subscriber (`tracing`)
//! - Emit per-request JSON records correlated with the active span
//! - Keep sink failures and slow writers away from request processing
//!
//! # Design Decisions
//! - Uses tracing crate for process diagnostics
//! - JSON format for production, pretty format for development
//! - Log level configurable via config and `RUST_LOG`
//! - Output goes through `tracing_appender::non_blocking`; a full queue drops
//!   lines instead of stalling the request
//! - Request records go through a `LogSink`; emission is fire-and-forget

use std::fmt;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer};

use crate::config::{LogFormat, ObservabilityConfig};
use crate::observability::trace;

/// `tracing` target of forwarded request records.
pub const REQUEST_LOG_TARGET: &str = "request_observability::request_log";

/// Envelope keys callers cannot override.
const RESERVED_FIELDS: [&str; 4] = ["message", "level", "trace_id", "span_id"];

/// Filter used when `RUST_LOG` is unset.
///
/// Covers every target under this crate, including request records and spans.
pub fn default_directives(level: &str) -> String {
    format!("request_observability={level},tower_http={level}")
}

/// Install the global `tracing` subscriber for process diagnostics.
///
/// `RUST_LOG` takes precedence over the configured level. Output is written by
/// a background thread; keep the returned guard alive until exit so buffered
/// lines are flushed.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<WorkerGuard, TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.log_level)));

    let (writer, guard) = tracing_appender::non_blocking(io::stdout());
    let layer = tracing_subscriber::fmt::layer().with_writer(writer);
    let layer = match config.log_format {
        LogFormat::Json => layer.json().flatten_event(true).boxed(),
        LogFormat::Pretty => layer.boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()?;
    Ok(guard)
}

/// Severity of a structured record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One emitted log event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub message: String,
    pub level: LogLevel,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl LogRecord {
    /// Caller-supplied field by name.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(Value::as_str)
    }

    /// The record as a single JSON line.
    pub fn to_json(&self) -> Result<String, SinkError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to encode log record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write log record: {0}")]
    Io(#[from] io::Error),
}

/// Destination of structured records.
pub trait LogSink: Send + Sync + 'static {
    fn emit(&self, record: &LogRecord) -> Result<(), SinkError>;
}

/// Fields the tracing sink lifts to top-level event fields when they hold a string.
const STR_FIELDS: [&str; 7] = ["method", "route", "error_class", "error", "error_type", "operation", "event"];
/// Fields lifted when they hold a number.
const NUM_FIELDS: [&str; 3] = ["status_code", "duration_ms", "duration_seconds"];

macro_rules! emit_request_log {
    ($level:ident, $record:expr, $extra:expr) => {
        tracing::event!(
            target: REQUEST_LOG_TARGET,
            tracing::Level::$level,
            trace_id = $record.trace_id.as_deref(),
            span_id = $record.span_id.as_deref(),
            method = $record.str_field("method"),
            route = $record.str_field("route"),
            status_code = $record.field("status_code").and_then(serde_json::Value::as_u64),
            error_class = $record.str_field("error_class"),
            duration_ms = $record.field("duration_ms").and_then(serde_json::Value::as_f64),
            duration_seconds = $record.field("duration_seconds").and_then(serde_json::Value::as_f64),
            error = $record.str_field("error"),
            error_type = $record.str_field("error_type"),
            operation = $record.str_field("operation"),
            event = $record.str_field("event"),
            extra = $extra,
            "{}",
            $record.message
        )
    };
}

/// Forwards records to the `tracing` subscriber as structured events.
///
/// Known request fields become event fields of their own; anything else is
/// carried as one JSON-encoded `extra` field.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, record: &LogRecord) -> Result<(), SinkError> {
        let rest: Map<String, Value> = record
            .fields
            .iter()
            .filter(|(k, v)| {
                let lifted = (STR_FIELDS.contains(&k.as_str()) && v.is_string())
                    || (NUM_FIELDS.contains(&k.as_str()) && v.is_number());
                !lifted
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let extra = if rest.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&rest)?)
        };
        let extra = extra.as_deref();

        match record.level {
            LogLevel::Debug => emit_request_log!(DEBUG, record, extra),
            LogLevel::Info => emit_request_log!(INFO, record, extra),
            LogLevel::Warn => emit_request_log!(WARN, record, extra),
            LogLevel::Error => emit_request_log!(ERROR, record, extra),
        }
        Ok(())
    }
}

/// Writes one JSON line per record from a background thread.
///
/// `emit` only enqueues the line. Dropping the sink flushes what is queued.
#[derive(Debug)]
pub struct WriterSink {
    writer: NonBlocking,
    _guard: WorkerGuard,
}

impl WriterSink {
    /// Sink writing to `writer` on a dedicated thread.
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        let (writer, guard) = tracing_appender::non_blocking(writer);
        Self {
            writer,
            _guard: guard,
        }
    }

    /// Sink writing to the process stdout.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl LogSink for WriterSink {
    fn emit(&self, record: &LogRecord) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.writer.clone().write_all(&line)?;
        Ok(())
    }
}

/// Retains records in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record emitted so far.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records with the given message.
    pub fn with_message(&self, message: &str) -> Vec<LogRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.message == message)
            .collect()
    }
}

impl LogSink for MemorySink {
    fn emit(&self, record: &LogRecord) -> Result<(), SinkError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}

/// Emits trace-correlated structured records.
#[derive(Clone)]
pub struct StructuredLogger {
    sink: Arc<dyn LogSink>,
}

impl StructuredLogger {
    /// Logger writing to `sink`.
    pub fn new(sink: impl LogSink) -> Self {
        Self::with_sink(Arc::new(sink))
    }

    /// Logger writing to an already shared sink.
    pub fn with_sink(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    /// Emit one record, tagged with the active span's IDs (or nulls).
    ///
    /// Never fails: sink errors and sink panics are dropped.
    pub fn log<I, K>(&self, level: LogLevel, message: &str, fields: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let span = trace::current();
        let fields = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v))
            .filter(|(k, _)| !RESERVED_FIELDS.contains(&k.as_str()))
            .collect();

        let record = LogRecord {
            message: message.to_string(),
            level,
            trace_id: span.as_ref().map(|s| s.trace_id().to_string()),
            span_id: span.as_ref().map(|s| s.span_id().to_string()),
            fields,
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.sink.emit(&record)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, record = message, "Log sink rejected record"),
            Err(_) => tracing::debug!(record = message, "Log sink panicked"),
        }
    }

    /// Emit at `INFO`.
    pub fn info<I, K>(&self, message: &str, fields: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.log(LogLevel::Info, message, fields)
    }

    /// Emit at `WARN`.
    pub fn warn<I, K>(&self, message: &str, fields: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.log(LogLevel::Warn, message, fields)
    }

    /// Emit at `ERROR`.
    pub fn error<I, K>(&self, message: &str, fields: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.log(LogLevel::Error, message, fields)
    }
}

impl fmt::Debug for StructuredLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructuredLogger").finish_non_exhaustive()
    }
}
