//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, buckets increasing)
//! - Check route templates compile and do not repeat
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServiceConfig;
use crate::routing::normalizer::RouteTemplate;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("invalid bind address '{0}'")]
    BindAddress(String),

    #[error("request timeout must be greater than zero")]
    ZeroTimeout,

    #[error("service name must not be empty")]
    EmptyServiceName,

    #[error("unknown log level '{0}'")]
    LogLevel(String),

    #[error("duration buckets must not be empty")]
    NoBuckets,

    #[error("duration bucket {0} must be finite and positive")]
    BucketValue(f64),

    #[error("duration buckets must be strictly increasing")]
    BucketOrder,

    #[error("route template '{template}': {reason}")]
    RouteTemplate { template: String, reason: String },

    #[error("route template '{0}' is declared more than once")]
    DuplicateRoute(String),
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroTimeout);
    }

    let observability = &config.observability;
    if observability.service_name.trim().is_empty() {
        errors.push(ValidationError::EmptyServiceName);
    }
    if !LOG_LEVELS.contains(&observability.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::LogLevel(observability.log_level.clone()));
    }

    errors.extend(check_buckets(&observability.duration_buckets));

    let mut seen = HashSet::new();
    for template in &config.routes.templates {
        if let Err(e) = RouteTemplate::parse(template) {
            errors.push(ValidationError::RouteTemplate {
                template: template.clone(),
                reason: e.to_string(),
            });
        }
        if !seen.insert(template.as_str()) {
            errors.push(ValidationError::DuplicateRoute(template.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_buckets(buckets: &[f64]) -> Vec<ValidationError> {
    if buckets.is_empty() {
        return vec![ValidationError::NoBuckets];
    }

    let mut errors: Vec<_> = buckets
        .iter()
        .filter(|b| !b.is_finite() || **b <= 0.0)
        .map(|b| ValidationError::BucketValue(*b))
        .collect();

    if buckets.windows(2).any(|w| w[0] >= w[1]) {
        errors.push(ValidationError::BucketOrder);
    }
    errors
}
