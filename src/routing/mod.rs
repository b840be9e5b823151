//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path)
//!     → normalizer.rs (strip query, split segments)
//!     → match against compiled templates
//!     → Return: template label or UNMATCHED_ROUTE
//!
//! Template Compilation (at startup):
//!     RoutesConfig.templates
//!     → Parse placeholders ({id}, {uuid}, {name}, {*rest})
//!     → Freeze as immutable RouteNormalizer
//! ```
//!
//! # Design Decisions
//! - Templates compiled at startup, immutable at runtime
//! - Deterministic: same input always yields the same label
//! - Bounded: raw paths never leak into metric labels

pub mod normalizer;

pub use normalizer::{RouteLabel, RouteNormalizer, RouteTemplate, TemplateError, UNMATCHED_ROUTE};
