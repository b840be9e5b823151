//! Route normalization.
//!
//! # Responsibilities
//! - Map a raw request path onto one of a finite set of route templates
//! - Collapse per-resource segments (numeric IDs, UUIDs, opaque tokens)
//! - Fall back to a single catch-all label for anything unrecognised
//!
//! # Design Decisions
//! - Templates compiled at startup, immutable at runtime
//! - No regex in hot path (segment comparison only)
//! - First template in declaration order wins
//! - The label set is exactly `templates ∪ {UNMATCHED_ROUTE}`

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::config::RoutesConfig;

/// Label used for every path no template matches.
pub const UNMATCHED_ROUTE: &str = "/unmatched";

/// Paths longer than this are never matched.
pub const MAX_PATH_LEN: usize = 2048;

/// Hex tokens at least this long are treated as identifiers.
const MIN_HEX_TOKEN_LEN: usize = 16;

/// A normalized, bounded-cardinality route label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteLabel(Arc<str>);

impl RouteLabel {
    fn new(label: &str) -> Self {
        Self(Arc::from(label))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if this is the catch-all label.
    pub fn is_unmatched(&self) -> bool {
        &*self.0 == UNMATCHED_ROUTE
    }
}

impl fmt::Display for RouteLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RouteLabel {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Error returned for a malformed route template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template must start with '/'")]
    MissingLeadingSlash,

    #[error("placeholder name must not be empty")]
    EmptyPlaceholder,

    #[error("unbalanced brace in segment '{0}'")]
    UnbalancedBrace(String),

    #[error("'{{*rest}}' placeholder must be the last segment")]
    RestNotLast,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// `{id}`: numeric ID or long hex token.
    Id,
    /// `{uuid}`
    Uuid,
    /// `{anything}`: any single segment.
    Param,
    /// `{*rest}`: one or more trailing segments.
    Rest,
}

impl Segment {
    fn matches(&self, segment: &str) -> bool {
        match self {
            Segment::Literal(expected) => expected == segment,
            Segment::Id => is_numeric_id(segment) || is_hex_token(segment),
            Segment::Uuid => is_uuid(segment),
            Segment::Param | Segment::Rest => true,
        }
    }
}

/// A compiled route template such as `/albums/{id}/tracks`.
#[derive(Debug, Clone)]
pub struct RouteTemplate {
    label: RouteLabel,
    segments: Vec<Segment>,
}

impl RouteTemplate {
    /// Compile a template string.
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        if !template.starts_with('/') {
            return Err(TemplateError::MissingLeadingSlash);
        }

        let raw: Vec<&str> = split_segments(template).collect();
        let mut segments = Vec::with_capacity(raw.len());
        for (i, part) in raw.iter().enumerate() {
            let segment = parse_segment(part)?;
            if segment == Segment::Rest && i + 1 != raw.len() {
                return Err(TemplateError::RestNotLast);
            }
            segments.push(segment);
        }

        Ok(Self {
            label: RouteLabel::new(template),
            segments,
        })
    }

    /// Label emitted when this template matches.
    pub fn label(&self) -> &RouteLabel {
        &self.label
    }

    fn matches(&self, path: &[&str]) -> bool {
        if let Some(Segment::Rest) = self.segments.last() {
            let fixed = self.segments.len() - 1;
            return path.len() > fixed
                && self.segments[..fixed]
                    .iter()
                    .zip(path)
                    .all(|(s, p)| s.matches(p));
        }

        self.segments.len() == path.len()
            && self.segments.iter().zip(path).all(|(s, p)| s.matches(p))
    }
}

fn parse_segment(part: &str) -> Result<Segment, TemplateError> {
    let Some(inner) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) else {
        if part.contains('{') || part.contains('}') {
            return Err(TemplateError::UnbalancedBrace(part.to_string()));
        }
        return Ok(Segment::Literal(part.to_string()));
    };

    if inner.contains('{') || inner.contains('}') {
        return Err(TemplateError::UnbalancedBrace(part.to_string()));
    }

    match inner {
        "" | "*" => Err(TemplateError::EmptyPlaceholder),
        "id" => Ok(Segment::Id),
        "uuid" => Ok(Segment::Uuid),
        name if name.starts_with('*') => Ok(Segment::Rest),
        _ => Ok(Segment::Param),
    }
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Maps raw request paths to bounded route labels.
#[derive(Debug, Clone)]
pub struct RouteNormalizer {
    templates: Vec<RouteTemplate>,
    unmatched: RouteLabel,
}

impl RouteNormalizer {
    /// Compile a normalizer from template strings.
    pub fn new<I, T>(templates: I) -> Result<Self, TemplateError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let templates = templates
            .into_iter()
            .map(|t| RouteTemplate::parse(t.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            templates,
            unmatched: RouteLabel::new(UNMATCHED_ROUTE),
        })
    }

    /// Compile the templates declared in configuration.
    pub fn from_config(config: &RoutesConfig) -> Result<Self, TemplateError> {
        Self::new(&config.templates)
    }

    /// Normalize a raw path (query string and fragment are ignored).
    ///
    /// Never fails: anything no template recognises maps to [`UNMATCHED_ROUTE`].
    pub fn normalize(&self, path: &str) -> RouteLabel {
        let path = path
            .split(['?', '#'])
            .next()
            .unwrap_or_default();

        if path.len() > MAX_PATH_LEN {
            return self.unmatched.clone();
        }

        let segments: Vec<&str> = split_segments(path).collect();
        self.templates
            .iter()
            .find(|t| t.matches(&segments))
            .map(|t| t.label.clone())
            .unwrap_or_else(|| self.unmatched.clone())
    }

    /// Every label `normalize` can return.
    pub fn labels(&self) -> impl Iterator<Item = &RouteLabel> {
        self.templates
            .iter()
            .map(RouteTemplate::label)
            .chain(std::iter::once(&self.unmatched))
    }
}

/// A segment made only of ASCII digits.
pub fn is_numeric_id(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

/// A UUID in any of the textual forms `uuid` accepts.
pub fn is_uuid(segment: &str) -> bool {
    Uuid::try_parse(segment).is_ok()
}

/// A long hexadecimal token such as an object hash.
pub fn is_hex_token(segment: &str) -> bool {
    segment.len() >= MIN_HEX_TOKEN_LEN && segment.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> RouteNormalizer {
        RouteNormalizer::new([
            "/",
            "/health",
            "/albums/{id}",
            "/albums/{id}/tracks",
            "/orders/{uuid}",
            "/users/{name}/profile",
            "/static/{*path}",
        ])
        .unwrap()
    }

    #[test]
    fn test_literal_routes() {
        let n = normalizer();
        assert_eq!(n.normalize("/").as_str(), "/");
        assert_eq!(n.normalize("").as_str(), "/");
        assert_eq!(n.normalize("/health").as_str(), "/health");
        assert_eq!(n.normalize("/health/").as_str(), "/health");
        assert_eq!(n.normalize("//health").as_str(), "/health");
        assert_eq!(n.normalize("/health?verbose=1").as_str(), "/health");
    }

    #[test]
    fn test_identifiers_collapse() {
        let n = normalizer();
        assert_eq!(n.normalize("/albums/42").as_str(), "/albums/{id}");
        assert_eq!(n.normalize("/albums/9000/tracks").as_str(), "/albums/{id}/tracks");
        assert_eq!(
            n.normalize("/albums/deadbeefdeadbeef").as_str(),
            "/albums/{id}"
        );
        assert_eq!(
            n.normalize("/orders/67e55044-10b1-426f-9247-bb680e5fe0c8").as_str(),
            "/orders/{uuid}"
        );
        assert_eq!(n.normalize("/users/alice/profile").as_str(), "/users/{name}/profile");
    }

    #[test]
    fn test_typed_placeholders_reject_other_segments() {
        let n = normalizer();
        assert!(n.normalize("/albums/abc").is_unmatched());
        assert!(n.normalize("/orders/42").is_unmatched());
    }

    #[test]
    fn test_rest_placeholder() {
        let n = normalizer();
        assert_eq!(n.normalize("/static/css/site.css").as_str(), "/static/{*path}");
        assert!(n.normalize("/static").is_unmatched());
    }

    #[test]
    fn test_unknown_and_malformed_paths() {
        let n = normalizer();
        assert!(n.normalize("/nope").is_unmatched());
        assert!(n.normalize("%%%").is_unmatched());
        assert!(n.normalize("/albums/1/tracks/2/extra").is_unmatched());
        let long = format!("/albums/{}", "1".repeat(MAX_PATH_LEN));
        assert!(n.normalize(&long).is_unmatched());
    }

    #[test]
    fn test_first_match_wins() {
        let n = RouteNormalizer::new(["/items/{id}", "/items/{any}"]).unwrap();
        assert_eq!(n.normalize("/items/7").as_str(), "/items/{id}");
        assert_eq!(n.normalize("/items/x").as_str(), "/items/{any}");
    }

    #[test]
    fn test_labels_include_catch_all() {
        let labels: Vec<_> = normalizer().labels().map(|l| l.to_string()).collect();
        assert_eq!(labels.len(), 8);
        assert_eq!(labels.last().map(String::as_str), Some(UNMATCHED_ROUTE));
    }

    #[test]
    fn test_template_errors() {
        assert_eq!(
            RouteTemplate::parse("albums").unwrap_err(),
            TemplateError::MissingLeadingSlash
        );
        assert_eq!(
            RouteTemplate::parse("/albums/{}").unwrap_err(),
            TemplateError::EmptyPlaceholder
        );
        assert_eq!(
            RouteTemplate::parse("/albums/{id").unwrap_err(),
            TemplateError::UnbalancedBrace("{id".into())
        );
        assert_eq!(
            RouteTemplate::parse("/a/{*rest}/b").unwrap_err(),
            TemplateError::RestNotLast
        );
    }
}
