//! Inbound request view.
//!
//! # Responsibilities
//! - Capture method, path, URL, scheme and host at request arrival
//! - Reconstruct the absolute URL for server-side requests (origin-form URIs)
//!
//! # Design Decisions
//! - Read-only snapshot; the request itself is handed to the handler untouched
//! - Scheme defaults to `http` when the URI carries none
//! - Host comes from the URI authority, else the `Host` header

use axum::http::{header, Request};
use url::Url;

/// Read-only description of one inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    method: String,
    path: String,
    url: String,
    scheme: String,
    host: Option<String>,
}

impl RequestDescriptor {
    /// Capture the request attributes the interceptor records.
    pub fn from_request<B>(req: &Request<B>) -> Self {
        let uri = req.uri();
        let scheme = uri.scheme_str().unwrap_or("http").to_ascii_lowercase();
        let authority = uri.authority().map(|a| a.as_str().to_string()).or_else(|| {
            req.headers()
                .get(header::HOST)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string)
        });
        let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());

        let parsed = authority
            .as_deref()
            .and_then(|a| Url::parse(&format!("{scheme}://{a}{path_and_query}")).ok());

        let (url, host) = match parsed {
            Some(url) => {
                let host = url.host_str().map(str::to_string);
                (url.to_string(), host)
            }
            None => (path_and_query.to_string(), None),
        };

        Self {
            method: req.method().as_str().to_string(),
            path: uri.path().to_string(),
            url,
            scheme,
            host,
        }
    }

    /// Upper-case HTTP method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Raw request path, without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Absolute URL when the host is known, else the path and query.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// `http` or `https`.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host from the URI authority or the `Host` header.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }
}
