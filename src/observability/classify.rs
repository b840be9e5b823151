//! Status code classification for metric labels.

use std::fmt;

/// Coarse error bucket derived from an HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// 100–399.
    None,
    /// 400–499.
    ClientError,
    /// 500–599.
    ServerError,
    /// Outside the legal HTTP range.
    Invalid,
}

impl ErrorClass {
    pub const ALL: [ErrorClass; 4] = [
        ErrorClass::None,
        ErrorClass::ClientError,
        ErrorClass::ServerError,
        ErrorClass::Invalid,
    ];

    /// Label value used in metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorClass::None => "none",
            ErrorClass::ClientError => "client_error",
            ErrorClass::ServerError => "server_error",
            ErrorClass::Invalid => "invalid",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partition the status code space into an [`ErrorClass`].
pub const fn classify(status_code: i32) -> ErrorClass {
    match status_code {
        100..=399 => ErrorClass::None,
        400..=499 => ErrorClass::ClientError,
        500..=599 => ErrorClass::ServerError,
        _ => ErrorClass::Invalid,
    }
}
