//! Error types shared across the pipeline.
//!
//! Per-request failures never unwind through the middleware chain. A middleware records
//! them on the response with [`Response::set_error`](crate::Response::set_error) and the
//! status that should be sent; only configuration problems surface as `Err` from
//! [`AppBuilder::build`](crate::AppBuilder::build).

use http::StatusCode;
use std::error::Error;
use thiserror::Error;

/// The terminal error carried by a response, the same boxed shape handlers return.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Errors raised while assembling an [`App`](crate::App); all of them are fatal at startup.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("too many middlewares: {count} registered, the limit is {max}")]
    TooManyMiddlewares { count: usize, max: usize },

    #[error("helper `{name}` registered twice")]
    DuplicateHelper { name: String },

    #[error("csrf {field} of {len} bytes is too short, at least {min} are required")]
    WeakCsrfConfig { field: &'static str, len: usize, min: usize },

    #[error("randomness source unusable: {source}")]
    Randomness {
        #[from]
        source: rand::Error,
    },
}

/// Client input errors from the typed form accessors of [`Request`](crate::Request).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    #[error("{field} is empty")]
    Empty { field: String },

    #[error("len({field}) should range in: [{min}, {max}]")]
    Length { field: String, min: usize, max: usize },

    #[error("{field} is not a valid number: {reason}")]
    InvalidNumber { field: String, reason: String },
}

impl FormError {
    pub fn empty(field: impl Into<String>) -> Self {
        Self::Empty { field: field.into() }
    }

    pub fn length(field: impl Into<String>, min: usize, max: usize) -> Self {
        Self::Length { field: field.into(), min, max }
    }

    pub fn invalid_number(field: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidNumber { field: field.into(), reason: reason.to_string() }
    }

    /// All form errors are the client's fault.
    pub fn status(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }
}

/// Failures of the anti-forgery check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CsrfError {
    #[error("csrf: no csrf token presented")]
    Missing,

    #[error("csrf: malformed token")]
    Malformed,

    #[error("csrf: empty salt")]
    EmptySalt,

    #[error("csrf: token mismatch")]
    Mismatch,

    #[error("csrf: no session on the request context")]
    NoSession,

    #[error("csrf: randomness source failed: {0}")]
    Randomness(String),
}

impl CsrfError {
    pub fn status(&self) -> StatusCode {
        match self {
            CsrfError::Missing => StatusCode::BAD_REQUEST,
            CsrfError::Malformed | CsrfError::EmptySalt | CsrfError::Mismatch => StatusCode::FORBIDDEN,
            CsrfError::NoSession | CsrfError::Randomness(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Errors from the key/value cache boundary.
///
/// Only [`CacheError::Miss`] is expected during normal operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache miss")]
    Miss,

    #[error("cache unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("cache returned malformed data: {reason}")]
    Malformed { reason: String },
}

impl CacheError {
    pub fn unavailable(reason: impl ToString) -> Self {
        Self::Unavailable { reason: reason.to_string() }
    }

    pub fn malformed(reason: impl ToString) -> Self {
        Self::Malformed { reason: reason.to_string() }
    }

    #[inline]
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::Miss)
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session: no cache installed on the request context")]
    NoCache,

    #[error("session: cache error: {source}")]
    Cache {
        #[from]
        source: CacheError,
    },

    #[error("session: invalid session data: {source}")]
    Codec {
        #[from]
        source: serde_json::Error,
    },

    #[error("session: randomness source failed: {source}")]
    Randomness {
        #[from]
        source: rand::Error,
    },
}
