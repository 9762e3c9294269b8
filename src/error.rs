//! Unified error type.

use thiserror::Error;

/// The error type returned by strata's fallible operations.
///
/// Application-level failures (404, 422, etc.) are written to the
/// [`Response`](crate::Response) as status codes, not returned as `Error`s.
/// Programming errors such as an out-of-range status code panic instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Writing a response body or finishing an encoder failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// A value could not be serialised for [`Response::write_json`](crate::Response::write_json).
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// A configured header value contains bytes that are not allowed in HTTP headers.
    #[error("invalid header value for `{name}`: {value:?}")]
    InvalidHeaderValue { name: &'static str, value: String },

    /// An environment variable could not be parsed into its config field.
    #[error("invalid value {value:?} for {key}: {reason}")]
    Config { key: &'static str, value: String, reason: String },

    /// The global tracing subscriber could not be installed.
    #[error("logging: {0}")]
    Logging(String),
}
