//! Errors surfaced by request parsing, response writing and the accept
//! loop (spec §7 style: a `thiserror`-derived enum, one variant per seam).

/// Failures the HTTP server can report to its embedder.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The underlying socket failed (accept, read or write).
    #[error("http io error: {0}")]
    Io(#[from] std::io::Error),

    /// The request line or a header line did not parse.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// `Content-Length` was present but not a valid, representable integer.
    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),

    /// No route matched the request's method and path.
    #[error("no route for {method} {path}")]
    NotFound {
        /// Request method.
        method: String,
        /// Request path.
        path: String,
    },
}

/// Result type for HTTP operations.
pub type HttpResult<T> = Result<T, HttpError>;
