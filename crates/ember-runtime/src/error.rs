//! Top-level error type embedders of this crate see.

/// Errors surfaced by [`crate::EmberRuntime`]: everything below it (the VM,
/// the HTTP server, config loading) has its own error type; this just
/// unifies them at the one seam an embedder actually calls through.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Reading a config file or writing runtime output failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// `RuntimeOptions` could not be parsed from its TOML source.
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    /// The VM raised a resource-limit or embedder-misuse error outside the
    /// normal `PHPException` path (stack overflow, type confusion at a
    /// native boundary).
    #[error("vm error: {0}")]
    Vm(#[from] ember_core::VmError),

    /// An uncaught exception escaped `Vm::run`/`Vm::call`.
    #[error("uncaught exception: {0}")]
    Exception(String),

    /// The HTTP server failed (bind, accept, malformed request past what
    /// the handler could recover from).
    #[error("http error: {0}")]
    Http(#[from] ember_http::HttpError),
}

impl From<ember_core::PHPException> for RuntimeError {
    fn from(exc: ember_core::PHPException) -> Self {
        RuntimeError::Exception(exc.value.message())
    }
}

/// Result type for [`crate::EmberRuntime`] operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
