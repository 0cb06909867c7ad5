//! Logger native implementations.
//!
//! Thin wrappers over [`tracing`] so `std:logger` calls land in whatever
//! subscriber the embedding binary installed, rather than writing directly
//! to stdout/stderr.

/// Log a debug message.
pub fn debug(message: &str) {
    tracing::debug!(target: "ember::script", "{message}");
}

/// Log an info message.
pub fn info(message: &str) {
    tracing::info!(target: "ember::script", "{message}");
}

/// Log a warning message.
pub fn warn(message: &str) {
    tracing::warn!(target: "ember::script", "{message}");
}

/// Log an error message.
pub fn error(message: &str) {
    tracing::error!(target: "ember::script", "{message}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_at_every_level_does_not_panic() {
        debug("debug msg");
        info("hello world");
        warn("warning msg");
        error("error msg");
    }
}
