//! Core error types for redfishd.
//!
//! All errors are explicit and typed; nothing here panics.

use std::path::PathBuf;

use thiserror::Error;

/// Core error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read file '{path}': {reason}")]
    FileReadFailed { path: PathBuf, reason: String },

    #[error("TOML parse error: {reason}")]
    TomlParseFailed { reason: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a file read error.
    pub fn file_read_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a TOML parse error.
    pub fn toml_parse_failed(reason: impl Into<String>) -> Self {
        Self::TomlParseFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_path() {
        let err = Error::file_read_failed("/etc/redfishd.toml", "permission denied");
        let text = err.to_string();
        assert!(text.contains("/etc/redfishd.toml"));
        assert!(text.contains("permission denied"));
    }

    #[test]
    fn test_invalid_config_display() {
        let err = Error::invalid_config("waiter inbox capacity must be non-zero");
        assert!(err.to_string().contains("non-zero"));
    }
}
