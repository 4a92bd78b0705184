//! Common types and utilities shared across Sibyl crates.
//!
//! This crate defines the shared error type and the observability helpers
//! used throughout the Sibyl workspace. It is intentionally lightweight so
//! that every crate can depend on it without pulling in the browser or LLM
//! stacks.
//!
//! # Overview
//!
//! - [`observability`]: Centralised tracing/logging initialisation
//! - [`SibylError`] and [`Result`]: Shared error handling
//!
//! # Examples
//!
//! ```rust
//! use sibyl_common::{Result, SibylError};
//!
//! fn locate(found: bool) -> Result<()> {
//!     if found {
//!         Ok(())
//!     } else {
//!         Err(SibylError::RegionNotFound("div[data-subtree=\"aimc\"]".into()))
//!     }
//! }
//!
//! assert!(locate(true).is_ok());
//! assert!(locate(false).unwrap_err().is_fatal());
//! ```

pub mod observability;

/// Error types used across the Sibyl system.
#[derive(thiserror::Error, Debug)]
pub enum SibylError {
    /// The response region never appeared (or vanished) on the page.
    #[error("Response region not found: {0}")]
    RegionNotFound(String),

    /// A browser driver operation failed.
    #[error("Driver error: {0}")]
    Driver(#[from] anyhow::Error),

    /// The chat-completions provider failed or returned something unusable.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Configuration was incomplete or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A bounded wait exceeded its ceiling where that is an error.
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl SibylError {
    /// Whether this error must abort the current run rather than degrade.
    ///
    /// Only a missing response region and model/API failures are fatal; every
    /// other condition is expected to be absorbed by the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SibylError::RegionNotFound(_) | SibylError::Llm(_))
    }
}

/// Convenient alias for results that use [`SibylError`].
pub type Result<T> = std::result::Result<T, SibylError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classes() {
        assert!(SibylError::RegionNotFound("x".into()).is_fatal());
        assert!(SibylError::Llm("down".into()).is_fatal());
        assert!(!SibylError::Timeout("search".into()).is_fatal());
        assert!(!SibylError::Config("bad".into()).is_fatal());
    }

    #[test]
    fn driver_errors_wrap_anyhow() {
        let err: SibylError = anyhow::anyhow!("session closed").into();
        assert_eq!(err.to_string(), "Driver error: session closed");
    }
}
