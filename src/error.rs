//! Error handling for the bridge
//!
//! This module defines the crate-wide error type and a Result alias.
//! Device request failures (transport and protocol) are not represented here:
//! they travel as [`crate::device::RequestError`] and are surfaced through the
//! error classifier instead of being returned to callers.

use thiserror::Error;

/// Main error type for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Errors related to configuration loading or validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// A user supplied value that cannot be converted for the target
    #[error("{0}")]
    InvalidValue(String),

    /// A node references a device id that has no connection
    #[error("Missing device configuration for '{0}'")]
    MissingDevice(String),

    /// No node with the given id exists
    #[error("Unknown node '{0}'")]
    UnknownNode(String),

    /// Timers and request tasks need a tokio runtime
    #[error("No async runtime available: {0}")]
    Runtime(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<BridgeError>,
    },
}

impl BridgeError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        BridgeError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error came from user input rather than from the system
    pub fn is_application_error(&self) -> bool {
        match self {
            BridgeError::InvalidValue(_) => true,
            BridgeError::WithContext { source, .. } => source.is_application_error(),
            _ => false,
        }
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<BridgeError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| Into::<BridgeError>::into(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| Into::<BridgeError>::into(e).with_context(f()))
    }
}
