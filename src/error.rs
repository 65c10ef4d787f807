//! Error handling for media-bridge
//!
//! This module defines the error type and a Result alias used throughout
//! the crate. Only construction-time and lookup-time failures are ever
//! returned to callers; anomalies seen on native callback threads are
//! logged by the dispatcher instead.

use thiserror::Error;

/// Main error type for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The textual graph description could not be realized by the engine
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    /// A named element is absent from the graph
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// A callback referenced an id that is no longer registered
    #[error("Unknown id {0}")]
    UnknownId(u64),

    /// A required native plugin is not available
    #[error("Required plugin {0} not found")]
    PluginNotFound(String),

    /// Errors reported by the native engine
    #[error("Engine error: {0}")]
    Engine(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

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

    /// The innermost error, with all context layers stripped
    pub fn root(&self) -> &BridgeError {
        match self {
            BridgeError::WithContext { source, .. } => source.root(),
            other => other,
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

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
