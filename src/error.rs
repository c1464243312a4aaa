//! Error handling for pipe-sieve
//!
//! This module defines the error type shared by the feeder, the stages and
//! the stage backends, plus a Result alias.

use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum SieveError {
    /// Errors related to configuration loading or validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// A channel or a stage could not be created
    #[error("Failed to spawn stage: {0}")]
    Spawn(String),

    /// Waiting for a stage failed (the stage vanished or panicked)
    #[error("Failed to reap stage {stage}: {message}")]
    Reap { stage: String, message: String },

    /// A stage terminated but reported failure
    #[error("Stage {stage} exited unsuccessfully ({status})")]
    StageFailed { stage: String, status: String },

    /// Errors related to in-process channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<SieveError>,
    },
}

impl SieveError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        SieveError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error (or the error it wraps) is a broken pipe.
    ///
    /// A broken pipe on a forward means the downstream stage is already gone,
    /// so its own failure is the more useful thing to report.
    pub fn is_broken_pipe(&self) -> bool {
        match self {
            SieveError::Io(e) => e.kind() == std::io::ErrorKind::BrokenPipe,
            SieveError::WithContext { source, .. } => source.is_broken_pipe(),
            _ => false,
        }
    }
}

/// Result type alias for pipe-sieve operations
pub type Result<T> = std::result::Result<T, SieveError>;

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

impl<T> ResultExt<T> for std::io::Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| SieveError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| SieveError::Io(e).with_context(f()))
    }
}
