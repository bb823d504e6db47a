//! Error types for the driftlens library.
//!
//! This module provides structured error handling for all driftlens
//! operations, preserving context so failures can be surfaced to callers
//! without losing where in the analysis pipeline they occurred.

use thiserror::Error;

/// Main result type for driftlens operations.
pub type Result<T> = std::result::Result<T, DriftError>;

/// Comprehensive error type for all driftlens operations.
#[derive(Error, Debug)]
pub enum DriftError {
    /// Structural mismatch between a schema and a dataset
    #[error("Schema error: {message}")]
    Schema {
        /// Error description
        message: String,
        /// Column or role that caused the error
        column: Option<String>,
    },

    /// Embedding vector length inconsistency
    #[error("Dimension mismatch in feature '{feature}': expected {expected}, found {found}")]
    DimensionMismatch {
        /// Embedding feature whose vectors disagree
        feature: String,
        /// Dimensionality established by earlier rows
        expected: usize,
        /// Dimensionality actually encountered
        found: usize,
        /// Row where the mismatch was detected
        row: Option<usize>,
    },

    /// Too few points for projection or clustering
    #[error("Insufficient data for {stage}: {actual} points, at least {minimum} required")]
    InsufficientData {
        /// Pipeline stage that rejected the input
        stage: String,
        /// Number of points actually available
        actual: usize,
        /// Minimum number of points the stage needs
        minimum: usize,
    },

    /// Operation attempted on a closed session
    #[error("Session is closed: {message}")]
    SessionClosed {
        /// Error description
        message: String,
    },

    /// Memory or compute budget exceeded; retry with a reduced sample
    #[error("Resource exhausted: {message}")]
    ResourceExhausted {
        /// Error description
        message: String,
        /// Type of resource exhausted
        resource: String,
        /// Configured limit, if one applies
        limit: Option<String>,
    },

    /// Computation cancelled cooperatively between pipeline stages
    #[error("Computation cancelled at stage '{stage}'")]
    Cancelled {
        /// Stage boundary where cancellation was observed
        stage: String,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        /// Error description
        message: String,
        /// Configuration field that caused the error
        field: Option<String>,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error description
        message: String,
        /// Underlying serialization error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal {
        /// Error description
        message: String,
        /// Additional context
        context: Option<String>,
    },
}

impl DriftError {
    /// Create a new schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            column: None,
        }
    }

    /// Create a new schema error tagged with the offending column
    pub fn schema_column(message: impl Into<String>, column: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            column: Some(column.into()),
        }
    }

    /// Create a new dimension mismatch error
    pub fn dimension_mismatch(
        feature: impl Into<String>,
        expected: usize,
        found: usize,
        row: Option<usize>,
    ) -> Self {
        Self::DimensionMismatch {
            feature: feature.into(),
            expected,
            found,
            row,
        }
    }

    /// Create a new insufficient data error with a minimum-size hint
    pub fn insufficient_data(stage: impl Into<String>, actual: usize, minimum: usize) -> Self {
        Self::InsufficientData {
            stage: stage.into(),
            actual,
            minimum,
        }
    }

    /// Create a new session closed error
    pub fn session_closed(message: impl Into<String>) -> Self {
        Self::SessionClosed {
            message: message.into(),
        }
    }

    /// Create a new resource exhaustion error
    pub fn resource_exhausted(message: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            message: message.into(),
            resource: resource.into(),
            limit: None,
        }
    }

    /// Create a new cancellation error
    pub fn cancelled(stage: impl Into<String>) -> Self {
        Self::Cancelled {
            stage: stage.into(),
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new configuration error with field context
    pub fn config_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            context: None,
        }
    }

    /// Add context to an existing error. Internal errors carry it in their
    /// context slot; serialization errors fold it into the message; other
    /// variants already name their own context and pass through unchanged.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        match &mut self {
            Self::Internal { context: ctx, .. } => *ctx = Some(context.into()),
            Self::Serialization { message, .. } => {
                *message = format!("{}: {message}", context.into());
            }
            _ => {}
        }
        self
    }

    /// True for errors a caller can meaningfully retry with reduced input
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. })
    }
}

impl From<serde_json::Error> for DriftError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: format!("JSON serialization failed: {err}"),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_yaml::Error> for DriftError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: format!("YAML serialization failed: {err}"),
            source: Some(Box::new(err)),
        }
    }
}

/// Result extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// Add static context to an error result
    fn context(self, msg: &'static str) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<DriftError>,
{
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }

    fn context(self, msg: &'static str) -> Result<T> {
        self.map_err(|e| e.into().with_context(msg))
    }
}
