//! Unified error handling for the adaptive search core
//!
//! This module provides a centralized error type covering every failure
//! surface of the search pipeline, from synchronous input validation to
//! propagated collaborator failures.

use std::fmt;
use std::time::Duration;

/// Main error type for the adaptive search core
#[derive(Debug)]
pub enum RagError {
    /// Caller supplied input the pipeline cannot act on (for example an
    /// empty query). Rejected before any backend call.
    InvalidInput {
        /// Error message
        message: String,
    },

    /// A retrieval collaborator (embedding, vector, sparse, cache,
    /// completion) failed. Never retried inside the core; propagated as a
    /// terminal error for the current call.
    Backend {
        /// Which collaborator failed (for example "embedding", "vector-store")
        collaborator: String,
        /// Error message
        message: String,
    },

    /// Configuration-related errors
    Config {
        /// Error message
        message: String,
    },

    /// Quality scoring failed in a way the fallback assessment could not
    /// absorb
    QualityAssessment {
        /// Error message
        message: String,
    },

    /// Query rewrite generation failed; callers degrade to the
    /// strategy-rotation fallback
    Refinement {
        /// Error message
        message: String,
    },

    /// The caller's cancellation token fired mid-operation
    Cancelled {
        /// Operation name
        operation: String,
    },

    /// An operation exceeded its deadline. The core imposes no deadlines of
    /// its own; collaborator implementations that enforce one surface it
    /// through this variant so callers can classify it as recoverable.
    Timeout {
        /// Operation name
        operation: String,
        /// Timeout duration
        duration: Duration,
    },
}

impl fmt::Display for RagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RagError::InvalidInput { message } => {
                write!(f, "Invalid input: {message}")
            },
            RagError::Backend {
                collaborator,
                message,
            } => {
                write!(f, "Backend error from {collaborator}: {message}")
            },
            RagError::Config { message } => {
                write!(f, "Configuration error: {message}")
            },
            RagError::QualityAssessment { message } => {
                write!(f, "Quality assessment error: {message}")
            },
            RagError::Refinement { message } => {
                write!(f, "Refinement error: {message}")
            },
            RagError::Cancelled { operation } => {
                write!(f, "Operation '{operation}' was cancelled")
            },
            RagError::Timeout {
                operation,
                duration,
            } => {
                write!(f, "Operation '{operation}' timed out after {duration:?}")
            },
        }
    }
}

impl std::error::Error for RagError {}

impl From<serde_json::Error> for RagError {
    fn from(err: serde_json::Error) -> Self {
        RagError::Backend {
            collaborator: "serialization".to_string(),
            message: err.to_string(),
        }
    }
}

/// Convenient Result type alias
pub type Result<T> = std::result::Result<T, RagError>;

/// Error severity levels for logging and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Warning - something unexpected but recoverable
    Warning,
    /// Error - operation failed but system can continue
    Error,
    /// Critical - system integrity compromised
    Critical,
}

impl RagError {
    /// Get the severity level of this error
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RagError::InvalidInput { .. } => ErrorSeverity::Warning,
            RagError::Backend { .. } => ErrorSeverity::Error,
            RagError::Config { .. } => ErrorSeverity::Critical,
            RagError::QualityAssessment { .. } => ErrorSeverity::Warning,
            RagError::Refinement { .. } => ErrorSeverity::Warning,
            RagError::Cancelled { .. } => ErrorSeverity::Warning,
            RagError::Timeout { .. } => ErrorSeverity::Warning,
        }
    }

    /// Check if this error is recoverable by the caller
    pub fn is_recoverable(&self) -> bool {
        matches!(self.severity(), ErrorSeverity::Warning)
    }

    /// Get error category for metrics/monitoring
    pub fn category(&self) -> &'static str {
        match self {
            RagError::InvalidInput { .. } => "invalid_input",
            RagError::Backend { .. } => "backend",
            RagError::Config { .. } => "config",
            RagError::QualityAssessment { .. } => "quality_assessment",
            RagError::Refinement { .. } => "refinement",
            RagError::Cancelled { .. } => "cancelled",
            RagError::Timeout { .. } => "timeout",
        }
    }
}

/// Creates a backend error with a collaborator name and message
#[macro_export]
macro_rules! backend_error {
    ($collaborator:expr, $msg:expr) => {
        $crate::RagError::Backend {
            collaborator: $collaborator.to_string(),
            message: $msg.to_string(),
        }
    };
    ($collaborator:expr, $fmt:expr, $($arg:tt)*) => {
        $crate::RagError::Backend {
            collaborator: $collaborator.to_string(),
            message: format!($fmt, $($arg)*),
        }
    };
}
