//! Error types for managed execution
//!
//! [`ExecutorError`] covers everything that can go wrong while building a
//! component or submitting work to it. [`TaskError`] is what a handle reports
//! when a submitted task did not produce a value.

use std::any::Any;
use std::sync::Arc;

use strand_context::ContextError;

/// Result type for executor operations
pub type Result<T> = std::result::Result<T, ExecutorError>;

/// Errors raised while configuring components or submitting work
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    /// The pool is saturated and its bounded queue is full
    #[error("Task rejected: {reason}")]
    Rejected {
        /// Why the pool refused the task
        reason: String,
    },

    /// The component no longer accepts work
    #[error("Executor has been shut down")]
    Shutdown,

    /// Context configuration or capture failed
    #[error(transparent)]
    Context(#[from] ContextError),

    /// A runtime configuration record is invalid
    #[error("Invalid runtime configuration: {message}")]
    Config {
        /// What is wrong with the configuration
        message: String,
    },

    /// No component of the requested kind has that name
    #[error("No {kind} named '{name}'")]
    NotFound {
        /// Component kind, e.g. "executor"
        kind: &'static str,
        /// Requested name
        name: String,
    },

    /// The operating system refused to start a thread
    #[error("Failed to spawn thread: {message}")]
    Spawn {
        /// OS error description
        message: String,
    },
}

impl ExecutorError {
    /// Create a rejection error
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a lookup miss
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create a thread spawn error
    pub fn spawn(err: impl std::fmt::Display) -> Self {
        Self::Spawn {
            message: err.to_string(),
        }
    }

    /// Whether retrying the submission later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Why a submitted task produced no value
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    /// Cancelled before or while running
    #[error("Task was cancelled")]
    Cancelled,

    /// Accepted for later execution, then refused by the pool
    #[error("Task rejected: {reason}")]
    Rejected {
        /// Why the pool refused the task
        reason: String,
    },

    /// The task body panicked
    #[error("Task panicked: {message}")]
    Panicked {
        /// Panic payload rendered as text
        message: String,
    },

    /// A periodic task returned an error, ending its series
    #[error("Task failed: {source}")]
    Failed {
        /// The task's own error
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// Applying or restoring context failed
    #[error(transparent)]
    Context(#[from] ContextError),
}

impl TaskError {
    /// Wrap a task's own error
    pub fn failed(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Failed {
            source: Arc::new(err),
        }
    }

    /// Render a caught panic payload
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        Self::Panicked { message }
    }

    /// Whether the task was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<ExecutorError> for TaskError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::Context(context) => Self::Context(context),
            ExecutorError::Shutdown => Self::Cancelled,
            other => Self::Rejected {
                reason: other.to_string(),
            },
        }
    }
}
