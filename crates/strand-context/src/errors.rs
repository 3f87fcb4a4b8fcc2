//! Error types for context capture, configuration and propagation
//!
//! Configuration errors (`UnknownFacet`, `DuplicateFacet`, `OverlappingFacet`)
//! are raised while a registry or propagator is being built and never deferred
//! to task run time. The remaining variants are per-task and never leak into
//! other tasks' contexts.

use crate::facet::FacetKey;

/// Result type for context operations
pub type Result<T> = std::result::Result<T, ContextError>;

/// Errors produced by the propagation machinery
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// A configuration names a facet with no registered provider
    #[error("Unknown facet: {key}")]
    UnknownFacet {
        /// The unresolvable facet key
        key: FacetKey,
    },

    /// Two providers were registered under the same key
    #[error("Duplicate facet: {key}")]
    DuplicateFacet {
        /// The key registered twice
        key: FacetKey,
    },

    /// A configuration lists the same key in more than one disposition set
    #[error("Facet {key} appears in more than one of propagated/cleared/unchanged")]
    OverlappingFacet {
        /// The key listed more than once
        key: FacetKey,
    },

    /// A provider failed to capture the submitting thread's state
    #[error("Failed to capture facet {key}: {message}")]
    Capture {
        /// Facet whose capture failed
        key: FacetKey,
        /// Provider supplied description
        message: String,
    },

    /// A provider failed to apply a snapshot on the worker thread
    #[error("Failed to apply facet {key}: {message}")]
    Apply {
        /// Facet whose apply failed
        key: FacetKey,
        /// Provider supplied description
        message: String,
    },

    /// A provider failed to restore the worker thread's prior state
    #[error("Failed to restore facet {key}: {message}")]
    Restore {
        /// Facet whose restore failed
        key: FacetKey,
        /// Provider supplied description
        message: String,
    },

    /// Free-form provider failure not tied to a single phase
    #[error("Context provider error: {message}")]
    Provider {
        /// Provider supplied description
        message: String,
    },
}

impl ContextError {
    /// Create an unknown facet error
    pub fn unknown_facet(key: impl Into<FacetKey>) -> Self {
        Self::UnknownFacet { key: key.into() }
    }

    /// Create a duplicate facet error
    pub fn duplicate_facet(key: impl Into<FacetKey>) -> Self {
        Self::DuplicateFacet { key: key.into() }
    }

    /// Create an overlapping facet error
    pub fn overlapping_facet(key: impl Into<FacetKey>) -> Self {
        Self::OverlappingFacet { key: key.into() }
    }

    /// Create a capture error
    pub fn capture(key: impl Into<FacetKey>, message: impl Into<String>) -> Self {
        Self::Capture {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create an apply error
    pub fn apply(key: impl Into<FacetKey>, message: impl Into<String>) -> Self {
        Self::Apply {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a restore error
    pub fn restore(key: impl Into<FacetKey>, message: impl Into<String>) -> Self {
        Self::Restore {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a generic provider error
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    /// Whether this error comes from configuration rather than a running task
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownFacet { .. } | Self::DuplicateFacet { .. } | Self::OverlappingFacet { .. }
        )
    }

    /// Whether this error reports a failed restoration
    pub fn is_restore(&self) -> bool {
        matches!(self, Self::Restore { .. })
    }

    /// The facet this error concerns, if any
    pub fn facet(&self) -> Option<&FacetKey> {
        match self {
            Self::UnknownFacet { key }
            | Self::DuplicateFacet { key }
            | Self::OverlappingFacet { key }
            | Self::Capture { key, .. }
            | Self::Apply { key, .. }
            | Self::Restore { key, .. } => Some(key),
            Self::Provider { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(ContextError::unknown_facet("a").is_configuration());
        assert!(ContextError::duplicate_facet("a").is_configuration());
        assert!(ContextError::overlapping_facet("a").is_configuration());
        assert!(!ContextError::restore("a", "boom").is_configuration());
        assert!(ContextError::restore("a", "boom").is_restore());
        assert_eq!(ContextError::provider("x").facet(), None);
        assert_eq!(
            ContextError::apply("security", "gone").facet(),
            Some(&FacetKey::from("security"))
        );
    }

    #[test]
    fn test_error_display() {
        let err = ContextError::restore("naming", "thread local destroyed");
        assert_eq!(
            err.to_string(),
            "Failed to restore facet naming: thread local destroyed"
        );
    }
}
