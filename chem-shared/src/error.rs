//! # Error Types
//!
//! Unified error handling for the orchestration core. Mirrors the error
//! taxonomy fixed by the task-and-service engine design: input resolution
//! failures are non-fatal and travel alongside a response, task-execution
//! failures are logged and folded into the nanny's per-queue_id error map,
//! and duplicate-conflict / unknown-enum-value / adapter-construction
//! failures are fatal.

use thiserror::Error;

/// Result type used throughout the orchestration core.
pub type OrchestrationResult<T> = Result<T, OrchestrationError>;

/// Errors raised by the store contract (§6.1).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate hash_index on insert: {table} already contains {hash_index}")]
    DuplicateHashIndex { table: String, hash_index: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("backend store error: {0}")]
    Backend(String),
}

/// Errors raised by a backend adapter (§4.3, §6.3).
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("unknown queue_type selector: {0}")]
    UnknownQueueType(String),

    #[error("adapter dependency unavailable: {0}")]
    DependencyMissing(String),

    #[error("submit failed: {0}")]
    SubmitFailed(String),

    #[error("poll failed: {0}")]
    PollFailed(String),
}

/// The crate-wide error enum for the orchestration core.
///
/// Follows the client-facing error shape used across the wider system: a
/// flat enum with `#[from]` conversions for the errors of collaborating
/// layers, plus a handful of orchestration-specific fatal variants.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown enum value for {field}: {value}")]
    UnknownEnumValue { field: String, value: String },

    #[error(
        "duplicate conflict: {table} reported a duplicate for a record the output parser believed new (queue_id={queue_id})"
    )]
    DuplicateConflict { table: String, queue_id: String },

    #[error("unknown procedure parser: {0}")]
    UnknownProcedure(String),

    #[error("unknown service kind: {0}")]
    UnknownServiceKind(String),

    #[error("molecule resolution failed for {reference}: {reason}")]
    MoleculeResolution { reference: String, reason: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestrationError {
    /// Whether this error represents one of the two classes declared fatal
    /// by the error-handling design: an unknown enum selector, or a
    /// duplicate-insert conflict the output parser was not prepared for.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OrchestrationError::UnknownEnumValue { .. }
                | OrchestrationError::DuplicateConflict { .. }
                | OrchestrationError::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_enum_value_is_fatal() {
        let err = OrchestrationError::UnknownEnumValue {
            field: "duplicate_id".to_string(),
            value: "bogus".to_string(),
        };
        assert!(err.is_fatal());
    }

    #[test]
    fn duplicate_conflict_is_fatal() {
        let err = OrchestrationError::DuplicateConflict {
            table: "results".to_string(),
            queue_id: "q-1".to_string(),
        };
        assert!(err.is_fatal());
    }

    #[test]
    fn molecule_resolution_is_not_fatal() {
        let err = OrchestrationError::MoleculeResolution {
            reference: "mol_A".to_string(),
            reason: "not found".to_string(),
        };
        assert!(!err.is_fatal());
    }

    #[test]
    fn display_duplicate_conflict() {
        let err = OrchestrationError::DuplicateConflict {
            table: "procedures".to_string(),
            queue_id: "q-7".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("procedures"));
        assert!(msg.contains("q-7"));
    }
}
