//! Domain error model.

use thiserror::Error;

use crate::id::AggregateId;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, state transitions). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input, out-of-range price).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The referenced resource does not exist or has been deleted.
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. stale version, duplicate registration).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The operation is not allowed from the aggregate's current state.
    #[error("invalid state transition: current '{current}', requested '{requested}'")]
    InvalidStateTransition { current: String, requested: String },

    /// A booking was already converted; carries the repair it was converted into.
    #[error("already converted into repair {repair_id}")]
    AlreadyConverted { repair_id: AggregateId },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn invalid_transition(current: impl Into<String>, requested: impl Into<String>) -> Self {
        Self::InvalidStateTransition {
            current: current.into(),
            requested: requested.into(),
        }
    }

    pub fn already_converted(repair_id: AggregateId) -> Self {
        Self::AlreadyConverted { repair_id }
    }
}

/// Reject text longer than `max` characters.
pub fn ensure_max_len(field: &str, value: &str, max: usize) -> DomainResult<()> {
    if value.chars().count() > max {
        return Err(DomainError::validation(format!(
            "{field} exceeds {max} characters"
        )));
    }
    Ok(())
}

/// Reject blank text, then apply the length bound.
pub fn ensure_present(field: &str, value: &str, max: usize) -> DomainResult<()> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(format!("{field} cannot be empty")));
    }
    ensure_max_len(field, value, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_message_names_both_states() {
        let err = DomainError::invalid_transition("sold", "loaned");
        assert_eq!(
            err.to_string(),
            "invalid state transition: current 'sold', requested 'loaned'"
        );
    }

    #[test]
    fn length_bounds_count_characters_not_bytes() {
        assert!(ensure_max_len("brand", "èèè", 3).is_ok());
        assert!(ensure_max_len("brand", "èèèè", 3).is_err());
        assert!(matches!(
            ensure_present("code", "   ", 10),
            Err(DomainError::Validation(_))
        ));
    }
}
