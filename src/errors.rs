//! Error taxonomy for the payment daemon
//!
//! Errors are split by what the caller can do about them: bad input
//! (`Validation`), a missing record (`NotFound`), a write that collided with
//! an existing record (`Duplicate`), a failed collaborator call
//! (`Dependency`, retryable) and caller-side cancellation (`Cancelled`,
//! retryable). A settlement that fails the business rules is NOT an error:
//! it is reported as a rejection acknowledgement (see `payment::settlement`).

/// Daemon-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error returned by the payment services and stores.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller-supplied input failed shape validation.
    #[error("invalid {field}: {reason}")]
    Validation {
        field: &'static str,
        reason: String,
    },

    /// A referenced record does not exist.
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// A write collided with an existing unique record.
    #[error("{entity} '{id}' already exists")]
    Duplicate { entity: &'static str, id: String },

    /// A collaborator (store, key derivation, remote counterpart) failed.
    /// May be transient; no partial state is left behind on this path.
    #[error("{op} failed for '{subject}'")]
    Dependency {
        op: &'static str,
        subject: String,
        #[source]
        source: anyhow::Error,
    },

    /// The caller's cancellation token fired before the operation committed.
    #[error("operation cancelled before completion")]
    Cancelled,
}

impl Error {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Error::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn duplicate(entity: &'static str, id: impl Into<String>) -> Self {
        Error::Duplicate {
            entity,
            id: id.into(),
        }
    }

    /// Wrap a lower-layer failure with the operation that was running and
    /// the record it was running for.
    pub fn dependency(
        op: &'static str,
        subject: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Error::Dependency {
            op,
            subject: subject.into(),
            source: source.into(),
        }
    }

    /// Whether the caller may retry the whole operation.
    ///
    /// Only dependency failures and cancellations are retryable; validation,
    /// not-found and duplicate outcomes are terminal for that request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Dependency { .. } | Error::Cancelled)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::dependency("store", "abc", anyhow::anyhow!("io")).is_retryable());
        assert!(Error::Cancelled.is_retryable());
        assert!(!Error::validation("paymentID", "must not be empty").is_retryable());
        assert!(!Error::not_found("invoice", "abc").is_retryable());
        assert!(!Error::duplicate("script key", "76a914").is_retryable());
    }

    #[test]
    fn test_dependency_preserves_source() {
        let err = Error::dependency("decode", "abc123", anyhow::anyhow!("bad byte"));
        let source = std::error::Error::source(&err).expect("source retained");
        assert!(source.to_string().contains("bad byte"));
    }
}
