//! Error types for the reconciliation engine
//!
//! Taxonomy:
//! - [`RemoteError`]: a failure reported by the remote system, classified by
//!   [`RemoteErrorKind`]; only `StaleToken` is retried
//! - [`BrokerError`]: outcome of a token-gated call after retries
//! - [`ReconcileError`]: what a reconciliation reports to its caller
//! - [`ConfigError`]: invalid or unparsable configuration

use crate::remote::EntityId;
use settle_record::{Operation, ValidationError};
use std::fmt::{self, Display, Formatter};

/// Classification of remote failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// Change token was stale: the entity was mutated concurrently
    StaleToken,
    /// Entity or item does not exist
    NotFound,
    /// Request rejected as malformed or invalid
    Validation,
    /// Caller lacks permission
    Permission,
    /// Anything else
    Other,
}

impl Display for RemoteErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::StaleToken => "stale change token",
            Self::NotFound => "not found",
            Self::Validation => "invalid request",
            Self::Permission => "permission denied",
            Self::Other => "remote failure",
        };
        f.write_str(s)
    }
}

/// Failure reported by the remote system
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    /// Classification
    pub kind: RemoteErrorKind,
    /// Remote-provided detail
    pub message: String,
}

impl RemoteError {
    /// Create remote error
    #[inline]
    #[must_use]
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Stale change token
    #[inline]
    #[must_use]
    pub fn stale_token(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::StaleToken, message)
    }

    /// Entity or item not found
    #[inline]
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::NotFound, message)
    }

    /// Whether this is a token conflict
    #[inline]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.kind == RemoteErrorKind::StaleToken
    }

    /// Whether this is a not-found
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind == RemoteErrorKind::NotFound
    }
}

/// Outcome of a token-gated call that did not succeed
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    /// Non-conflict remote failure, never retried
    #[error(transparent)]
    Remote(RemoteError),

    /// Every attempt hit a stale token
    #[error("lost update on {entity}: change token conflicted on all {attempts} attempts ({last})")]
    ContentionExhausted {
        /// Target entity
        entity: EntityId,
        /// Attempts made
        attempts: u32,
        /// Conflict reported by the final attempt
        last: RemoteError,
    },

    /// Token could not be fetched within the attempt budget
    #[error("no change token for {entity} after {attempts} attempts: {last}")]
    TokenUnavailable {
        /// Target entity
        entity: EntityId,
        /// Attempts made
        attempts: u32,
        /// Fetch failure reported by the final attempt
        last: RemoteError,
    },

    /// Deadline expired before a mutation succeeded
    #[error("cancelled after {attempts} attempts on {entity}: deadline expired")]
    Cancelled {
        /// Target entity
        entity: EntityId,
        /// Attempts started
        attempts: u32,
    },
}

impl BrokerError {
    /// Whether the retry budget was consumed by conflicts
    #[inline]
    #[must_use]
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::ContentionExhausted { .. })
    }

    /// Whether the caller's deadline expired
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Underlying remote error, if the failure came from the remote
    #[must_use]
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(e)
            | Self::ContentionExhausted { last: e, .. }
            | Self::TokenUnavailable { last: e, .. } => Some(e),
            Self::Cancelled { .. } => None,
        }
    }
}

/// Operations named in an error, rendered by their identity-relevant fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationList(pub Vec<Operation>);

impl Display for OperationList {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => f.write_str("apply empty update"),
            ops => {
                for (i, op) in ops.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{op}")?;
                }
                Ok(())
            }
        }
    }
}

/// Errors reported by a reconciliation
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Desired state violates a record constraint
    #[error("invalid desired state: {0}")]
    Validation(#[from] ValidationError),

    /// A batch of operations could not be applied
    #[error("{entity}: failed to {operations}: {source}")]
    Mutation {
        /// Target entity
        entity: EntityId,
        /// Operations in the failing batch
        operations: OperationList,
        /// Why the batch failed
        #[source]
        source: BrokerError,
    },

    /// Another reconciliation for the same entity is running in this process
    #[error("reconciliation already in progress for {0}")]
    EntityBusy(EntityId),

    /// Reading canonical state failed
    #[error("reading {entity}: {source}")]
    Read {
        /// Target entity
        entity: EntityId,
        /// Remote failure
        #[source]
        source: RemoteError,
    },
}

impl ReconcileError {
    /// Whether the failure was contention exhaustion
    #[must_use]
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::Mutation { source, .. } if source.is_contention())
    }

    /// Whether the failure was a deadline cancellation
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Mutation { source, .. } if source.is_cancelled())
    }

    /// Whether a fresh reconciliation pass may succeed without caller changes
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::EntityBusy(_) => true,
            Self::Read { source, .. } => !source.is_not_found(),
            Self::Mutation { source, .. } => !matches!(source, BrokerError::Remote(_)),
        }
    }

    /// Operations that failed, if any
    #[must_use]
    pub fn failed_operations(&self) -> &[Operation] {
        match self {
            Self::Mutation { operations, .. } => &operations.0,
            _ => &[],
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Semantically invalid value
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// YAML parse failure
    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parse failure
    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),
}
