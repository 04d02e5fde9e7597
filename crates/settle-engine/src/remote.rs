//! Remote boundary
//!
//! The engine consumes three remote capabilities, each an async trait so
//! any RPC client can sit behind it:
//! - [`TokenSource`]: hands out single-use change tokens
//! - [`MutationRpc`]: applies a batch of operations under a token
//! - [`EntityReader`]: reads canonical entity state

use crate::error::RemoteError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use settle_record::{Operation, RecordSet};
use std::fmt::{self, Display, Formatter};

/// Identifier of a remote entity (e.g. a match set or experiment template)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Create entity ID
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Opaque single-use change token
///
/// Deliberately not `Clone`: a token is moved into exactly one remote call.
#[derive(Debug, PartialEq, Eq)]
pub struct ChangeToken(String);

impl ChangeToken {
    /// Wrap a token value issued by the remote
    #[inline]
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the token value
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the raw value for the wire request
    #[inline]
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Canonical state of one remote entity's collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityState {
    /// Entity
    pub entity: EntityId,
    /// Records currently held by the remote
    pub records: RecordSet,
}

/// Source of change tokens
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Fetch a fresh token; side-effect free
    async fn fetch_token(&self) -> Result<ChangeToken, RemoteError>;
}

/// Token-gated mutation endpoint
///
/// Must accept mixed add/remove lists when the batched style is used.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MutationRpc: Send + Sync {
    /// Apply `operations` to `entity`, consuming `token`
    async fn mutate(
        &self,
        entity: &EntityId,
        token: ChangeToken,
        operations: &[Operation],
    ) -> Result<EntityState, RemoteError>;
}

/// Canonical state reader
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EntityReader: Send + Sync {
    /// Read the entity; `NotFound` kind when it does not exist
    async fn read(&self, entity: &EntityId) -> Result<EntityState, RemoteError>;
}
