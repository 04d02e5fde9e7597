//! In-memory remote
//!
//! [`InMemoryRemote`] implements all three remote capabilities against a
//! process-local store. It follows the semantics of a token-gated service:
//! - one global version; every accepted mutation bumps it
//! - a token is valid only for the version it was issued at
//! - a batch applies atomically or not at all
//!
//! Faults can be injected for simulation and tests.

use crate::error::{RemoteError, RemoteErrorKind};
use crate::remote::{ChangeToken, EntityId, EntityReader, EntityState, MutationRpc, TokenSource};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use settle_record::{Operation, RecordIdentity, RecordSet};
use std::collections::{BTreeMap, HashMap};

/// A call observed by the remote
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum RemoteCall {
    /// Token fetched (or fetch failed)
    FetchToken {
        /// Whether a token was issued
        issued: bool,
    },
    /// Mutation attempted
    Mutate {
        /// Target entity
        entity: EntityId,
        /// Number of operations in the batch
        operations: usize,
        /// Whether the batch was accepted
        accepted: bool,
    },
    /// Entity read
    Read {
        /// Target entity
        entity: EntityId,
    },
}

#[derive(Debug, Default)]
struct State {
    version: u64,
    entities: BTreeMap<EntityId, RecordSet>,
    pending_conflicts: u32,
    pending_fetch_failures: u32,
    failing: HashMap<RecordIdentity, RemoteErrorKind>,
    calls: Vec<RemoteCall>,
}

impl State {
    fn token(&self) -> ChangeToken {
        ChangeToken::new(format!("token-{}", self.version))
    }

    fn check_token(&mut self, token: &ChangeToken) -> Result<(), RemoteError> {
        if self.pending_conflicts > 0 {
            self.pending_conflicts -= 1;
            self.version += 1;
            return Err(RemoteError::stale_token(
                "the entity was modified by another writer",
            ));
        }
        if token.as_str() == self.token().as_str() {
            Ok(())
        } else {
            Err(RemoteError::stale_token(format!(
                "token {} is not current",
                token.as_str()
            )))
        }
    }
}

/// Process-local remote with fault injection
#[derive(Debug, Default)]
pub struct InMemoryRemote {
    state: Mutex<State>,
}

impl InMemoryRemote {
    /// Create empty remote
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create remote holding `entity` with `records`, bypassing tokens
    #[must_use]
    pub fn with_entity(entity: impl Into<EntityId>, records: RecordSet) -> Self {
        let remote = Self::new();
        remote.state.lock().entities.insert(entity.into(), records);
        remote
    }

    /// Make the next `n` mutations fail with a stale token, as if another
    /// writer committed first
    pub fn inject_conflicts(&self, n: u32) {
        self.state.lock().pending_conflicts += n;
    }

    /// Make the next `n` token fetches fail
    pub fn fail_token_fetches(&self, n: u32) {
        self.state.lock().pending_fetch_failures += n;
    }

    /// Reject any batch touching a record with this identity
    pub fn fail_operation(&self, identity: RecordIdentity, kind: RemoteErrorKind) {
        self.state.lock().failing.insert(identity, kind);
    }

    /// Create an entity under a change token
    ///
    /// # Errors
    /// Returns `StaleToken` for an outdated token, `Validation` if the entity
    /// already exists
    pub fn create_entity(&self, entity: &EntityId, token: ChangeToken) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.check_token(&token)?;
        if state.entities.contains_key(entity) {
            return Err(RemoteError::new(
                RemoteErrorKind::Validation,
                format!("{entity} already exists"),
            ));
        }
        state.entities.insert(entity.clone(), RecordSet::new());
        state.version += 1;
        Ok(())
    }

    /// Delete an entity under a change token
    ///
    /// # Errors
    /// Returns `StaleToken` for an outdated token, `NotFound` if absent,
    /// `Validation` if the entity still holds records
    pub fn delete_entity(&self, entity: &EntityId, token: ChangeToken) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.check_token(&token)?;
        match state.entities.get(entity) {
            None => return Err(RemoteError::not_found(format!("{entity} does not exist"))),
            Some(records) if !records.is_empty() => {
                return Err(RemoteError::new(
                    RemoteErrorKind::Validation,
                    format!("{entity} still holds {} records", records.len()),
                ))
            }
            Some(_) => {}
        }
        state.entities.remove(entity);
        state.version += 1;
        Ok(())
    }

    /// Current records of `entity`, if it exists
    #[must_use]
    pub fn records(&self, entity: &EntityId) -> Option<RecordSet> {
        self.state.lock().entities.get(entity).cloned()
    }

    /// Current global version
    #[must_use]
    pub fn version(&self) -> u64 {
        self.state.lock().version
    }

    /// Calls observed so far
    #[must_use]
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    /// Number of token fetches, failed ones included
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.count(|c| matches!(c, RemoteCall::FetchToken { .. }))
    }

    /// Number of mutation attempts, rejected ones included
    #[must_use]
    pub fn mutate_count(&self) -> usize {
        self.count(|c| matches!(c, RemoteCall::Mutate { .. }))
    }

    fn count(&self, pred: impl Fn(&RemoteCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }
}

fn apply_batch(
    records: &RecordSet,
    operations: &[Operation],
    failing: &HashMap<RecordIdentity, RemoteErrorKind>,
) -> Result<RecordSet, RemoteError> {
    let mut next = records.clone();
    for op in operations {
        let id = op.identity();
        if let Some(kind) = failing.get(&id) {
            return Err(RemoteError::new(*kind, format!("rejected {op}")));
        }
        match op {
            Operation::Remove(record) => {
                if next.remove(&id).is_none() {
                    return Err(RemoteError::not_found(format!(
                        "nonexistent item {record}"
                    )));
                }
            }
            Operation::Add(record) => {
                if !next.insert(record.clone()) {
                    return Err(RemoteError::new(
                        RemoteErrorKind::Validation,
                        format!("duplicate item {record}"),
                    ));
                }
            }
        }
    }
    Ok(next)
}

#[async_trait]
impl TokenSource for InMemoryRemote {
    async fn fetch_token(&self) -> Result<ChangeToken, RemoteError> {
        let mut state = self.state.lock();
        if state.pending_fetch_failures > 0 {
            state.pending_fetch_failures -= 1;
            state.calls.push(RemoteCall::FetchToken { issued: false });
            return Err(RemoteError::new(RemoteErrorKind::Other, "rate exceeded"));
        }
        state.calls.push(RemoteCall::FetchToken { issued: true });
        Ok(state.token())
    }
}

#[async_trait]
impl MutationRpc for InMemoryRemote {
    async fn mutate(
        &self,
        entity: &EntityId,
        token: ChangeToken,
        operations: &[Operation],
    ) -> Result<EntityState, RemoteError> {
        let mut state = self.state.lock();
        let result = state.check_token(&token).and_then(|()| {
            let records = state
                .entities
                .get(entity)
                .ok_or_else(|| RemoteError::not_found(format!("nonexistent container {entity}")))?;
            apply_batch(records, operations, &state.failing)
        });

        state.calls.push(RemoteCall::Mutate {
            entity: entity.clone(),
            operations: operations.len(),
            accepted: result.is_ok(),
        });

        let records = result?;
        state.entities.insert(entity.clone(), records.clone());
        state.version += 1;
        Ok(EntityState {
            entity: entity.clone(),
            records,
        })
    }
}

#[async_trait]
impl EntityReader for InMemoryRemote {
    async fn read(&self, entity: &EntityId) -> Result<EntityState, RemoteError> {
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::Read {
            entity: entity.clone(),
        });
        state
            .entities
            .get(entity)
            .map(|records| EntityState {
                entity: entity.clone(),
                records: records.clone(),
            })
            .ok_or_else(|| RemoteError::not_found(format!("nonexistent container {entity}")))
    }
}
