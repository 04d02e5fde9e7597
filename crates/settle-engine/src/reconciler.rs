//! Reconciliation orchestrator
//!
//! [`Reconciler`] moves a remote collection from its previously applied
//! records to the desired records:
//! 1. diff previous against desired
//! 2. order and batch the operations per [`ReconcilerConfig`]
//! 3. apply each batch through the [`TokenBroker`]
//! 4. stop at the first fatal failure, without rollback
//! 5. read canonical state back and compare it to the desired set
//!
//! Partial application is a valid intermediate state: the next pass, with
//! `previous` refreshed from the [`EntityReader`], computes what is left.

use crate::broker::TokenBroker;
use crate::config::{ApplyOrder, EmptyBatchPolicy, ReconcilerConfig};
use crate::error::{BrokerError, OperationList, ReconcileError, RemoteError};
use crate::phase::{PhaseTracker, ReconcilePhase};
use crate::remote::{EntityId, EntityReader, EntityState, MutationRpc, TokenSource};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Serialize, Serializer};
use settle_record::{diff, Desired, Diff, Operation, Record, RecordSet, ToRecord};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::time::Instant;
use ulid::Ulid;

/// Per-operation outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Accepted by the remote
    Applied,
    /// Part of the batch that failed fatally
    FailedFatal,
}

/// One attempted operation and its outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationReport {
    /// The operation
    pub operation: Operation,
    /// Its outcome
    pub status: OperationStatus,
}

/// Result of reading canonical state after applying
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verification {
    /// Verification disabled or no change requested
    Skipped,
    /// Remote state identity-equals the desired set
    Confirmed,
    /// Remote state differs from the desired set
    Drifted {
        /// Desired records the remote does not hold
        missing: Vec<Record>,
        /// Remote records that were not desired
        unexpected: Vec<Record>,
    },
    /// The read failed
    Unavailable {
        /// Read failure, rendered
        reason: String,
    },
}

/// Outcome of one reconciliation call
#[derive(Debug, Serialize)]
pub struct ReconciliationReport {
    /// Unique reconciliation ID
    pub id: Ulid,
    /// Target entity
    pub entity: EntityId,
    /// Terminal phase
    pub phase: ReconcilePhase,
    /// Attempted operations, in application order
    pub entries: Vec<OperationReport>,
    /// Operations never attempted because an earlier batch failed
    pub not_attempted: Vec<Operation>,
    /// Error that stopped application
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<ReconcileError>,
    /// Post-mutation verification
    pub verification: Verification,
    /// Canonical state read after applying, when available
    pub final_state: Option<EntityState>,
}

impl ReconciliationReport {
    /// Whether every computed operation was applied
    #[inline]
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.phase == ReconcilePhase::Converged
    }

    /// Operations the remote accepted
    pub fn applied(&self) -> impl Iterator<Item = &Operation> {
        self.entries
            .iter()
            .filter(|e| e.status == OperationStatus::Applied)
            .map(|e| &e.operation)
    }

    /// Operations in the failed batch
    pub fn failed(&self) -> impl Iterator<Item = &Operation> {
        self.entries
            .iter()
            .filter(|e| e.status == OperationStatus::FailedFatal)
            .map(|e| &e.operation)
    }

    /// Number of operations computed by the diff
    #[inline]
    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.entries.len() + self.not_attempted.len()
    }

    /// Error that stopped application, if any
    #[inline]
    #[must_use]
    pub fn error(&self) -> Option<&ReconcileError> {
        self.error.as_ref()
    }

    /// Records the remote holds after this pass, for the next `previous`
    #[must_use]
    pub fn refreshed_previous(&self) -> Option<RecordSet> {
        self.final_state.as_ref().map(|s| s.records.clone())
    }
}

fn serialize_error<S: Serializer>(
    error: &Option<ReconcileError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

/// How failures of removals are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    /// Removing an item the remote no longer has counts as applied
    Drain,
}

/// Removes the in-flight marker when a reconciliation ends or is dropped
struct InFlightGuard<'a> {
    map: &'a DashMap<EntityId, Ulid>,
    entity: EntityId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.entity);
    }
}

/// Change-token gated reconciliation orchestrator
pub struct Reconciler {
    config: ReconcilerConfig,
    broker: TokenBroker,
    rpc: Arc<dyn MutationRpc>,
    reader: Arc<dyn EntityReader>,
    in_flight: DashMap<EntityId, Ulid>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Create reconciler from separate remote capabilities
    #[must_use]
    pub fn new(
        config: ReconcilerConfig,
        tokens: Arc<dyn TokenSource>,
        rpc: Arc<dyn MutationRpc>,
        reader: Arc<dyn EntityReader>,
    ) -> Self {
        Self {
            broker: TokenBroker::new(tokens, config.retry.clone()),
            config,
            rpc,
            reader,
            in_flight: DashMap::new(),
        }
    }

    /// Create reconciler from one client implementing all capabilities
    #[must_use]
    pub fn from_remote<R>(config: ReconcilerConfig, remote: Arc<R>) -> Self
    where
        R: TokenSource + MutationRpc + EntityReader + 'static,
    {
        Self::new(config, remote.clone(), remote.clone(), remote)
    }

    /// Configuration in effect
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Token broker, for token-gated calls outside reconciliation
    /// (creating or deleting the entity itself)
    #[inline]
    #[must_use]
    pub fn broker(&self) -> &TokenBroker {
        &self.broker
    }

    /// Read canonical records, to use as `previous` for the next pass
    ///
    /// # Errors
    /// Returns [`ReconcileError::Read`] if the reader fails
    pub async fn refresh(&self, entity: &EntityId) -> Result<RecordSet, ReconcileError> {
        self.reader
            .read(entity)
            .await
            .map(|state| state.records)
            .map_err(|source| ReconcileError::Read {
                entity: entity.clone(),
                source,
            })
    }

    /// Reconcile `entity` from `previous` to `desired`
    ///
    /// Mutation failures are reported inside the returned report; `Err` is
    /// reserved for failures before anything is diffed.
    ///
    /// # Errors
    /// Returns [`ReconcileError::EntityBusy`] if this reconciler is already
    /// working on `entity`
    pub async fn reconcile(
        &self,
        entity: &EntityId,
        previous: &RecordSet,
        desired: &Desired,
    ) -> Result<ReconciliationReport, ReconcileError> {
        self.run(entity, previous, desired, Mode::Normal).await
    }

    /// Reconcile typed items, validating the desired ones first
    ///
    /// # Errors
    /// Returns [`ReconcileError::Validation`] before any remote call if a
    /// desired item violates its resource's rules
    pub async fn reconcile_items<T: ToRecord>(
        &self,
        entity: &EntityId,
        previous: &[T],
        desired: &[T],
    ) -> Result<ReconciliationReport, ReconcileError> {
        let previous = RecordSet::from_records(previous.iter().map(ToRecord::to_record));
        let desired = RecordSet::from_items(desired)?;
        self.reconcile(entity, &previous, &Desired::Records(desired))
            .await
    }

    /// Remove every previously applied record
    ///
    /// Removals the remote rejects as not found count as applied; this is
    /// the step before deleting the entity itself.
    ///
    /// # Errors
    /// Returns [`ReconcileError::EntityBusy`] as [`reconcile`](Self::reconcile)
    pub async fn drain(
        &self,
        entity: &EntityId,
        previous: &RecordSet,
    ) -> Result<ReconciliationReport, ReconcileError> {
        self.run(entity, previous, &Desired::empty(), Mode::Drain)
            .await
    }

    fn claim(&self, entity: &EntityId, id: Ulid) -> Result<InFlightGuard<'_>, ReconcileError> {
        match self.in_flight.entry(entity.clone()) {
            Entry::Occupied(_) => Err(ReconcileError::EntityBusy(entity.clone())),
            Entry::Vacant(slot) => {
                slot.insert(id);
                Ok(InFlightGuard {
                    map: &self.in_flight,
                    entity: entity.clone(),
                })
            }
        }
    }

    fn order(&self, d: Diff) -> Vec<Operation> {
        match self.config.order {
            ApplyOrder::RemovesFirst => d.into_operations(),
            ApplyOrder::AddsFirst => {
                let mut ops = d.adds;
                ops.extend(d.removes);
                ops
            }
        }
    }

    fn batches(&self, ops: Vec<Operation>, explicit: bool) -> Vec<Vec<Operation>> {
        if ops.is_empty() {
            return if explicit && self.config.empty_batch == EmptyBatchPolicy::Send {
                vec![Vec::new()]
            } else {
                Vec::new()
            };
        }
        let size = self.config.batch.batch_size(ops.len());
        ops.chunks(size).map(<[Operation]>::to_vec).collect()
    }

    #[tracing::instrument(
        level = "info",
        skip(self, entity, previous, desired, mode),
        fields(entity = %entity, mode = ?mode)
    )]
    async fn run(
        &self,
        entity: &EntityId,
        previous: &RecordSet,
        desired: &Desired,
        mode: Mode,
    ) -> Result<ReconciliationReport, ReconcileError> {
        let id = Ulid::new();
        let _guard = self.claim(entity, id)?;
        // a timeout too large to represent means no deadline
        let deadline = self.config.timeout().and_then(|t| Instant::now().checked_add(t));
        let mut phase = PhaseTracker::new();

        let (ops, target) = match desired {
            Desired::Unchanged => (Vec::new(), None),
            Desired::Records(set) => (self.order(diff(previous, set)), Some(set)),
        };
        phase.advance(ReconcilePhase::Diffed);
        tracing::info!(%id, operations = ops.len(), "reconciling");

        let batches = self.batches(ops, target.is_some());
        phase.advance(ReconcilePhase::Applying);

        let mut entries = Vec::new();
        let mut not_attempted = Vec::new();
        let mut error = None;
        let mut applied_any = false;
        let mut last_state = None;

        let mut pending: VecDeque<Vec<Operation>> = batches.into();
        while let Some(batch) = pending.pop_front() {
            tracing::debug!(size = batch.len(), "applying batch");
            let rpc = self.rpc.as_ref();
            let batch_ref = batch.as_slice();
            let result = self
                .broker
                .with_token_until(entity, deadline, |token| rpc.mutate(entity, token, batch_ref))
                .await;

            match result {
                Ok(state) => {
                    last_state = Some(state);
                    applied_any |= !batch.is_empty();
                    entries.extend(batch.into_iter().map(|op| OperationReport {
                        operation: op,
                        status: OperationStatus::Applied,
                    }));
                }
                // batches are atomic: find the missing item one removal at a time
                Err(BrokerError::Remote(e))
                    if mode == Mode::Drain && batch.len() > 1 && is_missing_removal(&e, &batch) =>
                {
                    tracing::debug!(error = %e, size = batch.len(), "removal target gone, splitting batch");
                    for op in batch.into_iter().rev() {
                        pending.push_front(vec![op]);
                    }
                }
                Err(BrokerError::Remote(e)) if mode == Mode::Drain && is_missing_removal(&e, &batch) => {
                    tracing::debug!(error = %e, "removal target already gone");
                    applied_any = true;
                    entries.extend(batch.into_iter().map(|op| OperationReport {
                        operation: op,
                        status: OperationStatus::Applied,
                    }));
                }
                Err(source) => {
                    tracing::warn!(error = %source, size = batch.len(), "batch failed, stopping");
                    entries.extend(batch.iter().cloned().map(|op| OperationReport {
                        operation: op,
                        status: OperationStatus::FailedFatal,
                    }));
                    error = Some(ReconcileError::Mutation {
                        entity: entity.clone(),
                        operations: OperationList(batch),
                        source,
                    });
                    break;
                }
            }
        }
        not_attempted.extend(pending.into_iter().flatten());

        phase.advance(match (&error, applied_any) {
            (None, _) => ReconcilePhase::Converged,
            (Some(_), true) => ReconcilePhase::PartiallyApplied,
            (Some(_), false) => ReconcilePhase::Failed,
        });

        let (verification, final_state) = match target {
            Some(set) if self.config.verify_convergence => {
                self.verify(entity, set, deadline, mode).await
            }
            _ => (Verification::Skipped, last_state),
        };

        match phase.current() {
            ReconcilePhase::Converged => tracing::info!(
                %id,
                applied = entries.len(),
                ?verification,
                "reconciliation converged"
            ),
            terminal => tracing::warn!(
                %id,
                phase = ?terminal,
                applied = entries.iter().filter(|e| e.status == OperationStatus::Applied).count(),
                not_attempted = not_attempted.len(),
                "reconciliation stopped early"
            ),
        }

        Ok(ReconciliationReport {
            id,
            entity: entity.clone(),
            phase: phase.current(),
            entries,
            not_attempted,
            error,
            verification,
            final_state,
        })
    }

    async fn verify(
        &self,
        entity: &EntityId,
        desired: &RecordSet,
        deadline: Option<Instant>,
        mode: Mode,
    ) -> (Verification, Option<EntityState>) {
        let read = self.reader.read(entity);
        let result = match deadline {
            Some(d) => match tokio::time::timeout_at(d, read).await {
                Ok(r) => r,
                Err(_) => {
                    return (
                        Verification::Unavailable {
                            reason: "deadline expired before read".to_string(),
                        },
                        None,
                    )
                }
            },
            None => read.await,
        };

        match result {
            Ok(state) => (compare(desired, &state.records), Some(state)),
            Err(e) if mode == Mode::Drain && e.is_not_found() => (Verification::Confirmed, None),
            Err(e) => {
                tracing::warn!(error = %e, "verification read failed");
                (
                    Verification::Unavailable {
                        reason: e.to_string(),
                    },
                    None,
                )
            }
        }
    }
}

fn is_missing_removal(error: &RemoteError, batch: &[Operation]) -> bool {
    error.is_not_found() && !batch.is_empty() && batch.iter().all(Operation::is_remove)
}

fn compare(desired: &RecordSet, actual: &RecordSet) -> Verification {
    let missing: Vec<Record> = desired
        .iter()
        .filter(|(id, _)| !actual.contains(id))
        .map(|(_, r)| r.clone())
        .collect();
    let unexpected: Vec<Record> = actual
        .iter()
        .filter(|(id, _)| !desired.contains(id))
        .map(|(_, r)| r.clone())
        .collect();

    if missing.is_empty() && unexpected.is_empty() {
        Verification::Confirmed
    } else {
        Verification::Drifted {
            missing,
            unexpected,
        }
    }
}
