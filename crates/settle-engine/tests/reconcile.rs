//! End-to-end reconciliation against the in-memory remote

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use settle_engine::{
    ApplyOrder, BatchStyle, ChangeToken, EmptyBatchPolicy, EntityId, EntityReader, EntityState,
    InMemoryRemote, MutationRpc, ReconcileError, ReconcilePhase, Reconciler, RemoteError,
    RemoteErrorKind, RetryPolicy, TokenSource, Verification,
};
use settle_record::{Desired, Operation, RecordSet};
use settle_test_utils::{
    assert_converged, entity, fast_config, header_tuple, init_tracing, query_tuple, record,
    record_set, setup_remote,
};
use std::sync::Arc;

#[tokio::test]
async fn replaces_one_record_of_two() {
    init_tracing();
    let (remote, reconciler) = setup_remote(record_set(&["a", "b"]), fast_config());

    let report = reconciler
        .reconcile(&entity(), &record_set(&["a", "b"]), &record_set(&["b", "c"]).into())
        .await
        .unwrap();

    assert_converged(&report);
    assert_eq!(
        report.applied().cloned().collect::<Vec<_>>(),
        vec![Operation::Remove(record("a")), Operation::Add(record("c"))]
    );
    assert_eq!(report.verification, Verification::Confirmed);
    assert!(remote
        .records(&entity())
        .unwrap()
        .identity_equal(&record_set(&["b", "c"])));
    assert_eq!(remote.mutate_count(), 1);
}

#[tokio::test]
async fn empty_to_single_converges() {
    let (remote, reconciler) = setup_remote(RecordSet::new(), fast_config());

    let report = reconciler
        .reconcile(&entity(), &RecordSet::new(), &record_set(&["x"]).into())
        .await
        .unwrap();

    assert_converged(&report);
    assert_eq!(report.operation_count(), 1);
    assert_eq!(remote.records(&entity()).unwrap(), record_set(&["x"]));
}

#[tokio::test]
async fn second_pass_is_noop() {
    let (remote, reconciler) = setup_remote(record_set(&["a"]), fast_config());
    let desired: Desired = record_set(&["b", "c"]).into();

    let first = reconciler
        .reconcile(&entity(), &record_set(&["a"]), &desired)
        .await
        .unwrap();
    assert_converged(&first);
    let calls = remote.mutate_count();

    let previous = first.refreshed_previous().unwrap();
    let second = reconciler
        .reconcile(&entity(), &previous, &desired)
        .await
        .unwrap();

    assert_converged(&second);
    assert_eq!(second.operation_count(), 0);
    assert_eq!(remote.mutate_count(), calls);
}

#[tokio::test]
async fn case_only_change_is_noop() {
    let (remote, reconciler) = setup_remote(record_set(&["User-Agent"]), fast_config());

    let report = reconciler
        .reconcile_items(&entity(), &[header_tuple("User-Agent")], &[header_tuple("user-agent")])
        .await
        .unwrap();

    assert_converged(&report);
    assert_eq!(report.operation_count(), 0);
    assert_eq!(remote.mutate_count(), 0);
}

#[tokio::test]
async fn failure_after_remove_is_partial() {
    let (remote, reconciler) = setup_remote(
        record_set(&["a"]),
        fast_config().with_batch_style(BatchStyle::PerOperation),
    );
    remote.fail_operation(record("c").identity(), RemoteErrorKind::Validation);

    let report = reconciler
        .reconcile(&entity(), &record_set(&["a"]), &record_set(&["c"]).into())
        .await
        .unwrap();

    assert_eq!(report.phase, ReconcilePhase::PartiallyApplied);
    assert_eq!(
        report.applied().cloned().collect::<Vec<_>>(),
        vec![Operation::Remove(record("a"))]
    );
    assert_eq!(
        report.failed().cloned().collect::<Vec<_>>(),
        vec![Operation::Add(record("c"))]
    );
    let err = report.error().unwrap();
    assert!(!err.is_contention());
    assert_eq!(err.failed_operations(), &[Operation::Add(record("c"))]);
    assert!(remote.records(&entity()).unwrap().is_empty());
    assert_eq!(
        report.verification,
        Verification::Drifted {
            missing: vec![record("c")],
            unexpected: vec![],
        }
    );
}

#[tokio::test]
async fn unchanged_desired_makes_no_calls() {
    let (remote, reconciler) = setup_remote(record_set(&["a"]), fast_config());

    let report = reconciler
        .reconcile(&entity(), &record_set(&["a"]), &Desired::Unchanged)
        .await
        .unwrap();

    assert_converged(&report);
    assert_eq!(report.verification, Verification::Skipped);
    assert!(remote.calls().is_empty());
}

#[tokio::test]
async fn explicit_empty_is_sent_when_configured() {
    let (remote, reconciler) = setup_remote(
        RecordSet::new(),
        fast_config().with_empty_batch(EmptyBatchPolicy::Send),
    );

    let report = reconciler
        .reconcile(&entity(), &RecordSet::new(), &Desired::empty())
        .await
        .unwrap();

    assert_converged(&report);
    assert_eq!(remote.mutate_count(), 1);
}

#[tokio::test]
async fn explicit_empty_is_skipped_by_default() {
    let (remote, reconciler) = setup_remote(RecordSet::new(), fast_config());

    reconciler
        .reconcile(&entity(), &RecordSet::new(), &Desired::empty())
        .await
        .unwrap();

    assert_eq!(remote.mutate_count(), 0);
}

#[tokio::test]
async fn conflicts_are_retried_to_convergence() {
    let (remote, reconciler) = setup_remote(RecordSet::new(), fast_config());
    remote.inject_conflicts(2);

    let report = reconciler
        .reconcile(&entity(), &RecordSet::new(), &record_set(&["x"]).into())
        .await
        .unwrap();

    assert_converged(&report);
    assert_eq!(remote.fetch_count(), 3);
    assert_eq!(remote.mutate_count(), 3);
}

#[tokio::test]
async fn persistent_contention_is_reported() {
    let (remote, reconciler) = setup_remote(
        RecordSet::new(),
        fast_config().with_retry(RetryPolicy::immediate(3)),
    );
    remote.inject_conflicts(10);

    let report = reconciler
        .reconcile(&entity(), &RecordSet::new(), &record_set(&["x"]).into())
        .await
        .unwrap();

    assert_eq!(report.phase, ReconcilePhase::Failed);
    assert!(report.error().unwrap().is_contention());
    assert!(report.error().unwrap().is_retryable());
    assert_eq!(remote.fetch_count(), 3);
}

#[tokio::test]
async fn token_fetch_outage_is_retried() {
    let (remote, reconciler) = setup_remote(RecordSet::new(), fast_config());
    remote.fail_token_fetches(2);

    let report = reconciler
        .reconcile(&entity(), &RecordSet::new(), &record_set(&["x"]).into())
        .await
        .unwrap();

    assert_converged(&report);
    assert_eq!(remote.fetch_count(), 3);
}

#[tokio::test]
async fn batches_are_chunked() {
    let (remote, reconciler) = setup_remote(
        RecordSet::new(),
        fast_config().with_batch_style(BatchStyle::Mixed {
            max_batch_size: Some(2),
        }),
    );

    let report = reconciler
        .reconcile(
            &entity(),
            &RecordSet::new(),
            &record_set(&["a", "b", "c", "d", "e"]).into(),
        )
        .await
        .unwrap();

    assert_converged(&report);
    assert_eq!(remote.mutate_count(), 3);
}

#[tokio::test]
async fn adds_first_order() {
    let (_remote, reconciler) = setup_remote(
        record_set(&["a"]),
        fast_config().with_order(ApplyOrder::AddsFirst),
    );

    let report = reconciler
        .reconcile(&entity(), &record_set(&["a"]), &record_set(&["b"]).into())
        .await
        .unwrap();

    assert_converged(&report);
    assert_eq!(
        report.applied().cloned().collect::<Vec<_>>(),
        vec![Operation::Add(record("b")), Operation::Remove(record("a"))]
    );
}

#[tokio::test]
async fn stale_previous_is_recovered_by_refresh() {
    // remote already dropped "a" out of band
    let (remote, reconciler) = setup_remote(record_set(&["b"]), fast_config());

    let report = reconciler
        .reconcile(&entity(), &record_set(&["a", "b"]), &record_set(&["b"]).into())
        .await
        .unwrap();
    assert_eq!(report.phase, ReconcilePhase::Failed);

    let previous = reconciler.refresh(&entity()).await.unwrap();
    let retry = reconciler
        .reconcile(&entity(), &previous, &record_set(&["b"]).into())
        .await
        .unwrap();
    assert_converged(&retry);
    assert_eq!(retry.operation_count(), 0);
    assert_eq!(remote.records(&entity()).unwrap(), record_set(&["b"]));
}

#[tokio::test]
async fn drain_then_delete_entity() {
    // "gone" was never applied remotely
    let (remote, reconciler) = setup_remote(record_set(&["a"]), fast_config());
    let id = entity();

    let report = reconciler
        .drain(&id, &record_set(&["a", "gone"]))
        .await
        .unwrap();
    assert_converged(&report);
    assert!(remote.records(&id).unwrap().is_empty());

    reconciler
        .broker()
        .with_token(&id, |token| {
            let remote = remote.clone();
            let id = id.clone();
            async move { remote.delete_entity(&id, token) }
        })
        .await
        .unwrap();
    assert!(remote.records(&id).is_none());
}

#[tokio::test]
async fn create_entity_through_broker() {
    let remote = Arc::new(InMemoryRemote::new());
    let reconciler = Reconciler::from_remote(fast_config(), remote.clone());
    let id = EntityId::new("new-set");

    reconciler
        .broker()
        .with_token(&id, |token| {
            let remote = remote.clone();
            let id = id.clone();
            async move { remote.create_entity(&id, token) }
        })
        .await
        .unwrap();

    let report = reconciler
        .reconcile_items(&id, &[], &[query_tuple("URL_DECODE")])
        .await
        .unwrap();
    assert_converged(&report);
}

#[tokio::test]
async fn invalid_desired_fails_before_any_call() {
    let (remote, reconciler) = setup_remote(RecordSet::new(), fast_config());

    let err = reconciler
        .reconcile_items(&entity(), &[], &[query_tuple("")])
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Validation(_)));
    assert!(remote.calls().is_empty());
}

/// Delegates to the in-memory remote, yielding once before each mutation
struct YieldingRemote(InMemoryRemote);

#[async_trait]
impl TokenSource for YieldingRemote {
    async fn fetch_token(&self) -> Result<ChangeToken, RemoteError> {
        self.0.fetch_token().await
    }
}

#[async_trait]
impl MutationRpc for YieldingRemote {
    async fn mutate(
        &self,
        entity: &EntityId,
        token: ChangeToken,
        operations: &[Operation],
    ) -> Result<EntityState, RemoteError> {
        tokio::task::yield_now().await;
        self.0.mutate(entity, token, operations).await
    }
}

#[async_trait]
impl EntityReader for YieldingRemote {
    async fn read(&self, entity: &EntityId) -> Result<EntityState, RemoteError> {
        self.0.read(entity).await
    }
}

#[tokio::test]
async fn concurrent_reconcile_of_same_entity_is_rejected() {
    let remote = Arc::new(YieldingRemote(InMemoryRemote::with_entity(
        entity(),
        RecordSet::new(),
    )));
    let reconciler = Reconciler::from_remote(fast_config(), remote.clone());
    let desired: Desired = record_set(&["x"]).into();
    let (target, empty) = (entity(), RecordSet::new());

    let (a, b) = tokio::join!(
        reconciler.reconcile(&target, &empty, &desired),
        reconciler.reconcile(&target, &empty, &desired),
    );

    assert_converged(&a.unwrap());
    assert!(matches!(b, Err(ReconcileError::EntityBusy(_))));
    assert_eq!(remote.0.mutate_count(), 1);

    // released once the first call finished
    let again = reconciler
        .reconcile(&entity(), &record_set(&["x"]), &desired)
        .await
        .unwrap();
    assert_converged(&again);
}

#[tokio::test]
async fn different_entities_reconcile_concurrently() {
    let remote = Arc::new(YieldingRemote(InMemoryRemote::with_entity(
        entity(),
        RecordSet::new(),
    )));
    let other = EntityId::new("match-set-2");
    let token = remote.0.fetch_token().await.unwrap();
    remote.0.create_entity(&other, token).unwrap();
    let reconciler = Reconciler::from_remote(fast_config(), remote.clone());
    let desired: Desired = record_set(&["x"]).into();
    let (first, empty) = (entity(), RecordSet::new());

    let (a, b) = tokio::join!(
        reconciler.reconcile(&first, &empty, &desired),
        reconciler.reconcile(&other, &empty, &desired),
    );

    // both may race on the global version; retries absorb it
    assert_converged(&a.unwrap());
    assert_converged(&b.unwrap());
}

/// Delegates to the in-memory remote, optionally never answering or failing reads
struct StallingRemote {
    inner: InMemoryRemote,
    stall_mutations: bool,
    stall_reads: bool,
    failed_reads: Option<RemoteErrorKind>,
}

impl StallingRemote {
    fn new(records: RecordSet) -> Self {
        Self {
            inner: InMemoryRemote::with_entity(entity(), records),
            stall_mutations: false,
            stall_reads: false,
            failed_reads: None,
        }
    }
}

#[async_trait]
impl TokenSource for StallingRemote {
    async fn fetch_token(&self) -> Result<ChangeToken, RemoteError> {
        self.inner.fetch_token().await
    }
}

#[async_trait]
impl MutationRpc for StallingRemote {
    async fn mutate(
        &self,
        entity: &EntityId,
        token: ChangeToken,
        operations: &[Operation],
    ) -> Result<EntityState, RemoteError> {
        if self.stall_mutations {
            std::future::pending::<()>().await;
        }
        self.inner.mutate(entity, token, operations).await
    }
}

#[async_trait]
impl EntityReader for StallingRemote {
    async fn read(&self, entity: &EntityId) -> Result<EntityState, RemoteError> {
        if self.stall_reads {
            std::future::pending::<()>().await;
        }
        if let Some(kind) = self.failed_reads {
            return Err(RemoteError::new(kind, "read refused"));
        }
        self.inner.read(entity).await
    }
}

#[tokio::test(start_paused = true)]
async fn timeout_cancels_hung_mutation() {
    let remote = Arc::new(StallingRemote {
        stall_mutations: true,
        stall_reads: true,
        ..StallingRemote::new(RecordSet::new())
    });
    let reconciler =
        Reconciler::from_remote(fast_config().with_timeout_secs(Some(5)), remote.clone());

    let report = reconciler
        .reconcile(&entity(), &RecordSet::new(), &record_set(&["x"]).into())
        .await
        .unwrap();

    assert_eq!(report.phase, ReconcilePhase::Failed);
    let err = report.error().unwrap();
    assert!(err.is_cancelled());
    assert!(!err.is_contention());
    assert_eq!(err.failed_operations(), &[Operation::Add(record("x"))]);
    assert_eq!(
        report.verification,
        Verification::Unavailable {
            reason: "deadline expired before read".to_string(),
        }
    );
    assert!(remote.inner.records(&entity()).unwrap().is_empty());
}

#[tokio::test]
async fn failed_verification_read_is_unavailable() {
    let remote = Arc::new(StallingRemote {
        failed_reads: Some(RemoteErrorKind::Permission),
        ..StallingRemote::new(RecordSet::new())
    });
    let reconciler = Reconciler::from_remote(fast_config(), remote.clone());

    let report = reconciler
        .reconcile(&entity(), &RecordSet::new(), &record_set(&["x"]).into())
        .await
        .unwrap();

    assert_converged(&report);
    assert_eq!(
        report.verification,
        Verification::Unavailable {
            reason: "permission denied: read refused".to_string(),
        }
    );
    assert_eq!(remote.inner.records(&entity()).unwrap(), record_set(&["x"]));
}

#[tokio::test]
async fn oversized_timeout_means_no_deadline() {
    let config = fast_config().with_timeout_secs(Some(u64::MAX));
    assert!(config.validate().is_ok());
    let (remote, reconciler) = setup_remote(RecordSet::new(), config);

    let report = reconciler
        .reconcile(&entity(), &RecordSet::new(), &record_set(&["x"]).into())
        .await
        .unwrap();

    assert_converged(&report);
    assert_eq!(report.verification, Verification::Confirmed);
    assert_eq!(remote.records(&entity()).unwrap(), record_set(&["x"]));
}
