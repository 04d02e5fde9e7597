//! Testing utilities for settle workspace
//!
//! Shared test helpers, fixtures, and assertions.

#![allow(missing_docs)]

use settle_engine::{
    EntityId, InMemoryRemote, Reconciler, ReconcilerConfig, RetryPolicy, ReconciliationReport,
};
use settle_record::{Record, RecordSet, ToRecord};
use settle_resources::{FieldToMatch, SqlInjectionMatchTuple};
use std::sync::Arc;

pub fn header_tuple(name: &str) -> SqlInjectionMatchTuple {
    SqlInjectionMatchTuple::new(FieldToMatch::named("HEADER", name), "NONE")
}

pub fn query_tuple(transformation: &str) -> SqlInjectionMatchTuple {
    SqlInjectionMatchTuple::new(FieldToMatch::new("QUERY_STRING"), transformation)
}

pub fn record(name: &str) -> Record {
    header_tuple(name).to_record()
}

pub fn record_set(names: &[&str]) -> RecordSet {
    RecordSet::from_records(names.iter().map(|n| record(n)))
}

pub fn entity() -> EntityId {
    EntityId::new("match-set-1")
}

/// Config with no backoff delay, for fast tests
pub fn fast_config() -> ReconcilerConfig {
    ReconcilerConfig::new().with_retry(RetryPolicy::immediate(4))
}

/// Remote holding `entity()` with `records`, plus a reconciler over it
pub fn setup_remote(
    records: RecordSet,
    config: ReconcilerConfig,
) -> (Arc<InMemoryRemote>, Reconciler) {
    let remote = Arc::new(InMemoryRemote::with_entity(entity(), records));
    let reconciler = Reconciler::from_remote(config, remote.clone());
    (remote, reconciler)
}

pub fn assert_converged(report: &ReconciliationReport) {
    assert!(
        report.is_converged(),
        "expected convergence, got {:?} ({:?})",
        report.phase,
        report.error()
    );
}

/// Install a test subscriber honouring `RUST_LOG`; safe to call repeatedly
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
