//! Settle Reconciliation Engine
//!
//! Change-token gated reconciliation of declarative record collections
//! against remote APIs that hold items without server-side IDs.
//!
//! # Core Concepts
//!
//! - [`TokenBroker`]: Acquire-call-retry cycle around single-use change tokens
//! - [`Reconciler`]: Diff, batch, apply, verify
//! - [`ReconcilePhase`]: Per-call state machine ending in a terminal phase
//! - [`ReconcilerConfig`]: Retry, batching, ordering and timeout settings
//! - [`InMemoryRemote`]: Token-gated in-process remote for simulation
//!
//! # Example
//!
//! ```rust
//! use settle_engine::{EntityId, InMemoryRemote, Reconciler, ReconcilerConfig};
//! use settle_record::{Record, RecordSet, Value};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let entity = EntityId::new("match-set");
//! let remote = Arc::new(InMemoryRemote::with_entity(entity.clone(), RecordSet::new()));
//! let reconciler = Reconciler::from_remote(ReconcilerConfig::default(), remote);
//!
//! let desired = RecordSet::from_records([
//!     Record::new().with("data", Value::text_ignore_case("referer")),
//! ]);
//! let report = reconciler
//!     .reconcile(&entity, &RecordSet::new(), &desired.into())
//!     .await
//!     .unwrap();
//! assert!(report.is_converged());
//! # }
//! ```

#![warn(unreachable_pub)]
#![warn(missing_docs)]

mod broker;
mod config;
mod error;
mod memory;
mod phase;
mod reconciler;
mod remote;

pub use broker::TokenBroker;
pub use config::{ApplyOrder, BatchStyle, EmptyBatchPolicy, ReconcilerConfig, RetryPolicy};
pub use error::{
    BrokerError, ConfigError, OperationList, ReconcileError, RemoteError, RemoteErrorKind,
};
pub use memory::{InMemoryRemote, RemoteCall};
pub use phase::{allowed_transitions, validate_transition, PhaseError, ReconcilePhase};
pub use reconciler::{
    OperationReport, OperationStatus, ReconciliationReport, Reconciler, Verification,
};
pub use remote::{ChangeToken, EntityId, EntityReader, EntityState, MutationRpc, TokenSource};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
