//! Reconciliation state machine
//!
//! `Start → Diffed → Applying → {Converged | PartiallyApplied | Failed}`.
//! There is no way back to `Start` within one reconciliation; recovery is a
//! new reconciliation with refreshed previous state.

use serde::{Deserialize, Serialize};

/// Phase of a single reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePhase {
    /// Nothing computed yet
    Start,
    /// Operations computed
    Diffed,
    /// Batches being applied
    Applying,
    /// Every operation applied
    Converged,
    /// Some operations applied, then a fatal failure
    PartiallyApplied,
    /// Fatal failure before anything was applied
    Failed,
}

impl ReconcilePhase {
    /// Whether the phase ends the reconciliation
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Converged | Self::PartiallyApplied | Self::Failed)
    }
}

/// Phases reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: ReconcilePhase) -> Vec<ReconcilePhase> {
    use ReconcilePhase::{Applying, Converged, Diffed, Failed, PartiallyApplied, Start};
    match from {
        Start => vec![Diffed],
        Diffed => vec![Applying],
        Applying => vec![Converged, PartiallyApplied, Failed],
        Converged | PartiallyApplied | Failed => vec![],
    }
}

/// Validate a phase transition
///
/// # Errors
/// Returns [`PhaseError::IllegalTransition`] if `to` is not reachable from `from`
pub fn validate_transition(from: ReconcilePhase, to: ReconcilePhase) -> Result<(), PhaseError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(PhaseError::IllegalTransition { from, to })
    }
}

/// State machine errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PhaseError {
    /// Transition not in the allowed set
    #[error("illegal reconciliation transition {from:?} -> {to:?}")]
    IllegalTransition {
        /// Current phase
        from: ReconcilePhase,
        /// Requested phase
        to: ReconcilePhase,
    },
}

/// Current phase of a running reconciliation
#[derive(Debug)]
pub(crate) struct PhaseTracker {
    current: ReconcilePhase,
}

impl PhaseTracker {
    pub(crate) fn new() -> Self {
        Self {
            current: ReconcilePhase::Start,
        }
    }

    pub(crate) fn current(&self) -> ReconcilePhase {
        self.current
    }

    /// Advance; an illegal step is an engine bug
    pub(crate) fn advance(&mut self, to: ReconcilePhase) {
        debug_assert!(
            validate_transition(self.current, to).is_ok(),
            "illegal reconciliation transition {:?} -> {to:?}",
            self.current
        );
        tracing::trace!(from = ?self.current, ?to, "reconcile phase");
        self.current = to;
    }
}
