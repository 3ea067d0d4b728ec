//! Per-file upload lifecycle and the table of legal transitions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where a file is in its upload lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    /// Selected but not yet queued by the user.
    #[default]
    Unqueued,
    Queued,
    Submitting,
    /// Bytes are on the remote side; waiting for the ingest confirmation call.
    Finalizing,
    Success,
    /// Needs a manual retry. Never terminal.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Illegal status transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: LifecycleStatus,
    pub to: LifecycleStatus,
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStatus::Unqueued => "unqueued",
            LifecycleStatus::Queued => "queued",
            LifecycleStatus::Submitting => "submitting",
            LifecycleStatus::Finalizing => "finalizing",
            LifecycleStatus::Success => "success",
            LifecycleStatus::Error => "error",
        }
    }

    /// Statuses that occupy a scheduler slot.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            LifecycleStatus::Submitting | LifecycleStatus::Finalizing
        )
    }

    /// Whether `self -> next` appears in the transition table.
    pub fn can_transition_to(&self, next: LifecycleStatus) -> bool {
        use LifecycleStatus::*;
        matches!(
            (self, next),
            (Unqueued, Queued)
                | (Queued, Submitting)
                | (Queued, Error)
                | (Submitting, Finalizing)
                | (Submitting, Error)
                | (Finalizing, Success)
                | (Finalizing, Error)
                | (Error, Queued)
        )
    }
}

impl std::fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate a transition against the table.
pub fn check_transition(
    from: LifecycleStatus,
    to: LifecycleStatus,
) -> Result<(), TransitionError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}
