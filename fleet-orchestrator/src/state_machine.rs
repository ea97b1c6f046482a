use std::fmt;

use crate::logger::{LifecycleEvent, LifecycleObserver};

/// Phase of a single record within one lifecycle call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// No identifier yet.
    Unprovisioned,
    /// Carries an identifier from a previous run; will be loaded, not created.
    Identified,
    Provisioning,
    Polling,
    Confirmed,
    Adopted,
    Failed,
    Cancelled,
}

impl LifecyclePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecyclePhase::Unprovisioned => "unprovisioned",
            LifecyclePhase::Identified => "identified",
            LifecyclePhase::Provisioning => "provisioning",
            LifecyclePhase::Polling => "polling",
            LifecyclePhase::Confirmed => "confirmed",
            LifecyclePhase::Adopted => "adopted",
            LifecyclePhase::Failed => "failed",
            LifecyclePhase::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LifecyclePhase::Confirmed
                | LifecyclePhase::Adopted
                | LifecyclePhase::Failed
                | LifecyclePhase::Cancelled
        )
    }

    pub fn can_transition_to(self, next: LifecyclePhase) -> bool {
        use LifecyclePhase::*;
        matches!(
            (self, next),
            (Unprovisioned, Provisioning)
                | (Unprovisioned, Failed)
                | (Identified, Adopted)
                | (Identified, Failed)
                | (Provisioning, Polling)
                | (Provisioning, Failed)
                | (Polling, Confirmed)
                | (Polling, Failed)
                | (Polling, Cancelled)
        )
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the phase of one record for the duration of a lifecycle call and reports
/// every accepted transition to the observer.
pub struct PhaseTracker<'a> {
    name: String,
    phase: LifecyclePhase,
    observer: &'a dyn LifecycleObserver,
}

impl<'a> PhaseTracker<'a> {
    pub fn new(
        name: impl Into<String>,
        phase: LifecyclePhase,
        observer: &'a dyn LifecycleObserver,
    ) -> Self {
        Self {
            name: name.into(),
            phase,
            observer,
        }
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    /// Move to `next`. Returns false (and leaves the phase unchanged) for a transition the
    /// machine does not allow.
    pub fn advance(&mut self, next: LifecyclePhase) -> bool {
        if !self.phase.can_transition_to(next) {
            tracing::warn!(
                record = %self.name,
                from = %self.phase,
                to = %next,
                "[state_machine] rejected transition"
            );
            return false;
        }
        let from = self.phase;
        self.phase = next;
        self.observer.notify(&LifecycleEvent::Phase {
            name: self.name.clone(),
            from,
            to: next,
        });
        true
    }
}
