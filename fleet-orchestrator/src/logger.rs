use crate::state_machine::LifecyclePhase;
use tracing::{debug, info, warn};

/// Something that happened to one record. Events are reported in the order they occur.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Creating {
        name: String,
        region: String,
    },
    Created {
        name: String,
        id: String,
    },
    Tagged {
        name: String,
        id: String,
    },
    Loaded {
        name: String,
        id: String,
        state: String,
    },
    PollTick {
        name: String,
        id: String,
        state: String,
        target: String,
        attempt: u32,
    },
    Phase {
        name: String,
        from: LifecyclePhase,
        to: LifecyclePhase,
    },
    VolumeCreated {
        name: String,
        volume: String,
        volume_id: String,
    },
    VolumeAttached {
        name: String,
        volume_id: String,
        instance_id: String,
    },
    VolumeSkipped {
        name: String,
        volume: String,
        reason: String,
    },
    Terminated {
        name: String,
        id: String,
    },
    Rebooted {
        name: String,
        id: String,
    },
    Failed {
        name: String,
        error: String,
    },
}

/// Injected sink for lifecycle events.
pub trait LifecycleObserver: Send + Sync {
    fn notify(&self, event: &LifecycleEvent);
}

/// Forwards events to `tracing`.
pub struct TracingObserver;

impl LifecycleObserver for TracingObserver {
    fn notify(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::Creating { name, region } => {
                info!(record = %name, region = %region, "[lifecycle] creating instance")
            }
            LifecycleEvent::Created { name, id } => {
                info!(record = %name, id = %id, "[lifecycle] instance created")
            }
            LifecycleEvent::Tagged { name, id } => {
                debug!(record = %name, id = %id, "[lifecycle] Name tag applied")
            }
            LifecycleEvent::Loaded { name, id, state } => {
                debug!(record = %name, id = %id, state = %state, "[lifecycle] instance loaded")
            }
            LifecycleEvent::PollTick {
                name,
                id,
                state,
                target,
                attempt,
            } => info!(
                record = %name,
                id = %id,
                state = %state,
                target = %target,
                attempt,
                "[lifecycle] waiting for state"
            ),
            LifecycleEvent::Phase { name, from, to } => {
                debug!(record = %name, from = %from, to = %to, "[lifecycle] phase")
            }
            LifecycleEvent::VolumeCreated {
                name,
                volume,
                volume_id,
            } => info!(record = %name, volume = %volume, volume_id = %volume_id, "[lifecycle] volume created"),
            LifecycleEvent::VolumeAttached {
                name,
                volume_id,
                instance_id,
            } => info!(record = %name, volume_id = %volume_id, id = %instance_id, "[lifecycle] volume attached"),
            LifecycleEvent::VolumeSkipped {
                name,
                volume,
                reason,
            } => warn!(record = %name, volume = %volume, reason = %reason, "[lifecycle] volume skipped"),
            LifecycleEvent::Terminated { name, id } => {
                info!(record = %name, id = %id, "[lifecycle] termination requested")
            }
            LifecycleEvent::Rebooted { name, id } => {
                info!(record = %name, id = %id, "[lifecycle] reboot requested")
            }
            LifecycleEvent::Failed { name, error } => {
                warn!(record = %name, error = %error, "[lifecycle] record failed")
            }
        }
    }
}
