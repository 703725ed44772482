use async_trait::async_trait;
use taskvisor::{Event, EventKind, Subscribe};
use tracing::{debug, error, info, trace, warn};

/// Logs what the taskvisor supervisor does with workflow runs and sync controllers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SupervisorJournal;

impl SupervisorJournal {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for SupervisorJournal {
    async fn on_event(&self, event: &Event) {
        log_supervisor_event(event);
    }

    fn name(&self) -> &'static str {
        "supervisor-journal"
    }

    fn queue_capacity(&self) -> usize {
        2048
    }
}

/// What a supervisor slot runs, from its name prefix.
pub(crate) fn unit_of(slot: &str) -> &'static str {
    match slot.split_once('/').map(|(prefix, _)| prefix) {
        Some("task") => "workflow",
        Some("sync") => "sync-controller",
        _ => "other",
    }
}

fn log_supervisor_event(e: &Event) {
    let slot = e.task.as_deref().unwrap_or("-");
    let unit = unit_of(slot);
    let reason = e.reason.as_deref().unwrap_or("-");

    match e.kind {
        EventKind::TaskStarting => debug!(slot, unit, "supervised run starting"),
        EventKind::TaskStopped => trace!(slot, unit, "supervised run stopped"),
        EventKind::TaskFailed => warn!(slot, unit, reason, "supervised run failed"),
        EventKind::ActorDead => error!(slot, unit, reason, "supervised run died"),
        EventKind::TimeoutHit => warn!(
            slot,
            unit,
            timeout_ms = e.timeout_ms.unwrap_or(0),
            "supervised run hit its timeout"
        ),
        EventKind::ControllerRejected => warn!(slot, unit, reason, "supervisor rejected submission"),
        EventKind::ControllerSlotTransition => debug!(slot, unit, reason, "slot transition"),
        EventKind::SubscriberOverflow | EventKind::SubscriberPanicked => {
            error!(slot, reason, "supervisor subscriber lost an event")
        }
        EventKind::ShutdownRequested => info!("supervisor shutdown requested"),
        EventKind::GraceExceeded => warn!("supervised runs outlived the shutdown grace period"),
        EventKind::AllStoppedWithinGrace => info!("all supervised runs stopped"),
        _ => trace!(slot, unit, kind = ?e.kind, "supervisor event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_classified_by_prefix() {
        assert_eq!(unit_of("task/InstallFederation/c1"), "workflow");
        assert_eq!(unit_of("sync/F1"), "sync-controller");
        assert_eq!(unit_of("task"), "other");
        assert_eq!(unit_of("-"), "other");
    }

    #[tokio::test]
    async fn journal_names_itself() {
        let journal = SupervisorJournal::new();
        assert_eq!(journal.name(), "supervisor-journal");
        assert!(journal.queue_capacity() > 0);
    }
}
