use std::borrow::Borrow;

use fedplane_model::{EventKind, TaskEvent};
use tracing::{debug, error, info, warn};

/// Field accessors with placeholders for absent values.
pub trait View {
    fn kind(&self) -> EventKind;
    fn task_id(&self) -> &str;
    fn task_type(&self) -> &str;
    fn step(&self) -> &str;
    fn reason(&self) -> &str;
}

impl<T> View for T
where
    T: Borrow<TaskEvent>,
{
    #[inline]
    fn kind(&self) -> EventKind {
        self.borrow().kind
    }
    #[inline]
    fn task_id(&self) -> &str {
        self.borrow().task_id.as_str()
    }
    #[inline]
    fn task_type(&self) -> &str {
        &self.borrow().task_type
    }
    #[inline]
    fn step(&self) -> &str {
        self.borrow().step.as_deref().unwrap_or("-")
    }
    #[inline]
    fn reason(&self) -> &str {
        self.borrow().reason.as_deref().unwrap_or("unknown")
    }
}

#[inline]
pub fn message_for(kind: EventKind) -> &'static str {
    match kind {
        // manager
        EventKind::TaskDispatched => "task dispatched to the runtime",
        EventKind::TaskRetried => "failed task handed back to the runtime",

        // steps
        EventKind::StepStarting => "step is starting",
        EventKind::StepSucceeded => "step succeeded",
        EventKind::StepFailed => "step failed",
        EventKind::StepSkipped => "step failed and was skipped",
        EventKind::StepTimeout => "step exceeded its execution limit",

        // terminal
        EventKind::TaskSucceeded => "task finished successfully",
        EventKind::TaskFailed => "task halted in failure; awaiting retry",
        EventKind::TaskTimeout => "task timed out",
        EventKind::TaskForceTerminated => "task force-terminated",
        EventKind::CallbackFailed => "completion callback failed",
    }
}

#[inline]
pub fn log_event<E: View>(e: E) {
    let msg = message_for(e.kind());

    match e.kind() {
        EventKind::TaskDispatched | EventKind::TaskRetried | EventKind::TaskSucceeded => {
            info!(task_id = e.task_id(), task_type = e.task_type(), "{msg}")
        }

        EventKind::StepStarting | EventKind::StepSucceeded => {
            debug!(task_id = e.task_id(), step = e.step(), "{msg}")
        }
        EventKind::StepFailed => error!(
            task_id = e.task_id(),
            step = e.step(),
            reason = e.reason(),
            "{msg}"
        ),
        EventKind::StepSkipped | EventKind::StepTimeout => warn!(
            task_id = e.task_id(),
            step = e.step(),
            reason = e.reason(),
            "{msg}"
        ),

        EventKind::TaskFailed | EventKind::CallbackFailed => error!(
            task_id = e.task_id(),
            task_type = e.task_type(),
            reason = e.reason(),
            "{msg}"
        ),
        EventKind::TaskTimeout | EventKind::TaskForceTerminated => {
            warn!(task_id = e.task_id(), task_type = e.task_type(), "{msg}")
        }
    }
}

#[cfg(test)]
mod tests {
    use fedplane_model::TaskId;

    use super::*;

    #[test]
    fn view_fills_placeholders() {
        let ev = TaskEvent::new(EventKind::StepFailed, TaskId::from("t1"), "InstallFederation");
        assert_eq!(ev.step(), "-");
        assert_eq!(ev.reason(), "unknown");

        let ev = ev.with_step("checkHostCluster").with_reason("boom");
        assert_eq!((&ev).step(), "checkHostCluster");
        assert_eq!((&ev).reason(), "boom");
        log_event(&ev);
    }

    #[test]
    fn every_kind_has_a_message() {
        for kind in [
            EventKind::TaskDispatched,
            EventKind::TaskRetried,
            EventKind::StepStarting,
            EventKind::StepSucceeded,
            EventKind::StepFailed,
            EventKind::StepSkipped,
            EventKind::StepTimeout,
            EventKind::TaskSucceeded,
            EventKind::TaskFailed,
            EventKind::TaskTimeout,
            EventKind::TaskForceTerminated,
            EventKind::CallbackFailed,
        ] {
            assert!(!message_for(kind).is_empty());
        }
    }
}
