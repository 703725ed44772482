use std::sync::Arc;

use async_trait::async_trait;
use fedplane_model::TaskEvent;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{error, warn};

/// Receiver of task lifecycle events.
///
/// Each subscriber drains its own bounded queue on a dedicated worker, the way taskvisor subscribers do;
/// a slow subscriber loses events instead of stalling the publisher.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    async fn on_event(&self, event: &TaskEvent);

    fn name(&self) -> &'static str {
        "subscriber"
    }

    fn queue_capacity(&self) -> usize {
        1024
    }
}

#[derive(Clone)]
struct Queue {
    name: &'static str,
    tx: mpsc::Sender<TaskEvent>,
}

/// Fan-out of events to every registered subscriber.
///
/// A subscriber that panics loses its worker; the others keep receiving.
#[derive(Clone, Default)]
pub struct EventBus {
    queues: Vec<Queue>,
}

impl EventBus {
    /// Spawns one worker per subscriber, so it must be called inside a tokio runtime.
    pub fn new(subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        Self {
            queues: subscribers.into_iter().map(spawn_worker).collect(),
        }
    }

    pub fn push(&mut self, subscriber: Arc<dyn Subscribe>) {
        self.queues.push(spawn_worker(subscriber));
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Never blocks.
    pub fn publish(&self, event: TaskEvent) {
        for queue in &self.queues {
            match queue.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(ev)) => warn!(
                    subscriber = queue.name,
                    task_id = %ev.task_id,
                    kind = ?ev.kind,
                    "subscriber queue full; event dropped"
                ),
                Err(TrySendError::Closed(ev)) => error!(
                    subscriber = queue.name,
                    task_id = %ev.task_id,
                    kind = ?ev.kind,
                    "subscriber worker is gone; event dropped"
                ),
            }
        }
    }
}

fn spawn_worker(subscriber: Arc<dyn Subscribe>) -> Queue {
    let (tx, mut rx) = mpsc::channel::<TaskEvent>(subscriber.queue_capacity().max(1));
    let name = subscriber.name();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            subscriber.on_event(&event).await;
        }
    });
    Queue { name, tx }
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use fedplane_model::{EventKind, TaskId};
    use tokio::sync::Notify;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<EventKind>>,
        notify: Notify,
    }

    impl Recorder {
        async fn wait_for(&self, n: usize) -> Vec<EventKind> {
            tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    let notified = self.notify.notified();
                    let seen = self.seen.lock().unwrap().clone();
                    if seen.len() >= n {
                        return seen;
                    }
                    notified.await;
                }
            })
            .await
            .unwrap()
        }
    }

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, event: &TaskEvent) {
            self.seen.lock().unwrap().push(event.kind);
            self.notify.notify_waiters();
        }
    }

    struct Panicker;

    #[async_trait]
    impl Subscribe for Panicker {
        async fn on_event(&self, _: &TaskEvent) {
            panic!("boom");
        }
    }

    /// Never finishes handling an event.
    struct Stuck;

    #[async_trait]
    impl Subscribe for Stuck {
        async fn on_event(&self, _: &TaskEvent) {
            std::future::pending::<()>().await;
        }

        fn queue_capacity(&self) -> usize {
            1
        }
    }

    fn event(kind: EventKind) -> TaskEvent {
        TaskEvent::new(kind, TaskId::from("t1"), "InstallFederation")
    }

    #[tokio::test]
    async fn panicking_subscriber_does_not_starve_others() {
        let rec = Arc::new(Recorder::default());
        let bus = EventBus::new(vec![Arc::new(Panicker), rec.clone()]);

        bus.publish(event(EventKind::TaskDispatched));
        bus.publish(event(EventKind::TaskSucceeded));
        assert_eq!(
            rec.wait_for(2).await,
            vec![EventKind::TaskDispatched, EventKind::TaskSucceeded]
        );
    }

    #[tokio::test]
    async fn stuck_subscriber_does_not_block_publisher() {
        let rec = Arc::new(Recorder::default());
        let bus = EventBus::new(vec![Arc::new(Stuck), rec.clone()]);

        for _ in 0..10 {
            bus.publish(event(EventKind::StepStarting));
        }
        assert_eq!(rec.wait_for(10).await.len(), 10);
    }
}
