use async_trait::async_trait;
use fedplane_core::Subscribe;
use fedplane_model::TaskEvent;

use crate::subscriber::view::log_event;

/// Writes every task lifecycle event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct Subscriber;

impl Subscriber {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for Subscriber {
    async fn on_event(&self, event: &TaskEvent) {
        log_event(event);
    }

    fn name(&self) -> &'static str {
        "journal"
    }

    fn queue_capacity(&self) -> usize {
        2048
    }
}
