mod journal;
mod supervisor;
mod view;

pub use journal::Subscriber;
pub use supervisor::SupervisorJournal;
pub use view::{View, log_event, message_for};
