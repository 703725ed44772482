use fedplane_model::{ModelError, TaskStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Missing or malformed input; nothing was persisted or dispatched.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Duplicate in-flight work or a conflicting resource.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("task {task_id} is {status}, expected {expected}")]
    InvalidState {
        task_id: String,
        status: TaskStatus,
        expected: &'static str,
    },

    #[error("store error: {0}")]
    Store(String),

    /// A downstream collaborator (cluster API, project service) failed.
    #[error("collaborator error: {0}")]
    Collaborator(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    /// The task supervisor refused a submission.
    #[error("supervisor error: {0}")]
    Supervisor(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Model(#[from] ModelError),
}

impl CoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Validation error naming a required field that was left empty.
    pub fn missing(field: &str) -> Self {
        CoreError::Validation(format!("{field} is required"))
    }

    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound { .. })
    }

    #[inline]
    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::Conflict(_))
    }

    /// Errors the next reconciliation tick is expected to recover from.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Store(_) | CoreError::Collaborator(_))
    }
}

/// Map a poisoned lock into a store error.
pub(crate) fn poisoned<T>(_: std::sync::PoisonError<T>) -> CoreError {
    CoreError::Store("lock poisoned".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_helpers() {
        assert!(CoreError::not_found("task", "t1").is_not_found());
        assert!(CoreError::Conflict("dup".into()).is_conflict());
        assert!(CoreError::Collaborator("down".into()).is_transient());
        assert!(!CoreError::missing("userToken").is_transient());
    }

    #[test]
    fn messages_name_the_subject() {
        assert_eq!(
            CoreError::missing("userToken").to_string(),
            "validation failed: userToken is required"
        );
        assert_eq!(
            CoreError::not_found("task", "t1").to_string(),
            "task not found: t1"
        );
    }
}
