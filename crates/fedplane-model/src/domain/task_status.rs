use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Execution state shared by tasks and their steps.
///
/// ```text
/// NotStarted/Init -> Running -> Success
///                            -> Failure        (retryable)
///                            -> Timeout
///                            -> ForceTerminate (operator, terminal)
/// ```
///
/// Variant names are persisted verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    Init,
    NotStarted,
    Running,
    Success,
    Failure,
    Timeout,
    ForceTerminate,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 7] = [
        TaskStatus::Init,
        TaskStatus::NotStarted,
        TaskStatus::Running,
        TaskStatus::Success,
        TaskStatus::Failure,
        TaskStatus::Timeout,
        TaskStatus::ForceTerminate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Init => "Init",
            TaskStatus::NotStarted => "NotStarted",
            TaskStatus::Running => "Running",
            TaskStatus::Success => "Success",
            TaskStatus::Failure => "Failure",
            TaskStatus::Timeout => "Timeout",
            TaskStatus::ForceTerminate => "ForceTerminate",
        }
    }

    /// Returns `true` once the task will not transition any further on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success
                | TaskStatus::Failure
                | TaskStatus::Timeout
                | TaskStatus::ForceTerminate
        )
    }

    /// Returns `true` while an equivalent task would race this one.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            TaskStatus::Init | TaskStatus::NotStarted | TaskStatus::Running
        )
    }

    /// `Failure` is the only state a task may be retried from.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskStatus::Failure)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ModelError::UnknownStatus(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TaskStatus::Success.is_terminal());
        assert!(TaskStatus::Failure.is_terminal());
        assert!(TaskStatus::Timeout.is_terminal());
        assert!(TaskStatus::ForceTerminate.is_terminal());

        assert!(!TaskStatus::Init.is_terminal());
        assert!(!TaskStatus::NotStarted.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn only_failure_is_retryable() {
        for status in TaskStatus::ALL {
            assert_eq!(status.is_retryable(), status == TaskStatus::Failure);
        }
    }

    #[test]
    fn persisted_verbatim() {
        let json = serde_json::to_string(&TaskStatus::ForceTerminate).unwrap();
        assert_eq!(json, r#""ForceTerminate""#);

        let back: TaskStatus = serde_json::from_str(r#""NotStarted""#).unwrap();
        assert_eq!(back, TaskStatus::NotStarted);
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("running".parse::<TaskStatus>().unwrap(), TaskStatus::Running);
        assert!("bogus".parse::<TaskStatus>().is_err());
    }
}
