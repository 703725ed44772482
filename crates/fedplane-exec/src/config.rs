use std::time::Duration;

use crate::error::ExecError;

/// Limits applied when a task or step does not carry its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Used for steps with `max_execution_seconds == 0`. Zero means unlimited.
    pub default_step_timeout: Duration,
    /// Used for tasks with `max_execution_seconds == 0`. Zero means unlimited.
    pub default_task_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_step_timeout: Duration::ZERO,
            default_task_timeout: Duration::from_secs(2 * 60 * 60),
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), ExecError> {
        if !self.default_task_timeout.is_zero()
            && !self.default_step_timeout.is_zero()
            && self.default_step_timeout > self.default_task_timeout
        {
            return Err(ExecError::InvalidInput(
                "default step timeout exceeds default task timeout".into(),
            ));
        }
        Ok(())
    }

    /// Effective step limit; `None` means unlimited.
    pub fn step_timeout(&self, step_secs: u64) -> Option<Duration> {
        match step_secs {
            0 if self.default_step_timeout.is_zero() => None,
            0 => Some(self.default_step_timeout),
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn task_timeout(&self, task_secs: u64) -> Option<Duration> {
        match task_secs {
            0 if self.default_task_timeout.is_zero() => None,
            0 => Some(self.default_task_timeout),
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
