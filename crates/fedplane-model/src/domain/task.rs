use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Params, Step, TaskId, TaskStatus, timestamp::now_rfc3339};

/// `CommonParams` keys whose values never leave the control plane in clear text.
pub const SENSITIVE_PARAM_KEYS: [&str; 3] = ["userToken", "kubeConfig", "password"];

/// Replacement for masked values.
pub const MASKED_VALUE: &str = "******";

/// A durable, step-sequenced unit of asynchronous work.
///
/// Invariants:
/// - `step_sequence` is non-empty once built and every entry has a matching `steps` record;
/// - `current_step` is a member of `step_sequence` while the task is not terminal;
/// - `task_id` never changes after assignment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(rename = "taskID")]
    pub task_id: TaskId,
    /// Secondary correlation key, e.g. a cluster or cluster-pair id. Not unique.
    #[serde(default)]
    pub task_index: String,
    pub task_type: String,
    #[serde(default)]
    pub task_name: String,
    /// Authoritative execution order.
    pub step_sequence: Vec<String>,
    pub steps: BTreeMap<String, Step>,
    #[serde(default)]
    pub current_step: String,
    #[serde(default)]
    pub common_params: Params,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
    #[serde(default)]
    pub last_update: String,
    #[serde(default)]
    pub execution_time: u64,
    #[serde(default)]
    pub max_execution_seconds: u64,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub updater: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub call_back_func_name: String,
    #[serde(default)]
    pub force_terminate: bool,
}

impl Task {
    /// New task in `Init` with a freshly generated id and no steps.
    pub fn new(task_type: impl Into<String>, task_name: impl Into<String>) -> Self {
        let now = now_rfc3339();
        Self {
            task_id: TaskId::generate(),
            task_type: task_type.into(),
            task_name: task_name.into(),
            status: TaskStatus::Init,
            start: now.clone(),
            last_update: now,
            ..Default::default()
        }
    }

    /// Append a step to the end of the sequence.
    ///
    /// The first appended step becomes `current_step`.
    pub fn push_step(&mut self, step: Step) {
        if self.step_sequence.is_empty() {
            self.current_step = step.name.clone();
        }
        self.step_sequence.push(step.name.clone());
        self.steps.insert(step.name.clone(), step);
    }

    pub fn first_step(&self) -> Option<&str> {
        self.step_sequence.first().map(String::as_str)
    }

    pub fn contains_step(&self, name: &str) -> bool {
        self.step_sequence.iter().any(|s| s == name)
    }

    pub fn step_index(&self, name: &str) -> Option<usize> {
        self.step_sequence.iter().position(|s| s == name)
    }

    /// Steps in execution order.
    pub fn ordered_steps(&self) -> impl Iterator<Item = &Step> {
        self.step_sequence
            .iter()
            .filter_map(|name| self.steps.get(name))
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.get(name)
    }

    pub fn step_mut(&mut self, name: &str) -> Option<&mut Step> {
        self.steps.get_mut(name)
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.common_params.get(key).map(String::as_str)
    }

    /// Check the structural invariants of a task.
    ///
    /// Returns a description of the first violation.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.task_id.is_empty() {
            return Err("task id is empty".into());
        }
        if self.step_sequence.is_empty() {
            return Err("step sequence is empty".into());
        }
        if let Some(missing) = self
            .step_sequence
            .iter()
            .find(|name| !self.steps.contains_key(*name))
        {
            return Err(format!("step {missing} is sequenced but not defined"));
        }
        if !self.status.is_terminal() && !self.contains_step(&self.current_step) {
            return Err(format!(
                "current step {:?} is not part of the step sequence",
                self.current_step
            ));
        }
        Ok(())
    }

    /// Copy of the task with sensitive common parameters masked.
    pub fn masked(&self) -> Task {
        let mut out = self.clone();
        for key in SENSITIVE_PARAM_KEYS {
            if let Some(value) = out.common_params.get_mut(key)
                && !value.is_empty()
            {
                *value = MASKED_VALUE.to_string();
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Task {
        let mut task = Task::new("InstallFederation", "install federation");
        task.push_step(Step::new("one", "first"));
        task.push_step(Step::new("two", "second"));
        task.push_step(Step::new("three", "third"));
        task
    }

    #[test]
    fn first_pushed_step_becomes_current() {
        let task = sample();
        assert_eq!(task.current_step, "one");
        assert_eq!(task.first_step(), Some("one"));
        assert_eq!(task.step_index("three"), Some(2));
        assert!(task.check_invariants().is_ok());
    }

    #[test]
    fn ordered_steps_follow_sequence_not_map() {
        let task = sample();
        let names: Vec<_> = task.ordered_steps().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["one", "two", "three"]);
    }

    #[test]
    fn invariants_reject_foreign_current_step() {
        let mut task = sample();
        task.current_step = "nope".into();
        assert!(task.check_invariants().is_err());

        task.status = TaskStatus::Success;
        assert!(task.check_invariants().is_ok());
    }

    #[test]
    fn invariants_reject_empty_sequence() {
        let task = Task::new("t", "n");
        assert!(task.check_invariants().is_err());
    }

    #[test]
    fn masking_hides_only_sensitive_values() {
        let mut task = sample();
        task.common_params.insert("userToken".into(), "secret".into());
        task.common_params.insert("clusterId".into(), "c1".into());

        let masked = task.masked();
        assert_eq!(masked.param("userToken"), Some(MASKED_VALUE));
        assert_eq!(masked.param("clusterId"), Some("c1"));
        assert_eq!(task.param("userToken"), Some("secret"));
    }

    #[test]
    fn document_uses_camel_case_keys() {
        let task = sample();
        let doc = serde_json::to_value(&task).unwrap();
        assert!(doc.get("taskID").is_some());
        assert!(doc.get("stepSequence").is_some());
        assert!(doc.get("callBackFuncName").is_some());
    }
}
