//! Hierarchical manager validation
//!
//! In hierarchical mode every step passes through a per-step gate:
//! `Pending -> Executed -> Accepted | Rejected`. After the executor
//! produces output, a manager agent reviews it against the step's goal and
//! answers `ACCEPT` or `REJECT: <reason>`. A rejection fails the step and
//! the whole run.

use crate::error::{EngineError, Result};
use crate::executor::ChatAgent;
use std::sync::Arc;
use stepgraph_core::Task;
use tracing::debug;

/// Per-step validation states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValidationState {
    #[default]
    Pending,
    Executed,
    Accepted,
    Rejected,
}

/// Tracks one step through the validation gate.
#[derive(Debug, Clone, Default)]
pub struct ValidationGate {
    state: ValidationState,
}

impl ValidationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ValidationState {
        self.state
    }

    /// The step's executor has produced output.
    pub fn mark_executed(&mut self) {
        debug_assert_eq!(self.state, ValidationState::Pending);
        self.state = ValidationState::Executed;
    }

    /// Apply the manager's verdict.
    pub fn resolve(&mut self, verdict: &ManagerVerdict) {
        debug_assert_eq!(self.state, ValidationState::Executed);
        self.state = match verdict {
            ManagerVerdict::Accepted => ValidationState::Accepted,
            ManagerVerdict::Rejected(_) => ValidationState::Rejected,
        };
    }
}

/// The manager's answer for one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerVerdict {
    Accepted,
    Rejected(String),
}

/// Prompt the manager reviews a step with.
pub fn review_prompt(task: &Task, output: &str) -> String {
    let goal = task
        .expected_output
        .as_deref()
        .unwrap_or("the step's stated action");

    format!(
        "You are reviewing the output of workflow step '{name}'.\n\
         Step action: {action}\n\
         Expected outcome: {goal}\n\n\
         Step output:\n{output}\n\n\
         Reply with exactly 'ACCEPT' if the output satisfies the expected \
         outcome, or 'REJECT: <reason>' if it does not.",
        name = task.name,
        action = task.action,
    )
}

/// Interpret the manager's reply.
///
/// Anything that is not a recognizable acceptance counts as a rejection,
/// carrying the raw reply as the reason.
pub fn parse_verdict(reply: &str) -> ManagerVerdict {
    let trimmed = reply.trim();
    let lower = trimmed.to_lowercase();

    if lower.starts_with("accept") || lower.starts_with("approve") {
        return ManagerVerdict::Accepted;
    }

    if let Some(rest) = lower
        .starts_with("reject")
        .then(|| trimmed.splitn(2, ':').nth(1))
        .flatten()
    {
        return ManagerVerdict::Rejected(rest.trim().to_string());
    }
    if lower.starts_with("reject") {
        return ManagerVerdict::Rejected(trimmed.to_string());
    }

    // a rambling answer that still lands on acceptance
    if lower.contains("accept") && !lower.contains("not accept") {
        return ManagerVerdict::Accepted;
    }

    ManagerVerdict::Rejected(trimmed.to_string())
}

/// Ask the manager to judge a step's output.
pub async fn validate_step(
    manager: &Arc<dyn ChatAgent>,
    task: &Task,
    output: &str,
) -> Result<ManagerVerdict> {
    let prompt = review_prompt(task, output);
    let reply = manager
        .chat(&prompt)
        .await
        .map_err(|err| EngineError::StepExecution {
            step: task.name.clone(),
            message: format!("manager call failed: {err}"),
        })?;
    let verdict = parse_verdict(&reply);
    debug!(step = %task.name, ?verdict, "manager verdict");
    Ok(verdict)
}
