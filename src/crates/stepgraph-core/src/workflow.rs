//! Workflow model
//!
//! A [`Workflow`] is an ordered list of [`Task`]s plus the process mode and
//! per-workflow defaults. Structural problems -- duplicate step names, edges
//! pointing at steps that do not exist -- are rejected at construction, not
//! at run time. Reachability and cycles are deliberately not checked: loops
//! are legal and are expected to terminate through tool logic and the
//! shared state, not through the engine.

use crate::error::{CoreError, Result};
use crate::state::SharedState;
use crate::task::{AgentConfig, Task};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Execution mode for a workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessMode {
    /// Steps run in declaration order; decision conditions may still
    /// redirect within the list
    #[default]
    Sequential,
    /// Free graph traversal following `next_tasks`/`condition` edges
    Workflow,
    /// Sequential traversal gated by a manager agent per step
    Hierarchical,
}

/// A declarative task graph with its shared state.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: String,
    pub tasks: Vec<Task>,
    pub process: ProcessMode,
    pub default_agent_config: Option<AgentConfig>,
    pub default_llm: Option<String>,
    pub manager_llm: Option<String>,
    /// Master switch for context passing between steps
    pub context_enabled: bool,
    state: SharedState,
}

impl Workflow {
    /// Build and validate a workflow.
    ///
    /// # Errors
    ///
    /// [`CoreError::Definition`] when step names collide or a
    /// `next_tasks`/`condition` target names an undefined step.
    pub fn new(name: impl Into<String>, tasks: Vec<Task>, process: ProcessMode) -> Result<Self> {
        validate_tasks(&tasks)?;
        Ok(Self {
            name: name.into(),
            tasks,
            process,
            default_agent_config: None,
            default_llm: None,
            manager_llm: None,
            context_enabled: true,
            state: SharedState::new(),
        })
    }

    pub fn with_default_agent_config(mut self, config: AgentConfig) -> Self {
        self.default_agent_config = Some(config);
        self
    }

    pub fn with_default_llm(mut self, llm: impl Into<String>) -> Self {
        self.default_llm = Some(llm.into());
        self
    }

    pub fn with_manager_llm(mut self, llm: impl Into<String>) -> Self {
        self.manager_llm = Some(llm.into());
        self
    }

    pub fn with_context_enabled(mut self, enabled: bool) -> Self {
        self.context_enabled = enabled;
        self
    }

    /// The workflow-scoped state store. Persists across runs until cleared.
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Look up a task by name.
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.name == name)
    }

    /// Declaration index of a task.
    pub fn task_index(&self, name: &str) -> Option<usize> {
        self.tasks.iter().position(|task| task.name == name)
    }

    /// Entry point: the first task flagged `is_start`, else the first
    /// declared task.
    pub fn start_task(&self) -> Option<&Task> {
        self.tasks
            .iter()
            .find(|task| task.is_start)
            .or_else(|| self.tasks.first())
    }
}

fn validate_tasks(tasks: &[Task]) -> Result<()> {
    let mut names = HashSet::new();
    for task in tasks {
        if !names.insert(task.name.as_str()) {
            return Err(CoreError::Definition(format!(
                "duplicate step name '{}'",
                task.name
            )));
        }
    }

    let check_target = |owner: &str, target: &str| -> Result<()> {
        if names.contains(target) {
            Ok(())
        } else {
            Err(CoreError::Definition(format!(
                "step '{owner}' routes to undefined step '{target}'"
            )))
        }
    };

    for task in tasks {
        if let Some(next) = &task.next_tasks {
            for target in next {
                check_target(&task.name, target)?;
            }
        }
        if let Some(condition) = &task.condition {
            for targets in condition.values() {
                for target in targets.to_vec() {
                    check_target(&task.name, &target)?;
                }
            }
        }
    }

    Ok(())
}
