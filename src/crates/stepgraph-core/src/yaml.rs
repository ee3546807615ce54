//! YAML workflow definitions
//!
//! Workflows can be declared in a YAML document instead of code:
//!
//! ```yaml
//! name: content-pipeline
//! process: workflow
//! agents:
//!   writer:
//!     role: Staff Writer
//!     llm: gpt-4o-mini
//! steps:
//!   - name: draft
//!     agent: writer
//!     action: "Draft an article about {{topic}}"
//!     expected_output: A complete draft
//!     next_tasks: [review]
//!   - name: review
//!     agent: writer
//!     task_type: decision
//!     action: "Review the draft: {{draft_output}}"
//!     condition:
//!       approved: []
//!       rejected: draft
//! ```

use crate::error::{CoreError, Result};
use crate::task::{AgentConfig, ExecutionPolicy, RouteTargets, Task, TaskType};
use crate::workflow::{ProcessMode, Workflow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Top-level YAML workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YamlWorkflowDef {
    pub name: String,

    #[serde(default)]
    pub process: ProcessMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager_llm: Option<String>,

    /// Named agent specs referenced by steps
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,

    pub steps: Vec<YamlStepDef>,
}

/// One step in a YAML definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YamlStepDef {
    /// Step name; defaults to the agent id, then to `step_<n>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Reference into the top-level `agents` table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,

    pub action: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,

    #[serde(default)]
    pub task_type: TaskType,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_tasks: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<HashMap<String, RouteTargets>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_from: Option<Vec<String>>,

    #[serde(default = "default_retain")]
    pub retain_full_context: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_variable: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionPolicy>,

    #[serde(default)]
    pub is_start: bool,
}

fn default_retain() -> bool {
    true
}

impl YamlWorkflowDef {
    /// Parse a definition from YAML text.
    pub fn from_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Load a definition from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Convert into a validated [`Workflow`].
    pub fn into_workflow(self) -> Result<Workflow> {
        let mut tasks = Vec::with_capacity(self.steps.len());

        for (index, step) in self.steps.into_iter().enumerate() {
            let agent_config = match &step.agent {
                Some(id) => Some(self.agents.get(id).cloned().ok_or_else(|| {
                    CoreError::Definition(format!("step references undefined agent '{id}'"))
                })?),
                None => None,
            };

            let name = step
                .name
                .or_else(|| step.agent.clone())
                .unwrap_or_else(|| format!("step_{}", index + 1));

            let mut task = Task::new(name, step.action);
            task.expected_output = step.expected_output;
            task.agent_config = agent_config;
            task.tools = step.tools;
            task.task_type = step.task_type;
            task.next_tasks = step.next_tasks;
            task.condition = step.condition;
            task.context_from = step.context_from;
            task.retain_full_context = step.retain_full_context;
            task.output_variable = step.output_variable;
            task.execution = step.execution.unwrap_or_default();
            task.is_start = step.is_start;
            tasks.push(task);
        }

        let mut workflow = Workflow::new(self.name, tasks, self.process)?;
        if let Some(manager_llm) = self.manager_llm {
            workflow = workflow.with_manager_llm(manager_llm);
        }
        debug!(
            workflow = %workflow.name,
            steps = workflow.tasks.len(),
            process = ?workflow.process,
            "loaded workflow definition"
        );
        Ok(workflow)
    }
}
