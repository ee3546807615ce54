//! Task model
//!
//! A [`Task`] is a named unit of work inside a workflow: template text for
//! the executing agent, optional routing edges, and a per-step execution
//! policy. Tasks are built at configuration time and are immutable in shape
//! afterwards; execution never mutates them.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Inline agent specification attached to a task or workflow default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Role the agent plays, e.g. "Research Analyst"
    pub role: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backstory: Option<String>,

    /// Model identifier, e.g. "gpt-4o-mini"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<String>,
}

impl AgentConfig {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            goal: None,
            backstory: None,
            llm: None,
        }
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = Some(goal.into());
        self
    }

    pub fn with_backstory(mut self, backstory: impl Into<String>) -> Self {
        self.backstory = Some(backstory.into());
        self
    }

    pub fn with_llm(mut self, llm: impl Into<String>) -> Self {
        self.llm = Some(llm.into());
        self
    }
}

/// How a task's output is interpreted by the router.
///
/// `Decision` and `Loop` outputs are routing keys matched against the task's
/// [`condition`](Task::condition) map; `Normal` outputs are free text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    #[default]
    Normal,
    Decision,
    Loop,
}

/// Failure policy applied when a step's executor errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    /// Mark the step failed and halt the whole run (default)
    #[default]
    Stop,
    /// Mark the step failed but keep routing as if the output were empty
    Continue,
    /// Re-invoke up to `max_retries` times, then behave like `Stop`
    Retry,
}

/// Per-step execution policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub on_error: OnError,

    /// Opt this step into concurrent scheduling when it is the entry of a
    /// forked branch in an async run
    #[serde(default)]
    pub async_execution: bool,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            on_error: OnError::default(),
            async_execution: false,
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

/// Routing targets for one condition key: a bare step name or a list.
///
/// Definitions may write either `approved: publish` or
/// `approved: [publish, notify]`; both normalize to a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RouteTargets {
    One(String),
    Many(Vec<String>),
}

impl RouteTargets {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            RouteTargets::One(name) => vec![name.clone()],
            RouteTargets::Many(names) => names.clone(),
        }
    }
}

impl From<&str> for RouteTargets {
    fn from(name: &str) -> Self {
        RouteTargets::One(name.to_string())
    }
}

impl From<Vec<String>> for RouteTargets {
    fn from(names: Vec<String>) -> Self {
        RouteTargets::Many(names)
    }
}

/// A named unit of work bound to an executor within a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique name within the workflow
    pub name: String,

    /// What to do; may contain `{{var}}` template tokens
    pub action: String,

    /// Goal text a hierarchical manager judges the output against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,

    /// Inline agent spec; `None` means "use the workflow default"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_config: Option<AgentConfig>,

    /// Tool identifiers handed to the resolved agent
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,

    #[serde(default)]
    pub task_type: TaskType,

    /// Steps to run next when no condition applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_tasks: Option<Vec<String>>,

    /// Routing-key -> next steps, for decision/loop tasks. Keys are matched
    /// case-insensitively. Targets may point back at this or an earlier step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<HashMap<String, RouteTargets>>,

    /// Restrict visible context to these steps' outputs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_from: Option<Vec<String>>,

    /// When true (default), all prior outputs in the run are visible;
    /// when false, only `{{previous_output}}`
    #[serde(default = "default_true")]
    pub retain_full_context: bool,

    /// Extra variable name this step's output is bound under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_variable: Option<String>,

    #[serde(default)]
    pub execution: ExecutionPolicy,

    /// Marks a graph entry point; defaults to the first declared step
    #[serde(default)]
    pub is_start: bool,
}

impl Task {
    pub fn new(name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: action.into(),
            expected_output: None,
            agent_config: None,
            tools: Vec::new(),
            task_type: TaskType::default(),
            next_tasks: None,
            condition: None,
            context_from: None,
            retain_full_context: true,
            output_variable: None,
            execution: ExecutionPolicy::default(),
            is_start: false,
        }
    }

    pub fn with_expected_output(mut self, expected: impl Into<String>) -> Self {
        self.expected_output = Some(expected.into());
        self
    }

    pub fn with_agent_config(mut self, config: AgentConfig) -> Self {
        self.agent_config = Some(config);
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    pub fn with_next_tasks(mut self, next: Vec<String>) -> Self {
        self.next_tasks = Some(next);
        self
    }

    pub fn with_condition(mut self, condition: HashMap<String, RouteTargets>) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_context_from(mut self, steps: Vec<String>) -> Self {
        self.context_from = Some(steps);
        self
    }

    pub fn with_retain_full_context(mut self, retain: bool) -> Self {
        self.retain_full_context = retain;
        self
    }

    pub fn with_output_variable(mut self, name: impl Into<String>) -> Self {
        self.output_variable = Some(name.into());
        self
    }

    pub fn with_execution(mut self, execution: ExecutionPolicy) -> Self {
        self.execution = execution;
        self
    }

    pub fn as_start(mut self) -> Self {
        self.is_start = true;
        self
    }

    /// Whether this task's output is a routing key.
    pub fn is_routing(&self) -> bool {
        matches!(self.task_type, TaskType::Decision | TaskType::Loop)
    }

    /// Case-insensitive condition lookup, targets normalized to a list.
    pub fn route_for(&self, key: &str) -> Option<Vec<String>> {
        let condition = self.condition.as_ref()?;
        let wanted = key.trim().to_lowercase();
        condition
            .iter()
            .find(|(candidate, _)| candidate.trim().to_lowercase() == wanted)
            .map(|(_, targets)| targets.to_vec())
    }

    /// Serialize into a JSON value.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Reconstruct a task from a JSON value produced by [`to_value`](Self::to_value).
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}
