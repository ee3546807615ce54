//! # stepgraph-core
//!
//! Data model and evaluation primitives for the stepgraph workflow
//! orchestration engine:
//!
//! - [`task`] / [`workflow`] -- the declarative task-graph model, validated
//!   at construction time
//! - [`condition`] -- the expression and routing-map condition evaluators
//! - [`state`] -- the shared key-value store scoped to one workflow
//! - [`context`] -- per-run output accumulation and `{{var}}` substitution
//! - [`yaml`] -- YAML workflow definitions
//!
//! Execution lives in the companion `stepgraph-engine` crate; this crate has
//! no opinion on how steps actually run.

pub mod condition;
pub mod context;
pub mod error;
pub mod state;
pub mod task;
pub mod workflow;
pub mod yaml;

pub use condition::{
    CompareOp, Condition, ConditionAst, ConditionContext, DictCondition, ExpressionCondition,
};
pub use context::{substitute, ContextAccumulator, MissingToken};
pub use error::{CoreError, Result};
pub use state::SharedState;
pub use task::{AgentConfig, ExecutionPolicy, OnError, RouteTargets, Task, TaskType};
pub use workflow::{ProcessMode, Workflow};
pub use yaml::{YamlStepDef, YamlWorkflowDef};
