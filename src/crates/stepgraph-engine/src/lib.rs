//! # stepgraph-engine
//!
//! Execution layer for stepgraph workflows: executor resolution, graph
//! routing, retry/error policy, hierarchical manager validation, and the
//! [`WorkflowEngine`] runtime with sync and async entry points.
//!
//! ```no_run
//! use std::collections::HashMap;
//! use stepgraph_core::{ProcessMode, RouteTargets, Task, TaskType, Workflow};
//! use stepgraph_engine::WorkflowEngine;
//!
//! let tasks = vec![
//!     Task::new("check_budget", "Check spending against the budget")
//!         .with_task_type(TaskType::Decision)
//!         .with_condition(HashMap::from([
//!             ("over_budget".to_string(), RouteTargets::from("reduce_costs")),
//!             ("under_budget".to_string(), RouteTargets::from("expand")),
//!         ])),
//!     Task::new("reduce_costs", "Propose cost reductions"),
//!     Task::new("expand", "Propose growth initiatives"),
//! ];
//!
//! let workflow = Workflow::new("budget", tasks, ProcessMode::Workflow).unwrap();
//! let report = WorkflowEngine::new(workflow)
//!     .with_executor(|action, _state| Ok(format!("handled: {action}")))
//!     .run()
//!     .unwrap();
//! assert!(report.success);
//! ```

pub mod error;
pub mod executor;
pub mod retry;
pub mod router;
pub mod runtime;
pub mod validator;

pub use error::{EngineError, Result};
pub use executor::{
    resolve_executor, AgentError, AgentFactory, CallableExecutor, ChatAgent, ResolvedExecutor,
};
pub use retry::RetryPolicy;
pub use router::{route, RouteOutcome};
pub use runtime::{EngineOptions, RunReport, RunStatus, StepRecord, StepStatus, WorkflowEngine};
pub use validator::{parse_verdict, ManagerVerdict, ValidationGate, ValidationState};
