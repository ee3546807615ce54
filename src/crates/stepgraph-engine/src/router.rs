//! Graph routing
//!
//! Given a completed step and its raw output, decide what runs next.
//! Decision and loop steps treat their output as a routing key into the
//! step's condition map; everything else follows `next_tasks` or, in
//! sequential mode, declaration order.

use crate::error::{EngineError, Result};
use stepgraph_core::{ProcessMode, Task, Workflow};
use tracing::{debug, warn};

/// Where a branch goes after a step completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Run these steps next; more than one forks the branch
    Next(Vec<String>),
    /// The branch is finished
    End,
}

/// Compute the next step(s) after `task` produced `output`.
///
/// An unmatched decision key ends the branch silently -- loops and
/// branches are expected to steer themselves through their condition maps,
/// and an unlisted key is how a branch opts out. With `strict` set, the
/// same situation returns [`EngineError::RoutingDeadEnd`] instead.
pub fn route(workflow: &Workflow, task: &Task, output: &str, strict: bool) -> Result<RouteOutcome> {
    if task.is_routing() && task.condition.is_some() {
        let key = output.trim().to_lowercase();
        return match task.route_for(&key) {
            Some(targets) if targets.is_empty() => {
                debug!(step = %task.name, %key, "decision key routes to no targets, branch ends");
                Ok(RouteOutcome::End)
            }
            Some(targets) => Ok(RouteOutcome::Next(targets)),
            None => {
                if strict {
                    return Err(EngineError::RoutingDeadEnd {
                        step: task.name.clone(),
                        key,
                    });
                }
                warn!(
                    step = %task.name,
                    %key,
                    "decision key matched no condition entry, branch ends"
                );
                Ok(RouteOutcome::End)
            }
        };
    }

    if let Some(next) = &task.next_tasks {
        if !next.is_empty() {
            return Ok(RouteOutcome::Next(next.clone()));
        }
    }

    match workflow.process {
        ProcessMode::Sequential | ProcessMode::Hierarchical => {
            let index = workflow
                .task_index(&task.name)
                .unwrap_or(workflow.tasks.len());
            match workflow.tasks.get(index + 1) {
                Some(following) => Ok(RouteOutcome::Next(vec![following.name.clone()])),
                None => Ok(RouteOutcome::End),
            }
        }
        ProcessMode::Workflow => Ok(RouteOutcome::End),
    }
}
