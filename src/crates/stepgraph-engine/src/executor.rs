//! Executor resolution
//!
//! A step runs against exactly one of two executor kinds: a conversational
//! agent ([`ChatAgent`]) or a raw callable. Resolution walks an explicit
//! precedence chain once per step instead of probing objects at run time:
//!
//! 1. the step's inline `agent_config`, built through the [`AgentFactory`]
//! 2. the workflow's `default_agent_config` / `default_llm`, same route
//! 3. a default agent instance supplied to the engine
//! 4. a callable executor supplied to the engine
//!
//! Tool callables receive the shared state handle as an explicit argument;
//! there is no ambient global for them to reach into.

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use stepgraph_core::{AgentConfig, SharedState, Task, Workflow};
use tracing::warn;

/// Error type collaborators report from a single invocation.
pub type AgentError = Box<dyn std::error::Error + Send + Sync>;

/// The agent collaborator contract: prompt in, reply out.
///
/// The engine is agnostic to how the agent reasons or calls tools.
#[async_trait]
pub trait ChatAgent: Send + Sync {
    async fn chat(&self, prompt: &str) -> std::result::Result<String, AgentError>;
}

/// Builds live agents from inline agent specs.
pub trait AgentFactory: Send + Sync {
    fn build(&self, config: &AgentConfig, tools: &[String]) -> Result<Arc<dyn ChatAgent>>;
}

/// A raw executor: substituted action text plus the workflow state handle.
pub type CallableExecutor =
    Arc<dyn Fn(&str, &SharedState) -> std::result::Result<String, AgentError> + Send + Sync>;

/// The executor a step resolved to.
#[derive(Clone)]
pub enum ResolvedExecutor {
    Agent(Arc<dyn ChatAgent>),
    Callable(CallableExecutor),
}

impl std::fmt::Debug for ResolvedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedExecutor::Agent(_) => f.write_str("ResolvedExecutor::Agent"),
            ResolvedExecutor::Callable(_) => f.write_str("ResolvedExecutor::Callable"),
        }
    }
}

impl ResolvedExecutor {
    /// Invoke the executor. This is the engine's only suspension point.
    pub async fn invoke(
        &self,
        prompt: &str,
        state: &SharedState,
    ) -> std::result::Result<String, AgentError> {
        match self {
            ResolvedExecutor::Agent(agent) => agent.chat(prompt).await,
            ResolvedExecutor::Callable(callable) => callable(prompt, state),
        }
    }
}

/// Resolve the executor for one step.
///
/// # Errors
///
/// [`EngineError::Configuration`] when the chain is exhausted.
pub fn resolve_executor(
    task: &Task,
    workflow: &Workflow,
    factory: Option<&Arc<dyn AgentFactory>>,
    default_agent: Option<&Arc<dyn ChatAgent>>,
    callable: Option<&CallableExecutor>,
) -> Result<ResolvedExecutor> {
    if let Some(config) = &task.agent_config {
        match factory {
            Some(factory) => {
                return Ok(ResolvedExecutor::Agent(factory.build(config, &task.tools)?));
            }
            None => {
                warn!(
                    step = %task.name,
                    "step declares an agent config but no agent factory is installed"
                );
            }
        }
    }

    if let Some(factory) = factory {
        if workflow.default_agent_config.is_some() || workflow.default_llm.is_some() {
            let mut config = workflow
                .default_agent_config
                .clone()
                .unwrap_or_else(|| AgentConfig::new("Assistant"));
            if config.llm.is_none() {
                config.llm = workflow.default_llm.clone();
            }
            return Ok(ResolvedExecutor::Agent(factory.build(&config, &task.tools)?));
        }
    }

    if let Some(agent) = default_agent {
        return Ok(ResolvedExecutor::Agent(agent.clone()));
    }

    if let Some(callable) = callable {
        return Ok(ResolvedExecutor::Callable(callable.clone()));
    }

    Err(EngineError::Configuration(format!(
        "No executor available for step '{}'",
        task.name
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepgraph_core::{ProcessMode, Task, Workflow};

    struct EchoAgent(&'static str);

    #[async_trait]
    impl ChatAgent for EchoAgent {
        async fn chat(&self, _prompt: &str) -> std::result::Result<String, AgentError> {
            Ok(self.0.to_string())
        }
    }

    /// Factory that tags agents with the role they were built for.
    struct RoleFactory;

    impl AgentFactory for RoleFactory {
        fn build(&self, config: &AgentConfig, _tools: &[String]) -> Result<Arc<dyn ChatAgent>> {
            let reply: &'static str = match config.role.as_str() {
                "Specialist" => "specialist",
                _ => "generic",
            };
            Ok(Arc::new(EchoAgent(reply)))
        }
    }

    fn workflow(tasks: Vec<Task>) -> Workflow {
        Workflow::new("wf", tasks, ProcessMode::Sequential).unwrap()
    }

    #[tokio::test]
    async fn step_config_beats_workflow_default() {
        let task = Task::new("a", "act").with_agent_config(AgentConfig::new("Specialist"));
        let wf = workflow(vec![task.clone()])
            .with_default_agent_config(AgentConfig::new("Generalist"));

        let factory: Arc<dyn AgentFactory> = Arc::new(RoleFactory);
        let resolved = resolve_executor(&task, &wf, Some(&factory), None, None).unwrap();
        let reply = resolved.invoke("hi", wf.state()).await.unwrap();
        assert_eq!(reply, "specialist");
    }

    #[tokio::test]
    async fn workflow_default_llm_synthesizes_agent() {
        let task = Task::new("a", "act");
        let wf = workflow(vec![task.clone()]).with_default_llm("gpt-4o-mini");

        let factory: Arc<dyn AgentFactory> = Arc::new(RoleFactory);
        let resolved = resolve_executor(&task, &wf, Some(&factory), None, None).unwrap();
        assert!(matches!(resolved, ResolvedExecutor::Agent(_)));
    }

    #[tokio::test]
    async fn default_agent_beats_callable() {
        let task = Task::new("a", "act");
        let wf = workflow(vec![task.clone()]);

        let agent: Arc<dyn ChatAgent> = Arc::new(EchoAgent("agent"));
        let callable: CallableExecutor = Arc::new(|_, _| Ok("callable".to_string()));

        let resolved = resolve_executor(&task, &wf, None, Some(&agent), Some(&callable)).unwrap();
        let reply = resolved.invoke("hi", wf.state()).await.unwrap();
        assert_eq!(reply, "agent");
    }

    #[test]
    fn nothing_resolvable_is_a_configuration_error() {
        let task = Task::new("a", "act");
        let wf = workflow(vec![task.clone()]);

        let err = resolve_executor(&task, &wf, None, None, None).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
        assert!(err.to_string().contains("No executor available"));
    }

    #[tokio::test]
    async fn callable_sees_shared_state() {
        let task = Task::new("a", "act");
        let wf = workflow(vec![task.clone()]);
        wf.state().set("count", 2);

        let callable: CallableExecutor = Arc::new(|_, state| {
            let n = state.increment("count", 1, 0)?;
            Ok(n.to_string())
        });

        let resolved = resolve_executor(&task, &wf, None, None, Some(&callable)).unwrap();
        assert_eq!(resolved.invoke("hi", wf.state()).await.unwrap(), "3");
    }
}
