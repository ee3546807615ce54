//! Workflow runtime
//!
//! [`WorkflowEngine`] drives a [`Workflow`] through its steps: resolve an
//! executor, substitute the step's action template, invoke, apply the
//! failure policy, consult the router, repeat. A run walks
//! `NotStarted -> Running -> Completed | Failed`.
//!
//! Two entry points share one contract: async [`start`](WorkflowEngine::start)
//! and sync [`run`](WorkflowEngine::run). Both always return a [`RunReport`];
//! per-step failures become failed step records, never an `Err`. Only
//! structural misconfiguration (no resolvable executor, hierarchical mode
//! without a manager) surfaces as an error.
//!
//! Forked branches in an async run may execute concurrently. The shared
//! state store and the context accumulator are the only cross-branch
//! resources; when branches converge on the same key the last writer wins.
//! That race is inherent to unordered branches and is intentionally not
//! arbitrated further.

use crate::error::{EngineError, Result};
use crate::executor::{
    resolve_executor, AgentError, AgentFactory, CallableExecutor, ChatAgent,
};
use crate::retry::RetryPolicy;
use crate::router::{route, RouteOutcome};
use crate::validator::{validate_step, ManagerVerdict, ValidationGate};
use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use stepgraph_core::{
    substitute, AgentConfig, ContextAccumulator, MissingToken, OnError, ProcessMode, Task,
    Workflow,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lifecycle of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotStarted,
    Running,
    Completed,
    Failed,
}

/// Final status of one executed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Failed,
}

/// One executed step in a run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: String,
    pub output: Option<String>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// What a run returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub success: bool,
    /// Output of the last step that executed
    pub output: Option<String>,
    pub results: Vec<StepRecord>,
    /// Final snapshot of the workflow state store
    pub variables: HashMap<String, Value>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// Engine-level knobs and collaborator handles.
#[derive(Clone, Default)]
pub struct EngineOptions {
    pub agent_factory: Option<Arc<dyn AgentFactory>>,
    pub default_agent: Option<Arc<dyn ChatAgent>>,
    pub executor: Option<CallableExecutor>,
    pub manager_agent: Option<Arc<dyn ChatAgent>>,
    pub retry_policy: RetryPolicy,
    /// Turn unmatched decision keys into run failures instead of silent
    /// branch ends
    pub strict_routing: bool,
    /// Optional hard cap on executed steps; unset means unbounded, loops
    /// terminate through tool logic
    pub max_steps: Option<u64>,
}

/// Drives one workflow through complete runs.
pub struct WorkflowEngine {
    workflow: Workflow,
    options: EngineOptions,
}

enum StepOutcome {
    /// The step produced output (possibly empty) and routing continues
    Output(String),
    /// The run halted at this step
    Halt,
}

struct RunCtx {
    context: Mutex<ContextAccumulator>,
    records: Mutex<Vec<StepRecord>>,
    steps_started: AtomicU64,
    /// First fatal failure reason; set once, halts every branch
    failure: Mutex<Option<String>>,
    manager: Option<Arc<dyn ChatAgent>>,
    concurrent: bool,
}

impl RunCtx {
    fn halted(&self) -> bool {
        self.failure.lock().is_some()
    }

    fn flag_failure(&self, reason: String) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(reason);
        }
    }
}

impl WorkflowEngine {
    pub fn new(workflow: Workflow) -> Self {
        Self {
            workflow,
            options: EngineOptions::default(),
        }
    }

    pub fn with_agent_factory(mut self, factory: Arc<dyn AgentFactory>) -> Self {
        self.options.agent_factory = Some(factory);
        self
    }

    pub fn with_default_agent(mut self, agent: Arc<dyn ChatAgent>) -> Self {
        self.options.default_agent = Some(agent);
        self
    }

    /// Supply a raw callable executor: substituted action text in, output
    /// text out, with the workflow state handle passed alongside.
    pub fn with_executor<F>(mut self, executor: F) -> Self
    where
        F: Fn(&str, &stepgraph_core::SharedState) -> std::result::Result<String, AgentError>
            + Send
            + Sync
            + 'static,
    {
        self.options.executor = Some(Arc::new(executor));
        self
    }

    pub fn with_manager_agent(mut self, manager: Arc<dyn ChatAgent>) -> Self {
        self.options.manager_agent = Some(manager);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.options.retry_policy = policy;
        self
    }

    pub fn with_strict_routing(mut self, strict: bool) -> Self {
        self.options.strict_routing = strict;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.options.max_steps = Some(max_steps);
        self
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// Run the workflow asynchronously. Forked branches whose entry steps
    /// opt in via `execution.async_execution` run concurrently.
    pub async fn start(&self) -> Result<RunReport> {
        self.start_inner(true).await
    }

    /// Run the workflow synchronously, one step at a time.
    ///
    /// Builds a private current-thread runtime, so it must not be called
    /// from inside an async context; use [`start`](Self::start) there.
    pub fn run(&self) -> Result<RunReport> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|err| {
                EngineError::Configuration(format!("failed to build sync runtime: {err}"))
            })?;
        runtime.block_on(self.start_inner(false))
    }

    async fn start_inner(&self, concurrent: bool) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        info!(
            workflow = %self.workflow.name,
            %run_id,
            process = ?self.workflow.process,
            "workflow run starting"
        );

        let manager = match self.workflow.process {
            ProcessMode::Hierarchical => Some(self.resolve_manager()?),
            _ => None,
        };

        let start = match self.workflow.process {
            ProcessMode::Sequential => self.workflow.tasks.first(),
            _ => self.workflow.start_task(),
        };
        let Some(start) = start else {
            // a workflow with no tasks completes trivially
            return Ok(RunReport {
                success: true,
                output: None,
                results: Vec::new(),
                variables: self.workflow.state().snapshot(),
                status: RunStatus::Completed,
                failure_reason: None,
            });
        };
        let start = start.name.clone();

        let ctx = RunCtx {
            context: Mutex::new(ContextAccumulator::new()),
            records: Mutex::new(Vec::new()),
            steps_started: AtomicU64::new(0),
            failure: Mutex::new(None),
            manager,
            concurrent,
        };

        self.run_branch(&ctx, start).await?;

        let RunCtx {
            context,
            records,
            failure,
            ..
        } = ctx;
        let context = context.into_inner();
        let failure = failure.into_inner();

        let report = RunReport {
            success: failure.is_none(),
            output: context.previous_output().map(str::to_string),
            results: records.into_inner(),
            variables: self.workflow.state().snapshot(),
            status: if failure.is_none() {
                RunStatus::Completed
            } else {
                RunStatus::Failed
            },
            failure_reason: failure,
        };

        match &report.failure_reason {
            None => info!(workflow = %self.workflow.name, %run_id, "workflow run completed"),
            Some(reason) => {
                error!(workflow = %self.workflow.name, %run_id, %reason, "workflow run failed")
            }
        }

        Ok(report)
    }

    fn resolve_manager(&self) -> Result<Arc<dyn ChatAgent>> {
        if let Some(manager) = &self.options.manager_agent {
            return Ok(manager.clone());
        }
        if let (Some(factory), Some(llm)) =
            (&self.options.agent_factory, &self.workflow.manager_llm)
        {
            let config = AgentConfig::new("Workflow Manager")
                .with_goal("Accept or reject each step's output against its expected outcome")
                .with_llm(llm.clone());
            return factory.build(&config, &[]);
        }
        Err(EngineError::Configuration(
            "hierarchical process requires a manager agent, or a manager_llm plus an agent factory"
                .to_string(),
        ))
    }

    /// Execute one branch to its end, following single-target routes in
    /// place and handing forks to [`run_fork`](Self::run_fork).
    fn run_branch<'a>(&'a self, ctx: &'a RunCtx, start: String) -> BoxFuture<'a, Result<()>> {
        async move {
            let mut current = start;
            loop {
                if ctx.halted() {
                    return Ok(());
                }

                let started = ctx.steps_started.fetch_add(1, Ordering::SeqCst);
                if let Some(limit) = self.options.max_steps {
                    if started >= limit {
                        ctx.flag_failure(format!("step limit of {limit} exceeded"));
                        return Ok(());
                    }
                }

                // targets are validated at construction, so the lookup
                // cannot miss; an empty branch end is the safe fallback
                let Some(task) = self.workflow.task(&current).cloned() else {
                    return Ok(());
                };

                let output = match self.execute_step(ctx, &task).await? {
                    StepOutcome::Halt => return Ok(()),
                    StepOutcome::Output(output) => output,
                };

                let outcome =
                    match route(&self.workflow, &task, &output, self.options.strict_routing) {
                        Ok(outcome) => outcome,
                        Err(err @ EngineError::RoutingDeadEnd { .. }) => {
                            ctx.flag_failure(err.to_string());
                            return Ok(());
                        }
                        Err(err) => return Err(err),
                    };

                match outcome {
                    RouteOutcome::End => return Ok(()),
                    RouteOutcome::Next(mut targets) => {
                        if targets.len() == 1 {
                            current = targets.remove(0);
                        } else {
                            debug!(step = %task.name, ?targets, "forking branches");
                            self.run_fork(ctx, targets).await?;
                            return Ok(());
                        }
                    }
                }
            }
        }
        .boxed()
    }

    /// Run forked branches. In a concurrent run, branches whose entry step
    /// opted in via `async_execution` run together; the rest follow in
    /// declaration order. Synchronous runs take every branch in order.
    async fn run_fork(&self, ctx: &RunCtx, targets: Vec<String>) -> Result<()> {
        if ctx.concurrent {
            let (parallel, serial): (Vec<_>, Vec<_>) = targets.into_iter().partition(|name| {
                self.workflow
                    .task(name)
                    .map(|task| task.execution.async_execution)
                    .unwrap_or(false)
            });

            if !parallel.is_empty() {
                let branches = parallel
                    .into_iter()
                    .map(|target| self.run_branch(ctx, target));
                for result in join_all(branches).await {
                    result?;
                }
            }
            for target in serial {
                self.run_branch(ctx, target).await?;
            }
        } else {
            for target in targets {
                self.run_branch(ctx, target).await?;
            }
        }
        Ok(())
    }

    async fn execute_step(&self, ctx: &RunCtx, task: &Task) -> Result<StepOutcome> {
        let executor = resolve_executor(
            task,
            &self.workflow,
            self.options.agent_factory.as_ref(),
            self.options.default_agent.as_ref(),
            self.options.executor.as_ref(),
        )?;

        // state variables first, step outputs overlay them on collision
        let mut vars: HashMap<String, Value> = self.workflow.state().snapshot();
        vars.extend(
            ctx.context
                .lock()
                .variables_for(task, self.workflow.context_enabled),
        );
        let prompt = substitute(&task.action, &vars, MissingToken::KeepLiteral);

        let started_at = Utc::now();
        let mut attempts: u32 = 0;
        let result = loop {
            attempts += 1;
            debug!(step = %task.name, attempt = attempts, "invoking executor");
            match executor.invoke(&prompt, self.workflow.state()).await {
                Ok(output) => break Ok(output),
                Err(err) => {
                    if task.execution.on_error == OnError::Retry
                        && attempts <= task.execution.max_retries
                    {
                        let delay = self.options.retry_policy.delay_for(attempts - 1);
                        warn!(
                            step = %task.name,
                            attempt = attempts,
                            error = %err,
                            delay_ms = delay.as_millis() as u64,
                            "step failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    break Err(err);
                }
            }
        };

        match result {
            Ok(output) => self.finish_step(ctx, task, output, attempts, started_at).await,
            Err(err) => {
                let reason = EngineError::StepExecution {
                    step: task.name.clone(),
                    message: err.to_string(),
                }
                .to_string();

                match task.execution.on_error {
                    OnError::Continue => {
                        warn!(step = %task.name, error = %err, "step failed, continuing");
                        ctx.records.lock().push(StepRecord {
                            step: task.name.clone(),
                            output: None,
                            status: StepStatus::Failed,
                            failure_reason: Some(reason),
                            attempts,
                            started_at,
                            finished_at: Utc::now(),
                        });
                        // routing proceeds as if the step produced nothing
                        ctx.context.lock().record(&task.name, "", None);
                        Ok(StepOutcome::Output(String::new()))
                    }
                    OnError::Stop | OnError::Retry => {
                        error!(step = %task.name, error = %err, "step failed, halting run");
                        ctx.records.lock().push(StepRecord {
                            step: task.name.clone(),
                            output: None,
                            status: StepStatus::Failed,
                            failure_reason: Some(reason.clone()),
                            attempts,
                            started_at,
                            finished_at: Utc::now(),
                        });
                        ctx.flag_failure(reason);
                        Ok(StepOutcome::Halt)
                    }
                }
            }
        }
    }

    /// Successful executor output: pass the hierarchical gate if one is
    /// active, then bind the output into the run context.
    async fn finish_step(
        &self,
        ctx: &RunCtx,
        task: &Task,
        output: String,
        attempts: u32,
        started_at: DateTime<Utc>,
    ) -> Result<StepOutcome> {
        if let Some(manager) = &ctx.manager {
            let mut gate = ValidationGate::new();
            gate.mark_executed();

            let verdict = match validate_step(manager, task, &output).await {
                Ok(verdict) => verdict,
                Err(err) => {
                    let reason =
                        format!("Manager validation for step '{}' failed: {err}", task.name);
                    ctx.records.lock().push(StepRecord {
                        step: task.name.clone(),
                        output: Some(output),
                        status: StepStatus::Failed,
                        failure_reason: Some(reason.clone()),
                        attempts,
                        started_at,
                        finished_at: Utc::now(),
                    });
                    ctx.flag_failure(reason);
                    return Ok(StepOutcome::Halt);
                }
            };
            gate.resolve(&verdict);

            if let ManagerVerdict::Rejected(why) = verdict {
                let reason = EngineError::ValidationRejection {
                    step: task.name.clone(),
                    reason: why,
                }
                .to_string();
                warn!(step = %task.name, %reason, "manager rejected step");
                ctx.records.lock().push(StepRecord {
                    step: task.name.clone(),
                    output: Some(output),
                    status: StepStatus::Failed,
                    failure_reason: Some(reason.clone()),
                    attempts,
                    started_at,
                    finished_at: Utc::now(),
                });
                ctx.flag_failure(reason);
                return Ok(StepOutcome::Halt);
            }
        }

        info!(step = %task.name, attempts, "step completed");
        ctx.records.lock().push(StepRecord {
            step: task.name.clone(),
            output: Some(output.clone()),
            status: StepStatus::Completed,
            failure_reason: None,
            attempts,
            started_at,
            finished_at: Utc::now(),
        });
        ctx.context
            .lock()
            .record(&task.name, output.clone(), task.output_variable.clone());

        Ok(StepOutcome::Output(output))
    }
}
