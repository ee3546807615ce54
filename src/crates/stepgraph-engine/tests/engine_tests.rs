//! End-to-end engine tests: branching, looping, failure policies,
//! hierarchical validation, forks, and context visibility.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use stepgraph_core::{
    AgentConfig, ExecutionPolicy, OnError, ProcessMode, RouteTargets, Task, TaskType, Workflow,
};
use stepgraph_engine::{
    AgentError, AgentFactory, ChatAgent, EngineError, RetryPolicy, StepStatus, WorkflowEngine,
};

type PromptLog = Arc<Mutex<Vec<String>>>;

fn routes(pairs: &[(&str, &str)]) -> HashMap<String, RouteTargets> {
    pairs
        .iter()
        .map(|(key, target)| (key.to_string(), RouteTargets::from(*target)))
        .collect()
}

fn budget_workflow() -> Workflow {
    let tasks = vec![
        Task::new(
            "check_budget",
            "Compare spending of {{spent}} against the budget of {{budget}}",
        )
        .with_task_type(TaskType::Decision)
        .with_condition(routes(&[
            ("over_budget", "reduce_costs"),
            ("under_budget", "expand"),
        ])),
        Task::new("reduce_costs", "Propose cost reductions"),
        Task::new("expand", "Propose growth initiatives"),
    ];
    Workflow::new("budget", tasks, ProcessMode::Workflow).unwrap()
}

/// Scenario: a decision step routes on the tool's budget verdict.
#[test]
fn branching_follows_the_decision_key() {
    let workflow = budget_workflow();
    workflow.state().set("spent", 920);
    workflow.state().set("budget", 1000);

    let prompts: PromptLog = Arc::new(Mutex::new(Vec::new()));
    let log = prompts.clone();

    let report = WorkflowEngine::new(workflow)
        .with_executor(move |action, state| {
            log.lock().unwrap().push(action.to_string());
            if action.starts_with("Compare spending") {
                let spent = state.get("spent").and_then(|v| v.as_f64()).unwrap_or(0.0);
                let budget = state.get("budget").and_then(|v| v.as_f64()).unwrap_or(1.0);
                Ok(if spent / budget > 0.9 {
                    "over_budget".to_string()
                } else {
                    "under_budget".to_string()
                })
            } else {
                Ok("done".to_string())
            }
        })
        .run()
        .unwrap();

    assert!(report.success);
    let steps: Vec<&str> = report.results.iter().map(|r| r.step.as_str()).collect();
    assert_eq!(steps, vec!["check_budget", "reduce_costs"]);

    // state variables were substituted into the decision prompt
    let first_prompt = prompts.lock().unwrap()[0].clone();
    assert_eq!(
        first_prompt,
        "Compare spending of 920 against the budget of 1000"
    );
}

/// Scenario: a loop step re-enters itself until the tool reports completion.
#[test]
fn looping_runs_until_the_tool_says_done() {
    let tasks = vec![
        Task::new("process_batches", "Process the next batch")
            .with_task_type(TaskType::Loop)
            .with_condition(routes(&[
                ("more_batches", "process_batches"),
                ("all_batches_complete", "report"),
            ])),
        Task::new("report", "Summarize all processed batches"),
    ];
    let workflow = Workflow::new("batches", tasks, ProcessMode::Workflow).unwrap();
    workflow.state().set("batch_total", 5);

    let report = WorkflowEngine::new(workflow)
        .with_executor(|action, state| {
            if action.starts_with("Process") {
                let done = state.increment("batches_processed", 1, 0)?;
                let total = state
                    .get("batch_total")
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0);
                Ok(if done < total {
                    "more_batches".to_string()
                } else {
                    "all_batches_complete".to_string()
                })
            } else {
                Ok("5 batches processed".to_string())
            }
        })
        .run()
        .unwrap();

    assert!(report.success);
    let batch_runs = report
        .results
        .iter()
        .filter(|r| r.step == "process_batches")
        .count();
    assert_eq!(batch_runs, 5);
    assert_eq!(report.results.last().unwrap().step, "report");
    assert_eq!(report.variables["batches_processed"], json!(5));
    assert_eq!(report.output.as_deref(), Some("5 batches processed"));
}

struct ScriptedWorker;

#[async_trait]
impl ChatAgent for ScriptedWorker {
    async fn chat(&self, prompt: &str) -> Result<String, AgentError> {
        if prompt.contains("Research") {
            Ok("research notes".to_string())
        } else {
            Ok("draft article".to_string())
        }
    }
}

/// Manager that rejects one specific step by name.
struct PickyManager {
    reject_step: &'static str,
}

#[async_trait]
impl ChatAgent for PickyManager {
    async fn chat(&self, prompt: &str) -> Result<String, AgentError> {
        if prompt.contains(&format!("step '{}'", self.reject_step)) {
            Ok("REJECT: missing citations".to_string())
        } else {
            Ok("ACCEPT".to_string())
        }
    }
}

/// Scenario: the manager rejects step two; the run fails, step one stands.
#[test]
fn hierarchical_rejection_fails_the_run() {
    let tasks = vec![
        Task::new("research", "Research the topic").with_expected_output("Thorough notes"),
        Task::new("write", "Write the article").with_expected_output("A cited article"),
    ];
    let workflow = Workflow::new("editorial", tasks, ProcessMode::Hierarchical).unwrap();

    let report = WorkflowEngine::new(workflow)
        .with_default_agent(Arc::new(ScriptedWorker))
        .with_manager_agent(Arc::new(PickyManager {
            reject_step: "write",
        }))
        .run()
        .unwrap();

    assert!(!report.success);
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.results[0].step, "research");
    assert_eq!(report.results[0].status, StepStatus::Completed);
    assert_eq!(report.results[1].step, "write");
    assert_eq!(report.results[1].status, StepStatus::Failed);

    let reason = report.failure_reason.unwrap();
    assert!(reason.contains("Manager rejected step 'write'"), "{reason}");
    assert!(reason.contains("missing citations"), "{reason}");
}

#[test]
fn hierarchical_acceptance_runs_to_completion() {
    let tasks = vec![
        Task::new("research", "Research the topic"),
        Task::new("write", "Write the article"),
    ];
    let workflow = Workflow::new("editorial", tasks, ProcessMode::Hierarchical).unwrap();

    let report = WorkflowEngine::new(workflow)
        .with_default_agent(Arc::new(ScriptedWorker))
        .with_manager_agent(Arc::new(PickyManager {
            reject_step: "nothing",
        }))
        .run()
        .unwrap();

    assert!(report.success);
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.output.as_deref(), Some("draft article"));
}

/// Factory standing in for the LLM layer: managers accept everything,
/// workers echo their role.
struct StubFactory;

impl AgentFactory for StubFactory {
    fn build(
        &self,
        config: &AgentConfig,
        _tools: &[String],
    ) -> stepgraph_engine::Result<Arc<dyn ChatAgent>> {
        struct Built {
            reply: String,
        }

        #[async_trait]
        impl ChatAgent for Built {
            async fn chat(&self, _prompt: &str) -> Result<String, AgentError> {
                Ok(self.reply.clone())
            }
        }

        let reply = if config.role == "Workflow Manager" {
            "ACCEPT".to_string()
        } else {
            format!("output from {}", config.role)
        };
        Ok(Arc::new(Built { reply }))
    }
}

#[test]
fn hierarchical_manager_resolves_through_the_factory() {
    let tasks = vec![
        Task::new("draft", "Draft the report")
            .with_agent_config(AgentConfig::new("Staff Writer")),
        Task::new("polish", "Polish the report")
            .with_agent_config(AgentConfig::new("Editor")),
    ];
    let workflow = Workflow::new("reporting", tasks, ProcessMode::Hierarchical)
        .unwrap()
        .with_manager_llm("gpt-4o");

    let report = WorkflowEngine::new(workflow)
        .with_agent_factory(Arc::new(StubFactory))
        .run()
        .unwrap();

    assert!(report.success);
    assert_eq!(report.output.as_deref(), Some("output from Editor"));
}

#[test]
fn hierarchical_without_manager_is_a_configuration_error() {
    let workflow = Workflow::new(
        "editorial",
        vec![Task::new("only", "work")],
        ProcessMode::Hierarchical,
    )
    .unwrap();

    let err = WorkflowEngine::new(workflow)
        .with_default_agent(Arc::new(ScriptedWorker))
        .run()
        .unwrap_err();
    assert!(matches!(err, EngineError::Configuration(_)));
}

#[test]
fn on_error_stop_halts_the_run() {
    let tasks = vec![Task::new("a", "first"), Task::new("b", "second")];
    let workflow = Workflow::new("halting", tasks, ProcessMode::Sequential).unwrap();

    let report = WorkflowEngine::new(workflow)
        .with_executor(|action, _| {
            if action == "first" {
                Err("executor blew up".into())
            } else {
                Ok("fine".to_string())
            }
        })
        .run()
        .unwrap();

    assert!(!report.success);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].status, StepStatus::Failed);
    let reason = report.failure_reason.unwrap();
    assert!(reason.contains("Step 'a' failed"), "{reason}");
    assert!(reason.contains("executor blew up"), "{reason}");
}

#[test]
fn on_error_continue_advances_with_empty_output() {
    let tasks = vec![
        Task::new("a", "first").with_execution(ExecutionPolicy {
            on_error: OnError::Continue,
            ..ExecutionPolicy::default()
        }),
        Task::new("b", "second sees [{{previous_output}}]"),
    ];
    let workflow = Workflow::new("continuing", tasks, ProcessMode::Sequential).unwrap();

    let prompts: PromptLog = Arc::new(Mutex::new(Vec::new()));
    let log = prompts.clone();

    let report = WorkflowEngine::new(workflow)
        .with_executor(move |action, _| {
            log.lock().unwrap().push(action.to_string());
            if action == "first" {
                Err("transient".into())
            } else {
                Ok("recovered".to_string())
            }
        })
        .run()
        .unwrap();

    // the step failed, the run did not
    assert!(report.success);
    assert_eq!(report.results[0].status, StepStatus::Failed);
    assert_eq!(report.results[1].status, StepStatus::Completed);
    assert_eq!(
        prompts.lock().unwrap()[1],
        "second sees []",
        "failed step routes as empty output"
    );
}

#[test]
fn on_error_retry_reinvokes_then_succeeds() {
    let tasks = vec![Task::new("flaky", "try hard").with_execution(ExecutionPolicy {
        max_retries: 3,
        on_error: OnError::Retry,
        async_execution: false,
    })];
    let workflow = Workflow::new("retrying", tasks, ProcessMode::Sequential).unwrap();

    let calls = Arc::new(Mutex::new(0u32));
    let counter = calls.clone();

    let report = WorkflowEngine::new(workflow)
        .with_retry_policy(RetryPolicy::fixed(1))
        .with_executor(move |_, _| {
            let mut n = counter.lock().unwrap();
            *n += 1;
            if *n < 3 {
                Err("not yet".into())
            } else {
                Ok("third time lucky".to_string())
            }
        })
        .run()
        .unwrap();

    assert!(report.success);
    assert_eq!(report.results[0].attempts, 3);
    assert_eq!(report.output.as_deref(), Some("third time lucky"));
}

#[test]
fn on_error_retry_exhausted_falls_back_to_stop() {
    let tasks = vec![Task::new("flaky", "try hard").with_execution(ExecutionPolicy {
        max_retries: 2,
        on_error: OnError::Retry,
        async_execution: false,
    })];
    let workflow = Workflow::new("retrying", tasks, ProcessMode::Sequential).unwrap();

    let calls = Arc::new(Mutex::new(0u32));
    let counter = calls.clone();

    let report = WorkflowEngine::new(workflow)
        .with_retry_policy(RetryPolicy::fixed(1))
        .with_executor(move |_, _| {
            *counter.lock().unwrap() += 1;
            Err("still broken".into())
        })
        .run()
        .unwrap();

    assert!(!report.success);
    // initial attempt plus two retries
    assert_eq!(*calls.lock().unwrap(), 3);
    assert_eq!(report.results[0].attempts, 3);
    assert!(report.failure_reason.unwrap().contains("Step 'flaky' failed"));
}

#[test]
fn unmatched_decision_key_ends_branch_silently() {
    let workflow = budget_workflow();

    let report = WorkflowEngine::new(workflow)
        .with_executor(|_, _| Ok("no_such_route".to_string()))
        .run()
        .unwrap();

    // the branch just stops; nothing downstream runs, the run completes
    assert!(report.success);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].step, "check_budget");
    assert_eq!(report.results[0].status, StepStatus::Completed);
}

#[test]
fn strict_routing_turns_dead_ends_into_failures() {
    let workflow = budget_workflow();

    let report = WorkflowEngine::new(workflow)
        .with_strict_routing(true)
        .with_executor(|_, _| Ok("no_such_route".to_string()))
        .run()
        .unwrap();

    assert!(!report.success);
    let reason = report.failure_reason.unwrap();
    assert!(reason.contains("No route for decision 'no_such_route'"), "{reason}");
}

#[test]
fn missing_executor_is_a_configuration_error() {
    let workflow = Workflow::new(
        "bare",
        vec![Task::new("only", "work")],
        ProcessMode::Sequential,
    )
    .unwrap();

    let err = WorkflowEngine::new(workflow).run().unwrap_err();
    assert!(matches!(err, EngineError::Configuration(_)));
}

#[test]
fn context_visibility_follows_task_settings() {
    let tasks = vec![
        Task::new("a", "alpha").with_output_variable("alpha_result"),
        Task::new("b", "beta"),
        Task::new("c", "got {{a_output}} and {{alpha_result}} via {{previous_output}}"),
        Task::new("d", "sees {{a_output}} and {{previous_output}}")
            .with_retain_full_context(false),
    ];
    let workflow = Workflow::new("ctx", tasks, ProcessMode::Sequential).unwrap();

    let prompts: PromptLog = Arc::new(Mutex::new(Vec::new()));
    let log = prompts.clone();

    let report = WorkflowEngine::new(workflow)
        .with_executor(move |action, _| {
            log.lock().unwrap().push(action.to_string());
            Ok(format!("out-{}", action.chars().next().unwrap_or('?')))
        })
        .run()
        .unwrap();

    assert!(report.success);
    let prompts = prompts.lock().unwrap();
    // full context: step output, custom variable and previous output all bind
    assert_eq!(prompts[2], "got out-a and out-a via out-b");
    // retain_full_context=false: earlier outputs stay literal, previous binds
    assert_eq!(prompts[3], "sees {{a_output}} and out-g");
}

#[test]
fn context_from_restricts_to_named_steps() {
    let tasks = vec![
        Task::new("a", "alpha"),
        Task::new("b", "beta"),
        Task::new("c", "{{a_output}}|{{b_output}}").with_context_from(vec!["a".to_string()]),
    ];
    let workflow = Workflow::new("ctx", tasks, ProcessMode::Sequential).unwrap();

    let prompts: PromptLog = Arc::new(Mutex::new(Vec::new()));
    let log = prompts.clone();

    WorkflowEngine::new(workflow)
        .with_executor(move |action, _| {
            log.lock().unwrap().push(action.to_string());
            Ok(format!("out-{}", action.chars().next().unwrap_or('?')))
        })
        .run()
        .unwrap();

    assert_eq!(prompts.lock().unwrap()[2], "out-a|{{b_output}}");
}

#[tokio::test]
async fn async_start_matches_sync_run() {
    let workflow = budget_workflow();
    workflow.state().set("spent", 120);
    workflow.state().set("budget", 1000);

    let report = WorkflowEngine::new(workflow)
        .with_executor(|action, _| {
            if action.starts_with("Compare spending") {
                Ok("under_budget".to_string())
            } else {
                Ok("expanded".to_string())
            }
        })
        .start()
        .await
        .unwrap();

    assert!(report.success);
    let steps: Vec<&str> = report.results.iter().map(|r| r.step.as_str()).collect();
    assert_eq!(steps, vec!["check_budget", "expand"]);
}

#[tokio::test]
async fn forked_branches_run_and_converge_last_writer_wins() {
    let concurrent = ExecutionPolicy {
        async_execution: true,
        ..ExecutionPolicy::default()
    };
    let tasks = vec![
        Task::new("fan", "split the work")
            .with_next_tasks(vec!["left".to_string(), "right".to_string()]),
        Task::new("left", "left lane")
            .with_execution(concurrent.clone())
            .with_next_tasks(vec!["merge".to_string()]),
        Task::new("right", "right lane")
            .with_execution(concurrent)
            .with_next_tasks(vec!["merge".to_string()]),
        Task::new("merge", "combine results"),
    ];
    let workflow = Workflow::new("forked", tasks, ProcessMode::Workflow).unwrap();

    let report = WorkflowEngine::new(workflow)
        .with_executor(|action, state| {
            state.append("visited", action.split(' ').next().unwrap_or(""))?;
            Ok(format!("done: {action}"))
        })
        .start()
        .await
        .unwrap();

    assert!(report.success);

    let visited: Vec<String> = report.variables["visited"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap_or("").to_string())
        .collect();
    assert!(visited.contains(&"left".to_string()));
    assert!(visited.contains(&"right".to_string()));

    // both branches reach the join, which therefore runs once per branch;
    // its final output is whichever branch finished last
    let merges = report.results.iter().filter(|r| r.step == "merge").count();
    assert_eq!(merges, 2);
}

#[test]
fn max_steps_guard_stops_runaway_loops() {
    let tasks = vec![Task::new("spin", "go again")
        .with_task_type(TaskType::Loop)
        .with_condition(routes(&[("again", "spin")]))];
    let workflow = Workflow::new("runaway", tasks, ProcessMode::Workflow).unwrap();

    let report = WorkflowEngine::new(workflow)
        .with_max_steps(10)
        .with_executor(|_, _| Ok("again".to_string()))
        .run()
        .unwrap();

    assert!(!report.success);
    assert_eq!(report.results.len(), 10);
    assert!(report.failure_reason.unwrap().contains("step limit"));
}

#[test]
fn state_persists_across_runs_until_cleared() {
    let tasks = vec![Task::new("count", "count up")];
    let workflow = Workflow::new("persistent", tasks, ProcessMode::Sequential).unwrap();
    let state = workflow.state().clone();

    let engine = WorkflowEngine::new(workflow).with_executor(|_, state| {
        let n = state.increment("runs", 1, 0)?;
        Ok(n.to_string())
    });

    assert_eq!(engine.run().unwrap().output.as_deref(), Some("1"));
    assert_eq!(engine.run().unwrap().output.as_deref(), Some("2"));

    state.clear();
    assert_eq!(engine.run().unwrap().output.as_deref(), Some("1"));
}

#[test]
fn empty_workflow_completes_trivially() {
    let workflow = Workflow::new("empty", vec![], ProcessMode::Sequential).unwrap();
    let report = WorkflowEngine::new(workflow)
        .with_executor(|_, _| Ok(String::new()))
        .run()
        .unwrap();

    assert!(report.success);
    assert!(report.results.is_empty());
    assert!(report.output.is_none());
}

#[test]
fn report_serializes_with_expected_shape() {
    let workflow = Workflow::new(
        "shape",
        vec![Task::new("only", "work")],
        ProcessMode::Sequential,
    )
    .unwrap();

    let report = WorkflowEngine::new(workflow)
        .with_executor(|_, _| Ok("done".to_string()))
        .run()
        .unwrap();

    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["success"], json!(true));
    assert_eq!(value["status"], json!("completed"));
    assert_eq!(value["output"], json!("done"));
    assert_eq!(value["results"][0]["step"], json!("only"));
    assert_eq!(value["results"][0]["status"], json!("completed"));
    assert!(value.get("failure_reason").is_none());
}
