//! The reasoning/acting control loop.
//!
//! One [`Agent`] serves many tickets; each [`Agent::run`] is an isolated run
//! with its own trace and tool surface, sharing only read-only configuration
//! and model handles. Within a run everything is sequential: one engine call
//! or tool call in flight at a time.
//!
//! ```text
//! Reasoning ──▶ Acting ──▶ Observing ──▶ Reasoning …
//!     │                        │
//!     └──▶ Failed              └──▶ Terminated | Failed
//! ```
//!
//! The run terminates only on a successful `create_task` or `update_task`
//! observation. It fails when the step budget runs out, when the engine
//! keeps producing unusable replies, when the engine itself is unreachable,
//! when task creation is rejected or unavailable, or when it is cancelled.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use triage_ai::{Ensemble, ReasoningEngine};
use triage_core::{AgentTrace, Observation, Settings, TaskResult, Ticket, ToolName, TriageError};
use triage_tracker::TaskTracker;

use crate::parse::parse_action;
use crate::prompt::{correction, render};
use crate::tools::{ToolCall, ToolSurface};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Reasoning,
    Acting,
    Observing,
    Terminated,
    Failed,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Reasoning => "reasoning",
            Self::Acting => "acting",
            Self::Observing => "observing",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How a run ended. Both variants carry the full trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Terminated {
        result: TaskResult,
        trace: AgentTrace,
    },
    Failed {
        error: TriageError,
        trace: AgentTrace,
    },
}

impl RunOutcome {
    pub fn state(&self) -> LoopState {
        match self {
            Self::Terminated { .. } => LoopState::Terminated,
            Self::Failed { .. } => LoopState::Failed,
        }
    }

    pub fn trace(&self) -> &AgentTrace {
        match self {
            Self::Terminated { trace, .. } | Self::Failed { trace, .. } => trace,
        }
    }

    pub fn result(&self) -> Option<&TaskResult> {
        match self {
            Self::Terminated { result, .. } => Some(result),
            Self::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&TriageError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            Self::Terminated { .. } => None,
        }
    }
}

/// A step the engine proposed and the surface accepted.
struct Proposal {
    thought: String,
    input: Value,
    call: ToolCall,
}

pub struct Agent {
    engine: Arc<dyn ReasoningEngine>,
    ensemble: Arc<Ensemble>,
    tracker: Arc<dyn TaskTracker>,
    settings: Arc<Settings>,
}

impl Agent {
    pub fn new(
        engine: Arc<dyn ReasoningEngine>,
        ensemble: Arc<Ensemble>,
        tracker: Arc<dyn TaskTracker>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            engine,
            ensemble,
            tracker,
            settings,
        }
    }

    pub async fn run(&self, ticket: &Ticket) -> RunOutcome {
        self.run_with_cancel(ticket, &CancellationToken::new()).await
    }

    /// Run until a terminal outcome. `cancel` is honoured between steps;
    /// an in-flight tool call always completes.
    pub async fn run_with_cancel(&self, ticket: &Ticket, cancel: &CancellationToken) -> RunOutcome {
        let limits = &self.settings.agent;
        let mut trace = AgentTrace::new(ticket.short_ref());
        let mut tools = ToolSurface::new(ticket, &self.ensemble, self.tracker.as_ref(), &self.settings);
        let mut state = LoopState::Reasoning;
        info!(ticket = %trace.ticket_ref(), max_steps = limits.max_steps, "run started");

        while trace.len() < limits.max_steps {
            if cancel.is_cancelled() {
                return fail(&trace, TriageError::Cancelled, state).with_trace(trace);
            }

            let proposal = match self.propose(ticket, &tools, &mut trace).await {
                Ok(p) => p,
                Err(error) => return fail(&trace, error, state).with_trace(trace),
            };
            if cancel.is_cancelled() {
                return fail(&trace, TriageError::Cancelled, state).with_trace(trace);
            }

            state = transition(state, LoopState::Acting, &trace);
            let tool = proposal.call.name();
            let outcome = tools.execute(&proposal.call).await;

            state = transition(state, LoopState::Observing, &trace);
            let (observation, task, fatal) = match outcome {
                Ok(out) => (Observation::Success { value: out.value }, out.task, None),
                Err(error) => {
                    let fatal = is_fatal(tool, &error).then(|| error.clone());
                    (Observation::Failure { error }, None, fatal)
                }
            };
            let ok = observation.is_success();
            let index = trace.push(proposal.thought, tool, proposal.input, observation).index;
            debug!(ticket = %trace.ticket_ref(), step = index, %tool, ok, "step recorded");

            if let Some(error) = fatal {
                return fail(&trace, error, state).with_trace(trace);
            }
            if let (true, Some(result)) = (tool.is_terminal(), task) {
                transition(state, LoopState::Terminated, &trace);
                info!(
                    ticket = %trace.ticket_ref(),
                    task_id = %result.task_id,
                    steps = trace.len(),
                    "run terminated"
                );
                return RunOutcome::Terminated { result, trace };
            }
            state = transition(state, LoopState::Reasoning, &trace);
        }

        let error = TriageError::LoopExceededSteps {
            max_steps: limits.max_steps,
        };
        fail(&trace, error, state).with_trace(trace)
    }

    /// Ask the engine for the next step, re-prompting on unusable replies.
    async fn propose(
        &self,
        ticket: &Ticket,
        tools: &ToolSurface<'_>,
        trace: &mut AgentTrace,
    ) -> Result<Proposal, TriageError> {
        let max_invalid = self.settings.agent.max_invalid_actions;
        let timeout = self.settings.engine.timeout();
        let mut note: Option<String> = None;
        let mut rejected = 0;

        loop {
            let request = render(ticket, trace, note.as_deref());
            let reply = tokio::time::timeout(timeout, self.engine.complete(&request))
                .await
                .map_err(|_| TriageError::Timeout {
                    operation: "reasoning engine".into(),
                    after_ms: timeout.as_millis() as u64,
                })??;

            let accepted = parse_action(&reply).and_then(|action| {
                let call = ToolCall::parse(&action.tool, &action.input)?;
                tools.precheck(&call)?;
                Ok(Proposal {
                    thought: action.thought,
                    input: action.input,
                    call,
                })
            });
            match accepted {
                Ok(proposal) => return Ok(proposal),
                Err(error) => {
                    let reason = error.to_string();
                    trace.reject(reply, reason.clone());
                    rejected += 1;
                    if rejected > max_invalid {
                        return Err(error);
                    }
                    warn!(
                        ticket = %trace.ticket_ref(),
                        %reason,
                        attempt = rejected,
                        max_invalid,
                        "engine reply rejected, re-prompting"
                    );
                    note = Some(correction(&reason));
                }
            }
        }
    }
}

/// Create failures that end the run: the single submission is spent.
fn is_fatal(tool: ToolName, error: &TriageError) -> bool {
    tool == ToolName::CreateTask
        && matches!(
            error,
            TriageError::SubmissionRejected { .. } | TriageError::SubmissionUnavailable { .. }
        )
}

fn transition(from: LoopState, to: LoopState, trace: &AgentTrace) -> LoopState {
    debug!(ticket = %trace.ticket_ref(), step = trace.len(), %from, %to, "state");
    to
}

struct Failure(TriageError);

impl Failure {
    fn with_trace(self, trace: AgentTrace) -> RunOutcome {
        RunOutcome::Failed {
            error: self.0,
            trace,
        }
    }
}

fn fail(trace: &AgentTrace, error: TriageError, state: LoopState) -> Failure {
    transition(state, LoopState::Failed, trace);
    warn!(
        ticket = %trace.ticket_ref(),
        steps = trace.len(),
        rejections = trace.rejections().len(),
        error = %error,
        "run failed"
    );
    Failure(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        RecordingTracker, ScriptedEngine, login_ensemble, login_ticket, reply, settings,
    };
    use std::time::Duration;

    struct Harness {
        engine: Arc<ScriptedEngine>,
        tracker: Arc<RecordingTracker>,
        agent: Agent,
    }

    fn harness_with(engine: ScriptedEngine, tracker: RecordingTracker, settings: Settings) -> Harness {
        let engine = Arc::new(engine);
        let tracker = Arc::new(tracker);
        let agent = Agent::new(
            engine.clone(),
            Arc::new(login_ensemble()),
            tracker.clone(),
            Arc::new(settings),
        );
        Harness {
            engine,
            tracker,
            agent,
        }
    }

    fn harness(replies: Vec<String>) -> Harness {
        harness_with(ScriptedEngine::new(replies), RecordingTracker::new(), settings())
    }

    fn happy_path() -> Vec<String> {
        vec![
            reply("Clean the text first.", "clean_ticket", "{}"),
            reply("Classify all attributes.", "enrich_ticket", "{}"),
            reply("Create the task.", "create_task", "{}"),
        ]
    }

    #[tokio::test]
    async fn login_ticket_terminates_with_task() {
        let h = harness(happy_path());
        let outcome = h.agent.run(&login_ticket()).await;

        assert_eq!(outcome.state(), LoopState::Terminated);
        let result = outcome.result().unwrap();
        assert!(!result.task_id.is_empty());

        let trace = outcome.trace();
        assert_eq!(trace.len(), 3);
        assert_eq!(trace.successful_submissions(), 1);
        match &trace.steps()[1].observation {
            Observation::Success { value } => {
                assert_eq!(value["type"], "Bug");
                assert_eq!(value["priority"], "High");
                assert_eq!(value["department"], "Support");
            }
            other => panic!("unexpected observation {other:?}"),
        }
        assert_eq!(h.tracker.submissions()[0].priority_level, 2);
        assert_eq!(h.tracker.submissions().len(), 1);
    }

    #[tokio::test]
    async fn invalid_replies_are_reprompted() {
        let mut replies = vec![
            "I think we should create a task.".to_string(),
            reply("Delete it.", "delete_task", "{}"),
        ];
        replies.extend(happy_path());
        let h = harness(replies);
        let outcome = h.agent.run(&login_ticket()).await;

        assert_eq!(outcome.state(), LoopState::Terminated);
        let trace = outcome.trace();
        assert_eq!(trace.len(), 3);
        assert_eq!(trace.rejections().len(), 2);
        assert_eq!(trace.rejections()[1].step, 0);
        assert!(trace.rejections()[1].reason.contains("unknown tool 'delete_task'"));

        let requests = h.engine.requests();
        assert_eq!(requests.len(), 5);
        assert!(requests[1].messages[1].content.contains("previous reply was rejected"));
        assert!(requests[2].messages[1].content.contains("unknown tool 'delete_task'"));
        assert!(!requests[3].messages[1].content.contains("rejected"));
    }

    #[tokio::test]
    async fn too_many_invalid_replies_fail() {
        let h = harness(vec!["nonsense".to_string(); 10]);
        let outcome = h.agent.run(&login_ticket()).await;

        assert_eq!(outcome.error().unwrap().kind(), "invalid_action");
        assert_eq!(outcome.trace().rejections().len(), 4);
        assert!(outcome.trace().is_empty());
        assert_eq!(h.engine.requests().len(), 4);
    }

    #[tokio::test]
    async fn step_budget_is_enforced() {
        let replies = vec![reply("Clean again.", "clean_ticket", "{}"); 20];
        let h = harness(replies);
        let outcome = h.agent.run(&login_ticket()).await;

        assert_eq!(
            outcome.error(),
            Some(&TriageError::LoopExceededSteps { max_steps: 10 })
        );
        assert_eq!(outcome.trace().len(), 10);
        assert!(h.tracker.submissions().is_empty());
    }

    #[tokio::test]
    async fn premature_create_is_reprompted_not_executed() {
        let replies = vec![
            reply("Create straight away.", "create_task", "{}"),
            reply("Look up a field.", "lookup_custom_field", r#"{"field_name": "severity"}"#),
            reply("Classify first.", "enrich_ticket", "{}"),
            reply("Now create.", "create_task", r#"{"title": "Login failure"}"#),
        ];
        let h = harness(replies);
        let outcome = h.agent.run(&login_ticket()).await;

        assert_eq!(outcome.state(), LoopState::Terminated);
        let trace = outcome.trace();
        assert_eq!(trace.len(), 3);
        assert_eq!(trace.rejections().len(), 1);
        assert!(trace.rejections()[0].reason.contains("create_task is not ready"));
        assert_eq!(trace.steps()[0].observation.error().unwrap().kind(), "unknown_field");

        let creates = trace
            .steps()
            .iter()
            .filter(|s| s.action == ToolName::CreateTask)
            .count();
        assert_eq!(creates, 1);
        assert_eq!(trace.successful_submissions(), 1);
        assert_eq!(h.tracker.submissions()[0].title, "Login failure");

        let last = h.engine.requests().pop().unwrap();
        assert!(last.messages[1].content.contains("unknown_field"));
    }

    #[tokio::test]
    async fn rejected_submission_fails_run() {
        let tracker = RecordingTracker::failing(TriageError::SubmissionRejected {
            status: 400,
            body: "Priority invalid".into(),
        });
        let h = harness_with(ScriptedEngine::new(happy_path()), tracker, settings());
        let outcome = h.agent.run(&login_ticket()).await;

        assert_eq!(outcome.error().unwrap().kind(), "submission_rejected");
        let trace = outcome.trace();
        assert_eq!(trace.len(), 3);
        assert!(!trace.steps()[2].observation.is_success());
        assert_eq!(h.tracker.submissions().len(), 1);
    }

    #[tokio::test]
    async fn update_task_terminates() {
        let replies = vec![reply(
            "The task already exists; raise its priority.",
            "update_task",
            r#"{"task_id": "86a1b2c3", "patch": {"priority_level": 1}}"#,
        )];
        let h = harness(replies);
        let outcome = h.agent.run(&login_ticket()).await;

        assert_eq!(outcome.result().unwrap().task_id, "86a1b2c3");
        assert_eq!(h.tracker.updates().len(), 1);
        assert!(h.tracker.submissions().is_empty());
    }

    #[tokio::test]
    async fn failed_update_is_an_observation() {
        let tracker = RecordingTracker::failing(TriageError::SubmissionUnavailable {
            reason: "503".into(),
            possibly_created: false,
        });
        let replies = vec![
            reply("Update.", "update_task", r#"{"task_id": "86a1", "patch": {"title": "x"}}"#),
            reply("Update.", "update_task", r#"{"task_id": "86a1", "patch": {"title": "x"}}"#),
        ];
        let mut s = settings();
        s.agent.max_steps = 2;
        let h = harness_with(ScriptedEngine::new(replies), tracker, s);
        let outcome = h.agent.run(&login_ticket()).await;

        assert_eq!(
            outcome.error(),
            Some(&TriageError::LoopExceededSteps { max_steps: 2 })
        );
        assert_eq!(h.tracker.updates().len(), 2);
    }

    #[tokio::test]
    async fn engine_failure_is_fatal() {
        let engine = ScriptedEngine::with_results([
            Ok(reply("Clean.", "clean_ticket", "{}")),
            Err(TriageError::EngineUnavailable {
                reason: "connection refused".into(),
            }),
        ]);
        let h = harness_with(engine, RecordingTracker::new(), settings());
        let outcome = h.agent.run(&login_ticket()).await;

        assert_eq!(outcome.error().unwrap().kind(), "engine_unavailable");
        assert_eq!(outcome.trace().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let h = harness(happy_path());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = h.agent.run_with_cancel(&login_ticket(), &cancel).await;

        assert_eq!(outcome.error(), Some(&TriageError::Cancelled));
        assert!(outcome.trace().is_empty());
        assert!(h.engine.requests().is_empty());
    }

    struct CancellingEngine {
        inner: ScriptedEngine,
        cancel: CancellationToken,
        after: usize,
    }

    #[async_trait::async_trait]
    impl ReasoningEngine for CancellingEngine {
        async fn complete(
            &self,
            request: &triage_ai::CompletionRequest,
        ) -> Result<String, TriageError> {
            if self.inner.requests().len() + 1 >= self.after {
                self.cancel.cancel();
            }
            self.inner.complete(request).await
        }
    }

    #[tokio::test]
    async fn cancelled_between_steps_keeps_partial_trace() {
        let cancel = CancellationToken::new();
        let engine = Arc::new(CancellingEngine {
            inner: ScriptedEngine::new(happy_path()),
            cancel: cancel.clone(),
            after: 2,
        });
        let tracker = Arc::new(RecordingTracker::new());
        let agent = Agent::new(
            engine,
            Arc::new(login_ensemble()),
            tracker.clone(),
            Arc::new(settings()),
        );
        let outcome = agent.run_with_cancel(&login_ticket(), &cancel).await;

        assert_eq!(outcome.error(), Some(&TriageError::Cancelled));
        assert_eq!(outcome.trace().len(), 1);
        assert!(tracker.submissions().is_empty());
    }

    struct SlowEngine;

    #[async_trait::async_trait]
    impl ReasoningEngine for SlowEngine {
        async fn complete(
            &self,
            _request: &triage_ai::CompletionRequest,
        ) -> Result<String, TriageError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn engine_timeout_is_fatal() {
        let agent = Agent::new(
            Arc::new(SlowEngine),
            Arc::new(login_ensemble()),
            Arc::new(RecordingTracker::new()),
            Arc::new(settings()),
        );
        let outcome = agent.run(&login_ticket()).await;
        assert!(matches!(
            outcome.error(),
            Some(TriageError::Timeout { after_ms: 60_000, .. })
        ));
    }

    #[tokio::test]
    async fn concurrent_runs_are_isolated() {
        let settings = Arc::new(settings());
        let ensemble = Arc::new(login_ensemble());
        let runs = (0..4).map(|i| {
            let agent = Agent::new(
                Arc::new(ScriptedEngine::new(happy_path())),
                ensemble.clone(),
                Arc::new(RecordingTracker::new()),
                settings.clone(),
            );
            async move {
                let ticket = Ticket::new(format!("Cannot log in #{i}"), "500 error").unwrap();
                agent.run(&ticket).await
            }
        });
        let outcomes = futures::future::join_all(runs).await;
        assert!(outcomes.iter().all(|o| o.state() == LoopState::Terminated));
        let refs: std::collections::BTreeSet<_> =
            outcomes.iter().map(|o| o.trace().ticket_ref().to_string()).collect();
        assert_eq!(refs.len(), 4);
    }
}
