//! Run handles, the agent collaborator seam, and observer hooks.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    serde::Serialize,
    tokio::{sync::watch, time::Instant},
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

use crate::{backlog::QueuedInput, error::Result};

/// Lifecycle state of a session's run slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    /// The agent has emitted partial output.
    Streaming,
    /// Cancellation was requested; waiting for the agent to unwind.
    Cancelling,
}

impl RunState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Streaming => "streaming",
            Self::Cancelling => "cancelling",
        }
    }

    #[must_use]
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// Input handed to the agent for one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub run_id: String,
    pub session_key: String,
    /// Queued inputs consumed by this run, in receipt order.
    pub inputs: Vec<QueuedInput>,
    /// Rendered prompt for `inputs`.
    pub prompt: String,
}

/// Successful agent output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AgentReply {
    pub text: String,
}

impl AgentReply {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// How a run settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed(AgentReply),
    Failed { error: String },
    Cancelled,
}

impl RunOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Everything an observer learns when a run ends.
#[derive(Debug, Clone)]
pub struct RunSettled {
    pub run_id: String,
    pub session_key: String,
    pub inputs: Vec<QueuedInput>,
    pub outcome: RunOutcome,
    pub duration: Duration,
}

/// Result of [`crate::RunCoordinator::wait_for_end`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitResult {
    /// `false` means the timeout elapsed first.
    pub settled: bool,
    /// Outcome of the awaited run, when one was tracked and reported.
    pub outcome: Option<RunOutcome>,
}

/// The agent execution backend.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Execute one run. Implementations should watch `cancel` and return
    /// [`crate::Error::Cancelled`] (or a partial reply) once it fires.
    async fn start_run(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
        events: RunEvents,
    ) -> Result<AgentReply>;

    /// Whether `run_id` can accept input mid-flight.
    fn supports_live_injection(&self, _run_id: &str) -> bool {
        false
    }

    /// Push `input` into a running turn. Returns whether it was accepted.
    async fn inject_live(&self, _run_id: &str, _input: &QueuedInput) -> bool {
        false
    }
}

/// Lifecycle callbacks for channel delivery and telemetry.
///
/// Never invoked while coordinator state is locked.
#[async_trait]
pub trait RunObserver: Send + Sync {
    async fn on_run_started(&self, _request: &RunRequest) {}

    /// Partial output. Called synchronously from the agent task, keep it cheap.
    fn on_partial(&self, _session_key: &str, _run_id: &str, _text: &str) {}

    async fn on_run_settled(&self, _settled: &RunSettled) {}

    /// Inputs evicted by the drop policy.
    async fn on_dropped(&self, _session_key: &str, _dropped: &[QueuedInput]) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Sink for partial output, handed to [`AgentExecutor::start_run`].
#[derive(Clone)]
pub struct RunEvents {
    run_id: String,
    session_key: String,
    streaming: Arc<AtomicBool>,
    observer: Arc<dyn RunObserver>,
}

impl RunEvents {
    pub(crate) fn new(
        run_id: String,
        session_key: String,
        streaming: Arc<AtomicBool>,
        observer: Arc<dyn RunObserver>,
    ) -> Self {
        Self {
            run_id,
            session_key,
            streaming,
            observer,
        }
    }

    /// A detached sink for driving an executor outside a coordinator.
    pub fn detached(run_id: impl Into<String>, session_key: impl Into<String>) -> Self {
        Self::new(
            run_id.into(),
            session_key.into(),
            Arc::new(AtomicBool::new(false)),
            Arc::new(NoopObserver),
        )
    }

    /// Report partial output. The first call moves the run to `Streaming`.
    pub fn partial(&self, text: &str) {
        if !self.streaming.swap(true, Ordering::AcqRel) {
            debug!(run_id = %self.run_id, session_key = %self.session_key, "run streaming");
        }
        self.observer.on_partial(&self.session_key, &self.run_id, text);
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }
}

/// The single in-flight run of a session. Owned by the session entry.
#[derive(Debug)]
pub(crate) struct RunHandle {
    pub run_id: String,
    pub cancel: CancellationToken,
    pub started_at: Instant,
    pub streaming: Arc<AtomicBool>,
    pub done: watch::Sender<Option<RunOutcome>>,
}

impl RunHandle {
    pub fn new(run_id: String) -> Self {
        let (done, _) = watch::channel(None);
        Self {
            run_id,
            cancel: CancellationToken::new(),
            started_at: Instant::now(),
            streaming: Arc::new(AtomicBool::new(false)),
            done,
        }
    }

    pub fn state(&self) -> RunState {
        if self.cancel.is_cancelled() {
            RunState::Cancelling
        } else if self.streaming.load(Ordering::Acquire) {
            RunState::Streaming
        } else {
            RunState::Running
        }
    }

    /// Raise the cancellation signal. Returns whether this call raised it.
    pub fn abort(&self) -> bool {
        let first = !self.cancel.is_cancelled();
        self.cancel.cancel();
        first
    }

    /// Publish the outcome to `wait_for_end` callers.
    pub fn settle(&self, outcome: RunOutcome) {
        self.done.send_replace(Some(outcome));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_state_transitions() {
        let handle = RunHandle::new("r1".into());
        assert_eq!(handle.state(), RunState::Running);

        let events = RunEvents::new(
            "r1".into(),
            "s1".into(),
            Arc::clone(&handle.streaming),
            Arc::new(NoopObserver),
        );
        events.partial("hel");
        assert_eq!(handle.state(), RunState::Streaming);

        assert!(handle.abort());
        assert!(!handle.abort());
        assert_eq!(handle.state(), RunState::Cancelling);
    }

    #[tokio::test]
    async fn settle_reaches_subscribers() {
        let handle = RunHandle::new("r1".into());
        let mut rx = handle.done.subscribe();
        handle.settle(RunOutcome::Cancelled);
        let seen = rx.wait_for(Option::is_some).await.map(|v| v.clone());
        assert_eq!(seen.ok().flatten(), Some(RunOutcome::Cancelled));
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(RunOutcome::Failed {
            error: "boom".into(),
        });
        assert_eq!(
            json.ok(),
            Some(serde_json::json!({ "status": "failed", "error": "boom" }))
        );
        assert_eq!(RunOutcome::Completed(AgentReply::new("x")).as_str(), "completed");
    }
}
