//! Per-session run coordinator.
//!
//! One [`SessionRegistry`] behind one mutex holds every session, its backlog,
//! debounce timer, active run and the run index. Every check-then-mutate step
//! runs inside a single lock acquisition, and the guard is never held across
//! an `.await`: agent calls, live injection and observer hooks all happen
//! after the lock is released.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use {
    parley_common::types::InboundMessage,
    parley_config::{ChatConfig, QueueConfig, RunsConfig},
    serde::Serialize,
    tokio::time::Instant,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use parley_metrics::{
    auto_reply as auto_reply_metrics, counter, gauge, histogram, labels, runs as run_metrics,
    session as session_metrics,
};

use crate::{
    backlog::{QueuedInput, render_prompt},
    debounce::FlushTrigger,
    policy::{EffectivePolicy, PolicyOverride, resolve},
    queue::{Action, DrainPlan, decide, drain_plan},
    registry::{SessionRegistry, SessionSnapshot},
    runs::{
        AgentExecutor, NoopObserver, RunEvents, RunHandle, RunObserver, RunOutcome, RunRequest,
        RunSettled, RunState, WaitResult,
    },
};

/// A run to abort, by owning session or by run id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunRef<'a> {
    Session(&'a str),
    Run(&'a str),
}

/// Outcome of one enqueue.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enqueued {
    pub action: Action,
    /// The run this input started, was injected into, or is waiting behind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Backlog length once the enqueue returned.
    pub queue_len: usize,
    /// Entries evicted by the drop policy.
    pub dropped: usize,
    /// The drop policy rejected this input itself.
    pub input_dropped: bool,
    pub policy: EffectivePolicy,
}

enum Placement {
    Done {
        enqueued: Enqueued,
        dropped: Vec<QueuedInput>,
    },
    Inject {
        run_id: String,
        input: QueuedInput,
        policy: EffectivePolicy,
    },
}

pub struct RunCoordinator {
    executor: Arc<dyn AgentExecutor>,
    observer: Arc<dyn RunObserver>,
    queue_defaults: QueueConfig,
    runs_config: RunsConfig,
    state: Mutex<SessionRegistry>,
}

impl RunCoordinator {
    pub fn new(executor: Arc<dyn AgentExecutor>, config: &ChatConfig) -> Arc<Self> {
        Self::with_observer(executor, Arc::new(NoopObserver), config)
    }

    /// Create a coordinator that reports run lifecycle events to `observer`.
    pub fn with_observer(
        executor: Arc<dyn AgentExecutor>,
        observer: Arc<dyn RunObserver>,
        config: &ChatConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            executor,
            observer,
            queue_defaults: config.queue.clone(),
            runs_config: config.runs.clone(),
            state: Mutex::new(SessionRegistry::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SessionRegistry> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn base_policy(&self, channel: Option<&str>) -> EffectivePolicy {
        EffectivePolicy::from_config(&self.queue_defaults, channel.filter(|c| !c.is_empty()))
    }

    // ── Enqueue ─────────────────────────────────────────────────────────────

    /// Queue `msg` for its session under the resolved policy and act on the
    /// decision. `inline` is the per-message override layer.
    pub async fn enqueue(
        self: &Arc<Self>,
        msg: InboundMessage,
        inline: Option<PolicyOverride>,
        received_at: Instant,
    ) -> Enqueued {
        let InboundMessage {
            session_key,
            body,
            meta,
        } = msg;

        // Sequence numbers are assigned under the lock, in placement order.
        let mut input = QueuedInput::message(0, received_at, body, meta);
        let mut allow_inject = true;
        let (enqueued, dropped) = loop {
            let placement = {
                let mut reg = self.lock();
                self.place(&mut reg, &session_key, input, inline.as_ref(), allow_inject)
            };
            let (run_id, rejected, policy) = match placement {
                Placement::Done { enqueued, dropped } => break (enqueued, dropped),
                Placement::Inject {
                    run_id,
                    input,
                    policy,
                } => (run_id, input, policy),
            };

            let accepted = self.executor.inject_live(&run_id, &rejected).await;

            #[cfg(feature = "metrics")]
            counter!(
                auto_reply_metrics::LIVE_INJECTIONS_TOTAL,
                labels::SUCCESS => accepted.to_string()
            )
            .increment(1);

            if !accepted {
                debug!(session_key = %session_key, run_id = %run_id, "live injection refused, queueing instead");
                input = rejected;
                allow_inject = false;
                continue;
            }

            debug!(session_key = %session_key, run_id = %run_id, "input injected into live run");
            let queue_len = self.lock().get(&session_key).map_or(0, |s| s.backlog.len());
            let enqueued = Enqueued {
                action: Action::InjectLive,
                run_id: Some(run_id),
                queue_len,
                dropped: 0,
                input_dropped: false,
                policy,
            };
            break (enqueued, Vec::new());
        };

        #[cfg(feature = "metrics")]
        {
            counter!(
                auto_reply_metrics::QUEUE_ACTIONS_TOTAL,
                labels::ACTION => enqueued.action.as_str(),
                labels::MODE => enqueued.policy.mode.as_str()
            )
            .increment(1);
            histogram!(auto_reply_metrics::QUEUE_SIZE).record(enqueued.queue_len as f64);
        }

        if !dropped.is_empty() {
            warn!(
                session_key = %session_key,
                policy = %enqueued.policy.drop,
                count = dropped.len(),
                "backlog full, dropped queued input"
            );

            #[cfg(feature = "metrics")]
            counter!(
                auto_reply_metrics::MESSAGES_DROPPED_TOTAL,
                labels::POLICY => enqueued.policy.drop.as_str()
            )
            .increment(dropped.len() as u64);

            self.observer.on_dropped(&session_key, &dropped).await;
        }

        enqueued
    }

    /// Apply the queue decision for `input`. Runs entirely under the lock.
    fn place(
        self: &Arc<Self>,
        reg: &mut SessionRegistry,
        key: &str,
        mut input: QueuedInput,
        inline: Option<&PolicyOverride>,
        allow_inject: bool,
    ) -> Placement {
        if input.seq == 0 {
            input.seq = reg.next_seq();
        }
        let base = self.base_policy(input.meta().map(|m| m.channel.as_str()));
        let (session, created) = reg.get_or_create(key, base);
        if created {
            debug!(session_key = %key, "session created");

            #[cfg(feature = "metrics")]
            counter!(session_metrics::CREATED_TOTAL).increment(1);
        }
        session.base = base;
        // The inline layer shapes this arrival only; drains and timer
        // flushes follow the standing policy.
        session.policy = session.standing_policy();
        let policy = resolve(base, session.session_override.as_ref(), inline);

        let state = session.run_state();
        let injectable = allow_inject
            && state == RunState::Streaming
            && session
                .active
                .as_ref()
                .is_some_and(|h| self.executor.supports_live_injection(&h.run_id));
        let action = decide(state, policy.mode, policy.debounce_ms, injectable);
        let active_run = session.active.as_ref().map(|h| h.run_id.clone());

        debug!(
            session_key = %key,
            state = state.as_str(),
            mode = %policy.mode,
            action = action.as_str(),
            "queue decision"
        );

        if action == Action::InjectLive
            && let Some(run_id) = active_run.clone()
        {
            return Placement::Inject {
                run_id,
                input,
                policy,
            };
        }

        let incoming_seq = input.seq;
        let received_at = input.received_at.min(Instant::now());
        let dropped = session.backlog.append(input, policy.cap, policy.drop);
        let input_dropped = dropped.iter().any(|d| d.seq == incoming_seq);

        let run_id = match action {
            Action::StartNow => {
                session.debounce.cancel();
                self.start_next(reg, key)
            },
            Action::Interrupt => {
                session.pending_interrupt = true;
                if let Some(handle) = &session.active
                    && handle.abort()
                {
                    info!(session_key = %key, run_id = %handle.run_id, "interrupting active run");

                    #[cfg(feature = "metrics")]
                    counter!(run_metrics::ABORTS_TOTAL, labels::TRIGGER => "interrupt").increment(1);
                }
                active_run
            },
            Action::ArmTimer if session.backlog.len() >= policy.cap => {
                session.debounce.cancel();
                debug!(
                    session_key = %key,
                    cap = policy.cap,
                    trigger = FlushTrigger::Cap.as_str(),
                    "backlog at cap, flushing batch early"
                );

                #[cfg(feature = "metrics")]
                counter!(
                    auto_reply_metrics::DEBOUNCE_FLUSHES_TOTAL,
                    labels::TRIGGER => FlushTrigger::Cap.as_str()
                )
                .increment(1);

                if session.active.is_some() {
                    active_run
                } else {
                    self.start_next(reg, key)
                }
            },
            Action::ArmTimer => {
                let coordinator = Arc::clone(self);
                let timer_key = key.to_string();
                session
                    .debounce
                    .arm(received_at, &policy, move |generation, deadline| {
                        tokio::spawn(async move {
                            tokio::time::sleep_until(deadline).await;
                            coordinator.on_debounce_expired(&timer_key, generation);
                        })
                    });
                active_run
            },
            Action::Backlog | Action::InjectLive => active_run,
        };

        let queue_len = reg.get(key).map_or(0, |s| s.backlog.len());
        Placement::Done {
            enqueued: Enqueued {
                action,
                run_id,
                queue_len,
                dropped: dropped.len(),
                input_dropped,
                policy,
            },
            dropped,
        }
    }

    // ── Run lifecycle ───────────────────────────────────────────────────────

    /// Start the next run from the session backlog if its run slot is free.
    fn start_next(self: &Arc<Self>, reg: &mut SessionRegistry, key: &str) -> Option<String> {
        let session = reg.get_mut(key)?;
        if session.active.is_some() {
            return None;
        }
        let plan = drain_plan(session.policy.mode, session.pending_interrupt);
        session.pending_interrupt = false;
        let inputs: Vec<QueuedInput> = match plan {
            DrainPlan::One => session.backlog.pop_front().into_iter().collect(),
            DrainPlan::All => session.backlog.take_all(),
        };
        if inputs.is_empty() {
            return None;
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let handle = RunHandle::new(run_id.clone());
        let cancel = handle.cancel.clone();
        let events = RunEvents::new(
            run_id.clone(),
            key.to_string(),
            Arc::clone(&handle.streaming),
            Arc::clone(&self.observer),
        );
        let started_at = handle.started_at;
        let request = RunRequest {
            run_id: run_id.clone(),
            session_key: key.to_string(),
            prompt: render_prompt(&inputs),
            inputs,
        };
        reg.attach_run(key, handle);

        info!(
            session_key = %key,
            run_id = %run_id,
            inputs = request.inputs.len(),
            "run started"
        );

        #[cfg(feature = "metrics")]
        {
            counter!(run_metrics::STARTED_TOTAL).increment(1);
            gauge!(run_metrics::ACTIVE).set(reg.active_runs() as f64);
        }

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            coordinator.drive_run(request, cancel, events, started_at).await;
        });
        Some(run_id)
    }

    async fn drive_run(
        self: Arc<Self>,
        request: RunRequest,
        cancel: CancellationToken,
        events: RunEvents,
        started_at: Instant,
    ) {
        self.observer.on_run_started(&request).await;

        // The agent runs in its own task so a panic there still settles the run.
        let executor = Arc::clone(&self.executor);
        let agent_request = request.clone();
        let agent_cancel = cancel.clone();
        let joined = tokio::spawn(async move {
            executor
                .start_run(agent_request, agent_cancel, events)
                .await
        })
        .await;

        let outcome = match joined {
            Ok(Ok(reply)) => RunOutcome::Completed(reply),
            Ok(Err(e)) if e.is_cancelled() || cancel.is_cancelled() => {
                debug!(run_id = %request.run_id, error = %e, "run unwound after cancellation");
                RunOutcome::Cancelled
            },
            Ok(Err(e)) => {
                warn!(run_id = %request.run_id, session_key = %request.session_key, error = %e, "agent run failed");
                RunOutcome::Failed {
                    error: e.to_string(),
                }
            },
            Err(e) => {
                error!(run_id = %request.run_id, session_key = %request.session_key, error = %e, "agent task panicked");
                RunOutcome::Failed {
                    error: format!("agent task panicked: {e}"),
                }
            },
        };

        let settled = self.finish_run(request, outcome, started_at);
        self.observer.on_run_settled(&settled).await;
    }

    /// Settle bookkeeping for a finished run: detach it, wake waiters, then
    /// drain the backlog before the lock is released.
    fn finish_run(
        self: &Arc<Self>,
        request: RunRequest,
        outcome: RunOutcome,
        started_at: Instant,
    ) -> RunSettled {
        let duration = started_at.elapsed();
        let RunRequest {
            run_id,
            session_key,
            inputs,
            ..
        } = request;

        let mut reg = self.lock();
        if let Some(handle) = reg.detach_run(&session_key, &run_id) {
            handle.settle(outcome.clone());
        }

        info!(
            session_key = %session_key,
            run_id = %run_id,
            outcome = outcome.as_str(),
            elapsed_ms = duration.as_millis() as u64,
            "run settled"
        );

        #[cfg(feature = "metrics")]
        {
            counter!(run_metrics::SETTLED_TOTAL, labels::OUTCOME => outcome.as_str()).increment(1);
            histogram!(run_metrics::DURATION_SECONDS).record(duration.as_secs_f64());
            gauge!(run_metrics::ACTIVE).set(reg.active_runs() as f64);
        }

        // A collect window still open keeps its batch until the timer fires.
        let drain = reg
            .get(&session_key)
            .is_some_and(|s| s.active.is_none() && !s.debounce.is_armed());
        if drain && let Some(next) = self.start_next(&mut reg, &session_key) {
            debug!(session_key = %session_key, next_run = %next, "drained backlog into next run");
        }
        if self.runs_config.prune_idle_sessions && reg.prune(&session_key) {
            debug!(session_key = %session_key, "idle session pruned");
        }

        #[cfg(feature = "metrics")]
        gauge!(session_metrics::ACTIVE).set(reg.len() as f64);

        RunSettled {
            run_id,
            session_key,
            inputs,
            outcome,
            duration,
        }
    }

    fn on_debounce_expired(self: &Arc<Self>, key: &str, generation: u64) {
        let mut reg = self.lock();
        let Some(session) = reg.get_mut(key) else {
            return;
        };
        let Some(trigger) = session.debounce.take_expired(generation) else {
            debug!(session_key = %key, generation, "stale debounce expiry ignored");
            return;
        };

        #[cfg(feature = "metrics")]
        counter!(
            auto_reply_metrics::DEBOUNCE_FLUSHES_TOTAL,
            labels::TRIGGER => trigger.as_str()
        )
        .increment(1);

        if session.active.is_some() {
            debug!(session_key = %key, trigger = trigger.as_str(), "debounce elapsed during run, batch waits for settle");
            return;
        }
        let queued = session.backlog.len();
        if let Some(run_id) = self.start_next(&mut reg, key) {
            debug!(session_key = %key, run_id = %run_id, queued, trigger = trigger.as_str(), "debounce window flushed");
        }
    }

    // ── Control & predicates ────────────────────────────────────────────────

    /// Raise the cancellation signal of the targeted run.
    ///
    /// Returns `true` when an active run was found, including one already
    /// cancelling; `false` when there is nothing to cancel. The backlog is
    /// left alone and drains once the run settles.
    pub fn abort_run(&self, target: RunRef<'_>) -> bool {
        let reg = self.lock();
        let key = match target {
            RunRef::Session(key) => key,
            RunRef::Run(run_id) => match reg.find_by_run_id(run_id) {
                Some(key) => key,
                None => return false,
            },
        };
        let Some(handle) = reg.get(key).and_then(|s| s.active.as_ref()) else {
            debug!(session_key = %key, "abort requested with no active run");
            return false;
        };
        if let RunRef::Run(run_id) = target
            && handle.run_id != run_id
        {
            return false;
        }
        if handle.abort() {
            info!(session_key = %key, run_id = %handle.run_id, "run abort requested");

            #[cfg(feature = "metrics")]
            counter!(run_metrics::ABORTS_TOTAL, labels::TRIGGER => "abort").increment(1);
        }
        true
    }

    /// Wait for the session's current run to settle, up to `timeout`
    /// (`None` uses the configured default). Never mutates session state.
    pub async fn wait_for_end(&self, key: &str, timeout: Option<Duration>) -> WaitResult {
        let timeout =
            timeout.unwrap_or_else(|| Duration::from_millis(self.runs_config.wait_timeout_ms));
        let rx = {
            let reg = self.lock();
            reg.get(key)
                .and_then(|s| s.active.as_ref())
                .map(|h| h.done.subscribe())
        };
        let Some(mut rx) = rx else {
            return WaitResult {
                settled: true,
                outcome: None,
            };
        };

        match tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await {
            Ok(Ok(outcome)) => WaitResult {
                settled: true,
                outcome: outcome.clone(),
            },
            // Handle dropped without an outcome: the session was removed.
            Ok(Err(_)) => WaitResult {
                settled: true,
                outcome: None,
            },
            Err(_) => WaitResult {
                settled: false,
                outcome: None,
            },
        }
    }

    #[must_use]
    pub fn is_active(&self, key: &str) -> bool {
        self.run_state(key).is_active()
    }

    /// The active run has emitted partial output.
    #[must_use]
    pub fn is_streaming(&self, key: &str) -> bool {
        self.lock()
            .get(key)
            .and_then(|s| s.active.as_ref())
            .is_some_and(|h| h.streaming.load(std::sync::atomic::Ordering::Acquire))
    }

    #[must_use]
    pub fn run_state(&self, key: &str) -> RunState {
        self.lock()
            .get(key)
            .map_or(RunState::Idle, |s| s.run_state())
    }

    // ── Session policy ──────────────────────────────────────────────────────

    /// Merge `over` into the session-level override. Returns the policy now in
    /// effect for messages without inline directives.
    pub fn set_session_policy(&self, key: &str, over: PolicyOverride) -> EffectivePolicy {
        self.update_session_policy(key, None, over)
    }

    pub(crate) fn update_session_policy(
        &self,
        key: &str,
        channel: Option<&str>,
        over: PolicyOverride,
    ) -> EffectivePolicy {
        let mut reg = self.lock();
        let (session, _) = reg.get_or_create(key, self.base_policy(channel));
        let merged = session
            .session_override
            .get_or_insert_with(PolicyOverride::default);
        merged.merge(&over);
        if merged.is_empty() {
            session.session_override = None;
        }
        session.policy = session.standing_policy();
        info!(
            session_key = %key,
            mode = %session.policy.mode,
            debounce_ms = session.policy.debounce_ms,
            cap = session.policy.cap,
            drop = %session.policy.drop,
            "session queue policy updated"
        );
        session.policy
    }

    /// Drop the session-level override. Returns whether one was set.
    pub fn clear_session_policy(&self, key: &str) -> bool {
        let mut reg = self.lock();
        let Some(session) = reg.get_mut(key) else {
            return false;
        };
        let had = session.session_override.take().is_some();
        session.policy = session.standing_policy();
        if had {
            info!(session_key = %key, "session queue policy reset");
        }
        if self.runs_config.prune_idle_sessions {
            reg.prune(key);
        }
        had
    }

    /// Policy applied to a message without inline directives.
    #[must_use]
    pub fn session_policy(&self, key: &str) -> EffectivePolicy {
        self.standing_policy(key, None)
    }

    pub(crate) fn standing_policy(&self, key: &str, channel: Option<&str>) -> EffectivePolicy {
        self.lock()
            .get(key)
            .map_or_else(|| self.base_policy(channel), |s| s.standing_policy())
    }

    // ── Teardown & inspection ───────────────────────────────────────────────

    /// Clear the backlog and disarm the debounce timer. The active run is
    /// left running. Returns how many entries were discarded.
    pub fn cancel_queued(&self, key: &str) -> usize {
        let mut reg = self.lock();
        let Some(session) = reg.get_mut(key) else {
            return 0;
        };
        let cleared = session.backlog.clear();
        let disarmed = session.debounce.cancel();
        if cleared > 0 || disarmed {
            info!(session_key = %key, cleared, "queued input cancelled");
        }
        if self.runs_config.prune_idle_sessions {
            reg.prune(key);
        }
        cleared
    }

    /// Forget a session, cancelling its run and timer.
    pub fn remove_session(&self, key: &str) -> bool {
        let mut reg = self.lock();
        let removed = reg.remove(key).is_some();
        if removed {
            debug!(session_key = %key, "session removed");
        }
        removed
    }

    /// Cancel every run and timer and forget all sessions.
    pub fn clear_all_sessions(&self) -> usize {
        let count = self.lock().clear();
        if count > 0 {
            info!(count, "all sessions cleared");
        }
        count
    }

    #[must_use]
    pub fn session(&self, key: &str) -> Option<SessionSnapshot> {
        self.lock().get(key).map(|s| s.snapshot())
    }

    #[must_use]
    pub fn sessions(&self) -> Vec<SessionSnapshot> {
        self.lock().snapshots()
    }

    /// Session key owning `run_id`, if that run is still active.
    #[must_use]
    pub fn session_for_run(&self, run_id: &str) -> Option<String> {
        self.lock().find_by_run_id(run_id).map(str::to_string)
    }
}
