//! Per-session run coordination and message queueing for inbound chat.
//!
//! Flow: channel message → [`RunCoordinator::ingest`] → `/queue` directive
//! parsing → policy resolution → queue decision (start, inject, backlog,
//! debounce) → agent run → drain the backlog when the run settles.
//!
//! A session has at most one run in flight. What happens to messages that
//! arrive meanwhile is governed by the session's [`MessageQueueMode`].

pub mod backlog;
pub mod coordinator;
pub mod debounce;
pub mod directives;
pub mod error;
pub mod inbound;
pub mod index;
pub mod policy;
pub mod queue;
pub mod registry;
pub mod runs;

pub use {
    backlog::{QueuedInput, QueuedPayload, render_prompt},
    coordinator::{Enqueued, RunCoordinator, RunRef},
    directives::{ParsedDirectives, parse_directives},
    error::{Error, Result},
    inbound::Ingested,
    parley_config::{DropPolicy, MessageQueueMode},
    policy::{EffectivePolicy, PolicyOverride},
    queue::Action,
    registry::SessionSnapshot,
    runs::{
        AgentExecutor, AgentReply, NoopObserver, RunEvents, RunObserver, RunOutcome, RunRequest,
        RunSettled, RunState, WaitResult,
    },
};
