//! Session registry: every session entry plus the run index, mutated only
//! through this type while the coordinator holds its lock.

use std::collections::HashMap;

use {serde::Serialize, tokio::time::Instant};

use crate::{
    backlog::{Backlog, QueuedInput},
    debounce::Debouncer,
    index::RunIndex,
    policy::{EffectivePolicy, PolicyOverride, resolve},
    runs::{RunHandle, RunState},
};

#[derive(Debug)]
pub(crate) struct Session {
    pub key: String,
    /// Global defaults with the channel's mode applied.
    pub base: EffectivePolicy,
    pub session_override: Option<PolicyOverride>,
    /// Standing policy (no inline layer); governs drains and timer flushes.
    pub policy: EffectivePolicy,
    pub active: Option<RunHandle>,
    pub backlog: Backlog,
    pub debounce: Debouncer,
    /// The active run was cancelled by an `interrupt` arrival; the next
    /// drain takes the whole backlog.
    pub pending_interrupt: bool,
    pub created_at: Instant,
}

impl Session {
    fn new(key: String, base: EffectivePolicy) -> Self {
        Self {
            key,
            base,
            session_override: None,
            policy: base,
            active: None,
            backlog: Backlog::new(),
            debounce: Debouncer::default(),
            pending_interrupt: false,
            created_at: Instant::now(),
        }
    }

    pub fn run_state(&self) -> RunState {
        self.active.as_ref().map_or(RunState::Idle, RunHandle::state)
    }

    /// Policy with the session override and no inline layer.
    pub fn standing_policy(&self) -> EffectivePolicy {
        resolve(self.base, self.session_override.as_ref(), None)
    }

    /// Nothing references this session any more.
    pub fn is_disposable(&self) -> bool {
        self.active.is_none()
            && self.backlog.is_empty()
            && !self.debounce.is_armed()
            && self.session_override.is_none()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let now = Instant::now();
        SessionSnapshot {
            key: self.key.clone(),
            state: self.run_state(),
            run_id: self.active.as_ref().map(|h| h.run_id.clone()),
            run_elapsed_ms: self
                .active
                .as_ref()
                .map(|h| now.saturating_duration_since(h.started_at).as_millis() as u64),
            queue_len: self.backlog.len(),
            queued_messages: self.backlog.iter().map(QueuedInput::message_count).sum(),
            policy: self.policy,
            session_override: self.session_override,
            debounce_remaining_ms: self
                .debounce
                .remaining(now)
                .map(|d| d.as_millis() as u64),
            age_ms: now.saturating_duration_since(self.created_at).as_millis() as u64,
        }
    }
}

/// Owned view of one session for operator tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub key: String,
    pub state: RunState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_elapsed_ms: Option<u64>,
    /// Backlog entries (a condensed placeholder counts once).
    pub queue_len: usize,
    /// Original messages represented by the backlog.
    pub queued_messages: usize,
    pub policy: EffectivePolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_override: Option<PolicyOverride>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debounce_remaining_ms: Option<u64>,
    pub age_ms: u64,
}

#[derive(Debug, Default)]
pub(crate) struct SessionRegistry {
    sessions: HashMap<String, Session>,
    index: RunIndex,
    next_seq: u64,
}

impl SessionRegistry {
    /// Look up `key`, creating it with `base` if absent. The flag reports
    /// whether the session was created.
    pub fn get_or_create(&mut self, key: &str, base: EffectivePolicy) -> (&mut Session, bool) {
        let mut created = false;
        let session = self.sessions.entry(key.to_string()).or_insert_with(|| {
            created = true;
            Session::new(key.to_string(), base)
        });
        (session, created)
    }

    pub fn get(&self, key: &str) -> Option<&Session> {
        self.sessions.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Session> {
        self.sessions.get_mut(key)
    }

    /// Drop a session, cancelling its run and timer.
    pub fn remove(&mut self, key: &str) -> Option<Session> {
        let mut session = self.sessions.remove(key)?;
        if let Some(handle) = session.active.take() {
            self.index.unregister(&handle.run_id);
            handle.abort();
        }
        session.debounce.cancel();
        Some(session)
    }

    /// Session key owning `run_id`.
    pub fn find_by_run_id(&self, run_id: &str) -> Option<&str> {
        self.index.lookup(run_id)
    }

    /// Install `handle` as the session's active run and index it.
    ///
    /// Callers check the slot is empty first.
    pub fn attach_run(&mut self, key: &str, handle: RunHandle) {
        if let Some(session) = self.sessions.get_mut(key) {
            debug_assert!(session.active.is_none(), "second active run for {key}");
            self.index.register(&handle.run_id, key);
            session.active = Some(handle);
        }
    }

    /// Remove the run from its session and the index in one step. A run
    /// that no longer owns the slot (session removed or replaced) only
    /// loses its index entry.
    pub fn detach_run(&mut self, key: &str, run_id: &str) -> Option<RunHandle> {
        self.index.unregister(run_id);
        let session = self.sessions.get_mut(key)?;
        if session.active.as_ref().is_some_and(|h| h.run_id == run_id) {
            session.active.take()
        } else {
            None
        }
    }

    pub fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Forget `key` if nothing references it.
    pub fn prune(&mut self, key: &str) -> bool {
        if self.sessions.get(key).is_some_and(Session::is_disposable) {
            self.sessions.remove(key);
            true
        } else {
            false
        }
    }

    /// Cancel and drop everything. Returns how many sessions were removed.
    pub fn clear(&mut self) -> usize {
        let count = self.sessions.len();
        for (_, mut session) in self.sessions.drain() {
            if let Some(handle) = session.active.take() {
                handle.abort();
            }
            session.debounce.cancel();
        }
        self.index.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn active_runs(&self) -> usize {
        self.index.len()
    }

    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut out: Vec<_> = self.sessions.values().map(Session::snapshot).collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }
}

#[cfg(test)]
mod tests {
    use {super::*, parley_config::MessageQueueMode};

    #[test]
    fn attach_and_detach_keep_index_in_step() {
        let mut reg = SessionRegistry::default();
        let (_, created) = reg.get_or_create("s1", EffectivePolicy::default());
        assert!(created);
        let (_, created) = reg.get_or_create("s1", EffectivePolicy::default());
        assert!(!created);

        reg.attach_run("s1", RunHandle::new("r1".into()));
        assert_eq!(reg.find_by_run_id("r1"), Some("s1"));
        assert_eq!(reg.get("s1").map(Session::run_state), Some(RunState::Running));

        // A stale id never detaches the current run.
        assert!(reg.detach_run("s1", "r0").is_none());
        assert!(reg.detach_run("s1", "r1").is_some());
        assert_eq!(reg.find_by_run_id("r1"), None);
        assert_eq!(reg.active_runs(), 0);
    }

    #[test]
    fn remove_cancels_active_run() {
        let mut reg = SessionRegistry::default();
        reg.get_or_create("s1", EffectivePolicy::default());
        let handle = RunHandle::new("r1".into());
        let token = handle.cancel.clone();
        reg.attach_run("s1", handle);

        assert!(reg.remove("s1").is_some());
        assert!(token.is_cancelled());
        assert_eq!(reg.find_by_run_id("r1"), None);
        assert!(reg.remove("s1").is_none());
    }

    #[test]
    fn prune_spares_sessions_with_override() {
        let mut reg = SessionRegistry::default();
        let (session, _) = reg.get_or_create("s1", EffectivePolicy::default());
        session.session_override = Some(PolicyOverride {
            mode: Some(MessageQueueMode::Collect),
            ..Default::default()
        });
        assert!(!reg.prune("s1"));
        if let Some(session) = reg.get_mut("s1") {
            session.session_override = None;
        }
        assert!(reg.prune("s1"));
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn snapshots_are_sorted() {
        let mut reg = SessionRegistry::default();
        reg.get_or_create("b", EffectivePolicy::default());
        reg.get_or_create("a", EffectivePolicy::default());
        let keys: Vec<_> = reg.snapshots().into_iter().map(|s| s.key).collect();
        assert_eq!(keys, ["a", "b"]);
    }
}
