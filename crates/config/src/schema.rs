/// Config schema types (agent, chat queue, run coordination, metrics).
use std::{collections::HashMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub agent: AgentConfig,
    pub chat: ChatConfig,
    pub metrics: MetricsConfig,
}

/// Backing agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent id used when composing session keys.
    pub id: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { id: "main".into() }
    }
}

/// Chat configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// How to handle messages that arrive while an agent run is active.
    pub queue: QueueConfig,
    pub runs: RunsConfig,
}

/// Global queue defaults. Sessions and inline `/queue` directives layer on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub mode: MessageQueueMode,
    /// Quiet period before a `collect` batch is flushed.
    pub debounce_ms: u64,
    /// Upper bound on how long a `collect` window may slide (0 = unbounded).
    pub max_wait_ms: u64,
    /// Maximum backlog length. Must be at least 1.
    pub cap: usize,
    pub drop: DropPolicy,
    /// Per-channel mode defaults, keyed by channel type (e.g. `telegram`).
    pub by_channel: HashMap<String, MessageQueueMode>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            mode: MessageQueueMode::default(),
            debounce_ms: 1000,
            max_wait_ms: 0,
            cap: 20,
            drop: DropPolicy::default(),
            by_channel: HashMap::new(),
        }
    }
}

/// Run coordination settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunsConfig {
    /// Timeout used by `wait_for_end` callers that don't pass their own.
    pub wait_timeout_ms: u64,
    /// Forget sessions that are idle, empty and carry no override.
    pub prune_idle_sessions: bool,
}

impl Default for RunsConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 30_000,
            prune_idle_sessions: true,
        }
    }
}

/// Metrics export settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Extra labels attached to every exported metric.
    pub labels: HashMap<String, String>,
}

/// Behaviour when a message arrives during an active run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageQueueMode {
    /// Cancel the current run and start over with the newest input.
    Interrupt,
    /// Inject into the running turn when possible, otherwise queue.
    Steer,
    /// Queue each message; replay them one-by-one after the current run.
    #[default]
    Followup,
    /// Buffer messages; concatenate and process as a single message after a quiet period.
    Collect,
    /// Inject when possible, otherwise queue and replay the backlog as one batch.
    SteerBacklog,
}

impl MessageQueueMode {
    pub const ALL: &'static [MessageQueueMode] = &[
        Self::Interrupt,
        Self::Steer,
        Self::Followup,
        Self::Collect,
        Self::SteerBacklog,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interrupt => "interrupt",
            Self::Steer => "steer",
            Self::Followup => "followup",
            Self::Collect => "collect",
            Self::SteerBacklog => "steer-backlog",
        }
    }
}

impl fmt::Display for MessageQueueMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageQueueMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown queue mode: {s}"))
    }
}

/// Eviction rule applied when the backlog is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropPolicy {
    /// Evict the oldest queued entries.
    Old,
    /// Drop the incoming message.
    New,
    /// Condense the backlog into a single placeholder entry.
    #[default]
    Summarize,
}

impl DropPolicy {
    pub const ALL: &'static [DropPolicy] = &[Self::Old, Self::New, Self::Summarize];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Old => "old",
            Self::New => "new",
            Self::Summarize => "summarize",
        }
    }
}

impl fmt::Display for DropPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DropPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown drop policy: {s}"))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn queue_mode_serde_names() {
        let json = serde_json::to_string(&MessageQueueMode::SteerBacklog).unwrap();
        assert_eq!(json, "\"steer-backlog\"");
        let mode: MessageQueueMode = serde_json::from_str("\"collect\"").unwrap();
        assert_eq!(mode, MessageQueueMode::Collect);
    }

    #[test]
    fn queue_mode_from_str_is_canonical_only() {
        assert_eq!(
            "Interrupt".parse::<MessageQueueMode>().unwrap(),
            MessageQueueMode::Interrupt
        );
        assert!("coalesce".parse::<MessageQueueMode>().is_err());
    }

    #[test]
    fn defaults() {
        let cfg = ParleyConfig::default();
        assert_eq!(cfg.chat.queue.mode, MessageQueueMode::Followup);
        assert_eq!(cfg.chat.queue.drop, DropPolicy::Summarize);
        assert_eq!(cfg.chat.queue.cap, 20);
        assert_eq!(cfg.agent.id, "main");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: ParleyConfig = toml::from_str(
            r#"
            [chat.queue]
            mode = "collect"
            drop = "old"

            [chat.queue.by_channel]
            telegram = "interrupt"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.chat.queue.mode, MessageQueueMode::Collect);
        assert_eq!(cfg.chat.queue.drop, DropPolicy::Old);
        assert_eq!(cfg.chat.queue.debounce_ms, 1000);
        assert_eq!(
            cfg.chat.queue.by_channel.get("telegram"),
            Some(&MessageQueueMode::Interrupt)
        );
    }
}
