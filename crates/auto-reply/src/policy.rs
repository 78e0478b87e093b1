//! Effective queue policy resolution.
//!
//! Layering, most specific first: inline directive > session override >
//! per-channel default > global default.

use std::time::Duration;

use {
    parley_config::{DropPolicy, MessageQueueMode, QueueConfig},
    serde::{Deserialize, Serialize},
};

/// Resolved queue settings for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectivePolicy {
    pub mode: MessageQueueMode,
    pub debounce_ms: u64,
    /// Age cap for a debounce window, 0 = unbounded.
    pub max_wait_ms: u64,
    /// Always at least 1.
    pub cap: usize,
    pub drop: DropPolicy,
}

impl Default for EffectivePolicy {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default(), None)
    }
}

impl EffectivePolicy {
    /// Global defaults, with the per-channel mode applied when one is configured.
    #[must_use]
    pub fn from_config(config: &QueueConfig, channel: Option<&str>) -> Self {
        let mode = channel
            .and_then(|c| config.by_channel.get(c))
            .copied()
            .unwrap_or(config.mode);
        Self {
            mode,
            debounce_ms: config.debounce_ms,
            max_wait_ms: config.max_wait_ms,
            cap: config.cap.max(1),
            drop: config.drop,
        }
    }

    /// Layer a sparse override on top, returning the result.
    #[must_use]
    pub fn with(mut self, over: &PolicyOverride) -> Self {
        if let Some(mode) = over.mode {
            self.mode = mode;
        }
        if let Some(ms) = over.debounce_ms {
            self.debounce_ms = ms;
        }
        if let Some(ms) = over.max_wait_ms {
            self.max_wait_ms = ms;
        }
        if let Some(cap) = over.cap {
            self.cap = cap.max(1);
        }
        if let Some(drop) = over.drop {
            self.drop = drop;
        }
        self
    }

    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub fn max_wait(&self) -> Option<Duration> {
        (self.max_wait_ms > 0).then(|| Duration::from_millis(self.max_wait_ms))
    }
}

/// Sparse policy override. `None` fields fall through to the next layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicyOverride {
    pub mode: Option<MessageQueueMode>,
    pub debounce_ms: Option<u64>,
    pub max_wait_ms: Option<u64>,
    pub cap: Option<usize>,
    pub drop: Option<DropPolicy>,
}

impl PolicyOverride {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge `other` into `self`; fields set in `other` win.
    pub fn merge(&mut self, other: &PolicyOverride) {
        if other.mode.is_some() {
            self.mode = other.mode;
        }
        if other.debounce_ms.is_some() {
            self.debounce_ms = other.debounce_ms;
        }
        if other.max_wait_ms.is_some() {
            self.max_wait_ms = other.max_wait_ms;
        }
        if other.cap.is_some() {
            self.cap = other.cap;
        }
        if other.drop.is_some() {
            self.drop = other.drop;
        }
    }
}

/// Resolve the policy that applies to one enqueue.
#[must_use]
pub fn resolve(
    base: EffectivePolicy,
    session: Option<&PolicyOverride>,
    inline: Option<&PolicyOverride>,
) -> EffectivePolicy {
    let mut policy = base;
    if let Some(session) = session {
        policy = policy.with(session);
    }
    if let Some(inline) = inline {
        policy = policy.with(inline);
    }
    policy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_default_beats_global() {
        let mut config = QueueConfig::default();
        config
            .by_channel
            .insert("telegram".into(), MessageQueueMode::Collect);
        assert_eq!(
            EffectivePolicy::from_config(&config, Some("telegram")).mode,
            MessageQueueMode::Collect
        );
        assert_eq!(
            EffectivePolicy::from_config(&config, Some("discord")).mode,
            MessageQueueMode::Followup
        );
    }

    #[test]
    fn inline_beats_session_beats_base() {
        let base = EffectivePolicy::default();
        let session = PolicyOverride {
            mode: Some(MessageQueueMode::Collect),
            cap: Some(5),
            ..Default::default()
        };
        let inline = PolicyOverride {
            mode: Some(MessageQueueMode::Interrupt),
            ..Default::default()
        };
        let policy = resolve(base, Some(&session), Some(&inline));
        assert_eq!(policy.mode, MessageQueueMode::Interrupt);
        assert_eq!(policy.cap, 5);
        assert_eq!(policy.drop, base.drop);
    }

    #[test]
    fn cap_never_below_one() {
        let policy = EffectivePolicy::default().with(&PolicyOverride {
            cap: Some(0),
            ..Default::default()
        });
        assert_eq!(policy.cap, 1);
    }

    #[test]
    fn merge_keeps_unset_fields() {
        let mut over = PolicyOverride {
            mode: Some(MessageQueueMode::Steer),
            debounce_ms: Some(10),
            ..Default::default()
        };
        over.merge(&PolicyOverride {
            debounce_ms: Some(99),
            ..Default::default()
        });
        assert_eq!(over.mode, Some(MessageQueueMode::Steer));
        assert_eq!(over.debounce_ms, Some(99));
        assert!(!over.is_empty());
        assert!(PolicyOverride::default().is_empty());
    }
}
