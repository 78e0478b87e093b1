//! Ingestion entry point for channel adapters: directive normalization, then
//! the queue.

use std::sync::Arc;

use {
    parley_common::types::InboundMessage,
    serde::Serialize,
    tokio::time::Instant,
    tracing::{debug, info},
};

#[cfg(feature = "metrics")]
use parley_metrics::{auto_reply as auto_reply_metrics, counter, histogram, labels};

use crate::{
    coordinator::{Enqueued, RunCoordinator},
    directives::parse_directives,
    policy::EffectivePolicy,
};

/// What ingestion did with a message.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Ingested {
    /// The cleaned body went through the queue.
    Queued(Enqueued),
    /// A directive-only message changed the session override.
    PolicyUpdated { policy: EffectivePolicy },
    /// A bare `/queue`: nothing changed, current policy reported.
    PolicyStatus { policy: EffectivePolicy },
    /// Nothing to do (blank body).
    Ignored,
}

impl RunCoordinator {
    /// Ingest a message received now.
    pub async fn ingest(self: &Arc<Self>, msg: InboundMessage) -> Ingested {
        self.ingest_at(msg, Instant::now()).await
    }

    /// Ingest a message with an explicit receipt time.
    ///
    /// A message made only of a `/queue` directive updates the session-level
    /// override and is not queued. A directive inside ordinary text applies to
    /// that message only; `reset` still clears the session override first.
    pub async fn ingest_at(self: &Arc<Self>, msg: InboundMessage, received_at: Instant) -> Ingested {
        #[cfg(feature = "metrics")]
        let start = std::time::Instant::now();

        #[cfg(feature = "metrics")]
        let channel = msg.meta.channel.clone();

        #[cfg(feature = "metrics")]
        counter!(
            auto_reply_metrics::MESSAGES_RECEIVED_TOTAL,
            labels::CHANNEL => channel.clone()
        )
        .increment(1);

        debug!(
            session_key = %msg.session_key,
            channel = %msg.meta.channel,
            chat_type = ?msg.meta.chat_type,
            sender = msg.meta.sender_name.as_deref().unwrap_or("unknown"),
            "incoming message"
        );

        let parsed = parse_directives(&msg.body);
        if parsed.recognized {
            #[cfg(feature = "metrics")]
            counter!(
                auto_reply_metrics::DIRECTIVES_TOTAL,
                labels::KIND => directive_kind(&parsed)
            )
            .increment(1);
        }

        let channel_name = Some(msg.meta.channel.as_str()).filter(|c| !c.is_empty());
        let result = if parsed.is_directive_only() {
            if parsed.reset {
                self.clear_session_policy(&msg.session_key);
            }
            if parsed.overrides.is_empty() {
                let policy = self.standing_policy(&msg.session_key, channel_name);
                if parsed.reset {
                    Ingested::PolicyUpdated { policy }
                } else {
                    Ingested::PolicyStatus { policy }
                }
            } else {
                let policy =
                    self.update_session_policy(&msg.session_key, channel_name, parsed.overrides);
                Ingested::PolicyUpdated { policy }
            }
        } else if parsed.cleaned.trim().is_empty() {
            debug!(session_key = %msg.session_key, "blank message ignored");
            Ingested::Ignored
        } else {
            if parsed.reset {
                self.clear_session_policy(&msg.session_key);
            }
            let inline = (!parsed.overrides.is_empty()).then_some(parsed.overrides);
            let msg = InboundMessage {
                body: parsed.cleaned,
                ..msg
            };
            Ingested::Queued(self.enqueue(msg, inline, received_at).await)
        };

        if let Ingested::PolicyUpdated { policy } = &result {
            info!(mode = %policy.mode, cap = policy.cap, drop = %policy.drop, "queue directive applied");
        }

        #[cfg(feature = "metrics")]
        histogram!(
            auto_reply_metrics::PROCESSING_DURATION_SECONDS,
            labels::CHANNEL => channel
        )
        .record(start.elapsed().as_secs_f64());

        result
    }
}

#[cfg(feature = "metrics")]
fn directive_kind(parsed: &crate::directives::ParsedDirectives) -> &'static str {
    if parsed.reset {
        "reset"
    } else if parsed.overrides.is_empty() {
        "status"
    } else if parsed.is_directive_only() {
        "session"
    } else {
        "inline"
    }
}
