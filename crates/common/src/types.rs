//! Inbound message types shared between channel adapters and the run coordinator.

use serde::{Deserialize, Serialize};

/// Kind of conversation a message was received in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    #[default]
    Direct,
    Group,
    Channel,
}

/// Channel-side metadata carried alongside a message body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMeta {
    /// Channel type, e.g. `"telegram"` or `"discord"`.
    pub channel: String,
    pub account_id: String,
    /// Chat/peer id on the channel.
    pub chat_id: String,
    pub chat_type: ChatType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Platform message id, used to thread replies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl ChannelMeta {
    /// Build the stable session key for this conversation and agent.
    ///
    /// Format: `agent:<agent_id>:<channel>:<account_id>:<chat_type>:<chat_id>`.
    #[must_use]
    pub fn session_key(&self, agent_id: &str) -> String {
        let chat_type = match self.chat_type {
            ChatType::Direct => "dm",
            ChatType::Group => "group",
            ChatType::Channel => "channel",
        };
        format!(
            "agent:{agent_id}:{}:{}:{chat_type}:{}",
            self.channel, self.account_id, self.chat_id
        )
    }
}

/// A message delivered by a channel adapter, before directive parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub session_key: String,
    pub body: String,
    pub meta: ChannelMeta,
}

impl InboundMessage {
    pub fn new(session_key: impl Into<String>, body: impl Into<String>, meta: ChannelMeta) -> Self {
        Self {
            session_key: session_key.into(),
            body: body.into(),
            meta,
        }
    }
}
