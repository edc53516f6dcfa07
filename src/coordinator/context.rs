//! Per-conversation committed state
//!
//! The context document is the conversation's durable anchor: current
//! route, last committed output, active message, counters. It is stored as
//! one JSON document under the reserved engine scope and replaced
//! wholesale at commit, so it is never partially written.

use crate::adapter::MessageId;
use crate::error::StorageError;
use crate::render::output::RenderOutput;
use crate::storage::{StateBridge, ENGINE_SCOPE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const CONTEXT_NAME: &str = "context";

/// A message that is no longer the conversation's active message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetiredMessage {
    pub message: MessageId,
    /// Whether the message still responds to interactive events.
    pub interactive: bool,
}

/// Committed state of one conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationContext {
    pub conversation: String,
    /// Always a table route or a reserved route once set.
    pub current_route: Option<String>,
    #[serde(default)]
    pub current_params: HashMap<String, String>,
    /// Output committed for the active message.
    pub committed: Option<RenderOutput>,
    pub active_message: Option<MessageId>,
    /// Monotonic update counter; bumps once per committed cycle.
    #[serde(default)]
    pub update_seq: u64,
    /// Navigation history stack (most recent last).
    #[serde(default)]
    pub history: Vec<String>,
    #[serde(default)]
    pub retired: Vec<RetiredMessage>,
}

impl ConversationContext {
    pub fn new(conversation: impl Into<String>) -> Self {
        Self {
            conversation: conversation.into(),
            ..Self::default()
        }
    }

    /// Load the committed context, or a fresh one for a conversation that
    /// has never rendered.
    pub async fn load(bridge: &StateBridge) -> Result<Self, StorageError> {
        match bridge.load_raw(ENGINE_SCOPE, CONTEXT_NAME).await? {
            Some(raw) => Ok(serde_json::from_value(raw)?),
            None => Ok(Self::new(bridge.conversation())),
        }
    }

    /// Persist the full document. Atomic from the engine's point of view:
    /// a single `set` against the backing store.
    pub async fn save(&self, bridge: &StateBridge) -> Result<(), StorageError> {
        bridge
            .save_raw(ENGINE_SCOPE, CONTEXT_NAME, serde_json::to_value(self)?)
            .await
    }

    /// True when an event aimed at `message` must be dropped.
    pub fn is_retired_inactive(&self, message: &MessageId) -> bool {
        self.retired
            .iter()
            .any(|r| &r.message == message && !r.interactive)
    }

    /// Move the active message (if any) to the retired list.
    pub fn retire_active(&mut self, keep_interactive: bool) {
        if let Some(message) = self.active_message.take() {
            self.retired.push(RetiredMessage {
                message,
                interactive: keep_interactive,
            });
        }
    }

    /// Push a route onto the history stack, collapsing consecutive
    /// duplicates.
    pub fn push_history(&mut self, route: String) {
        if self.history.last() != Some(&route) {
            self.history.push(route);
        }
    }

    /// Pop the most recent history entry (back navigation).
    pub fn pop_history(&mut self) -> Option<String> {
        self.history.pop()
    }
}
