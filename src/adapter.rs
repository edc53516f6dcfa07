//! Platform adapter seam
//!
//! The adapter owns the wire format and rate-limit policy of the chat
//! platform; the engine hands it platform-agnostic output trees and remains
//! ignorant of markup. Incoming platform events arrive normalized as
//! [`Update`]s.

use crate::error::AdapterError;
use crate::render::output::RenderOutput;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Platform identifier of one sent message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Gateway to the chat platform.
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    /// Send a new message, returning its platform id.
    async fn send_message(
        &self,
        conversation: &str,
        content: &RenderOutput,
    ) -> Result<MessageId, AdapterError>;

    /// Edit a previously sent message in place.
    async fn edit_message(
        &self,
        conversation: &str,
        message: &MessageId,
        content: &RenderOutput,
    ) -> Result<(), AdapterError>;

    /// Delete a previously sent message.
    async fn delete_message(
        &self,
        conversation: &str,
        message: &MessageId,
    ) -> Result<(), AdapterError>;
}

#[async_trait]
impl<T: ChatAdapter + ?Sized> ChatAdapter for Arc<T> {
    async fn send_message(
        &self,
        conversation: &str,
        content: &RenderOutput,
    ) -> Result<MessageId, AdapterError> {
        (**self).send_message(conversation, content).await
    }

    async fn edit_message(
        &self,
        conversation: &str,
        message: &MessageId,
        content: &RenderOutput,
    ) -> Result<(), AdapterError> {
        (**self).edit_message(conversation, message, content).await
    }

    async fn delete_message(
        &self,
        conversation: &str,
        message: &MessageId,
    ) -> Result<(), AdapterError> {
        (**self).delete_message(conversation, message).await
    }
}

/// A normalized incoming platform event.
#[derive(Debug, Clone)]
pub struct Update {
    pub conversation: String,
    /// Message text, when the update is a typed message or command.
    pub text: Option<String>,
    /// Element id carried by an interactive-element event.
    pub callback: Option<String>,
    /// Message the event is attached to (the pressed button's message).
    pub message: Option<MessageId>,
}

impl Update {
    /// A typed message or slash command.
    pub fn text(conversation: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            conversation: conversation.into(),
            text: Some(text.into()),
            callback: None,
            message: None,
        }
    }

    /// An interactive-element event (button press).
    pub fn callback(
        conversation: impl Into<String>,
        element: impl Into<String>,
        message: Option<MessageId>,
    ) -> Self {
        Self {
            conversation: conversation.into(),
            text: None,
            callback: Some(element.into()),
            message,
        }
    }

    pub fn is_callback(&self) -> bool {
        self.callback.is_some()
    }
}
