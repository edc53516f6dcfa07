//! Mock collaborators for testing
//!
//! These enable end-to-end cycle tests without a real platform or backend.

use crate::adapter::{ChatAdapter, MessageId};
use crate::error::{AdapterError, StorageError};
use crate::render::output::RenderOutput;
use crate::storage::KeyValueStore;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// One recorded adapter call, with the content flattened to text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterCall {
    Send {
        conversation: String,
        message: MessageId,
        text: String,
    },
    Edit {
        conversation: String,
        message: MessageId,
        text: String,
    },
    Delete {
        conversation: String,
        message: MessageId,
    },
}

/// Adapter that records every call and mints sequential message ids.
/// Failures can be queued to exercise dispatch error paths.
#[derive(Default)]
pub struct RecordingAdapter {
    counter: AtomicUsize,
    calls: Mutex<Vec<AdapterCall>>,
    failures: Mutex<VecDeque<AdapterError>>,
}

impl RecordingAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error for the next adapter call.
    pub fn queue_failure(&self, error: AdapterError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn calls(&self) -> Vec<AdapterCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Text of every send/edit, in call order.
    pub fn texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                AdapterCall::Send { text, .. } | AdapterCall::Edit { text, .. } => Some(text),
                AdapterCall::Delete { .. } => None,
            })
            .collect()
    }

    pub fn last_text(&self) -> Option<String> {
        self.texts().pop()
    }

    fn take_failure(&self) -> Option<AdapterError> {
        self.failures.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl ChatAdapter for RecordingAdapter {
    async fn send_message(
        &self,
        conversation: &str,
        content: &RenderOutput,
    ) -> Result<MessageId, AdapterError> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let message = MessageId::new(format!("m{n}"));
        self.calls.lock().unwrap().push(AdapterCall::Send {
            conversation: conversation.to_string(),
            message: message.clone(),
            text: content.plain_text(),
        });
        Ok(message)
    }

    async fn edit_message(
        &self,
        conversation: &str,
        message: &MessageId,
        content: &RenderOutput,
    ) -> Result<(), AdapterError> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        self.calls.lock().unwrap().push(AdapterCall::Edit {
            conversation: conversation.to_string(),
            message: message.clone(),
            text: content.plain_text(),
        });
        Ok(())
    }

    async fn delete_message(
        &self,
        conversation: &str,
        message: &MessageId,
    ) -> Result<(), AdapterError> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        self.calls.lock().unwrap().push(AdapterCall::Delete {
            conversation: conversation.to_string(),
            message: message.clone(),
        });
        Ok(())
    }
}

/// Store whose every operation fails; for abort-path tests.
#[derive(Default)]
pub struct FailingStore;

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<Value>, StorageError> {
        Err(StorageError::backend("backend unavailable"))
    }

    async fn set(&self, _key: &str, _value: Value) -> Result<(), StorageError> {
        Err(StorageError::backend("backend unavailable"))
    }
}
