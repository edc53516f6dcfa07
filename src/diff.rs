//! Diff & patch engine
//!
//! Compares a cycle's output against the previously committed output and
//! emits the minimal message operations. Equality is the canonical
//! serialization of the two trees, so re-rendering unchanged content costs
//! zero adapter calls.

use crate::adapter::MessageId;
use crate::render::output::RenderOutput;
use serde::{Deserialize, Serialize};

/// Options recognized by the diff step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffOptions {
    /// Force a new message instead of editing the active one.
    pub new_message: bool,
    /// Push this navigation onto the conversation's history stack.
    pub add_to_history: bool,
    /// Whether a message that is no longer active keeps responding to
    /// interactive events.
    pub preserve_old_interactivity: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            new_message: false,
            add_to_history: true,
            preserve_old_interactivity: true,
        }
    }
}

impl DiffOptions {
    pub fn new_message(mut self, value: bool) -> Self {
        self.new_message = value;
        self
    }

    pub fn add_to_history(mut self, value: bool) -> Self {
        self.add_to_history = value;
        self
    }

    pub fn preserve_old_interactivity(mut self, value: bool) -> Self {
        self.preserve_old_interactivity = value;
        self
    }
}

/// One operation against the chat platform, in dispatch order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOp {
    Create {
        content: RenderOutput,
    },
    Edit {
        message: MessageId,
        content: RenderOutput,
    },
    Delete {
        message: MessageId,
    },
}

/// Compute the operations that reconcile the platform with `next`.
///
/// - no previous output / no active message / `new_message` → `Create`
/// - canonical equality → no operations (idempotent)
/// - anything else → `Edit` against the active message
/// - an entirely empty `next` deletes the active message
pub fn diff(
    previous: Option<&RenderOutput>,
    next: &RenderOutput,
    active_message: Option<&MessageId>,
    options: &DiffOptions,
) -> Vec<MessageOp> {
    if next.is_empty() {
        return match active_message {
            Some(message) => vec![MessageOp::Delete {
                message: message.clone(),
            }],
            None => Vec::new(),
        };
    }

    let Some(message) = active_message else {
        return vec![MessageOp::Create {
            content: next.clone(),
        }];
    };

    if options.new_message {
        return vec![MessageOp::Create {
            content: next.clone(),
        }];
    }

    let Some(previous) = previous else {
        return vec![MessageOp::Create {
            content: next.clone(),
        }];
    };

    if previous.canonical() == next.canonical() {
        Vec::new()
    } else {
        vec![MessageOp::Edit {
            message: message.clone(),
            content: next.clone(),
        }]
    }
}
