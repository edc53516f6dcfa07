//! Platform-agnostic render output
//!
//! Evaluation produces an [`OutputNode`] tree that is immutable once built
//! and replaced atomically on commit. Equality for diffing purposes is the
//! canonical serialization: a depth-first walk of node tag, text content,
//! and interactive element ids. Length-prefixing every string keeps the
//! form unambiguous regardless of what the strings contain.

use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// A rendered button: element id plus label, no behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputButton {
    pub id: String,
    pub label: String,
}

/// One node of the committed output tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputNode {
    Empty,
    Text { text: String },
    Header { text: String },
    Container { children: Vec<OutputNode> },
    Button { button: OutputButton },
    Menu { rows: Vec<Vec<OutputButton>> },
    Command { command: String, description: String },
}

impl OutputNode {
    fn write_canonical(&self, out: &mut String) {
        match self {
            OutputNode::Empty => out.push('e'),
            OutputNode::Text { text } => {
                let _ = write!(out, "t{}:{}", text.len(), text);
            }
            OutputNode::Header { text } => {
                let _ = write!(out, "h{}:{}", text.len(), text);
            }
            OutputNode::Container { children } => {
                out.push('(');
                for child in children {
                    child.write_canonical(out);
                }
                out.push(')');
            }
            OutputNode::Button { button } => write_button(out, button),
            OutputNode::Menu { rows } => {
                out.push('[');
                for row in rows {
                    out.push('|');
                    for button in row {
                        write_button(out, button);
                    }
                }
                out.push(']');
            }
            OutputNode::Command {
                command,
                description,
            } => {
                let _ = write!(
                    out,
                    "c{}:{}{}:{}",
                    command.len(),
                    command,
                    description.len(),
                    description
                );
            }
        }
    }

    fn visit_text(&self, out: &mut Vec<String>) {
        match self {
            OutputNode::Text { text } | OutputNode::Header { text } => out.push(text.clone()),
            OutputNode::Container { children } => {
                for child in children {
                    child.visit_text(out);
                }
            }
            _ => {}
        }
    }

    fn visit_ids(&self, out: &mut Vec<String>) {
        match self {
            OutputNode::Button { button } => out.push(button.id.clone()),
            OutputNode::Menu { rows } => {
                for row in rows {
                    for button in row {
                        out.push(button.id.clone());
                    }
                }
            }
            OutputNode::Container { children } => {
                for child in children {
                    child.visit_ids(out);
                }
            }
            _ => {}
        }
    }

    /// True when the node renders no content at all.
    pub fn is_empty(&self) -> bool {
        match self {
            OutputNode::Empty => true,
            OutputNode::Container { children } => children.iter().all(OutputNode::is_empty),
            _ => false,
        }
    }
}

fn write_button(out: &mut String, button: &OutputButton) {
    let _ = write!(
        out,
        "b{}:{}{}:{}",
        button.id.len(),
        button.id,
        button.label.len(),
        button.label
    );
}

/// The full output of one evaluation, replaced atomically on commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOutput {
    pub root: OutputNode,
}

impl RenderOutput {
    pub fn new(root: OutputNode) -> Self {
        Self { root }
    }

    /// Canonical depth-first serialization used for equality in the diff.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        self.root.write_canonical(&mut out);
        out
    }

    /// All text content in document order, one entry per text node.
    pub fn text_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        self.root.visit_text(&mut lines);
        lines
    }

    /// Text content joined with newlines; convenient in tests and adapters.
    pub fn plain_text(&self) -> String {
        self.text_lines().join("\n")
    }

    /// Interactive element ids in document order.
    pub fn element_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        self.root.visit_ids(&mut ids);
        ids
    }

    pub fn contains_element(&self, id: &str) -> bool {
        self.element_ids().iter().any(|e| e == id)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}
