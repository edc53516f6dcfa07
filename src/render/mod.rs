//! Render engine
//!
//! Evaluates a [`Node`](crate::component::Node) tree depth-first into a
//! [`RenderOutput`]. Component bodies are asynchronous and fully resolved
//! before their produced subtrees are evaluated. Control flow — redirect,
//! skip, fault — travels as explicit result variants up the evaluation
//! chain; nothing unwinds.

mod context;
pub mod output;

pub use context::{DeferredUpdate, EventContext, RenderContext, StateHandle};

use crate::component::{ButtonNode, Handler, Node};
use crate::diff::DiffOptions;
use crate::error::{RenderFault, StorageError};
use futures::future::BoxFuture;
use output::{OutputButton, OutputNode, RenderOutput};
use std::collections::HashMap;

/// Control-flow signal raised during evaluation.
///
/// `Redirect`, `Skip`, and `Halt` are part of normal authoring; `Abort`
/// marks an infrastructure failure that no boundary may capture.
#[derive(Debug)]
pub enum Signal {
    /// Abandon this evaluation and start a cycle for another route.
    Redirect { path: String },
    /// Abandon this evaluation and restart the same route immediately.
    Skip,
    /// A component fault, capturable by the nearest error boundary.
    Halt(RenderFault),
    /// Storage failure; the cycle aborts with no commit.
    Abort(StorageError),
}

impl Signal {
    pub fn redirect(path: impl Into<String>) -> Self {
        Signal::Redirect { path: path.into() }
    }

    pub fn halt(code: i32, message: impl Into<String>) -> Self {
        Signal::Halt(RenderFault::new(code, message))
    }
}

impl From<StorageError> for Signal {
    fn from(err: StorageError) -> Self {
        Signal::Abort(err)
    }
}

/// Result of a render body or evaluation step.
pub type RenderResult<T> = Result<T, Signal>;

/// Abandon the current evaluation and navigate to `path`.
pub fn redirect<T>(path: impl Into<String>) -> RenderResult<T> {
    Err(Signal::redirect(path))
}

/// Abandon the current evaluation and restart the same route.
pub fn skip<T>() -> RenderResult<T> {
    Err(Signal::Skip)
}

/// Fail the current subtree with a fault for the nearest boundary.
pub fn halt<T>(code: i32, message: impl Into<String>) -> RenderResult<T> {
    Err(Signal::halt(code, message))
}

/// An interactive element bound during evaluation: its id, the state scope
/// in effect where it appeared, and its handler.
pub struct HandlerBinding {
    pub id: String,
    pub scope: String,
    pub handler: Handler,
}

/// The result of one full evaluation pass.
pub struct Evaluation {
    pub output: RenderOutput,
    pub handlers: Vec<HandlerBinding>,
    pub options: DiffOptions,
    /// Output subtrees of memoized components, keyed by tree position.
    pub(crate) memo: HashMap<String, OutputNode>,
    /// Tree position of the element that triggered this cycle, if found.
    pub(crate) trigger_path: Option<String>,
}

impl Evaluation {
    /// Find the binding for a triggered element id.
    pub fn handler_for(&self, element: &str) -> Option<&HandlerBinding> {
        self.handlers.iter().find(|b| b.id == element)
    }
}

#[derive(Default)]
struct Collector {
    handlers: Vec<HandlerBinding>,
    memo: HashMap<String, OutputNode>,
    trigger_path: Option<String>,
}

/// Evaluate a tree from scratch.
pub async fn evaluate(root: &Node, ctx: &mut RenderContext<'_>) -> RenderResult<Evaluation> {
    evaluate_with_reuse(root, ctx, None).await
}

/// Evaluate a tree, reusing memoized subtrees from a prior pass.
///
/// Only components marked side-effect-free by their author are eligible,
/// and only when they sit off the path from the root to the element that
/// triggered the prior pass. Everything else is fully re-evaluated.
pub async fn evaluate_with_reuse(
    root: &Node,
    ctx: &mut RenderContext<'_>,
    prior: Option<&Evaluation>,
) -> RenderResult<Evaluation> {
    let mut collector = Collector::default();
    let output = eval_node(root, ctx, &mut collector, prior, String::new()).await?;
    Ok(Evaluation {
        output: RenderOutput::new(output),
        handlers: collector.handlers,
        options: ctx.options().clone(),
        memo: collector.memo,
        trigger_path: collector.trigger_path,
    })
}

/// True when `descendant` is at or below `ancestor` in the position scheme.
fn is_on_path(ancestor: &str, descendant: &str) -> bool {
    descendant == ancestor || descendant.starts_with(&format!("{ancestor}/"))
}

fn register_button(
    button: &ButtonNode,
    ctx: &RenderContext<'_>,
    collector: &mut Collector,
    path: &str,
) -> OutputButton {
    if let Some(handler) = &button.on_press {
        collector.handlers.push(HandlerBinding {
            id: button.id.clone(),
            scope: ctx.scope().to_string(),
            handler: handler.clone(),
        });
    }
    if ctx.trigger() == Some(button.id.as_str()) {
        collector.trigger_path = Some(path.to_string());
    }
    OutputButton {
        id: button.id.clone(),
        label: button.label.clone(),
    }
}

fn eval_node<'a, 'b>(
    node: &'a Node,
    ctx: &'a mut RenderContext<'b>,
    collector: &'a mut Collector,
    prior: Option<&'a Evaluation>,
    path: String,
) -> BoxFuture<'a, RenderResult<OutputNode>>
where
    'b: 'a,
{
    Box::pin(async move {
        match node {
            Node::Empty => Ok(OutputNode::Empty),

            Node::Text(text) => Ok(OutputNode::Text { text: text.clone() }),

            Node::Header(text) => Ok(OutputNode::Header { text: text.clone() }),

            Node::Container(children) => {
                let mut out = Vec::with_capacity(children.len());
                for (i, child) in children.iter().enumerate() {
                    out.push(eval_node(child, ctx, collector, prior, format!("{path}/{i}")).await?);
                }
                Ok(OutputNode::Container { children: out })
            }

            Node::Button(button) => {
                let rendered = register_button(button, ctx, collector, &path);
                Ok(OutputNode::Button { button: rendered })
            }

            Node::Menu(rows) => {
                let mut rendered = Vec::with_capacity(rows.len());
                for row in rows {
                    let mut rendered_row = Vec::with_capacity(row.len());
                    for button in row {
                        rendered_row.push(register_button(button, ctx, collector, &path));
                    }
                    rendered.push(rendered_row);
                }
                Ok(OutputNode::Menu { rows: rendered })
            }

            Node::Command {
                command,
                description,
            } => Ok(OutputNode::Command {
                command: command.clone(),
                description: description.clone(),
            }),

            Node::Component(component) => {
                if component.memo {
                    if let Some(prev) = prior {
                        let on_trigger_path = prev
                            .trigger_path
                            .as_deref()
                            .is_some_and(|t| is_on_path(&path, t));
                        if !on_trigger_path {
                            if let Some(cached) = prev.memo.get(&path) {
                                collector.memo.insert(path.clone(), cached.clone());
                                return Ok(cached.clone());
                            }
                        }
                    }
                }

                let saved_scope = component
                    .scope
                    .as_ref()
                    .map(|scope| ctx.swap_scope(scope.clone()));

                let body = component.body.render(ctx).await;
                let produced = match body {
                    Ok(node) => node,
                    Err(signal) => {
                        if let Some(scope) = saved_scope {
                            ctx.swap_scope(scope);
                        }
                        return Err(signal);
                    }
                };

                let result =
                    eval_node(&produced, ctx, collector, prior, format!("{path}/c")).await;

                if let Some(scope) = saved_scope {
                    ctx.swap_scope(scope);
                }

                let out = result?;
                if component.memo {
                    collector.memo.insert(path, out.clone());
                }
                Ok(out)
            }

            Node::ErrorBoundary { child, fallback } => {
                match eval_node(child, ctx, collector, prior, format!("{path}/0")).await {
                    Ok(out) => Ok(out),
                    Err(Signal::Halt(fault)) => {
                        tracing::warn!(
                            conversation = %ctx.conversation(),
                            route = %ctx.path(),
                            code = fault.code,
                            "boundary captured fault: {}",
                            fault.message
                        );
                        let fallback_node = (fallback)(&fault);
                        eval_node(&fallback_node, ctx, collector, prior, format!("{path}/f")).await
                    }
                    Err(other) => Err(other),
                }
            }
        }
    })
}
