//! Declarative node tree and the component trait
//!
//! A [`Node`] tree is rebuilt from scratch on every render pass; nothing in
//! it is persisted. Interactive variants carry an element id that survives
//! into the render output and is matched against incoming callback events.

use crate::render::{EventContext, RenderContext, RenderResult, Signal};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Callback invoked when the element it is attached to is triggered.
///
/// Handlers run synchronously between the two passes of an event cycle.
/// Returning `Redirect` or `Skip` from a handler is a usage error; redirect
/// decisions belong in the render body.
pub type Handler = Arc<dyn Fn(&mut EventContext) -> Result<(), Signal> + Send + Sync>;

/// An author-defined component with an asynchronous render body.
#[async_trait]
pub trait Component: Send + Sync {
    async fn render(&self, ctx: &mut RenderContext<'_>) -> RenderResult<Node>;
}

/// A layout wrapping a route's content.
///
/// The layout decides where the (not yet evaluated) content node goes in its
/// own tree. State read inside the layout body is scoped to [`Layout::key`],
/// which is the mechanism for sharing entries across the routes the layout
/// covers.
#[async_trait]
pub trait Layout: Send + Sync {
    /// Stable state scope for this layout.
    fn key(&self) -> &str;

    async fn render(&self, ctx: &mut RenderContext<'_>, content: Node) -> RenderResult<Node>;
}

/// Fallback invoked by an error boundary with the captured fault.
pub type FallbackFn = Arc<dyn Fn(&crate::error::RenderFault) -> Node + Send + Sync>;

/// A button with an element id, a label, and an optional press handler.
#[derive(Clone)]
pub struct ButtonNode {
    pub id: String,
    pub label: String,
    pub on_press: Option<Handler>,
}

impl ButtonNode {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            on_press: None,
        }
    }

    pub fn on_press(
        mut self,
        handler: impl Fn(&mut EventContext) -> Result<(), Signal> + Send + Sync + 'static,
    ) -> Self {
        self.on_press = Some(Arc::new(handler));
        self
    }
}

impl fmt::Debug for ButtonNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ButtonNode")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("has_handler", &self.on_press.is_some())
            .finish()
    }
}

/// An author-defined component placed in the tree.
#[derive(Clone)]
pub struct ComponentNode {
    pub body: Arc<dyn Component>,
    /// Author-asserted side-effect freedom. Only memoized components are
    /// eligible for first-pass reuse on event re-renders.
    pub memo: bool,
    /// State scope override; `None` inherits the enclosing scope.
    pub scope: Option<String>,
}

/// The closed set of node types the engine evaluates.
#[derive(Clone, Default)]
pub enum Node {
    /// Renders nothing. Rendering an entirely empty tree deletes the
    /// conversation's active message.
    #[default]
    Empty,
    Text(String),
    Header(String),
    Container(Vec<Node>),
    Button(ButtonNode),
    /// Rows of buttons attached to the message.
    Menu(Vec<Vec<ButtonNode>>),
    /// Declares a slash command surfaced by the platform menu.
    Command { command: String, description: String },
    Component(ComponentNode),
    ErrorBoundary {
        child: Box<Node>,
        fallback: FallbackFn,
    },
}

impl Node {
    pub fn text(text: impl Into<String>) -> Self {
        Node::Text(text.into())
    }

    pub fn header(text: impl Into<String>) -> Self {
        Node::Header(text.into())
    }

    pub fn container(children: impl IntoIterator<Item = Node>) -> Self {
        Node::Container(children.into_iter().collect())
    }

    pub fn button(button: ButtonNode) -> Self {
        Node::Button(button)
    }

    pub fn menu(rows: impl IntoIterator<Item = Vec<ButtonNode>>) -> Self {
        Node::Menu(rows.into_iter().collect())
    }

    pub fn command(command: impl Into<String>, description: impl Into<String>) -> Self {
        Node::Command {
            command: command.into(),
            description: description.into(),
        }
    }

    /// Place a component, inheriting the enclosing state scope.
    pub fn component(body: Arc<dyn Component>) -> Self {
        Node::Component(ComponentNode {
            body,
            memo: false,
            scope: None,
        })
    }

    /// Place a component the author asserts to be side-effect-free.
    ///
    /// On an event-triggered re-render, memoized subtrees off the path to
    /// the triggered element reuse their first-pass output.
    pub fn memo(body: Arc<dyn Component>) -> Self {
        Node::Component(ComponentNode {
            body,
            memo: true,
            scope: None,
        })
    }

    /// Place a component under an explicit state scope.
    pub fn scoped(body: Arc<dyn Component>, scope: impl Into<String>) -> Self {
        Node::Component(ComponentNode {
            body,
            memo: false,
            scope: Some(scope.into()),
        })
    }

    pub fn boundary(
        child: Node,
        fallback: impl Fn(&crate::error::RenderFault) -> Node + Send + Sync + 'static,
    ) -> Self {
        Node::ErrorBoundary {
            child: Box::new(child),
            fallback: Arc::new(fallback),
        }
    }

    /// Generated element id for buttons that never receive events directly
    /// (e.g. purely navigational rows built from route metadata).
    pub fn auto_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Empty => write!(f, "Empty"),
            Node::Text(t) => f.debug_tuple("Text").field(t).finish(),
            Node::Header(t) => f.debug_tuple("Header").field(t).finish(),
            Node::Container(c) => f.debug_tuple("Container").field(&c.len()).finish(),
            Node::Button(b) => b.fmt(f),
            Node::Menu(rows) => f.debug_tuple("Menu").field(&rows.len()).finish(),
            Node::Command { command, .. } => f.debug_tuple("Command").field(command).finish(),
            Node::Component(c) => f
                .debug_struct("Component")
                .field("memo", &c.memo)
                .field("scope", &c.scope)
                .finish(),
            Node::ErrorBoundary { .. } => write!(f, "ErrorBoundary"),
        }
    }
}

/// A component implemented as a plain async-free closure over the context.
///
/// Convenient for small pages and for tests; anything stateful enough to
/// need its own struct should implement [`Component`] directly.
pub struct FnComponent<F>(pub F);

#[async_trait]
impl<F> Component for FnComponent<F>
where
    F: Fn(&mut RenderContext<'_>) -> RenderResult<Node> + Send + Sync,
{
    async fn render(&self, ctx: &mut RenderContext<'_>) -> RenderResult<Node> {
        (self.0)(ctx)
    }
}

/// Wrap a closure as a boxed component reference.
pub fn from_fn<F>(f: F) -> Arc<dyn Component>
where
    F: Fn(&mut RenderContext<'_>) -> RenderResult<Node> + Send + Sync + 'static,
{
    Arc::new(FnComponent(f))
}
