//! Route resolution
//!
//! Maps an incoming path, slash command, or stored current route to a
//! component, its layout chain, and bound parameters. The table is built
//! once from the route compiler's ordered entries and shared read-only.

mod pattern;

pub use pattern::{normalize, PathPattern, PatternError};

use crate::component::{Component, ComponentNode, Layout, Node};
use crate::error::EngineError;
use crate::render::{RenderContext, RenderResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Reserved route committed when no entry matched.
pub const NOT_FOUND_ROUTE: &str = "/__not_found";
/// Reserved route committed after the error-rendering path.
pub const ERROR_ROUTE: &str = "/__error";

/// Route metadata from the compiler.
#[derive(Debug, Clone, Default)]
pub struct RouteMeta {
    pub title: Option<String>,
    /// Surface this route in the platform's command menu.
    pub in_menu: bool,
    /// Slash command bound to this route (e.g. `/start`).
    pub command: Option<String>,
}

impl RouteMeta {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn in_menu(mut self, value: bool) -> Self {
        self.in_menu = value;
        self
    }
}

/// One entry as emitted by the route compiler: pattern text, component,
/// ordered layout chain (outermost first), metadata.
pub struct CompiledRoute {
    pub pattern: String,
    pub component: Arc<dyn Component>,
    pub layouts: Vec<Arc<dyn Layout>>,
    pub meta: RouteMeta,
}

struct RouteEntry {
    pattern: PathPattern,
    component: Arc<dyn Component>,
    layouts: Vec<Arc<dyn Layout>>,
    meta: RouteMeta,
}

#[derive(Debug, Error)]
pub enum RouteConfigError {
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error("command {0} is bound to more than one route")]
    DuplicateCommand(String),
    #[error("command {command} is bound to dynamic pattern {pattern}")]
    CommandOnDynamicRoute { command: String, pattern: String },
}

/// What kind of target a resolution produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedKind {
    Page,
    NotFound,
    Error,
}

/// A resolved render target.
#[derive(Clone)]
pub struct Resolved {
    /// Concrete path (committed as the conversation's current route).
    pub path: String,
    /// Pattern key; the page's state scope.
    pub route_key: String,
    pub params: HashMap<String, String>,
    pub component: Arc<dyn Component>,
    pub layouts: Vec<Arc<dyn Layout>>,
    pub meta: RouteMeta,
    pub kind: ResolvedKind,
}

impl Resolved {
    /// Compose the full node tree: layouts wrap the page outermost-first,
    /// each under its own state scope.
    pub fn tree(&self) -> Node {
        let mut node = Node::Component(ComponentNode {
            body: self.component.clone(),
            memo: false,
            scope: Some(self.route_key.clone()),
        });
        for layout in self.layouts.iter().rev() {
            node = Node::Component(ComponentNode {
                body: Arc::new(LayoutComponent {
                    layout: layout.clone(),
                    content: node,
                }),
                memo: false,
                scope: Some(layout.key().to_string()),
            });
        }
        node
    }
}

/// Adapts a [`Layout`] plus its (unevaluated) content into a component.
struct LayoutComponent {
    layout: Arc<dyn Layout>,
    content: Node,
}

#[async_trait]
impl Component for LayoutComponent {
    async fn render(&self, ctx: &mut RenderContext<'_>) -> RenderResult<Node> {
        self.layout.render(ctx, self.content.clone()).await
    }
}

/// The shared, read-only route table.
pub struct RouteTable {
    entries: Vec<RouteEntry>,
    not_found: Arc<dyn Component>,
    error_page: Arc<dyn Component>,
}

impl RouteTable {
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder::default()
    }

    /// Build from the compiler's ordered entry list.
    pub fn from_compiled(routes: Vec<CompiledRoute>) -> Result<Self, RouteConfigError> {
        let mut builder = Self::builder();
        for route in routes {
            builder = builder.entry(route);
        }
        builder.build()
    }

    /// Resolve a path (optionally carrying a query string). Entries match
    /// in table order; query pairs bind first and path segments overwrite.
    pub fn resolve(&self, target: &str) -> Result<Resolved, EngineError> {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (target, None),
        };

        match path {
            NOT_FOUND_ROUTE => return Ok(self.not_found(path)),
            ERROR_ROUTE => return Ok(self.error_route()),
            _ => {}
        }

        for entry in &self.entries {
            if let Some(bound) = entry.pattern.matches(path) {
                let mut params: HashMap<String, String> = query
                    .map(parse_query)
                    .unwrap_or_default();
                params.extend(bound);
                return Ok(Resolved {
                    path: normalize(path).to_string(),
                    route_key: entry.pattern.key().to_string(),
                    params,
                    component: entry.component.clone(),
                    layouts: entry.layouts.clone(),
                    meta: entry.meta.clone(),
                    kind: ResolvedKind::Page,
                });
            }
        }

        Err(EngineError::RouteNotFound {
            path: path.to_string(),
        })
    }

    /// Resolve a path, falling back to the not-found target.
    pub fn resolve_or_fallback(&self, target: &str) -> Resolved {
        self.resolve(target).unwrap_or_else(|_| {
            tracing::debug!(path = %target, "no route matched, using not-found target");
            self.not_found(target)
        })
    }

    /// Resolve a slash command (`/start`, `/start args…`) through route
    /// metadata. The text after the command binds to the `args` parameter.
    pub fn resolve_command(&self, text: &str) -> Option<Resolved> {
        let mut words = text.split_whitespace();
        let command = words.next()?;
        if !command.starts_with('/') {
            return None;
        }
        let rest = words.collect::<Vec<_>>().join(" ");

        let entry = self
            .entries
            .iter()
            .find(|e| e.meta.command.as_deref() == Some(command))?;

        let mut params = HashMap::new();
        if !rest.is_empty() {
            params.insert("args".to_string(), rest);
        }
        Some(Resolved {
            path: entry.pattern.key().to_string(),
            route_key: entry.pattern.key().to_string(),
            params,
            component: entry.component.clone(),
            layouts: entry.layouts.clone(),
            meta: entry.meta.clone(),
            kind: ResolvedKind::Page,
        })
    }

    /// The reserved error target rendering the error page component.
    pub fn error_route(&self) -> Resolved {
        Resolved {
            path: ERROR_ROUTE.to_string(),
            route_key: ERROR_ROUTE.to_string(),
            params: HashMap::new(),
            component: self.error_page.clone(),
            layouts: Vec::new(),
            meta: RouteMeta::titled("Error"),
            kind: ResolvedKind::Error,
        }
    }

    fn not_found(&self, path: &str) -> Resolved {
        Resolved {
            path: NOT_FOUND_ROUTE.to_string(),
            route_key: NOT_FOUND_ROUTE.to_string(),
            params: HashMap::from([("path".to_string(), path.to_string())]),
            component: self.not_found.clone(),
            layouts: Vec::new(),
            meta: RouteMeta::titled("Not found"),
            kind: ResolvedKind::NotFound,
        }
    }

    /// Commands surfaced in the platform menu: (command, title).
    pub fn commands(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .filter(|e| e.meta.in_menu)
            .filter_map(|e| {
                let command = e.meta.command.clone()?;
                let title = e
                    .meta
                    .title
                    .clone()
                    .unwrap_or_else(|| e.pattern.key().to_string());
                Some((command, title))
            })
            .collect()
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

#[derive(Default)]
pub struct RouteTableBuilder {
    routes: Vec<CompiledRoute>,
    not_found: Option<Arc<dyn Component>>,
    error_page: Option<Arc<dyn Component>>,
}

impl RouteTableBuilder {
    /// Add a route with default metadata and no layouts.
    pub fn route(self, pattern: &str, component: Arc<dyn Component>) -> Self {
        self.entry(CompiledRoute {
            pattern: pattern.to_string(),
            component,
            layouts: Vec::new(),
            meta: RouteMeta::default(),
        })
    }

    /// Add a fully specified route.
    pub fn entry(mut self, route: CompiledRoute) -> Self {
        self.routes.push(route);
        self
    }

    /// Replace the default not-found component.
    pub fn not_found(mut self, component: Arc<dyn Component>) -> Self {
        self.not_found = Some(component);
        self
    }

    /// Replace the default error page component.
    pub fn error_page(mut self, component: Arc<dyn Component>) -> Self {
        self.error_page = Some(component);
        self
    }

    pub fn build(self) -> Result<RouteTable, RouteConfigError> {
        let mut entries = Vec::with_capacity(self.routes.len());
        let mut commands: Vec<String> = Vec::new();

        for route in self.routes {
            let pattern = PathPattern::parse(&route.pattern)?;
            if let Some(command) = &route.meta.command {
                if !pattern.is_static() {
                    return Err(RouteConfigError::CommandOnDynamicRoute {
                        command: command.clone(),
                        pattern: pattern.key().to_string(),
                    });
                }
                if commands.contains(command) {
                    return Err(RouteConfigError::DuplicateCommand(command.clone()));
                }
                commands.push(command.clone());
            }
            entries.push(RouteEntry {
                pattern,
                component: route.component,
                layouts: route.layouts,
                meta: route.meta,
            });
        }

        Ok(RouteTable {
            entries,
            not_found: self
                .not_found
                .unwrap_or_else(|| Arc::new(DefaultNotFound)),
            error_page: self
                .error_page
                .unwrap_or_else(|| Arc::new(DefaultErrorPage)),
        })
    }
}

/// Built-in not-found page.
struct DefaultNotFound;

#[async_trait]
impl Component for DefaultNotFound {
    async fn render(&self, ctx: &mut RenderContext<'_>) -> RenderResult<Node> {
        let path = ctx.param("path").unwrap_or("").to_string();
        Ok(Node::container([
            Node::header("Not found"),
            Node::text(format!("No page exists at {path}")),
        ]))
    }
}

/// Built-in error page; renders the captured fault.
struct DefaultErrorPage;

#[async_trait]
impl Component for DefaultErrorPage {
    async fn render(&self, ctx: &mut RenderContext<'_>) -> RenderResult<Node> {
        let (code, message) = ctx
            .fault()
            .map(|f| (f.code, f.message.clone()))
            .unwrap_or((500, "unknown error".to_string()));
        Ok(Node::container([
            Node::header("Something went wrong"),
            Node::text(format!("Error {code}: {message}")),
        ]))
    }
}
