//! Error types for the render engine

use thiserror::Error;

/// A captured component failure, carried into the error-rendering path.
///
/// The numeric code travels with the fault so error pages can branch on it
/// without parsing the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderFault {
    pub code: i32,
    pub message: String,
}

impl RenderFault {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Generic internal failure (code 500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, message)
    }

    /// Route could not be resolved (code 404).
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    /// Redirect chain exceeded the configured bound (code 508).
    pub fn redirect_loop(message: impl Into<String>) -> Self {
        Self::new(508, message)
    }
}

impl std::fmt::Display for RenderFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Failure talking to the key-value backend.
///
/// Storage failures abort the cycle with no partial commit; they are never
/// captured by error boundaries.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("state value serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StorageError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

/// Failure dispatching an operation to the chat platform.
///
/// Retry policy belongs to the adapter; by the time this surfaces, the
/// adapter has given up. Committed state is left untouched.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("send failed: {0}")]
    Send(String),
    #[error("edit failed for message {message}: {detail}")]
    Edit { message: String, detail: String },
    #[error("delete failed for message {message}: {detail}")]
    Delete { message: String, detail: String },
}

/// Top-level error taxonomy returned to callers of the coordinator.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Redirect or Skip raised from an event handler instead of a render body.
    #[error("usage error: {0}")]
    Usage(String),

    /// Redirect/skip chain exceeded the configured bound.
    #[error("redirect chain exceeded {limit} hops")]
    RedirectLoop { limit: usize },

    /// No route matched and no not-found fallback could be rendered.
    #[error("no route matches {path}")]
    RouteNotFound { path: String },

    /// A component fault escaped every boundary including the error route.
    #[error("render failed: {0}")]
    Render(RenderFault),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// The conversation's cycle loop is gone (coordinator shut down).
    #[error("conversation loop closed")]
    Closed,
}
