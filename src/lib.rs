//! chatframe - declarative chat interfaces over stateless invocations
//!
//! Authors describe a conversational interface as a component tree; the
//! engine renders it into platform chat messages, diffing each render
//! against the previously committed output to decide between editing the
//! existing message and sending a new one. Interaction state persists per
//! (conversation, scope, name) across independent invocations, and
//! mid-render control flow (redirect, restart, fault capture) travels as
//! explicit result variants.
//!
//! The platform gateway, the key-value backend, and the route compiler are
//! collaborators behind traits ([`ChatAdapter`], [`KeyValueStore`], and
//! [`CompiledRoute`] lists); everything else lives here.

pub mod adapter;
pub mod component;
pub mod coordinator;
pub mod diff;
pub mod error;
pub mod render;
pub mod router;
pub mod storage;

pub use adapter::{ChatAdapter, MessageId, Update};
pub use component::{from_fn, ButtonNode, Component, Layout, Node};
pub use coordinator::{ConversationContext, Coordinator, CycleReport, EngineConfig};
pub use diff::{diff, DiffOptions, MessageOp};
pub use error::{AdapterError, EngineError, RenderFault, StorageError};
pub use render::output::{OutputNode, RenderOutput};
pub use render::{
    halt, redirect, skip, EventContext, RenderContext, RenderResult, Signal, StateHandle,
};
pub use router::{CompiledRoute, RouteMeta, RouteTable};
pub use storage::{KeyValueStore, MemoryStore, SqliteStore, StateBridge};
