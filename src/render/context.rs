//! Per-cycle render context
//!
//! One context is threaded through every evaluation call of a render pass;
//! there is no process-wide "current render" state. The context carries the
//! resolved route, the triggering event, the state bridge, and the diff
//! options the cycle will commit with.

use crate::adapter::Update;
use crate::diff::DiffOptions;
use crate::error::{RenderFault, StorageError};
use crate::render::{RenderResult, Signal};
use crate::storage::StateBridge;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;

/// Work detached from the cycle that spawned it. The optional update it
/// resolves to is enqueued for the same conversation (a deferred redirect).
pub type DeferredUpdate = BoxFuture<'static, Option<Update>>;

/// Context for one render pass of one conversation.
pub struct RenderContext<'a> {
    route_path: String,
    route_key: String,
    scope: String,
    params: HashMap<String, String>,
    trigger_element: Option<String>,
    incoming_text: Option<String>,
    fault: Option<RenderFault>,
    bridge: &'a StateBridge,
    options: DiffOptions,
    update_seq: u64,
    deferred: Vec<DeferredUpdate>,
}

impl<'a> RenderContext<'a> {
    pub fn new(
        bridge: &'a StateBridge,
        route_path: impl Into<String>,
        route_key: impl Into<String>,
        params: HashMap<String, String>,
    ) -> Self {
        let route_key = route_key.into();
        Self {
            route_path: route_path.into(),
            scope: route_key.clone(),
            route_key,
            params,
            trigger_element: None,
            incoming_text: None,
            fault: None,
            bridge,
            options: DiffOptions::default(),
            update_seq: 0,
            deferred: Vec::new(),
        }
    }

    pub(crate) fn with_trigger(mut self, element: Option<String>) -> Self {
        self.trigger_element = element;
        self
    }

    pub(crate) fn with_text(mut self, text: Option<String>) -> Self {
        self.incoming_text = text;
        self
    }

    pub(crate) fn with_fault(mut self, fault: Option<RenderFault>) -> Self {
        self.fault = fault;
        self
    }

    pub(crate) fn with_seq(mut self, seq: u64) -> Self {
        self.update_seq = seq;
        self
    }

    pub(crate) fn with_options(mut self, options: DiffOptions) -> Self {
        self.options = options;
        self
    }

    pub fn conversation(&self) -> &str {
        self.bridge.conversation()
    }

    /// Concrete path of the route being rendered.
    pub fn path(&self) -> &str {
        &self.route_path
    }

    /// Pattern key of the route; the default state scope for the page.
    pub fn route_key(&self) -> &str {
        &self.route_key
    }

    /// State scope in effect for the node currently evaluating.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// Element id of the interactive event that triggered this cycle.
    pub fn trigger(&self) -> Option<&str> {
        self.trigger_element.as_deref()
    }

    /// Text of the incoming message, when the cycle was text-triggered.
    pub fn message_text(&self) -> Option<&str> {
        self.incoming_text.as_deref()
    }

    /// The captured fault, set while the error route renders.
    pub fn fault(&self) -> Option<&RenderFault> {
        self.fault.as_ref()
    }

    /// Monotonic per-conversation update counter.
    pub fn update_seq(&self) -> u64 {
        self.update_seq
    }

    pub fn options(&self) -> &DiffOptions {
        &self.options
    }

    /// Override the diff options this cycle commits with.
    pub fn set_options(&mut self, options: DiffOptions) {
        self.options = options;
    }

    /// Force a new message instead of editing the active one.
    pub fn force_new_message(&mut self) {
        self.options.new_message = true;
    }

    pub(crate) fn swap_scope(&mut self, scope: String) -> String {
        std::mem::replace(&mut self.scope, scope)
    }

    /// Bind a named, persisted state entry scoped to the current scope,
    /// materializing it with `default` on first read.
    ///
    /// Names are explicit keys, not call positions: two bindings with the
    /// same name under the same scope alias one stored value.
    pub async fn state<T>(&mut self, name: &str, default: T) -> RenderResult<StateHandle<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        if self.scope == crate::storage::ENGINE_SCOPE {
            return Err(Signal::halt(500, "state scope __engine is reserved"));
        }
        let default_json = serde_json::to_value(default).map_err(StorageError::from)?;
        let raw = self.bridge.read(&self.scope, name, default_json).await?;
        let value: T = serde_json::from_value(raw).map_err(StorageError::from)?;
        Ok(StateHandle {
            bridge: self.bridge.clone(),
            scope: self.scope.clone(),
            name: name.to_string(),
            value,
        })
    }

    /// Register a detached background task. The conversation's next queued
    /// cycle waits for it; if it resolves to an update, that update is
    /// enqueued for this conversation.
    pub fn defer<F>(&mut self, task: F)
    where
        F: Future<Output = Option<Update>> + Send + 'static,
    {
        self.deferred.push(Box::pin(task));
    }

    pub(crate) fn take_deferred(&mut self) -> Vec<DeferredUpdate> {
        std::mem::take(&mut self.deferred)
    }
}

/// A bound state entry. Reads are a cycle-consistent snapshot; writes go
/// through the bridge immediately and are durable on return.
pub struct StateHandle<T> {
    bridge: StateBridge,
    scope: String,
    name: String,
    value: T,
}

impl<T> StateHandle<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Value as read at binding time.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.value.clone()
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// Replace the stored value. Durable before the cycle dispatches.
    pub async fn set(&self, value: T) -> RenderResult<()> {
        let json = serde_json::to_value(value).map_err(StorageError::from)?;
        self.bridge.write(&self.scope, &self.name, json).await?;
        Ok(())
    }
}

/// Context handed to event handlers between the two passes of an event
/// cycle.
///
/// Reads come from the first pass's snapshot; writes are queued and flushed
/// through the bridge before the re-render pass, so the same cycle's output
/// observes them. Handlers cannot redirect or skip; that is the render
/// body's decision.
pub struct EventContext {
    conversation: String,
    scope: String,
    params: HashMap<String, String>,
    snapshot: HashMap<String, Value>,
    writes: Vec<(String, Value)>,
}

impl EventContext {
    pub(crate) fn new(
        conversation: impl Into<String>,
        scope: impl Into<String>,
        params: HashMap<String, String>,
        snapshot: HashMap<String, Value>,
    ) -> Self {
        Self {
            conversation: conversation.into(),
            scope: scope.into(),
            params,
            snapshot,
            writes: Vec::new(),
        }
    }

    pub fn conversation(&self) -> &str {
        &self.conversation
    }

    /// Scope the triggered element was bound under.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Read a state entry as seen by the pass that bound the element,
    /// including writes already queued by this handler.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let raw = self
            .writes
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .or_else(|| self.snapshot.get(name))?;
        serde_json::from_value(raw.clone()).ok()
    }

    /// Queue a state write, flushed before the re-render pass.
    pub fn set<T: Serialize>(&mut self, name: &str, value: T) -> Result<(), Signal> {
        let json = serde_json::to_value(value).map_err(StorageError::from)?;
        self.writes.push((name.to_string(), json));
        Ok(())
    }

    pub(crate) fn into_writes(self) -> Vec<(String, Value)> {
        self.writes
    }
}
