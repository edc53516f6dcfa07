//! One render cycle, start to commit
//!
//! A cycle is: load context → resolve target → evaluate (two passes when an
//! interactive event triggered it) → follow redirect/skip signals within the
//! configured bound → diff → dispatch → commit. Nothing is committed until
//! every dispatched operation succeeded, and state writes made during
//! evaluation were already durable before dispatch began.

use super::context::ConversationContext;
use super::EngineConfig;
use crate::adapter::{ChatAdapter, Update};
use crate::diff::{self, MessageOp};
use crate::error::{EngineError, RenderFault, StorageError};
use crate::render::{
    self, DeferredUpdate, EventContext, Evaluation, RenderContext, Signal,
};
use crate::router::{Resolved, ResolvedKind, RouteTable};
use crate::storage::{KeyValueStore, StateBridge};
use std::sync::Arc;

/// Outcome of one committed (or dropped) cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub conversation: String,
    /// Route whose output was committed.
    pub route: String,
    /// Operations dispatched to the adapter, in order.
    pub ops: Vec<MessageOp>,
    pub update_seq: u64,
}

/// Signals lifted out of evaluation for the cycle driver to act on.
enum CycleSignal {
    Redirect(String),
    Skip,
    Fault(RenderFault),
    Usage(String),
    Storage(StorageError),
}

impl From<Signal> for CycleSignal {
    fn from(signal: Signal) -> Self {
        match signal {
            Signal::Redirect { path } => CycleSignal::Redirect(path),
            Signal::Skip => CycleSignal::Skip,
            Signal::Halt(fault) => CycleSignal::Fault(fault),
            Signal::Abort(err) => CycleSignal::Storage(err),
        }
    }
}

/// Everything a cycle needs, shared by all conversations.
pub(crate) struct CycleRunner {
    pub routes: Arc<RouteTable>,
    pub store: Arc<dyn KeyValueStore>,
    pub adapter: Arc<dyn ChatAdapter>,
    pub config: EngineConfig,
}

impl CycleRunner {
    pub async fn run(
        &self,
        update: Update,
        force_new_message: bool,
    ) -> Result<(CycleReport, Vec<DeferredUpdate>), EngineError> {
        let conversation = update.conversation.clone();
        let bridge = StateBridge::new(self.store.clone(), conversation.as_str());
        let mut doc = ConversationContext::load(&bridge).await?;
        let seq = doc.update_seq + 1;

        // Events aimed at a retired, non-interactive message are dropped.
        if update.is_callback() {
            if let Some(message) = &update.message {
                if doc.is_retired_inactive(message) {
                    tracing::debug!(
                        conversation = %conversation,
                        message = %message,
                        "dropping event for retired non-interactive message"
                    );
                    return Ok((
                        CycleReport {
                            conversation,
                            route: doc.current_route.clone().unwrap_or_else(|| "/".to_string()),
                            ops: Vec::new(),
                            update_seq: doc.update_seq,
                        },
                        Vec::new(),
                    ));
                }
            }
        }

        let (mut target, mut trigger, text) = self.initial_target(&doc, &update);
        let mut fault: Option<RenderFault> = None;
        let mut hops = 0usize;
        let mut loop_reported = false;
        let mut deferred: Vec<DeferredUpdate> = Vec::new();

        // Redirect/skip chain. Skip restarts draw from the same budget:
        // an unconditional Skip is the same livelock as a redirect cycle.
        let evaluation = loop {
            if hops > self.config.redirect_limit {
                if loop_reported || matches!(target.kind, ResolvedKind::Error) {
                    return Err(EngineError::RedirectLoop {
                        limit: self.config.redirect_limit,
                    });
                }
                tracing::error!(
                    conversation = %conversation,
                    route = %target.path,
                    limit = self.config.redirect_limit,
                    "redirect chain exceeded bound, rendering error route"
                );
                loop_reported = true;
                fault = Some(RenderFault::redirect_loop(format!(
                    "redirect chain exceeded {} hops",
                    self.config.redirect_limit
                )));
                target = self.routes.error_route();
                trigger = None;
                hops = 0;
            }

            match self
                .evaluate_target(
                    &bridge,
                    &target,
                    trigger.as_deref(),
                    text.as_deref(),
                    fault.clone(),
                    seq,
                    &mut deferred,
                )
                .await
            {
                Ok(evaluation) => break evaluation,
                Err(CycleSignal::Redirect(path)) => {
                    tracing::debug!(conversation = %conversation, from = %target.path, to = %path, "redirect");
                    hops += 1;
                    target = self.routes.resolve_or_fallback(&path);
                    trigger = None;
                }
                Err(CycleSignal::Skip) => {
                    tracing::debug!(conversation = %conversation, route = %target.path, "skip, restarting route");
                    hops += 1;
                    trigger = None;
                }
                Err(CycleSignal::Fault(f)) => {
                    if matches!(target.kind, ResolvedKind::Error) {
                        // The error page itself failed; give up.
                        return Err(EngineError::Render(f));
                    }
                    tracing::warn!(
                        conversation = %conversation,
                        route = %target.path,
                        code = f.code,
                        "uncaught fault, rendering error route: {}",
                        f.message
                    );
                    fault = Some(f);
                    target = self.routes.error_route();
                    trigger = None;
                }
                Err(CycleSignal::Usage(detail)) => return Err(EngineError::Usage(detail)),
                Err(CycleSignal::Storage(err)) => return Err(err.into()),
            }
        };

        // Diff against the committed output.
        let mut options = evaluation.options.clone();
        if force_new_message {
            options.new_message = true;
        }
        let ops = diff::diff(
            doc.committed.as_ref(),
            &evaluation.output,
            doc.active_message.as_ref(),
            &options,
        );

        // Dispatch. An adapter failure surfaces before anything commits,
        // so the stored context still describes the platform's last good
        // state.
        for op in &ops {
            match op {
                MessageOp::Create { content } => {
                    let message = self.adapter.send_message(&conversation, content).await?;
                    doc.retire_active(options.preserve_old_interactivity);
                    doc.active_message = Some(message);
                }
                MessageOp::Edit { message, content } => {
                    self.adapter
                        .edit_message(&conversation, message, content)
                        .await?;
                }
                MessageOp::Delete { message } => {
                    self.adapter.delete_message(&conversation, message).await?;
                    doc.active_message = None;
                }
            }
        }

        // Commit.
        if options.add_to_history {
            if let Some(previous) = &doc.current_route {
                if previous != &target.path {
                    doc.push_history(previous.clone());
                }
            }
        }
        doc.conversation = conversation.clone();
        doc.current_route = Some(target.path.clone());
        doc.current_params = target.params.clone();
        doc.committed = if evaluation.output.is_empty() {
            None
        } else {
            Some(evaluation.output.clone())
        };
        doc.update_seq = seq;
        doc.save(&bridge).await?;

        tracing::info!(
            conversation = %conversation,
            route = %target.path,
            ops = ops.len(),
            seq,
            "cycle committed"
        );

        Ok((
            CycleReport {
                conversation,
                route: target.path.clone(),
                ops,
                update_seq: seq,
            },
            deferred,
        ))
    }

    /// Pick the first render target and trigger for an update.
    fn initial_target(
        &self,
        doc: &ConversationContext,
        update: &Update,
    ) -> (Resolved, Option<String>, Option<String>) {
        if let Some(element) = &update.callback {
            // Interactive event: re-render the stored route.
            return (self.stored_target(doc), Some(element.clone()), None);
        }

        if let Some(text) = &update.text {
            if let Some(resolved) = self.routes.resolve_command(text) {
                return (resolved, None, Some(text.clone()));
            }
            if text.starts_with('/') {
                return (self.routes.resolve_or_fallback(text), None, Some(text.clone()));
            }
            // Plain text goes to the current route.
            return (self.stored_target(doc), None, Some(text.clone()));
        }

        // No path and no event: reload the stored route.
        (self.stored_target(doc), None, None)
    }

    /// Resolve the conversation's stored current route, merging stored
    /// params over what the path itself binds (covers query-derived params
    /// that are not part of the path).
    fn stored_target(&self, doc: &ConversationContext) -> Resolved {
        let path = doc.current_route.as_deref().unwrap_or("/");
        let mut resolved = self.routes.resolve_or_fallback(path);
        for (key, value) in &doc.current_params {
            resolved
                .params
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        resolved
    }

    /// Evaluate one target: a single pass, or bind-invoke-rerender when an
    /// interactive event triggered the cycle.
    #[allow(clippy::too_many_arguments)]
    async fn evaluate_target(
        &self,
        bridge: &StateBridge,
        target: &Resolved,
        trigger: Option<&str>,
        text: Option<&str>,
        fault: Option<RenderFault>,
        seq: u64,
        deferred: &mut Vec<DeferredUpdate>,
    ) -> Result<Evaluation, CycleSignal> {
        let tree = target.tree();

        let mut ctx = RenderContext::new(
            bridge,
            target.path.as_str(),
            target.route_key.as_str(),
            target.params.clone(),
        )
        .with_trigger(trigger.map(String::from))
        .with_text(text.map(String::from))
        .with_fault(fault.clone())
        .with_seq(seq)
        .with_options(self.config.diff_options.clone());
        let first_pass = render::evaluate(&tree, &mut ctx).await.map_err(CycleSignal::from)?;
        deferred.append(&mut ctx.take_deferred());

        let Some(element) = trigger else {
            return Ok(first_pass);
        };
        let Some(binding) = first_pass.handler_for(element) else {
            // No handler bound for the element (stale button, or purely
            // visual): the first pass already is the re-render.
            return Ok(first_pass);
        };
        let scope = binding.scope.clone();
        let handler = binding.handler.clone();

        let mut event_ctx = EventContext::new(
            bridge.conversation(),
            scope.as_str(),
            target.params.clone(),
            bridge.cached_scope(&scope),
        );
        match handler(&mut event_ctx) {
            Ok(()) => {}
            Err(Signal::Redirect { .. } | Signal::Skip) => {
                return Err(CycleSignal::Usage(
                    "redirect/skip raised from an event handler; navigate from the render body instead"
                        .to_string(),
                ));
            }
            Err(Signal::Halt(fault)) => return Err(CycleSignal::Fault(fault)),
            Err(Signal::Abort(err)) => return Err(CycleSignal::Storage(err)),
        }

        // Handler writes become durable before the re-render pass, so the
        // pass (and anything dispatched after it) observes them.
        for (name, value) in event_ctx.into_writes() {
            bridge
                .write(&scope, &name, value)
                .await
                .map_err(CycleSignal::Storage)?;
        }

        let mut rerender_ctx = RenderContext::new(
            bridge,
            target.path.as_str(),
            target.route_key.as_str(),
            target.params.clone(),
        )
        .with_trigger(Some(element.to_string()))
        .with_text(text.map(String::from))
        .with_fault(fault)
        .with_seq(seq)
        .with_options(self.config.diff_options.clone());
        let second_pass = render::evaluate_with_reuse(&tree, &mut rerender_ctx, Some(&first_pass))
            .await
            .map_err(CycleSignal::from)?;
        deferred.append(&mut rerender_ctx.take_deferred());
        Ok(second_pass)
    }
}
