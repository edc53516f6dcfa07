//! Render coordinator
//!
//! Owns one cycle loop per conversation, spawned on first use in the manner
//! of a runtime manager: updates for one conversation are processed
//! strictly in arrival order over an mpsc channel, while distinct
//! conversations run concurrently. Detached tasks registered during a cycle
//! join a completion barrier that the conversation's next queued cycle
//! waits on before it starts.

mod context;
mod cycle;

#[cfg(test)]
pub mod testing;

#[cfg(test)]
mod scenarios;

pub use context::{ConversationContext, RetiredMessage};
pub use cycle::CycleReport;

use crate::adapter::{ChatAdapter, Update};
use crate::diff::DiffOptions;
use crate::error::EngineError;
use crate::router::RouteTable;
use crate::storage::{KeyValueStore, StateBridge};
use cycle::CycleRunner;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Engine configuration, read once at coordinator construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on redirect/skip chains within one cycle.
    pub redirect_limit: usize,
    /// Capacity of each conversation's update queue.
    pub queue_depth: usize,
    /// Diff options cycles start from (components may override per cycle).
    pub diff_options: DiffOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            redirect_limit: 8,
            queue_depth: 32,
            diff_options: DiffOptions::default(),
        }
    }
}

impl EngineConfig {
    pub fn redirect_limit(mut self, limit: usize) -> Self {
        self.redirect_limit = limit;
        self
    }

    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    pub fn diff_options(mut self, options: DiffOptions) -> Self {
        self.diff_options = options;
        self
    }
}

struct CycleRequest {
    update: Update,
    force_new_message: bool,
    /// Absent for internally enqueued updates (deferred follow-ups).
    reply: Option<oneshot::Sender<Result<CycleReport, EngineError>>>,
}

struct ConversationHandle {
    tx: mpsc::Sender<CycleRequest>,
}

/// The engine's front door: serializes render cycles per conversation and
/// dispatches their operations.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    runner: Arc<CycleRunner>,
    conversations: RwLock<HashMap<String, ConversationHandle>>,
    shutdown: CancellationToken,
}

impl Coordinator {
    pub fn new(
        routes: RouteTable,
        store: Arc<dyn KeyValueStore>,
        adapter: Arc<dyn ChatAdapter>,
    ) -> Self {
        Self::with_config(routes, store, adapter, EngineConfig::default())
    }

    pub fn with_config(
        routes: RouteTable,
        store: Arc<dyn KeyValueStore>,
        adapter: Arc<dyn ChatAdapter>,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                runner: Arc::new(CycleRunner {
                    routes: Arc::new(routes),
                    store,
                    adapter,
                    config,
                }),
                conversations: RwLock::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Handle an incoming update: queue it on the conversation's cycle
    /// loop and wait for the cycle to commit (or fail).
    pub async fn handle(&self, update: Update) -> Result<CycleReport, EngineError> {
        self.submit(update, false).await
    }

    /// Render a route into a conversation without an incoming update,
    /// always as a new message.
    pub async fn push(&self, conversation: &str, path: &str) -> Result<CycleReport, EngineError> {
        self.submit(Update::text(conversation, path), true).await
    }

    /// Load a conversation's committed context (read-only snapshot).
    pub async fn context(
        &self,
        conversation: &str,
    ) -> Result<ConversationContext, EngineError> {
        let bridge = StateBridge::new(self.inner.runner.store.clone(), conversation);
        Ok(ConversationContext::load(&bridge).await?)
    }

    /// Stop all conversation loops. In-flight cycles finish; queued
    /// updates are dropped.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    async fn submit(
        &self,
        update: Update,
        force_new_message: bool,
    ) -> Result<CycleReport, EngineError> {
        let tx = self.handle_for(&update.conversation).await;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(CycleRequest {
            update,
            force_new_message,
            reply: Some(reply_tx),
        })
        .await
        .map_err(|_| EngineError::Closed)?;
        reply_rx.await.map_err(|_| EngineError::Closed)?
    }

    /// Get or spawn the conversation's cycle loop.
    async fn handle_for(&self, conversation: &str) -> mpsc::Sender<CycleRequest> {
        {
            let conversations = self.inner.conversations.read().await;
            if let Some(handle) = conversations.get(conversation) {
                if !handle.tx.is_closed() {
                    return handle.tx.clone();
                }
            }
        }

        let mut conversations = self.inner.conversations.write().await;
        if let Some(handle) = conversations.get(conversation) {
            if !handle.tx.is_closed() {
                return handle.tx.clone();
            }
        }

        let (tx, rx) = mpsc::channel(self.inner.runner.config.queue_depth);
        let runner = self.inner.runner.clone();
        let shutdown = self.inner.shutdown.clone();
        let conv = conversation.to_string();
        let loop_tx = tx.clone();
        tokio::spawn(async move {
            conversation_loop(runner, conv, rx, loop_tx, shutdown).await;
        });

        conversations.insert(
            conversation.to_string(),
            ConversationHandle { tx: tx.clone() },
        );
        tx
    }
}

/// One conversation's cycle loop: strict arrival order, with a completion
/// barrier for tasks detached by the previous cycle.
async fn conversation_loop(
    runner: Arc<CycleRunner>,
    conversation: String,
    mut rx: mpsc::Receiver<CycleRequest>,
    tx: mpsc::Sender<CycleRequest>,
    shutdown: CancellationToken,
) {
    tracing::debug!(conversation = %conversation, "conversation loop started");
    let mut barrier: Vec<JoinHandle<()>> = Vec::new();

    loop {
        let request = tokio::select! {
            () = shutdown.cancelled() => break,
            request = rx.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        // Tasks detached by the previous cycle must complete before this
        // cycle starts.
        for handle in barrier.drain(..) {
            if let Err(err) = handle.await {
                tracing::warn!(conversation = %conversation, "deferred task panicked: {err}");
            }
        }

        let result = runner.run(request.update, request.force_new_message).await;
        let result = match result {
            Ok((report, deferred)) => {
                for task in deferred {
                    let tx = tx.clone();
                    let conv = conversation.clone();
                    barrier.push(tokio::spawn(async move {
                        if let Some(mut update) = task.await {
                            // Deferred follow-ups stay within their own
                            // conversation's ordering domain.
                            update.conversation = conv;
                            let _ = tx
                                .send(CycleRequest {
                                    update,
                                    force_new_message: false,
                                    reply: None,
                                })
                                .await;
                        }
                    }));
                }
                Ok(report)
            }
            Err(err) => Err(err),
        };

        match request.reply {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => {
                if let Err(err) = result {
                    tracing::error!(
                        conversation = %conversation,
                        "internally enqueued cycle failed: {err}"
                    );
                }
            }
        }
    }

    tracing::debug!(conversation = %conversation, "conversation loop stopped");
}
