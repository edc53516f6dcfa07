//! End-to-end cycle tests over mock collaborators

use super::testing::{AdapterCall, FailingStore, RecordingAdapter};
use super::{Coordinator, EngineConfig};
use crate::adapter::{MessageId, Update};
use crate::component::{from_fn, ButtonNode, Component, Layout, Node};
use crate::diff::{DiffOptions, MessageOp};
use crate::error::{AdapterError, EngineError};
use crate::render::{redirect, skip, RenderContext, RenderResult, Signal};
use crate::router::{RouteTable, ERROR_ROUTE, NOT_FOUND_ROUTE};
use crate::storage::{MemoryStore, StateBridge};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const CONV: &str = "conv-1";

struct CounterPage;

#[async_trait]
impl Component for CounterPage {
    async fn render(&self, ctx: &mut RenderContext<'_>) -> RenderResult<Node> {
        let count = ctx.state("count", 0i64).await?;
        Ok(Node::container([
            Node::text(format!("Current state: {}", count.get())),
            Node::menu([vec![ButtonNode::new("inc", "+1").on_press(|ev| {
                let current: i64 = ev.get("count").unwrap_or(0);
                ev.set("count", current + 1)
            })]]),
        ]))
    }
}

struct SlowPage {
    label: &'static str,
    delay: Duration,
}

#[async_trait]
impl Component for SlowPage {
    async fn render(&self, _ctx: &mut RenderContext<'_>) -> RenderResult<Node> {
        tokio::time::sleep(self.delay).await;
        Ok(Node::text(self.label))
    }
}

struct SharedLayout;

#[async_trait]
impl Layout for SharedLayout {
    fn key(&self) -> &str {
        "shell"
    }

    async fn render(&self, ctx: &mut RenderContext<'_>, content: Node) -> RenderResult<Node> {
        let visits = ctx.state("visits", 0i64).await?;
        visits.set(visits.get() + 1).await?;
        Ok(Node::container([Node::header("shell"), content]))
    }
}

fn routes() -> RouteTable {
    let flag_for_defer = Arc::new(AtomicBool::new(false));

    RouteTable::builder()
        .route("/counter", Arc::new(CounterPage))
        .route("/static", from_fn(|_| Ok(Node::text("static page"))))
        .route("/sub", from_fn(|_| Ok(Node::text("sub page"))))
        .route("/", from_fn(|_| redirect("/sub")))
        .route("/loop", from_fn(|_| redirect("/loop")))
        .route("/skippy", from_fn(|_| skip()))
        .route(
            "/usage",
            from_fn(|_| {
                Ok(Node::container([
                    Node::text("usage"),
                    Node::button(
                        ButtonNode::new("bad", "Go").on_press(|_| Err(Signal::redirect("/sub"))),
                    ),
                ]))
            }),
        )
        .route(
            "/buttons",
            from_fn(|_| {
                Ok(Node::container([
                    Node::text("buttons"),
                    Node::button(ButtonNode::new("b", "B").on_press(|_| Ok(()))),
                ]))
            }),
        )
        .route(
            "/defer-flag",
            from_fn(move |ctx| {
                let seen = flag_for_defer.load(Ordering::SeqCst);
                let flag = flag_for_defer.clone();
                ctx.defer(async move {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    flag.store(true, Ordering::SeqCst);
                    None
                });
                Ok(Node::text(format!("flag: {seen}")))
            }),
        )
        .route(
            "/detour",
            from_fn(|ctx| {
                let conversation = ctx.conversation().to_string();
                ctx.defer(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Some(Update::text(conversation, "/sub"))
                });
                Ok(Node::text("waiting"))
            }),
        )
        .build()
        .unwrap()
}

struct Harness {
    coordinator: Coordinator,
    adapter: Arc<RecordingAdapter>,
}

fn harness() -> Harness {
    harness_with(Arc::new(MemoryStore::new()), EngineConfig::default())
}

fn harness_with(store: Arc<MemoryStore>, config: EngineConfig) -> Harness {
    let adapter = Arc::new(RecordingAdapter::new());
    let coordinator = Coordinator::with_config(routes(), store, adapter.clone(), config);
    Harness {
        coordinator,
        adapter,
    }
}

#[tokio::test]
async fn counter_scenario_creates_then_edits_in_place() {
    let h = harness();

    let first = h
        .coordinator
        .handle(Update::text(CONV, "/counter"))
        .await
        .unwrap();
    assert_eq!(first.route, "/counter");
    assert_eq!(first.update_seq, 1);
    assert!(matches!(first.ops.as_slice(), [MessageOp::Create { .. }]));
    assert_eq!(h.adapter.texts(), vec!["Current state: 0"]);

    let message = h
        .coordinator
        .context(CONV)
        .await
        .unwrap()
        .active_message
        .unwrap();

    let second = h
        .coordinator
        .handle(Update::callback(CONV, "inc", Some(message.clone())))
        .await
        .unwrap();
    assert!(matches!(second.ops.as_slice(), [MessageOp::Edit { .. }]));

    h.coordinator
        .handle(Update::callback(CONV, "inc", Some(message.clone())))
        .await
        .unwrap();

    assert_eq!(
        h.adapter.texts(),
        vec!["Current state: 0", "Current state: 1", "Current state: 2"]
    );
    // Every edit targeted the originally created message.
    for call in h.adapter.calls().iter().skip(1) {
        match call {
            AdapterCall::Edit { message: m, .. } => assert_eq!(m, &message),
            other => panic!("expected edit, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn rerendering_unchanged_output_emits_zero_ops() {
    let h = harness();
    h.coordinator
        .handle(Update::text(CONV, "/static"))
        .await
        .unwrap();
    let second = h
        .coordinator
        .handle(Update::text(CONV, "/static"))
        .await
        .unwrap();
    assert!(second.ops.is_empty());
    assert_eq!(h.adapter.call_count(), 1);
}

#[tokio::test]
async fn reload_without_navigation_uses_stored_route() {
    let h = harness();
    h.coordinator
        .handle(Update::text(CONV, "/counter"))
        .await
        .unwrap();

    // No path, no event: resolve purely from the stored current route.
    let reload = h
        .coordinator
        .handle(Update {
            conversation: CONV.to_string(),
            text: None,
            callback: None,
            message: None,
        })
        .await
        .unwrap();
    assert_eq!(reload.route, "/counter");
    assert!(reload.ops.is_empty(), "unchanged reload must be idempotent");
}

#[tokio::test]
async fn redirect_commits_only_the_final_route() {
    let h = harness();
    let report = h.coordinator.handle(Update::text(CONV, "/")).await.unwrap();

    assert_eq!(report.route, "/sub");
    assert_eq!(h.adapter.texts(), vec!["sub page"]);
    let ctx = h.coordinator.context(CONV).await.unwrap();
    assert_eq!(ctx.current_route.as_deref(), Some("/sub"));
}

#[tokio::test]
async fn redirect_loop_falls_back_to_error_route() {
    let h = harness();
    let report = h
        .coordinator
        .handle(Update::text(CONV, "/loop"))
        .await
        .unwrap();

    assert_eq!(report.route, ERROR_ROUTE);
    let text = h.adapter.last_text().unwrap();
    assert!(text.contains("508"), "error page should carry the code: {text}");
    let ctx = h.coordinator.context(CONV).await.unwrap();
    assert_eq!(ctx.current_route.as_deref(), Some(ERROR_ROUTE));
}

#[tokio::test]
async fn unconditional_skip_is_bounded_like_a_redirect() {
    let h = harness();
    let report = h
        .coordinator
        .handle(Update::text(CONV, "/skippy"))
        .await
        .unwrap();
    assert_eq!(report.route, ERROR_ROUTE);
}

#[tokio::test]
async fn redirect_from_event_handler_is_a_usage_error() {
    let h = harness();
    h.coordinator
        .handle(Update::text(CONV, "/usage"))
        .await
        .unwrap();
    assert_eq!(h.adapter.call_count(), 1);

    let result = h
        .coordinator
        .handle(Update::callback(CONV, "bad", None))
        .await;
    assert!(matches!(result, Err(EngineError::Usage(_))));

    // Nothing dispatched, nothing committed.
    assert_eq!(h.adapter.call_count(), 1);
    let ctx = h.coordinator.context(CONV).await.unwrap();
    assert_eq!(ctx.update_seq, 1);
}

#[tokio::test]
async fn state_survives_a_restart_between_cycles() {
    let store = Arc::new(MemoryStore::new());

    let message = {
        let h = harness_with(store.clone(), EngineConfig::default());
        h.coordinator
            .handle(Update::text(CONV, "/counter"))
            .await
            .unwrap();
        let message = h
            .coordinator
            .context(CONV)
            .await
            .unwrap()
            .active_message
            .unwrap();
        h.coordinator
            .handle(Update::callback(CONV, "inc", Some(message.clone())))
            .await
            .unwrap();
        h.coordinator.shutdown();
        message
    };

    // Fresh coordinator, same backend: the next click must see count = 1
    // and edit the same message.
    let h = harness_with(store, EngineConfig::default());
    h.coordinator
        .handle(Update::callback(CONV, "inc", Some(message.clone())))
        .await
        .unwrap();
    assert_eq!(h.adapter.texts(), vec!["Current state: 2"]);
    match &h.adapter.calls()[0] {
        AdapterCall::Edit { message: m, .. } => assert_eq!(m, &message),
        other => panic!("expected edit, got {other:?}"),
    }
}

#[tokio::test]
async fn same_conversation_processes_updates_in_arrival_order() {
    let adapter = Arc::new(RecordingAdapter::new());
    let table = RouteTable::builder()
        .route(
            "/slow",
            Arc::new(SlowPage {
                label: "slow page",
                delay: Duration::from_millis(50),
            }),
        )
        .route("/static", from_fn(|_| Ok(Node::text("static page"))))
        .build()
        .unwrap();
    let coordinator = Coordinator::new(table, Arc::new(MemoryStore::new()), adapter.clone());

    let c1 = coordinator.clone();
    let first = tokio::spawn(async move { c1.handle(Update::text(CONV, "/slow")).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let c2 = coordinator.clone();
    let second = tokio::spawn(async move { c2.handle(Update::text(CONV, "/static")).await });

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert_eq!(first.update_seq, 1);
    assert_eq!(second.update_seq, 2);
    assert_eq!(adapter.texts(), vec!["slow page", "static page"]);
}

#[tokio::test(start_paused = true)]
async fn distinct_conversations_run_concurrently() {
    let adapter = Arc::new(RecordingAdapter::new());
    let table = RouteTable::builder()
        .route(
            "/slow",
            Arc::new(SlowPage {
                label: "slow page",
                delay: Duration::from_secs(5),
            }),
        )
        .route("/static", from_fn(|_| Ok(Node::text("static page"))))
        .build()
        .unwrap();
    let coordinator = Coordinator::new(table, Arc::new(MemoryStore::new()), adapter.clone());

    let c1 = coordinator.clone();
    let slow = tokio::spawn(async move { c1.handle(Update::text("conv-a", "/slow")).await });
    tokio::task::yield_now().await;

    // conv-b completes while conv-a is still sleeping.
    let start = Instant::now();
    coordinator
        .handle(Update::text("conv-b", "/static"))
        .await
        .unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));

    slow.await.unwrap().unwrap();
    assert_eq!(adapter.texts(), vec!["static page", "slow page"]);
}

#[tokio::test]
async fn deferred_task_completes_before_next_cycle_starts() {
    let h = harness();

    h.coordinator
        .handle(Update::text(CONV, "/defer-flag"))
        .await
        .unwrap();
    // The next cycle must wait on the completion barrier, so it observes
    // the flag the deferred task sets.
    h.coordinator
        .handle(Update::text(CONV, "/defer-flag"))
        .await
        .unwrap();

    assert_eq!(h.adapter.texts(), vec!["flag: false", "flag: true"]);
}

#[tokio::test]
async fn deferred_update_triggers_a_follow_up_cycle() {
    let h = harness();
    let report = h
        .coordinator
        .handle(Update::text(CONV, "/detour"))
        .await
        .unwrap();
    assert_eq!(report.route, "/detour");
    assert_eq!(h.adapter.texts(), vec!["waiting"]);

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let ctx = h.coordinator.context(CONV).await.unwrap();
        if ctx.current_route.as_deref() == Some("/sub") {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "deferred navigation never landed"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.adapter.texts(), vec!["waiting", "sub page"]);
}

#[tokio::test]
async fn storage_failure_aborts_with_no_dispatch() {
    let adapter = Arc::new(RecordingAdapter::new());
    let coordinator = Coordinator::new(routes(), Arc::new(FailingStore), adapter.clone());

    let result = coordinator.handle(Update::text(CONV, "/static")).await;
    assert!(matches!(result, Err(EngineError::Storage(_))));
    assert_eq!(adapter.call_count(), 0);
}

#[tokio::test]
async fn adapter_failure_leaves_committed_state_untouched() {
    let h = harness();
    h.adapter
        .queue_failure(AdapterError::Send("platform offline".to_string()));

    let result = h.coordinator.handle(Update::text(CONV, "/static")).await;
    assert!(matches!(result, Err(EngineError::Adapter(_))));

    let ctx = h.coordinator.context(CONV).await.unwrap();
    assert_eq!(ctx.update_seq, 0);
    assert!(ctx.active_message.is_none());

    // The retry goes through cleanly.
    let report = h
        .coordinator
        .handle(Update::text(CONV, "/static"))
        .await
        .unwrap();
    assert_eq!(report.update_seq, 1);
    assert!(matches!(report.ops.as_slice(), [MessageOp::Create { .. }]));
}

#[tokio::test]
async fn unmatched_path_renders_not_found() {
    let h = harness();
    let report = h
        .coordinator
        .handle(Update::text(CONV, "/no/such/page"))
        .await
        .unwrap();
    assert_eq!(report.route, NOT_FOUND_ROUTE);
    assert!(h.adapter.last_text().unwrap().contains("/no/such/page"));
}

#[tokio::test]
async fn push_forces_a_new_message() {
    let h = harness();
    h.coordinator.push(CONV, "/static").await.unwrap();
    let report = h.coordinator.push(CONV, "/static").await.unwrap();

    assert!(matches!(report.ops.as_slice(), [MessageOp::Create { .. }]));
    assert_eq!(h.adapter.texts(), vec!["static page", "static page"]);
    let ctx = h.coordinator.context(CONV).await.unwrap();
    assert_eq!(ctx.active_message, Some(MessageId::new("m2")));
    assert_eq!(ctx.retired.len(), 1);
}

#[tokio::test]
async fn event_on_retired_inactive_message_is_dropped() {
    let store = Arc::new(MemoryStore::new());
    let config = EngineConfig::default()
        .diff_options(DiffOptions::default().preserve_old_interactivity(false));
    let h = harness_with(store, config);

    h.coordinator
        .handle(Update::text(CONV, "/buttons"))
        .await
        .unwrap();
    let old_message = h
        .coordinator
        .context(CONV)
        .await
        .unwrap()
        .active_message
        .unwrap();

    h.coordinator.push(CONV, "/static").await.unwrap();

    let report = h
        .coordinator
        .handle(Update::callback(CONV, "b", Some(old_message)))
        .await
        .unwrap();
    assert!(report.ops.is_empty());
    assert_eq!(report.update_seq, 2, "dropped events do not commit");
    assert_eq!(h.adapter.call_count(), 2);
}

#[tokio::test]
async fn navigation_pushes_previous_route_onto_history() {
    let h = harness();
    h.coordinator
        .handle(Update::text(CONV, "/static"))
        .await
        .unwrap();
    h.coordinator
        .handle(Update::text(CONV, "/counter"))
        .await
        .unwrap();

    let ctx = h.coordinator.context(CONV).await.unwrap();
    assert_eq!(ctx.history, vec!["/static"]);
    assert_eq!(ctx.current_route.as_deref(), Some("/counter"));
}

#[tokio::test]
async fn layout_scope_is_shared_across_routes() {
    let layout: Arc<dyn Layout> = Arc::new(SharedLayout);
    let table = RouteTable::builder()
        .entry(crate::router::CompiledRoute {
            pattern: "/x".to_string(),
            component: from_fn(|_| Ok(Node::text("x"))),
            layouts: vec![layout.clone()],
            meta: crate::router::RouteMeta::default(),
        })
        .entry(crate::router::CompiledRoute {
            pattern: "/y".to_string(),
            component: from_fn(|_| Ok(Node::text("y"))),
            layouts: vec![layout],
            meta: crate::router::RouteMeta::default(),
        })
        .build()
        .unwrap();

    let store = Arc::new(MemoryStore::new());
    let adapter = Arc::new(RecordingAdapter::new());
    let coordinator = Coordinator::new(table, store.clone(), adapter.clone());

    coordinator.handle(Update::text(CONV, "/x")).await.unwrap();
    coordinator.handle(Update::text(CONV, "/y")).await.unwrap();

    // Both navigations incremented the layout's shared counter.
    let bridge = StateBridge::new(store, CONV);
    let visits = bridge.read("shell", "visits", json!(0)).await.unwrap();
    assert_eq!(visits, json!(2));
}
