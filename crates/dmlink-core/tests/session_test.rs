// Session-level tests for dmlink-core against the in-memory datamodel.
#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::{Map, Value, json};

use dmlink_api::{CommandInfo, DatamodelRpc, EventPayload, TypeInfo, ValueType};
use dmlink_core::{
    ConnectionState, ContainerOf, CoreError, EventTarget, InMemoryDatamodel, ObjectNode, ReadOnly,
    Readable, Session, SessionConfig, StateDiff, Writable,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn schema() -> TypeInfo {
    TypeInfo::new().named_object(
        "A",
        TypeInfo::new()
            .parameter("X", ValueType::String)
            .named_object("B", TypeInfo::new().parameter("Y", ValueType::String))
            .command("C", CommandInfo::new().argument("Flag", ValueType::Logical)),
    )
}

fn datamodel() -> Arc<InMemoryDatamodel> {
    Arc::new(
        InMemoryDatamodel::new()
            .with_namespace("test", schema())
            .with_state("test", "A", json!({ "A1": {}, "A10": {} }))
            .unwrap(),
    )
}

fn session_over(dm: &Arc<InMemoryDatamodel>, config: SessionConfig) -> Session {
    let rpc: Arc<dyn DatamodelRpc> = dm.clone();
    Session::with_rpc(rpc, config)
}

fn session(dm: &Arc<InMemoryDatamodel>) -> Session {
    session_over(dm, SessionConfig::local().with_rules("test"))
}

async fn member(session: &Session, name: &str) -> ObjectNode {
    let root = session.default_root().await.unwrap();
    root.container("A").unwrap().object(name).unwrap()
}

type Log<T> = Arc<Mutex<Vec<T>>>;

fn log<T>() -> Log<T> {
    Arc::new(Mutex::new(Vec::new()))
}

/// Poll `check` until it holds; events arrive on the dispatcher task.
async fn eventually(mut check: impl AsyncFnMut() -> bool) {
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached");
}

// ── Subscription registry ───────────────────────────────────────────

#[tokio::test]
async fn test_callbacks_share_one_remote_subscription() {
    let dm = datamodel();
    let session = session(&dm);
    let a1 = member(&session, "A1").await;
    let seen: Log<u8> = log();

    let first = {
        let seen = Arc::clone(&seen);
        a1.on_created("B", move |_| seen.lock().unwrap().push(1))
            .await
            .unwrap()
    };
    let second = {
        let seen = Arc::clone(&seen);
        a1.on_created("B", move |_| seen.lock().unwrap().push(2))
            .await
            .unwrap()
    };

    let tag = "/test/created/A:A1/B";
    assert_eq!(first.tag(), tag);
    assert_eq!(dm.calls().subscribe_events, 1);
    assert_eq!(session.registry().callback_count(tag).await, 2);
    assert_eq!(dm.active_tags(), vec![tag.to_owned()]);

    a1.set_state(json!({ "B": { "B1": {} } })).await.unwrap();
    eventually(async || { seen.lock().unwrap().len() == 2 }).await;
    assert_eq!(*seen.lock().unwrap(), vec![1, 2]);

    first.unsubscribe().await.unwrap();
    assert_eq!(dm.calls().unsubscribe_events, 0);
    assert_eq!(dm.active_tags(), vec![tag.to_owned()]);

    second.unsubscribe().await.unwrap();
    assert_eq!(dm.calls().unsubscribe_events, 1);
    assert!(dm.active_tags().is_empty());
    assert!(session.registry().active_tags().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_subscribers_share_one_remote_subscription() {
    let dm = datamodel();
    let session = session(&dm);
    let a1 = member(&session, "A1").await;
    dm.set_delay(Duration::from_millis(50));

    let (first, second) = tokio::join!(
        a1.on_created("B", |_| {}),
        a1.on_created("B", |_| {}),
    );
    first.unwrap();
    second.unwrap();

    let tag = "/test/created/A:A1/B";
    assert_eq!(dm.calls().subscribe_events, 1);
    assert_eq!(session.registry().callback_count(tag).await, 2);
    assert_eq!(dm.active_tags(), vec![tag.to_owned()]);
}

#[tokio::test]
async fn test_release_cascades_to_nested_subscriptions() {
    let dm = datamodel();
    let session = session(&dm);
    let a1 = member(&session, "A1").await;
    let a10 = member(&session, "A10").await;

    a1.on_deleted(|_| {}).await.unwrap();
    a1.parameter("X")
        .unwrap()
        .on_modified(|_| {})
        .await
        .unwrap();
    a10.on_modified(|_| {}).await.unwrap();

    assert_eq!(a1.release().await, 2);

    let remaining = vec!["/test/modified/A:A10".to_owned()];
    assert_eq!(session.registry().active_tags().await, remaining);
    assert_eq!(dm.active_tags(), remaining);
}

#[tokio::test]
async fn test_scoped_node_releases_even_on_error() {
    let dm = datamodel();
    let session = session(&dm);
    let a1 = member(&session, "A1").await;

    let result: Result<(), CoreError> = a1
        .scoped(|node| async move {
            node.on_modified(|_| {}).await?;
            node.child("Missing")?;
            Ok(())
        })
        .await;

    assert!(result.unwrap_err().is_addressing());
    assert!(session.registry().active_tags().await.is_empty());
    assert!(dm.active_tags().is_empty());
}

#[tokio::test]
async fn test_rejected_subscription_leaves_no_entry() {
    let dm = datamodel();
    let session = session(&dm);
    let missing = member(&session, "A2").await;

    let err = missing.on_modified(|_| {}).await.unwrap_err();

    assert!(err.is_remote_rejection());
    assert!(session.registry().active_tags().await.is_empty());
    assert!(dm.active_tags().is_empty());

    // The same tag can still be subscribed once the object exists.
    session
        .default_root()
        .await
        .unwrap()
        .set_state(json!({ "A": { "A2": {} } }))
        .await
        .unwrap();
    missing.on_modified(|_| {}).await.unwrap();
    assert_eq!(dm.active_tags(), vec!["/test/modified/A:A2".to_owned()]);
}

#[tokio::test]
async fn test_deleted_callbacks_fire_before_teardown() {
    let dm = datamodel();
    let session = session(&dm);
    let a1 = member(&session, "A1").await;
    let seen: Log<Vec<String>> = log();

    for _ in 0..2 {
        let seen = Arc::clone(&seen);
        a1.on_deleted(move |event| {
            if let EventPayload::Deleted { paths } = &event.payload {
                seen.lock().unwrap().push(paths.clone());
            }
        })
        .await
        .unwrap();
    }
    a1.on_modified(|_| {}).await.unwrap();

    let container = session.default_root().await.unwrap().container("A").unwrap();
    container.delete_object("A1").await.unwrap();

    eventually(async || { seen.lock().unwrap().len() == 2 }).await;
    assert_eq!(
        *seen.lock().unwrap(),
        vec![vec!["A:A1".to_owned()], vec!["A:A1".to_owned()]]
    );
    eventually(async || { session.registry().active_tags().await.is_empty() }).await;
    assert!(dm.active_tags().is_empty());
    assert_eq!(container.object_names().await.unwrap(), vec!["A10".to_owned()]);
}

#[tokio::test]
async fn test_releasing_parent_retires_pending_deleted_subscriptions() {
    let dm = datamodel();
    let session = session(&dm);
    let a1 = member(&session, "A1").await;
    a1.set_state(json!({ "B": { "B1": {} } })).await.unwrap();
    let bs = a1.container("B").unwrap();
    bs.object("B1").unwrap().on_deleted(|_| {}).await.unwrap();

    bs.delete_object("B1").await.unwrap();
    a1.release().await;

    assert!(session.registry().active_tags().await.is_empty());
    assert!(dm.active_tags().is_empty());
}

// ── Dispatch ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_callbacks_run_in_registration_then_receipt_order() {
    let dm = datamodel();
    let session = session(&dm);
    let x = member(&session, "A1").await.parameter("X").unwrap();
    let seen: Log<(u8, Value)> = log();

    for id in 1..=3 {
        let seen = Arc::clone(&seen);
        x.on_modified(move |event| {
            seen.lock()
                .unwrap()
                .push((id, event.state().cloned().unwrap_or_default()));
        })
        .await
        .unwrap();
    }

    x.set_state(json!("a")).await.unwrap();
    x.set_state(json!("b")).await.unwrap();

    eventually(async || { seen.lock().unwrap().len() == 6 }).await;
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (1, json!("a")),
            (2, json!("a")),
            (3, json!("a")),
            (1, json!("b")),
            (2, json!("b")),
            (3, json!("b")),
        ]
    );
}

#[tokio::test]
async fn test_unknown_tags_are_dropped() {
    let dm = datamodel();
    let session = session(&dm);
    let a1 = member(&session, "A1").await;
    let seen: Log<String> = log();
    {
        let seen = Arc::clone(&seen);
        a1.on_modified(move |event| seen.lock().unwrap().push(event.tag.clone()))
            .await
            .unwrap();
    }

    dm.emit(dmlink_api::StreamMessage {
        tag: "/test/modified/A:A99".into(),
        payload: EventPayload::Modified { state: json!({}) },
    });
    a1.parameter("X").unwrap().set_state(json!("v")).await.unwrap();

    eventually(async || { !seen.lock().unwrap().is_empty() }).await;
    assert_eq!(*seen.lock().unwrap(), vec!["/test/modified/A:A1".to_owned()]);
    assert_eq!(session.connection_state().borrow().clone(), ConnectionState::Connected);
}

async fn collect_diffs(config: SessionConfig) -> Vec<Option<StateDiff>> {
    let dm = Arc::new(
        InMemoryDatamodel::new()
            .with_namespace("test", schema())
            .with_state("test", "A:A1", json!({ "B": { "B1": {} } }))
            .unwrap(),
    );
    let session = session_over(&dm, config);
    let a1 = member(&session, "A1").await;
    let diffs: Log<Option<StateDiff>> = log();
    {
        let diffs = Arc::clone(&diffs);
        a1.on_modified(move |event| diffs.lock().unwrap().push(event.diff.clone()))
            .await
            .unwrap();
    }

    let x = a1.parameter("X").unwrap();
    x.set_state(json!("ABC")).await.unwrap();
    x.set_state(json!("DEF")).await.unwrap();
    a1.container("B").unwrap().delete_object("B1").await.unwrap();

    eventually(async || { diffs.lock().unwrap().len() == 3 }).await;
    let out = diffs.lock().unwrap().clone();
    session.close().await;
    out
}

#[tokio::test]
async fn test_diff_mode_reports_changed_and_deleted_keys() {
    let diffs = collect_diffs(SessionConfig::local().with_rules("test")).await;
    assert_eq!(
        diffs,
        vec![
            None,
            Some(StateDiff {
                changed: vec!["X".into()],
                deleted: vec![],
            }),
            Some(StateDiff {
                changed: vec!["B".into()],
                deleted: vec!["B.B1.Y".into()],
            }),
        ]
    );
}

#[tokio::test]
async fn test_diff_mode_off_forwards_raw_payloads() {
    let config = SessionConfig::local()
        .with_rules("test")
        .with_diff_state(false);
    let diffs = collect_diffs(config).await;
    assert_eq!(diffs, vec![None, None, None]);
}

#[tokio::test]
async fn test_watch_yields_events_as_a_stream() {
    let dm = datamodel();
    let session = session(&dm);
    let a1 = member(&session, "A1").await;

    let mut events = a1.watch(EventTarget::Affected { subtype: None }).await.unwrap();
    a1.parameter("X").unwrap().set_state(json!("Q")).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), events.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.tag, "/test/affected/A:A1");
    assert_eq!(event.payload, EventPayload::Affected);

    events.close().await.unwrap();
    assert!(dm.active_tags().is_empty());
}

#[tokio::test]
async fn test_command_executed_carries_arguments() {
    let dm = datamodel();
    let session = session(&dm);
    let a1 = member(&session, "A1").await;
    let seen: Log<Value> = log();
    {
        let seen = Arc::clone(&seen);
        a1.on_command_executed("C", move |event| {
            if let EventPayload::CommandExecuted { arguments, .. } = &event.payload {
                seen.lock().unwrap().push(arguments.clone());
            }
        })
        .await
        .unwrap();
    }

    let mut args = Map::new();
    args.insert("Flag".into(), json!(true));
    a1.execute("C", args).await.unwrap();

    eventually(async || { !seen.lock().unwrap().is_empty() }).await;
    assert_eq!(*seen.lock().unwrap(), vec![json!({ "Flag": true })]);

    let mut bad = Map::new();
    bad.insert("Nope".into(), json!(1));
    assert!(a1.execute("C", bad).await.unwrap_err().is_addressing());
    assert_eq!(dm.calls().execute_command, 1);
}

// ── Stream loss and teardown ────────────────────────────────────────

#[tokio::test]
async fn test_stream_loss_invalidates_subscriptions() {
    let dm = datamodel();
    let session = session(&dm);
    let a1 = member(&session, "A1").await;
    let fired: Log<()> = log();
    {
        let fired = Arc::clone(&fired);
        a1.on_modified(move |_| fired.lock().unwrap().push(()))
            .await
            .unwrap();
    }

    let mut state = session.connection_state();
    dm.fail_stream("server went away");
    let reached = state
        .wait_for(|s| matches!(s, ConnectionState::Disconnected { .. }))
        .await
        .unwrap()
        .clone();
    assert_eq!(
        reached,
        ConnectionState::Disconnected {
            reason: "Event stream ended: server went away".into()
        }
    );

    a1.parameter("X").unwrap().set_state(json!("late")).await.unwrap();
    assert!(fired.lock().unwrap().is_empty());
    assert!(session.registry().active_tags().await.is_empty());

    let err = a1.on_deleted(|_| {}).await.unwrap_err();
    assert!(matches!(err, CoreError::StreamDisconnected { .. }));
    // Unary calls keep working.
    assert_eq!(a1.parameter("X").unwrap().get_state(false).await.unwrap(), json!("late"));
}

#[tokio::test]
async fn test_close_removes_remote_subscriptions() {
    let dm = datamodel();
    let session = session(&dm);
    let a1 = member(&session, "A1").await;
    a1.on_modified(|_| {}).await.unwrap();
    a1.on_deleted(|_| {}).await.unwrap();

    session.close().await;

    assert!(session.is_closed());
    assert!(dm.active_tags().is_empty());
    assert_eq!(session.connection_state().borrow().clone(), ConnectionState::Closed);
    assert!(matches!(
        a1.get_state(false).await.unwrap_err(),
        CoreError::SessionClosed
    ));
}

#[tokio::test(start_paused = true)]
async fn test_unary_calls_time_out() {
    let dm = datamodel();
    let session = session_over(
        &dm,
        SessionConfig::local()
            .with_rules("test")
            .with_timeout(Duration::from_secs(2)),
    );
    let a1 = member(&session, "A1").await;

    dm.set_delay(Duration::from_secs(60));
    let err = a1.get_state(false).await.unwrap_err();
    assert!(matches!(err, CoreError::Timeout { timeout_secs: 2 }));
}

// ── Read-only views and addressing ──────────────────────────────────

#[tokio::test]
async fn test_read_only_view_never_reaches_server() {
    let dm = datamodel();
    let session = session(&dm);
    let a1 = member(&session, "A1").await;
    a1.set_state(json!({ "X": "kept" })).await.unwrap();
    let writes = dm.calls().set_state;

    let view = ReadOnly::new(a1);
    let err = view.set_state(json!({ "X": "changed" })).await.unwrap_err();
    assert!(err.is_read_only_violation());

    let x = view.parameter("X").unwrap();
    assert!(x.set_state(json!("changed")).await.unwrap_err().is_read_only_violation());

    assert_eq!(dm.calls().set_state, writes);
    assert_eq!(x.get_state(false).await.unwrap(), json!("kept"));
}

#[tokio::test]
async fn test_read_only_view_reaches_nested_members() {
    let dm = datamodel();
    let session = session(&dm);
    let a1 = member(&session, "A1").await;
    a1.set_state(json!({ "B": { "B1": { "Y": "deep" } } })).await.unwrap();
    let writes = dm.calls().set_state;

    let bs = ReadOnly::new(a1).container("B").unwrap();
    assert_eq!(bs.object_names().await.unwrap(), vec!["B1".to_owned()]);

    let b1 = bs.object("B1").unwrap();
    let y = b1.parameter("Y").unwrap();
    assert_eq!(y.get_state(false).await.unwrap(), json!("deep"));
    assert!(b1.set_state(json!({ "Y": "changed" })).await.unwrap_err().is_read_only_violation());
    assert_eq!(dm.calls().set_state, writes);
}

#[tokio::test]
async fn test_addressing_errors_are_local() {
    let dm = datamodel();
    let session = session(&dm);
    let root = session.default_root().await.unwrap();
    let before = dm.calls();

    assert!(root.child("Nope").unwrap_err().is_addressing());
    assert!(root.parameter("A").unwrap_err().is_addressing());
    assert!(root.container("A").unwrap().object("bad/name").unwrap_err().is_addressing());
    let a1 = member(&session, "A1").await;
    assert!(a1.on_command_executed("Missing", |_| {}).await.unwrap_err().is_addressing());

    assert_eq!(dm.calls(), before);
}
