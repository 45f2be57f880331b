//! Integration tests for actorlink against the in-memory actor runtime.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use actorlink::ActorHandle;
use actorlink::Client;
use actorlink::ClientConfig;
use actorlink::CreateOptions;
use actorlink::Encoding;
use actorlink::ErrorKind;
use actorlink::GetOptions;
use actorlink::GetWithIdOptions;
use actorlink::LinkState;
use actorlink::Tags;
use actorlink::blocking;
use actorlink::mock_transport::MockServer;
use actorwire::ToServer;
use anyhow::Context;
use rand::Rng;
use serde_json::Value;
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<BTreeMap<_, _>>()
}

fn setup() -> (MockServer, Client) {
    init_tracing();
    let server = MockServer::new().with_counter();
    let client = Client::with_transport(server.transport(), ClientConfig::default());
    (server, client)
}

async fn counter(client: &Client, room: &str) -> anyhow::Result<ActorHandle> {
    let opts = GetOptions {
        tags: tags(&[("room", room)]),
        ..Default::default()
    };
    client.get("counter", opts).await.context("resolve counter")
}

// --- Test 1: Request/Response ---

#[tokio::test]
async fn test_counter_counts() -> anyhow::Result<()> {
    let (_server, client) = setup();
    let handle = counter(&client, "lobby").await?;

    assert_eq!(handle.action("increment", vec![json!(1)]).await?, json!(1));
    assert_eq!(handle.action("increment", vec![json!(1)]).await?, json!(2));
    assert_eq!(handle.action("getCount", vec![]).await?, json!(2));
    Ok(())
}

#[tokio::test]
async fn test_remote_failures_carry_code_and_metadata() -> anyhow::Result<()> {
    let (_server, client) = setup();
    let handle = counter(&client, "lobby").await?;
    handle.action("increment", vec![json!(3)]).await?;

    let err = handle.action("fail", vec![json!("out of luck")]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteAction);
    let remote = err.remote().context("remote details")?;
    assert_eq!(remote.code, "counter_failure");
    assert_eq!(remote.reason, "out of luck");
    assert_eq!(remote.metadata, Some(json!({ "count": 3 })));

    let err = handle.action("explode", vec![]).await.unwrap_err();
    assert_eq!(err.remote().map(|r| r.code.as_str()), Some("action_not_found"));

    // A failed action does not affect the handle.
    assert_eq!(handle.action("getCount", vec![]).await?, json!(3));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_get_their_own_replies() -> anyhow::Result<()> {
    let (_server, client) = setup();
    let handle = Arc::new(counter(&client, "busy").await?);

    let mut rng = rand::thread_rng();
    let calls: Vec<Value> = (0..64).map(|_| json!(rng.gen_range(1..100))).collect();
    let expected: i64 = calls.iter().filter_map(Value::as_i64).sum();

    let tasks: Vec<_> = calls
        .iter()
        .cloned()
        .map(|arg| {
            let handle = handle.clone();
            tokio::spawn(async move { handle.action("echo", vec![arg]).await })
        })
        .collect();

    for (task, arg) in tasks.into_iter().zip(&calls) {
        assert_eq!(task.await??, json!([arg]));
    }

    let adds: Vec<_> = calls
        .into_iter()
        .map(|arg| {
            let handle = handle.clone();
            tokio::spawn(async move { handle.action("increment", vec![arg]).await })
        })
        .collect();
    let mut seen = Vec::new();
    for task in adds {
        seen.push(task.await??);
    }

    // Every increment observed a distinct running total.
    seen.sort_by_key(|v| v.as_i64());
    seen.dedup();
    assert_eq!(seen.len(), 64);
    assert_eq!(handle.action("getCount", vec![]).await?, json!(expected));
    Ok(())
}

// --- Test 2: Addressing ---

#[tokio::test]
async fn test_tags_select_distinct_instances() -> anyhow::Result<()> {
    let (server, client) = setup();

    let lobby = counter(&client, "lobby").await?;
    let hall = counter(&client, "hall").await?;
    let lobby_again = counter(&client, "lobby").await?;

    assert_ne!(lobby.actor_id(), hall.actor_id());
    assert_eq!(lobby.actor_id(), lobby_again.actor_id());
    assert_eq!(server.actor_count(), 2);

    lobby.action("increment", vec![json!(5)]).await?;
    assert_eq!(hall.action("getCount", vec![]).await?, json!(0));
    assert_eq!(lobby_again.action("getCount", vec![]).await?, json!(5));
    Ok(())
}

#[tokio::test]
async fn test_get_create_and_get_with_id() -> anyhow::Result<()> {
    let (_server, client) = setup();

    let missing = GetOptions {
        tags: tags(&[("room", "attic")]),
        no_create: true,
        ..Default::default()
    };
    let err = client.get("counter", missing).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ActorNotFound);

    let err = client.get("ghost", GetOptions::default()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ActorNotFound);

    let created = client
        .create(
            "counter",
            CreateOptions {
                params: Some(json!({ "start": 10 })),
                ..Default::default()
            },
        )
        .await?;
    let another = client.create("counter", CreateOptions::default()).await?;
    assert_ne!(created.actor_id(), another.actor_id());
    assert_eq!(created.action("increment", vec![]).await?, json!(11));
    assert_eq!(created.action("params", vec![]).await?, json!({ "start": 10 }));

    let by_id = client.get_with_id(created.actor_id(), GetWithIdOptions::default()).await?;
    assert_eq!(by_id.action("getCount", vec![]).await?, json!(11));

    let err = client
        .get_with_id("counter-404", GetWithIdOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ActorNotFound);
    Ok(())
}

#[tokio::test]
async fn test_params_do_not_change_identity() -> anyhow::Result<()> {
    let (_server, client) = setup();

    let first = GetOptions {
        tags: tags(&[("room", "study")]),
        params: Some(json!({ "start": 7 })),
        ..Default::default()
    };
    let second = GetOptions {
        tags: tags(&[("room", "study")]),
        params: Some(json!({ "start": 99 })),
        ..Default::default()
    };

    let a = client.get("counter", first).await?;
    let b = client.get("counter", second).await?;
    assert_eq!(a.actor_id(), b.actor_id());
    assert_eq!(b.action("getCount", vec![]).await?, json!(7));
    Ok(())
}

// --- Test 3: Events ---

#[tokio::test]
async fn test_queued_events_arrive_in_order() -> anyhow::Result<()> {
    let (_server, client) = setup();
    let handle = counter(&client, "lobby").await?;

    handle.subscribe("newCount")?;
    for _ in 0..3 {
        handle.action("increment", vec![json!(1)]).await?;
    }

    let events = handle.receive(Some("newCount"), 3).await?;
    let counts: Vec<Value> = events.into_iter().map(|e| e.payload).collect();
    assert_eq!(counts, vec![json!(1), json!(2), json!(3)]);
    Ok(())
}

#[tokio::test]
async fn test_burst_of_events_keeps_order() -> anyhow::Result<()> {
    let (_server, client) = setup();
    let handle = counter(&client, "lobby").await?;

    handle.subscribe("tick")?;
    handle.action("burst", vec![json!(200)]).await?;

    let ticks = handle.receive(Some("tick"), 200).await?;
    let expected: Vec<Value> = (1..=200).map(|i| json!(i)).collect();
    assert_eq!(ticks.into_iter().map(|e| e.payload).collect::<Vec<_>>(), expected);
    Ok(())
}

#[tokio::test]
async fn test_callbacks_fire_in_registration_order() -> anyhow::Result<()> {
    let (_server, client) = setup();
    let handle = counter(&client, "lobby").await?;
    let log = Arc::new(Mutex::new(Vec::new()));

    for name in ["a", "b"] {
        let log = log.clone();
        handle.on_event("newCount", move |count| log.lock().unwrap().push(format!("{}{}", name, count)))?;
    }

    handle.action("increment", vec![json!(1)]).await?;
    handle.action("increment", vec![json!(1)]).await?;

    // Events are dispatched before the reply that follows them.
    assert_eq!(*log.lock().unwrap(), vec!["a1", "b1", "a2", "b2"]);
    Ok(())
}

#[tokio::test]
async fn test_subscription_is_announced_once_and_before_later_calls() -> anyhow::Result<()> {
    let (server, client) = setup();
    let handle = counter(&client, "lobby").await?;

    handle.on_event("newCount", |_| {})?;
    handle.on_event("newCount", |_| {})?;
    handle.action("increment", vec![]).await?;

    let frames = server.received();
    let subscribes = frames
        .iter()
        .filter(|f| matches!(f, ToServer::Subscribe(s) if s.event_name == "newCount"))
        .count();
    assert_eq!(subscribes, 1);

    let subscribe_at = frames.iter().position(|f| matches!(f, ToServer::Subscribe(_)));
    let call_at = frames.iter().position(|f| matches!(f, ToServer::Call(_)));
    assert!(subscribe_at < call_at);
    assert!(server.is_subscribed(handle.actor_id(), "newCount"));
    Ok(())
}

#[tokio::test]
async fn test_delivery_mode_conflict() -> anyhow::Result<()> {
    let (_server, client) = setup();
    let handle = counter(&client, "lobby").await?;

    handle.on_event("newCount", |_| {})?;
    assert_eq!(handle.subscribe("newCount").unwrap_err().kind(), ErrorKind::SubscriptionConflict);

    handle.subscribe("tick")?;
    assert_eq!(
        handle.on_event("tick", |_| {}).unwrap_err().kind(),
        ErrorKind::SubscriptionConflict
    );
    Ok(())
}

#[tokio::test]
async fn test_receive_timeout_consumes_nothing() -> anyhow::Result<()> {
    let (server, client) = setup();
    let handle = counter(&client, "lobby").await?;
    handle.subscribe("tick")?;
    handle.action("getCount", vec![]).await?;

    server.emit(handle.actor_id(), "tick", json!(1));
    let err = handle
        .receive_timeout(Some("tick"), 2, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);

    let events = handle.receive_timeout(Some("tick"), 1, Duration::from_secs(5)).await?;
    assert_eq!(events[0].payload, json!(1));
    Ok(())
}

#[tokio::test]
async fn test_handles_do_not_share_subscriptions() -> anyhow::Result<()> {
    let (_server, client) = setup();
    let watcher = counter(&client, "lobby").await?;
    let writer = counter(&client, "lobby").await?;
    assert_eq!(watcher.actor_id(), writer.actor_id());

    watcher.subscribe("newCount")?;
    watcher.action("getCount", vec![]).await?;
    writer.action("increment", vec![json!(2)]).await?;

    let events = watcher.receive(Some("newCount"), 1).await?;
    assert_eq!(events[0].payload, json!(2));
    assert_eq!(writer.queued_events(None), 0);
    assert_eq!(writer.receive(None, 1).await.unwrap_err().kind(), ErrorKind::NotSubscribed);
    Ok(())
}

#[tokio::test]
async fn test_messagepack_end_to_end() -> anyhow::Result<()> {
    init_tracing();
    let server = MockServer::with_encoding(Encoding::MessagePack).with_counter();
    let config = ClientConfig::default().with_encoding(Encoding::MessagePack);
    let client = Client::with_transport(server.transport(), config);

    let handle = counter(&client, "binary").await?;
    handle.subscribe("newCount")?;
    assert_eq!(handle.action("increment", vec![json!(41)]).await?, json!(41));
    assert_eq!(handle.action("increment", vec![json!(1)]).await?, json!(42));

    let events = handle.receive(Some("newCount"), 2).await?;
    assert_eq!(events[1].payload, json!(42));
    Ok(())
}

// --- Test 4: Lifecycle ---

#[tokio::test]
async fn test_disconnect_fails_pending_calls() -> anyhow::Result<()> {
    let (server, client) = setup();
    let handle = Arc::new(counter(&client, "lobby").await?);
    handle.subscribe("tick")?;

    let hanging = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.action("hang", vec![]).await })
    };
    let receiving = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.receive(Some("tick"), 1).await })
    };
    // Awaiting a call lets both spawned tasks start waiting.
    handle.action("getCount", vec![]).await?;
    tokio::task::yield_now().await;

    handle.disconnect().await;
    assert_eq!(hanging.await?.unwrap_err().kind(), ErrorKind::Disconnected);
    assert_eq!(receiving.await?.unwrap_err().kind(), ErrorKind::Disconnected);

    assert!(handle.is_closed());
    assert_eq!(handle.state(), LinkState::Closed);
    assert_eq!(handle.action("getCount", vec![]).await.unwrap_err().kind(), ErrorKind::HandleClosed);
    assert_eq!(handle.subscribe("other").unwrap_err().kind(), ErrorKind::HandleClosed);
    assert_eq!(handle.receive(None, 1).await.unwrap_err().kind(), ErrorKind::HandleClosed);

    // Idempotent.
    handle.disconnect().await;
    assert_eq!(server.connections(handle.actor_id()), 0);
    Ok(())
}

#[tokio::test]
async fn test_connection_loss_fails_everything_pending() -> anyhow::Result<()> {
    let (server, client) = setup();
    let handle = Arc::new(counter(&client, "lobby").await?);

    let hanging = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.action("hang", vec![]).await })
    };
    handle.action("getCount", vec![]).await?;

    server.sever();
    assert_eq!(hanging.await?.unwrap_err().kind(), ErrorKind::Disconnected);

    while handle.state() != LinkState::Lost {
        tokio::task::yield_now().await;
    }
    assert_eq!(handle.action("getCount", vec![]).await.unwrap_err().kind(), ErrorKind::Disconnected);

    // No reconnection: a fresh handle is needed.
    let fresh = counter(&client, "lobby").await?;
    assert_eq!(fresh.action("getCount", vec![]).await?, json!(0));
    Ok(())
}

#[tokio::test]
async fn test_stray_frames_do_not_disturb_the_handle() -> anyhow::Result<()> {
    let (server, client) = setup();
    let handle = counter(&client, "lobby").await?;
    handle.subscribe("newCount")?;
    handle.action("getCount", vec![]).await?;

    server.inject(handle.actor_id(), br#"{"type":"result","correlationId":4242,"value":1}"#);
    server.inject(handle.actor_id(), b"garbage");
    server.inject(handle.actor_id(), br#"{"type":"error","code":"maintenance","reason":"soon"}"#);

    assert_eq!(handle.action("increment", vec![json!(1)]).await?, json!(1));
    let events = handle.receive(Some("newCount"), 1).await?;
    assert_eq!(events[0].payload, json!(1));
    assert_eq!(handle.state(), LinkState::Ready);
    Ok(())
}

// --- Test 5: Configuration ---

#[test]
fn test_config_from_toml() -> anyhow::Result<()> {
    let config = ClientConfig::from_toml_str(
        r#"
        endpoint = "https://actors.internal:8443"
        encoding = "msgpack"
        connect_timeout_ms = 2500
        call_timeout_ms = 10000
        event_queue_capacity = 64
        "#,
    )?;

    assert_eq!(config.endpoint, "https://actors.internal:8443");
    assert_eq!(config.encoding, Encoding::MessagePack);
    assert_eq!(config.connect_timeout, Some(Duration::from_millis(2500)));
    assert_eq!(config.call_timeout, Some(Duration::from_secs(10)));
    assert_eq!(config.event_queue_capacity, Some(64));

    let defaults = ClientConfig::from_toml_str("")?;
    assert_eq!(defaults, ClientConfig::default());
    Ok(())
}

#[test]
fn test_config_rejects_bad_values() {
    let err = ClientConfig::from_toml_str(r#"endpoint = "ftp://example.com""#).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);

    let err = ClientConfig::from_toml_str(r#"endpoint = "not a url""#).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);

    let err = ClientConfig::from_toml_str("event_queue_capacity = 0").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);

    let err = ClientConfig::from_toml_str(r#"encoding = "xml""#).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

// --- Test 6: Blocking Facade ---

#[test]
fn test_blocking_counter() -> anyhow::Result<()> {
    init_tracing();
    let server = MockServer::new().with_counter();
    let client = blocking::Client::with_transport(server.transport(), ClientConfig::default())?;

    let handle = client.get("counter", GetOptions::default())?;
    handle.subscribe("newCount")?;
    assert_eq!(handle.action("increment", vec![json!(1)])?, json!(1));
    assert_eq!(handle.action("increment", vec![json!(1)])?, json!(2));

    let events = handle.receive(Some("newCount"), 2)?;
    assert_eq!(events[0].payload, json!(1));
    assert_eq!(events[1].payload, json!(2));

    handle.disconnect();
    assert_eq!(handle.action("getCount", vec![]).unwrap_err().kind(), ErrorKind::HandleClosed);
    Ok(())
}

#[test]
fn test_blocking_callbacks_fire_while_caller_waits() -> anyhow::Result<()> {
    init_tracing();
    let server = MockServer::new().with_counter();
    let client = blocking::Client::with_transport(server.transport(), ClientConfig::default())?;

    let watcher = Arc::new(client.get("counter", GetOptions::default())?);
    let (tx, rx) = std::sync::mpsc::channel();
    watcher.on_event("newCount", move |count| {
        let _ = tx.send(count.clone());
    })?;
    watcher.action("getCount", vec![])?;

    // While this thread is blocked in `hang`, another one drives the actor, waits for the
    // callback, then releases us.
    let writer = client.get("counter", GetOptions::default())?;
    let helper = {
        let watcher = watcher.clone();
        let server = server.clone();
        std::thread::spawn(move || -> anyhow::Result<Value> {
            while !server.received().iter().any(|f| matches!(f, ToServer::Call(c) if c.action == "hang")) {
                std::thread::sleep(Duration::from_millis(5));
            }
            writer.action("increment", vec![json!(9)])?;
            let seen = rx.recv_timeout(Duration::from_secs(5))?;
            watcher.disconnect();
            Ok(seen)
        })
    };

    let blocked = watcher.action("hang", vec![]);
    assert_eq!(blocked.unwrap_err().kind(), ErrorKind::Disconnected);

    let seen = helper.join().map_err(|_| anyhow::anyhow!("helper panicked"))??;
    assert_eq!(seen, json!(9));
    Ok(())
}

#[test]
fn test_blocking_disconnect_unblocks_waiting_thread() -> anyhow::Result<()> {
    init_tracing();
    let server = MockServer::new().with_counter();
    let client = blocking::Client::with_transport(server.transport(), ClientConfig::default())?;
    let handle = Arc::new(client.get("counter", GetOptions::default())?);

    let waiter = {
        let handle = handle.clone();
        std::thread::spawn(move || handle.action("hang", vec![]))
    };
    while !server.received().iter().any(|f| matches!(f, ToServer::Call(c) if c.action == "hang")) {
        std::thread::sleep(Duration::from_millis(5));
    }

    handle.disconnect();
    let outcome = waiter.join().map_err(|_| anyhow::anyhow!("waiter panicked"))?;
    assert_eq!(outcome.unwrap_err().kind(), ErrorKind::Disconnected);
    Ok(())
}
