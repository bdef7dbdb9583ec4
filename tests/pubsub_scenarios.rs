use std::sync::Arc;
use std::time::Duration;

use chanhub::{
    DriverRegistry, Engine, EngineOptions, Hub, HubConfig, HubOptions, MemoryHub, PubSubError,
    Subscription,
};
use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

const WAIT: Duration = Duration::from_secs(1);

async fn next_payload(sub: &mut Subscription) -> Value {
    timeout(WAIT, sub.recv())
        .await
        .expect("timed out waiting for message")
        .expect("subscription ended")
        .payload
}

async fn silent(sub: &mut Subscription) -> bool {
    !matches!(
        timeout(Duration::from_millis(100), sub.recv()).await,
        Ok(Some(_))
    )
}

#[tokio::test]
async fn publish_then_close_fires_close_notify() {
    let hub = MemoryHub::default();
    let mut sub = hub.subscribe(&["test"]).unwrap();

    hub.publish(&["test"], json!("hello"));
    assert_eq!(next_payload(&mut sub).await, json!("hello"));

    let notify = sub.close_notify();
    hub.close().unwrap();
    timeout(WAIT, notify.notified())
        .await
        .expect("close signal did not fire");
    assert!(timeout(WAIT, sub.recv()).await.unwrap().is_none());
}

#[tokio::test]
async fn only_joined_channels_are_delivered() {
    let hub = MemoryHub::default();
    let mut sub = hub.subscribe(&["a", "b"]).unwrap();

    hub.publish(&["a"], json!("x"));
    assert_eq!(next_payload(&mut sub).await, json!("x"));

    hub.publish(&["c"], json!("y"));
    assert!(silent(&mut sub).await);
}

#[tokio::test]
async fn every_subscription_gets_its_own_copy() {
    let hub = MemoryHub::default();
    let mut first = hub.subscribe(&["a"]).unwrap();
    let mut second = hub.subscribe(&["a"]).unwrap();

    hub.publish(&["a"], json!(1));

    assert_eq!(next_payload(&mut first).await, json!(1));
    assert_eq!(next_payload(&mut second).await, json!(1));
}

#[tokio::test]
async fn unsubscribe_keeps_other_channels() {
    let hub = MemoryHub::default();
    let mut sub = hub.subscribe(&["a", "b"]).unwrap();

    assert!(sub.unsubscribe("a"));
    // Same mailbox as the publish below, so it is handled first.
    hub.publish(&["a"], json!("gone"));
    hub.publish(&["b"], json!("kept"));

    assert_eq!(next_payload(&mut sub).await, json!("kept"));
    assert!(silent(&mut sub).await);
}

#[tokio::test]
async fn same_channel_order_is_preserved() {
    let hub = MemoryHub::default();
    let mut sub = hub.subscribe(&["orders"]).unwrap();

    hub.publish(&["orders"], json!("A"));
    hub.publish(&["orders"], json!("B"));

    assert_eq!(next_payload(&mut sub).await, json!("A"));
    assert_eq!(next_payload(&mut sub).await, json!("B"));
}

#[tokio::test]
async fn engine_lifecycle_guards_publish_and_subscribe() {
    let engine = Engine::new(
        DriverRegistry::with_defaults(HubOptions::default()),
        EngineOptions::default(),
    );
    assert!(matches!(
        engine.publish(&["a"], json!(1)),
        Err(PubSubError::EngineUnavailable)
    ));

    engine.init(&HubConfig::with_driver("inproc")).await.unwrap();
    assert_eq!(engine.active_driver().as_deref(), Some("inproc"));

    let mut sub = engine.subscribe(&["a"]).unwrap();
    engine.publish(&["a"], json!(1)).unwrap();
    assert_eq!(next_payload(&mut sub).await, json!(1));

    engine.cleanup().unwrap();
    assert!(timeout(WAIT, sub.recv()).await.unwrap().is_none());
    assert!(matches!(
        engine.subscribe(&["a"]),
        Err(PubSubError::EngineUnavailable)
    ));
}

#[tokio::test]
async fn websocket_clients_exchange_messages() {
    let engine = Arc::new(Engine::new(
        DriverRegistry::with_defaults(HubOptions::default()),
        EngineOptions::default(),
    ));
    engine.init(&HubConfig::default()).await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(chanhub::transport::serve(listener, engine.clone()));

    let (mut ws_a, _) = connect_async(format!("ws://{addr}/stream/chat"))
        .await
        .expect("client A connect");
    let (mut ws_b, _) = connect_async(format!("ws://{addr}/stream/lobby"))
        .await
        .expect("client B connect");

    // Client A echoes one message to itself so its subscription is known to exist.
    let ready = json!({"type": "publish", "channels": ["chat"], "payload": "ready"});
    ws_a.send(WsMessage::text(ready.to_string())).await.unwrap();
    let echoed = next_event(&mut ws_a).await;
    assert_eq!(echoed["message"]["payload"], "ready");

    let hello = json!({"type": "publish", "channels": ["chat"], "payload": {"text": "hi A"}});
    ws_b.send(WsMessage::text(hello.to_string())).await.unwrap();

    let event = next_event(&mut ws_a).await;
    assert_eq!(event["type"], "event");
    assert_eq!(event["message"]["channel"], "chat");
    assert_eq!(event["message"]["payload"]["text"], "hi A");

    engine.cleanup().unwrap();
}

async fn next_event<S>(ws: &mut S) -> Value
where
    S: Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    return serde_json::from_str::<Value>(text.as_str()).unwrap();
                }
                Some(Ok(_)) => continue,
                other => panic!("stream ended: {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
