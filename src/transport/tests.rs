use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tungstenite::protocol::Message as WsMessage;

use super::channels_from_path;
use super::message::{ClientMessage, ServerMessage};
use crate::broker::HubOptions;
use crate::driver::{DriverRegistry, Engine, EngineOptions, HubConfig};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(1);

async fn start_gateway() -> (String, Arc<Engine>) {
    let engine = Arc::new(Engine::new(
        DriverRegistry::with_defaults(HubOptions::default()),
        EngineOptions::default(),
    ));
    engine.init(&HubConfig::default()).await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(super::serve(listener, engine.clone()));

    (format!("ws://{addr}"), engine)
}

async fn connect(base: &str, path: &str) -> Client {
    let (ws, _) = timeout(WAIT, connect_async(format!("{base}{path}")))
        .await
        .expect("connect timed out")
        .expect("connect failed");
    ws
}

async fn send(ws: &mut Client, msg: &ClientMessage) {
    let text = serde_json::to_string(msg).unwrap();
    ws.send(WsMessage::text(text)).await.unwrap();
}

/// Next text frame, decoded. `None` once the server closes.
async fn next_frame(ws: &mut Client) -> Option<Value> {
    timeout(WAIT, async {
        while let Some(frame) = ws.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => return serde_json::from_str(text.as_str()).ok(),
                Ok(WsMessage::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
        None
    })
    .await
    .expect("timed out waiting for frame")
}

#[test]
fn channels_from_path_splits_on_commas_and_slashes() {
    assert_eq!(channels_from_path("/stream/news"), vec!["news"]);
    assert_eq!(channels_from_path("/stream/a,b"), vec!["a", "b"]);
    assert_eq!(channels_from_path("/stream/a/b/"), vec!["a", "b"]);
    assert_eq!(channels_from_path("/stream/a,a,b?x=1"), vec!["a", "b"]);
}

#[test]
fn channels_from_path_rejects_other_paths() {
    assert!(channels_from_path("/").is_empty());
    assert!(channels_from_path("/stream").is_empty());
    assert!(channels_from_path("/stream/").is_empty());
    assert!(channels_from_path("/streamer/news").is_empty());
    assert!(channels_from_path("/other/news").is_empty());
}

#[test]
fn test_client_message_parsing() {
    let publish: ClientMessage =
        serde_json::from_value(json!({"type": "publish", "channels": ["a"], "payload": 1}))
            .unwrap();
    assert!(matches!(publish, ClientMessage::Publish { ref channels, .. } if channels.len() == 1 && channels[0] == "a"));

    let unsub: ClientMessage =
        serde_json::from_value(json!({"type": "unsubscribe", "channel": "a"})).unwrap();
    assert!(matches!(unsub, ClientMessage::Unsubscribe { ref channel } if channel == "a"));

    assert!(serde_json::from_value::<ClientMessage>(json!({"type": "login"})).is_err());
}

#[tokio::test]
async fn gateway_delivers_published_events() {
    let (base, _engine) = start_gateway().await;
    let mut ws = connect(&base, "/stream/news").await;

    send(
        &mut ws,
        &ClientMessage::Publish {
            channels: vec!["news".into()],
            payload: json!({"headline": "hi"}),
        },
    )
    .await;

    let frame = next_frame(&mut ws).await.expect("stream closed");
    assert_eq!(frame["type"], "event");
    assert_eq!(frame["message"]["channel"], "news");
    assert_eq!(frame["message"]["payload"]["headline"], "hi");
}

#[tokio::test]
async fn gateway_answers_bad_frames_and_keeps_the_stream() {
    let (base, _engine) = start_gateway().await;
    let mut ws = connect(&base, "/stream/news").await;

    ws.send(WsMessage::text("not json")).await.unwrap();
    let frame = next_frame(&mut ws).await.expect("stream closed");
    assert_eq!(frame["type"], "error");

    send(
        &mut ws,
        &ClientMessage::Publish {
            channels: vec!["news".into()],
            payload: json!(2),
        },
    )
    .await;
    let frame = next_frame(&mut ws).await.expect("stream closed");
    assert_eq!(frame["type"], "event");
    assert_eq!(frame["message"]["payload"], 2);
}

#[tokio::test]
async fn gateway_rejects_path_without_channels() {
    let (base, _engine) = start_gateway().await;
    let mut ws = connect(&base, "/stream/").await;

    let frame = next_frame(&mut ws).await.expect("expected an error frame");
    assert_eq!(frame["type"], "error");
    assert!(next_frame(&mut ws).await.is_none());
}

#[tokio::test]
async fn gateway_reports_unknown_unsubscribe() {
    let (base, _engine) = start_gateway().await;
    let mut ws = connect(&base, "/stream/news").await;

    send(
        &mut ws,
        &ClientMessage::Unsubscribe {
            channel: "sports".into(),
        },
    )
    .await;
    let frame = next_frame(&mut ws).await.expect("stream closed");
    assert_eq!(frame["type"], "error");
}

#[tokio::test]
async fn engine_cleanup_closes_streams() {
    let (base, engine) = start_gateway().await;
    let mut ws = connect(&base, "/stream/news").await;

    // A round trip guarantees the stream's subscription exists.
    send(
        &mut ws,
        &ClientMessage::Publish {
            channels: vec!["news".into()],
            payload: json!("ready"),
        },
    )
    .await;
    assert!(next_frame(&mut ws).await.is_some());

    engine.cleanup().unwrap();
    assert!(next_frame(&mut ws).await.is_none());
}

#[test]
fn server_message_shape() {
    let frame = ServerMessage::Error {
        message: "boom".into(),
    };
    let value = serde_json::to_value(&frame).unwrap();
    assert_eq!(value, json!({"type": "error", "message": "boom"}));
}
