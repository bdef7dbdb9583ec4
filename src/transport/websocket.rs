//! WebSocket gateway
//!
//! One connection is one subscription:
//! - the handshake path names the channels (`/stream/orders,audit` or
//!   `/stream/orders/audit`)
//! - every delivered message goes out as a `ServerMessage::Event` text frame
//! - `ClientMessage` frames from the client publish or leave a channel; a
//!   frame that fails to decode is answered with an error and dropped
//! - the subscription is closed as soon as the client disconnects, and the
//!   socket is closed when the subscription ends (hub or engine shutdown)

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};
use tracing::{debug, info, warn};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::broker::{Message, Subscription};
use crate::driver::{Engine, encoding};
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::Result;

/// Path prefix of the streaming endpoint.
pub const STREAM_PREFIX: &str = "/stream";

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;

enum Step {
    Deliver(Option<Message>),
    Frame(Option<std::result::Result<WsMessage, tungstenite::Error>>),
}

/// Channel names encoded in a request path, deduplicated, in order.
/// Empty when the path is not under [`STREAM_PREFIX`] or names no channel.
pub fn channels_from_path(path: &str) -> Vec<String> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let Some(rest) = path.strip_prefix(STREAM_PREFIX) else {
        return Vec::new();
    };
    if !rest.is_empty() && !rest.starts_with('/') {
        return Vec::new();
    }

    let mut channels: Vec<String> = Vec::new();
    for name in rest.split(['/', ',']).map(str::trim).filter(|s| !s.is_empty()) {
        if !channels.iter().any(|c| c == name) {
            channels.push(name.to_string());
        }
    }
    channels
}

pub async fn start_websocket_server(addr: &str, engine: Arc<Engine>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("WebSocket gateway listening on ws://{}{}/<channel>", addr, STREAM_PREFIX);
    serve(listener, engine).await
}

/// Accept connections on `listener` until accepting fails.
pub async fn serve(listener: TcpListener, engine: Arc<Engine>) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        tokio::spawn(handle_connection(stream, peer, engine.clone()));
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, engine: Arc<Engine>) {
    let mut path = String::new();
    let callback = |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
        path = req.uri().path().to_string();
        Ok(resp)
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, error = %e, "WebSocket handshake error");
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let channels = channels_from_path(&path);
    if channels.is_empty() {
        reject(&mut ws_sender, format!("no channel in path {path}")).await;
        return;
    }

    let names: Vec<&str> = channels.iter().map(String::as_str).collect();
    let mut subscription = match engine.subscribe(&names) {
        Ok(sub) => sub,
        Err(e) => {
            reject(&mut ws_sender, e.to_string()).await;
            return;
        }
    };

    let client_id = format!("client-{}", Uuid::new_v4());
    info!(client = %client_id, %peer, channels = ?channels, "stream opened");

    loop {
        let step = tokio::select! {
            msg = subscription.recv() => Step::Deliver(msg),
            frame = ws_receiver.next() => Step::Frame(frame),
        };

        match step {
            Step::Deliver(Some(message)) => {
                if let Err(e) = send_frame(&mut ws_sender, &ServerMessage::Event { message }).await
                {
                    debug!(client = %client_id, error = %e, "failed to send event");
                    break;
                }
            }
            Step::Deliver(None) => {
                let _ = ws_sender.send(WsMessage::Close(None)).await;
                break;
            }
            Step::Frame(Some(Ok(WsMessage::Text(text)))) => {
                handle_client_frame(&engine, &subscription, &client_id, text.as_str(), &mut ws_sender)
                    .await;
            }
            Step::Frame(Some(Ok(WsMessage::Close(_)))) | Step::Frame(None) => break,
            Step::Frame(Some(Ok(_))) => {}
            Step::Frame(Some(Err(e))) => {
                debug!(client = %client_id, error = %e, "connection error");
                break;
            }
        }
    }

    let _ = subscription.close();
    info!(client = %client_id, "stream closed");
}

async fn handle_client_frame(
    engine: &Engine,
    subscription: &Subscription,
    client_id: &str,
    text: &str,
    ws_sender: &mut WsSink,
) {
    let reply = match encoding::decode::<ClientMessage>(text.as_bytes()) {
        Ok(ClientMessage::Publish { channels, payload }) => {
            let names: Vec<&str> = channels.iter().map(String::as_str).collect();
            match engine.publish(&names, payload) {
                Ok(()) => {
                    debug!(client = %client_id, channels = ?channels, "published");
                    None
                }
                Err(e) => Some(e.to_string()),
            }
        }
        Ok(ClientMessage::Unsubscribe { channel }) => {
            if subscription.unsubscribe(&channel) {
                debug!(client = %client_id, channel = %channel, "unsubscribed");
                None
            } else {
                Some(format!("not subscribed to {channel}"))
            }
        }
        Err(e) => {
            warn!(client = %client_id, error = %e, "invalid client message");
            Some(format!("invalid client message: {e}"))
        }
    };

    if let Some(message) = reply {
        let _ = send_frame(ws_sender, &ServerMessage::Error { message }).await;
    }
}

async fn send_frame(
    ws_sender: &mut WsSink,
    frame: &ServerMessage,
) -> std::result::Result<(), tungstenite::Error> {
    match encoding::encode_text(frame) {
        Ok(text) => ws_sender.send(WsMessage::text(text)).await,
        Err(e) => {
            warn!(error = %e, "dropping frame that failed to encode");
            Ok(())
        }
    }
}

async fn reject(ws_sender: &mut WsSink, message: String) {
    warn!(reason = %message, "stream rejected");
    let _ = send_frame(ws_sender, &ServerMessage::Error { message }).await;
    let _ = ws_sender.send(WsMessage::Close(None)).await;
}
