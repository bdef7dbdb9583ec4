//! CLI for chanhub
//!
//! Subcommands:
//! - `server`: run the WebSocket gateway over the configured engine
//! - `publish`: publish one payload through a running gateway (smoke test)

use std::process::ExitCode;
use std::sync::Arc;

use chanhub::config::load_config;
use chanhub::driver::{DriverRegistry, Engine};
use chanhub::transport::message::{ClientMessage, ServerMessage};
use chanhub::transport::start_websocket_server;
use chanhub::utils::logging;
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "chanhub")]
enum Command {
    /// Start the WebSocket gateway
    Server,
    /// Publish a JSON payload to a channel and print the echoed event
    Publish {
        /// Gateway URL (default: ws://127.0.0.1:4302)
        #[arg(long, default_value = "ws://127.0.0.1:4302")]
        url: String,
        /// Channel to publish to
        channel: String,
        /// JSON payload; plain text is sent as a string
        payload: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    let cmd = Command::parse();

    match cmd {
        Command::Server => {
            if let Err(e) = run_server().await {
                // Settings may have failed to load before logging was set up.
                logging::init("info");
                error!("Server failed: {}", e);
                return ExitCode::FAILURE;
            }
        }
        Command::Publish {
            url,
            channel,
            payload,
        } => {
            logging::init("info");
            if let Err(e) = run_publish(&url, &channel, &payload).await {
                error!("Publish failed: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    logging::init(&config.log.level);

    let registry = DriverRegistry::with_defaults(config.hub_options());
    let engine = Arc::new(Engine::new(registry, config.engine_options()));
    engine.init(&config.driver).await?;

    let addr = config.server_addr();
    tokio::select! {
        res = start_websocket_server(&addr, engine.clone()) => {
            if let Err(e) = res {
                error!("WebSocket gateway exited: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    engine.cleanup()?;
    Ok(())
}

async fn run_publish(
    url: &str,
    channel: &str,
    payload: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let payload = serde_json::from_str(payload)
        .unwrap_or_else(|_| serde_json::Value::String(payload.to_string()));

    let stream_url = format!("{}/stream/{}", url.trim_end_matches('/'), channel);
    let (mut ws_stream, _response) = connect_async(stream_url.as_str()).await?;

    let publish = ClientMessage::Publish {
        channels: vec![channel.to_string()],
        payload,
    };
    ws_stream
        .send(WsMessage::text(serde_json::to_string(&publish)?))
        .await?;

    // The stream is subscribed to the same channel, so the event comes back.
    while let Some(frame) = ws_stream.next().await {
        if let WsMessage::Text(text) = frame? {
            match serde_json::from_str::<ServerMessage>(text.as_str())? {
                ServerMessage::Event { message } => {
                    println!("{}", serde_json::to_string_pretty(&message)?);
                }
                ServerMessage::Error { message } => {
                    error!("Gateway error: {}", message);
                }
            }
            break;
        }
    }

    ws_stream.close(None).await?;
    Ok(())
}
