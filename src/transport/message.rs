use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::broker::Message;

/// Frames a gateway client may send.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "publish")]
    Publish { channels: Vec<String>, payload: Value },

    /// Leave one of the channels the stream was opened with.
    #[serde(rename = "unsubscribe")]
    Unsubscribe { channel: String },
}

/// Frames the gateway sends.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "event")]
    Event { message: Message },

    #[serde(rename = "error")]
    Error { message: String },
}
