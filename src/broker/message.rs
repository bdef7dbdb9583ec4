use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Represents a published message in the Pub/Sub system.
///
/// A message carries the channel it was delivered through, the payload value,
/// the publish time and an opaque id. One `publish` call to several channels
/// produces one `Message` per channel, all sharing the same `message_id`, so a
/// subscription that merges several channels can tell the sources apart.
///
/// # Fields
///
/// - `channel` - The channel name this copy was routed through.
/// - `payload` - The message value. The in-memory engine passes it as is.
/// - `timestamp` - Milliseconds since the UNIX epoch, set at publish time.
/// - `message_id` - UUID v4 shared by every copy of one publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub channel: String,
    pub payload: Value,
    pub timestamp: i64,
    pub message_id: String,
}

impl Message {
    pub fn new(channel: impl Into<String>, payload: Value) -> Self {
        Self {
            channel: channel.into(),
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
            message_id: Uuid::new_v4().to_string(),
        }
    }

    /// Copy of this message routed through another channel.
    pub(crate) fn routed(&self, channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            ..self.clone()
        }
    }
}
