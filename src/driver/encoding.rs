//! Payload encoding for messages that leave the process.
//!
//! The in-memory hub passes values as they are; anything that crosses a
//! transport (a broker driver, the websocket gateway) goes through JSON here.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::utils::Result;

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub fn encode_text<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    serde_json::from_slice(data).map_err(|e| {
        warn!(error = %e, len = data.len(), "payload decode failed");
        e.into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Message;
    use crate::utils::PubSubError;
    use serde_json::json;

    #[test]
    fn message_survives_encoding() {
        let msg = Message::new("orders", json!({ "id": 7, "items": ["a", "b"] }));
        let bytes = encode(&msg).unwrap();
        let back: Message = decode(&bytes).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn malformed_payload_is_an_encoding_error() {
        let err = decode::<Message>(b"{not json").unwrap_err();
        assert!(matches!(err, PubSubError::Encoding(_)));
    }
}
