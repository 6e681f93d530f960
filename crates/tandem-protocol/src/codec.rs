//! JSON text codec for wire messages

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::Message;
use tracing::trace;

/// Maximum message size (16MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Encode a message as a JSON text frame
pub fn encode(message: &Message) -> ProtocolResult<String> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a JSON text frame
pub fn decode(text: &str) -> ProtocolResult<Message> {
    decode_slice(text.as_bytes())
}

/// Decode a JSON frame from raw bytes
pub fn decode_slice(data: &[u8]) -> ProtocolResult<Message> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    let message: Message = serde_json::from_slice(data)?;
    trace!(kind = message.kind(), size = data.len(), "Decoded message");
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_update_key() {
        let msg = decode(r#"{"type":"collab.update_key","path":"a","value":1,"version":2}"#).unwrap();
        assert_eq!(msg.kind(), "collab.update_key");
        assert_eq!(msg.version(), Some(2));
        assert_eq!(msg.path(), Some("a"));
    }

    #[test]
    fn test_encode_is_tagged() {
        let text = encode(&Message::update_key("a.b", json!("x"), true)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "collab.update_key");
        assert_eq!(value["update_awareness"], true);
    }

    #[test]
    fn test_too_large() {
        let data = vec![b' '; MAX_MESSAGE_SIZE + 1];
        assert!(matches!(
            decode_slice(&data),
            Err(ProtocolError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(decode("{not json"), Err(ProtocolError::InvalidJson(_))));
    }
}
