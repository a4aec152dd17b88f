//! Message envelope.
//!
//! The envelope is the unit handed to subscribers and posted by publishers.
//! On the wire it is a JSON object:
//!
//! ```text
//! {"operation_id":"...","error":null,"status":"...","command":"...","data":"<base64>"}
//! ```
//!
//! Keys that are missing from the input decode to empty values, so envelopes
//! produced by older publishers that did not send an operation id still
//! decode.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A decoded envelope, or a placeholder for an envelope that failed to decode.
///
/// A placeholder carries only an operation id and the decode error text; its
/// status, command and data are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Message {
    /// Correlation id propagated from the transport into the payload
    operation_id: String,
    /// Decode failure text, only set on placeholders
    #[serde(deserialize_with = "error_text")]
    error: Option<String>,
    /// Free-form outcome tag
    status: String,
    /// Free-form operation tag
    command: String,
    /// Opaque payload, base64 encoded on the wire
    #[serde(with = "base64_bytes")]
    data: Vec<u8>,
}

impl Message {
    /// Build a regular message.
    pub fn new(
        operation_id: impl Into<String>,
        status: impl Into<String>,
        command: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            error: None,
            status: status.into(),
            command: command.into(),
            data,
        }
    }

    /// Build the in-band placeholder forwarded when a raw item cannot be decoded.
    pub fn decode_failure(operation_id: impl Into<String>, error: &dyn std::error::Error) -> Self {
        Self {
            operation_id: operation_id.into(),
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    /// Decode an envelope from its wire form.
    ///
    /// Always produces a fresh message; on failure nothing is constructed.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(Error::DeserializationFailed)
    }

    /// Encode the envelope into its wire form.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(Error::SerializationFailed)
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn set_operation_id(&mut self, operation_id: impl Into<String>) {
        self.operation_id = operation_id.into();
    }

    /// Return a copy carrying a fresh operation id if this message has none.
    pub fn with_operation_id_or_new(&self) -> Self {
        let mut msg = self.clone();
        if msg.operation_id.is_empty() {
            msg.operation_id = new_operation_id();
        }
        msg
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Generate a new correlation id.
pub fn new_operation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Any non-null `error` value marks the message as an error. Strings are kept
/// as they are; other values keep their JSON text.
fn error_text<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    })
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        // `null` is accepted as an empty payload
        let encoded = Option::<String>::deserialize(deserializer)?;
        match encoded {
            Some(s) => base64::engine::general_purpose::STANDARD
                .decode(s.as_bytes())
                .map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_preserves_fields() {
        let original = Message::new("op-42", "processed", "order.create", b"payload".to_vec());
        let bytes = original.serialize().unwrap();
        let decoded = Message::deserialize(&bytes).unwrap();

        assert_eq!(decoded.operation_id(), "op-42");
        assert_eq!(decoded.status(), "processed");
        assert_eq!(decoded.command(), "order.create");
        assert_eq!(decoded.data(), b"payload");
        assert!(!decoded.is_error());
    }

    #[test]
    fn test_error_roundtrips_by_presence() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let placeholder = Message::decode_failure("op-1", &err);
        let decoded = Message::deserialize(&placeholder.serialize().unwrap()).unwrap();

        assert!(decoded.is_error());
        assert!(decoded.status().is_empty());
        assert!(decoded.command().is_empty());
        assert!(decoded.data().is_empty());
    }

    #[test]
    fn test_any_error_value_marks_message() {
        let decoded = Message::deserialize(br#"{"operation_id":"op","error":{}}"#).unwrap();
        assert!(decoded.is_error());
        assert_eq!(decoded.error(), Some("{}"));

        let decoded = Message::deserialize(br#"{"error":"bad payload"}"#).unwrap();
        assert_eq!(decoded.error(), Some("bad payload"));

        let decoded = Message::deserialize(br#"{"error":null,"command":"ping"}"#).unwrap();
        assert!(!decoded.is_error());
    }

    #[test]
    fn test_wire_format() {
        let msg = Message::new("op", "ok", "cmd", b"hi".to_vec());
        let json: serde_json::Value = serde_json::from_slice(&msg.serialize().unwrap()).unwrap();

        assert_eq!(json["operation_id"], "op");
        assert_eq!(json["error"], serde_json::Value::Null);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["command"], "cmd");
        assert_eq!(json["data"], "aGk=");
    }

    #[test]
    fn test_serialize_is_deterministic() {
        let msg = Message::new("op", "ok", "cmd", vec![1, 2, 3]);
        assert_eq!(msg.serialize().unwrap(), msg.serialize().unwrap());
    }

    #[test]
    fn test_missing_keys_default_to_empty() {
        let decoded = Message::deserialize(br#"{"command":"ping"}"#).unwrap();
        assert_eq!(decoded.command(), "ping");
        assert!(decoded.operation_id().is_empty());
        assert!(decoded.data().is_empty());
        assert!(!decoded.is_error());
    }

    #[test]
    fn test_malformed_input_fails() {
        let inputs: [&[u8]; 4] = [b"not json", b"[1,2]", b"null", br#"{"data":"***"}"#];
        for input in inputs {
            let result = Message::deserialize(input);
            assert!(
                matches!(result, Err(Error::DeserializationFailed(_))),
                "expected failure for {:?}",
                String::from_utf8_lossy(input)
            );
        }
    }

    #[test]
    fn test_with_operation_id_or_new() {
        let msg = Message::new("", "ok", "cmd", Vec::new());
        let tagged = msg.with_operation_id_or_new();
        assert!(msg.operation_id().is_empty());
        assert_eq!(tagged.operation_id().len(), 36);

        let kept = Message::new("fixed", "ok", "cmd", Vec::new()).with_operation_id_or_new();
        assert_eq!(kept.operation_id(), "fixed");
    }
}
