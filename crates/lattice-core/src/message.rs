//! The wire message exchanged with clients and between instances.

use serde::{Deserialize, Serialize};

/// A routable message.
///
/// The wire representation is a UTF-8 JSON object with the field names
/// `message`, `target_ids`, `source_id` and `type`. The payload is opaque to
/// the gateway; only handler chains may interpret `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Opaque payload.
    #[serde(rename = "message")]
    pub body: String,

    /// Recipient client ids, in the order the sender listed them. May be
    /// empty and may contain duplicates; dispatch deduplicates.
    #[serde(default)]
    pub target_ids: Vec<String>,

    /// Client id of the originator.
    #[serde(default)]
    pub source_id: String,

    /// Integer tag interpreted by handler chains only.
    #[serde(rename = "type", default)]
    pub kind: i64,
}

impl Message {
    /// Creates a message with no targets.
    pub fn new(body: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            target_ids: Vec::new(),
            source_id: source_id.into(),
            kind: 0,
        }
    }

    /// Returns a copy addressed to `target_ids`, preserving body, source and
    /// kind. Used when fan-out regroups a message per instance.
    pub fn with_targets(&self, target_ids: Vec<String>) -> Self {
        Self {
            body: self.body.clone(),
            target_ids,
            source_id: self.source_id.clone(),
            kind: self.kind,
        }
    }

    /// Decodes a message from a raw frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Encodes the message for the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_field_names() {
        let msg = Message {
            body: "hi".into(),
            target_ids: vec!["b".into()],
            source_id: "a".into(),
            kind: 7,
        };

        let value: serde_json::Value = serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(value["message"], "hi");
        assert_eq!(value["target_ids"][0], "b");
        assert_eq!(value["source_id"], "a");
        assert_eq!(value["type"], 7);
    }

    #[test]
    fn decode_fills_missing_fields() {
        let msg = Message::from_bytes(br#"{"message":"x"}"#).unwrap();
        assert_eq!(msg.body, "x");
        assert!(msg.target_ids.is_empty());
        assert_eq!(msg.source_id, "");
        assert_eq!(msg.kind, 0);
    }

    #[test]
    fn round_trip() {
        let msg = Message {
            body: "payload".into(),
            target_ids: vec!["b".into(), "c".into(), "b".into()],
            source_id: "a".into(),
            kind: -3,
        };
        let decoded = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn with_targets_preserves_body_and_source() {
        let msg = Message {
            body: "payload".into(),
            target_ids: vec!["b".into(), "c".into()],
            source_id: "a".into(),
            kind: 2,
        };
        let narrowed = msg.with_targets(vec!["c".into()]);
        assert_eq!(narrowed.body, "payload");
        assert_eq!(narrowed.source_id, "a");
        assert_eq!(narrowed.kind, 2);
        assert_eq!(narrowed.target_ids, vec!["c".to_string()]);
    }
}
