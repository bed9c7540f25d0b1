//! # Processing Message Envelope
//!
//! The wire payload for one processing request: `{"task_id": <uuid>, "image_id": <uuid>}`.
//! Validation runs before every encode and after every decode.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{MessagingError, MessagingResult};

/// Envelope carried on the work queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessingMessage {
    /// Task being processed
    pub task_id: Uuid,
    /// Image the task refers to
    pub image_id: Uuid,
}

impl ProcessingMessage {
    /// Create a new envelope (not yet validated)
    pub fn new(task_id: Uuid, image_id: Uuid) -> Self {
        Self { task_id, image_id }
    }

    /// Both identifiers must be non-nil
    pub fn validate(&self) -> MessagingResult<()> {
        if self.task_id.is_nil() {
            return Err(MessagingError::invalid_message("task_id cannot be nil"));
        }
        if self.image_id.is_nil() {
            return Err(MessagingError::invalid_message("image_id cannot be nil"));
        }
        Ok(())
    }

    /// Validate, then encode as JSON bytes
    pub fn to_bytes(&self) -> MessagingResult<Vec<u8>> {
        self.validate()?;
        serde_json::to_vec(self)
            .map_err(|e| MessagingError::invalid_message(format!("encoding failed: {e}")))
    }

    /// Decode JSON bytes, then validate
    ///
    /// Undecodable bytes yield `MalformedMessage`; a decodable envelope with a
    /// nil identifier yields `InvalidMessage`.
    pub fn from_bytes(bytes: &[u8]) -> MessagingResult<Self> {
        let message: Self = serde_json::from_slice(bytes).map_err(|e| {
            MessagingError::malformed_message(format!(
                "failed to decode processing message: {e}"
            ))
        })?;
        message.validate()?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let message = ProcessingMessage::new(Uuid::new_v4(), Uuid::new_v4());
        let bytes = message.to_bytes().unwrap();
        let decoded = ProcessingMessage::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_wire_format() {
        let task_id = Uuid::parse_str("6f1c5d0e-8a4b-4c1e-9d3f-2b7a6e5c4d3b").unwrap();
        let image_id = Uuid::parse_str("0b9e8d7c-6a5f-4e3d-8c2b-1a0f9e8d7c6b").unwrap();
        let bytes = ProcessingMessage::new(task_id, image_id).to_bytes().unwrap();

        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["task_id"], "6f1c5d0e-8a4b-4c1e-9d3f-2b7a6e5c4d3b");
        assert_eq!(json["image_id"], "0b9e8d7c-6a5f-4e3d-8c2b-1a0f9e8d7c6b");
        assert_eq!(json.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_nil_identifiers_rejected_before_encoding() {
        let nil_task = ProcessingMessage::new(Uuid::nil(), Uuid::new_v4());
        assert!(matches!(
            nil_task.to_bytes(),
            Err(MessagingError::InvalidMessage { .. })
        ));

        let nil_image = ProcessingMessage::new(Uuid::new_v4(), Uuid::nil());
        let err = nil_image.validate().unwrap_err();
        assert!(err.to_string().contains("image_id"));
    }

    #[test]
    fn test_unparseable_bytes_are_malformed() {
        let err = ProcessingMessage::from_bytes(b"not-json").unwrap_err();
        assert!(matches!(err, MessagingError::MalformedMessage { .. }));

        let err = ProcessingMessage::from_bytes(br#"{"task_id": "abc"}"#).unwrap_err();
        assert!(matches!(err, MessagingError::MalformedMessage { .. }));
    }

    #[test]
    fn test_decoded_nil_identifier_is_invalid_not_malformed() {
        let payload = format!(
            r#"{{"task_id": "{}", "image_id": "{}"}}"#,
            Uuid::nil(),
            Uuid::new_v4()
        );
        let err = ProcessingMessage::from_bytes(payload.as_bytes()).unwrap_err();
        assert!(matches!(err, MessagingError::InvalidMessage { .. }));
    }
}
