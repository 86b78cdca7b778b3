use serde::{Deserialize, Serialize};

use crate::constants::MessageType;
use crate::messages::ErrorPayload;

/// Envelope for all socket communication: `{type, payload?}`.
///
/// The `payload` field uses `serde_json::value::RawValue` to defer
/// deserialization until the message type has been dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<serde_json::value::RawValue>>,
}

impl Envelope {
    /// Creates an envelope with the given type and payload.
    pub fn new<T: Serialize>(
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        let raw = match payload {
            Some(p) => {
                let json = serde_json::to_string(p)?;
                Some(serde_json::value::RawValue::from_string(json)?)
            }
            None => None,
        };
        Ok(Self { msg_type, payload: raw })
    }

    /// Deserializes the payload into the given type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(
        &self,
    ) -> Result<Option<T>, serde_json::Error> {
        match &self.payload {
            Some(raw) => Ok(Some(serde_json::from_str(raw.get())?)),
            None => Ok(None),
        }
    }

    /// Creates a `pong` envelope.
    pub fn pong() -> Self {
        Self {
            msg_type: MessageType::Pong,
            payload: None,
        }
    }

    /// Creates an `error {message}` envelope.
    pub fn error(message: impl Into<String>) -> Self {
        let payload = ErrorPayload {
            message: message.into(),
        };
        // ErrorPayload serialization cannot fail.
        Self::new(MessageType::Error, Some(&payload)).unwrap_or(Self {
            msg_type: MessageType::Error,
            payload: None,
        })
    }
}
