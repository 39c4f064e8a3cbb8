use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::types::{ChatId, Message, UserId};

/// Envelope types the client understands on the push channel.
const INBOUND_TYPES: [&str; 4] = ["message", "typing", "stop_typing", "presence_update"];

/// Envelopes received from the push channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEnvelope {
    /// A newly persisted chat message (also echoed back to its sender)
    Message(Message),

    /// The remote user started typing
    Typing(TypingSignal),

    /// The remote user stopped typing
    StopTyping(TypingSignal),

    /// Someone came online or went offline
    PresenceUpdate(PresenceUpdate),
}

/// Addressing of a `typing` / `stop_typing` envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    pub chat_id: ChatId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
}

/// `presence_update` carries no payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceUpdate {}

/// A message as sent by the client; the server assigns id, sender and time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub chat_id: ChatId,
    pub receiver_id: UserId,
    pub message: String,
}

/// Envelopes sent over the push channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEnvelope {
    Message(OutgoingMessage),
    Typing(TypingSignal),
    StopTyping(TypingSignal),
}

impl InboundEnvelope {
    /// Decode a text frame.
    ///
    /// Frames without a `type`, with a `type` this client does not know, or
    /// whose payload does not match the type are rejected.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?;

        if !INBOUND_TYPES.contains(&kind) {
            return Err(ProtocolError::UnknownType(kind.to_string()));
        }

        Ok(serde_json::from_value(value)?)
    }

    /// Wire name of the envelope type, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Typing(_) => "typing",
            Self::StopTyping(_) => "stop_typing",
            Self::PresenceUpdate(_) => "presence_update",
        }
    }
}

impl OutboundEnvelope {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Typing(_) => "typing",
            Self::StopTyping(_) => "stop_typing",
        }
    }
}
