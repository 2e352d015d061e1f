//! Chat stream protocol: inbound event envelope, outbound control messages,
//! and stream endpoint URL construction.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ChatMessage, ConversationUpdate};

/// Path of the chat stream endpoint on the backend host.
pub const STREAM_PATH: &str = "/ws/chat";

/// Close code for a clean, intentional shutdown.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code used when a connection drops without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Raw shape shared by every inbound frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamEnvelope {
    pub message_type: String,
    #[serde(default)]
    pub data: Value,
}

/// Typed inbound stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    NewMessage(ChatMessage),
    ConversationUpdate(ConversationUpdate),
    /// History replayed by the backend after subscribing.
    ExistingMessages(Vec<ChatMessage>),
    ConnectionEstablished(Value),
    SubscriptionConfirmed { conversation_id: Option<String> },
    Pong,
    Error { message: String },
    /// A `message_type` this client does not consume.
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("invalid `{message_type}` payload: {reason}")]
    Payload { message_type: String, reason: String },
}

impl ServerEvent {
    /// Parse a text frame into a typed event.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let envelope: StreamEnvelope =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: StreamEnvelope) -> Result<Self, ProtocolError> {
        let StreamEnvelope { message_type, data } = envelope;
        let payload_err = |e: serde_json::Error| ProtocolError::Payload {
            message_type: message_type.clone(),
            reason: e.to_string(),
        };

        let event = match message_type.as_str() {
            "new_message" => ServerEvent::NewMessage(serde_json::from_value(data).map_err(payload_err)?),
            "conversation_update" => {
                ServerEvent::ConversationUpdate(serde_json::from_value(data).map_err(payload_err)?)
            }
            "existing_message" => {
                let messages = match data {
                    Value::Array(items) => items
                        .into_iter()
                        .map(serde_json::from_value)
                        .collect::<Result<Vec<ChatMessage>, _>>()
                        .map_err(payload_err)?,
                    Value::Null => Vec::new(),
                    single => vec![serde_json::from_value(single).map_err(payload_err)?],
                };
                ServerEvent::ExistingMessages(messages)
            }
            "connection_established" => ServerEvent::ConnectionEstablished(data),
            "subscription_confirmed" => ServerEvent::SubscriptionConfirmed {
                conversation_id: match data.get("conversation_id") {
                    Some(Value::String(id)) => Some(id.clone()),
                    Some(Value::Number(id)) => Some(id.to_string()),
                    _ => None,
                },
            },
            "pong" => ServerEvent::Pong,
            "error" => ServerEvent::Error {
                message: match &data {
                    Value::String(text) => text.clone(),
                    other => other
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| other.to_string()),
                },
            },
            _ => ServerEvent::Unknown(message_type.clone()),
        };
        Ok(event)
    }

    /// The `message_type` tag this event was parsed from.
    pub fn kind(&self) -> &str {
        match self {
            ServerEvent::NewMessage(_) => "new_message",
            ServerEvent::ConversationUpdate(_) => "conversation_update",
            ServerEvent::ExistingMessages(_) => "existing_message",
            ServerEvent::ConnectionEstablished(_) => "connection_established",
            ServerEvent::SubscriptionConfirmed { .. } => "subscription_confirmed",
            ServerEvent::Pong => "pong",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Unknown(kind) => kind,
        }
    }
}

/// Outbound control messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum ClientCommand {
    Ping,
    SubscribeConversation { conversation_id: String },
    UnsubscribeConversation { conversation_id: String },
}

/// Check if a host (optionally with a port) names a loopback address.
pub fn is_loopback_host(host: &str) -> bool {
    let name = host_name(host);
    if name.eq_ignore_ascii_case("localhost") {
        return true;
    }
    name.parse::<std::net::IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

/// Strip any port and IPv6 brackets from a host string.
fn host_name(host: &str) -> &str {
    let host = host.trim();
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    if host.matches(':').count() > 1 {
        // bare IPv6 literal
        return host;
    }
    host.split(':').next().unwrap_or(host)
}

/// Build the stream endpoint URL for a backend host and credential.
///
/// Returns `None` when any input is blank, which callers treat as "not ready
/// to connect yet". Loopback hosts use `ws:`, everything else `wss:`.
pub fn stream_url(host: &str, session_key: &str, auth_seed: &str) -> Option<String> {
    let host = host
        .trim()
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .trim_start_matches("ws://")
        .trim_start_matches("wss://")
        .trim_end_matches('/');
    if host.is_empty() || session_key.trim().is_empty() || auth_seed.trim().is_empty() {
        return None;
    }

    let scheme = if is_loopback_host(host) { "ws" } else { "wss" };
    let authority = if !host.starts_with('[') && host.matches(':').count() > 1 {
        format!("[{host}]")
    } else {
        host.to_string()
    };

    let mut url = url::Url::parse(&format!("{scheme}://{authority}{STREAM_PATH}")).ok()?;
    url.query_pairs_mut()
        .append_pair("session_key", session_key)
        .append_pair("auth_seed", auth_seed);
    Some(url.to_string())
}
