//! Cross-node messages published on per-node channels.
//!
//! The JSON shape is fixed: `{"type":"USER_RESET","connectionId":"42","data":null}`.
//! Worker nodes consume these from their own channel and act on the
//! connection named in the message.

use serde::{Deserialize, Serialize};

use crate::TypesError;

/// Kind of a [`NodeMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// The connection's assignment is invalid; the node should close it so
    /// the client reconnects and is routed again.
    UserReset,
    /// A payload addressed to a connection held by another node.
    UserMessage,
}

/// A message addressed to the worker node that holds a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMessage {
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Target connection.
    #[serde(rename = "connectionId")]
    pub connection_id: String,
    /// Serialized payload, if any.
    pub data: Option<String>,
}

impl NodeMessage {
    /// A reset notice for `connection_id`.
    pub fn user_reset(connection_id: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::UserReset,
            connection_id: connection_id.into(),
            data: None,
        }
    }

    /// A relayed payload for `connection_id`.
    pub fn user_message(connection_id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::UserMessage,
            connection_id: connection_id.into(),
            data: Some(data.into()),
        }
    }

    /// Encode as JSON.
    pub fn to_json(&self) -> Result<String, TypesError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from JSON.
    pub fn from_json(raw: &str) -> Result<Self, TypesError> {
        Ok(serde_json::from_str(raw)?)
    }
}
