//! Message-channel payloads exchanged between the host and guest frames.
//!
//! Each direction is a closed tagged enum, so inbound dispatch is a total
//! match and a new message kind is a compile-time exercise.

use crate::frame::WindowRef;
use crate::protocol::RpcPayload;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message sent by a guest frame to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum GuestMessage {
    /// The guest's listener is mounted and it is ready to handshake.
    Ready,
    /// Layout hint for the embedding UI.
    SizeChange { width: u32, height: u32 },
    /// Reply to an elicitation context previously posted by the host.
    Submit { params: SubmitParams },
    /// A JSON-RPC frame from the guest's tool server.
    Rpc { payload: RpcPayload },
}

/// A message posted by the host into a guest frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HostMessage {
    /// Acknowledges a guest [`GuestMessage::Ready`] signal.
    ParentReady,
    /// Asks the guest to collect structured input from the user.
    ElicitationContext { params: ContextParams },
    /// A JSON-RPC frame addressed to the guest's tool server.
    Rpc { payload: RpcPayload },
}

/// The guest's answer to an elicitation dialog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitParams {
    pub action: SubmitAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

/// How the user concluded the elicitation dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitAction {
    Accept,
    Decline,
    Cancel,
}

/// Context the guest needs to render an elicitation form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextParams {
    /// Human-readable prompt.
    pub message: String,
    /// Structural schema the submitted content must satisfy.
    pub schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Extra context for the guest's form; carries the validation-error text
    /// on a re-prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// A single unit of guest input handed to the bridge by the embedding
/// environment.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// The content window the message came from.
    pub source: WindowRef,
    /// The origin the message arrived from.
    pub origin: String,
    pub message: GuestMessage,
}
