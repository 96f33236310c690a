//! Channel error types.

use crate::protocol::RpcError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("frame is gone (detached or closed)")]
    FrameGone,

    #[error("connection closed")]
    Closed,

    #[error("timeout waiting for response")]
    Timeout,

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("tool call failed: {0}")]
    ToolCallFailed(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, Error>;
