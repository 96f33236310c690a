//! Message channel between a host window and its embedded guest frames.
//!
//! This crate provides the payload types spoken over the channel, the frame
//! abstraction the bridge uses to address a guest, and a JSON-RPC client for
//! the tool server a connected guest runs behind the channel.
//!
//! # Example
//!
//! ```no_run
//! use channel::{ChannelFrame, RpcClient, DEFAULT_RPC_TIMEOUT};
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> channel::Result<()> {
//! let (frame, _host_rx) = ChannelFrame::new(Some("https://guest.example".into()));
//! let (_rpc_tx, rpc_rx) = mpsc::unbounded_channel();
//!
//! let client = RpcClient::connect(frame, rpc_rx, DEFAULT_RPC_TIMEOUT).await?;
//! for tool in client.list_tools().await? {
//!     println!("Tool: {}", tool.name);
//! }
//! client.close();
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod frame;
mod messages;
mod protocol;

pub use client::{DEFAULT_RPC_TIMEOUT, RpcClient};
pub use error::{Error, Result};
pub use frame::{ChannelFrame, GuestFrame, WindowRef};
pub use messages::{
    ContextParams, GuestMessage, HostMessage, InboundEvent, SubmitAction, SubmitParams,
};
pub use protocol::{
    CallToolParams, CallToolResult, ClientInfo, GuestCapabilities, GuestInfo, InitializeParams,
    InitializeResult, ListToolsResult, RequestId, RpcError, RpcNotification, RpcPayload,
    RpcRequest, RpcResponse, Tool, ToolContent, ToolsCapability, methods,
};
