//! Gangway bridge — embedded guest lifecycle and tool orchestration.
//!
//! This crate is the core of the host: it manages the connection lifecycle
//! of every embedded guest, aggregates the tools guests and the upstream
//! connection publish, routes tool calls to the right source, and
//! coordinates elicitation dialogs when a tool result needs validated user
//! input before the agent can continue.
//!
//! # Overview
//!
//! The bridge is organized around these concepts:
//!
//! - **HostSession**: one embedding host; owns everything below and exposes
//!   the verbs the agent layer calls.
//! - **ConnectionManager**: the per-guest handshake state machine
//!   (ready → acknowledge → RPC connect) and teardown.
//! - **ToolRegistry**: the multi-source tool list, replaced wholesale per
//!   source on every publish.
//! - **ElicitationCoordinator**: schema-validated, correlated,
//!   timeout-bounded request/response dialogs with a guest's UI.
//! - **CleanupRegistry**: per-guest teardown procedures, run at most once.
//!
//! # Example
//!
//! ```ignore
//! use bridge::{BridgeConfig, HostSession, NoUpstream};
//! use channel::ChannelFrame;
//!
//! # async fn example() -> bridge::Result<()> {
//! let session = HostSession::new(BridgeConfig::default(), NoUpstream);
//!
//! let (frame, _guest_rx) = ChannelFrame::new(Some("https://game.example".into()));
//! session.attach_guest("dice-game", frame);
//!
//! // ... feed session.handle_message(..) from the embedding environment ...
//!
//! for tool in session.tools() {
//!     println!("{} (from {})", tool.name, tool.source);
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod connection;
mod elicitation;
mod error;
mod lifecycle;
mod registry;
mod session;
mod upstream;

pub use config::BridgeConfig;
pub use connection::{ConnectionManager, ConnectionState};
pub use elicitation::{
    ElicitationCoordinator, ElicitationOutcome, ElicitationRequest, UiHint, detect,
};
pub use error::{Error, Result};
pub use lifecycle::CleanupRegistry;
pub use registry::{SourceId, ToolDescriptor, ToolRegistry, ToolSource};
pub use session::{HostSession, ToolCallOutcome};
pub use upstream::{NoUpstream, UpstreamTools};
