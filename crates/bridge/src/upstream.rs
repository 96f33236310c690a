//! Upstream tool connection trait.

use crate::Result;
use channel::{CallToolResult, Tool};
use serde_json::Value;
use std::future::Future;

/// The host's own upstream tool connection.
///
/// This is the boundary to the agent's model-side tooling: the bridge lists
/// and calls, it never owns the connection's lifecycle.
pub trait UpstreamTools: Send + Sync {
    /// Tool specifications the upstream connection currently offers.
    fn list_tools(&self) -> impl Future<Output = Result<Vec<Tool>>> + Send;

    /// Execute an upstream tool call.
    fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> impl Future<Output = Result<CallToolResult>> + Send;
}

/// Upstream connection with no tools, for hosts that only surface guests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoUpstream;

impl UpstreamTools for NoUpstream {
    async fn list_tools(&self) -> Result<Vec<Tool>> {
        Ok(Vec::new())
    }

    async fn call_tool(&self, name: &str, _arguments: Option<Value>) -> Result<CallToolResult> {
        Err(crate::Error::Routing(format!(
            "no upstream connection for tool '{name}'"
        )))
    }
}
