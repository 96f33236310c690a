//! Host session management.

use crate::config::BridgeConfig;
use crate::connection::ConnectionManager;
use crate::elicitation::{self, ElicitationCoordinator, ElicitationOutcome};
use crate::lifecycle::CleanupRegistry;
use crate::registry::{SourceId, ToolDescriptor, ToolRegistry, ToolSource};
use crate::upstream::UpstreamTools;
use crate::Result;
use channel::{CallToolResult, GuestFrame, GuestMessage, InboundEvent};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

type SizeHandler = Box<dyn Fn(&SourceId, u32, u32) + Send + Sync>;

/// What the agent layer gets back from a routed tool call.
#[derive(Debug)]
pub struct ToolCallOutcome {
    pub result: CallToolResult,
    /// Present when the result requested an elicitation dialog and the
    /// dialog ran to completion.
    pub elicitation: Option<ElicitationOutcome>,
}

/// One host session embedding any number of guests.
///
/// Owns the connection map, tool registry, pending-elicitation set, and
/// cleanup registry for its lifetime; independent sessions are fully
/// isolated, so tests can run many side by side.
pub struct HostSession<U: UpstreamTools> {
    registry: Arc<ToolRegistry>,
    connections: Arc<ConnectionManager>,
    elicitations: Arc<ElicitationCoordinator>,
    cleanups: CleanupRegistry,
    upstream: U,
    size_handler: Mutex<Option<SizeHandler>>,
}

impl<U: UpstreamTools> HostSession<U> {
    /// Create a session with the given config and upstream connection.
    pub fn new(config: BridgeConfig, upstream: U) -> Self {
        let registry = Arc::new(ToolRegistry::new());
        let connections = Arc::new(ConnectionManager::new(
            registry.clone(),
            config.rpc_timeout(),
        ));
        let elicitations = Arc::new(ElicitationCoordinator::new(
            config.elicitation_timeout(),
            config.delivery_retry_interval(),
            config.settle_delay(),
        ));

        Self {
            registry,
            connections,
            elicitations,
            cleanups: CleanupRegistry::new(),
            upstream,
            size_handler: Mutex::new(None),
        }
    }

    /// Attach a guest frame and begin its handshake.
    pub fn attach_guest(&self, source_id: impl Into<SourceId>, frame: Arc<dyn GuestFrame>) {
        let source_id = source_id.into();
        self.connections.attach(source_id.clone(), frame);

        let connections = Arc::clone(&self.connections);
        let id = source_id.clone();
        self.cleanups
            .set_cleanup(source_id, move || connections.detach(&id));
    }

    /// Dismiss a guest: runs its teardown exactly once.
    pub fn remove_guest(&self, source_id: &SourceId) {
        self.cleanups.run(source_id);
    }

    /// Conversation reset: tear down every tracked guest resource.
    pub fn reset(&self) {
        self.cleanups.run_all();
    }

    /// Register a callback for guest size-change hints.
    pub fn set_size_handler(&self, handler: impl Fn(&SourceId, u32, u32) + Send + Sync + 'static) {
        *self.size_handler.lock() = Some(Box::new(handler));
    }

    /// The single inbound dispatcher for everything guests send.
    pub async fn handle_message(&self, event: InboundEvent) {
        match event.message {
            GuestMessage::Ready => {
                self.connections
                    .handle_ready(event.source, &event.origin)
                    .await;
            }
            GuestMessage::Rpc { payload } => self.connections.handle_rpc(event.source, payload),
            GuestMessage::Submit { params } => match self.connections.source_of(&event.source) {
                Some(source_id) => self.elicitations.handle_submission(&source_id, params),
                None => debug!("submission from unknown window; ignored"),
            },
            GuestMessage::SizeChange { width, height } => {
                if let Some(source_id) = self.connections.source_of(&event.source) {
                    if let Some(handler) = &*self.size_handler.lock() {
                        handler(&source_id, width, height);
                    }
                }
            }
        }
    }

    /// Aggregate tool list across the upstream connection and every guest.
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.registry.tools()
    }

    /// Republish the host's own upstream tools.
    pub async fn refresh_upstream_tools(&self) -> Result<()> {
        let tools = self.upstream.list_tools().await?;
        self.registry.publish(ToolSource::Host, tools);
        Ok(())
    }

    /// Route a tool call to its source, then drive any elicitation dialog
    /// the result asks for before reporting back to the agent layer.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
        source: &ToolSource,
    ) -> Result<ToolCallOutcome> {
        let result = match source {
            ToolSource::Host => self.upstream.call_tool(name, arguments).await?,
            ToolSource::Guest(source_id) => {
                self.connections.call_tool(source_id, name, arguments).await?
            }
        };

        let Some(request) = elicitation::detect(&result) else {
            return Ok(ToolCallOutcome {
                result,
                elicitation: None,
            });
        };

        // Only a guest tool's result can be routed back to a guest UI; an
        // upstream result carrying elicitation metadata is the agent
        // layer's to handle.
        let ToolSource::Guest(source_id) = source else {
            warn!(tool = name, "elicitation metadata on an upstream tool result; not driven");
            return Ok(ToolCallOutcome {
                result,
                elicitation: None,
            });
        };

        let Some(frame) = self.connections.frame(source_id) else {
            return Err(crate::Error::Routing(format!(
                "guest '{source_id}' disappeared before its elicitation ran"
            )));
        };

        let outcome = self
            .elicitations
            .register(source_id.clone(), frame, request)
            .await?;

        Ok(ToolCallOutcome {
            result,
            elicitation: Some(outcome),
        })
    }

    /// Connection manager accessor for the embedding layer.
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }
}
