//! Per-guest connection lifecycle.
//!
//! Each embedded guest walks a handshake state machine: the frame is
//! attached, the guest signals ready, the host acknowledges and opens an RPC
//! client to the guest's tool server, and the guest's tools are published to
//! the registry. Guests progress independently; one failing handshake never
//! affects another.

use crate::registry::{SourceId, ToolRegistry, ToolSource};
use crate::{Error, Result};
use channel::{GuestFrame, HostMessage, RpcClient, RpcPayload, WindowRef, methods};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Handshake progress for one guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Frame element exists; inbound listener not yet installed.
    Attached,
    /// Listening for the guest's ready signal.
    AwaitingGuestReady,
    /// Ready acknowledged; RPC handshake in flight.
    AwaitingConnect,
    /// RPC handshake complete; tools published.
    Connected,
    /// Torn down by explicit teardown.
    Closed,
    /// Handshake failed terminally.
    Failed,
}

struct GuestConnection {
    frame: Arc<dyn GuestFrame>,
    state: ConnectionState,
    /// Feeds inbound RPC frames to the client's read loop.
    rpc_tx: Option<mpsc::UnboundedSender<RpcPayload>>,
    client: Option<Arc<RpcClient>>,
}

/// Owns every live guest connection, keyed by source id.
pub struct ConnectionManager {
    connections: Mutex<HashMap<SourceId, GuestConnection>>,
    /// Maps a guest's content window back to its stable source id, so
    /// submissions and RPC frames resolve without scanning frames.
    window_index: Mutex<HashMap<WindowRef, SourceId>>,
    registry: Arc<ToolRegistry>,
    rpc_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(registry: Arc<ToolRegistry>, rpc_timeout: Duration) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            window_index: Mutex::new(HashMap::new()),
            registry,
            rpc_timeout,
        }
    }

    /// Attach a guest frame and begin listening for its ready signal.
    ///
    /// At most one connection per source id: a previous connection for the
    /// same id is torn down first.
    pub fn attach(&self, source_id: SourceId, frame: Arc<dyn GuestFrame>) {
        self.detach(&source_id);

        // Installing the entry is what makes the manager listen for this
        // frame's messages, so attachment lands directly in
        // `AwaitingGuestReady`.
        let conn = GuestConnection {
            frame,
            state: ConnectionState::AwaitingGuestReady,
            rpc_tx: None,
            client: None,
        };
        self.connections.lock().insert(source_id, conn);
    }

    /// Tear down a guest connection.
    ///
    /// Safe to call for an unknown id or an already-closed connection. Each
    /// step is independently guarded: a dead transport does not stop the
    /// client close or the registry unpublish.
    pub fn detach(&self, source_id: &SourceId) {
        let conn = self.connections.lock().remove(source_id);
        let Some(conn) = conn else {
            return;
        };

        self.window_index.lock().retain(|_, id| id != source_id);

        if let Some(client) = conn.client {
            client.close();
        }
        // Dropping the sender closes the read-loop channel.
        drop(conn.rpc_tx);

        self.registry
            .unpublish(&ToolSource::Guest(source_id.clone()));
        debug!(%source_id, "guest connection closed");
    }

    /// Current handshake state, if the guest is tracked.
    pub fn state(&self, source_id: &SourceId) -> Option<ConnectionState> {
        self.connections.lock().get(source_id).map(|c| c.state)
    }

    /// Resolve a content window to its guest's source id.
    pub fn source_of(&self, window: &WindowRef) -> Option<SourceId> {
        self.window_index.lock().get(window).cloned()
    }

    /// The guest's frame handle, if tracked.
    pub fn frame(&self, source_id: &SourceId) -> Option<Arc<dyn GuestFrame>> {
        self.connections
            .lock()
            .get(source_id)
            .map(|c| c.frame.clone())
    }

    /// Handle a guest ready signal.
    ///
    /// The signal is matched to the connection whose frame owns the sending
    /// window (messages from any other window are ignored), checked against
    /// the declared origin, acknowledged, and followed by the RPC handshake.
    /// Failures surface as state, never as a panic across this boundary.
    pub async fn handle_ready(self: &Arc<Self>, window: WindowRef, origin: &str) {
        let source_id = {
            let conns = self.connections.lock();
            conns
                .iter()
                .find(|(_, c)| c.frame.window() == Some(window))
                .map(|(id, _)| id.clone())
        };
        let Some(source_id) = source_id else {
            debug!("ready signal from unknown window; ignored");
            return;
        };

        enum Step {
            Connect(Arc<dyn GuestFrame>),
            AckOnly(Arc<dyn GuestFrame>),
        }

        let step = {
            let mut conns = self.connections.lock();
            let Some(conn) = conns.get_mut(&source_id) else {
                return;
            };

            if let Some(expected) = conn.frame.origin() {
                if expected != origin {
                    let e = Error::OriginMismatch {
                        expected,
                        actual: origin.to_string(),
                    };
                    warn!(%source_id, "{e}; ready signal rejected");
                    return;
                }
            }

            match conn.state {
                ConnectionState::Attached | ConnectionState::AwaitingGuestReady => {
                    conn.state = ConnectionState::AwaitingConnect;
                    Step::Connect(conn.frame.clone())
                }
                // Duplicate ready after connect: re-acknowledge, but never
                // open a second transport.
                ConnectionState::Connected => Step::AckOnly(conn.frame.clone()),
                ConnectionState::AwaitingConnect => {
                    debug!(%source_id, "ready received while connect in flight; ignored");
                    return;
                }
                ConnectionState::Closed | ConnectionState::Failed => {
                    debug!(%source_id, state = ?conn.state, "ready for terminal connection; ignored");
                    return;
                }
            }
        };

        self.window_index.lock().insert(window, source_id.clone());

        let frame = match &step {
            Step::Connect(frame) | Step::AckOnly(frame) => frame.clone(),
        };

        // Exactly one acknowledgement per accepted ready signal.
        if let Err(e) = frame.post(&HostMessage::ParentReady) {
            warn!(%source_id, error = %e, "failed to acknowledge ready");
            if matches!(step, Step::Connect(_)) {
                self.fail(&source_id);
            }
            return;
        }

        if matches!(step, Step::AckOnly(_)) {
            return;
        }

        let (rpc_tx, rpc_rx) = mpsc::unbounded_channel();
        {
            let mut conns = self.connections.lock();
            let Some(conn) = conns.get_mut(&source_id) else {
                return;
            };
            conn.rpc_tx = Some(rpc_tx);
        }

        match RpcClient::connect(frame, rpc_rx, self.rpc_timeout).await {
            Ok(client) => self.finish_connect(&source_id, Arc::new(client)).await,
            Err(e) => {
                warn!(%source_id, error = %e, "guest handshake failed");
                self.fail(&source_id);
            }
        }
    }

    /// Route an inbound RPC frame to its connection's read loop.
    pub fn handle_rpc(&self, window: WindowRef, payload: RpcPayload) {
        let Some(source_id) = self.source_of(&window) else {
            debug!("RPC frame from unknown window; ignored");
            return;
        };
        let conns = self.connections.lock();
        let Some(tx) = conns.get(&source_id).and_then(|c| c.rpc_tx.as_ref()) else {
            debug!(%source_id, "RPC frame for guest without transport; ignored");
            return;
        };
        if tx.send(payload).is_err() {
            debug!(%source_id, "RPC frame for closed transport; ignored");
        }
    }

    /// Call a tool on a connected guest.
    pub async fn call_tool(
        &self,
        source_id: &SourceId,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<channel::CallToolResult> {
        // The guest may have disconnected after its tool was listed; that
        // race is reported, never swallowed.
        let client = self
            .connections
            .lock()
            .get(source_id)
            .and_then(|c| c.client.clone())
            .ok_or_else(|| Error::Routing(format!("no connected guest for source '{source_id}'")))?;

        Ok(client.call_tool(name, arguments).await?)
    }

    /// Re-fetch a connected guest's tool list and republish it.
    ///
    /// The only path that updates a source's tools after initial connection;
    /// a full replace, since the guest may have removed tools.
    pub async fn refresh_tools(&self, source_id: &SourceId) {
        let client = {
            let conns = self.connections.lock();
            conns.get(source_id).and_then(|c| c.client.clone())
        };
        let Some(client) = client else {
            debug!(%source_id, "tool refresh for disconnected guest; skipped");
            return;
        };

        match client.list_tools().await {
            Ok(tools) => {
                self.registry
                    .publish(ToolSource::Guest(source_id.clone()), tools);
            }
            Err(e) => warn!(%source_id, error = %e, "failed to fetch guest tools"),
        }
    }

    async fn finish_connect(self: &Arc<Self>, source_id: &SourceId, client: Arc<RpcClient>) {
        {
            let mut conns = self.connections.lock();
            match conns.get_mut(source_id) {
                Some(conn) if conn.state == ConnectionState::AwaitingConnect => {
                    conn.client = Some(client.clone());
                    conn.state = ConnectionState::Connected;
                }
                // Detached (or otherwise moved on) while the handshake was
                // in flight.
                _ => {
                    client.close();
                    return;
                }
            }
        }

        let manager = Arc::clone(self);
        let id = source_id.clone();
        client.set_notification_handler(move |notification| {
            if notification.method != methods::TOOLS_CHANGED {
                debug!(method = %notification.method, "unhandled guest notification");
                return;
            }
            let manager = Arc::clone(&manager);
            let id = id.clone();
            tokio::spawn(async move {
                manager.refresh_tools(&id).await;
            });
        });

        self.refresh_tools(source_id).await;
        debug!(%source_id, "guest connected");
    }

    fn fail(&self, source_id: &SourceId) {
        let mut conns = self.connections.lock();
        if let Some(conn) = conns.get_mut(source_id) {
            if conn.state != ConnectionState::Closed {
                conn.state = ConnectionState::Failed;
                conn.rpc_tx = None;
            }
        }
    }
}
