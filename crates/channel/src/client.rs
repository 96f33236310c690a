//! JSON-RPC client bound to a guest frame.
//!
//! Outbound frames are posted into the guest frame as [`HostMessage::Rpc`];
//! inbound frames are fed by the connection layer into the receiver passed
//! to [`RpcClient::connect`]. Responses are correlated to in-flight requests
//! by id; notifications go to the registered handler.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::frame::GuestFrame;
use crate::messages::HostMessage;
use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, ListToolsResult, RequestId,
    RpcNotification, RpcPayload, RpcRequest, Tool, methods,
};
use crate::{Error, Result};

/// Default bound for a single RPC round trip.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(15);

type NotificationHandler = Arc<dyn Fn(RpcNotification) + Send + Sync>;
type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<crate::protocol::RpcResponse>>>>;

/// JSON-RPC client for a connected guest's tool server.
pub struct RpcClient {
    frame: Arc<dyn GuestFrame>,
    next_id: AtomicI64,
    pending: PendingMap,
    handler: Arc<Mutex<Option<NotificationHandler>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    request_timeout: Duration,
    info: Mutex<Option<InitializeResult>>,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient").finish_non_exhaustive()
    }
}

impl RpcClient {
    /// Open a client over the given frame and perform the initialize
    /// handshake.
    ///
    /// `inbound` must be fed every [`RpcPayload`] the guest sends over the
    /// message channel.
    pub async fn connect(
        frame: Arc<dyn GuestFrame>,
        inbound: mpsc::UnboundedReceiver<RpcPayload>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let handler: Arc<Mutex<Option<NotificationHandler>>> = Arc::new(Mutex::new(None));
        let reader = spawn_reader(inbound, pending.clone(), handler.clone());

        let client = Self {
            frame,
            next_id: AtomicI64::new(1),
            pending,
            handler,
            reader: Mutex::new(Some(reader)),
            request_timeout,
            info: Mutex::new(None),
        };

        let init: InitializeResult = match client
            .request(methods::INITIALIZE, Some(InitializeParams::default()))
            .await
        {
            Ok(init) => init,
            Err(e) => {
                client.close();
                return Err(Error::HandshakeFailed(e.to_string()));
            }
        };

        client.notify(methods::INITIALIZED, None::<()>)?;
        *client.info.lock() = Some(init);

        Ok(client)
    }

    /// Guest identification captured during the handshake.
    pub fn guest_info(&self) -> Option<InitializeResult> {
        self.info.lock().clone()
    }

    /// Register the handler invoked for every notification from the guest.
    ///
    /// Replaces any previously registered handler.
    pub fn set_notification_handler(
        &self,
        handler: impl Fn(RpcNotification) + Send + Sync + 'static,
    ) {
        *self.handler.lock() = Some(Arc::new(handler));
    }

    /// List the tools the guest currently publishes.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        let result: ListToolsResult = self.request(methods::LIST_TOOLS, None::<()>).await?;
        Ok(result.tools)
    }

    /// Call a tool by name.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };

        let result: CallToolResult = self.request(methods::CALL_TOOL, Some(params)).await?;

        if result.is_error {
            let error_text = result
                .content
                .iter()
                .filter_map(|c| c.as_text())
                .collect::<Vec<_>>()
                .join("\n");
            return Err(Error::ToolCallFailed(error_text));
        }

        Ok(result)
    }

    /// Close the client.
    ///
    /// Idempotent: aborts the read loop and fails every in-flight request
    /// with [`Error::Closed`]. Safe to call on an already-closed client.
    pub fn close(&self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        // Dropping the senders wakes every waiter with Closed.
        self.pending.lock().clear();
    }

    // --- Internal methods ---

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R>
    where
        P: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_request_id();
        let mut request = RpcRequest::new(id.clone(), method);
        if let Some(p) = params {
            request = request.with_params(p);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);

        if let Err(e) = self.frame.post(&HostMessage::Rpc {
            payload: RpcPayload::Request(request),
        }) {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        let response = match timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(Error::Closed),
            Err(_) => {
                self.pending.lock().remove(&id);
                return Err(Error::Timeout);
            }
        };

        let result_value = response.into_result()?;
        let result: R = serde_json::from_value(result_value)?;

        Ok(result)
    }

    fn notify<P>(&self, method: &str, params: Option<P>) -> Result<()>
    where
        P: serde::Serialize,
    {
        let mut notification = RpcNotification::new(method);
        if let Some(p) = params {
            notification = notification.with_params(p);
        }
        self.frame.post(&HostMessage::Rpc {
            payload: RpcPayload::Notification(notification),
        })
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_reader(
    mut inbound: mpsc::UnboundedReceiver<RpcPayload>,
    pending: PendingMap,
    handler: Arc<Mutex<Option<NotificationHandler>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(payload) = inbound.recv().await {
            match payload {
                RpcPayload::Response(response) => {
                    let waiter = pending.lock().remove(&response.id);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(response);
                        }
                        None => debug!(id = ?response.id, "response with no pending request"),
                    }
                }
                RpcPayload::Notification(notification) => {
                    let handler = handler.lock().clone();
                    match handler {
                        Some(handler) => handler(notification),
                        None => {
                            debug!(method = %notification.method, "notification with no handler")
                        }
                    }
                }
                RpcPayload::Request(request) => {
                    warn!(method = %request.method, "guest-initiated request is not supported");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ChannelFrame;
    use crate::protocol::RpcResponse;
    use serde_json::json;

    /// Runs the guest side of the channel: answers initialize and tools/list,
    /// echoes tools/call arguments back as text content.
    fn spawn_guest(
        mut host_rx: mpsc::UnboundedReceiver<HostMessage>,
        guest_tx: mpsc::UnboundedSender<RpcPayload>,
    ) {
        tokio::spawn(async move {
            while let Some(message) = host_rx.recv().await {
                let HostMessage::Rpc {
                    payload: RpcPayload::Request(request),
                } = message
                else {
                    continue;
                };
                let result = match request.method.as_str() {
                    methods::INITIALIZE => json!({
                        "protocolVersion": "2025-03-26",
                        "capabilities": {"tools": {"listChanged": true}},
                        "guestInfo": {"name": "test-guest"}
                    }),
                    methods::LIST_TOOLS => json!({
                        "tools": [{"name": "echo", "inputSchema": {"type": "object"}}]
                    }),
                    methods::CALL_TOOL => json!({
                        "content": [{"type": "text", "text": "echoed"}]
                    }),
                    _ => continue,
                };
                let _ = guest_tx.send(RpcPayload::Response(RpcResponse::success(
                    request.id, result,
                )));
            }
        });
    }

    async fn connected_client() -> (RpcClient, mpsc::UnboundedSender<RpcPayload>) {
        let (frame, host_rx) = ChannelFrame::new(None);
        let (guest_tx, guest_rx) = mpsc::unbounded_channel();
        spawn_guest(host_rx, guest_tx.clone());
        let client = RpcClient::connect(frame, guest_rx, DEFAULT_RPC_TIMEOUT)
            .await
            .expect("handshake should succeed");
        (client, guest_tx)
    }

    #[tokio::test]
    async fn handshake_captures_guest_info() {
        let (client, _guest_tx) = connected_client().await;
        let info = client.guest_info().expect("info after handshake");
        assert_eq!(info.guest_info.name, "test-guest");
    }

    #[tokio::test]
    async fn list_tools_round_trip() {
        let (client, _guest_tx) = connected_client().await;
        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
    }

    #[tokio::test]
    async fn call_tool_round_trip() {
        let (client, _guest_tx) = connected_client().await;
        let result = client
            .call_tool("echo", Some(json!({"text": "hi"})))
            .await
            .unwrap();
        assert_eq!(result.content[0].as_text(), Some("echoed"));
    }

    #[tokio::test]
    async fn notification_reaches_handler() {
        let (client, guest_tx) = connected_client().await;
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        client.set_notification_handler(move |n| {
            let _ = seen_tx.send(n.method);
        });

        let _ = guest_tx.send(RpcPayload::Notification(RpcNotification::new(
            methods::TOOLS_CHANGED,
        )));

        let method = seen_rx.recv().await.unwrap();
        assert_eq!(method, methods::TOOLS_CHANGED);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_handshake_times_out() {
        // A frame whose guest never replies.
        let (frame, _host_rx) = ChannelFrame::new(None);
        let (_guest_tx, guest_rx) = mpsc::unbounded_channel();

        let err = RpcClient::connect(frame, guest_rx, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HandshakeFailed(_)));
    }

    #[tokio::test]
    async fn close_fails_in_flight_requests() {
        // A guest that answers the handshake, then goes silent.
        let (frame, _host_rx) = ChannelFrame::new(None);
        let (guest_tx, guest_rx) = mpsc::unbounded_channel();
        let _ = guest_tx.send(RpcPayload::Response(RpcResponse::success(
            1i64,
            json!({
                "protocolVersion": "2025-03-26",
                "guestInfo": {"name": "quiet-guest"}
            }),
        )));

        let client = Arc::new(
            RpcClient::connect(frame, guest_rx, DEFAULT_RPC_TIMEOUT)
                .await
                .unwrap(),
        );

        let caller = client.clone();
        let in_flight = tokio::spawn(async move { caller.list_tools().await });
        tokio::task::yield_now().await;
        client.close();
        let err = in_flight.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Closed));
    }
}
