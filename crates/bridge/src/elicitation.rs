//! Elicitation coordination.
//!
//! An elicitation is a host-mediated request for structured user input,
//! delegated to a guest's UI: the host posts the prompt and schema into the
//! frame, the guest renders a form, and the user's submission comes back
//! over the message channel. The coordinator owns the pending set, validates
//! submissions against the requested schema, re-prompts on invalid content,
//! and bounds every dialog with a timeout.

use crate::registry::SourceId;
use crate::{Error, Result};
use channel::{CallToolResult, ContextParams, GuestFrame, HostMessage, SubmitAction, SubmitParams};
use jsonschema::Validator;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, warn};
use uuid::Uuid;

/// Elicitation parameters carried in a tool result's metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct ElicitationRequest {
    /// Human-readable prompt shown to the user.
    pub message: String,
    /// Structural schema the final answer must satisfy.
    #[serde(rename = "requestedSchema")]
    pub requested_schema: Value,
    #[serde(default)]
    pub ui: Option<UiHint>,
}

/// Optional hint about which guest UI should collect the input and how.
#[derive(Debug, Clone, Deserialize)]
pub struct UiHint {
    pub uri: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
}

/// How an elicitation concluded.
#[derive(Debug, Clone, PartialEq)]
pub struct ElicitationOutcome {
    pub action: SubmitAction,
    /// Present only for an accepted, schema-valid submission.
    pub content: Option<Value>,
}

/// Inspect a tool result for elicitation metadata.
///
/// Pure: reads `_meta.elicitation`, never mutates the result.
pub fn detect(result: &CallToolResult) -> Option<ElicitationRequest> {
    let request = result.meta.as_ref()?.get("elicitation")?;
    match serde_json::from_value(request.clone()) {
        Ok(request) => Some(request),
        Err(e) => {
            debug!(error = %e, "malformed elicitation metadata; ignored");
            None
        }
    }
}

struct PendingElicitation {
    /// Correlation id distinguishing this dialog from any later one for the
    /// same guest.
    id: Uuid,
    message: String,
    requested_schema: Value,
    validator: Validator,
    mode: Option<String>,
    frame: Arc<dyn GuestFrame>,
    resolve: oneshot::Sender<Result<ElicitationOutcome>>,
    created_at: Instant,
}

/// Manages outstanding elicitation dialogs, at most one per guest.
pub struct ElicitationCoordinator {
    pending: Mutex<HashMap<SourceId, PendingElicitation>>,
    timeout: Duration,
    retry_interval: Duration,
    settle_delay: Duration,
}

impl ElicitationCoordinator {
    pub fn new(timeout: Duration, retry_interval: Duration, settle_delay: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
            retry_interval,
            settle_delay,
        }
    }

    /// Start an elicitation dialog with `source_id`'s guest and await its
    /// outcome.
    ///
    /// Delivery waits for the frame's content window to attach, then posts
    /// the context once after a short settle delay. The await is bounded by
    /// the configured timeout; on expiry the entry is removed and the caller
    /// gets [`Error::ElicitationTimeout`]. A guest with a dialog already
    /// pending is rejected with [`Error::ElicitationInFlight`].
    pub async fn register(
        self: &Arc<Self>,
        source_id: SourceId,
        frame: Arc<dyn GuestFrame>,
        request: ElicitationRequest,
    ) -> Result<ElicitationOutcome> {
        let validator = Validator::new(&request.requested_schema)
            .map_err(|e| Error::ElicitationRejected(format!("invalid requested schema: {e}")))?;

        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.contains_key(&source_id) {
                return Err(Error::ElicitationInFlight(source_id.to_string()));
            }
            pending.insert(
                source_id.clone(),
                PendingElicitation {
                    id,
                    message: request.message.clone(),
                    requested_schema: request.requested_schema.clone(),
                    validator,
                    mode: request.ui.as_ref().and_then(|u| u.mode.clone()),
                    frame,
                    resolve: tx,
                    created_at: Instant::now(),
                },
            );
        }

        self.spawn_delivery(source_id.clone(), id);

        match timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::ElicitationRejected(
                "coordinator dropped the dialog".to_string(),
            )),
            Err(_) => {
                let mut pending = self.pending.lock();
                // Guarded by correlation id so a newer dialog for the same
                // guest is never collected by an old timer.
                if pending.get(&source_id).is_some_and(|p| p.id == id) {
                    pending.remove(&source_id);
                }
                Err(Error::ElicitationTimeout)
            }
        }
    }

    /// Process a guest's submission.
    ///
    /// A submission with no matching pending entry is ignored: late replies
    /// after timeout removal are expected noise, not errors.
    pub fn handle_submission(&self, source_id: &SourceId, params: SubmitParams) {
        let mut pending = self.pending.lock();

        let Some(entry) = pending.get(source_id) else {
            debug!(%source_id, "submission with no pending elicitation; ignored");
            return;
        };

        // A validation failure keeps the entry pending and re-prompts the
        // guest with the error text; the timeout clock is not reset.
        if params.action == SubmitAction::Accept {
            if let Some(content) = &params.content {
                if !entry.validator.is_valid(content) {
                    let joined = entry
                        .validator
                        .iter_errors(content)
                        .map(|e| format!("{}: {}", e.instance_path, e))
                        .collect::<Vec<_>>()
                        .join("; ");
                    let id = entry.id;
                    drop(pending);
                    debug!(%source_id, errors = %joined, "elicitation content invalid; re-prompting");
                    self.send_context(source_id, id, Some(joined));
                    return;
                }
            }
        }

        // Terminal: the entry comes out of the map before it resolves, so a
        // second identical submission finds nothing and is ignored.
        if let Some(entry) = pending.remove(source_id) {
            drop(pending);
            debug!(
                %source_id,
                action = ?params.action,
                elapsed = ?entry.created_at.elapsed(),
                "elicitation resolved"
            );
            let outcome = match (params.action, params.content) {
                (SubmitAction::Accept, Some(content)) => Ok(ElicitationOutcome {
                    action: SubmitAction::Accept,
                    content: Some(content),
                }),
                (SubmitAction::Accept, None) => Err(Error::ElicitationRejected(
                    "accept submission without content".to_string(),
                )),
                // Cancel and decline resolve without content no matter what
                // the submission carried.
                (action, _) => Ok(ElicitationOutcome {
                    action,
                    content: None,
                }),
            };
            let _ = entry.resolve.send(outcome);
        }
    }

    /// Whether `source_id` currently has a dialog pending.
    pub fn is_pending(&self, source_id: &SourceId) -> bool {
        self.pending.lock().contains_key(source_id)
    }

    fn spawn_delivery(self: &Arc<Self>, source_id: SourceId, id: Uuid) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            // The frame element can exist before its content window does;
            // poll until the guest can receive, bailing out if the dialog
            // was resolved or timed out meanwhile.
            loop {
                let frame = {
                    let pending = coordinator.pending.lock();
                    match pending.get(&source_id) {
                        Some(p) if p.id == id => p.frame.clone(),
                        _ => return,
                    }
                };
                if frame.window().is_some() {
                    break;
                }
                sleep(coordinator.retry_interval).await;
            }

            // Give the guest's own listener a beat to mount.
            sleep(coordinator.settle_delay).await;
            coordinator.send_context(&source_id, id, None);
        });
    }

    fn send_context(&self, source_id: &SourceId, id: Uuid, context: Option<String>) {
        // Clone out what the post needs; never hold the lock while posting.
        let (frame, params) = {
            let pending = self.pending.lock();
            let Some(entry) = pending.get(source_id).filter(|p| p.id == id) else {
                return;
            };
            let params = ContextParams {
                message: entry.message.clone(),
                schema: entry.requested_schema.clone(),
                mode: entry.mode.clone(),
                context,
            };
            (entry.frame.clone(), params)
        };
        if let Err(e) = frame.post(&HostMessage::ElicitationContext { params }) {
            warn!(%source_id, error = %e, "failed to deliver elicitation context");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use channel::ChannelFrame;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn coordinator() -> Arc<ElicitationCoordinator> {
        Arc::new(ElicitationCoordinator::new(
            Duration::from_secs(300),
            Duration::from_millis(10),
            Duration::from_millis(5),
        ))
    }

    fn color_request() -> ElicitationRequest {
        ElicitationRequest {
            message: "Pick a color".to_string(),
            requested_schema: json!({
                "type": "object",
                "required": ["color"],
                "properties": {"color": {"type": "string"}}
            }),
            ui: None,
        }
    }

    fn submit(action: SubmitAction, content: Option<Value>) -> SubmitParams {
        SubmitParams { action, content }
    }

    /// Drains host messages from a frame, forwarding elicitation contexts.
    fn collect_contexts(
        mut rx: mpsc::UnboundedReceiver<HostMessage>,
    ) -> mpsc::UnboundedReceiver<ContextParams> {
        let (tx, out) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let HostMessage::ElicitationContext { params } = message {
                    let _ = tx.send(params);
                }
            }
        });
        out
    }

    #[tokio::test]
    async fn accept_with_valid_content_resolves() {
        let coordinator = coordinator();
        let (frame, rx) = ChannelFrame::new(None);
        frame.attach_window();
        let mut contexts = collect_contexts(rx);

        let source = SourceId::new("picker");
        let dialog = {
            let coordinator = coordinator.clone();
            let frame = frame.clone();
            let source = source.clone();
            tokio::spawn(async move { coordinator.register(source, frame, color_request()).await })
        };

        // The context must arrive before any submission makes sense.
        let context = contexts.recv().await.unwrap();
        assert_eq!(context.message, "Pick a color");
        assert!(context.context.is_none());

        coordinator.handle_submission(
            &source,
            submit(SubmitAction::Accept, Some(json!({"color": "#336699"}))),
        );

        let outcome = dialog.await.unwrap().unwrap();
        assert_eq!(outcome.action, SubmitAction::Accept);
        assert_eq!(outcome.content, Some(json!({"color": "#336699"})));
        assert!(!coordinator.is_pending(&source));
    }

    #[tokio::test]
    async fn cancel_resolves_without_content() {
        let coordinator = coordinator();
        let (frame, rx) = ChannelFrame::new(None);
        frame.attach_window();
        let mut contexts = collect_contexts(rx);

        let source = SourceId::new("picker");
        let dialog = {
            let coordinator = coordinator.clone();
            let frame = frame.clone();
            let source = source.clone();
            tokio::spawn(async move { coordinator.register(source, frame, color_request()).await })
        };
        contexts.recv().await.unwrap();

        // Content on a cancel is dropped, not validated.
        coordinator.handle_submission(
            &source,
            submit(SubmitAction::Cancel, Some(json!({"junk": true}))),
        );

        let outcome = dialog.await.unwrap().unwrap();
        assert_eq!(outcome.action, SubmitAction::Cancel);
        assert!(outcome.content.is_none());

        // A second identical submission finds nothing to resolve.
        coordinator.handle_submission(&source, submit(SubmitAction::Cancel, None));
    }

    #[tokio::test]
    async fn invalid_content_reprompts_and_stays_pending() {
        let coordinator = coordinator();
        let (frame, rx) = ChannelFrame::new(None);
        frame.attach_window();
        let mut contexts = collect_contexts(rx);

        let source = SourceId::new("picker");
        let dialog = {
            let coordinator = coordinator.clone();
            let frame = frame.clone();
            let source = source.clone();
            tokio::spawn(async move { coordinator.register(source, frame, color_request()).await })
        };
        contexts.recv().await.unwrap();

        // Missing the required "color" key.
        coordinator.handle_submission(&source, submit(SubmitAction::Accept, Some(json!({}))));

        // Re-prompt carries the validation error, and the dialog stays open.
        let reprompt = contexts.recv().await.unwrap();
        assert!(reprompt.context.is_some());
        assert!(coordinator.is_pending(&source));

        // A corrected submission then resolves it.
        coordinator.handle_submission(
            &source,
            submit(SubmitAction::Accept, Some(json!({"color": "#336699"}))),
        );
        let outcome = dialog.await.unwrap().unwrap();
        assert_eq!(outcome.content, Some(json!({"color": "#336699"})));
    }

    #[tokio::test]
    async fn accept_without_content_rejects() {
        let coordinator = coordinator();
        let (frame, rx) = ChannelFrame::new(None);
        frame.attach_window();
        let mut contexts = collect_contexts(rx);

        let source = SourceId::new("picker");
        let dialog = {
            let coordinator = coordinator.clone();
            let frame = frame.clone();
            let source = source.clone();
            tokio::spawn(async move { coordinator.register(source, frame, color_request()).await })
        };
        contexts.recv().await.unwrap();

        coordinator.handle_submission(&source, submit(SubmitAction::Accept, None));

        let err = dialog.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::ElicitationRejected(_)));
        assert!(!coordinator.is_pending(&source));
    }

    #[tokio::test]
    async fn submission_for_unknown_source_is_ignored() {
        let coordinator = coordinator();
        coordinator.handle_submission(
            &SourceId::new("nobody"),
            submit(SubmitAction::Accept, Some(json!({"color": "red"}))),
        );
    }

    #[tokio::test]
    async fn second_dialog_for_same_guest_is_rejected() {
        let coordinator = coordinator();
        let (frame, rx) = ChannelFrame::new(None);
        frame.attach_window();
        let _contexts = collect_contexts(rx);

        let source = SourceId::new("picker");
        let _dialog = {
            let coordinator = coordinator.clone();
            let frame = frame.clone();
            let source = source.clone();
            tokio::spawn(async move { coordinator.register(source, frame, color_request()).await })
        };
        tokio::task::yield_now().await;

        let err = coordinator
            .register(source.clone(), frame, color_request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ElicitationInFlight(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn unresolved_dialog_times_out_and_is_removed() {
        let coordinator = coordinator();
        let (frame, _rx) = ChannelFrame::new(None);
        frame.attach_window();

        let source = SourceId::new("picker");
        let err = coordinator
            .register(source.clone(), frame, color_request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ElicitationTimeout));
        assert!(!coordinator.is_pending(&source));

        // A late reply for the removed dialog is ignored.
        coordinator.handle_submission(
            &source,
            submit(SubmitAction::Accept, Some(json!({"color": "red"}))),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn delivery_waits_for_content_window() {
        let coordinator = coordinator();
        let (frame, rx) = ChannelFrame::new(None);
        let mut contexts = collect_contexts(rx);

        let source = SourceId::new("picker");
        let dialog = {
            let coordinator = coordinator.clone();
            let frame = frame.clone();
            let source = source.clone();
            tokio::spawn(async move { coordinator.register(source, frame, color_request()).await })
        };

        // No window yet, so nothing can have been delivered.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(contexts.try_recv().is_err());

        frame.attach_window();
        let context = contexts.recv().await.unwrap();
        assert_eq!(context.message, "Pick a color");

        coordinator.handle_submission(&source, submit(SubmitAction::Decline, None));
        let outcome = dialog.await.unwrap().unwrap();
        assert_eq!(outcome.action, SubmitAction::Decline);
    }

    #[test]
    fn detect_reads_metadata_without_mutation() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "pick something"}],
            "_meta": {
                "elicitation": {
                    "message": "Pick a color",
                    "requestedSchema": {"type": "object"},
                    "ui": {"uri": "ui://picker", "mode": "inline"}
                }
            }
        }))
        .unwrap();

        let request = detect(&result).unwrap();
        assert_eq!(request.message, "Pick a color");
        assert_eq!(request.ui.unwrap().mode.as_deref(), Some("inline"));

        // Still detectable: detect never consumed or cleared the metadata.
        assert!(detect(&result).is_some());
    }

    #[test]
    fn detect_none_without_metadata() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "plain"}]
        }))
        .unwrap();
        assert!(detect(&result).is_none());
    }
}
