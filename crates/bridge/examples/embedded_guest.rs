//! Quick demo of a host session with one in-process guest.
//!
//! Run with: cargo run --example embedded_guest

use bridge::{BridgeConfig, HostSession, NoUpstream, ToolSource};
use channel::{
    ChannelFrame, GuestMessage, HostMessage, InboundEvent, RpcPayload, RpcResponse, SubmitAction,
    SubmitParams, methods,
};
use serde_json::json;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Starting host session with a simulated guest...\n");

    let session = Arc::new(HostSession::new(BridgeConfig::default(), NoUpstream));

    // An in-process frame stands in for the embedded guest document.
    let (frame, mut host_rx) = ChannelFrame::new(Some("https://dice.example".to_string()));
    let window = frame.attach_window();
    session.attach_guest("dice", frame);

    // The guest side: answer the handshake, serve one tool, accept any
    // elicitation with a fixed roll.
    let guest_session = session.clone();
    tokio::spawn(async move {
        while let Some(message) = host_rx.recv().await {
            let reply = match message {
                HostMessage::ParentReady => {
                    println!("guest: host acknowledged ready");
                    continue;
                }
                HostMessage::ElicitationContext { params } => {
                    println!("guest: elicitation prompt: {}", params.message);
                    GuestMessage::Submit {
                        params: SubmitParams {
                            action: SubmitAction::Accept,
                            content: Some(json!({"sides": 20})),
                        },
                    }
                }
                HostMessage::Rpc {
                    payload: RpcPayload::Request(request),
                } => {
                    let result = match request.method.as_str() {
                        methods::INITIALIZE => json!({
                            "protocolVersion": "2025-03-26",
                            "capabilities": {"tools": {"listChanged": false}},
                            "guestInfo": {"name": "dice-guest", "version": "1.0.0"}
                        }),
                        methods::LIST_TOOLS => json!({
                            "tools": [{
                                "name": "roll_dice",
                                "description": "Roll the dice shown in the game board",
                                "inputSchema": {"type": "object"}
                            }]
                        }),
                        methods::CALL_TOOL => json!({
                            "content": [{"type": "text", "text": "rolling..."}],
                            "_meta": {"elicitation": {
                                "message": "How many sides should the die have?",
                                "requestedSchema": {
                                    "type": "object",
                                    "required": ["sides"],
                                    "properties": {"sides": {"type": "integer"}}
                                }
                            }}
                        }),
                        _ => continue,
                    };
                    GuestMessage::Rpc {
                        payload: RpcPayload::Response(RpcResponse::success(request.id, result)),
                    }
                }
                HostMessage::Rpc { .. } => continue,
            };
            guest_session
                .handle_message(InboundEvent {
                    source: window,
                    origin: "https://dice.example".to_string(),
                    message: reply,
                })
                .await;
        }
    });

    // The guest signals ready; the session runs the whole handshake.
    session
        .handle_message(InboundEvent {
            source: window,
            origin: "https://dice.example".to_string(),
            message: GuestMessage::Ready,
        })
        .await;

    println!("Discovered tools:");
    for tool in session.tools() {
        println!("  - {} (from {})", tool.name, tool.source);
        if let Some(desc) = &tool.description {
            println!("    {desc}");
        }
    }

    println!("\nCalling roll_dice...");
    let outcome = session
        .call_tool("roll_dice", None, &ToolSource::guest("dice"))
        .await?;

    for content in &outcome.result.content {
        if let Some(text) = content.as_text() {
            println!("Result: {text}");
        }
    }
    if let Some(elicitation) = outcome.elicitation {
        println!(
            "Elicited input: action={:?}, content={}",
            elicitation.action,
            elicitation.content.unwrap_or_default()
        );
    }

    session.reset();
    println!("\nDone!");
    Ok(())
}
