//! Operator WebSocket: outbound event stream, inbound speech acks and
//! voice toggles.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::state::AppState;

/// Messages the operator UI may send back to the agent.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperatorMessage {
    /// Playback of the identified speech request has finished.
    TtsDone { id: String },
    /// Runtime voice toggle.
    TtsToggle { enabled: bool },
}

pub async fn handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("operator connected");
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.controller.events().subscribe();

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let text = match serde_json::to_string(&event) {
                            Ok(text) => text,
                            Err(err) => {
                                warn!(error = %err, "event serialisation failed");
                                continue;
                            }
                        };
                        if sender.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "operator stream lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<OperatorMessage>(text.as_str()) {
                            Ok(OperatorMessage::TtsDone { id }) => {
                                debug!(id = %id, "speech ack received");
                                state.controller.speech_ack(&id);
                            }
                            Ok(OperatorMessage::TtsToggle { enabled }) => {
                                info!(enabled, "voice toggled by operator");
                                state.controller.set_voice(enabled);
                            }
                            Err(err) => debug!(error = %err, "ignoring unknown operator message"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(error = %err, "operator socket error");
                        break;
                    }
                }
            }
        }
    }
    info!("operator disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_messages_parse() {
        match serde_json::from_str::<OperatorMessage>(r#"{"type":"tts_done","id":"abc"}"#).unwrap()
        {
            OperatorMessage::TtsDone { id } => assert_eq!(id, "abc"),
            other => panic!("unexpected: {other:?}"),
        }
        match serde_json::from_str::<OperatorMessage>(r#"{"type":"tts_toggle","enabled":false}"#)
            .unwrap()
        {
            OperatorMessage::TtsToggle { enabled } => assert!(!enabled),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_operator_message_is_an_error() {
        assert!(serde_json::from_str::<OperatorMessage>(r#"{"type":"reboot"}"#).is_err());
    }
}
