//! WebSocket observer endpoint.
//!
//! `/ws` upgrades the connection and attaches it to the workflow as a
//! subscriber. The client first receives the current status, then one JSON
//! text frame per change. When the run ends the workflow detaches every
//! subscriber and the server closes the socket with a normal close frame.
//! Frames sent by the client are ignored.

use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

use super::handlers::ApiState;
use crate::events::ChannelSink;
use crate::storage::StatusStore;

/// Upgrade an HTTP request to a status stream.
pub async fn ws_handler<S: StatusStore + 'static>(
    ws: WebSocketUpgrade,
    State(state): State<ApiState<S>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection<S: StatusStore + 'static>(socket: WebSocket, state: ApiState<S>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (sink, mut snapshots) = ChannelSink::new();
    let id = state.workflow.subscribe(Arc::new(sink)).await;
    tracing::debug!(subscriber = %id, "websocket connected");

    let mut run_ended = false;
    loop {
        tokio::select! {
            snapshot = snapshots.recv() => {
                match snapshot {
                    Some(json) => {
                        if ws_sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        run_ended = true;
                        break;
                    }
                }
            }

            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "websocket receive error");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.workflow.unsubscribe(&id).await;

    if run_ended {
        let frame = CloseFrame {
            code: close_code::NORMAL,
            reason: "".into(),
        };
        if let Err(e) = ws_sender.send(Message::Close(Some(frame))).await {
            tracing::debug!(error = %e, "unable to close websocket");
        }
    }
    tracing::debug!(subscriber = %id, "websocket closed");
}
