// WebSocket channel: client <-> session
//
// Each socket gets its own event-bus channel. Outbound events are pumped
// from the bus to the socket; inbound text frames go to the control
// handler. Closing the socket detaches the channel and never touches
// session state.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};
use uuid::Uuid;

use codeforge_core::{handle_frame, SessionAgent};

use crate::sessions::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/sessions/:session_id/ws", get(ws_handler))
        .with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Response, StatusCode> {
    let agent = state
        .registry
        .get(session_id)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, agent)))
}

async fn handle_socket(socket: WebSocket, agent: Arc<SessionAgent>) {
    let (channel_id, mut events_rx) = agent.events().attach().await;
    let (mut socket_tx, mut socket_rx) = socket.split();

    // Outbound pump: bus -> socket (FIFO per channel)
    let send_task = tokio::spawn(async move {
        while let Some(frame) = events_rx.recv().await {
            if socket_tx.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        let _ = socket_tx.close().await;
    });

    // Inbound loop: socket -> control handler
    while let Some(result) = socket_rx.next().await {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                debug!(channel_id = %channel_id, error = %e, "Socket read error (client closed?)");
                break;
            }
        };
        match message {
            Message::Text(text) => handle_frame(&agent, channel_id, &text).await,
            Message::Binary(bytes) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                handle_frame(&agent, channel_id, &text).await;
            }
            Message::Close(_) => break,
            // Axum answers pings itself
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    agent.events().detach(channel_id).await;
    send_task.abort();
    warn!(
        session_id = %agent.session_id(),
        channel_id = %channel_id,
        "Client channel closed"
    );
}
