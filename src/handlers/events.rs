//! WebSocket endpoint for live job status events.
//!
//! The client authenticates at the handshake with `?token=<jwt>`; the
//! connection is then registered under the token's user id and receives
//! that user's `job-completed` / `job-failed` events until it closes.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::jwt;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Bearer token, passed as a query parameter at the handshake
    pub token: String,
}

/// `GET /ws?token=…`
pub async fn ws(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let claims = jwt::verify_token(&params.token, &state.config().jwt.secret)?;
    info!(user_id = %claims.sub, email = %claims.email, "websocket connected");
    Ok(ws.on_upgrade(move |socket| run_connection(socket, state, claims.sub)))
}

/// Per-connection loop: forward notifier events out, answer pings, stop
/// on close.
async fn run_connection(socket: WebSocket, state: AppState, user_id: Uuid) {
    let (connection_id, mut events) = state.notifier().subscribe(user_id).await;
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            event = events.recv() => {
                match event {
                    Some(payload) => {
                        if sink.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    state.notifier().unsubscribe(user_id, connection_id).await;
    debug!(user_id = %user_id, connection_id, "websocket disconnected");
}
