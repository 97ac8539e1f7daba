//! `GET /stream`: the WebSocket push channel.
//!
//! Encryption is decided once, at the handshake, from the
//! `X-Courier-Encrypted` header or `?encrypted=1`, and holds for the life of
//! the connection. Outbound frames are queued by the hub and written by a
//! dedicated writer task; the socket's read half stays in this task.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use courier_shared::crypto::EnvelopeCipher;
use courier_shared::protocol::{ClientSignal, ServerEvent};

use crate::api::AppState;
use crate::envelope::wants_encryption;
use crate::error::{ServerError, HOST_FAILED};
use crate::host::HostError;
use crate::hub::ConnectionId;

/// Protocol-level ping cadence.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    encrypted: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Open,
    Closing,
    Closed,
}

pub async fn stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<StreamQuery>,
) -> Result<Response, ServerError> {
    let encrypted = wants_encryption(&headers)
        || matches!(query.encrypted.as_deref(), Some("1" | "true"));
    if state.config.require_encryption && !encrypted {
        return Err(ServerError::EncryptionRequired);
    }

    let cipher = encrypted.then(|| state.cipher.clone());
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, cipher)))
}

async fn handle_socket(socket: WebSocket, state: AppState, cipher: Option<EnvelopeCipher>) {
    let (id, rx) = state.hub.add(cipher.clone()).await;
    let (sink, mut stream) = socket.split();
    let mut writer = tokio::spawn(write_loop(id, sink, rx));
    let mut conn_state = ConnectionState::Open;

    while conn_state == ConnectionState::Open {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    handle_signal(&state, id, &text, cipher.as_ref()).await;
                }
                Some(Ok(Message::Close(_))) | None => conn_state = ConnectionState::Closing,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(connection = %id, error = %e, "read failed");
                    conn_state = ConnectionState::Closing;
                }
            },
            _ = &mut writer => conn_state = ConnectionState::Closing,
        }
    }

    state.hub.remove(id).await;
    writer.abort();
    conn_state = ConnectionState::Closed;
    tracing::info!(connection = %id, state = ?conn_state, "stream closed");
}

async fn write_loop(
    id: ConnectionId,
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<String>,
) {
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + PING_INTERVAL, PING_INTERVAL);
    loop {
        let result = tokio::select! {
            frame = rx.recv() => match frame {
                Some(text) => sink.send(Message::Text(text)).await,
                None => break,
            },
            _ = ping.tick() => sink.send(Message::Ping(Vec::new())).await,
        };
        if let Err(e) = result {
            tracing::debug!(connection = %id, error = %e, "write failed");
            break;
        }
    }
    let _ = sink.close().await;
}

async fn handle_signal(state: &AppState, id: ConnectionId, text: &str, cipher: Option<&EnvelopeCipher>) {
    let signal = match ClientSignal::from_wire(text, cipher) {
        Ok(signal) => signal,
        Err(e) => {
            tracing::debug!(connection = %id, error = %e, "bad client frame");
            reply_error(state, id, e.to_string()).await;
            return;
        }
    };

    match signal {
        ClientSignal::Ping => {
            state.hub.send_to(id, &ServerEvent::Pong).await;
        }
        ClientSignal::Typing {
            conversation_id,
            active,
        } => {
            tracing::debug!(connection = %id, conversation_id, active, "typing");
        }
        ClientSignal::MarkRead { conversation_id } => {
            if let Err(e) = state.host.mark_read(&conversation_id).await {
                tracing::warn!(connection = %id, conversation_id, error = %e, "mark-read failed");
                reply_error(state, id, host_failure_message(&e)).await;
            }
        }
    }
}

/// What a client is told about a host failure; matches the REST body.
fn host_failure_message(err: &HostError) -> String {
    match err {
        HostError::Unavailable => err.to_string(),
        _ => HOST_FAILED.to_string(),
    }
}

async fn reply_error(state: &AppState, id: ConnectionId, message: String) {
    state
        .hub
        .send_to(id, &ServerEvent::Error { message })
        .await;
}
