//! `GET /events/live?identifier=` WebSocket subscription.

use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::channel::mpsc;
use futures::stream::SplitSink;
use futures::{future, SinkExt, StreamExt};
use ground_core::SessionId;
use ground_fanout::Handshake;
use serde::Deserialize;

use crate::error::ApiError;
use crate::server::AppState;

/// Messages the handshake may have in flight to the socket writer.
const WRITER_BUFFER: usize = 32;

#[derive(Debug, Deserialize)]
pub struct LiveParams {
    pub identifier: Option<String>,
}

/// WebSocket upgrade handler.
pub async fn subscribe(
    State(state): State<AppState>,
    Query(params): Query<LiveParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let session_id = params
        .identifier
        .filter(|s| !s.is_empty())
        .map(SessionId::from_raw)
        .ok_or_else(|| ApiError::BadRequest("identifier is required".into()))?;

    let handshake = state.handshake.clone();
    let heartbeat = state.config.heartbeat_interval();
    let send_timeout = state.config.send_timeout();
    Ok(ws.on_upgrade(move |socket| {
        handle_socket(socket, session_id, handshake, heartbeat, send_timeout)
    }))
}

/// Split the socket, run the writer with heartbeat pings, and hand the
/// handshake a text sink plus a liveness stream that ends on `Close`.
async fn handle_socket(
    socket: WebSocket,
    session_id: SessionId,
    handshake: Handshake,
    heartbeat: Duration,
    send_timeout: Duration,
) {
    let (mut ws_tx, ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(WRITER_BUFFER);

    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = out_rx.next() => match msg {
                    Some(text) => {
                        if !send_bounded(&mut ws_tx, WsMessage::Text(text.into()), send_timeout).await {
                            break;
                        }
                    }
                    None => {
                        send_bounded(&mut ws_tx, WsMessage::Close(None), send_timeout).await;
                        break;
                    }
                },
                _ = ping_interval.tick() => {
                    if !send_bounded(&mut ws_tx, WsMessage::Ping(Vec::new().into()), send_timeout).await {
                        break;
                    }
                    tracing::trace!("sent ping");
                }
            }
        }
    });

    let inbound = ws_rx.take_while(|msg| future::ready(!matches!(msg, Ok(WsMessage::Close(_)))));

    let outcome = handshake.run(session_id, inbound, out_tx).await;
    tracing::debug!(
        subscriber_id = %outcome.subscriber_id,
        replayed = outcome.replayed,
        streamed = outcome.streamed,
        "live socket finished"
    );

    if let Err(e) = writer.await {
        tracing::warn!(error = %e, "socket writer failed");
    }
}

/// Write one frame to the socket. `false` means the peer is gone or did not
/// accept the frame within `limit`.
async fn send_bounded(
    ws_tx: &mut SplitSink<WebSocket, WsMessage>,
    message: WsMessage,
    limit: Duration,
) -> bool {
    match tokio::time::timeout(limit, ws_tx.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "socket write failed");
            false
        }
        Err(_) => {
            tracing::warn!(timeout_ms = limit.as_millis() as u64, "socket write timed out");
            false
        }
    }
}
