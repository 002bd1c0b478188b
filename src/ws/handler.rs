//! WebSocket upgrade handler

use std::fmt::Display;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use futures::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{MatchError, MatchHandle};
use crate::http::middleware::AuthenticatedActor;
use crate::http::routes::AppError;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Buffered pong replies per connection
const PONG_BUFFER: usize = 8;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Actor credential; spectators connect without one
    #[serde(default)]
    pub token: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(match_id): Path<Uuid>,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let handle = state
        .match_registry
        .get(&match_id)
        .ok_or(MatchError::NotFound)?;

    let actor = query
        .token
        .as_deref()
        .and_then(|token| state.auth.actor_from_token(token).ok());

    if let Some(actor) = &actor {
        match state.rooms.join(match_id, &actor.actor_id) {
            Ok(_) => info!(match_id = %match_id, actor_id = %actor.actor_id, "Participant joined room"),
            Err(e) => debug!(match_id = %match_id, actor_id = %actor.actor_id, error = %e, "Connecting as spectator"),
        }
    }

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, handle, actor)))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, handle: MatchHandle, actor: Option<AuthenticatedActor>) {
    let match_id = handle.id;
    let viewer = actor.map(|a| a.actor_id).unwrap_or_else(|| "spectator".to_string());
    info!(match_id = %match_id, viewer = %viewer, "New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();

    let (match_tx, match_rx) = mpsc::channel(handle.connection_buffer());
    if let Err(e) = handle.connect(match_tx).await {
        error!(match_id = %match_id, error = %e, "Failed to attach to match");
        return;
    }

    run_session(match_id, &viewer, &handle, ws_sink, ws_stream, match_rx).await;

    info!(match_id = %match_id, viewer = %viewer, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    match_id: Uuid,
    viewer: &str,
    handle: &MatchHandle,
    ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    match_rx: mpsc::Receiver<ServerMsg>,
) {
    let rate_limiter = ConnectionRateLimiter::new();
    let (pong_tx, pong_rx) = mpsc::channel::<ServerMsg>(PONG_BUFFER);

    // Spawn writer task: match broadcasts and pongs -> WebSocket
    let mut writer_handle = tokio::spawn(write_loop(match_id, ws_sink, match_rx, pong_rx));

    // Reader loop: only pings are meaningful
    loop {
        let frame = tokio::select! {
            _ = &mut writer_handle => break,
            frame = ws_stream.next() => frame,
        };
        let Some(result) = frame else { break };

        match result {
            Ok(Message::Text(text)) => {
                if let Some(reply) = client_reply(match_id, viewer, &text, &rate_limiter, handle.current_tick()) {
                    let _ = pong_tx.try_send(reply);
                }
            }
            Ok(Message::Binary(_)) => {
                debug!(match_id = %match_id, viewer = %viewer, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                debug!(match_id = %match_id, viewer = %viewer, "Client initiated close");
                break;
            }
            Err(e) => {
                debug!(match_id = %match_id, viewer = %viewer, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Reply owed for one text frame. Malformed and rate-limited frames are
/// dropped without closing the connection.
fn client_reply(
    match_id: Uuid,
    viewer: &str,
    text: &str,
    rate_limiter: &ConnectionRateLimiter,
    tick: u64,
) -> Option<ServerMsg> {
    if !rate_limiter.check() {
        warn!(match_id = %match_id, viewer = %viewer, "Rate limited stream message");
        return None;
    }

    match serde_json::from_str::<ClientMsg>(text) {
        Ok(ClientMsg::Ping) => Some(ServerMsg::Pong { tick }),
        Err(e) => {
            debug!(match_id = %match_id, viewer = %viewer, error = %e, "Ignoring malformed client message");
            None
        }
    }
}

/// Forward match messages and pongs until the match drops our sender,
/// then close the socket
async fn write_loop<S>(
    match_id: Uuid,
    mut sink: S,
    mut match_rx: mpsc::Receiver<ServerMsg>,
    mut pong_rx: mpsc::Receiver<ServerMsg>,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    loop {
        let msg = tokio::select! {
            msg = match_rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
            Some(pong) = pong_rx.recv() => pong,
        };
        if let Err(e) = send_msg(&mut sink, &msg).await {
            debug!(match_id = %match_id, error = %e, "WebSocket send failed");
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}

/// Send a message over WebSocket
async fn send_msg<S>(sink: &mut S, msg: &ServerMsg) -> Result<(), String>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PING: &str = r#"{"type":"ping"}"#;

    #[test]
    fn test_ping_answered_with_current_tick() {
        let limiter = ConnectionRateLimiter::new();
        let reply = client_reply(Uuid::nil(), "alice", PING, &limiter, 7);
        assert!(matches!(reply, Some(ServerMsg::Pong { tick: 7 })));
    }

    #[test]
    fn test_malformed_message_ignored_and_session_continues() {
        let limiter = ConnectionRateLimiter::new();
        assert!(client_reply(Uuid::nil(), "alice", "not json", &limiter, 3).is_none());
        assert!(client_reply(Uuid::nil(), "alice", r#"{"type":"shout"}"#, &limiter, 3).is_none());

        let reply = client_reply(Uuid::nil(), "alice", PING, &limiter, 4);
        assert!(matches!(reply, Some(ServerMsg::Pong { tick: 4 })));
    }

    #[test]
    fn test_flooding_client_is_throttled() {
        let limiter = ConnectionRateLimiter::with_rate(2);
        let answered = (0..5)
            .filter(|_| client_reply(Uuid::nil(), "alice", PING, &limiter, 0).is_some())
            .count();
        assert_eq!(answered, 2);
    }

    #[tokio::test]
    async fn test_writer_forwards_then_closes_when_match_ends() {
        let (sink, frames) = futures::channel::mpsc::unbounded::<Message>();
        let (match_tx, match_rx) = mpsc::channel(4);
        let (pong_tx, pong_rx) = mpsc::channel(4);

        match_tx
            .send(ServerMsg::Connected {
                match_id: Uuid::nil(),
                tick: 0,
            })
            .await
            .unwrap();
        match_tx.send(ServerMsg::Pong { tick: 1 }).await.unwrap();
        drop(match_tx);

        write_loop(Uuid::nil(), sink, match_rx, pong_rx).await;
        drop(pong_tx);

        let frames: Vec<Message> = frames.collect().await;
        assert_eq!(frames.len(), 3);
        assert!(matches!(&frames[0], Message::Text(t) if t.contains("\"connected\"")));
        assert!(matches!(&frames[1], Message::Text(t) if t.contains("\"pong\"")));
        assert!(matches!(frames[2], Message::Close(None)));
    }

    #[tokio::test]
    async fn test_writer_delivers_pongs() {
        let (sink, mut frames) = futures::channel::mpsc::unbounded::<Message>();
        let (match_tx, match_rx) = mpsc::channel::<ServerMsg>(4);
        let (pong_tx, pong_rx) = mpsc::channel(4);
        let writer = tokio::spawn(write_loop(Uuid::nil(), sink, match_rx, pong_rx));

        pong_tx.send(ServerMsg::Pong { tick: 12 }).await.unwrap();
        let frame = frames.next().await.unwrap();
        assert!(matches!(&frame, Message::Text(t) if t.contains("12")));

        drop(match_tx);
        writer.await.unwrap();
        assert!(matches!(frames.next().await, Some(Message::Close(None))));
        assert!(frames.next().await.is_none());
    }
}
