//! WebSocket server: accept loop and per-session task management.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming TCP connections from browsers.
//! 3. Upgrading each connection to a WebSocket session, rejecting upgrades
//!    without a valid `userId` query parameter with HTTP 400.
//! 4. Handing the session to a [`SessionCoordinator`] and running two
//!    concurrent halves per connection:
//!    - **Reader**: JSON text frames → [`ClientMessage`] → coordinator.
//!    - **Writer**: the session's event queue → JSON text frames.
//! 5. Running disconnect cleanup (lock release) when either half ends.
//! 6. Stopping the accept loop when the `running` flag is cleared.
//!
//! The writer is the only task that writes to the socket.  Replies and
//! broadcasts both travel through the session's queue, so a slow browser
//! only ever fills its own queue.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use keylock_core::{decode_client_message, encode_event, ClientIdentity};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tracing::{debug, error, info, warn};

use crate::application::context::AppContext;
use crate::application::session::SessionCoordinator;

/// How often the accept loop wakes up to check the shutdown flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Query parameter carrying the client identity.
const USER_ID_PARAM: &str = "userId";

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds `ctx.config().bind_addr` and serves until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound (e.g., the port is
/// already in use or the process lacks permission to bind).
pub async fn run_server(ctx: Arc<AppContext>, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let bind_addr = ctx.config().bind_addr;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {bind_addr}"))?;

    info!("keyboard server listening on {bind_addr}");
    serve(listener, ctx, running).await
}

/// Runs the accept loop on an already bound listener.
///
/// Each accepted connection gets its own Tokio task, so one slow client
/// never blocks the others.  The loop polls `running` every 200 ms.
pub async fn serve(
    listener: TcpListener,
    ctx: Arc<AppContext>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("new connection from {peer_addr}");
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    handle_connection(stream, peer_addr, ctx).await;
                });
            }
            Ok(Err(e)) => {
                // Transient (e.g. out of file descriptors); keep serving.
                error!("accept error: {e}");
            }
            Err(_) => {}
        }
    }

    Ok(())
}

// ── Per-session handler ───────────────────────────────────────────────────────

async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, ctx: Arc<AppContext>) {
    match run_session(stream, peer_addr, ctx).await {
        Ok(()) => debug!("connection {peer_addr} closed"),
        Err(e) => warn!("connection {peer_addr} closed with error: {e:#}"),
    }
}

/// Runs one connection from handshake to disconnect cleanup.
async fn run_session(
    stream: TcpStream,
    peer_addr: SocketAddr,
    ctx: Arc<AppContext>,
) -> anyhow::Result<()> {
    // ── Handshake ─────────────────────────────────────────────────────────────
    let mut user_id: Option<String> = None;
    let ws_stream = accept_hdr_async(stream, |request: &Request, response: Response| {
        let raw = user_id_from_query(request.uri().query());
        match ClientIdentity::from_optional(raw.as_deref()) {
            Ok(identity) => {
                user_id = Some(identity.as_str().to_string());
                Ok(response)
            }
            Err(e) => {
                debug!("rejecting upgrade from {peer_addr}: {e}");
                Err(bad_request(format!("invalid {USER_ID_PARAM}: {e}")))
            }
        }
    })
    .await
    .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    let (session, mut events) = SessionCoordinator::connect(ctx, user_id.as_deref())
        .await
        .with_context(|| format!("could not admit {peer_addr}"))?;
    let session_id = session.session_id();

    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    // ── Writer: session queue → socket ────────────────────────────────────────
    //
    // Ends when the socket fails or the queue closes.  The queue only closes
    // if the broadcaster evicted this session for falling behind.
    let mut writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match encode_event(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!("session {session_id}: cannot encode {}: {e}", event.event_name());
                    continue;
                }
            };
            if ws_tx.send(WsMessage::Text(text)).await.is_err() {
                debug!("session {session_id}: send failed (browser disconnected)");
                return;
            }
        }
        debug!("session {session_id}: event queue closed");
        let _ = ws_tx.send(WsMessage::Close(None)).await;
    });

    // ── Reader: socket → coordinator ──────────────────────────────────────────
    let reader = async {
        loop {
            let frame = match ws_rx.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) | None => {
                    debug!("session {session_id}: browser stream ended");
                    break;
                }
                Some(Err(e)) => {
                    warn!("session {session_id}: WebSocket error: {e}");
                    break;
                }
            };

            match frame {
                WsMessage::Text(text) => match decode_client_message(&text) {
                    Ok(message) => {
                        if let Err(e) = session.handle(message).await {
                            debug!("session {session_id}: request refused: {e}");
                        }
                    }
                    Err(e) => {
                        debug!("session {session_id}: bad frame: {e}");
                        session.report_bad_request(e.to_string()).await;
                    }
                },
                WsMessage::Binary(_) => {
                    session
                        .report_bad_request("binary frames are not supported")
                        .await;
                }
                WsMessage::Close(_) => {
                    debug!("session {session_id}: close frame received");
                    break;
                }
                // Pong replies to pings are queued by tungstenite itself.
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
            }
        }
    };

    tokio::select! {
        _ = reader => {}
        _ = &mut writer => {}
    }
    writer.abort();

    session.disconnect().await?;
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Extracts the (percent-decoded) `userId` parameter from a query string.
fn user_id_from_query(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == USER_ID_PARAM)
        .map(|(_, value)| value.into_owned())
}

fn bad_request(message: String) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(message));
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_from_query_finds_parameter() {
        assert_eq!(
            user_id_from_query(Some("foo=1&userId=alice")),
            Some("alice".to_string())
        );
    }

    #[test]
    fn test_user_id_from_query_percent_decodes() {
        assert_eq!(
            user_id_from_query(Some("userId=a%20b%2Bc")),
            Some("a b+c".to_string())
        );
    }

    #[test]
    fn test_user_id_from_query_missing() {
        assert_eq!(user_id_from_query(None), None);
        assert_eq!(user_id_from_query(Some("user=alice")), None);
    }

    #[test]
    fn test_user_id_is_case_sensitive() {
        assert_eq!(user_id_from_query(Some("userid=alice")), None);
    }

    #[test]
    fn test_bad_request_has_status_400() {
        let response = bad_request("nope".to_string());
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.body().as_deref(), Some("nope"));
    }
}
