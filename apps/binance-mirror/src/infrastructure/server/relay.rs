//! Relay Sessions
//!
//! One session per downstream WebSocket client. A session presents a
//! stream that looks like a direct subscription to the upstream feed,
//! sourced entirely from the cache's single frame slot:
//!
//! 1. Wait for the client's initial message. Content is not inspected;
//!    any input counts as "ready".
//! 2. Send the two fixed synthetic subscription acks the real upstream
//!    would send, so client code that waits for acks is satisfied.
//! 3. Forward the frame slot's payload whenever its version advances
//!    past the session's last observed version.
//!
//! Delivery is coalescing/latest-wins: frames published between two
//! observations are skipped; only the latest value is guaranteed to
//! eventually reach an active session, and a session never forwards an
//! older version after a newer one. When no newer frame exists the
//! session waits on the cache's publish notification, bounded by a short
//! delay, so idle sessions consume no CPU.

use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;

use super::MirrorState;
use crate::infrastructure::metrics;

/// Synthetic subscription acknowledgements, byte-for-byte what the
/// upstream sends after a successful subscribe.
const SUBSCRIBE_ACKS: [&str; 2] = [
    r#"{"result": null, "id": 1}"#,
    r#"{"result": null, "id": 2}"#,
];

/// Upper bound on one idle wait inside the forwarding loop. The publish
/// notification normally wakes the session much earlier; the bound only
/// covers a publish landing between the version check and the wait.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// How a session ended.
enum SessionEnd {
    /// The client closed or vanished; its close frame if it sent one.
    ClientClosed(Option<CloseFrame>),
    /// An outbound send failed.
    SendFailed,
}

/// Upgrade handler for `GET /ws`.
pub(super) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<MirrorState>,
) -> Response {
    ws.on_upgrade(move |socket| relay_session(socket, state))
}

/// Run one relay session to completion.
async fn relay_session(mut socket: WebSocket, state: MirrorState) {
    let session_id = uuid::Uuid::new_v4();
    let connected = state.clients().fetch_add(1, Ordering::Relaxed) + 1;
    metrics::set_relay_clients(f64::from(connected));
    tracing::info!(session = %session_id, connected, "Relay session opened");

    let end = run_session(&mut socket, &state, session_id).await;

    match end {
        SessionEnd::ClientClosed(Some(frame)) => {
            tracing::debug!(
                session = %session_id,
                code = frame.code,
                reason = %frame.reason,
                "Client closed the session"
            );
            // Echo the client's close code and reason back.
            let _ = socket.send(Message::Close(Some(frame))).await;
        }
        SessionEnd::ClientClosed(None) => {
            // Transport already gone; nothing to send.
        }
        SessionEnd::SendFailed => {
            let _ = socket.send(Message::Close(None)).await;
        }
    }

    let connected = state.clients().fetch_sub(1, Ordering::Relaxed) - 1;
    metrics::set_relay_clients(f64::from(connected));
    tracing::info!(session = %session_id, connected, "Relay session closed");
}

async fn run_session(
    socket: &mut WebSocket,
    state: &MirrorState,
    session_id: uuid::Uuid,
) -> SessionEnd {
    // Handshake: any client message counts as ready.
    loop {
        match socket.recv().await {
            Some(Ok(Message::Close(frame))) => return SessionEnd::ClientClosed(frame),
            Some(Ok(_)) => break,
            Some(Err(_)) | None => return SessionEnd::ClientClosed(None),
        }
    }

    for ack in SUBSCRIBE_ACKS {
        if socket.send(Message::Text(ack.to_string().into())).await.is_err() {
            return SessionEnd::SendFailed;
        }
    }
    tracing::debug!(session = %session_id, "Handshake complete, forwarding frames");

    let cache = state.cache();
    let mut last_observed_version = 0u64;

    loop {
        // Forward if the slot moved past what this session last saw.
        // Reading the frame only when the cheap version peek says there
        // is something new keeps idle checks allocation-free.
        if cache.frame_version() > last_observed_version {
            if let Some(frame) = cache.read_frame() {
                if socket
                    .send(Message::Text(frame.payload.to_string().into()))
                    .await
                    .is_err()
                {
                    return SessionEnd::SendFailed;
                }
                last_observed_version = frame.version;
                metrics::record_frame_forwarded();
                continue;
            }
        }

        // Nothing new: wait for the next publish (bounded), while still
        // noticing a client disconnect promptly.
        let changed = cache.frame_changed();
        tokio::select! {
            () = changed => {}
            () = tokio::time::sleep(IDLE_WAIT) => {}
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Close(frame))) => return SessionEnd::ClientClosed(frame),
                    // Further client input is not inspected.
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => return SessionEnd::ClientClosed(None),
                }
            }
        }
    }
}
