//! WebSocket control channel server (axum).

use super::{ClientFrame, ServerFrame, SessionStore};
use crate::gateway::OutboundGateway;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use wasla_channels::whatsapp::{ConnectionManager, ConnectionState, ConnectionUpdate};
use wasla_core::{
    config::PairingConfig,
    message::{to_jid, OutboundPayload},
};

#[derive(Clone)]
pub struct PairingState {
    pub sessions: Arc<SessionStore>,
    pub outbound: OutboundGateway,
    pub connection: Arc<ConnectionManager>,
}

/// Frames describing a connection update.
pub fn update_frames(update: &ConnectionUpdate) -> Vec<ServerFrame> {
    let mut frames = Vec::with_capacity(2);
    if let Some(ref qr) = update.qr {
        frames.push(ServerFrame::Qr { qr: qr.clone() });
    }
    frames.push(ServerFrame::Status {
        connected: update.state == ConnectionState::Connected,
    });
    frames
}

/// Mirror connection updates to every session until the manager goes away.
pub async fn forward_updates(
    mut updates: broadcast::Receiver<ConnectionUpdate>,
    sessions: Arc<SessionStore>,
) {
    loop {
        match updates.recv().await {
            Ok(update) => {
                for frame in update_frames(&update) {
                    sessions.broadcast(&frame);
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("pairing broadcast lagged, {n} updates skipped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Apply one browser frame. Returns `true` if a message was relayed.
pub async fn handle_client_frame(
    sessions: &SessionStore,
    outbound: &OutboundGateway,
    session_id: &str,
    frame: ClientFrame,
) -> bool {
    match frame {
        ClientFrame::DeviceConnected { device_id } => {
            if sessions.bind_device(session_id, &device_id) {
                info!("pairing session {session_id} bound to device {device_id}");
            }
            false
        }
        ClientFrame::Message { to, message } => {
            if sessions.paired_device(session_id).is_none() {
                debug!("pairing session {session_id} not bound, message dropped");
                return false;
            }
            let jid = to_jid(&to);
            match outbound.send(&jid, &OutboundPayload::text(message)).await {
                Ok(_) => true,
                Err(e) => {
                    error!("pairing relay to {jid} failed: {e}");
                    false
                }
            }
        }
    }
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<PairingState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: PairingState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();

    // The snapshot is taken under the session lock so a later broadcast
    // can't be overtaken by stale state.
    let session_id = state.sessions.register_with(tx, |id| {
        let current = ConnectionUpdate {
            state: state.connection.state(),
            qr: state.connection.pending_qr(),
        };
        let mut frames = vec![ServerFrame::Session {
            session_id: id.to_string(),
        }];
        frames.extend(update_frames(&current));
        frames
    });
    info!("pairing session {session_id} opened");

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(j) => j,
                Err(e) => {
                    warn!("pairing frame encode failed: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => {
                    handle_client_frame(&state.sessions, &state.outbound, &session_id, frame)
                        .await;
                }
                Err(e) => debug!("pairing session {session_id} sent unknown frame: {e}"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.sessions.remove(&session_id);
    send_task.abort();
    info!("pairing session {session_id} closed");
}

fn build_router(state: PairingState) -> Router {
    Router::new().route("/", get(ws_upgrade)).with_state(state)
}

/// Start the control channel server.
pub async fn serve(config: PairingConfig, state: PairingState) {
    tokio::spawn(forward_updates(
        state.connection.subscribe(),
        Arc::clone(&state.sessions),
    ));

    let app = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("pairing server failed to bind to {addr}: {e}");
            return;
        }
    };

    info!("pairing server listening on {addr}");

    if let Err(e) = axum::serve(listener, app).await {
        error!("pairing server error: {e}");
    }
}
