//! Browser pairing sessions over the WebSocket control channel.
//!
//! Each control-channel connection gets a session; a session may be bound to
//! a device, and only bound sessions may relay messages. Sessions live in
//! memory and vanish when their socket closes.

pub mod server;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Frames pushed to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    #[serde(rename_all = "camelCase")]
    Session { session_id: String },
    Qr { qr: String },
    Status { connected: bool },
}

/// Frames sent by the browser.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    DeviceConnected { device_id: String },
    Message { to: String, message: String },
}

struct Session {
    paired_device: Option<String>,
    tx: mpsc::UnboundedSender<ServerFrame>,
}

/// All live pairing sessions.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Mint a session for a new connection. Returns its id.
    pub fn register(&self, tx: mpsc::UnboundedSender<ServerFrame>) -> String {
        self.register_with(tx, |_| Vec::new())
    }

    /// Mint a session and queue `initial(id)` on it before any broadcast can
    /// reach it. `initial` runs under the session lock.
    pub fn register_with<F>(&self, tx: mpsc::UnboundedSender<ServerFrame>, initial: F) -> String
    where
        F: FnOnce(&str) -> Vec<ServerFrame>,
    {
        let id = Uuid::new_v4().to_string();
        let mut sessions = self.sessions();
        for frame in initial(&id) {
            let _ = tx.send(frame);
        }
        sessions.insert(
            id.clone(),
            Session {
                paired_device: None,
                tx,
            },
        );
        id
    }

    /// Bind a device to a session. Returns `false` if the session is gone.
    pub fn bind_device(&self, session_id: &str, device_id: &str) -> bool {
        match self.sessions().get_mut(session_id) {
            Some(session) => {
                session.paired_device = Some(device_id.to_string());
                true
            }
            None => false,
        }
    }

    pub fn paired_device(&self, session_id: &str) -> Option<String> {
        self.sessions()
            .get(session_id)
            .and_then(|s| s.paired_device.clone())
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions().remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }

    /// Push a frame to one session.
    pub fn send_to(&self, session_id: &str, frame: ServerFrame) -> bool {
        self.sessions()
            .get(session_id)
            .is_some_and(|s| s.tx.send(frame).is_ok())
    }

    /// Push a frame to every session.
    pub fn broadcast(&self, frame: &ServerFrame) {
        for (id, session) in self.sessions().iter() {
            if session.tx.send(frame.clone()).is_err() {
                debug!("pairing session {id} gone, skipping broadcast");
            }
        }
    }
}
