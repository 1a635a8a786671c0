//! Connection lifecycle: connect, persist credentials, reconnect on transient
//! closes, stop for good on logout.

use super::link::{Connector, DisconnectReason, LinkEvent, LinkSession};
use crate::whatsapp_store::AuthStateStore;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use wasla_core::{error::WaslaError, message::InboundMessage, traits::Link};

/// Link state as seen by the rest of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    AwaitingScan,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::AwaitingScan => "awaiting_scan",
            Self::Connected => "connected",
        }
    }
}

/// Broadcast on every state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionUpdate {
    pub state: ConnectionState,
    pub qr: Option<String>,
}

struct Inner {
    state: ConnectionState,
    qr: Option<String>,
    link: Option<Arc<dyn Link>>,
    logged_out: bool,
}

/// Owns the single link to the WhatsApp network.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    auth: AuthStateStore,
    auth_state: String,
    reconnect_delay: Duration,
    inbound_tx: mpsc::Sender<InboundMessage>,
    inner: Mutex<Inner>,
    updates: broadcast::Sender<ConnectionUpdate>,
    task: Mutex<Option<JoinHandle<()>>>,
    attempts: AtomicU32,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        auth: AuthStateStore,
        auth_state: &str,
        reconnect_delay: Duration,
        inbound_tx: mpsc::Sender<InboundMessage>,
    ) -> Self {
        let (updates, _) = broadcast::channel(32);
        Self {
            connector,
            auth,
            auth_state: auth_state.to_string(),
            reconnect_delay,
            inbound_tx,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                qr: None,
                link: None,
                logged_out: false,
            }),
            updates,
            task: Mutex::new(None),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.inner).state
    }

    /// QR payload waiting to be scanned, only while `AwaitingScan`.
    pub fn pending_qr(&self) -> Option<String> {
        lock(&self.inner).qr.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// True after a logout close; cleared by [`ConnectionManager::repair`].
    pub fn is_logged_out(&self) -> bool {
        lock(&self.inner).logged_out
    }

    /// The live link, only while connected.
    pub fn link(&self) -> Option<Arc<dyn Link>> {
        let inner = lock(&self.inner);
        match inner.state {
            ConnectionState::Connected => inner.link.clone(),
            _ => None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionUpdate> {
        self.updates.subscribe()
    }

    /// Number of `connect()` calls made so far.
    pub fn connect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Whether the supervisor loop is alive.
    pub fn is_running(&self) -> bool {
        lock(&self.task).as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Spawn the supervisor loop. Returns `false` if it is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }
        lock(&self.inner).logged_out = false;
        *task = Some(tokio::spawn(Arc::clone(self).run()));
        true
    }

    /// Drop the stored credentials and start over with a fresh pairing.
    ///
    /// Refused (`Ok(false)`) while the supervisor loop is still running.
    pub async fn repair(self: &Arc<Self>) -> Result<bool, WaslaError> {
        if self.is_running() {
            return Ok(false);
        }
        self.auth.clear(&self.auth_state).await?;
        info!("WA credentials cleared for '{}', starting fresh pairing", self.auth_state);
        Ok(self.start())
    }

    /// Stop the supervisor loop and close the link.
    pub async fn shutdown(&self) {
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
        let link = lock(&self.inner).link.take();
        if let Some(link) = link {
            if let Err(e) = link.close().await {
                warn!("WA link close failed: {e}");
            }
        }
        self.transition(ConnectionState::Disconnected, None);
        info!("WA connection manager stopped");
    }

    /// Supervisor loop: one `connect()` per close until a logout.
    pub async fn run(self: Arc<Self>) {
        loop {
            let reason = self.connect_once().await;
            if reason.is_terminal() {
                lock(&self.inner).logged_out = true;
                warn!("WA logged out, not reconnecting; re-pair to continue");
                return;
            }
            info!(
                "WA link closed ({reason:?}), reconnecting in {}s",
                self.reconnect_delay.as_secs()
            );
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    /// Open one link and drive it until it closes.
    async fn connect_once(&self) -> DisconnectReason {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let creds = match self.auth.load(&self.auth_state).await {
            Ok(creds) => creds,
            Err(e) => {
                warn!("WA failed to load credentials, connecting without: {e}");
                None
            }
        };

        let LinkSession { link, mut events } =
            match self.connector.connect(&self.auth_state, creds).await {
                Ok(session) => session,
                Err(e) => {
                    warn!("WA connect failed: {e}");
                    self.transition(ConnectionState::Disconnected, None);
                    return DisconnectReason::Unknown;
                }
            };

        lock(&self.inner).link = Some(link);

        while let Some(event) = events.recv().await {
            if let Some(reason) = self.handle_event(event).await {
                return reason;
            }
        }

        debug!("WA event stream ended without a close event");
        self.mark_closed();
        DisconnectReason::ConnectionLost
    }

    /// Apply one link event. Returns the close reason when the link is gone.
    async fn handle_event(&self, event: LinkEvent) -> Option<DisconnectReason> {
        match event {
            LinkEvent::CredsUpdate(creds) => {
                if let Err(e) = self.auth.save(&self.auth_state, &creds).await {
                    error!("WA failed to persist credentials: {e}");
                }
            }
            LinkEvent::Qr(code) => {
                info!("WA QR code received, waiting for scan");
                self.transition(ConnectionState::AwaitingScan, Some(code));
            }
            LinkEvent::Open => {
                info!("WA connected");
                self.transition(ConnectionState::Connected, None);
            }
            LinkEvent::Closed(reason) => {
                self.mark_closed();
                return Some(reason);
            }
            LinkEvent::Message(msg) => {
                if self.inbound_tx.send(msg).await.is_err() {
                    warn!("WA inbound receiver dropped, message lost");
                }
            }
        }
        None
    }

    fn mark_closed(&self) {
        lock(&self.inner).link = None;
        self.transition(ConnectionState::Disconnected, None);
    }

    fn transition(&self, state: ConnectionState, qr: Option<String>) {
        {
            let mut inner = lock(&self.inner);
            inner.state = state;
            inner.qr = qr.clone();
        }
        let _ = self.updates.send(ConnectionUpdate { state, qr });
    }
}
