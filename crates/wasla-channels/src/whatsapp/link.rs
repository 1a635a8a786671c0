//! Link abstraction: what a connector yields and which events it emits.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use wasla_core::{error::WaslaError, message::InboundMessage, traits::Link};

/// Why the link closed, following the WhatsApp Web status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// 401: the phone unlinked this device. Needs a new pairing.
    LoggedOut,
    /// 408
    ConnectionLost,
    /// 428
    ConnectionClosed,
    /// 440: another client took over the session.
    ConnectionReplaced,
    /// 500
    BadSession,
    /// 515
    RestartRequired,
    Other(u16),
    /// Close without a status code.
    Unknown,
}

impl DisconnectReason {
    pub fn from_status_code(code: Option<u16>) -> Self {
        match code {
            Some(401) => Self::LoggedOut,
            Some(408) => Self::ConnectionLost,
            Some(428) => Self::ConnectionClosed,
            Some(440) => Self::ConnectionReplaced,
            Some(500) => Self::BadSession,
            Some(515) => Self::RestartRequired,
            Some(other) => Self::Other(other),
            None => Self::Unknown,
        }
    }

    /// A terminal close is never retried.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

/// Events emitted by an open link, in arrival order.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// New credential bundle; must be persisted before anything else runs.
    CredsUpdate(Value),
    /// Scannable pairing payload.
    Qr(String),
    Open,
    Closed(DisconnectReason),
    Message(InboundMessage),
}

/// A freshly opened link and its event stream.
pub struct LinkSession {
    pub link: Arc<dyn Link>,
    pub events: mpsc::Receiver<LinkEvent>,
}

/// Opens links to the WhatsApp network.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a link for `auth_state`, resuming from `creds` when present.
    async fn connect(
        &self,
        auth_state: &str,
        creds: Option<Value>,
    ) -> Result<LinkSession, WaslaError>;
}
