//! Bridge frames and inbound message unwrapping.

use super::link::{DisconnectReason, LinkEvent};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use wasla_core::message::{jid_user, GroupInfo, InboundContent, InboundMessage};

/// Frames sent by the bridge.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub(super) enum BridgeFrame {
    #[serde(rename = "creds.update")]
    CredsUpdate { creds: Value },
    #[serde(rename = "connection.update", rename_all = "camelCase")]
    ConnectionUpdate {
        #[serde(default)]
        connection: Option<String>,
        #[serde(default)]
        qr: Option<String>,
        #[serde(default)]
        status_code: Option<u16>,
    },
    #[serde(rename = "messages.upsert")]
    MessagesUpsert {
        #[serde(default)]
        messages: Vec<WaMessage>,
    },
    #[serde(rename = "ack", rename_all = "camelCase")]
    Ack {
        request_id: String,
        #[serde(default)]
        message_id: String,
    },
    #[serde(rename = "groups", rename_all = "camelCase")]
    Groups {
        request_id: String,
        #[serde(default)]
        groups: Vec<BridgeGroup>,
    },
    #[serde(rename = "error", rename_all = "camelCase")]
    Error {
        #[serde(default)]
        request_id: Option<String>,
        error: String,
    },
}

/// Frames sent to the bridge.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    Hello {
        auth_state: String,
        creds: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    Send {
        request_id: String,
        to: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        document: Option<DocumentRef>,
    },
    #[serde(rename_all = "camelCase")]
    FetchGroups { request_id: String },
}

impl ClientFrame {
    pub(super) fn request_id(&self) -> Option<&str> {
        match self {
            Self::Hello { .. } => None,
            Self::Send { request_id, .. } | Self::FetchGroups { request_id } => {
                Some(request_id.as_str())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DocumentRef {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct BridgeGroup {
    pub id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub participants: Vec<BridgeParticipant>,
}

#[derive(Debug, Deserialize)]
pub(super) struct BridgeParticipant {
    pub id: String,
}

impl From<BridgeGroup> for GroupInfo {
    fn from(g: BridgeGroup) -> Self {
        GroupInfo {
            id: g.id,
            name: g.subject,
            participants: g.participants.into_iter().map(|p| p.id).collect(),
        }
    }
}

/// A message in the WhatsApp Web wire shape.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WaMessage {
    pub key: WaKey,
    #[serde(default)]
    pub push_name: Option<String>,
    #[serde(default)]
    pub message: Option<WaContent>,
    #[serde(default)]
    pub message_timestamp: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WaKey {
    pub id: String,
    pub remote_jid: String,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub participant: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WaContent {
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default)]
    pub extended_text_message: Option<ExtendedText>,
    #[serde(default)]
    pub document_message: Option<DocumentMessage>,
    #[serde(default)]
    pub ephemeral_message: Option<Box<Wrapper>>,
    #[serde(default)]
    pub view_once_message: Option<Box<Wrapper>>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ExtendedText {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DocumentMessage {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Wrapper {
    #[serde(default)]
    pub message: Option<Box<WaContent>>,
}

impl WaContent {
    /// Peel ephemeral / view-once wrappers.
    fn unwrap_inner(&self) -> &WaContent {
        let nested = self
            .ephemeral_message
            .as_ref()
            .and_then(|w| w.message.as_deref())
            .or_else(|| {
                self.view_once_message
                    .as_ref()
                    .and_then(|w| w.message.as_deref())
            });
        match nested {
            Some(inner) => inner.unwrap_inner(),
            None => self,
        }
    }

    fn resolve(&self) -> InboundContent {
        let inner = self.unwrap_inner();
        let text = inner.conversation.as_deref().or_else(|| {
            inner
                .extended_text_message
                .as_ref()
                .and_then(|e| e.text.as_deref())
        });
        if let Some(text) = text {
            return InboundContent::Text {
                text: text.to_string(),
            };
        }
        if let Some(ref doc) = inner.document_message {
            return InboundContent::Document {
                file_name: doc.file_name.clone(),
                mimetype: doc.mimetype.clone(),
            };
        }
        InboundContent::Other
    }
}

/// Seconds since epoch, sent as a number or a numeric string.
fn parse_timestamp(raw: Option<&Value>) -> DateTime<Utc> {
    let secs = match raw {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse::<i64>().ok(),
        _ => None,
    };
    secs.and_then(|s| Utc.timestamp_opt(s, 0).single())
        .unwrap_or_else(Utc::now)
}

/// Resolve a wire message into an [`InboundMessage`].
///
/// Returns `None` for stubs without a message body (receipts, protocol
/// messages), which are never dispatched.
pub(super) fn to_inbound(msg: WaMessage) -> Option<InboundMessage> {
    let content = match msg.message {
        Some(ref body) => body.resolve(),
        None => {
            debug!("WA skipping stub without body: {}", msg.key.id);
            return None;
        }
    };

    let sender_jid = msg
        .key
        .participant
        .as_deref()
        .unwrap_or(&msg.key.remote_jid);

    Some(InboundMessage {
        id: msg.key.id.clone(),
        chat_id: msg.key.remote_jid.clone(),
        sender: jid_user(sender_jid).to_string(),
        sender_name: msg.push_name.clone().filter(|n| !n.is_empty()),
        from_me: msg.key.from_me,
        content,
        timestamp: parse_timestamp(msg.message_timestamp.as_ref()),
    })
}

/// Translate a lifecycle frame into link events, in the order the manager
/// should observe them.
pub(super) fn lifecycle_events(frame: BridgeFrame) -> Vec<LinkEvent> {
    match frame {
        BridgeFrame::CredsUpdate { creds } => vec![LinkEvent::CredsUpdate(creds)],
        BridgeFrame::ConnectionUpdate {
            connection,
            qr,
            status_code,
        } => {
            let mut out = Vec::new();
            if let Some(code) = qr {
                out.push(LinkEvent::Qr(code));
            }
            match connection.as_deref() {
                Some("open") => out.push(LinkEvent::Open),
                Some("close") => out.push(LinkEvent::Closed(DisconnectReason::from_status_code(
                    status_code,
                ))),
                _ => {}
            }
            out
        }
        BridgeFrame::MessagesUpsert { messages } => messages
            .into_iter()
            .filter_map(to_inbound)
            .map(LinkEvent::Message)
            .collect(),
        BridgeFrame::Ack { .. } | BridgeFrame::Groups { .. } | BridgeFrame::Error { .. } => {
            Vec::new()
        }
    }
}
