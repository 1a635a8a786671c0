use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An inbound WhatsApp message, resolved once at ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Network message id (used for dedup).
    pub id: String,
    /// Chat JID the message arrived in (reply target).
    pub chat_id: String,
    /// Sender phone number / user part of the JID.
    pub sender: String,
    /// Push name, if the sender has one.
    pub sender_name: Option<String>,
    /// Whether this account sent the message (echo of our own sends).
    #[serde(default)]
    pub from_me: bool,
    pub content: InboundContent,
    pub timestamp: DateTime<Utc>,
}

/// Message body shapes the bot cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InboundContent {
    Text { text: String },
    Document {
        file_name: Option<String>,
        mimetype: Option<String>,
    },
    Other,
}

impl InboundContent {
    /// Short tag stored in the message log.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Document { .. } => "document",
            Self::Other => "other",
        }
    }

    /// Text body, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// What to deliver to a destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundPayload {
    Text(String),
    Document {
        path: String,
        file_name: Option<String>,
        caption: Option<String>,
    },
}

impl OutboundPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Text used for send records and logs.
    pub fn summary(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Document { path, caption, .. } => match caption {
                Some(c) => format!("[document {path}] {c}"),
                None => format!("[document {path}]"),
            },
        }
    }
}

/// A WhatsApp group as reported by the link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub id: String,
    pub name: String,
    /// Participant JIDs.
    pub participants: Vec<String>,
}

/// Normalize a phone number or JID to a personal chat JID.
///
/// `"9665xxxxxxx"` → `"9665xxxxxxx@s.whatsapp.net"`; values that already carry
/// a server part are returned unchanged.
pub fn to_jid(number: &str) -> String {
    let trimmed = number.trim().trim_start_matches('+');
    if trimmed.contains('@') {
        trimmed.to_string()
    } else {
        format!("{trimmed}@s.whatsapp.net")
    }
}

/// User part of a JID (`"123@g.us"` → `"123"`).
pub fn jid_user(jid: &str) -> &str {
    jid.split('@').next().unwrap_or(jid)
}
