use crate::{
    error::WaslaError,
    message::{GroupInfo, OutboundPayload},
};
use async_trait::async_trait;

/// An open link to the WhatsApp network.
///
/// Handed out by the connection manager while connected; every other
/// component only sends through it.
#[async_trait]
pub trait Link: Send + Sync {
    /// Deliver a payload to a chat JID. Returns the network message id.
    async fn send(&self, to: &str, payload: &OutboundPayload) -> Result<String, WaslaError>;

    /// List the groups this account participates in.
    async fn fetch_groups(&self) -> Result<Vec<GroupInfo>, WaslaError>;

    /// Close the link.
    async fn close(&self) -> Result<(), WaslaError> {
        Ok(())
    }
}
