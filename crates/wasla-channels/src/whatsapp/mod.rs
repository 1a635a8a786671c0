//! WhatsApp link: lifecycle, events, and the bridge client.
//!
//! The WhatsApp Web protocol itself runs in a separate bridge process; Wasla
//! connects to it over a WebSocket, hands it the stored credential bundle, and
//! reacts to its connection and message events.

mod bridge;
mod connection;
mod events;
mod link;

#[cfg(test)]
mod tests;

pub use bridge::BridgeConnector;
pub use connection::{ConnectionManager, ConnectionState, ConnectionUpdate};
pub use link::{Connector, DisconnectReason, LinkEvent, LinkSession};
