//! # wasla-memory
//!
//! Persistent storage for Wasla (SQLite-backed).

pub mod store;

pub use store::{AutoReply, CartItem, ChatSummary, MenuItem, Order, Store, StoredMessage};
