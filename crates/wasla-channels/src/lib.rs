//! # wasla-channels
//!
//! WhatsApp link lifecycle: bridge client, credential persistence, and the
//! connection manager that decides when to reconnect.

pub mod whatsapp;
pub mod whatsapp_store;
