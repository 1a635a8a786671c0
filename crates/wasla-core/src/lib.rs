//! # wasla-core
//!
//! Core types, traits, configuration, and error handling for the Wasla bot.

pub mod config;
pub mod error;
pub mod message;
pub mod traits;

pub use config::shellexpand;
