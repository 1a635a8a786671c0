use thiserror::Error;

/// Top-level error type for Wasla.
#[derive(Debug, Error)]
pub enum WaslaError {
    /// Error from the WhatsApp link (bridge unreachable, send rejected, ...).
    #[error("channel error: {0}")]
    Channel(String),

    /// No open link to WhatsApp.
    #[error("whatsapp client not connected")]
    NotConnected,

    /// Per-destination daily send ceiling reached.
    #[error("rate limit exceeded for {destination}: {limit} messages per 24h")]
    RateLimited { destination: String, limit: u32 },

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Storage error.
    #[error("memory error: {0}")]
    Memory(String),

    /// Malformed or missing input.
    #[error("{0}")]
    InvalidInput(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
