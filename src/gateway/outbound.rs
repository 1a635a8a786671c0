//! Outbound gateway: the one path every send takes.
//!
//! Used by the dispatcher (unlimited), the admin API (daily cap per
//! destination) and the scheduler (unlimited).

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use wasla_channels::whatsapp::ConnectionManager;
use wasla_core::{
    config::OutboundConfig, error::WaslaError, message::OutboundPayload, traits::Link,
};
use wasla_memory::{store::RATE_WINDOW_HOURS, Store};

/// Where the current link comes from.
pub trait LinkSource: Send + Sync {
    /// The live link, or `None` while disconnected.
    fn current_link(&self) -> Option<Arc<dyn Link>>;
}

impl LinkSource for ConnectionManager {
    fn current_link(&self) -> Option<Arc<dyn Link>> {
        self.link()
    }
}

/// Split line-oriented text into chunks of at most `threshold` characters.
///
/// Every line keeps its trailing newline, boundaries fall only between lines,
/// and concatenating the chunks gives back the full text. A line longer than
/// `threshold` on its own becomes a single oversized chunk.
pub fn chunk_lines<S: AsRef<str>>(lines: &[S], threshold: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut buf_chars = 0usize;

    for line in lines {
        let line = line.as_ref();
        let line_chars = line.chars().count() + 1;
        if !buf.is_empty() && buf_chars + line_chars > threshold {
            chunks.push(std::mem::take(&mut buf));
            buf_chars = 0;
        }
        buf.push_str(line);
        buf.push('\n');
        buf_chars += line_chars;
    }
    if !buf.is_empty() {
        chunks.push(buf);
    }
    chunks
}

/// Sends text and documents over whichever link is live.
#[derive(Clone)]
pub struct OutboundGateway {
    links: Arc<dyn LinkSource>,
    store: Store,
    config: OutboundConfig,
}

impl OutboundGateway {
    pub fn new(links: Arc<dyn LinkSource>, store: Store, config: OutboundConfig) -> Self {
        Self {
            links,
            store,
            config,
        }
    }

    /// Send one payload. Returns the network message id.
    pub async fn send(&self, to: &str, payload: &OutboundPayload) -> Result<String, WaslaError> {
        let link = self.links.current_link().ok_or(WaslaError::NotConnected)?;
        let id = link.send(to, payload).await?;
        debug!("sent {id} to {to}");
        Ok(id)
    }

    /// Send a line listing as sequential chunks. Returns the number of sends.
    pub async fn send_lines<S: AsRef<str>>(
        &self,
        to: &str,
        lines: &[S],
    ) -> Result<usize, WaslaError> {
        let chunks = chunk_lines(lines, self.config.chunk_threshold);
        for chunk in &chunks {
            self.send(to, &OutboundPayload::text(chunk.as_str())).await?;
        }
        Ok(chunks.len())
    }

    /// Send under the per-destination daily cap.
    ///
    /// Count-then-send-then-record; two concurrent callers can both pass the
    /// check and overshoot the cap by one.
    pub async fn send_rate_limited(
        &self,
        to: &str,
        payload: &OutboundPayload,
    ) -> Result<String, WaslaError> {
        let since = Utc::now() - Duration::hours(RATE_WINDOW_HOURS);
        let sent = self.store.count_outbound_since(to, since).await?;
        if sent >= self.config.daily_limit {
            info!("rate cap reached for {to} ({sent} sends in 24h)");
            return Err(WaslaError::RateLimited {
                destination: to.to_string(),
                limit: self.config.daily_limit,
            });
        }

        let id = self.send(to, payload).await?;
        if let Err(e) = self
            .store
            .record_outbound(to, &payload.summary(), Utc::now())
            .await
        {
            warn!("failed to record send to {to}: {e}");
        }
        Ok(id)
    }
}
