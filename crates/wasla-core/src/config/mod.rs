mod defaults;


use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::WaslaError;
use defaults::*;

/// Top-level Wasla configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub wasla: WaslaConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub outbound: OutboundConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub pairing: PairingConfig,
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaslaConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for WaslaConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

/// WhatsApp link config.
///
/// Credentials are stored at `{data_dir}/{auth_state}/creds.db` and re-read
/// on every reconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    /// WebSocket URL of the link bridge that speaks the WhatsApp Web protocol.
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,
    /// Auth-state identifier; scopes the stored credential bundle.
    #[serde(default = "default_auth_state")]
    pub auth_state: String,
    /// Fixed delay before reconnecting after a transient close.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    /// How long to wait for the bridge to answer a send or group request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            bridge_url: default_bridge_url(),
            auth_state: default_auth_state(),
            reconnect_delay_secs: default_reconnect_delay(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Storage config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Inbound message routing: trigger words and canned texts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Exact text that sends the stored menu document.
    #[serde(default = "default_menu_trigger")]
    pub menu_trigger: String,
    /// Exact text that lists all menu items.
    #[serde(default = "default_order_list_trigger")]
    pub order_list_trigger: String,
    /// Prefix that places an order for the named item.
    #[serde(default = "default_order_prefix")]
    pub order_prefix: String,
    /// Header line of the menu listing.
    #[serde(default = "default_listing_header")]
    pub listing_header: String,
    /// Currency label appended to prices.
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Confirmation sent after an order; `{item}` is replaced by the item name.
    #[serde(default = "default_order_confirmation")]
    pub order_confirmation: String,
    /// Reply used when no default response is stored.
    #[serde(default = "default_fallback_response")]
    pub fallback_response: String,
    /// Processed-id set size that triggers a full clear.
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            menu_trigger: default_menu_trigger(),
            order_list_trigger: default_order_list_trigger(),
            order_prefix: default_order_prefix(),
            listing_header: default_listing_header(),
            currency: default_currency(),
            order_confirmation: default_order_confirmation(),
            fallback_response: default_fallback_response(),
            dedup_capacity: default_dedup_capacity(),
        }
    }
}

/// Outbound sending limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    /// Maximum characters per text chunk.
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold: usize,
    /// Admin sends allowed per destination in a trailing 24h window.
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            chunk_threshold: default_chunk_threshold(),
            daily_limit: default_daily_limit(),
        }
    }
}

/// HTTP admin API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Bearer token for API authentication. Empty = no auth (for local-only use).
    #[serde(default)]
    pub api_key: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_api_host(),
            port: default_api_port(),
            api_key: String::new(),
        }
    }
}

/// WebSocket control channel for browser pairing sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_pairing_port")]
    pub port: u16,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_api_host(),
            port: default_pairing_port(),
        }
    }
}

impl Config {
    /// Directory holding the credential bundle for the configured auth state.
    pub fn auth_state_dir(&self) -> String {
        let dir = shellexpand(&self.wasla.data_dir);
        format!("{dir}/{}", self.whatsapp.auth_state)
    }

    /// Apply environment overrides (`PORT`).
    pub fn apply_env(&mut self) -> Option<String> {
        self.apply_port_override(std::env::var("PORT").ok().as_deref())
    }

    /// Returns the raw value when it is not a port; the config is unchanged.
    fn apply_port_override(&mut self, value: Option<&str>) -> Option<String> {
        let raw = value?;
        match raw.trim().parse::<u16>() {
            Ok(port) => {
                self.api.port = port;
                None
            }
            Err(_) => Some(raw.to_string()),
        }
    }
}

/// Expand `~` to home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist.
pub fn load(path: &str) -> Result<Config, WaslaError> {
    let path = Path::new(path);
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| WaslaError::Config(format!("failed to read {}: {}", path.display(), e)))?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| WaslaError::Config(format!("failed to parse config: {}", e)))?;

    Ok(config)
}
