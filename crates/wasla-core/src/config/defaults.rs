//! Serde default functions for config fields.

pub(super) fn default_true() -> bool {
    true
}

pub(super) fn default_name() -> String {
    "Wasla".to_string()
}

pub(super) fn default_data_dir() -> String {
    "~/.wasla".to_string()
}

pub(super) fn default_log_level() -> String {
    "info".to_string()
}

pub(super) fn default_bridge_url() -> String {
    "ws://127.0.0.1:8787".to_string()
}

pub(super) fn default_auth_state() -> String {
    "auth_info".to_string()
}

pub(super) fn default_reconnect_delay() -> u64 {
    5
}

pub(super) fn default_request_timeout() -> u64 {
    30
}

pub(super) fn default_db_path() -> String {
    "~/.wasla/data/wasla.db".to_string()
}

pub(super) fn default_menu_trigger() -> String {
    "المنيو".to_string()
}

pub(super) fn default_order_list_trigger() -> String {
    "قائمة الطعام".to_string()
}

pub(super) fn default_order_prefix() -> String {
    "اطلب ".to_string()
}

pub(super) fn default_listing_header() -> String {
    "قائمة الطعام:".to_string()
}

pub(super) fn default_currency() -> String {
    "ريال".to_string()
}

pub(super) fn default_order_confirmation() -> String {
    "تم استلام طلبك: {item}. سنتواصل معك قريبًا.".to_string()
}

pub(super) fn default_fallback_response() -> String {
    "مرحبًا! أرسل \"المنيو\" لعرض قائمة الطعام.".to_string()
}

pub(super) fn default_dedup_capacity() -> usize {
    1000
}

pub(super) fn default_chunk_threshold() -> usize {
    4000
}

pub(super) fn default_daily_limit() -> u32 {
    5
}

pub(super) fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

pub(super) fn default_api_port() -> u16 {
    3000
}

pub(super) fn default_pairing_port() -> u16 {
    3001
}
