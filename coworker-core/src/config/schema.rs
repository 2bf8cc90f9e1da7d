//! Configuration schema definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root configuration for the coworker bridge
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// WhatsApp bridge configuration
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Directory for log files
    #[serde(default = "default_log_dir")]
    pub dir: String,
    /// Module-specific overrides
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            dir: default_log_dir(),
            overrides: HashMap::new(),
        }
    }
}

/// WhatsApp bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    /// Whether the bridge should connect at startup
    #[serde(default)]
    pub enabled: bool,
    /// Directory holding persisted socket credentials
    #[serde(default = "default_auth_dir")]
    pub auth_dir: String,
    /// Path to the policy store JSON document
    #[serde(default = "default_store_path")]
    pub store_path: String,
    /// Debounce window for coalescing inbound texts, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Ceiling on a single agent call, in milliseconds
    #[serde(default = "default_agent_timeout_ms")]
    pub agent_timeout_ms: u64,
    /// Echo-tracker retention, in milliseconds
    #[serde(default = "default_sent_tracker_ttl_ms")]
    pub sent_tracker_ttl_ms: u64,
    /// Pairing-code validity window, in milliseconds
    #[serde(default = "default_pairing_ttl_ms")]
    pub pairing_ttl_ms: u64,
    /// Group metadata cache TTL, in milliseconds
    #[serde(default = "default_group_meta_ttl_ms")]
    pub group_meta_ttl_ms: u64,
    /// Maximum characters per outbound text chunk
    #[serde(default = "default_max_text_chunk")]
    pub max_text_chunk: usize,
    /// Reconnect backoff ceiling, in milliseconds
    #[serde(default = "default_reconnect_ceiling_ms")]
    pub reconnect_ceiling_ms: u64,
    /// Maximum reconnect attempts before giving up
    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,
}

fn default_auth_dir() -> String {
    "whatsapp-auth".to_string()
}
fn default_store_path() -> String {
    "whatsapp-store.json".to_string()
}
fn default_debounce_ms() -> u64 {
    2_000
}
fn default_agent_timeout_ms() -> u64 {
    5 * 60 * 1_000
}
fn default_sent_tracker_ttl_ms() -> u64 {
    10 * 60 * 1_000
}
fn default_pairing_ttl_ms() -> u64 {
    60 * 60 * 1_000
}
fn default_group_meta_ttl_ms() -> u64 {
    5 * 60 * 1_000
}
fn default_max_text_chunk() -> usize {
    3_800
}
fn default_reconnect_ceiling_ms() -> u64 {
    30_000
}
fn default_reconnect_max_attempts() -> u32 {
    10
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auth_dir: default_auth_dir(),
            store_path: default_store_path(),
            debounce_ms: default_debounce_ms(),
            agent_timeout_ms: default_agent_timeout_ms(),
            sent_tracker_ttl_ms: default_sent_tracker_ttl_ms(),
            pairing_ttl_ms: default_pairing_ttl_ms(),
            group_meta_ttl_ms: default_group_meta_ttl_ms(),
            max_text_chunk: default_max_text_chunk(),
            reconnect_ceiling_ms: default_reconnect_ceiling_ms(),
            reconnect_max_attempts: default_reconnect_max_attempts(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whatsapp_config_defaults() {
        let cfg = WhatsAppConfig::default();
        assert!(!cfg.enabled);
        assert_eq!(cfg.debounce_ms, 2_000);
        assert_eq!(cfg.agent_timeout_ms, 300_000);
        assert_eq!(cfg.max_text_chunk, 3_800);
        assert_eq!(cfg.reconnect_max_attempts, 10);
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let cfg = Config::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.whatsapp.store_path, cfg.whatsapp.store_path);
    }
}
