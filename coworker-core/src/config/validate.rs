//! Configuration validation rules.

use super::schema::Config;

/// Validate configuration and return aggregated validation errors.
pub fn validate_config(config: &Config) -> crate::Result<()> {
    let mut errors = Vec::new();
    let wa = &config.whatsapp;

    if wa.enabled && wa.auth_dir.trim().is_empty() {
        errors.push("whatsapp.auth_dir must not be empty when whatsapp is enabled".to_string());
    }
    if wa.enabled && wa.store_path.trim().is_empty() {
        errors.push("whatsapp.store_path must not be empty when whatsapp is enabled".to_string());
    }
    if wa.debounce_ms == 0 {
        errors.push("whatsapp.debounce_ms must be > 0".to_string());
    }
    if wa.agent_timeout_ms == 0 {
        errors.push("whatsapp.agent_timeout_ms must be > 0".to_string());
    }
    if wa.max_text_chunk == 0 {
        errors.push("whatsapp.max_text_chunk must be > 0".to_string());
    }
    if wa.reconnect_ceiling_ms == 0 {
        errors.push("whatsapp.reconnect_ceiling_ms must be > 0".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(crate::Error::Validation(errors.join("; ")))
    }
}
