use cotizador_core::config::{AppConfig, LoadOptions, LogFormat};
use serde_json::{json, Value};

pub fn run() -> String {
    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => serde_json::to_string_pretty(&redacted_view(&config))
            .unwrap_or_else(|error| format!("{{\"error\":\"{error}\"}}")),
        Err(error) => {
            json!({ "error": format!("configuration issue: {error}") }).to_string()
        }
    }
}

/// Effective configuration with every secret replaced by a marker. The
/// output shows whether a credential is present without exposing it.
pub(crate) fn redacted_view(config: &AppConfig) -> Value {
    json!({
        "database": {
            "url": config.database.url,
            "max_connections": config.database.max_connections,
            "timeout_secs": config.database.timeout_secs,
        },
        "server": {
            "bind_address": config.server.bind_address,
            "api_port": config.server.api_port,
            "health_check_port": config.server.health_check_port,
            "graceful_shutdown_secs": config.server.graceful_shutdown_secs,
        },
        "wix": {
            "enabled": config.wix.enabled,
            "api_key": redact(config.wix.api_key.is_some()),
            "site_id": config.wix.site_id,
            "base_url": config.wix.base_url,
            "page_size": config.wix.page_size,
        },
        "email": {
            "api_key": redact(config.email.api_key.is_some()),
            "from_email": config.email.from_email,
            "from_name": config.email.from_name,
            "base_url": config.email.base_url,
        },
        "insights": {
            "enabled": config.insights.enabled,
            "api_key": redact(config.insights.api_key.is_some()),
            "base_url": config.insights.base_url,
            "model": config.insights.model,
            "timeout_secs": config.insights.timeout_secs,
            "max_payload_bytes": config.insights.max_payload_bytes,
        },
        "logging": {
            "level": config.logging.level,
            "format": match config.logging.format {
                LogFormat::Compact => "compact",
                LogFormat::Pretty => "pretty",
                LogFormat::Json => "json",
            },
        },
    })
}

fn redact(present: bool) -> Value {
    if present {
        Value::String("<redacted>".to_string())
    } else {
        Value::Null
    }
}
