use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub wix: WixConfig,
    pub email: EmailConfig,
    pub insights: InsightsConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub api_port: u16,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

/// Credentials and paging for the one-way product sync from the Wix stores
/// API. Sync endpoints refuse to run while `enabled` is false.
#[derive(Clone, Debug)]
pub struct WixConfig {
    pub enabled: bool,
    pub api_key: Option<SecretString>,
    pub site_id: Option<String>,
    pub base_url: String,
    pub page_size: u32,
}

#[derive(Clone, Debug)]
pub struct EmailConfig {
    pub api_key: Option<SecretString>,
    pub from_email: String,
    pub from_name: String,
    pub base_url: String,
}

#[derive(Clone, Debug)]
pub struct InsightsConfig {
    pub enabled: bool,
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_payload_bytes: usize,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub wix_enabled: Option<bool>,
    pub wix_api_key: Option<String>,
    pub wix_site_id: Option<String>,
    pub email_api_key: Option<String>,
    pub insights_enabled: Option<bool>,
    pub insights_api_key: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://cotizador.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                api_port: 8090,
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            wix: WixConfig {
                enabled: false,
                api_key: None,
                site_id: None,
                base_url: "https://www.wixapis.com".to_string(),
                page_size: 100,
            },
            email: EmailConfig {
                api_key: None,
                from_email: "cotizaciones@localhost".to_string(),
                from_name: "Cotizador".to_string(),
                base_url: "https://api.resend.com".to_string(),
            },
            insights: InsightsConfig {
                enabled: false,
                api_key: None,
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                timeout_secs: 60,
                max_payload_bytes: 500_000,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("cotizador.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(api_port) = server.api_port {
                self.server.api_port = api_port;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(wix) = patch.wix {
            if let Some(enabled) = wix.enabled {
                self.wix.enabled = enabled;
            }
            if let Some(wix_api_key_value) = wix.api_key {
                self.wix.api_key = Some(secret_value(wix_api_key_value));
            }
            if let Some(site_id) = wix.site_id {
                self.wix.site_id = Some(site_id);
            }
            if let Some(base_url) = wix.base_url {
                self.wix.base_url = base_url;
            }
            if let Some(page_size) = wix.page_size {
                self.wix.page_size = page_size;
            }
        }

        if let Some(email) = patch.email {
            if let Some(email_api_key_value) = email.api_key {
                self.email.api_key = Some(secret_value(email_api_key_value));
            }
            if let Some(from_email) = email.from_email {
                self.email.from_email = from_email;
            }
            if let Some(from_name) = email.from_name {
                self.email.from_name = from_name;
            }
            if let Some(base_url) = email.base_url {
                self.email.base_url = base_url;
            }
        }

        if let Some(insights) = patch.insights {
            if let Some(enabled) = insights.enabled {
                self.insights.enabled = enabled;
            }
            if let Some(insights_api_key_value) = insights.api_key {
                self.insights.api_key = Some(secret_value(insights_api_key_value));
            }
            if let Some(base_url) = insights.base_url {
                self.insights.base_url = base_url;
            }
            if let Some(model) = insights.model {
                self.insights.model = model;
            }
            if let Some(timeout_secs) = insights.timeout_secs {
                self.insights.timeout_secs = timeout_secs;
            }
            if let Some(max_payload_bytes) = insights.max_payload_bytes {
                self.insights.max_payload_bytes = max_payload_bytes;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("COTIZADOR_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("COTIZADOR_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("COTIZADOR_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("COTIZADOR_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("COTIZADOR_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("COTIZADOR_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("COTIZADOR_SERVER_API_PORT") {
            self.server.api_port = parse_u16("COTIZADOR_SERVER_API_PORT", &value)?;
        }
        if let Some(value) = read_env("COTIZADOR_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("COTIZADOR_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("COTIZADOR_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("COTIZADOR_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("COTIZADOR_WIX_ENABLED") {
            self.wix.enabled = parse_bool("COTIZADOR_WIX_ENABLED", &value)?;
        }
        if let Some(value) = read_env("COTIZADOR_WIX_API_KEY") {
            self.wix.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("COTIZADOR_WIX_SITE_ID") {
            self.wix.site_id = Some(value);
        }
        if let Some(value) = read_env("COTIZADOR_WIX_BASE_URL") {
            self.wix.base_url = value;
        }
        if let Some(value) = read_env("COTIZADOR_WIX_PAGE_SIZE") {
            self.wix.page_size = parse_u32("COTIZADOR_WIX_PAGE_SIZE", &value)?;
        }

        if let Some(value) = read_env("COTIZADOR_EMAIL_API_KEY") {
            self.email.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("COTIZADOR_EMAIL_FROM_EMAIL") {
            self.email.from_email = value;
        }
        if let Some(value) = read_env("COTIZADOR_EMAIL_FROM_NAME") {
            self.email.from_name = value;
        }
        if let Some(value) = read_env("COTIZADOR_EMAIL_BASE_URL") {
            self.email.base_url = value;
        }

        if let Some(value) = read_env("COTIZADOR_INSIGHTS_ENABLED") {
            self.insights.enabled = parse_bool("COTIZADOR_INSIGHTS_ENABLED", &value)?;
        }
        if let Some(value) = read_env("COTIZADOR_INSIGHTS_API_KEY") {
            self.insights.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("COTIZADOR_INSIGHTS_BASE_URL") {
            self.insights.base_url = value;
        }
        if let Some(value) = read_env("COTIZADOR_INSIGHTS_MODEL") {
            self.insights.model = value;
        }
        if let Some(value) = read_env("COTIZADOR_INSIGHTS_TIMEOUT_SECS") {
            self.insights.timeout_secs = parse_u64("COTIZADOR_INSIGHTS_TIMEOUT_SECS", &value)?;
        }

        let log_level =
            read_env("COTIZADOR_LOGGING_LEVEL").or_else(|| read_env("COTIZADOR_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("COTIZADOR_LOGGING_FORMAT").or_else(|| read_env("COTIZADOR_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(enabled) = overrides.wix_enabled {
            self.wix.enabled = enabled;
        }
        if let Some(wix_api_key) = overrides.wix_api_key {
            self.wix.api_key = Some(secret_value(wix_api_key));
        }
        if let Some(wix_site_id) = overrides.wix_site_id {
            self.wix.site_id = Some(wix_site_id);
        }
        if let Some(email_api_key) = overrides.email_api_key {
            self.email.api_key = Some(secret_value(email_api_key));
        }
        if let Some(enabled) = overrides.insights_enabled {
            self.insights.enabled = enabled;
        }
        if let Some(insights_api_key) = overrides.insights_api_key {
            self.insights.api_key = Some(secret_value(insights_api_key));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_wix(&self.wix)?;
        validate_email(&self.email)?;
        validate_insights(&self.insights)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("cotizador.toml"), PathBuf::from("config/cotizador.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.api_port == 0 {
        return Err(ConfigError::Validation(
            "server.api_port must be greater than zero".to_string(),
        ));
    }

    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.api_port == server.health_check_port {
        return Err(ConfigError::Validation(
            "server.api_port and server.health_check_port must differ".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_wix(wix: &WixConfig) -> Result<(), ConfigError> {
    if wix.enabled {
        let missing_key = wix
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing_key {
            return Err(ConfigError::Validation(
                "wix.enabled is true but wix.api_key is missing. Get it from https://manage.wix.com > Settings > API Keys".to_string(),
            ));
        }

        let missing_site = wix.site_id.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
        if missing_site {
            return Err(ConfigError::Validation(
                "wix.enabled is true but wix.site_id is missing".to_string(),
            ));
        }
    }

    if !wix.base_url.starts_with("http://") && !wix.base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "wix.base_url must start with http:// or https://".to_string(),
        ));
    }

    if wix.page_size == 0 || wix.page_size > 100 {
        return Err(ConfigError::Validation(
            "wix.page_size must be in range 1..=100 (platform paging limit)".to_string(),
        ));
    }

    Ok(())
}

fn validate_email(email: &EmailConfig) -> Result<(), ConfigError> {
    if email.api_key.is_some() && !email.from_email.contains('@') {
        return Err(ConfigError::Validation(
            "email.from_email must be a full address when email.api_key is configured".to_string(),
        ));
    }

    if !email.base_url.starts_with("http://") && !email.base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "email.base_url must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

fn validate_insights(insights: &InsightsConfig) -> Result<(), ConfigError> {
    if insights.enabled {
        let missing = insights
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "insights.enabled is true but insights.api_key is missing".to_string(),
            ));
        }
    }

    if insights.timeout_secs == 0 || insights.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "insights.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if insights.max_payload_bytes == 0 {
        return Err(ConfigError::Validation(
            "insights.max_payload_bytes must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    wix: Option<WixPatch>,
    email: Option<EmailPatch>,
    insights: Option<InsightsPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    api_port: Option<u16>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WixPatch {
    enabled: Option<bool>,
    api_key: Option<String>,
    site_id: Option<String>,
    base_url: Option<String>,
    page_size: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct EmailPatch {
    api_key: Option<String>,
    from_email: Option<String>,
    from_name: Option<String>,
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct InsightsPatch {
    enabled: Option<bool>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_payload_bytes: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
