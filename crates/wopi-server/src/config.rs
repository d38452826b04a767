//! Environment-bound server configuration

use std::time::Duration;
use thiserror::Error;

use wopihost::fileinfo::AppStyle;
use wopihost::proofkey::DEFAULT_KEY_CACHE_TTL;
use wopihost::token::DEFAULT_TOKEN_TTL;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {variable}: {message}")]
    Invalid {
        variable: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Signing secret for session tokens (and their encrypted inner token)
    pub token_secret: String,
    pub token_ttl: Duration,
    /// Public base URL the editing application calls back on
    pub wopi_base_url: String,
    pub proxy_url: Option<String>,
    pub proxy_secret: Option<String>,
    /// Storage gateway endpoint
    pub gateway_url: String,
    /// Lock owner name reported to the back end
    pub app_name: String,
    pub app_style: AppStyle,
    /// Discovery document of the editing application; required when proof
    /// verification is enabled
    pub discovery_url: Option<String>,
    pub proofkeys_enabled: bool,
    pub proofkey_ttl: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let proofkeys_enabled = flag("WOPI_PROOFKEYS_ENABLED")?;
        let discovery_url = optional("WOPI_DISCOVERY_URL");
        if proofkeys_enabled && discovery_url.is_none() {
            return Err(ConfigError::Missing("WOPI_DISCOVERY_URL"));
        }

        Ok(ServerConfig {
            listen_addr: optional("WOPI_LISTEN_ADDR")
                .unwrap_or_else(|| "0.0.0.0:8880".to_string()),
            token_secret: required("WOPI_TOKEN_SECRET")?,
            token_ttl: duration("WOPI_TOKEN_TTL_SECS", DEFAULT_TOKEN_TTL)?,
            wopi_base_url: required("WOPI_BASE_URL")?,
            proxy_url: optional("WOPI_PROXY_URL"),
            proxy_secret: optional("WOPI_PROXY_SECRET"),
            gateway_url: required("WOPI_GATEWAY_URL")?,
            app_name: optional("WOPI_APP_NAME").unwrap_or_else(|| "wopihost".to_string()),
            app_style: style(optional("WOPI_APP_STYLE"))?,
            discovery_url,
            proofkeys_enabled,
            proofkey_ttl: duration("WOPI_PROOFKEY_TTL_SECS", DEFAULT_KEY_CACHE_TTL)?,
        })
    }
}

fn optional(variable: &'static str) -> Option<String> {
    std::env::var(variable).ok().filter(|v| !v.is_empty())
}

fn required(variable: &'static str) -> Result<String, ConfigError> {
    optional(variable).ok_or(ConfigError::Missing(variable))
}

fn flag(variable: &'static str) -> Result<bool, ConfigError> {
    match optional(variable).as_deref() {
        None => Ok(false),
        Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") => Ok(false),
        Some(other) => Err(ConfigError::Invalid {
            variable,
            message: format!("expected true/false, got {other:?}"),
        }),
    }
}

fn duration(variable: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match optional(variable) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ConfigError::Invalid {
                variable,
                message: e.to_string(),
            }),
    }
}

fn style(raw: Option<String>) -> Result<AppStyle, ConfigError> {
    match raw.as_deref() {
        None | Some("collabora") => Ok(AppStyle::Collabora),
        Some("microsoft") => Ok(AppStyle::Microsoft),
        Some("onlyoffice") => Ok(AppStyle::OnlyOffice),
        Some(other) => Err(ConfigError::Invalid {
            variable: "WOPI_APP_STYLE",
            message: format!("expected microsoft/collabora/onlyoffice, got {other:?}"),
        }),
    }
}
