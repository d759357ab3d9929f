//! Environment-driven configuration.
//!
//! Credentials are the only fatal settings: startup aborts without an access
//! key, and the signed authentication mode additionally requires the secret
//! key. Everything else falls back to a default.

use std::env;
use std::fmt;

use crate::client::{AuthScheme, DEFAULT_MODEL};
use crate::controller::EmptyResultPolicy;

pub const DEFAULT_PORT: u16 = 5000;

#[derive(Debug)]
pub enum ConfigError {
    MissingAccessKey,
    MissingSecretKey,
    UnknownAuthMode(String),
    InvalidPort(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingAccessKey => write!(f, "请设置QIANFAN_AK环境变量"),
            ConfigError::MissingSecretKey => {
                write!(f, "请设置QIANFAN_SK环境变量（signed认证模式需要）")
            }
            ConfigError::UnknownAuthMode(mode) => write!(
                f,
                "unknown TITLEFORGE_AUTH mode {mode:?} (expected \"token\" or \"signed\")"
            ),
            ConfigError::InvalidPort(value) => write!(f, "invalid PORT value {value:?}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Clone)]
pub struct AppConfig {
    pub auth: AuthScheme,
    pub model: String,
    pub port: u16,
    pub empty_results: EmptyResultPolicy,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let access_key = get("QIANFAN_AK").ok_or(ConfigError::MissingAccessKey)?;
        let auth = match get("TITLEFORGE_AUTH").as_deref() {
            None | Some("token") => AuthScheme::AccessToken { access_key },
            Some("signed") => AuthScheme::BceSigning {
                access_key,
                secret_key: get("QIANFAN_SK").ok_or(ConfigError::MissingSecretKey)?,
            },
            Some(other) => return Err(ConfigError::UnknownAuthMode(other.to_string())),
        };

        let model = get("QIANFAN_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let port = match get("PORT") {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidPort(value))?,
            None => DEFAULT_PORT,
        };

        let empty_results = match get("TITLEFORGE_STRICT_EMPTY").as_deref() {
            Some("1") | Some("true") | Some("yes") => EmptyResultPolicy::Reject,
            _ => EmptyResultPolicy::Allow,
        };

        Ok(Self {
            auth,
            model,
            port,
            empty_results,
        })
    }
}
