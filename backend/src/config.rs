use std::path::PathBuf;
use std::time::Duration;

use url::Url;

const DEFAULT_MODEL_DIR: &str = "models/Plant-Disease-Detection-Project";
const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_UPLOAD_LIMIT_MB: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a valid number, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
    #[error("{name} is not a valid URL: {source}")]
    InvalidUrl {
        name: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("{name} is too large: {value}")]
    TooLarge { name: &'static str, value: usize },
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub api_url: Url,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub model_dir: PathBuf,
    pub upload_limit_bytes: usize,
    pub gemini: GeminiConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source. Empty
    /// values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let port = match get("PORT") {
            Some(value) => parse_number("PORT", value)?,
            None => DEFAULT_PORT,
        };

        let upload_limit_mb: usize = match get("UPLOAD_LIMIT_MB") {
            Some(value) => parse_number("UPLOAD_LIMIT_MB", value)?,
            None => DEFAULT_UPLOAD_LIMIT_MB,
        };

        let upload_limit_bytes = upload_limit_mb.checked_mul(1024 * 1024).ok_or(
            ConfigError::TooLarge {
                name: "UPLOAD_LIMIT_MB",
                value: upload_limit_mb,
            },
        )?;

        let api_url = get("GEMINI_API_URL").unwrap_or_else(|| DEFAULT_GEMINI_API_URL.to_string());
        let api_url = Url::parse(&api_url).map_err(|source| ConfigError::InvalidUrl {
            name: "GEMINI_API_URL",
            source,
        })?;

        let timeout = match get("GEMINI_TIMEOUT_SECS") {
            Some(value) => Some(Duration::from_secs(parse_number("GEMINI_TIMEOUT_SECS", value)?)),
            None => None,
        };

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            model_dir: get("MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR)),
            upload_limit_bytes,
            gemini: GeminiConfig {
                api_key: get("GEMINI_AI_API_KEY").unwrap_or_default(),
                model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
                api_url,
                timeout,
            },
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidNumber { name, value })
}
