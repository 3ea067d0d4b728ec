use std::time::Duration;

use thiserror::Error;

use crate::files::Constraints;
use crate::tus::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub target: TargetConfig,
    pub upload: UploadConfig,
    /// Directory holding the resume database
    pub data_dir: String,
    /// File-type registry base URL. Unset disables the extension allowlist.
    pub formats_api: Option<String>,
}

/// The ingest service and the identity headers it expects.
#[derive(Debug, Clone)]
pub struct TargetConfig {
    /// Base URL; uploads go to `{base_url}/files`
    pub base_url: String,
    pub env_name: String,
    pub config_name: String,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub max_concurrent_uploads: usize,
    /// Maximum file size in bytes (inclusive)
    pub max_file_size: u64,
    /// Largest PATCH body in bytes
    pub chunk_size: u64,
    pub retry_delays_ms: Vec<u64>,
    pub max_retries: u32,
    /// Applies to resume discovery, upload creation and the finalize call
    pub request_timeout_secs: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            env_name: "default".to_string(),
            config_name: "default".to_string(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: 3,
            max_file_size: 1_000_000 * 1024 * 1024,
            chunk_size: 8 * 1024 * 1024, // 8MB
            retry_delays_ms: vec![1000, 5000, 10000],
            max_retries: 2,
            request_timeout_secs: 30,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: TargetConfig::default(),
            upload: UploadConfig::default(),
            data_dir: "./data".to_string(),
            formats_api: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = UploadConfig::default();

        let base_url = std::env::var("UPLOAD_TARGET")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| TargetConfig::default().base_url);

        let env_name = std::env::var("AUTH_ENV_NAME").unwrap_or_else(|_| "default".to_string());
        let config_name =
            std::env::var("ASSISTANT_CONFIG_NAME").unwrap_or_else(|_| "default".to_string());

        let retry_delays_ms = match std::env::var("RETRY_DELAYS_MS") {
            Ok(raw) => raw
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<u64>().map_err(|_| {
                        ConfigError::ValidationError(format!(
                            "RETRY_DELAYS_MS contains a non-numeric value: {s}"
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            Err(_) => defaults.retry_delays_ms.clone(),
        };

        let config = Config {
            target: TargetConfig {
                base_url,
                env_name,
                config_name,
            },
            upload: UploadConfig {
                max_concurrent_uploads: env_parse("MAX_CONCURRENT_UPLOADS")
                    .unwrap_or(defaults.max_concurrent_uploads),
                max_file_size: env_parse("MAX_FILE_SIZE").unwrap_or(defaults.max_file_size),
                chunk_size: env_parse("CHUNK_SIZE").unwrap_or(defaults.chunk_size),
                retry_delays_ms,
                max_retries: env_parse("MAX_RETRIES").unwrap_or(defaults.max_retries),
                request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS")
                    .unwrap_or(defaults.request_timeout_secs),
            },
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            formats_api: std::env::var("FORMATS_API")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if reqwest::Url::parse(&self.target.base_url).is_err() {
            return Err(ConfigError::ValidationError(format!(
                "UPLOAD_TARGET is not a valid URL: {}",
                self.target.base_url
            )));
        }

        if self.upload.max_concurrent_uploads == 0 {
            return Err(ConfigError::ValidationError(
                "MAX_CONCURRENT_UPLOADS must be greater than 0".to_string(),
            ));
        }

        if self.upload.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "CHUNK_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.upload.max_file_size == 0 {
            return Err(ConfigError::ValidationError(
                "MAX_FILE_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.upload.retry_delays_ms.is_empty() && self.upload.max_retries > 0 {
            tracing::warn!(
                "MAX_RETRIES is {} but RETRY_DELAYS_MS is empty; retries will not wait",
                self.upload.max_retries
            );
        }

        Ok(())
    }

    pub fn upload_endpoint(&self) -> String {
        format!("{}/files", self.target.base_url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.upload.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            delays: self
                .upload
                .retry_delays_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            max_retries: self.upload.max_retries,
        }
    }

    pub fn constraints(&self) -> Constraints {
        Constraints::default().with_max_file_size(self.upload.max_file_size)
    }
}
