use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;

use super::TusError;
use crate::config::TargetConfig;

pub const AUTH_ENV_HEADER: &str = "auth-env-name";
pub const CONFIG_NAME_HEADER: &str = "assistant-config-name";
pub const CREDENTIALS_HEADER: &str = "targets-credentials";

/// Access token and target resource, supplied by whoever owns the login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub resource_id: String,
}

impl Credentials {
    /// `None` unless both values are present and non-blank.
    pub fn new(access_token: Option<String>, resource_id: Option<String>) -> Option<Self> {
        let access_token = access_token.filter(|s| !s.trim().is_empty())?;
        let resource_id = resource_id.filter(|s| !s.trim().is_empty())?;
        Some(Self {
            access_token,
            resource_id,
        })
    }
}

#[derive(Serialize)]
struct CredentialBundle<'a> {
    dataverse_api_key: &'a str,
    doi: &'a str,
}

/// Everything the ingest service needs to authorize one upload.
#[derive(Debug, Clone)]
pub struct UploadAuth {
    pub access_token: String,
    pub resource_id: String,
    pub env_name: String,
    pub config_name: String,
}

impl UploadAuth {
    pub fn new(credentials: Credentials, target: &TargetConfig) -> Self {
        Self {
            access_token: credentials.access_token,
            resource_id: credentials.resource_id,
            env_name: target.env_name.clone(),
            config_name: target.config_name.clone(),
        }
    }

    /// Headers sent with every transport and finalize request.
    pub fn headers(&self) -> Result<HeaderMap, TusError> {
        let bundle = serde_json::to_string(&CredentialBundle {
            dataverse_api_key: &self.access_token,
            doi: &self.resource_id,
        })
        .map_err(|e| TusError::InvalidHeader(e.to_string()))?;

        let mut headers = HeaderMap::new();
        for (name, value) in [
            (AUTH_ENV_HEADER, self.env_name.as_str()),
            (CONFIG_NAME_HEADER, self.config_name.as_str()),
            (CREDENTIALS_HEADER, bundle.as_str()),
        ] {
            let value = HeaderValue::from_str(value).map_err(|_| {
                TusError::InvalidHeader(format!("{name} contains invalid characters"))
            })?;
            headers.insert(HeaderName::from_static(name), value);
        }
        Ok(headers)
    }
}
