//! HTTP client for the local chat service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ApiPreferences;

const USER_AGENT: &str = concat!("chatlens/", env!("CARGO_PKG_VERSION"));

/// Failures talking to the chat service.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("could not reach the chat service: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("{message}")]
    Status { status: u16, message: String },
    #[error("unexpected response from the chat service: {0}")]
    Decode(#[source] reqwest::Error),
}

impl ApiError {
    /// HTTP status attached to the failure, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Transport(err) | ApiError::Decode(err) => err.status().map(|s| s.as_u16()),
        }
    }
}

/// Payload of `GET /chat/accounts`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AccountListing {
    #[serde(default)]
    pub accounts: Vec<String>,
    #[serde(default)]
    pub default_account: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl AccountListing {
    pub fn new(accounts: Vec<String>, default_account: Option<String>) -> Self {
        Self {
            accounts,
            default_account,
            status: None,
            message: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

/// Payload of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub service: Option<String>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("healthy")
    }
}

/// Source of the account list consumed by the coordinator.
#[async_trait]
pub trait AccountService: Send + Sync {
    async fn list_accounts(&self) -> Result<AccountListing, ApiError>;
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(preferences: &ApiPreferences) -> Result<Self, ApiError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(preferences.timeout_secs.max(1)))
            .build()
            .map_err(ApiError::Transport)?;
        Ok(Self::with_client(client, &preferences.base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health_check(&self) -> Result<HealthStatus, ApiError> {
        self.get_json("/health").await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "GET");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| {
                warn!(%url, error = %err, "request failed");
                ApiError::Transport(err)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = normalize_status_error(status, &body);
            warn!(%url, status = status.as_u16(), error = %err, "request rejected");
            return Err(err);
        }

        response.json::<T>().await.map_err(ApiError::Decode)
    }
}

#[async_trait]
impl AccountService for ApiClient {
    async fn list_accounts(&self) -> Result<AccountListing, ApiError> {
        self.get_json("/chat/accounts").await
    }
}

/// Turn a non-2xx answer into a message fit for display.
pub fn normalize_status_error(status: StatusCode, body: &str) -> ApiError {
    #[derive(Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        detail: Option<serde_json::Value>,
    }

    let message = match status {
        StatusCode::BAD_REQUEST => serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|parsed| parsed.detail)
            .and_then(|detail| match detail {
                serde_json::Value::String(text) if !text.trim().is_empty() => {
                    Some(text.trim().to_string())
                }
                serde_json::Value::Null | serde_json::Value::String(_) => None,
                other => Some(other.to_string()),
            })
            .unwrap_or_else(|| "request parameters were rejected".to_string()),
        StatusCode::INTERNAL_SERVER_ERROR => "server error, please retry later".to_string(),
        other => format!("request failed with status {}", other.as_u16()),
    };

    ApiError::Status {
        status: status.as_u16(),
        message,
    }
}
