//! reqwest-backed request executor

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{ApiResponse, RequestDefinition, RequestExecutor};
use crate::config::HttpConfig;
use crate::error::{ApiError, ApiErrorKind, ExecuteError};

/// Rejection payload returned by the service on non-success responses
#[derive(Debug, Deserialize)]
struct ErrorPayload {
    error: String,
    message: String,
}

/// Executes requests over HTTP, injecting key/token credentials
pub struct HttpExecutor {
    base_url: String,
    key: String,
    token: String,
    http: Client,
}

impl HttpExecutor {
    pub fn new(
        base_url: impl Into<String>,
        key: impl Into<String>,
        token: impl Into<String>,
        http: Client,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key: key.into(),
            token: token.into(),
            http,
        }
    }

    /// Create an executor from configuration
    ///
    /// Reads the key and token from the environment variables named in config.
    pub fn from_config(config: &HttpConfig) -> eyre::Result<Self> {
        debug!(?config, "HttpExecutor::from_config: called");
        let (key, token) = config.credentials()?;
        let http = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self::new(config.base_url.clone(), key, token, http))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    async fn execute(&self, request: &RequestDefinition) -> Result<ApiResponse, ExecuteError> {
        let url = self.url(&request.path);
        debug!(method = %request.method, %url, "HttpExecutor::execute: called");

        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .query(&[("key", self.key.as_str()), ("token", self.token.as_str())])
            .query(&request.query);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let text = response.text().await?;

        if !(200..300).contains(&status) {
            debug!(%status, "HttpExecutor::execute: non-success status");
            let err = match serde_json::from_str::<ErrorPayload>(&text) {
                Ok(payload) => ApiError::new(status, ApiErrorKind::from_code(&payload.error), payload.message),
                Err(_) => ApiError::new(status, ApiErrorKind::Other(format!("HTTP_{}", status)), text),
            };
            return Err(err.with_headers(headers).into());
        }

        let json = if text.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&text)
                .map_err(|e| ExecuteError::Transport(format!("Invalid JSON response: {}", e)))?
        };

        debug!(%status, "HttpExecutor::execute: success");
        Ok(ApiResponse { status, headers, json })
    }
}
