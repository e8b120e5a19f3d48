//! Pluggable request execution
//!
//! The scheduler never talks HTTP itself. It hands a [`RequestDefinition`] to
//! a [`RequestExecutor`] and inspects the resulting [`ApiResponse`] headers.

use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;

use crate::error::ExecuteError;

mod http;

pub use http::HttpExecutor;

/// Description of one outbound call, opaque to the scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDefinition {
    pub method: Method,
    /// Path relative to the executor's base URL
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl RequestDefinition {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Successful response: decoded JSON plus the raw metadata
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub json: serde_json::Value,
}

impl ApiResponse {
    /// Deserialize the JSON body into a typed value
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.json.clone())
    }
}

/// Performs the actual call for a scheduled request
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, request: &RequestDefinition) -> Result<ApiResponse, ExecuteError>;
}
