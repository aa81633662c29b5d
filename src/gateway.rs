//! The API gateway capability: one authenticated request in, parsed JSON out.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use crate::error::Result;
use crate::models::Cookies;

/// Which backend host an endpoint lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiHost {
    /// Personal storage endpoints (`file`, `task`, ...).
    Drive,
    /// Share page endpoints (`share/sharepage/...`).
    Share,
    /// Account endpoints.
    Account,
}

/// A single backend request.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub host: ApiHost,
    pub endpoint: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Whether the request needs session cookies.
    pub authenticated: bool,
}

impl ApiRequest {
    pub fn get(host: ApiHost, endpoint: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            host,
            endpoint: endpoint.into(),
            query: Vec::new(),
            body: None,
            authenticated: true,
        }
    }

    pub fn post(host: ApiHost, endpoint: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            host,
            endpoint: endpoint.into(),
            query: Vec::new(),
            body: Some(body),
            authenticated: true,
        }
    }

    pub fn query(mut self, name: &str, value: impl ToString) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    pub fn unauthenticated(mut self) -> Self {
        self.authenticated = false;
        self
    }

    /// Value of a query parameter, if set.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Executes requests against the backend.
///
/// Implementations report transport failures as `PanError::Network`, rejected sessions as
/// `PanError::Auth` and application failures as `PanError::Remote`. On success the full JSON
/// envelope is returned.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn execute(&self, request: &ApiRequest, cookies: Option<&Cookies>) -> Result<Value>;
}
