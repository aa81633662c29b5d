//! HTTP implementation of the [`Gateway`] capability.

use async_trait::async_trait;
use reqwest::header::{COOKIE, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::error::{PanError, Result};
use crate::gateway::{ApiHost, ApiRequest, Gateway};
use crate::models::{cookie_header, Cookies};

/// Browser-like user agent; the backend rejects unknown clients.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Envelope codes meaning the session is not (or no longer) logged in.
const AUTH_ERROR_CODES: &[i64] = &[31001, 31002];

/// Common fields of every JSON response.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

impl Envelope {
    /// Numeric application code; account endpoints use strings such as `"OK"`.
    fn numeric_code(&self) -> Option<i64> {
        self.code.as_ref().and_then(Value::as_i64)
    }
}

/// Gateway that talks to the backend over HTTPS.
pub struct HttpGateway {
    http: Client,
    drive_base: String,
    share_base: String,
    account_base: String,
}

impl HttpGateway {
    /// Create a gateway for the hosts named in `config`.
    pub fn new(config: &Config) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            drive_base: trim_base(&config.drive_base_url),
            share_base: trim_base(&config.share_base_url),
            account_base: trim_base(&config.account_base_url),
        })
    }

    fn url_for(&self, request: &ApiRequest) -> String {
        let base = match request.host {
            ApiHost::Drive => &self.drive_base,
            ApiHost::Share => &self.share_base,
            ApiHost::Account => &self.account_base,
        };
        format!("{}/{}", base, request.endpoint.trim_start_matches('/'))
    }
}

fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn execute(&self, request: &ApiRequest, cookies: Option<&Cookies>) -> Result<Value> {
        let url = self.url_for(request);
        debug!(method = %request.method, %url, "sending request");

        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .header(USER_AGENT, DEFAULT_USER_AGENT)
            .query(&[("pr", "ucpro"), ("fr", "pc")])
            .query(&request.query);

        if let Some(cookies) = cookies {
            builder = builder.header(COOKIE, cookie_header(cookies));
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(PanError::Auth(format!("{} rejected the session ({})", url, status)));
        }

        let parsed: Option<Value> = serde_json::from_str(&body).ok();
        let envelope = parsed
            .as_ref()
            .and_then(|value| Envelope::deserialize(value).ok());

        if let Some(envelope) = &envelope {
            if let Some(code) = envelope.numeric_code() {
                if AUTH_ERROR_CODES.contains(&code) {
                    return Err(PanError::Auth(
                        envelope.message.clone().unwrap_or_else(|| "login required".into()),
                    ));
                }
                if code != 0 {
                    return Err(PanError::Remote {
                        code,
                        message: envelope.message.clone().unwrap_or_default(),
                    });
                }
            }
        }

        if !status.is_success() {
            return Err(PanError::Remote {
                code: i64::from(status.as_u16()),
                message: envelope.and_then(|e| e.message).unwrap_or(body),
            });
        }

        parsed.ok_or_else(|| {
            PanError::UnexpectedResponse(format!("{} returned a non-JSON body", url))
        })
    }
}
