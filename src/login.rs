//! QR-code login over HTTP, with manual cookie entry as the fallback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use qrcode::render::unicode;
use qrcode::QrCode;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::USER_AGENT;
use reqwest::{Client, Url};
use serde::Deserialize;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::{has_required_cookies, CredentialAcquirer, REQUIRED_COOKIES};
use crate::client::DEFAULT_USER_AGENT;
use crate::config::Config;
use crate::error::{PanError, Result};
use crate::models::{parse_cookie_header, Cookies};

const CLIENT_ID: &str = "532";
const API_VERSION: &str = "1.2";

/// Page the phone app opens after scanning.
const QR_LANDING_URL: &str = "https://su.quark.cn/4_eMHBJ";

const STATUS_CONFIRMED: i64 = 2_000_000;
const STATUS_WAITING: i64 = 50_004_001;
const STATUS_EXPIRED: i64 = 50_004_002;

#[derive(Debug, Deserialize)]
struct LoginResponse {
    status: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<LoginData>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    #[serde(default)]
    members: Option<LoginMembers>,
}

#[derive(Debug, Deserialize)]
struct LoginMembers {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    service_ticket: Option<String>,
}

impl LoginResponse {
    fn members(self) -> Option<LoginMembers> {
        self.data.and_then(|d| d.members)
    }
}

/// Acquires cookies by showing a QR code in the terminal and polling until the phone app
/// confirms it.
pub struct QrLoginAcquirer {
    http: Client,
    jar: Arc<Jar>,
    login_base: String,
    account_base: String,
    poll_interval: Duration,
    interactive: bool,
}

impl QrLoginAcquirer {
    pub fn new(config: &Config) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let http = Client::builder()
            .cookie_provider(jar.clone())
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            jar,
            login_base: config.login_base_url.trim_end_matches('/').to_string(),
            account_base: config.account_base_url.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_secs(2),
            interactive: true,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Disable the manual prompt; the fallback then always reports `AcquireAbandoned`.
    pub fn non_interactive(mut self) -> Self {
        self.interactive = false;
        self
    }

    async fn request_qr_token(&self) -> Result<String> {
        let request_id = Uuid::new_v4().to_string();
        let response: LoginResponse = self
            .http
            .get(format!("{}/cas/ajax/getTokenForQrcodeLogin", self.login_base))
            .header(USER_AGENT, DEFAULT_USER_AGENT)
            .query(&[
                ("client_id", CLIENT_ID),
                ("v", API_VERSION),
                ("request_id", request_id.as_str()),
            ])
            .send()
            .await?
            .json()
            .await?;

        let status = response.status;
        let message = response.message.clone().unwrap_or_default();
        response
            .members()
            .and_then(|m| m.token)
            .filter(|t| !t.is_empty())
            .ok_or(PanError::Remote {
                code: status,
                message: format!("no QR token issued: {}", message),
            })
    }

    /// Poll once. `Ok(None)` means not confirmed yet.
    async fn poll_ticket(&self, token: &str) -> Result<Option<String>> {
        let request_id = Uuid::new_v4().to_string();
        let response: LoginResponse = self
            .http
            .get(format!(
                "{}/cas/ajax/getServiceTicketByQrcodeToken",
                self.login_base
            ))
            .header(USER_AGENT, DEFAULT_USER_AGENT)
            .query(&[
                ("client_id", CLIENT_ID),
                ("v", API_VERSION),
                ("token", token),
                ("request_id", request_id.as_str()),
            ])
            .send()
            .await?
            .json()
            .await?;

        match response.status {
            STATUS_CONFIRMED => response
                .members()
                .and_then(|m| m.service_ticket)
                .map(Some)
                .ok_or_else(|| {
                    PanError::UnexpectedResponse("confirmed login without a service ticket".into())
                }),
            STATUS_WAITING => Ok(None),
            STATUS_EXPIRED => Err(PanError::AcquireTimeout(Duration::ZERO)),
            other => {
                debug!(status = other, "unrecognized QR login status");
                Ok(None)
            }
        }
    }

    async fn exchange_ticket(&self, ticket: &str) -> Result<Cookies> {
        let info_url = format!("{}/account/info", self.account_base);
        self.http
            .get(&info_url)
            .header(USER_AGENT, DEFAULT_USER_AGENT)
            .query(&[("st", ticket), ("lw", "scan")])
            .send()
            .await?
            .error_for_status()?;

        let url = Url::parse(&self.account_base)
            .map_err(|e| PanError::Config(format!("invalid account_base_url: {}", e)))?;
        let header = self
            .jar
            .cookies(&url)
            .and_then(|value| value.to_str().ok().map(str::to_string))
            .unwrap_or_default();
        Ok(parse_cookie_header(&header))
    }
}

/// Render `payload` as a terminal QR code.
pub fn render_qr(payload: &str) -> Result<String> {
    let code = QrCode::new(payload.as_bytes())
        .map_err(|e| PanError::UnexpectedResponse(format!("cannot render QR code: {}", e)))?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}

fn qr_payload(token: &str) -> String {
    format!(
        "{}?token={}&client_id={}&ssb=weblogin&uc_param_str=&uc_biz_str=S%3Acustom%7COPT%3ASAREA%400%7COPT%3AIMMERSIVE%401%7COPT%3ABACK_BTN_STYLE%400",
        QR_LANDING_URL, token, CLIENT_ID
    )
}

#[async_trait]
impl CredentialAcquirer for QrLoginAcquirer {
    async fn acquire_via_qr(&self, timeout: Duration) -> Result<Cookies> {
        let token = self.request_qr_token().await?;
        let qr = render_qr(&qr_payload(&token))?;
        eprintln!("{}", qr);
        eprintln!("Scan the QR code with the mobile app to log in.");

        let deadline = Instant::now() + timeout;
        loop {
            match self.poll_ticket(&token).await {
                Ok(Some(ticket)) => {
                    info!("QR code confirmed");
                    return self.exchange_ticket(&ticket).await;
                }
                Ok(None) => {}
                Err(PanError::AcquireTimeout(_)) => {
                    info!("QR code expired");
                    return Err(PanError::AcquireTimeout(timeout));
                }
                Err(err) => return Err(err),
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(PanError::AcquireTimeout(timeout));
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn acquire_manually(&self) -> Result<Cookies> {
        if !self.interactive {
            return Err(PanError::AcquireAbandoned(
                "manual login is disabled in non-interactive mode".into(),
            ));
        }

        let answer = tokio::task::spawn_blocking(|| {
            dialoguer::Input::<String>::new()
                .with_prompt("Paste the Cookie header from a logged-in browser session")
                .allow_empty(true)
                .interact_text()
        })
        .await
        .map_err(|e| PanError::AcquireAbandoned(e.to_string()))?
        .map_err(|e| PanError::AcquireAbandoned(e.to_string()))?;

        let cookies = parse_cookie_header(answer.trim());
        if cookies.is_empty() {
            return Err(PanError::AcquireAbandoned("no cookies entered".into()));
        }
        if !has_required_cookies(&cookies) {
            return Err(PanError::AcquireAbandoned(format!(
                "cookie header lacks one of {:?}",
                REQUIRED_COOKIES
            )));
        }
        Ok(cookies)
    }
}
