//! Shared fixtures: a scripted gateway, a counting acquirer and wiring helpers.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use pan_share::auth::{CredentialAcquirer, SessionManager};
use pan_share::config::{PollSettings, TransferSettings};
use pan_share::gateway::{ApiRequest, Gateway};
use pan_share::models::Cookies;
use pan_share::{FileCredentialStore, PanApi, PanError, Result, ShareTransfer, TaskPoller};

/// One scripted gateway reply.
#[derive(Debug, Clone)]
pub enum Step {
    Json(Value),
    Network,
    Auth,
    Remote(i64, &'static str),
    /// Wait on the (possibly paused) tokio clock, then reply.
    Delayed(Duration, Box<Step>),
}

impl Step {
    async fn reply(self) -> Result<Value> {
        let mut step = self;
        while let Step::Delayed(delay, inner) = step {
            tokio::time::sleep(delay).await;
            step = *inner;
        }
        match step {
            Step::Json(value) => Ok(value),
            Step::Network => Err(PanError::Network("connection reset".into())),
            Step::Auth => Err(PanError::Auth("login required".into())),
            Step::Remote(code, message) => Err(PanError::Remote {
                code,
                message: message.to_string(),
            }),
            Step::Delayed(..) => unreachable!(),
        }
    }
}

/// Wrap `data` in a success envelope.
pub fn ok(data: Value) -> Step {
    Step::Json(json!({"status": 200, "code": 0, "message": "ok", "data": data}))
}

pub fn task(status: i64) -> Step {
    ok(json!({"status": status, "task_id": "t1"}))
}

#[derive(Default)]
struct Route {
    steps: VecDeque<Step>,
    last: Option<Step>,
}

/// A recorded gateway call.
#[derive(Debug, Clone)]
pub struct Call {
    pub request: ApiRequest,
    pub cookies: Option<Cookies>,
}

/// Gateway replaying scripted responses per endpoint. The last step of a route repeats.
///
/// Routes are keyed by endpoint, or by `endpoint@pdir_fid` for listings of a specific folder.
#[derive(Default)]
pub struct ScriptedGateway {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, key: &str, steps: Vec<Step>) -> &Self {
        let mut routes = self.routes.lock().unwrap();
        let route = routes.entry(key.to_string()).or_default();
        route.steps.extend(steps);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, endpoint: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.request.endpoint == endpoint)
            .collect()
    }

    pub fn count(&self, endpoint: &str) -> usize {
        self.calls_to(endpoint).len()
    }

    fn next_step(&self, request: &ApiRequest) -> Option<Step> {
        let mut routes = self.routes.lock().unwrap();
        let scoped = request
            .query_value("pdir_fid")
            .map(|fid| format!("{}@{}", request.endpoint, fid));
        let key = match scoped {
            Some(key) if routes.contains_key(&key) => key,
            _ => request.endpoint.clone(),
        };

        let route = routes.get_mut(&key)?;
        match route.steps.pop_front() {
            Some(step) => {
                route.last = Some(step.clone());
                Some(step)
            }
            None => route.last.clone(),
        }
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn execute(&self, request: &ApiRequest, cookies: Option<&Cookies>) -> Result<Value> {
        self.calls.lock().unwrap().push(Call {
            request: request.clone(),
            cookies: cookies.cloned(),
        });

        let step = self.next_step(request).ok_or_else(|| PanError::Remote {
            code: 404,
            message: format!("no scripted route for {}", request.endpoint),
        })?;
        step.reply().await
    }
}

/// Cookies that pass the required-cookie check, tagged so acquisitions are distinguishable.
pub fn login_cookies(tag: &str) -> Cookies {
    let mut cookies = Cookies::new();
    cookies.insert("__pus".to_string(), format!("pus-{}", tag));
    cookies.insert("__puus".to_string(), format!("puus-{}", tag));
    cookies
}

/// Acquirer that counts calls and hands out fresh cookies each time.
pub struct CountingAcquirer {
    qr_calls: AtomicUsize,
    manual_calls: AtomicUsize,
    qr_works: bool,
    manual_works: bool,
    delay: Duration,
}

impl CountingAcquirer {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self::with(true, true, Duration::ZERO))
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self::with(false, false, Duration::ZERO))
    }

    pub fn with(qr_works: bool, manual_works: bool, delay: Duration) -> Self {
        Self {
            qr_calls: AtomicUsize::new(0),
            manual_calls: AtomicUsize::new(0),
            qr_works,
            manual_works,
            delay,
        }
    }

    pub fn qr_calls(&self) -> usize {
        self.qr_calls.load(Ordering::SeqCst)
    }

    pub fn manual_calls(&self) -> usize {
        self.manual_calls.load(Ordering::SeqCst)
    }

    pub fn acquisitions(&self) -> usize {
        self.qr_calls() + self.manual_calls()
    }
}

#[async_trait]
impl CredentialAcquirer for CountingAcquirer {
    async fn acquire_via_qr(&self, timeout: Duration) -> Result<Cookies> {
        let n = self.qr_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.qr_works {
            Ok(login_cookies(&format!("qr{}", n)))
        } else {
            Err(PanError::AcquireTimeout(timeout))
        }
    }

    async fn acquire_manually(&self) -> Result<Cookies> {
        let n = self.manual_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.manual_works {
            Ok(login_cookies(&format!("manual{}", n)))
        } else {
            Err(PanError::AcquireAbandoned("no input".into()))
        }
    }
}

pub fn session_manager(acquirer: Arc<CountingAcquirer>, dir: &TempDir) -> Arc<SessionManager> {
    let store = FileCredentialStore::new(dir.path().join("cookies.json"));
    Arc::new(SessionManager::new(
        acquirer,
        Arc::new(store),
        Duration::from_secs(60),
    ))
}

pub fn api(gateway: Arc<ScriptedGateway>, session: Arc<SessionManager>) -> PanApi {
    PanApi::new(gateway, session, 50)
}

pub fn fast_poll() -> PollSettings {
    PollSettings {
        initial_interval_ms: 100,
        max_interval_ms: 1_000,
        backoff_factor: 2.0,
        max_transient_errors: 3,
        task_timeout_secs: 5,
    }
}

pub fn transfer(api: PanApi) -> ShareTransfer {
    let poller = TaskPoller::new(api.clone(), fast_poll());
    ShareTransfer::new(api, poller, TransferSettings::default())
}

pub fn file(fid: &str, name: &str, size: u64) -> Value {
    json!({
        "fid": fid,
        "file_name": name,
        "size": size,
        "dir": false,
        "share_fid_token": format!("tok-{}", fid),
    })
}

pub fn dir(fid: &str, name: &str) -> Value {
    json!({
        "fid": fid,
        "file_name": name,
        "size": 0,
        "dir": true,
        "share_fid_token": format!("tok-{}", fid),
    })
}

/// Script a share whose root holds `entries`.
pub fn script_share(gateway: &ScriptedGateway, entries: Vec<Value>) {
    gateway.on(
        "share/sharepage/token",
        vec![ok(json!({"stoken": "st-1", "title": "Holiday videos"}))],
    );
    gateway.on(
        "share/sharepage/detail@0",
        vec![ok(json!({"list": entries}))],
    );
}
