//! In-process fakes shared by the reconciler and scheduler tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use common::Secret;
use probe::{
    AccountInfo, ConnectionInfo, Credentials, Probe, ProbeError, ProbeFuture, SessionRecord,
};
use tokio::sync::Notify;

use crate::presenter::Presenter;
use crate::state::{AccountState, Status};

pub fn credentials(username: &str) -> Credentials {
    Credentials::new(username, Secret::new(format!("pw_{username}")))
}

fn connection(username: &str) -> ConnectionInfo {
    ConnectionInfo {
        username: username.into(),
        ip: "10.0.0.5".into(),
        start_time: Utc.timestamp_opt(1_790_000_000, 0).unwrap(),
        usage_bytes: 1024,
        total_usage_bytes: None,
        balance: None,
    }
}

pub fn alice_online() -> ConnectionInfo {
    connection("alice")
}

pub fn bob_online() -> ConnectionInfo {
    connection("bob")
}

pub fn account_info(session_ids: &[&str]) -> AccountInfo {
    AccountInfo {
        usage_bytes: 3_000_000_000,
        balance: 18.5,
        sessions: session_ids
            .iter()
            .map(|id| SessionRecord {
                id: id.to_string(),
                device_name: format!("device-{id}"),
                ip: "10.0.0.7".into(),
                start_time: Utc.timestamp_opt(1_790_000_000, 0).unwrap(),
                usage_bytes: 2048,
            })
            .collect(),
    }
}

/// Scripted probe. Replies are plain `Result<_, String>` so they can be
/// cloned per call; errors surface as `ProbeError::Transport`.
///
/// `login` flips the scripted status to `online_after_login` when set;
/// `logout` flips it to nobody online.
pub struct FakeProbe {
    status: Mutex<Result<Option<ConnectionInfo>, String>>,
    info: Mutex<Result<AccountInfo, String>>,
    login_reply: Mutex<Result<(), String>>,
    online_after_login: Mutex<Option<ConnectionInfo>>,
    status_gate: Mutex<Option<Arc<Notify>>>,
    status_entered: Notify,
    info_gate: Mutex<Option<Arc<Notify>>>,
    info_entered: Notify,
    status_calls: AtomicUsize,
    info_calls: AtomicUsize,
    login_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    session_logouts: Mutex<Vec<String>>,
}

impl FakeProbe {
    /// Nobody online, empty account, every action succeeds.
    pub fn new() -> Self {
        Self {
            status: Mutex::new(Ok(None)),
            info: Mutex::new(Ok(account_info(&[]))),
            login_reply: Mutex::new(Ok(())),
            online_after_login: Mutex::new(None),
            status_gate: Mutex::new(None),
            status_entered: Notify::new(),
            info_gate: Mutex::new(None),
            info_entered: Notify::new(),
            status_calls: AtomicUsize::new(0),
            info_calls: AtomicUsize::new(0),
            login_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            session_logouts: Mutex::new(Vec::new()),
        }
    }

    pub fn set_status(&self, reply: Result<Option<ConnectionInfo>, String>) {
        *self.status.lock().unwrap() = reply;
    }

    pub fn set_info(&self, reply: Result<AccountInfo, String>) {
        *self.info.lock().unwrap() = reply;
    }

    pub fn set_login_reply(&self, reply: Result<(), String>) {
        *self.login_reply.lock().unwrap() = reply;
    }

    pub fn set_online_after_login(&self, info: ConnectionInfo) {
        *self.online_after_login.lock().unwrap() = Some(info);
    }

    /// Make status calls wait until the returned gate is notified.
    pub fn hold_status(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.status_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Let status calls through immediately again.
    pub fn release_status(&self) {
        *self.status_gate.lock().unwrap() = None;
    }

    /// Make account-info calls wait until the returned gate is notified.
    pub fn hold_info(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.info_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn release_info(&self) {
        *self.info_gate.lock().unwrap() = None;
    }

    /// Resolves once an account-info call has started.
    pub async fn info_entered(&self) {
        self.info_entered.notified().await;
    }

    /// Resolves once a status call has started.
    pub async fn status_entered(&self) {
        self.status_entered.notified().await;
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn info_calls(&self) -> usize {
        self.info_calls.load(Ordering::SeqCst)
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn session_logouts(&self) -> Vec<String> {
        self.session_logouts.lock().unwrap().clone()
    }
}

impl Probe for FakeProbe {
    fn id(&self) -> &str {
        "fake"
    }

    fn connection_status(&self) -> ProbeFuture<'_, Option<ConnectionInfo>> {
        Box::pin(async move {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.status_gate.lock().unwrap().clone();
            self.status_entered.notify_one();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            self.status.lock().unwrap().clone().map_err(ProbeError::Transport)
        })
    }

    fn account_info<'a>(&'a self, _credentials: &'a Credentials) -> ProbeFuture<'a, AccountInfo> {
        Box::pin(async move {
            self.info_calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.info_gate.lock().unwrap().clone();
            self.info_entered.notify_one();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            self.info.lock().unwrap().clone().map_err(ProbeError::Transport)
        })
    }

    fn login<'a>(&'a self, _credentials: &'a Credentials) -> ProbeFuture<'a, ()> {
        Box::pin(async move {
            self.login_calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.login_reply.lock().unwrap().clone();
            if reply.is_ok() {
                if let Some(info) = self.online_after_login.lock().unwrap().clone() {
                    *self.status.lock().unwrap() = Ok(Some(info));
                }
            }
            reply.map_err(ProbeError::Auth)
        })
    }

    fn logout(&self) -> ProbeFuture<'_, ()> {
        Box::pin(async move {
            self.logout_calls.fetch_add(1, Ordering::SeqCst);
            *self.status.lock().unwrap() = Ok(None);
            Ok(())
        })
    }

    fn logout_session<'a>(&'a self, session_id: &'a str) -> ProbeFuture<'a, ()> {
        Box::pin(async move {
            self.session_logouts
                .lock()
                .unwrap()
                .push(session_id.to_string());
            Ok(())
        })
    }
}

/// Records every rendered status.
#[derive(Default)]
pub struct CountingPresenter {
    rendered: Mutex<Vec<Status>>,
}

impl CountingPresenter {
    pub fn renders(&self) -> usize {
        self.rendered.lock().unwrap().len()
    }

    pub fn statuses(&self) -> Vec<Status> {
        self.rendered.lock().unwrap().clone()
    }
}

impl Presenter for CountingPresenter {
    fn render(&self, state: &AccountState) {
        self.rendered.lock().unwrap().push(state.status);
    }
}
