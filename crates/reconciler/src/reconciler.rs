//! Status reconciler: single-flight refresh cycles over the account state
//!
//! Two refresh kinds run independently:
//! - status refresh: lightweight connection probe, drives `Status`
//! - info refresh: account probe, drives usage, balance and sessions
//!
//! Each kind is guarded by its own in-flight flag. A refresh requested while
//! one of the same kind is outstanding is dropped (`RefreshOutcome::Skipped`),
//! not queued, so a hanging probe never builds a backlog and replies cannot
//! be applied out of order. Completion handlers take the state write lock,
//! merge, stamp the check time and notify the presenter exactly once.
//!
//! User actions (login, logout, session logout) are not guarded; the
//! scheduler follows each of them with a full refresh.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::Utc;
use probe::{Credentials, Probe};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::policy::PolicyConfig;
use crate::presenter::Presenter;
use crate::state::{AccountState, Status, StatusReport};

/// Why a status refresh was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshCause {
    /// Periodic timer tick
    Timer,
    /// Explicit user refresh
    User,
    /// Follow-up after a user login/logout/session logout
    FollowUp,
    /// Follow-up after an automatic login; does not re-run the policy
    AutoLoginFollowUp,
}

impl RefreshCause {
    pub fn as_str(self) -> &'static str {
        match self {
            RefreshCause::Timer => "timer",
            RefreshCause::User => "user",
            RefreshCause::FollowUp => "follow_up",
            RefreshCause::AutoLoginFollowUp => "auto_login_follow_up",
        }
    }
}

/// Who asked for a login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginTrigger {
    Auto,
    User,
}

impl LoginTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            LoginTrigger::Auto => "auto",
            LoginTrigger::User => "user",
        }
    }
}

/// Result of a refresh request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Another refresh of the same kind was in flight, or there is nothing to refresh
    Skipped,
    /// The probe replied and the reply was merged
    Succeeded,
    /// The probe failed; the failure was folded into state
    Failed,
}

/// Claimed in-flight flag, released on drop (including when the refresh
/// future itself is dropped mid-await).
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn claim(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owner of `AccountState`. All writes go through the refresh handlers here.
pub struct Reconciler {
    probe: Arc<dyn Probe>,
    credentials: Option<Credentials>,
    auto_manage: AtomicBool,
    state: RwLock<AccountState>,
    status_in_flight: AtomicBool,
    info_in_flight: AtomicBool,
    presenter: Arc<dyn Presenter>,
}

impl Reconciler {
    /// `credentials` is `None` when no account is configured; account probes
    /// and auto-login are then disabled.
    pub fn new(
        probe: Arc<dyn Probe>,
        credentials: Option<Credentials>,
        auto_manage: bool,
        presenter: Arc<dyn Presenter>,
    ) -> Self {
        info!(
            probe = probe.id(),
            account = credentials.as_ref().map(|c| c.username.as_str()),
            auto_manage,
            "reconciler initialized"
        );
        Self {
            probe,
            credentials,
            auto_manage: AtomicBool::new(auto_manage),
            state: RwLock::new(AccountState::new()),
            status_in_flight: AtomicBool::new(false),
            info_in_flight: AtomicBool::new(false),
            presenter,
        }
    }

    /// Configured account name, if any.
    pub fn username(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.username.as_str())
    }

    pub fn auto_manage(&self) -> bool {
        self.auto_manage.load(Ordering::Relaxed)
    }

    /// Flip the user's auto-manage toggle. Takes effect at the next policy check.
    pub fn set_auto_manage(&self, enabled: bool) {
        let previous = self.auto_manage.swap(enabled, Ordering::Relaxed);
        if previous != enabled {
            info!(enabled, "auto-manage toggled");
        }
    }

    pub fn policy_config(&self) -> PolicyConfig {
        PolicyConfig {
            auto_manage_enabled: self.auto_manage(),
            has_configured_account: self.credentials.is_some(),
        }
    }

    /// Clone of the current state.
    pub async fn snapshot(&self) -> AccountState {
        self.state.read().await.clone()
    }

    /// Run one status refresh unless one is already in flight.
    pub async fn refresh_status(&self, cause: RefreshCause) -> RefreshOutcome {
        let Some(_guard) = InFlight::claim(&self.status_in_flight) else {
            debug!(cause = cause.as_str(), "status refresh already in flight, skipping");
            metrics::counter!("nettray_refresh_skipped_total", "kind" => "status").increment(1);
            return RefreshOutcome::Skipped;
        };

        debug!(cause = cause.as_str(), "refreshing status");
        let started = Instant::now();
        let result = self.probe.connection_status().await;
        record_duration("status", started);
        let outcome = match &result {
            Ok(_) => RefreshOutcome::Succeeded,
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "status probe failed");
                RefreshOutcome::Failed
            }
        };

        let mut state = self.state.write().await;
        let previous = state.status;
        let status = state.apply_status_report(StatusReport::from(result), self.username(), Utc::now());
        if status != previous {
            info!(from = previous.as_str(), to = status.as_str(), "status changed");
        }
        record_refresh("status", outcome);
        metrics::gauge!("nettray_status").set(status.code());
        self.presenter.render(&state);
        outcome
    }

    /// Run one account-info refresh unless one is already in flight or no
    /// account is configured.
    pub async fn refresh_info(&self) -> RefreshOutcome {
        let Some(credentials) = self.credentials.as_ref() else {
            debug!("no account configured, skipping info refresh");
            return RefreshOutcome::Skipped;
        };
        let Some(_guard) = InFlight::claim(&self.info_in_flight) else {
            debug!("info refresh already in flight, skipping");
            metrics::counter!("nettray_refresh_skipped_total", "kind" => "info").increment(1);
            return RefreshOutcome::Skipped;
        };

        debug!(account = %credentials.username, "refreshing account info");
        let started = Instant::now();
        let result = self.probe.account_info(credentials).await;
        record_duration("info", started);
        let (report, outcome) = match result {
            Ok(info) => {
                debug!(sessions = info.sessions.len(), "account info received");
                (Some(info), RefreshOutcome::Succeeded)
            }
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "account info probe failed, keeping previous figures");
                (None, RefreshOutcome::Failed)
            }
        };

        let mut state = self.state.write().await;
        state.apply_info_report(report, Utc::now());
        record_refresh("info", outcome);
        self.presenter.render(&state);
        outcome
    }

    /// Ask the gateway to log this link in with the configured account.
    pub async fn login(&self, trigger: LoginTrigger) -> Result<()> {
        let credentials = self.credentials.as_ref().ok_or(Error::NoAccount)?;
        info!(trigger = trigger.as_str(), account = %credentials.username, "logging in");
        let result = self.probe.login(credentials).await;
        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(
            "nettray_login_attempts_total",
            "trigger" => trigger.as_str(),
            "outcome" => outcome
        )
        .increment(1);
        if let Err(e) = &result {
            warn!(trigger = trigger.as_str(), error = %e, kind = e.kind(), "login failed");
        }
        result.map_err(Error::from)
    }

    /// Ask the gateway to log this link out. Allowed while already offline.
    pub async fn logout(&self) -> Result<()> {
        info!("logging out");
        self.probe.logout().await.map_err(|e| {
            warn!(error = %e, kind = e.kind(), "logout failed");
            Error::from(e)
        })
    }

    /// Terminate one of the account's sessions, which may be this link's own.
    pub async fn logout_session(&self, session_id: &str) -> Result<()> {
        info!(session_id, "logging out session");
        self.probe.logout_session(session_id).await.map_err(|e| {
            warn!(session_id, error = %e, kind = e.kind(), "session logout failed");
            Error::from(e)
        })
    }

    /// Status as of the last completed refresh.
    pub async fn status(&self) -> Status {
        self.state.read().await.status
    }
}

fn record_duration(kind: &'static str, started: Instant) {
    metrics::histogram!("nettray_refresh_duration_seconds", "kind" => kind)
        .record(started.elapsed().as_secs_f64());
}

fn record_refresh(kind: &'static str, outcome: RefreshOutcome) {
    let outcome = match outcome {
        RefreshOutcome::Succeeded => "ok",
        RefreshOutcome::Failed => "error",
        RefreshOutcome::Skipped => "skipped",
    };
    metrics::counter!("nettray_refresh_total", "kind" => kind, "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CountingPresenter, FakeProbe, alice_online, bob_online};
    use probe::AccountInfo;

    fn build(probe: Arc<FakeProbe>, account: Option<&str>) -> (Arc<Reconciler>, Arc<CountingPresenter>) {
        let presenter = Arc::new(CountingPresenter::default());
        let credentials = account.map(crate::test_support::credentials);
        let reconciler = Arc::new(Reconciler::new(probe, credentials, true, presenter.clone()));
        (reconciler, presenter)
    }

    #[tokio::test]
    async fn nobody_online_goes_offline() {
        let probe = Arc::new(FakeProbe::new());
        let (reconciler, presenter) = build(probe.clone(), Some("alice"));

        let outcome = reconciler.refresh_status(RefreshCause::Timer).await;

        assert_eq!(outcome, RefreshOutcome::Succeeded);
        let state = reconciler.snapshot().await;
        assert_eq!(state.status, Status::Offline);
        assert!(state.sessions.is_empty());
        assert!(state.total_usage_bytes.is_none());
        assert!(state.last_status_check.is_some());
        assert_eq!(presenter.renders(), 1);
    }

    #[tokio::test]
    async fn own_session_goes_online() {
        let probe = Arc::new(FakeProbe::new());
        probe.set_status(Ok(Some(alice_online())));
        let (reconciler, _) = build(probe, Some("alice"));

        reconciler.refresh_status(RefreshCause::Timer).await;

        let state = reconciler.snapshot().await;
        assert_eq!(state.status, Status::Online);
        let session = state.current_session.unwrap();
        assert_eq!(session.ip, "10.0.0.5");
        assert_eq!(session.usage_bytes, 1024);
    }

    #[tokio::test]
    async fn others_session_keeps_account_figures() {
        let probe = Arc::new(FakeProbe::new());
        probe.set_info(Ok(crate::test_support::account_info(&["s1", "s2"])));
        let (reconciler, _) = build(probe.clone(), Some("alice"));
        reconciler.refresh_info().await;
        let before = reconciler.snapshot().await;

        probe.set_status(Ok(Some(bob_online())));
        reconciler.refresh_status(RefreshCause::Timer).await;

        let after = reconciler.snapshot().await;
        assert_eq!(after.status, Status::OthersAccountOnline);
        assert_eq!(after.total_usage_bytes, before.total_usage_bytes);
        assert_eq!(after.balance, before.balance);
        assert_eq!(after.sessions, before.sessions);
    }

    #[tokio::test]
    async fn probe_failure_sets_error_and_still_notifies() {
        let probe = Arc::new(FakeProbe::new());
        probe.set_status(Err("gateway unreachable".into()));
        let (reconciler, presenter) = build(probe, Some("alice"));

        let outcome = reconciler.refresh_status(RefreshCause::Timer).await;

        assert_eq!(outcome, RefreshOutcome::Failed);
        let state = reconciler.snapshot().await;
        assert_eq!(state.status, Status::Error);
        assert!(state.last_status_check.is_some());
        assert_eq!(presenter.renders(), 1);
    }

    #[tokio::test]
    async fn concurrent_status_refresh_is_skipped() {
        let probe = Arc::new(FakeProbe::new());
        let gate = probe.hold_status();
        let (reconciler, presenter) = build(probe.clone(), Some("alice"));

        let first = tokio::spawn({
            let reconciler = reconciler.clone();
            async move { reconciler.refresh_status(RefreshCause::Timer).await }
        });
        probe.status_entered().await;

        let second = reconciler.refresh_status(RefreshCause::User).await;
        assert_eq!(second, RefreshOutcome::Skipped);
        assert_eq!(probe.status_calls(), 1, "no duplicate probe call");
        assert_eq!(presenter.renders(), 0, "no notification from the skipped call");

        gate.notify_one();
        assert_eq!(first.await.unwrap(), RefreshOutcome::Succeeded);
        assert_eq!(presenter.renders(), 1);

        // Guard released: the next refresh runs again
        probe.release_status();
        assert_eq!(
            reconciler.refresh_status(RefreshCause::Timer).await,
            RefreshOutcome::Succeeded
        );
        assert_eq!(probe.status_calls(), 2);
    }

    #[tokio::test]
    async fn status_in_flight_does_not_block_info() {
        let probe = Arc::new(FakeProbe::new());
        let gate = probe.hold_status();
        let (reconciler, _) = build(probe.clone(), Some("alice"));

        let pending = tokio::spawn({
            let reconciler = reconciler.clone();
            async move { reconciler.refresh_status(RefreshCause::Timer).await }
        });
        probe.status_entered().await;

        assert_eq!(reconciler.refresh_info().await, RefreshOutcome::Succeeded);
        assert_eq!(probe.info_calls(), 1);

        gate.notify_one();
        pending.await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_info_refresh_is_skipped() {
        let probe = Arc::new(FakeProbe::new());
        let gate = probe.hold_info();
        let (reconciler, presenter) = build(probe.clone(), Some("alice"));

        let first = tokio::spawn({
            let reconciler = reconciler.clone();
            async move { reconciler.refresh_info().await }
        });
        probe.info_entered().await;

        assert_eq!(reconciler.refresh_info().await, RefreshOutcome::Skipped);
        assert_eq!(probe.info_calls(), 1, "no duplicate account probe");
        assert_eq!(presenter.renders(), 0);

        gate.notify_one();
        assert_eq!(first.await.unwrap(), RefreshOutcome::Succeeded);
        assert_eq!(presenter.renders(), 1);

        probe.release_info();
        assert_eq!(reconciler.refresh_info().await, RefreshOutcome::Succeeded);
        assert_eq!(probe.info_calls(), 2);
    }

    #[tokio::test]
    async fn info_in_flight_does_not_block_status() {
        let probe = Arc::new(FakeProbe::new());
        let gate = probe.hold_info();
        let (reconciler, _) = build(probe.clone(), Some("alice"));

        let pending = tokio::spawn({
            let reconciler = reconciler.clone();
            async move { reconciler.refresh_info().await }
        });
        probe.info_entered().await;

        assert_eq!(
            reconciler.refresh_status(RefreshCause::Timer).await,
            RefreshOutcome::Succeeded
        );
        assert_eq!(probe.status_calls(), 1);
        assert_eq!(reconciler.status().await, Status::Offline);

        gate.notify_one();
        assert_eq!(pending.await.unwrap(), RefreshOutcome::Succeeded);
    }

    #[tokio::test]
    async fn dropped_refresh_releases_guard() {
        let probe = Arc::new(FakeProbe::new());
        let _gate = probe.hold_status();
        let (reconciler, _) = build(probe.clone(), Some("alice"));

        let pending = tokio::spawn({
            let reconciler = reconciler.clone();
            async move { reconciler.refresh_status(RefreshCause::Timer).await }
        });
        probe.status_entered().await;
        pending.abort();
        let _ = pending.await;

        probe.release_status();
        assert_eq!(
            reconciler.refresh_status(RefreshCause::Timer).await,
            RefreshOutcome::Succeeded
        );
    }

    #[tokio::test]
    async fn info_failure_keeps_sessions() {
        let probe = Arc::new(FakeProbe::new());
        probe.set_info(Ok(crate::test_support::account_info(&["s1", "s2"])));
        let (reconciler, presenter) = build(probe.clone(), Some("alice"));
        reconciler.refresh_info().await;
        let before = reconciler.snapshot().await;

        probe.set_info(Err("timeout".into()));
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let outcome = reconciler.refresh_info().await;

        assert_eq!(outcome, RefreshOutcome::Failed);
        let after = reconciler.snapshot().await;
        let ids: Vec<_> = after.sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["s1", "s2"]);
        assert_eq!(after.total_usage_bytes, before.total_usage_bytes);
        assert_eq!(after.balance, before.balance);
        assert!(after.last_info_check > before.last_info_check);
        assert_eq!(presenter.renders(), 2);
    }

    #[tokio::test]
    async fn info_success_replaces_snapshot() {
        let probe = Arc::new(FakeProbe::new());
        probe.set_info(Ok(crate::test_support::account_info(&["s1", "s2"])));
        let (reconciler, _) = build(probe.clone(), Some("alice"));
        reconciler.refresh_info().await;

        probe.set_info(Ok(AccountInfo {
            usage_bytes: 1,
            balance: 2.0,
            sessions: vec![],
        }));
        reconciler.refresh_info().await;

        let state = reconciler.snapshot().await;
        assert!(state.sessions.is_empty());
        assert_eq!(state.total_usage_bytes, Some(1));
        assert_eq!(state.balance, Some(2.0));
    }

    #[tokio::test]
    async fn info_refresh_without_account_is_silent_noop() {
        let probe = Arc::new(FakeProbe::new());
        let (reconciler, presenter) = build(probe.clone(), None);

        assert_eq!(reconciler.refresh_info().await, RefreshOutcome::Skipped);
        assert_eq!(probe.info_calls(), 0);
        assert_eq!(presenter.renders(), 0);
        assert!(reconciler.snapshot().await.last_info_check.is_none());
    }

    #[tokio::test]
    async fn login_without_account_is_rejected() {
        let probe = Arc::new(FakeProbe::new());
        let (reconciler, _) = build(probe.clone(), None);

        let err = reconciler.login(LoginTrigger::User).await.unwrap_err();
        assert!(matches!(err, Error::NoAccount));
        assert_eq!(probe.login_calls(), 0);
    }

    #[tokio::test]
    async fn redundant_login_and_logout_converge_to_probe_status() {
        let probe = Arc::new(FakeProbe::new());
        probe.set_status(Ok(Some(alice_online())));
        let (reconciler, _) = build(probe.clone(), Some("alice"));
        reconciler.refresh_status(RefreshCause::Timer).await;

        // Already online: login is harmless
        for _ in 0..3 {
            reconciler.login(LoginTrigger::User).await.unwrap();
        }
        reconciler.refresh_status(RefreshCause::FollowUp).await;
        assert_eq!(reconciler.status().await, Status::Online);

        reconciler.logout().await.unwrap();
        reconciler.refresh_status(RefreshCause::FollowUp).await;
        assert_eq!(reconciler.status().await, Status::Offline);

        // Already offline: logout is harmless
        for _ in 0..3 {
            reconciler.logout().await.unwrap();
        }
        reconciler.refresh_status(RefreshCause::FollowUp).await;
        assert_eq!(reconciler.status().await, Status::Offline);
    }

    #[tokio::test]
    async fn logout_session_delegates_to_probe() {
        let probe = Arc::new(FakeProbe::new());
        let (reconciler, _) = build(probe.clone(), Some("alice"));

        reconciler.logout_session("s2").await.unwrap();
        assert_eq!(probe.session_logouts(), vec!["s2".to_string()]);
    }

    #[tokio::test]
    async fn auto_manage_toggle_feeds_policy_config() {
        let probe = Arc::new(FakeProbe::new());
        let (reconciler, _) = build(probe, Some("alice"));
        assert!(reconciler.policy_config().auto_manage_enabled);

        reconciler.set_auto_manage(false);
        assert!(!reconciler.auto_manage());
        assert_eq!(
            reconciler.policy_config(),
            PolicyConfig {
                auto_manage_enabled: false,
                has_configured_account: true,
            }
        );
    }

    #[tokio::test]
    async fn refresh_records_metrics() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let probe = Arc::new(FakeProbe::new());
        probe.set_status(Err("down".into()));
        let (reconciler, _) = build(probe, Some("alice"));
        reconciler.refresh_status(RefreshCause::Timer).await;

        let output = handle.render();
        assert!(output.contains("nettray_refresh_total"), "got: {output}");
        assert!(output.contains("outcome=\"error\""));
        assert!(output.contains("nettray_status"));
    }
}
