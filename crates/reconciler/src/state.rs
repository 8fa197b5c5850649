//! Account state and the merge rules for probe results
//!
//! `AccountState` is owned by the reconciler. The two `apply_*` methods are the
//! only places that mutate it; both are synchronous and run to completion
//! under the reconciler's write lock.
//!
//! Merge rules:
//! - status probe failure: `Error`, nothing else touched
//! - nobody online: `Offline`, nothing else touched
//! - configured account online: `Online`, current session and any piggybacked
//!   totals updated
//! - someone else online: `OthersAccountOnline`, current session only
//! - account probe success: totals, balance and sessions replaced wholesale
//! - account probe failure: previous figures kept
//!
//! Both check timestamps advance on every attempt, successful or not.

use chrono::{DateTime, Utc};
use probe::{AccountInfo, ConnectionInfo, SessionRecord};
use serde::Serialize;

/// Connectivity classification of this link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    #[default]
    Unknown,
    Offline,
    Online,
    OthersAccountOnline,
    Error,
    /// Kept for presenters; the reconciler itself reports probe failures as `Error`.
    NoConnection,
}

impl Status {
    /// Tray label.
    pub fn label(self) -> &'static str {
        match self {
            Status::Unknown => "未知状态",
            Status::Offline => "离线",
            Status::Online => "在线",
            Status::OthersAccountOnline => "他人账号在线",
            Status::Error => "网络错误",
            Status::NoConnection => "无连接",
        }
    }

    /// Machine name, matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Unknown => "UNKNOWN",
            Status::Offline => "OFFLINE",
            Status::Online => "ONLINE",
            Status::OthersAccountOnline => "OTHERS_ACCOUNT_ONLINE",
            Status::Error => "ERROR",
            Status::NoConnection => "NO_CONNECTION",
        }
    }

    /// Numeric code for the status gauge.
    pub fn code(self) -> f64 {
        match self {
            Status::Unknown => 0.0,
            Status::Offline => 1.0,
            Status::Online => 2.0,
            Status::OthersAccountOnline => 3.0,
            Status::Error => 4.0,
            Status::NoConnection => 5.0,
        }
    }

    /// Whether `current_session` describes a live link in this status.
    pub fn has_session(self) -> bool {
        matches!(self, Status::Online | Status::OthersAccountOnline)
    }
}

/// Best-known info about the session on this link.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentSession {
    pub ip: String,
    pub start_time: DateTime<Utc>,
    pub usage_bytes: u64,
}

impl From<&ConnectionInfo> for CurrentSession {
    fn from(info: &ConnectionInfo) -> Self {
        Self {
            ip: info.ip.clone(),
            start_time: info.start_time,
            usage_bytes: info.usage_bytes,
        }
    }
}

/// Result of one connection-status probe, reduced to what the merge needs.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusReport {
    Failed,
    Nobody,
    Connected(ConnectionInfo),
}

impl<E> From<Result<Option<ConnectionInfo>, E>> for StatusReport {
    fn from(result: Result<Option<ConnectionInfo>, E>) -> Self {
        match result {
            Ok(Some(info)) => StatusReport::Connected(info),
            Ok(None) => StatusReport::Nobody,
            Err(_) => StatusReport::Failed,
        }
    }
}

/// Everything the tray shows about the link and the configured account.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccountState {
    pub status: Status,
    /// Only meaningful while `status.has_session()`; left stale otherwise.
    pub current_session: Option<CurrentSession>,
    pub total_usage_bytes: Option<u64>,
    pub balance: Option<f64>,
    pub sessions: Vec<SessionRecord>,
    pub last_status_check: Option<DateTime<Utc>>,
    pub last_info_check: Option<DateTime<Utc>>,
}

impl AccountState {
    /// Fresh state at startup: `Unknown`, nothing known yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a connection-status probe result. Returns the new status.
    ///
    /// `configured_username` is `None` when no account is set up, in which
    /// case any online session counts as someone else's.
    pub fn apply_status_report(
        &mut self,
        report: StatusReport,
        configured_username: Option<&str>,
        now: DateTime<Utc>,
    ) -> Status {
        self.status = match report {
            StatusReport::Failed => Status::Error,
            StatusReport::Nobody => Status::Offline,
            StatusReport::Connected(info) => {
                self.current_session = Some(CurrentSession::from(&info));
                if configured_username == Some(info.username.as_str()) {
                    if let Some(total) = info.total_usage_bytes {
                        self.total_usage_bytes = Some(total);
                    }
                    if let Some(balance) = info.balance {
                        self.balance = Some(balance);
                    }
                    Status::Online
                } else {
                    Status::OthersAccountOnline
                }
            }
        };
        self.last_status_check = Some(now);
        self.status
    }

    /// Merge an account-info probe result. `None` means the probe failed.
    pub fn apply_info_report(&mut self, report: Option<AccountInfo>, now: DateTime<Utc>) {
        if let Some(info) = report {
            self.total_usage_bytes = Some(info.usage_bytes);
            self.balance = Some(info.balance);
            self.sessions = info.sessions;
        }
        self.last_info_check = Some(now);
    }
}
