//! Remote probe abstraction for the campus authentication gateway
//!
//! Defines the `Probe` trait that decouples the status reconciler from the
//! network. Every call is asynchronous and may fail independently; the
//! reconciler only cares whether a call succeeded and, for the connection
//! probe, who (if anyone) is online.
//!
//! `HttpProbe` is the production implementation, speaking JSON to a gateway
//! endpoint. Tests substitute in-process fakes.

pub mod http;

pub use http::HttpProbe;

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use common::Secret;
use serde::{Deserialize, Serialize};

/// Link-level session as reported by the lightweight connection probe.
///
/// `total_usage_bytes` and `balance` are only present when the gateway
/// chooses to piggyback account totals on the status reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub username: String,
    pub ip: String,
    pub start_time: DateTime<Utc>,
    pub usage_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_usage_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
}

/// One device session registered to the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub device_name: String,
    pub ip: String,
    pub start_time: DateTime<Utc>,
    pub usage_bytes: u64,
}

/// Authoritative account snapshot from the account-info probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Usage for the current billing month
    pub usage_bytes: u64,
    pub balance: f64,
    #[serde(default)]
    pub sessions: Vec<SessionRecord>,
}

/// Account credentials handed to login and account-info calls.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub secret: Secret<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: Secret<String>) -> Self {
        Self {
            username: username.into(),
            secret,
        }
    }
}

/// Errors from probe calls.
///
/// The reconciler treats every variant as a plain failure. The split exists
/// for logs and metrics labels.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// Gateway unreachable, connection reset, timeout
    #[error("transport error: {0}")]
    Transport(String),

    /// Credentials rejected
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Unexpected status or undecodable reply
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ProbeError {
    /// Short label for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeError::Transport(_) => "transport",
            ProbeError::Auth(_) => "auth",
            ProbeError::Protocol(_) => "protocol",
        }
    }
}

/// Result alias for probe operations.
pub type Result<T> = std::result::Result<T, ProbeError>;

/// Boxed future returned by every probe call.
pub type ProbeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Remote operations against the authentication gateway.
///
/// Uses boxed future return types for dyn-compatibility (`Arc<dyn Probe>`).
/// Login and logout are idempotent from the caller's side: logging in while
/// online, or out while offline, is allowed and simply reflected by the next
/// status probe.
pub trait Probe: Send + Sync {
    /// Identifier for logging (e.g. "http")
    fn id(&self) -> &str;

    /// Who is logged in on this link, if anyone. `Ok(None)` means nobody.
    fn connection_status(&self) -> ProbeFuture<'_, Option<ConnectionInfo>>;

    /// Usage, balance and active sessions for the given account.
    fn account_info<'a>(&'a self, credentials: &'a Credentials) -> ProbeFuture<'a, AccountInfo>;

    /// Log this link in with the given account.
    fn login<'a>(&'a self, credentials: &'a Credentials) -> ProbeFuture<'a, ()>;

    /// Log this link out.
    fn logout(&self) -> ProbeFuture<'_, ()>;

    /// Terminate one of the account's sessions, possibly this link's own.
    fn logout_session<'a>(&'a self, session_id: &'a str) -> ProbeFuture<'a, ()>;
}
