//! JSON-over-HTTP probe
//!
//! Talks to the authentication gateway endpoint configured in `[probe]`:
//!
//! - `GET  {base}/status`                : `ConnectionInfo`, or `null`/204 when nobody is online
//! - `POST {base}/account`               : `AccountInfo` for the posted credentials
//! - `POST {base}/login`                 : log this link in
//! - `POST {base}/logout`                : log this link out
//! - `POST {base}/sessions/{id}/logout`  : terminate one session
//!
//! 401/403 become `ProbeError::Auth`; any other non-success status or an
//! undecodable body becomes `ProbeError::Protocol`; send failures and
//! timeouts become `ProbeError::Transport`.

use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{AccountInfo, ConnectionInfo, Credentials, Probe, ProbeError, ProbeFuture, Result};

/// Production probe backed by a shared `reqwest::Client`.
pub struct HttpProbe {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpProbe {
    /// Build a probe for the gateway at `base_url`.
    ///
    /// `timeout` bounds each individual request; there is no retry here, the
    /// next scheduled refresh is the retry.
    pub fn new(client: reqwest::Client, base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ProbeError::Protocol(format!("invalid gateway url {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ProbeError::Protocol(format!(
                "gateway url cannot carry a path: {base_url}"
            )));
        }
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    /// Append path segments to the base url. Segments are percent-encoded,
    /// so session ids cannot escape the `/sessions/` prefix.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = request
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ProbeError::Transport(format!("{what} request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ProbeError::Auth(format!("{what} rejected ({status}): {body}")));
        }

        Err(ProbeError::Protocol(format!(
            "{what} returned {status}: {body}"
        )))
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T> {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProbeError::Transport(format!("{what} body read failed: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ProbeError::Protocol(format!("invalid {what} response: {e}")))
    }

    fn credentials_body(credentials: &Credentials) -> serde_json::Value {
        serde_json::json!({
            "username": credentials.username,
            "password": credentials.secret.expose(),
        })
    }
}

impl Probe for HttpProbe {
    fn id(&self) -> &str {
        "http"
    }

    fn connection_status(&self) -> ProbeFuture<'_, Option<ConnectionInfo>> {
        Box::pin(async move {
            let request = self.client.get(self.endpoint(&["status"]));
            let response = self.send(request, "status").await?;
            if response.status() == StatusCode::NO_CONTENT {
                debug!("status probe: nobody online");
                return Ok(None);
            }
            Self::read_json::<Option<ConnectionInfo>>(response, "status").await
        })
    }

    fn account_info<'a>(&'a self, credentials: &'a Credentials) -> ProbeFuture<'a, AccountInfo> {
        Box::pin(async move {
            let request = self
                .client
                .post(self.endpoint(&["account"]))
                .json(&Self::credentials_body(credentials));
            let response = self.send(request, "account info").await?;
            Self::read_json(response, "account info").await
        })
    }

    fn login<'a>(&'a self, credentials: &'a Credentials) -> ProbeFuture<'a, ()> {
        Box::pin(async move {
            let request = self
                .client
                .post(self.endpoint(&["login"]))
                .json(&Self::credentials_body(credentials));
            self.send(request, "login").await?;
            Ok(())
        })
    }

    fn logout(&self) -> ProbeFuture<'_, ()> {
        Box::pin(async move {
            let request = self.client.post(self.endpoint(&["logout"]));
            self.send(request, "logout").await?;
            Ok(())
        })
    }

    fn logout_session<'a>(&'a self, session_id: &'a str) -> ProbeFuture<'a, ()> {
        Box::pin(async move {
            let request = self
                .client
                .post(self.endpoint(&["sessions", session_id, "logout"]));
            self.send(request, "session logout").await?;
            Ok(())
        })
    }
}
