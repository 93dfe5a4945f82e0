//! Proxmox VE API client.
//!
//! A single shared HTTPS client used by every sub-collector, within and
//! across scrapes. It owns the authentication state: in token mode a static
//! `Authorization` header, in password mode a ticket + CSRF token pair kept
//! under a readers-writer lock and refreshed once per scrape.

use crate::config::ProxmoxConfig;
use crate::error::{ExporterError, Result};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;

/// Session ticket obtained from `/access/ticket` in password mode.
/// Both fields stay empty in token mode and are never consulted.
#[derive(Debug, Default, Clone)]
struct AuthSession {
    ticket: String,
    csrf: String,
}

/// Generic PVE API response envelope.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

#[derive(Debug, Deserialize)]
struct TicketData {
    ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    csrf_token: String,
}

/// PVE API client shared across all sub-collectors.
pub struct PveClient {
    http: Client,
    config: ProxmoxConfig,
    base_url: String,
    /// Pre-formatted `PVEAPIToken={id}={secret}` header, token mode only.
    token_header: Option<String>,
    session: RwLock<AuthSession>,
}

impl PveClient {
    /// Create a new client from configuration. The connection pool is sized
    /// to sustain the per-scrape fan-out without handshake storms.
    pub fn new(config: ProxmoxConfig) -> Result<Self> {
        let base_url = format!("https://{}:{}/api2/json", config.host, config.port);
        Self::with_base_url(config, base_url)
    }

    /// Create a client against an explicit API base URL (everything up to and
    /// including `/api2/json`). Production code goes through [`PveClient::new`];
    /// this entry point lets the test suite target a plain-HTTP mock server.
    pub fn with_base_url(config: ProxmoxConfig, base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        let token_header = config.uses_token().then(|| {
            format!("PVEAPIToken={}={}", config.token_id, config.token_secret)
        });

        Ok(Self {
            http,
            config,
            base_url: base_url.into(),
            token_header,
            session: RwLock::new(AuthSession::default()),
        })
    }

    /// Ensure a usable session exists for this scrape.
    ///
    /// Token mode needs no session. Password mode re-issues the ticket on
    /// every scrape; Proxmox tickets expire after ~2 hours and the exporter
    /// does not track their age.
    pub async fn ensure_session(&self) -> Result<()> {
        if self.token_header.is_some() {
            return Ok(());
        }

        let url = format!("{}/access/ticket", self.base_url);
        debug!("Requesting session ticket from {url}");

        let response = self
            .http
            .post(&url)
            .form(&[
                ("username", self.config.user.as_str()),
                ("password", self.config.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ExporterError::Auth(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ExporterError::Auth(format!(
                "ticket request failed with status {}",
                response.status().as_u16()
            )));
        }

        let body: ApiResponse<TicketData> = response
            .json()
            .await
            .map_err(|e| ExporterError::Auth(format!("failed to decode ticket response: {e}")))?;

        let mut session = self.session.write().expect("auth session lock poisoned");
        session.ticket = body.data.ticket;
        session.csrf = body.data.csrf_token;

        Ok(())
    }

    /// Issue an authenticated GET against an API path (e.g. `/nodes`).
    /// Returns the raw response body on HTTP 200.
    pub async fn get_raw(&self, path: &str) -> Result<Vec<u8>> {
        let url = format!("{}{}", self.base_url, path);

        let mut request = self.http.get(&url);
        match &self.token_header {
            Some(header) => {
                request = request.header(reqwest::header::AUTHORIZATION, header);
            }
            None => {
                let session = self.session.read().expect("auth session lock poisoned");
                request = request
                    .header(
                        reqwest::header::COOKIE,
                        format!("PVEAuthCookie={}", session.ticket),
                    )
                    .header("CSRFPreventionToken", session.csrf.clone());
            }
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::OK => Ok(response.bytes().await?.to_vec()),
            StatusCode::UNAUTHORIZED => Err(ExporterError::Unauthorized),
            status => Err(ExporterError::Upstream(status.as_u16())),
        }
    }

    /// Issue an authenticated GET and decode the `{ "data": ... }` envelope.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let body = self.get_raw(path).await?;
        let envelope: ApiResponse<T> = serde_json::from_slice(&body)
            .map_err(|e| ExporterError::Parse(format!("{path}: {e}")))?;
        Ok(envelope.data)
    }
}
