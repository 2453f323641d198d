//! Single-shot readiness probes against the tunnel host
//!
//! A probe is one liveness ping of the application plus one status query.
//! The status is classified into a [`ProbeOutcome`] so that retryable and
//! fatal conditions stay distinct all the way to the poller.

use crate::endpoint::{ConnectionKind, Credential, TunnelEndpoint};
use crate::error::{Result, TunnelError};
use crate::readiness::status::{AppState, TunnelStatus};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bounds TCP connect only. A cold start may hold the response much longer;
/// the poller bounds whole attempts by its own deadline.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of classifying one status query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Remote instance is started and its port is reachable
    Ready,
    /// Expected transient condition; poll again
    RetryableFailure(String),
    /// Condition that will not resolve by waiting
    FatalFailure(String),
}

impl ProbeOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, ProbeOutcome::Ready)
    }
}

/// Remote calls a probe needs
#[async_trait]
pub trait TunnelApi: Send + Sync {
    /// GET the application's default URL and return the HTTP status code.
    ///
    /// Error responses are a valid result; only transport failures are errors.
    async fn ping_app(&self) -> Result<u16>;

    /// Basic-authenticated GET of the tunnel status
    async fn tunnel_status(&self) -> Result<TunnelStatus>;
}

/// [`TunnelApi`] backed by a `reqwest` client
pub struct HttpTunnelApi {
    client: reqwest::Client,
    endpoint: Arc<TunnelEndpoint>,
    credential: Arc<Credential>,
}

impl HttpTunnelApi {
    pub fn new(
        endpoint: Arc<TunnelEndpoint>,
        credential: Arc<Credential>,
        user_agent: &str,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(user_agent)
            .build()
            .map_err(|e| TunnelError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            credential,
        })
    }
}

#[async_trait]
impl TunnelApi for HttpTunnelApi {
    async fn ping_app(&self) -> Result<u16> {
        let response = self
            .client
            .get(self.endpoint.default_app_url().clone())
            .send()
            .await?;
        Ok(response.status().as_u16())
    }

    async fn tunnel_status(&self) -> Result<TunnelStatus> {
        let url = self.endpoint.status_url();
        let response = self
            .client
            .get(&url)
            .basic_auth(self.credential.username(), Some(self.credential.password()))
            .send()
            .await
            .map_err(|e| TunnelError::StatusQuery(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TunnelError::StatusQuery(e.to_string()))?;
        debug!(status = %status, body = %body, "Checking tunnel status");

        if !status.is_success() {
            return Err(TunnelError::StatusQuery(format!(
                "status query returned {}",
                status
            )));
        }

        TunnelStatus::from_json(&body)
            .map_err(|e| TunnelError::StatusQuery(format!("unparsable status body: {}", e)))
    }
}

/// Classify a status without side effects.
///
/// `Stopped` comes back as retryable; [`ReadinessProber::classify`] adds the
/// wake-up ping for that case.
pub fn classify_status(status: &TunnelStatus, kind: ConnectionKind) -> ProbeOutcome {
    match &status.state {
        AppState::Started => {
            if !kind.matches_port(status.port) {
                ProbeOutcome::RetryableFailure("port transition in progress".to_string())
            } else if status.can_reach_port {
                ProbeOutcome::Ready
            } else {
                ProbeOutcome::FatalFailure("port unreachable while started".to_string())
            }
        }
        AppState::Starting => ProbeOutcome::RetryableFailure("starting".to_string()),
        AppState::Stopped => ProbeOutcome::RetryableFailure("stopped".to_string()),
        AppState::Other(state) => {
            ProbeOutcome::FatalFailure(format!("unexpected state: {}", state))
        }
    }
}

/// Issues pings and status queries for one connection kind
#[derive(Clone)]
pub struct ReadinessProber {
    api: Arc<dyn TunnelApi>,
    kind: ConnectionKind,
}

impl ReadinessProber {
    pub fn new(api: Arc<dyn TunnelApi>, kind: ConnectionKind) -> Self {
        Self { api, kind }
    }

    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    /// Nudge the application so the host keeps (or brings) it up
    pub async fn ping_app(&self) -> Result<()> {
        info!("Pinging app default url");
        let code = self.api.ping_app().await?;
        info!(status = code, "Ping responded");
        Ok(())
    }

    pub async fn get_tunnel_status(&self) -> Result<TunnelStatus> {
        self.api.tunnel_status().await.inspect_err(|e| {
            warn!(error = %e, "Tunnel status query failed");
        })
    }

    /// Classify a status; a stopped app is pinged once to wake it
    pub async fn classify(&self, status: &TunnelStatus) -> Result<ProbeOutcome> {
        let outcome = classify_status(status, self.kind);
        if status.state == AppState::Stopped {
            self.ping_app().await?;
        }
        Ok(outcome)
    }

    /// One status query followed by classification
    pub async fn probe(&self) -> Result<ProbeOutcome> {
        let status = self.get_tunnel_status().await?;
        debug!(
            state = %status.state,
            port = status.port,
            can_reach_port = status.can_reach_port,
            message = %status.message,
            "Tunnel status"
        );
        self.classify(&status).await
    }
}
