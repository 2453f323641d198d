//! Upstream tunnel connection
//!
//! Opens the WebSocket to the tunnel host, presenting the credential with
//! Basic auth and asking intermediaries not to cache. Once open, the socket
//! is only used as a byte pipe.

use crate::endpoint::{Credential, TunnelEndpoint};
use crate::error::{Result, TunnelError};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::{
    AUTHORIZATION, CACHE_CONTROL, PRAGMA, USER_AGENT,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

pub type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens upstream tunnel connections for one endpoint and credential
#[derive(Clone)]
pub struct UpstreamConnector {
    endpoint: Arc<TunnelEndpoint>,
    credential: Arc<Credential>,
    user_agent: String,
}

impl UpstreamConnector {
    pub fn new(
        endpoint: Arc<TunnelEndpoint>,
        credential: Arc<Credential>,
        user_agent: impl Into<String>,
    ) -> Self {
        if endpoint.is_secure() {
            // Only the first install wins; later calls are no-ops.
            let _ = rustls::crypto::ring::default_provider().install_default();
        }
        Self {
            endpoint,
            credential,
            user_agent: user_agent.into(),
        }
    }

    /// Build the upgrade request with auth and no-cache headers
    pub fn handshake_request(&self) -> Result<Request> {
        let mut request = self
            .endpoint
            .tunnel_url()
            .into_client_request()
            .map_err(|e| TunnelError::Transport(format!("invalid tunnel url: {}", e)))?;

        let headers = request.headers_mut();
        headers.insert(AUTHORIZATION, header_value(&self.credential.basic_auth_header())?);
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(USER_AGENT, header_value(&self.user_agent)?);

        Ok(request)
    }

    /// Perform the WebSocket handshake
    pub async fn connect(&self) -> Result<UpstreamStream> {
        let request = self.handshake_request()?;
        debug!(url = %self.endpoint.tunnel_url(), "Opening upstream tunnel");

        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| TunnelError::Transport(format!("tunnel handshake failed: {}", e)))?;

        debug!(status = %response.status(), "Upstream tunnel open");
        Ok(stream)
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| TunnelError::Transport(format!("invalid header value: {}", e)))
}
