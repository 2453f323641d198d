//! Remote tunnel endpoint, credential and connection kind
//!
//! These values are fixed when a proxy is constructed and never change
//! afterwards.

use base64::Engine;
use serde::Deserialize;
use std::fmt;
use url::Url;

/// Path of the tunnel handler on the remote host
const TUNNEL_PATH: &str = "/AppServiceTunnel/Tunnel.ashx";

/// Query string selecting the v2 status API
const STATUS_QUERY: &str = "GetStatus&GetStatusAPIVer=2";

/// Port the remote tunnel targets while it is wired to the SSH daemon
pub const SSH_TUNNEL_PORT: u16 = 2222;

/// Remote host exposing the status API and the WebSocket tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelEndpoint {
    tunnel_host: String,
    default_app_url: Url,
    secure: bool,
}

impl TunnelEndpoint {
    /// Endpoint reached over `https://` and `wss://`
    pub fn new(tunnel_host: impl Into<String>, default_app_url: Url) -> Self {
        Self {
            tunnel_host: tunnel_host.into(),
            default_app_url,
            secure: true,
        }
    }

    /// Endpoint reached over plain `http://` and `ws://`, for loopback doubles
    pub fn insecure(tunnel_host: impl Into<String>, default_app_url: Url) -> Self {
        Self {
            secure: false,
            ..Self::new(tunnel_host, default_app_url)
        }
    }

    pub fn tunnel_host(&self) -> &str {
        &self.tunnel_host
    }

    pub fn default_app_url(&self) -> &Url {
        &self.default_app_url
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// URL of the status query
    pub fn status_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}{}?{}", scheme, self.tunnel_host, TUNNEL_PATH, STATUS_QUERY)
    }

    /// URL of the WebSocket tunnel
    pub fn tunnel_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}{}", scheme, self.tunnel_host, TUNNEL_PATH)
    }
}

/// Username/password pair presented with HTTP Basic authentication
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    username: String,
    password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Value for the `Authorization` header: `Basic <base64(username:password)>`
    pub fn basic_auth_header(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(raw)
        )
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// What the local port is expected to carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    /// SSH into the remote instance; the tunnel must target port 2222
    Ssh,
    /// Any other application port
    #[default]
    Generic,
}

impl ConnectionKind {
    /// Whether a reported tunnel port is the one this kind expects.
    ///
    /// A mismatch means the remote tunnel is still switching targets.
    pub fn matches_port(self, port: u16) -> bool {
        match self {
            ConnectionKind::Ssh => port == SSH_TUNNEL_PORT,
            ConnectionKind::Generic => port != SSH_TUNNEL_PORT,
        }
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionKind::Ssh => f.write_str("ssh"),
            ConnectionKind::Generic => f.write_str("generic"),
        }
    }
}

impl std::str::FromStr for ConnectionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ssh" => Ok(ConnectionKind::Ssh),
            "generic" => Ok(ConnectionKind::Generic),
            other => Err(format!("unknown connection kind: {}", other)),
        }
    }
}
