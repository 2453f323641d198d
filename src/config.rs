//! Proxy configuration
//!
//! Loaded from an optional YAML file (path in `TUNNEL_CONFIG`) with
//! environment variables taking precedence.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::endpoint::{ConnectionKind, Credential, TunnelEndpoint};
use crate::lifecycle::{DEFAULT_USER_AGENT, ProxyOptions};
use crate::readiness::PollSettings;
use crate::readiness::poller::{DEFAULT_DEADLINE, DEFAULT_POLL_INTERVAL};

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local port to listen on; 0 picks a free one
    pub local_port: u16,
    pub tunnel_host: String,
    pub app_url: String,
    pub username: String,
    pub password: String,
    pub kind: ConnectionKind,
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_port: 0,
            tunnel_host: String::new(),
            app_url: String::new(),
            username: String::new(),
            password: String::new(),
            kind: ConnectionKind::Generic,
            timeout_secs: DEFAULT_DEADLINE.as_secs(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("local_port", &self.local_port)
            .field("tunnel_host", &self.tunnel_host)
            .field("app_url", &self.app_url)
            .field("username", &self.username)
            .field("kind", &self.kind)
            .field("timeout_secs", &self.timeout_secs)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load from `TUNNEL_CONFIG` (if set) and the process environment
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::load`] with a custom variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = match lookup("TUNNEL_CONFIG") {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        cfg.apply_overrides(&lookup)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    fn apply_overrides<F>(&mut self, lookup: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("TUNNEL_LOCAL_PORT") {
            self.local_port = port.parse().context("TUNNEL_LOCAL_PORT must be a port number")?;
        }
        if let Some(host) = lookup("TUNNEL_HOST") {
            self.tunnel_host = host;
        }
        if let Some(url) = lookup("TUNNEL_APP_URL") {
            self.app_url = url;
        }
        if let Some(username) = lookup("TUNNEL_USERNAME") {
            self.username = username;
        }
        if let Some(password) = lookup("TUNNEL_PASSWORD") {
            self.password = password;
        }
        if let Some(kind) = lookup("TUNNEL_KIND") {
            self.kind = kind.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(secs) = lookup("TUNNEL_TIMEOUT_SECS") {
            self.timeout_secs = secs.parse().context("TUNNEL_TIMEOUT_SECS must be an integer")?;
        }
        if let Some(ms) = lookup("TUNNEL_POLL_INTERVAL_MS") {
            self.poll_interval_ms = ms
                .parse()
                .context("TUNNEL_POLL_INTERVAL_MS must be an integer")?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.tunnel_host.is_empty() {
            bail!("tunnel_host is required");
        }
        if self.username.is_empty() {
            bail!("username is required");
        }
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be greater than zero");
        }
        Url::parse(&self.app_url).with_context(|| format!("Invalid app_url {:?}", self.app_url))?;
        Ok(())
    }

    pub fn endpoint(&self) -> Result<TunnelEndpoint> {
        let app_url = Url::parse(&self.app_url)
            .with_context(|| format!("Invalid app_url {:?}", self.app_url))?;
        Ok(TunnelEndpoint::new(self.tunnel_host.clone(), app_url))
    }

    pub fn credential(&self) -> Credential {
        Credential::new(self.username.clone(), self.password.clone())
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            deadline: Duration::from_secs(self.timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn proxy_options(&self) -> ProxyOptions {
        ProxyOptions {
            poll: self.poll_settings(),
            user_agent: self.user_agent.clone(),
        }
    }
}
