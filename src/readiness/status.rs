//! Tunnel status payload returned by the v2 status API

use serde::Deserialize;
use std::fmt;

/// Application state as reported by the tunnel host
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum AppState {
    Starting,
    Started,
    Stopped,
    /// Any value the status API is not known to return
    Other(String),
}

impl From<String> for AppState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "STARTING" => AppState::Starting,
            "STARTED" => AppState::Started,
            "STOPPED" => AppState::Stopped,
            _ => AppState::Other(value),
        }
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppState::Starting => f.write_str("STARTING"),
            AppState::Started => f.write_str("STARTED"),
            AppState::Stopped => f.write_str("STOPPED"),
            AppState::Other(value) => f.write_str(value),
        }
    }
}

/// One status query result. Produced fresh per query, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelStatus {
    pub port: u16,
    pub can_reach_port: bool,
    pub state: AppState,
    #[serde(default, rename = "msg")]
    pub message: String,
}

impl TunnelStatus {
    /// Parse a status body
    pub fn from_json(body: &str) -> serde_json::Result<Self> {
        serde_json::from_str(body)
    }
}
