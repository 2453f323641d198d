//! Error types for the tunnel proxy
//!
//! Retryable readiness conditions are not errors: they are reported as
//! [`ProbeOutcome::RetryableFailure`](crate::readiness::ProbeOutcome) and
//! absorbed by the poller.

use std::time::Duration;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, TunnelError>;

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    /// Network, HTTP or WebSocket failure reaching the remote endpoint
    #[error("unable to establish connection to application: {0}")]
    Transport(String),

    /// Status query failed or returned a payload that could not be parsed
    #[error("unable to establish connection to application: error getting tunnel status: {0}")]
    StatusQuery(String),

    /// Remote instance is in a state that will not become ready
    #[error("unable to establish connection to application: {0}")]
    FatalReadiness(String),

    /// Readiness was not reached before the deadline
    #[error("unable to establish connection to application: timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Caller requested cancellation
    #[error("operation cancelled during {0}")]
    Cancelled(&'static str),

    /// Local listener could not bind
    #[error("failed to bind local port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Per-connection relay failure after the tunnel was established
    #[error("relay error: {0}")]
    Relay(String),

    /// The proxy was disposed before or while starting
    #[error("tunnel proxy has been disposed")]
    Disposed,

    #[error("tunnel proxy has already been started")]
    AlreadyStarted,
}

impl TunnelError {
    /// Short machine-friendly name of the failure kind
    pub fn kind(&self) -> &'static str {
        match self {
            TunnelError::Transport(_) => "transport",
            TunnelError::StatusQuery(_) => "status_query",
            TunnelError::FatalReadiness(_) => "fatal_readiness",
            TunnelError::Timeout(_) => "timeout",
            TunnelError::Cancelled(_) => "cancelled",
            TunnelError::Bind { .. } => "bind",
            TunnelError::Relay(_) => "relay",
            TunnelError::Disposed => "disposed",
            TunnelError::AlreadyStarted => "already_started",
        }
    }
}

impl From<reqwest::Error> for TunnelError {
    fn from(err: reqwest::Error) -> Self {
        TunnelError::Transport(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TunnelError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TunnelError::Relay(err.to_string())
    }
}

impl From<std::io::Error> for TunnelError {
    fn from(err: std::io::Error) -> Self {
        TunnelError::Relay(err.to_string())
    }
}
