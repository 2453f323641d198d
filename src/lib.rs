//! Tunnel Proxy - local TCP access to a remote app through a WebSocket tunnel
//!
//! Waits until the remote instance reports ready, then bridges every local
//! connection to its own upstream tunnel connection.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod lifecycle;
pub mod proxy;
pub mod readiness;
pub mod server;

pub use endpoint::{ConnectionKind, Credential, TunnelEndpoint};
pub use error::{Result, TunnelError};
pub use lifecycle::{ProxyOptions, ProxyState, TunnelProxy};
