//! Readiness probing
//!
//! - **`status`**: the status payload model
//! - **`prober`**: one ping plus one status query, classified into a [`ProbeOutcome`]
//! - **`poller`**: drives the prober until ready, fatal, timed out or cancelled

pub mod poller;
pub mod prober;
pub mod status;

pub use poller::{PollSettings, ReadinessPoller};
pub use prober::{HttpTunnelApi, ProbeOutcome, ReadinessProber, TunnelApi, classify_status};
pub use status::{AppState, TunnelStatus};
