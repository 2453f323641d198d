//! Connection bridging
//!
//! Each accepted local connection gets its own [`ConnectionBridge`] which
//! opens an upstream tunnel and relays bytes until either side closes.
//! Open bridges are tracked in the [`BridgeRegistry`].
//!
//! ```text
//!   Accepted ──► UpstreamConnecting ──► Relaying ──► Closed
//!                       │                               ▲
//!                       └──── handshake failed / closed ┘
//! ```

pub mod bridge;
pub mod registry;
pub mod upstream;

pub use bridge::{BridgeState, ConnectionBridge, RelayEnd};
pub use registry::{BridgeId, BridgeRegistry};
pub use upstream::{UpstreamConnector, UpstreamStream};
