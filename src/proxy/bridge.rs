use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::proxy::registry::{BridgeId, BridgeRegistry};
use crate::proxy::upstream::{UpstreamConnector, UpstreamStream};

/// Read buffer size for the client side of a relay
const BUFFER_SIZE: usize = 16 * 1024;

/// Per-connection state machine.
///
/// The client socket is not read until the bridge reaches `Relaying`, so no
/// client bytes arrive before the upstream pipe exists.
pub enum BridgeState {
    Accepted,
    UpstreamConnecting,
    Relaying(UpstreamStream),
    Closed,
}

/// Why a relay stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    ClientClosed,
    UpstreamClosed,
    Disposed,
}

pub struct ConnectionBridge {
    id: BridgeId,
    client: TcpStream,
    peer: SocketAddr,
    connector: UpstreamConnector,
    registry: BridgeRegistry,
    close: CancellationToken,
    state: BridgeState,
}

impl ConnectionBridge {
    /// Wrap an accepted connection that is already registered under `id`
    pub fn new(
        id: BridgeId,
        client: TcpStream,
        peer: SocketAddr,
        connector: UpstreamConnector,
        registry: BridgeRegistry,
        close: CancellationToken,
    ) -> Self {
        Self {
            id,
            client,
            peer,
            connector,
            registry,
            close,
            state: BridgeState::Accepted,
        }
    }

    pub fn id(&self) -> BridgeId {
        self.id
    }

    /// Drive the bridge to `Closed`. Never retries: a broken bridge is done.
    pub async fn run(mut self) {
        loop {
            match std::mem::replace(&mut self.state, BridgeState::Closed) {
                BridgeState::Accepted => {
                    debug!(peer = %self.peer, "Client accepted, holding reads until upstream opens");
                    self.state = BridgeState::UpstreamConnecting;
                }

                BridgeState::UpstreamConnecting => {
                    let opened = tokio::select! {
                        _ = self.close.cancelled() => None,
                        res = self.connector.connect() => Some(res),
                    };

                    self.state = match opened {
                        Some(Ok(upstream)) => BridgeState::Relaying(upstream),
                        Some(Err(e)) => {
                            warn!(peer = %self.peer, error = %e, "Failed to open upstream tunnel");
                            BridgeState::Closed
                        }
                        None => {
                            debug!("Closed before upstream opened");
                            BridgeState::Closed
                        }
                    };
                }

                BridgeState::Relaying(upstream) => {
                    match self.relay(upstream).await {
                        Ok(end) => debug!(?end, "Relay finished"),
                        Err(e) => warn!(peer = %self.peer, error = %e, "Relay failed"),
                    }
                    self.state = BridgeState::Closed;
                }

                BridgeState::Closed => {
                    if let Some(open) = self.registry.deregister(self.id) {
                        info!(peer = %self.peer, open, "Client closed");
                    }
                    break;
                }
            }
        }
    }

    /// Copy bytes both ways until either side closes or the bridge is told to close
    async fn relay(&mut self, upstream: UpstreamStream) -> Result<RelayEnd> {
        let (mut client_rd, mut client_wr) = self.client.split();
        let (mut ws_tx, mut ws_rx) = upstream.split();
        let mut buf = BytesMut::with_capacity(BUFFER_SIZE);

        loop {
            buf.reserve(BUFFER_SIZE);

            tokio::select! {
                _ = self.close.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return Ok(RelayEnd::Disposed);
                }

                read = client_rd.read_buf(&mut buf) => {
                    if read? == 0 {
                        let _ = ws_tx.close().await;
                        return Ok(RelayEnd::ClientClosed);
                    }
                    let chunk = buf.split();
                    ws_tx.send(Message::Binary(chunk.to_vec())).await?;
                }

                frame = ws_rx.next() => match frame {
                    Some(Ok(Message::Binary(data))) => {
                        client_wr.write_all(&data).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        let _ = client_wr.shutdown().await;
                        return Ok(RelayEnd::UpstreamClosed);
                    }
                    // Control and text frames carry no tunnel bytes.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                },
            }
        }
    }
}
