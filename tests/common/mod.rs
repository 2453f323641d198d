//! Shared fakes for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderMap;
use tunnel_proxy::TunnelError;
use tunnel_proxy::readiness::{AppState, TunnelApi, TunnelStatus};

pub fn status(state: AppState, port: u16, can_reach_port: bool) -> TunnelStatus {
    TunnelStatus {
        port,
        can_reach_port,
        state,
        message: String::new(),
    }
}

pub fn starting() -> TunnelStatus {
    status(AppState::Starting, 0, false)
}

pub fn stopped() -> TunnelStatus {
    status(AppState::Stopped, 0, false)
}

pub fn started(port: u16, can_reach_port: bool) -> TunnelStatus {
    status(AppState::Started, port, can_reach_port)
}

/// Returns queued status results in order, then repeats the last status
pub struct ScriptedApi {
    script: Mutex<VecDeque<Result<TunnelStatus, TunnelError>>>,
    last: Mutex<Option<TunnelStatus>>,
    ping_delay: Duration,
    pings: AtomicUsize,
    status_calls: AtomicUsize,
}

impl ScriptedApi {
    pub fn new(statuses: Vec<TunnelStatus>) -> Arc<Self> {
        Self::with_results(statuses.into_iter().map(Ok).collect())
    }

    pub fn with_results(results: Vec<Result<TunnelStatus, TunnelError>>) -> Arc<Self> {
        Self::build(results, Duration::ZERO)
    }

    /// Every ping takes `delay` to answer, like an app waking from cold
    pub fn with_slow_ping(statuses: Vec<TunnelStatus>, delay: Duration) -> Arc<Self> {
        Self::build(statuses.into_iter().map(Ok).collect(), delay)
    }

    fn build(results: Vec<Result<TunnelStatus, TunnelError>>, ping_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(results.into()),
            last: Mutex::new(None),
            ping_delay,
            pings: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
        })
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TunnelApi for ScriptedApi {
    async fn ping_app(&self) -> tunnel_proxy::Result<u16> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if !self.ping_delay.is_zero() {
            tokio::time::sleep(self.ping_delay).await;
        }
        Ok(200)
    }

    async fn tunnel_status(&self) -> tunnel_proxy::Result<TunnelStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(status)) => {
                *self.last.lock().unwrap() = Some(status.clone());
                Ok(status)
            }
            Some(Err(e)) => Err(e),
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| TunnelError::StatusQuery("script exhausted".to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostMode {
    /// Echo every binary frame back
    Echo,
    /// Send a close frame right after the handshake
    CloseImmediately,
    /// Echo like `Echo`, but drop the TCP connection without a close frame
    /// when a frame carrying [`ABORT`] arrives
    EchoUntilAbort,
}

/// Payload that makes an `EchoUntilAbort` host drop its connection
pub const ABORT: &[u8] = b"abort";

/// Loopback WebSocket server standing in for the tunnel host
pub struct FakeTunnelHost {
    pub addr: SocketAddr,
    handshakes: Arc<Mutex<Vec<HeaderMap>>>,
    received: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl FakeTunnelHost {
    pub async fn spawn(mode: HostMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handshakes = Arc::new(Mutex::new(Vec::new()));
        let (tx, received) = mpsc::unbounded_channel();

        let seen = handshakes.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let seen = seen.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                        seen.lock().unwrap().push(req.headers().clone());
                        Ok(resp)
                    };
                    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                    else {
                        return;
                    };

                    if mode == HostMode::CloseImmediately {
                        let _ = ws.close(None).await;
                    }

                    while let Some(Ok(msg)) = ws.next().await {
                        if let Message::Binary(data) = msg {
                            let _ = tx.send(data.clone());
                            if mode == HostMode::EchoUntilAbort && data.as_slice() == ABORT {
                                // Dropping the stream skips the closing handshake.
                                return;
                            }
                            let echoes = matches!(mode, HostMode::Echo | HostMode::EchoUntilAbort);
                            if echoes && ws.send(Message::Binary(data)).await.is_err() {
                                break;
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            handshakes,
            received,
        }
    }

    pub fn handshakes(&self) -> Vec<HeaderMap> {
        self.handshakes.lock().unwrap().clone()
    }

    /// Collect upstream bytes until `len` have arrived
    pub async fn read_bytes(&mut self, len: usize) -> Vec<u8> {
        let mut out = Vec::new();
        while out.len() < len {
            let chunk = tokio::time::timeout(Duration::from_secs(5), self.received.recv())
                .await
                .expect("timed out waiting for upstream bytes")
                .expect("upstream channel closed");
            out.extend_from_slice(&chunk);
        }
        out
    }
}

/// Poll `cond` until it holds or five seconds pass
pub async fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
    for _ in 0..500 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
