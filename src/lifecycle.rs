//! Proxy lifecycle
//!
//! [`TunnelProxy`] waits for the remote instance to become ready, then
//! listens locally and bridges each accepted connection to its own upstream
//! tunnel. Any start-up failure disposes whatever was built and returns the
//! original error. [`TunnelProxy::dispose`] is idempotent and works from any
//! state.
//!
//! ```text
//!   NotStarted ──► Probing ──► Listening
//!        │            │            │
//!        └────────────┴────────────┴──► Disposed
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use crate::endpoint::{ConnectionKind, Credential, TunnelEndpoint};
use crate::error::{Result, TunnelError};
use crate::proxy::{BridgeRegistry, ConnectionBridge, UpstreamConnector};
use crate::readiness::{HttpTunnelApi, PollSettings, ReadinessPoller, ReadinessProber, TunnelApi};
use crate::server::TunnelListener;

/// How long `dispose` waits for bridges to finish closing
const DISPOSE_GRACE: Duration = Duration::from_secs(5);

pub const DEFAULT_USER_AGENT: &str = concat!("tunnel-proxy/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    NotStarted,
    Probing,
    Listening,
    /// Terminal
    Disposed,
}

/// Tunables that are not part of the proxy's identity
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    pub poll: PollSettings,
    pub user_agent: String,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            poll: PollSettings::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

pub struct TunnelProxy {
    port: u16,
    poller: ReadinessPoller,
    connector: UpstreamConnector,
    registry: BridgeRegistry,
    bridges: TaskTracker,
    listener: tokio::sync::Mutex<TunnelListener>,
    state: Mutex<ProxyState>,
    disposed: CancellationToken,
    span: Span,
}

impl TunnelProxy {
    /// Proxy that probes readiness over HTTPS with default options
    pub fn new(
        port: u16,
        endpoint: TunnelEndpoint,
        credential: Credential,
        kind: ConnectionKind,
    ) -> Result<Self> {
        Self::with_options(port, endpoint, credential, kind, ProxyOptions::default())
    }

    pub fn with_options(
        port: u16,
        endpoint: TunnelEndpoint,
        credential: Credential,
        kind: ConnectionKind,
        options: ProxyOptions,
    ) -> Result<Self> {
        let endpoint = Arc::new(endpoint);
        let credential = Arc::new(credential);
        let api = HttpTunnelApi::new(endpoint.clone(), credential.clone(), &options.user_agent)?;
        Ok(Self::build(port, endpoint, credential, kind, Arc::new(api), options))
    }

    /// Proxy that probes readiness through a caller-supplied [`TunnelApi`]
    pub fn with_api(
        port: u16,
        endpoint: TunnelEndpoint,
        credential: Credential,
        kind: ConnectionKind,
        api: Arc<dyn TunnelApi>,
        options: ProxyOptions,
    ) -> Self {
        Self::build(port, Arc::new(endpoint), Arc::new(credential), kind, api, options)
    }

    fn build(
        port: u16,
        endpoint: Arc<TunnelEndpoint>,
        credential: Arc<Credential>,
        kind: ConnectionKind,
        api: Arc<dyn TunnelApi>,
        options: ProxyOptions,
    ) -> Self {
        let span = info_span!(
            "tunnel_proxy",
            host = %endpoint.tunnel_host(),
            port,
            kind = %kind
        );
        let prober = ReadinessProber::new(api, kind);

        Self {
            port,
            poller: ReadinessPoller::new(prober, options.poll),
            connector: UpstreamConnector::new(endpoint, credential, options.user_agent),
            registry: BridgeRegistry::new(),
            bridges: TaskTracker::new(),
            listener: tokio::sync::Mutex::new(TunnelListener::new(span.clone())),
            state: Mutex::new(ProxyState::NotStarted),
            disposed: CancellationToken::new(),
            span,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ProxyState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> ProxyState {
        *self.lock_state()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Number of bridges currently open
    pub fn open_bridges(&self) -> usize {
        self.registry.len()
    }

    /// Wait for readiness, then listen. Returns the bound local address.
    ///
    /// On failure the proxy is disposed and the original error returned.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<SocketAddr> {
        {
            let mut state = self.lock_state();
            match *state {
                ProxyState::NotStarted => *state = ProxyState::Probing,
                ProxyState::Disposed => return Err(TunnelError::Disposed),
                ProxyState::Probing | ProxyState::Listening => {
                    return Err(TunnelError::AlreadyStarted);
                }
            }
        }

        let result = self.start_inner(cancel).instrument(self.span.clone()).await;
        if let Err(e) = &result {
            self.span.in_scope(|| error!(error = %e, kind = e.kind(), "Failed to start tunnel proxy"));
            self.dispose().await;
        }
        result
    }

    async fn start_inner(&self, cancel: &CancellationToken) -> Result<SocketAddr> {
        if cancel.is_cancelled() {
            return Err(TunnelError::Cancelled("start"));
        }

        tokio::select! {
            biased;
            _ = self.disposed.cancelled() => return Err(TunnelError::Disposed),
            ready = self.poller.wait_until_ready(cancel) => ready?,
        }

        if cancel.is_cancelled() {
            return Err(TunnelError::Cancelled("listener bind"));
        }

        let addr = {
            let mut listener = self.listener.lock().await;
            if self.state() == ProxyState::Disposed {
                return Err(TunnelError::Disposed);
            }
            listener.start(self.port, self.accept_handler())?
        };

        if cancel.is_cancelled() {
            return Err(TunnelError::Cancelled("listener bind"));
        }

        let mut state = self.lock_state();
        if *state == ProxyState::Disposed {
            return Err(TunnelError::Disposed);
        }
        *state = ProxyState::Listening;
        Ok(addr)
    }

    /// Start, serve until `shutdown` resolves, then dispose.
    ///
    /// A shutdown that arrives while readiness is still being polled cancels
    /// the start, which then fails with `Cancelled` and disposes the proxy.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<SocketAddr>
    where
        F: Future<Output = ()>,
    {
        let cancel = CancellationToken::new();
        tokio::pin!(shutdown);

        let start = self.start(&cancel);
        tokio::pin!(start);

        let mut shutdown_seen = false;
        let started = tokio::select! {
            res = &mut start => res,
            _ = &mut shutdown => {
                self.span.in_scope(|| info!("Shutdown requested while starting"));
                shutdown_seen = true;
                cancel.cancel();
                start.await
            }
        };
        let addr = started?;

        self.span.in_scope(|| info!(addr = %addr, "Tunnel ready"));
        if !shutdown_seen {
            shutdown.await;
            self.span.in_scope(|| info!("Shutdown requested"));
        }
        self.dispose().await;
        Ok(addr)
    }

    /// Callback run by the listener for every accepted connection
    fn accept_handler(&self) -> impl FnMut(tokio::net::TcpStream, SocketAddr) + Send + 'static {
        let registry = self.registry.clone();
        let connector = self.connector.clone();
        let bridges = self.bridges.clone();

        move |socket, peer| {
            let Some((id, close)) = registry.register() else {
                debug!(peer = %peer, "Proxy disposed, dropping connection");
                return;
            };
            info!(peer = %peer, bridge_id = id, open = registry.len(), "Client connected");

            let bridge =
                ConnectionBridge::new(id, socket, peer, connector.clone(), registry.clone(), close);
            bridges.spawn(bridge.run().instrument(info_span!("bridge", id)));
        }
    }

    /// Close every bridge and the listener, releasing the local port.
    ///
    /// Idempotent; safe before, during or after `start`.
    pub async fn dispose(&self) {
        {
            let mut state = self.lock_state();
            if *state == ProxyState::Disposed {
                return;
            }
            *state = ProxyState::Disposed;
        }
        self.disposed.cancel();

        async {
            self.listener.lock().await.stop().await;

            let signalled = self.registry.close_all();
            self.bridges.close();
            if timeout(DISPOSE_GRACE, self.bridges.wait()).await.is_err() {
                warn!(open = self.registry.len(), "Bridges still closing after grace period");
            }
            info!(signalled, "Tunnel proxy disposed");
        }
        .instrument(self.span.clone())
        .await
    }
}

impl Drop for TunnelProxy {
    fn drop(&mut self) {
        self.disposed.cancel();
        self.registry.close_all();
    }
}
