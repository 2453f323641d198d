use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, error, info};

use crate::error::{Result, TunnelError};

/// At most one pending connection waits in the kernel queue
const BACKLOG: u32 = 1;

/// Pause after a failed accept so a persistent error does not spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Loopback TCP listener that hands every accepted connection to a callback
pub struct TunnelListener {
    span: Span,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl TunnelListener {
    pub fn new(span: Span) -> Self {
        Self {
            span,
            shutdown: CancellationToken::new(),
            task: None,
            local_addr: None,
        }
    }

    /// Bind `127.0.0.1:port` and start accepting.
    ///
    /// Returns the bound address once the socket is listening. Port 0 binds
    /// an ephemeral port.
    pub fn start<F>(&mut self, port: u16, on_accept: F) -> Result<SocketAddr>
    where
        F: FnMut(TcpStream, SocketAddr) + Send + 'static,
    {
        if self.task.is_some() {
            return Err(TunnelError::AlreadyStarted);
        }
        if self.shutdown.is_cancelled() {
            self.shutdown = CancellationToken::new();
        }

        let listener = bind_loopback(port).map_err(|source| TunnelError::Bind { port, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TunnelError::Bind { port, source })?;

        self.span.in_scope(|| info!(addr = %local_addr, "Start listening"));

        let shutdown = self.shutdown.clone();
        self.task = Some(tokio::spawn(
            accept_loop(listener, shutdown, on_accept).instrument(self.span.clone()),
        ));
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_listening(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Close the listening socket. Idempotent; fine to call if never started.
    ///
    /// When this returns the port has been released.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                self.span.in_scope(|| error!(error = %e, "Accept loop ended abnormally"));
            }
        }
        self.local_addr = None;
    }
}

impl Drop for TunnelListener {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn bind_loopback(port: u16) -> std::io::Result<TcpListener> {
    let socket = TcpSocket::new_v4()?;
    #[cfg(unix)]
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))?;
    socket.listen(BACKLOG)
}

async fn accept_loop<F>(listener: TcpListener, shutdown: CancellationToken, mut on_accept: F)
where
    F: FnMut(TcpStream, SocketAddr),
{
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => on_accept(socket, peer),
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
    info!("Stopped listening");
}
