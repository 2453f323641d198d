//! Tests for the local listener

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::Span;
use tunnel_proxy::TunnelError;
use tunnel_proxy::server::TunnelListener;

#[tokio::test]
async fn test_binds_loopback_and_reports_each_connection() {
    let mut listener = TunnelListener::new(Span::none());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let addr = listener
        .start(0, move |_socket, peer| {
            let _ = tx.send(peer);
        })
        .unwrap();

    assert!(addr.ip().is_loopback());
    assert_ne!(addr.port(), 0);
    assert_eq!(listener.local_addr(), Some(addr));
    assert!(listener.is_listening());

    let first = TcpStream::connect(addr).await.unwrap();
    let second = TcpStream::connect(addr).await.unwrap();

    assert_eq!(rx.recv().await, Some(first.local_addr().unwrap()));
    assert_eq!(rx.recv().await, Some(second.local_addr().unwrap()));

    listener.stop().await;
}

#[tokio::test]
async fn test_stop_releases_port() {
    let mut listener = TunnelListener::new(Span::none());
    let addr = listener.start(0, |_, _| {}).unwrap();

    listener.stop().await;
    assert!(!listener.is_listening());
    assert_eq!(listener.local_addr(), None);
    assert!(TcpStream::connect(addr).await.is_err());

    // The same port can be bound again.
    let mut again = TunnelListener::new(Span::none());
    assert_eq!(again.start(addr.port(), |_, _| {}).unwrap(), addr);
    again.stop().await;
}

#[tokio::test]
async fn test_stop_is_idempotent_and_safe_before_start() {
    let mut listener = TunnelListener::new(Span::none());
    listener.stop().await;
    listener.stop().await;

    listener.start(0, |_, _| {}).unwrap();
    listener.stop().await;
    listener.stop().await;
}

#[tokio::test]
async fn test_port_in_use_is_bind_error() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let mut listener = TunnelListener::new(Span::none());
    let err = listener.start(port, |_, _| {}).unwrap_err();

    match err {
        TunnelError::Bind { port: p, .. } => assert_eq!(p, port),
        other => panic!("expected bind error, got {:?}", other),
    }
    assert!(!listener.is_listening());
}

#[tokio::test]
async fn test_double_start_is_rejected() {
    let mut listener = TunnelListener::new(Span::none());
    listener.start(0, |_, _| {}).unwrap();
    assert!(matches!(
        listener.start(0, |_, _| {}),
        Err(TunnelError::AlreadyStarted)
    ));
    listener.stop().await;
}
