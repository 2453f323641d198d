//! Local TCP side of the proxy

pub mod listener;

pub use listener::TunnelListener;
