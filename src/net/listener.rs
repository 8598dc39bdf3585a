//! TCP listener binding.
//!
//! # Responsibilities
//! - Bind one listener per configured address for a port
//! - Bind every address concurrently, failing on the first error
//! - Report each bound address
//!
//! # Design Decisions
//! - Every worker binds the same ports; on unix the sockets set
//!   `SO_REUSEPORT` and the kernel spreads connections across workers

use std::io;
use std::net::SocketAddr;

use futures_util::future::try_join_all;
use tokio::net::{lookup_host, TcpListener, TcpSocket};

use crate::error::BootstrapError;

/// `host:port`, bracketing IPv6 literals.
pub fn display_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

const BACKLOG: u32 = 1024;

fn shared_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;
    socket.listen(BACKLOG)
}

async fn resolve_and_bind(host: &str, port: u16) -> io::Result<TcpListener> {
    let mut last_err = None;
    for addr in lookup_host((host, port)).await? {
        match shared_listener(addr) {
            Ok(listener) => return Ok(listener),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "host resolved to no address")
    }))
}

/// Bind `port` on a single host.
pub async fn bind(host: &str, port: u16) -> Result<TcpListener, BootstrapError> {
    let addr = display_addr(host, port);
    let listener = resolve_and_bind(host.trim_matches(|c| c == '[' || c == ']'), port)
        .await
        .map_err(|source| BootstrapError::Bind {
            addr: addr.clone(),
            source,
        })?;

    let local_addr = listener
        .local_addr()
        .map_err(|source| BootstrapError::Bind { addr, source })?;
    tracing::info!(address = %local_addr, "Listener bound");
    Ok(listener)
}

/// Bind `port` on every host.
pub async fn bind_all(hosts: &[String], port: u16) -> Result<Vec<TcpListener>, BootstrapError> {
    try_join_all(hosts.iter().map(|host| bind(host, port))).await
}

/// Local addresses of `listeners`, skipping any that cannot report one.
pub fn local_addrs(listeners: &[TcpListener]) -> Vec<SocketAddr> {
    listeners.iter().filter_map(|l| l.local_addr().ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_addr() {
        assert_eq!(display_addr("127.0.0.1", 80), "127.0.0.1:80");
        assert_eq!(display_addr("::1", 443), "[::1]:443");
        assert_eq!(display_addr("[::1]", 443), "[::1]:443");
    }

    #[tokio::test]
    async fn test_bind_all_binds_each_host() {
        let hosts = vec!["127.0.0.1".to_string()];
        let listeners = bind_all(&hosts, 0).await.unwrap();
        assert_eq!(listeners.len(), 1);
        assert_eq!(local_addrs(&listeners).len(), 1);
    }

    #[tokio::test]
    async fn test_bind_conflict_names_address() {
        // a plain listener does not share its port
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let err = bind("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Bind { ref addr, .. } if *addr == format!("127.0.0.1:{port}")));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_workers_share_a_port() {
        let first = bind("127.0.0.1", 0).await.unwrap();
        let port = first.local_addr().unwrap().port();
        let second = bind("127.0.0.1", port).await.unwrap();
        assert_eq!(second.local_addr().unwrap().port(), port);
    }
}
