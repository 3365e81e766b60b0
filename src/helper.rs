//! Helper utilities for Udpgate
//!
//! This module provides common utility functions used throughout the proxy.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{lookup_host, UdpSocket};

use crate::error::ProxyError;

/// Default datagram buffer size, one Ethernet MTU
pub const DEFAULT_BUFFER_SIZE: usize = 1500;

/// Largest payload a UDP/IPv4 datagram can carry
pub const MAX_DATAGRAM_SIZE: usize = 65507;

/// Default idle session timeout in seconds
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Default idle reaper sweep period in seconds
pub const DEFAULT_REAPER_INTERVAL_SECS: u64 = 10;

/// Parse duration from seconds
pub fn duration_from_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

/// Wildcard address of the same family as `peer`, port 0
pub fn unspecified_for(peer: &SocketAddr) -> SocketAddr {
    match peer.ip() {
        IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    }
}

/// Resolve host:port to the first address returned
pub async fn resolve_addr(addr: &str) -> Result<SocketAddr, ProxyError> {
    lookup_host(addr)
        .await
        .map_err(|e| ProxyError::Resolve(format!("{}: {}", addr, e)))?
        .next()
        .ok_or_else(|| ProxyError::Resolve(format!("{}: no addresses", addr)))
}

/// Socket options for the client-facing listener
#[derive(Debug, Clone, Copy, Default)]
pub struct ListenerOpts {
    /// SO_RCVBUF in bytes, 0 keeps the OS default
    pub recv_buffer_size: usize,
    /// SO_SNDBUF in bytes, 0 keeps the OS default
    pub send_buffer_size: usize,
}

/// Bind a non-blocking UDP socket with the given options and hand it to tokio
pub fn bind_udp(addr: SocketAddr, opts: ListenerOpts) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if opts.recv_buffer_size > 0 {
        socket.set_recv_buffer_size(opts.recv_buffer_size)?;
    }
    if opts.send_buffer_size > 0 {
        socket.set_send_buffer_size(opts.send_buffer_size)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    UdpSocket::from_std(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok, block_on};

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_BUFFER_SIZE, 1500);
        assert_eq!(MAX_DATAGRAM_SIZE, 65507);
        assert_eq!(DEFAULT_IDLE_TIMEOUT_SECS, 300);
        assert_eq!(DEFAULT_REAPER_INTERVAL_SECS, 10);
    }

    #[test]
    fn test_duration_from_secs() {
        assert_eq!(duration_from_secs(5), Duration::from_secs(5));
        assert_eq!(duration_from_secs(0), Duration::from_secs(0));
    }

    #[test]
    fn test_unspecified_for() {
        let v4: SocketAddr = "10.1.2.3:7777".parse().unwrap();
        assert_eq!(unspecified_for(&v4), "0.0.0.0:0".parse().unwrap());

        let v6: SocketAddr = "[::1]:7777".parse().unwrap();
        assert_eq!(unspecified_for(&v6), "[::]:0".parse().unwrap());
    }

    #[test]
    fn test_resolve_addr() {
        let addr = assert_ok!(block_on(resolve_addr("127.0.0.1:7777")));
        assert_eq!(addr, "127.0.0.1:7777".parse::<SocketAddr>().unwrap());

        let addr = assert_ok!(block_on(resolve_addr("localhost:7777")));
        assert_eq!(addr.port(), 7777);

        let err = assert_err!(block_on(resolve_addr("not an address")));
        assert!(matches!(err, ProxyError::Resolve(_)));
    }

    #[tokio::test]
    async fn test_bind_udp_ephemeral() {
        let socket = bind_udp("127.0.0.1:0".parse().unwrap(), ListenerOpts::default()).unwrap();
        let addr = socket.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_udp_with_buffers() {
        let opts = ListenerOpts {
            recv_buffer_size: 256 * 1024,
            send_buffer_size: 256 * 1024,
        };
        let socket = bind_udp("127.0.0.1:0".parse().unwrap(), opts).unwrap();

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        peer.send_to(b"ping", socket.local_addr().unwrap())
            .await
            .unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = socket.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, peer.local_addr().unwrap());
    }
}
