/// Recovers the address a redirected connection was originally addressed
/// to, via the kernel's NAT-inspection socket option. Tries the IPv6
/// variant first, then IPv4, matching the acceptor's contract.
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::AsRawFd;

use tokio::net::TcpStream;

use crate::errors::Error;

// Netfilter's original-destination socket options. Not exposed by `libc`
// (they're iptables/ip6tables ABI, not libc headers), so the numeric
// values are hardcoded here, matching their `<linux/netfilter_ipv4.h>` /
// `<linux/netfilter_ipv6/ip6_tables.h>` definitions.
const SO_ORIGINAL_DST: libc::c_int = 80;

pub fn original_destination(stream: &TcpStream) -> Result<SocketAddr, Error> {
    original_destination_v6(stream)
        .or_else(|_| original_destination_v4(stream))
        .map_err(|_| Error::OriginalDestinationLookupFailed)
}

fn original_destination_v4(stream: &TcpStream) -> std::io::Result<SocketAddr> {
    let fd = stream.as_raw_fd();

    unsafe {
        let mut addr: libc::sockaddr_in = mem::zeroed();
        let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;

        let ret = libc::getsockopt(
            fd,
            libc::SOL_IP,
            SO_ORIGINAL_DST,
            &mut addr as *mut _ as *mut libc::c_void,
            &mut len,
        );

        if ret != 0 {
            return Err(std::io::Error::last_os_error());
        }

        let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
        let port = u16::from_be(addr.sin_port);
        Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
    }
}

fn original_destination_v6(stream: &TcpStream) -> std::io::Result<SocketAddr> {
    let fd = stream.as_raw_fd();

    unsafe {
        let mut addr: libc::sockaddr_in6 = mem::zeroed();
        let mut len = mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;

        let ret = libc::getsockopt(
            fd,
            libc::SOL_IPV6,
            SO_ORIGINAL_DST,
            &mut addr as *mut _ as *mut libc::c_void,
            &mut len,
        );

        if ret != 0 {
            return Err(std::io::Error::last_os_error());
        }

        let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
        let port = u16::from_be(addr.sin6_port);
        Ok(SocketAddr::V6(SocketAddrV6::new(
            ip,
            port,
            addr.sin6_flowinfo,
            addr.sin6_scope_id,
        )))
    }
}

/// Render a destination as the printable host/port strings the handshake
/// frame expects (§4.1: host up to 46 bytes for IPv6, port up to 5 digits,
/// both NUL-terminated -- `to_string()` plus the frame's own truncating
/// writer already enforces the field width, so no extra bound is needed
/// here).
pub fn render(addr: &SocketAddr) -> (String, String) {
    (addr.ip().to_string(), addr.port().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_v4_destination() {
        let addr: SocketAddr = "1.2.3.4:80".parse().unwrap();
        let (host, port) = render(&addr);
        assert_eq!(host, "1.2.3.4");
        assert_eq!(port, "80");
    }

    #[test]
    fn renders_v6_destination() {
        let addr: SocketAddr = "[::1]:8080".parse().unwrap();
        let (host, port) = render(&addr);
        assert_eq!(host, "::1");
        assert_eq!(port, "8080");
    }

    /// A plain loopback-to-loopback TCP connection was never redirected by
    /// the packet filter, so the original-destination lookup must fail
    /// rather than return a made-up answer.
    #[tokio::test]
    async fn fails_on_a_non_redirected_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        drop(server_side);

        let result = original_destination(&client);
        assert!(result.is_err());
    }
}
