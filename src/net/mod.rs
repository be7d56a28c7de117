//! Socket-level plumbing shared by the prober and the query planner.
//!
//! This module deals with turning classified [`Address`]es into the
//! socket addresses the operating system wants, scope ids included.

use std::net::{IpAddr, SocketAddr, SocketAddrV4, SocketAddrV6};

use socket2::Domain;

use crate::addr::{AddrPair, Address};

pub mod probe;

/// A ready-to-use bind/connect pairing for one connection attempt.
///
/// `family` can be passed straight to `socket2::Socket::new`. `source`
/// is meant for `bind` and always carries port 0; `destination` is
/// meant for `connect` and carries the queried port. IPv6 link-locals
/// carry their numeric scope id in both.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocketPair {
    pub family: Domain,
    pub source: SocketAddr,
    pub destination: SocketAddr,
}

/// Build a socket address, applying the scope id on IPv6.
pub(crate) fn sockaddr(addr: &Address, port: u16, scope: u32) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) => SocketAddr::V4(SocketAddrV4::new(ip, port)),
        IpAddr::V6(ip) => SocketAddr::V6(SocketAddrV6::new(ip, port, 0, scope)),
    }
}

/// Materialise a cached or suggested pair for the sockets API.
pub(crate) fn socket_pair(pair: &AddrPair, port: u16) -> SocketPair {
    let scope = if pair.sa.version() == 6 && pair.sa.is_link_local() {
        match pair.sa.scope_index() {
            0 => pair.da.scope_index(),
            index => index,
        }
    } else {
        0
    };
    let family = match pair.da.ip() {
        IpAddr::V4(_) => Domain::IPV4,
        IpAddr::V6(_) => Domain::IPV6,
    };
    SocketPair {
        family,
        source: sockaddr(&pair.sa, 0, scope),
        destination: sockaddr(&pair.da, port, scope),
    }
}
