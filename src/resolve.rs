//! Name resolution collaborator.

use std::net::{IpAddr, ToSocketAddrs};

use log::trace;

use crate::error::{AprErrorKind, AprResult};

/// Resolves a host name to candidate destination addresses.
///
/// A name that does not exist must surface as
/// [`AprErrorKind::Nxdomain`]; every other failure propagates to the
/// caller untouched.
pub trait DnsResolver: Send + Sync {
    fn resolve(&self, name: &str, port: u16) -> AprResult<Vec<IpAddr>>;
}

/// Resolver backed by the operating system's `getaddrinfo`.
#[derive(Debug, Default)]
pub struct SystemResolver;

impl DnsResolver for SystemResolver {
    fn resolve(&self, name: &str, port: u16) -> AprResult<Vec<IpAddr>> {
        let resolved = match (name, port).to_socket_addrs() {
            Ok(addrs) => addrs,
            // The standard library folds getaddrinfo failures into an
            // opaque io error; the lookup message is what tells
            // NXDOMAIN apart from transport trouble.
            Err(err) if err.to_string().contains("failed to lookup address") => {
                trace!("lookup of {} found nothing: {}", name, err);
                return Err(AprErrorKind::Nxdomain(name.to_string()).into());
            }
            Err(err) => return Err(err.into()),
        };
        Ok(collate(resolved.map(|addr| addr.ip())))
    }
}

/// Order candidates IPv6 before IPv4, dropping duplicates and keeping
/// the resolver's order within each family.
pub(crate) fn collate<I: IntoIterator<Item = IpAddr>>(addrs: I) -> Vec<IpAddr> {
    let mut v6: Vec<IpAddr> = Vec::new();
    let mut v4: Vec<IpAddr> = Vec::new();
    for addr in addrs {
        let family = if addr.is_ipv6() { &mut v6 } else { &mut v4 };
        if !family.contains(&addr) {
            family.push(addr);
        }
    }
    v6.extend(v4);
    v6
}
