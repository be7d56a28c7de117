//! Reachability probing of a single source/destination pair.
//!
//! A probe is a plain TCP connect bound to the candidate source, used
//! purely as a reachability check; the socket is closed immediately
//! and never surfaced. [`PairConnector`] is the seam between the pair
//! rules and the operating system, so tests can substitute canned
//! outcomes.

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::trace;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::addr::Address;
use crate::flags::Flags;
use crate::net::sockaddr;

/// Destination port probed on every target.
pub const PROBE_PORT: u16 = 80;

/// Performs the raw connect for a probe and reports the measured
/// latency in milliseconds.
pub trait PairConnector: Send + Sync {
    fn connect(&self, source: &SocketAddr, destination: &SocketAddr, timeout: Duration)
        -> io::Result<u32>;
}

/// Probes by opening a real TCP connection bound to the source.
#[derive(Debug, Default)]
pub struct TcpConnector;

impl PairConnector for TcpConnector {
    fn connect(
        &self,
        source: &SocketAddr,
        destination: &SocketAddr,
        timeout: Duration,
    ) -> io::Result<u32> {
        let family = match destination {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        };
        let socket = Socket::new(family, Type::STREAM, Some(Protocol::TCP))?;
        socket.bind(&SockAddr::from(*source))?;
        let started = Instant::now();
        socket.connect_timeout(&SockAddr::from(*destination), timeout)?;
        Ok(started.elapsed().as_millis() as u32)
    }
}

/// Check one pair. Returns the measured latency on success, `None` on
/// any rejection or failure.
///
/// The flag side effects here (plus the inventory refresh) are the
/// only writers of the environment flags.
pub(crate) fn probe_pair(
    connector: &dyn PairConnector,
    flags: &Flags,
    sa: &Address,
    da: &Address,
    timeout: Duration,
) -> Option<u32> {
    if sa.version() != da.version() {
        return None; // never try NAT46 or NAT64
    }
    if sa.is_link_local() != da.is_link_local() {
        return None; // link-locals can only talk to each other
    }

    let mut scope = 0;
    if sa.version() == 6 {
        if sa.is_link_local() {
            if sa.zone() != da.zone() {
                return None; // different interface
            }
            scope = match sa.scope_index() {
                0 => da.scope_index(),
                index => index,
            };
        }
        if sa.is_ula() && !da.is_ula() {
            if flags.nptv6_tried() && !flags.nptv6() {
                return None; // ULAs can only talk to each other
            }
            flags.set_nptv6_tried();
        }
    } else if sa.is_private() && !da.is_private() {
        if flags.nat44_tried() && !flags.nat44() {
            return None; // RFC1918s can only talk to each other
        }
        flags.set_nat44_tried();
    }

    let source = sockaddr(sa, 0, scope);
    let destination = sockaddr(da, PROBE_PORT, scope);
    let latency = match connector.connect(&source, &destination, timeout) {
        Ok(latency) => latency.max(1),
        Err(err) => {
            trace!("probe {} -> {} failed: {}", sa, da, err);
            return None;
        }
    };

    if sa.version() == 6 {
        if sa.is_ula() && !da.is_ula() {
            flags.set_nptv6();
        } else if sa.is_ula() && da.is_ula() {
            flags.set_ula_ok();
        } else if sa.is_link_local() && da.is_link_local() {
            flags.set_lla_ok();
        } else {
            flags.set_gua_ok();
        }
    } else {
        flags.set_ipv4_ok();
        if sa.is_private() && !da.is_private() {
            flags.set_nat44();
        }
    }

    Some(latency)
}

#[cfg(test)]
mod tests {
    use std::io::{self, ErrorKind};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::{probe_pair, PairConnector};
    use crate::addr::{Address, Zone};
    use crate::flags::Flags;

    /// Connector that always answers the same way and counts how often
    /// it was actually asked.
    struct FixedConnector {
        latency: Option<u32>,
        calls: AtomicUsize,
    }

    impl FixedConnector {
        fn up(latency: u32) -> FixedConnector {
            FixedConnector {
                latency: Some(latency),
                calls: AtomicUsize::new(0),
            }
        }

        fn down() -> FixedConnector {
            FixedConnector {
                latency: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::Relaxed)
        }
    }

    impl PairConnector for FixedConnector {
        fn connect(&self, _: &SocketAddr, _: &SocketAddr, _: Duration) -> io::Result<u32> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            match self.latency {
                Some(latency) => Ok(latency),
                None => Err(io::Error::new(ErrorKind::ConnectionRefused, "unreachable")),
            }
        }
    }

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn probe(connector: &FixedConnector, flags: &Flags, sa: &str, da: &str) -> Option<u32> {
        probe_pair(connector, flags, &addr(sa), &addr(da), Duration::from_secs(1))
    }

    #[test]
    fn negative_version_mismatch_skips_the_syscall() {
        let connector = FixedConnector::up(10);
        let flags = Flags::new();
        assert_eq!(probe(&connector, &flags, "192.0.2.5", "2001:db8::200"), None);
        assert_eq!(connector.calls(), 0);
    }

    #[test]
    fn negative_link_local_mismatch() {
        let connector = FixedConnector::up(10);
        let flags = Flags::new();
        assert_eq!(probe(&connector, &flags, "fe80::1%2", "2001:db8::200"), None);
        assert_eq!(probe(&connector, &flags, "2001:db8::1", "fe80::99%2"), None);
        assert_eq!(connector.calls(), 0);
    }

    #[test]
    fn negative_scope_mismatch() {
        let connector = FixedConnector::up(10);
        let flags = Flags::new();
        assert_eq!(probe(&connector, &flags, "fe80::1%2", "fe80::99%3"), None);
        assert_eq!(connector.calls(), 0);
    }

    #[test]
    fn positive_matching_scope_connects() {
        let connector = FixedConnector::up(3);
        let flags = Flags::new();
        let sa = Address::with_zone("fe80::1".parse().unwrap(), Zone::new("eth0", 2));
        let da = Address::with_zone("fe80::99".parse().unwrap(), Zone::named("eth0"));
        let latency = probe_pair(&connector, &flags, &sa, &da, Duration::from_secs(1));
        assert_eq!(latency, Some(3));
        assert!(flags.lla_ok());
    }

    #[test]
    fn positive_ula_gate_latches_on_failure() {
        let connector = FixedConnector::down();
        let flags = Flags::new();
        assert_eq!(probe(&connector, &flags, "fd00::1", "2001:db8::200"), None);
        assert!(flags.nptv6_tried());
        assert!(!flags.nptv6());
        assert_eq!(connector.calls(), 1);

        // a translator was provably absent, so the class is never retried
        assert_eq!(probe(&connector, &flags, "fd00::1", "2001:db8::300"), None);
        assert_eq!(connector.calls(), 1);
    }

    #[test]
    fn positive_nptv6_witnessed_on_success() {
        let connector = FixedConnector::up(20);
        let flags = Flags::new();
        assert_eq!(probe(&connector, &flags, "fd00::1", "2001:db8::200"), Some(20));
        assert!(flags.nptv6_tried());
        assert!(flags.nptv6());
        // with the translator confirmed, further attempts pass the gate
        assert_eq!(probe(&connector, &flags, "fd00::1", "2001:db8::300"), Some(20));
        assert_eq!(connector.calls(), 2);
    }

    #[test]
    fn positive_nat44_gate_and_witness() {
        let down = FixedConnector::down();
        let flags = Flags::new();
        assert_eq!(probe(&down, &flags, "10.0.0.7", "198.51.100.7"), None);
        assert!(flags.nat44_tried());
        assert!(!flags.nat44());
        assert_eq!(probe(&down, &flags, "10.0.0.7", "198.51.100.8"), None);
        assert_eq!(down.calls(), 1);

        let up = FixedConnector::up(50);
        let flags = Flags::new();
        assert_eq!(probe(&up, &flags, "10.0.0.7", "198.51.100.7"), Some(50));
        assert!(flags.nat44());
        assert!(flags.ipv4_ok());
    }

    #[test]
    fn positive_homogeneous_classes_latch_their_flag() {
        let connector = FixedConnector::up(10);

        let flags = Flags::new();
        probe(&connector, &flags, "2001:db8::1", "2001:db8::200");
        assert!(flags.gua_ok());

        let flags = Flags::new();
        probe(&connector, &flags, "fd00::1", "fd00::99");
        assert!(flags.ula_ok());
        assert!(!flags.nptv6_tried());

        let flags = Flags::new();
        probe(&connector, &flags, "192.0.2.5", "198.51.100.7");
        assert!(flags.ipv4_ok());
        assert!(!flags.nat44());
    }

    #[test]
    fn positive_latency_is_floored_to_one() {
        let connector = FixedConnector::up(0);
        let flags = Flags::new();
        assert_eq!(probe(&connector, &flags, "2001:db8::1", "2001:db8::200"), Some(1));
    }
}
