//! Address classification for multi-prefix hosts.
//!
//! Everything downstream (probing, pruning, pair suggestion) is driven
//! by which class a unicast address falls into: loopback, link-local,
//! RFC1918 private, unique-local, or global. IPv6 link-locals
//! additionally carry their scope as a [`Zone`].

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::{AprError, AprErrorKind, AprResult};

/// Scope (zone) identifier of an IPv6 link-local address.
///
/// Carried in both forms the socket APIs deal in: the textual
/// interface name and the numeric interface index. An index of 0 means
/// the index is not (yet) known.
#[derive(Clone, Debug)]
pub struct Zone {
    name: Option<String>,
    index: u32,
}

impl Zone {
    /// Zone known by interface name only.
    pub fn named<S: Into<String>>(name: S) -> Zone {
        Zone {
            name: Some(name.into()),
            index: 0,
        }
    }

    /// Zone known by numeric interface index only.
    pub fn indexed(index: u32) -> Zone {
        Zone { name: None, index }
    }

    /// Zone with both the interface name and its numeric index.
    pub fn new<S: Into<String>>(name: S, index: u32) -> Zone {
        Zone {
            name: Some(name.into()),
            index,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Numeric interface index, or 0 when only the name is known.
    pub fn index(&self) -> u32 {
        self.index
    }

    pub(crate) fn resolve(&mut self, index: u32) {
        self.index = index;
    }
}

impl PartialEq for Zone {
    fn eq(&self, other: &Zone) -> bool {
        if self.index != 0 && other.index != 0 {
            return self.index == other.index;
        }
        match (&self.name, &other.name) {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => self.index == other.index,
        }
    }
}

impl Eq for Zone {}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", self.index),
        }
    }
}

/// A unicast IP address together with its scope, when it has one.
///
/// Two addresses are equal iff their version and numeric value match
/// and, for IPv6 link-locals, their zones refer to the same interface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Address {
    ip: IpAddr,
    zone: Option<Zone>,
}

impl Address {
    pub fn new(ip: IpAddr) -> Address {
        Address { ip, zone: None }
    }

    pub fn with_zone(ip: IpAddr, zone: Zone) -> Address {
        Address {
            ip,
            zone: Some(zone),
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// IP version, 4 or 6.
    pub fn version(&self) -> u8 {
        match self.ip {
            IpAddr::V4(_) => 4,
            IpAddr::V6(_) => 6,
        }
    }

    pub fn zone(&self) -> Option<&Zone> {
        self.zone.as_ref()
    }

    /// Numeric scope id for socket calls; 0 when not applicable or
    /// not yet resolved.
    pub fn scope_index(&self) -> u32 {
        self.zone.as_ref().map_or(0, Zone::index)
    }

    pub(crate) fn resolve_zone(&mut self, index: u32) {
        if let Some(zone) = &mut self.zone {
            zone.resolve(index);
        }
    }

    pub fn is_loopback(&self) -> bool {
        self.ip.is_loopback()
    }

    /// Link-local scope: `fe80::/10` for IPv6, `169.254/16` for IPv4.
    pub fn is_link_local(&self) -> bool {
        match self.ip {
            IpAddr::V4(ip) => ip.is_link_local(),
            IpAddr::V6(ip) => (ip.segments()[0] & 0xffc0) == 0xfe80,
        }
    }

    /// RFC1918 private space. Always false for IPv6.
    pub fn is_private(&self) -> bool {
        match self.ip {
            IpAddr::V4(ip) => ip.is_private(),
            IpAddr::V6(_) => false,
        }
    }

    /// Unique local address, `fc00::/7`. Always false for IPv4.
    pub fn is_ula(&self) -> bool {
        match self.ip {
            IpAddr::V4(_) => false,
            IpAddr::V6(ip) => (ip.segments()[0] & 0xfe00) == 0xfc00,
        }
    }

    /// Whether the address is usable beyond the local site.
    ///
    /// Documentation prefixes count as global here so they can stand
    /// in for public addresses.
    pub fn is_global(&self) -> bool {
        match self.ip {
            IpAddr::V4(ip) => {
                !(ip.is_unspecified()
                    || ip.is_loopback()
                    || ip.is_private()
                    || ip.is_link_local()
                    || ip.is_broadcast()
                    || ip.is_multicast())
            }
            IpAddr::V6(ip) => {
                !(ip.is_unspecified()
                    || ip.is_loopback()
                    || ip.is_multicast()
                    || self.is_link_local()
                    || self.is_ula())
            }
        }
    }
}

impl FromStr for Address {
    type Err = AprError;

    fn from_str(s: &str) -> AprResult<Address> {
        let bad = || AprError::from(AprErrorKind::BadAddress(s.to_string()));
        let (literal, zone) = match s.split_once('%') {
            Some((literal, zone)) if !zone.is_empty() => (literal, Some(zone)),
            Some(_) => return Err(bad()),
            None => (s, None),
        };
        let ip: IpAddr = literal.parse().map_err(|_| bad())?;
        match zone {
            None => Ok(Address::new(ip)),
            // Zones only make sense on IPv6.
            Some(_) if ip.is_ipv4() => Err(bad()),
            Some(zone) => {
                let zone = match zone.parse::<u32>() {
                    Ok(index) if index > 0 => Zone::indexed(index),
                    _ => Zone::named(zone),
                };
                Ok(Address::with_zone(ip, zone))
            }
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.zone {
            Some(zone) => write!(f, "{}%{}", self.ip, zone),
            None => write!(f, "{}", self.ip),
        }
    }
}

/// A proven or suggested source/destination pairing, annotated with
/// its rolling average latency in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddrPair {
    pub sa: Address,
    pub da: Address,
    pub latency: u32,
}

impl AddrPair {
    pub fn new(sa: Address, da: Address, latency: u32) -> AddrPair {
        AddrPair { sa, da, latency }
    }
}

impl fmt::Display for AddrPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{};{}", self.sa, self.da, self.latency)
    }
}
