//! Host interface enumeration.
//!
//! The OS-specific parts live behind [`InterfaceEnumerator`]; the
//! engine itself never branches on the operating system. The default
//! implementation walks the host interfaces with `if-addrs` and reads
//! the default gateways out of the kernel routing tables.

use std::collections::HashMap;
use std::net::IpAddr;

use log::trace;

use crate::addr::{Address, Zone};
use crate::error::AprResult;

/// Everything the engine needs to know about local addressing.
#[derive(Clone, Debug, Default)]
pub struct HostAddresses {
    /// Non-loopback unicast addresses usable as sources.
    pub sources: Vec<Address>,
    /// Default IPv4 gateway, when one is configured.
    pub def_gateway4: Option<Address>,
    /// Default IPv6 gateway, when one is configured.
    pub def_gateway6: Option<Address>,
}

/// Supplies the current local addresses and default gateways.
pub trait InterfaceEnumerator: Send + Sync {
    fn interfaces(&self) -> AprResult<HostAddresses>;
}

/// Enumerates the real host interfaces.
#[derive(Debug, Default)]
pub struct SystemEnumerator;

impl InterfaceEnumerator for SystemEnumerator {
    fn interfaces(&self) -> AprResult<HostAddresses> {
        let mut sources = Vec::new();
        let mut zones = HashMap::new();
        for iface in if_addrs::get_if_addrs()? {
            if iface.is_loopback() {
                continue;
            }
            let index = iface.index.unwrap_or(0);
            if index != 0 {
                zones.insert(iface.name.clone(), index);
            }
            let mut address = Address::new(iface.ip());
            if address.version() == 6 && address.is_link_local() {
                address = Address::with_zone(address.ip(), Zone::new(iface.name.clone(), index));
            }
            trace!("found {}", address);
            sources.push(address);
        }
        let (def_gateway4, def_gateway6) = default_gateways(&zones);
        Ok(HostAddresses {
            sources,
            def_gateway4,
            def_gateway6,
        })
    }
}

#[cfg(target_os = "linux")]
fn default_gateways(zones: &HashMap<String, u32>) -> (Option<Address>, Option<Address>) {
    let def_gateway4 = std::fs::read_to_string("/proc/net/route")
        .ok()
        .and_then(|table| parse_route4(&table));
    let def_gateway6 = std::fs::read_to_string("/proc/net/ipv6_route")
        .ok()
        .and_then(|table| parse_route6(&table, zones));
    (def_gateway4, def_gateway6)
}

#[cfg(not(target_os = "linux"))]
fn default_gateways(_zones: &HashMap<String, u32>) -> (Option<Address>, Option<Address>) {
    (None, None)
}

#[cfg(any(target_os = "linux", test))]
const ZERO128: &str = "00000000000000000000000000000000";

/// Default gateway from the kernel's IPv4 routing table: the gateway
/// of the first route with an all-zero destination. Fields are
/// little-endian hex.
#[cfg(any(target_os = "linux", test))]
fn parse_route4(table: &str) -> Option<Address> {
    for line in table.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 || fields[1] != "00000000" {
            continue;
        }
        if let Ok(gateway) = u32::from_str_radix(fields[2], 16) {
            if gateway != 0 {
                let ip = std::net::Ipv4Addr::from(gateway.swap_bytes());
                return Some(Address::new(IpAddr::V4(ip)));
            }
        }
    }
    None
}

/// Default gateway from `/proc/net/ipv6_route`: an all-zero
/// destination with prefix length 0 and a non-zero next hop. The next
/// hop is usually link-local, so the route's device supplies the zone.
#[cfg(any(target_os = "linux", test))]
fn parse_route6(table: &str, zones: &HashMap<String, u32>) -> Option<Address> {
    for line in table.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 || fields[0] != ZERO128 || fields[1] != "00" {
            continue;
        }
        let next_hop = fields[4];
        if next_hop.len() != 32 || next_hop == ZERO128 {
            continue;
        }
        let mut octets = [0u8; 16];
        for (position, octet) in octets.iter_mut().enumerate() {
            match u8::from_str_radix(&next_hop[2 * position..2 * position + 2], 16) {
                Ok(parsed) => *octet = parsed,
                Err(_) => return None,
            }
        }
        let ip = std::net::Ipv6Addr::from(octets);
        let device = fields[fields.len() - 1];
        let address = if (ip.segments()[0] & 0xffc0) == 0xfe80 {
            let index = zones.get(device).copied().unwrap_or(0);
            Address::with_zone(IpAddr::V6(ip), Zone::new(device, index))
        } else {
            Address::new(IpAddr::V6(ip))
        };
        return Some(address);
    }
    None
}
