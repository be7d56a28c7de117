//! Anchor targets used to seed destination probing.
//!
//! At start-up the engine wants one well-connected global target per
//! address family so the first sweeps can establish which address
//! classes work at all. Ideally those come from an external catalog of
//! measurement anchors (spreading the load across targets); when no
//! catalog is reachable, two well-known hosts serve as the fallback.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::ops::RangeInclusive;

use log::debug;
use rand::Rng;

use crate::addr::Address;
use crate::error::{AprErrorKind, AprResult};

/// Fallback IPv6 probe target (ipv6.lookup.test-ipv6.com).
pub const FALLBACK_ANCHOR6: Ipv6Addr = Ipv6Addr::new(0x2a00, 0xdd80, 0x3c, 0, 0, 0, 0, 0xb3f);

/// Fallback IPv4 probe target (ipv4.lookup.test-ipv6.com).
pub const FALLBACK_ANCHOR4: Ipv4Addr = Ipv4Addr::new(216, 218, 223, 250);

/// Catalog ids worth trying when choosing anchors.
const ANCHOR_ID_RANGE: RangeInclusive<u32> = 6000..=7200;

/// How many random ids to try per address family.
const ANCHOR_ATTEMPTS: usize = 9;

/// Connection state of a catalog entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AnchorStatus {
    Connected,
    Disconnected,
    Abandoned,
    NeverConnected,
}

/// One entry of the external anchor catalog.
#[derive(Clone, Debug)]
pub struct AnchorProbe {
    pub is_anchor: bool,
    pub status: AnchorStatus,
    pub address_v4: Option<Ipv4Addr>,
    pub address_v6: Option<Ipv6Addr>,
}

/// External catalog of well-connected probe targets.
pub trait AnchorCatalog: Send + Sync {
    fn probe(&self, id: u32) -> AprResult<AnchorProbe>;
}

/// Catalog stand-in for hosts without catalog access. Every lookup
/// fails, which routes target selection to the fallback anchors.
#[derive(Debug, Default)]
pub struct OfflineCatalog;

impl AnchorCatalog for OfflineCatalog {
    fn probe(&self, id: u32) -> AprResult<AnchorProbe> {
        Err(AprErrorKind::AnchorUnavailable(id).into())
    }
}

/// Pick one well-connected global target per address family.
pub(crate) fn pick_targets(catalog: &dyn AnchorCatalog) -> (Address, Address) {
    let target6 = pick(catalog, |probe| probe.address_v6.map(IpAddr::V6))
        .unwrap_or(IpAddr::V6(FALLBACK_ANCHOR6));
    let target4 = pick(catalog, |probe| probe.address_v4.map(IpAddr::V4))
        .unwrap_or(IpAddr::V4(FALLBACK_ANCHOR4));
    debug!("chose probe targets {} and {}", target6, target4);
    (Address::new(target6), Address::new(target4))
}

fn pick<F>(catalog: &dyn AnchorCatalog, address: F) -> Option<IpAddr>
where
    F: Fn(&AnchorProbe) -> Option<IpAddr>,
{
    let mut rng = rand::thread_rng();
    for _ in 0..ANCHOR_ATTEMPTS {
        let id = rng.gen_range(ANCHOR_ID_RANGE);
        let entry = match catalog.probe(id) {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        if entry.is_anchor && entry.status == AnchorStatus::Connected {
            if let Some(found) = address(&entry) {
                return Some(found);
            }
        }
    }
    None
}
