//! Query planning: turn a user target into a ranked list of bindable
//! source/destination pairings.
//!
//! Measured pairs from the cache always win; for destinations the
//! poller has not seen yet, candidates are suggested from the source
//! inventory and the environment flags with seed latencies, so the
//! reply is sortable before any measurement exists.

use std::cmp::Reverse;

use crate::addr::{AddrPair, Address};
use crate::engine::Engine;
use crate::error::{AprErrorKind, AprResult};
use crate::net::{socket_pair, SocketPair};

impl Engine {
    /// Ranked address pairings for `target`; see
    /// [`get_addr_pairs`](crate::get_addr_pairs).
    pub fn addr_pairs(&self, target: &str, port: u16) -> AprResult<Vec<SocketPair>> {
        if !self.initialised() {
            return Err(AprErrorKind::NotInitialized.into());
        }
        if target.is_empty() {
            return Ok(Vec::new()); // a null host resolves to nothing
        }

        let das: Vec<Address> = match target.parse::<Address>() {
            Ok(literal) => vec![self.canonical(literal)],
            Err(_) => match self.resolver.resolve(target, port) {
                Ok(addrs) => addrs.into_iter().map(Address::new).collect(),
                Err(err) => {
                    if let AprErrorKind::Nxdomain(_) = err.kind() {
                        return Ok(Vec::new());
                    }
                    return Err(err);
                }
            },
        };

        let mut reply: Vec<AddrPair> = Vec::new();
        for da in das {
            self.plan(&da, &mut reply);
        }

        // IPv6 before IPv4, fastest first; ties keep insertion order.
        reply.sort_by_key(|pair| (Reverse(pair.sa.version()), pair.latency));

        Ok(reply.iter().map(|pair| socket_pair(pair, port)).collect())
    }

    /// Fill `reply` with the cached pairs for `da`, or suggest
    /// candidates from the source inventory and the flags.
    fn plan(&self, da: &Address, reply: &mut Vec<AddrPair>) {
        let known = self.dests.contains(da);
        if !known {
            // queried destinations always enter the probe set
            self.dests.add(da.clone());
        }

        let mut found = false;
        if known {
            for pair in self.pairs.snapshot() {
                if pair.da == *da {
                    reply.push(pair);
                    found = true;
                }
            }
        }
        if found {
            return;
        }

        let sources = self.sources.snapshot();
        let flags = &self.flags;
        let config = &self.config;
        if da.version() == 6 {
            if da.is_global() && flags.gua_ok() {
                for sa in sources.iter().filter(|sa| sa.version() == 6 && sa.is_global()) {
                    reply.push(AddrPair::new(sa.clone(), da.clone(), config.latency6));
                }
            }
            if da.is_ula() {
                for sa in sources.iter().filter(|sa| sa.is_ula()) {
                    reply.push(AddrPair::new(sa.clone(), da.clone(), config.latency6 - 1));
                }
            }
            if da.is_global() && flags.nptv6() {
                // reach a global destination through the translator
                for sa in sources.iter().filter(|sa| sa.is_ula()) {
                    reply.push(AddrPair::new(sa.clone(), da.clone(), config.latency6 + 1));
                }
            }
            if da.is_link_local() && flags.lla_ok() {
                for sa in sources.iter().filter(|sa| {
                    sa.version() == 6 && sa.is_link_local() && sa.zone() == da.zone()
                }) {
                    reply.push(AddrPair::new(sa.clone(), da.clone(), 1));
                }
            }
        } else {
            if (da.is_global() && flags.nat44()) || da.is_private() {
                for sa in sources.iter().filter(|sa| sa.is_private()) {
                    reply.push(AddrPair::new(sa.clone(), da.clone(), config.latency4));
                }
            } else if da.is_global() && flags.ipv4_ok() {
                for sa in sources.iter().filter(|sa| sa.version() == 4 && sa.is_global()) {
                    reply.push(AddrPair::new(sa.clone(), da.clone(), config.latency4));
                }
            }
            if da.is_link_local() {
                for sa in sources.iter().filter(|sa| sa.version() == 4 && sa.is_link_local()) {
                    reply.push(AddrPair::new(sa.clone(), da.clone(), 2));
                }
            }
        }
    }

    /// Resolve a textual zone to the numeric index of that interface,
    /// when the inventory knows it.
    fn canonical(&self, mut address: Address) -> Address {
        if address.scope_index() != 0 {
            return address;
        }
        let index = address
            .zone()
            .and_then(|zone| zone.name())
            .and_then(|name| self.sources.zone_index(name));
        if let Some(index) = index {
            address.resolve_zone(index);
        }
        address
    }
}
