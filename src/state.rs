//! Shared containers for the discovery engine.
//!
//! Each container is guarded by its own mutex and never participates
//! in nested locking. Snapshots are by-value copies taken under the
//! lock and released before anyone iterates, so no lock is ever held
//! across a probe.

use std::sync::Mutex;

use crate::addr::{AddrPair, Address};

/// The set of locally usable source addresses, replaced atomically on
/// every refresh.
#[derive(Debug, Default)]
pub(crate) struct SourceInventory {
    list: Mutex<Vec<Address>>,
}

impl SourceInventory {
    pub fn replace(&self, addrs: Vec<Address>) {
        *self.list.lock().unwrap() = addrs;
    }

    pub fn snapshot(&self) -> Vec<Address> {
        self.list.lock().unwrap().clone()
    }

    /// Numeric interface index for a zone name, learned from the
    /// link-local sources assigned to that interface.
    pub fn zone_index(&self, name: &str) -> Option<u32> {
        let list = self.list.lock().unwrap();
        list.iter()
            .filter_map(Address::zone)
            .find(|zone| zone.name() == Some(name) && zone.index() != 0)
            .map(|zone| zone.index())
    }
}

/// The ordered set of destinations currently under probe.
#[derive(Debug, Default)]
pub(crate) struct DestinationSet {
    list: Mutex<Vec<Address>>,
}

impl DestinationSet {
    /// Append `da` unless it is already present.
    pub fn add(&self, da: Address) {
        let mut list = self.list.lock().unwrap();
        if !list.contains(&da) {
            list.push(da);
        }
    }

    pub fn remove(&self, da: &Address) {
        self.list.lock().unwrap().retain(|entry| entry != da);
    }

    pub fn contains(&self, da: &Address) -> bool {
        self.list.lock().unwrap().contains(da)
    }

    pub fn snapshot(&self) -> Vec<Address> {
        self.list.lock().unwrap().clone()
    }

    /// Drop the oldest unprotected entries until at most `max` remain.
    /// Stops early if only protected entries are left.
    pub fn trim_to(&self, max: usize, protected: &[Address]) {
        let mut list = self.list.lock().unwrap();
        while list.len() > max {
            match list.iter().position(|da| !protected.contains(da)) {
                Some(oldest) => {
                    list.remove(oldest);
                }
                None => break,
            }
        }
    }
}

/// Proven pairs with their rolling latency, kept in insertion order so
/// equally ranked replies stay stable.
#[derive(Debug, Default)]
pub(crate) struct PairCache {
    list: Mutex<Vec<AddrPair>>,
}

impl PairCache {
    /// Record a success: insert the pair, or fold the new measurement
    /// into the rolling average.
    pub fn upsert(&self, sa: &Address, da: &Address, latency: u32) {
        let mut list = self.list.lock().unwrap();
        match list.iter_mut().find(|pair| pair.sa == *sa && pair.da == *da) {
            Some(pair) => pair.latency = (pair.latency + latency) / 2,
            None => list.push(AddrPair::new(sa.clone(), da.clone(), latency)),
        }
    }

    pub fn remove(&self, sa: &Address, da: &Address) {
        self.list
            .lock()
            .unwrap()
            .retain(|pair| pair.sa != *sa || pair.da != *da);
    }

    pub fn snapshot(&self) -> Vec<AddrPair> {
        self.list.lock().unwrap().clone()
    }

    /// Evict entries whose source address is no longer assigned.
    pub fn retain_sources(&self, sources: &[Address]) {
        self.list
            .lock()
            .unwrap()
            .retain(|pair| sources.contains(&pair.sa));
    }
}
