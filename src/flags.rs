//! Detected connectivity environment.
//!
//! Each flag is latched by a single observation made while probing.
//! The reachability and translation flags only ever move from false to
//! true within the life of an engine; the `_tried` companions record
//! that a decisive translation attempt has been made, which gates
//! future probing of that class. `ula_present` and `rfc1918` instead
//! follow the source inventory and are recomputed on every refresh.
//!
//! Because every transition is monotone and no invariant spans two
//! flags, plain atomic booleans with relaxed ordering are enough.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct Flags {
    nptv6: AtomicBool,
    nat44: AtomicBool,
    nptv6_tried: AtomicBool,
    nat44_tried: AtomicBool,
    ula_present: AtomicBool,
    rfc1918: AtomicBool,
    ula_ok: AtomicBool,
    gua_ok: AtomicBool,
    lla_ok: AtomicBool,
    ipv4_ok: AtomicBool,
}

impl Flags {
    pub fn new() -> Flags {
        Flags::default()
    }

    /// An NPTv6 or NAT66 translator is present.
    pub fn nptv6(&self) -> bool {
        self.nptv6.load(Ordering::Relaxed)
    }

    /// A NAPT44 translator is present.
    pub fn nat44(&self) -> bool {
        self.nat44.load(Ordering::Relaxed)
    }

    pub fn nptv6_tried(&self) -> bool {
        self.nptv6_tried.load(Ordering::Relaxed)
    }

    pub fn nat44_tried(&self) -> bool {
        self.nat44_tried.load(Ordering::Relaxed)
    }

    /// The source inventory holds at least one ULA.
    pub fn ula_present(&self) -> bool {
        self.ula_present.load(Ordering::Relaxed)
    }

    /// The source inventory holds at least one RFC1918 address.
    pub fn rfc1918(&self) -> bool {
        self.rfc1918.load(Ordering::Relaxed)
    }

    pub fn ula_ok(&self) -> bool {
        self.ula_ok.load(Ordering::Relaxed)
    }

    pub fn gua_ok(&self) -> bool {
        self.gua_ok.load(Ordering::Relaxed)
    }

    pub fn lla_ok(&self) -> bool {
        self.lla_ok.load(Ordering::Relaxed)
    }

    pub fn ipv4_ok(&self) -> bool {
        self.ipv4_ok.load(Ordering::Relaxed)
    }

    pub(crate) fn set_nptv6(&self) {
        self.nptv6.store(true, Ordering::Relaxed);
    }

    pub(crate) fn set_nat44(&self) {
        self.nat44.store(true, Ordering::Relaxed);
    }

    pub(crate) fn set_nptv6_tried(&self) {
        self.nptv6_tried.store(true, Ordering::Relaxed);
    }

    pub(crate) fn set_nat44_tried(&self) {
        self.nat44_tried.store(true, Ordering::Relaxed);
    }

    pub(crate) fn set_ula_ok(&self) {
        self.ula_ok.store(true, Ordering::Relaxed);
    }

    pub(crate) fn set_gua_ok(&self) {
        self.gua_ok.store(true, Ordering::Relaxed);
    }

    pub(crate) fn set_lla_ok(&self) {
        self.lla_ok.store(true, Ordering::Relaxed);
    }

    pub(crate) fn set_ipv4_ok(&self) {
        self.ipv4_ok.store(true, Ordering::Relaxed);
    }

    pub(crate) fn set_ula_present(&self, present: bool) {
        self.ula_present.store(present, Ordering::Relaxed);
    }

    pub(crate) fn set_rfc1918(&self, present: bool) {
        self.rfc1918.store(present, Ordering::Relaxed);
    }

    /// Connectivity status map returned by [`status`](crate::status).
    pub fn status(&self) -> HashMap<&'static str, bool> {
        HashMap::from([
            ("GUA_ok", self.gua_ok()),
            ("ULA_ok", self.ula_ok()),
            ("LLA_ok", self.lla_ok()),
            ("IPv4_ok", self.ipv4_ok()),
            ("ULA_present", self.ula_present()),
            ("NPTv6", self.nptv6()),
            ("RFC1918", self.rfc1918()),
            ("NAT44", self.nat44()),
        ])
    }
}
