#![recursion_limit = "1024"]

//! Ranked source and destination address pair discovery.
//!
//! `getapr` replaces the usual name-to-address lookup with one that
//! returns (family, source, destination) pairings, ranked by measured
//! reachability. Operating systems routinely pick an unsuitable source
//! address on hosts with several prefixes (IPv4+IPv6, GUA+ULA, RFC1918
//! behind NAT44, NPTv6, link-local); iterating the returned pairings
//! until one connects sidesteps that.
//!
//! A background engine keeps the candidate state warm: it enumerates
//! the local source addresses, probes a bounded set of destinations
//! from each of them with plain TCP connects, remembers which pairs
//! worked and at what rolling latency, and latches what successes and
//! failures reveal about the environment (NAT44, NPTv6, which address
//! classes are reachable at all).
//!
//! ```no_run
//! getapr::init(false).unwrap();
//! let pairs = getapr::get_addr_pairs("www.example.com", 80).unwrap();
//! if let Some(pair) = pairs.first() {
//!     // bind a socket of pair.family to pair.source,
//!     // then connect it to pair.destination
//! }
//! ```

mod addr;
mod anchor;
mod engine;
mod error;
mod flags;
mod ifaces;
mod net;
mod query;
mod resolve;
mod state;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

pub use addr::{AddrPair, Address, Zone};
pub use anchor::{
    AnchorCatalog, AnchorProbe, AnchorStatus, OfflineCatalog, FALLBACK_ANCHOR4, FALLBACK_ANCHOR6,
};
pub use engine::{
    Config, Engine, DEFAULT_LATENCY4, DEFAULT_LATENCY6, DEFAULT_MAX_DESTINATIONS,
    DEFAULT_PROBE_TIMEOUT, DEFAULT_SWEEP_INTERVAL,
};
pub use error::{AprError, AprErrorKind, AprResult, AprResultExt};
pub use ifaces::{HostAddresses, InterfaceEnumerator, SystemEnumerator};
pub use net::probe::{PairConnector, TcpConnector, PROBE_PORT};
pub use net::SocketPair;
pub use resolve::{DnsResolver, SystemResolver};

static ENGINE: OnceLock<Arc<Engine>> = OnceLock::new();

fn shared_engine(printing: bool) -> &'static Arc<Engine> {
    ENGINE.get_or_init(|| Arc::new(Engine::new(Config::new().set_printing(printing))))
}

/// Initialise the process-wide engine.
///
/// Idempotent. Blocks through the first full probe sweep, which
/// includes real network probes and takes several seconds at least.
/// `printing` enables the periodic state dump (emitted through the
/// `log` crate). The one fatal failure is being unable to enumerate
/// the host interfaces.
pub fn init(printing: bool) -> AprResult<()> {
    shared_engine(printing).init()
}

/// Ranked (family, source, destination) pairings for `target`, which
/// may be a host name or an address literal.
///
/// Initialises the engine on first use. The caller is expected to try
/// the pairings in order until a connection succeeds; IPv6 always
/// comes first when available. An empty list means nothing is known
/// for the target, or the name does not exist; resolver failures other
/// than NXDOMAIN are returned as errors. `port` only shapes the
/// destination tuples of the reply.
pub fn get_addr_pairs(target: &str, port: u16) -> AprResult<Vec<SocketPair>> {
    let engine = shared_engine(false);
    engine.init()?;
    engine.addr_pairs(target, port)
}

/// Detected connectivity status.
///
/// Keys: `GUA_ok`, `ULA_ok`, `LLA_ok`, `IPv4_ok`, `ULA_present`,
/// `NPTv6`, `RFC1918`, `NAT44`. All false before [`init`] has run.
pub fn status() -> HashMap<&'static str, bool> {
    match ENGINE.get() {
        Some(engine) => engine.status(),
        None => flags::Flags::new().status(),
    }
}
