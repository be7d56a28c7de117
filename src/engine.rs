//! The connectivity discovery engine.
//!
//! An [`Engine`] owns the three shared containers (source inventory,
//! destination set, pair cache) and the environment flags, and runs
//! the two background workers that keep them current: the poller,
//! which sweeps the source × destination product with connect probes,
//! and the monitor, which refreshes the inventory, bounds the
//! destination set and emits the periodic state dump.
//!
//! The free functions in the crate root drive a process-wide engine;
//! embedders can also construct their own with
//! [`Engine::with_collaborators`] and shut it down explicitly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use crate::addr::Address;
use crate::anchor::{self, AnchorCatalog, OfflineCatalog};
use crate::error::AprResult;
use crate::flags::Flags;
use crate::ifaces::{InterfaceEnumerator, SystemEnumerator};
use crate::net::probe::{probe_pair, PairConnector, TcpConnector};
use crate::resolve::{DnsResolver, SystemResolver};
use crate::state::{DestinationSet, PairCache, SourceInventory};

/// Timeout for a single connect probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between poller sweeps, also the monitor tick.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// How big the destination list may grow.
pub const DEFAULT_MAX_DESTINATIONS: usize = 10;

/// Seed latency for suggested IPv6 pairs (ms).
pub const DEFAULT_LATENCY6: u32 = 200;

/// Seed latency for suggested IPv4 pairs (ms).
pub const DEFAULT_LATENCY4: u32 = 250;

/// Engine tuning knobs.
#[derive(Clone, Debug)]
pub struct Config {
    pub probe_timeout: Duration,
    pub sweep_interval: Duration,
    pub max_destinations: usize,
    pub latency6: u32,
    pub latency4: u32,
    pub printing: bool,
}

impl Config {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn set_probe_timeout(mut self, value: Duration) -> Self {
        self.probe_timeout = value;
        self
    }

    pub fn set_sweep_interval(mut self, value: Duration) -> Self {
        self.sweep_interval = value;
        self
    }

    pub fn set_max_destinations(mut self, value: usize) -> Self {
        self.max_destinations = value;
        self
    }

    pub fn set_latency6(mut self, value: u32) -> Self {
        self.latency6 = value;
        self
    }

    pub fn set_latency4(mut self, value: u32) -> Self {
        self.latency4 = value;
        self
    }

    /// Enable the monitor's periodic state dump.
    pub fn set_printing(mut self, value: bool) -> Self {
        self.printing = value;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            max_destinations: DEFAULT_MAX_DESTINATIONS,
            latency6: DEFAULT_LATENCY6,
            latency4: DEFAULT_LATENCY4,
            printing: false,
        }
    }
}

/// Shared slots for the default gateways, refreshed with the sources.
#[derive(Clone, Debug, Default)]
pub(crate) struct Gateways {
    pub v4: Option<Address>,
    pub v6: Option<Address>,
}

/// The two anchor targets chosen at initialisation.
#[derive(Clone, Debug, Default)]
pub(crate) struct Targets {
    pub v6: Option<Address>,
    pub v4: Option<Address>,
}

pub struct Engine {
    pub(crate) config: Config,
    pub(crate) flags: Flags,
    pub(crate) sources: SourceInventory,
    pub(crate) dests: DestinationSet,
    pub(crate) pairs: PairCache,
    pub(crate) gateways: Mutex<Gateways>,
    pub(crate) targets: Mutex<Targets>,
    pub(crate) resolver: Box<dyn DnsResolver>,
    enumerator: Box<dyn InterfaceEnumerator>,
    catalog: Box<dyn AnchorCatalog>,
    connector: Box<dyn PairConnector>,
    poll_count: Mutex<u32>,
    polled: Condvar,
    logging: AtomicBool,
    pub(crate) initialised: Mutex<bool>,
    stop: Mutex<bool>,
    stopped: Condvar,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Engine over the real host: system resolver and interfaces, TCP
    /// probes, no catalog access.
    pub fn new(config: Config) -> Engine {
        Engine::with_collaborators(
            config,
            Box::new(SystemResolver),
            Box::new(SystemEnumerator),
            Box::new(OfflineCatalog),
            Box::new(TcpConnector),
        )
    }

    /// Engine with externally supplied collaborators.
    pub fn with_collaborators(
        config: Config,
        resolver: Box<dyn DnsResolver>,
        enumerator: Box<dyn InterfaceEnumerator>,
        catalog: Box<dyn AnchorCatalog>,
        connector: Box<dyn PairConnector>,
    ) -> Engine {
        Engine {
            config,
            flags: Flags::new(),
            sources: SourceInventory::default(),
            dests: DestinationSet::default(),
            pairs: PairCache::default(),
            gateways: Mutex::new(Gateways::default()),
            targets: Mutex::new(Targets::default()),
            resolver,
            enumerator,
            catalog,
            connector,
            poll_count: Mutex::new(0),
            polled: Condvar::new(),
            logging: AtomicBool::new(true),
            initialised: Mutex::new(false),
            stop: Mutex::new(false),
            stopped: Condvar::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// One-time start-up: choose the anchor targets, seed the source
    /// and destination state, start both workers and wait for the
    /// first full sweep. Subsequent calls return immediately.
    ///
    /// Fails only when the host interfaces cannot be enumerated.
    pub fn init(self: &Arc<Engine>) -> AprResult<()> {
        let mut initialised = self.initialised.lock().unwrap();
        if *initialised {
            return Ok(());
        }

        debug!("choosing probe targets; may take a minute...");
        let (target6, target4) = anchor::pick_targets(self.catalog.as_ref());
        *self.targets.lock().unwrap() = Targets {
            v6: Some(target6.clone()),
            v4: Some(target4.clone()),
        };

        self.refresh_sources()?;

        self.dests.add(target6);
        self.dests.add(target4);
        let gateways = self.gateways.lock().unwrap().clone();
        if let Some(gateway) = gateways.v6 {
            self.dests.add(gateway);
        }
        if let Some(gateway) = gateways.v4 {
            self.dests.add(gateway);
        }

        self.spawn_workers();
        self.wait_for_sweeps(1);
        *initialised = true;
        Ok(())
    }

    pub(crate) fn initialised(&self) -> bool {
        *self.initialised.lock().unwrap()
    }

    /// Detected connectivity status, keyed as in [`crate::status`].
    pub fn status(&self) -> HashMap<&'static str, bool> {
        self.flags.status()
    }

    /// Stop both workers and wait for them to finish. A worker blocked
    /// in a probe exits once that probe resolves, so this returns
    /// within roughly one probe timeout.
    pub fn shutdown(&self) {
        *self.stop.lock().unwrap() = true;
        self.stopped.notify_all();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().unwrap().drain(..).collect();
        for worker in workers {
            let _ = worker.join();
        }
    }

    fn spawn_workers(self: &Arc<Engine>) {
        let poller = Arc::clone(self);
        let monitor = Arc::clone(self);
        let mut workers = self.workers.lock().unwrap();
        workers.push(thread::spawn(move || poller.poll_loop()));
        workers.push(thread::spawn(move || monitor.monitor_loop()));
    }

    /// Replace the source inventory from the enumerator, recompute the
    /// inventory-derived flags, publish the gateway slots and evict
    /// cached pairs whose source address disappeared.
    pub(crate) fn refresh_sources(&self) -> AprResult<()> {
        let host = self.enumerator.interfaces()?;
        let sources: Vec<Address> = host
            .sources
            .into_iter()
            .filter(|sa| !sa.is_loopback())
            .collect();
        self.flags
            .set_ula_present(sources.iter().any(Address::is_ula));
        self.flags
            .set_rfc1918(sources.iter().any(Address::is_private));
        self.sources.replace(sources);
        self.pairs.retain_sources(&self.sources.snapshot());
        *self.gateways.lock().unwrap() = Gateways {
            v4: host.def_gateway4,
            v6: host.def_gateway6,
        };
        Ok(())
    }

    fn stopping(&self) -> bool {
        *self.stop.lock().unwrap()
    }

    /// Sleep for `wait`, returning early (and true) on shutdown.
    fn sleep_or_stop(&self, wait: Duration) -> bool {
        let stop = self.stop.lock().unwrap();
        let (stop, _timeout) = self
            .stopped
            .wait_timeout_while(stop, wait, |stop| !*stop)
            .unwrap();
        *stop
    }

    pub(crate) fn poll_count(&self) -> u32 {
        *self.poll_count.lock().unwrap()
    }

    fn finish_sweep(&self) {
        let mut count = self.poll_count.lock().unwrap();
        *count += 1;
        if *count > 1000 {
            // modular; nothing depends on the absolute value
            *count = 0;
        }
        self.polled.notify_all();
    }

    /// Block until at least `sweeps` full sweeps have completed.
    pub(crate) fn wait_for_sweeps(&self, sweeps: u32) {
        let mut count = self.poll_count.lock().unwrap();
        while *count < sweeps {
            count = self.polled.wait(count).unwrap();
        }
    }

    /// Poller: sweep every source against every destination, keeping
    /// the pair cache in step and discarding destinations that
    /// provably should have answered.
    ///
    /// Snapshots keep every probe lock-free; a probe can block for the
    /// whole connect timeout.
    fn poll_loop(&self) {
        loop {
            let sa_list = self.sources.snapshot();
            for sa in &sa_list {
                let mut remove_das: Vec<Address> = Vec::new();
                let da_list = self.dests.snapshot();
                for da in &da_list {
                    if self.stopping() {
                        return;
                    }
                    let outcome = probe_pair(
                        self.connector.as_ref(),
                        &self.flags,
                        sa,
                        da,
                        self.config.probe_timeout,
                    );
                    match outcome {
                        Some(latency) => self.pairs.upsert(sa, da, latency),
                        None => {
                            self.pairs.remove(sa, da);
                            if self.should_have_worked(sa, da) {
                                remove_das.push(da.clone());
                            }
                        }
                    }
                }
                if !remove_das.is_empty() {
                    debug!("removing destinations {:?}", remove_das);
                    for da in &remove_das {
                        self.dests.remove(da);
                    }
                }
            }
            self.finish_sweep();
            if self.sleep_or_stop(self.config.sweep_interval) {
                return;
            }
        }
    }

    /// Whether a failed pair contradicts the flags, i.e. its class has
    /// already been proven to work.
    fn should_have_worked(&self, sa: &Address, da: &Address) -> bool {
        let flags = &self.flags;
        if sa.version() == 4 && da.version() == 4 {
            (sa.is_private() && da.is_global() && flags.nat44())
                || (sa.is_global() && da.is_global() && flags.ipv4_ok())
        } else if sa.version() == 6 && da.version() == 6 {
            (sa.is_link_local()
                && da.is_link_local()
                && flags.lla_ok()
                && sa.zone() == da.zone())
                || (sa.is_ula() && da.is_ula() && flags.ula_ok())
                || (sa.is_ula() && da.is_global() && flags.nptv6())
                || (sa.is_global() && da.is_global() && flags.gua_ok())
        } else {
            false
        }
    }

    /// Monitor: periodic state dump, source refresh and destination
    /// trimming.
    fn monitor_loop(&self) {
        loop {
            if self.sleep_or_stop(self.config.sweep_interval) {
                return;
            }
            let count = self.poll_count();
            if self.logging.swap(false, Ordering::Relaxed) && self.config.printing {
                self.log_state(count);
            }
            if count % 6 == 0 {
                if let Err(err) = self.refresh_sources() {
                    warn!("source refresh failed: {}", err);
                }
                self.dests
                    .trim_to(self.config.max_destinations, &self.protected_destinations());
            }
            if count < 3 || count % 10 == 0 {
                self.logging.store(true, Ordering::Relaxed);
            }
        }
    }

    /// Destinations the size trim never removes: the anchor targets
    /// and the default gateways.
    fn protected_destinations(&self) -> Vec<Address> {
        let targets = self.targets.lock().unwrap().clone();
        let gateways = self.gateways.lock().unwrap().clone();
        [targets.v6, targets.v4, gateways.v6, gateways.v4]
            .into_iter()
            .flatten()
            .collect()
    }

    fn log_state(&self, count: u32) {
        if count > 1 {
            info!("sources: {}", join(&self.sources.snapshot()));
            info!("destinations: {}", join(&self.dests.snapshot()));
        }
        for pair in self.pairs.snapshot() {
            info!("pair: {}", pair);
        }
        let flags = &self.flags;
        info!(
            "status: GUA<>GUA: {}, ULA<>ULA: {}, LLA<>LLA: {}, IPv4<>IPv4: {}",
            flags.gua_ok(),
            flags.ula_ok(),
            flags.lla_ok(),
            flags.ipv4_ok()
        );
        info!(
            "ULA: {}, NPTv6: {}, RFC1918: {}, NAT44: {}",
            flags.ula_present(),
            flags.nptv6(),
            flags.rfc1918(),
            flags.nat44()
        );
        info!("poll count: {}", count);
    }
}

fn join(addrs: &[Address]) -> String {
    let rendered: Vec<String> = addrs.iter().map(Address::to_string).collect();
    rendered.join(", ")
}

#[cfg(test)]
pub(crate) mod mocks {
    use std::collections::HashMap;
    use std::io::{self, ErrorKind};
    use std::net::{IpAddr, SocketAddr};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::{Config, Engine};
    use crate::anchor::OfflineCatalog;
    use crate::error::{AprErrorKind, AprResult};
    use crate::ifaces::{HostAddresses, InterfaceEnumerator};
    use crate::net::probe::PairConnector;
    use crate::resolve::{collate, DnsResolver};

    /// Resolver with canned answers; unknown names are NXDOMAIN.
    pub struct MockResolver {
        pub answers: HashMap<String, Vec<IpAddr>>,
        pub failing: bool,
    }

    impl MockResolver {
        pub fn empty() -> MockResolver {
            MockResolver {
                answers: HashMap::new(),
                failing: false,
            }
        }

        pub fn with(name: &str, addrs: Vec<IpAddr>) -> MockResolver {
            let mut resolver = MockResolver::empty();
            resolver.answers.insert(name.to_string(), addrs);
            resolver
        }

        pub fn failing() -> MockResolver {
            MockResolver {
                answers: HashMap::new(),
                failing: true,
            }
        }
    }

    impl DnsResolver for MockResolver {
        fn resolve(&self, name: &str, _port: u16) -> AprResult<Vec<IpAddr>> {
            if self.failing {
                return Err(io::Error::new(ErrorKind::TimedOut, "resolver down").into());
            }
            match self.answers.get(name) {
                Some(addrs) => Ok(collate(addrs.iter().copied())),
                None => Err(AprErrorKind::Nxdomain(name.to_string()).into()),
            }
        }
    }

    /// Enumerator over a test-controlled host layout; the shared
    /// handle lets tests change the layout between refreshes.
    pub struct MockEnumerator {
        host: Arc<Mutex<HostAddresses>>,
        failing: bool,
    }

    impl MockEnumerator {
        pub fn new(host: HostAddresses) -> MockEnumerator {
            MockEnumerator {
                host: Arc::new(Mutex::new(host)),
                failing: false,
            }
        }

        pub fn failing() -> MockEnumerator {
            MockEnumerator {
                host: Arc::new(Mutex::new(HostAddresses::default())),
                failing: true,
            }
        }

        pub fn handle(&self) -> Arc<Mutex<HostAddresses>> {
            Arc::clone(&self.host)
        }
    }

    impl InterfaceEnumerator for MockEnumerator {
        fn interfaces(&self) -> AprResult<HostAddresses> {
            if self.failing {
                return Err(io::Error::new(ErrorKind::Unsupported, "no interfaces").into());
            }
            Ok(self.host.lock().unwrap().clone())
        }
    }

    /// Connector that succeeds only for configured (source,
    /// destination) address pairs, with the configured latency.
    pub struct MockConnector {
        outcomes: HashMap<(IpAddr, IpAddr), u32>,
    }

    impl MockConnector {
        pub fn new() -> MockConnector {
            MockConnector {
                outcomes: HashMap::new(),
            }
        }

        pub fn works(mut self, source: &str, destination: &str, latency: u32) -> MockConnector {
            self.outcomes.insert(
                (source.parse().unwrap(), destination.parse().unwrap()),
                latency,
            );
            self
        }
    }

    impl PairConnector for MockConnector {
        fn connect(
            &self,
            source: &SocketAddr,
            destination: &SocketAddr,
            _timeout: Duration,
        ) -> io::Result<u32> {
            match self.outcomes.get(&(source.ip(), destination.ip())) {
                Some(latency) => Ok(*latency),
                None => Err(io::Error::new(ErrorKind::ConnectionRefused, "unreachable")),
            }
        }
    }

    pub fn fast_config() -> Config {
        Config::new()
            .set_probe_timeout(Duration::from_millis(50))
            .set_sweep_interval(Duration::from_millis(20))
    }

    pub fn host(sources: &[&str]) -> HostAddresses {
        HostAddresses {
            sources: sources.iter().map(|s| s.parse().unwrap()).collect(),
            def_gateway4: None,
            def_gateway6: None,
        }
    }

    pub fn engine_with(
        layout: HostAddresses,
        resolver: MockResolver,
        connector: MockConnector,
    ) -> Arc<Engine> {
        Arc::new(Engine::with_collaborators(
            fast_config(),
            Box::new(resolver),
            Box::new(MockEnumerator::new(layout)),
            Box::new(OfflineCatalog),
            Box::new(connector),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::mocks::{engine_with, fast_config, host, MockConnector, MockEnumerator, MockResolver};
    use super::{Config, Engine};
    use crate::addr::Address;
    use crate::anchor::OfflineCatalog;
    use crate::ifaces::HostAddresses;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    #[test]
    fn positive_refresh_recomputes_presence() {
        let enumerator = MockEnumerator::new(host(&["fd00::1", "10.0.0.7"]));
        let handle = enumerator.handle();
        let engine = Engine::with_collaborators(
            fast_config(),
            Box::new(MockResolver::empty()),
            Box::new(enumerator),
            Box::new(OfflineCatalog),
            Box::new(MockConnector::new()),
        );

        engine.refresh_sources().unwrap();
        assert!(engine.flags.ula_present());
        assert!(engine.flags.rfc1918());

        *handle.lock().unwrap() = host(&["2001:db8::1"]);
        engine.refresh_sources().unwrap();
        assert!(!engine.flags.ula_present());
        assert!(!engine.flags.rfc1918());
        assert_eq!(engine.sources.snapshot(), vec![addr("2001:db8::1")]);
    }

    #[test]
    fn positive_refresh_filters_loopback() {
        let engine = engine_with(
            host(&["127.0.0.1", "::1", "192.0.2.5"]),
            MockResolver::empty(),
            MockConnector::new(),
        );
        engine.refresh_sources().unwrap();
        assert_eq!(engine.sources.snapshot(), vec![addr("192.0.2.5")]);
    }

    #[test]
    fn positive_refresh_evicts_stale_pairs() {
        let enumerator = MockEnumerator::new(host(&["10.0.0.7"]));
        let handle = enumerator.handle();
        let engine = Engine::with_collaborators(
            fast_config(),
            Box::new(MockResolver::empty()),
            Box::new(enumerator),
            Box::new(OfflineCatalog),
            Box::new(MockConnector::new()),
        );

        engine.refresh_sources().unwrap();
        engine
            .pairs
            .upsert(&addr("10.0.0.7"), &addr("198.51.100.7"), 50);

        *handle.lock().unwrap() = host(&["10.0.0.8"]);
        engine.refresh_sources().unwrap();
        assert!(engine.pairs.snapshot().is_empty());
    }

    #[test]
    fn negative_init_fails_without_interfaces() {
        let engine = Arc::new(Engine::with_collaborators(
            fast_config(),
            Box::new(MockResolver::empty()),
            Box::new(MockEnumerator::failing()),
            Box::new(OfflineCatalog),
            Box::new(MockConnector::new()),
        ));
        assert!(engine.init().is_err());
        assert!(!engine.initialised());
    }

    #[test]
    fn positive_init_is_idempotent() {
        let engine = engine_with(
            host(&["192.0.2.5"]),
            MockResolver::empty(),
            MockConnector::new(),
        );
        engine.init().unwrap();
        engine.init().unwrap();
        assert_eq!(engine.workers.lock().unwrap().len(), 2);
        assert!(engine.poll_count() >= 1);
        engine.shutdown();
    }

    #[test]
    fn positive_init_seeds_protected_destinations() {
        let layout = HostAddresses {
            sources: vec![addr("192.168.1.4")],
            def_gateway4: Some(addr("192.168.1.1")),
            def_gateway6: None,
        };
        let engine = engine_with(layout, MockResolver::empty(), MockConnector::new());
        engine.init().unwrap();
        let dests = engine.dests.snapshot();
        engine.shutdown();
        // anchors first, then the known gateway
        assert_eq!(dests.len(), 3);
        assert!(dests.contains(&addr("192.168.1.1")));
        assert_eq!(engine.protected_destinations().len(), 3);
    }

    #[test]
    fn positive_prune_unreachable_destination() {
        // IPv4 is proven to work by the anchor, so a silent global
        // destination is dropped after one sweep over it.
        let connector = MockConnector::new().works("192.0.2.5", "216.218.223.250", 10);
        let engine = engine_with(host(&["192.0.2.5"]), MockResolver::empty(), connector);
        engine.init().unwrap();
        assert!(engine.flags.ipv4_ok());

        let dead = addr("198.51.100.200");
        engine.dests.add(dead.clone());
        let seen = engine.poll_count();
        engine.wait_for_sweeps(seen + 2);
        let gone = !engine.dests.contains(&dead);
        engine.shutdown();
        assert!(gone);
    }

    #[test]
    fn positive_shutdown_joins_workers() {
        let engine = engine_with(
            host(&["192.0.2.5"]),
            MockResolver::empty(),
            MockConnector::new(),
        );
        engine.init().unwrap();
        engine.shutdown();
        assert!(engine.workers.lock().unwrap().is_empty());
        let resting = engine.poll_count();
        std::thread::sleep(std::time::Duration::from_millis(60));
        assert_eq!(engine.poll_count(), resting);
    }

    #[test]
    fn positive_trim_keeps_bound() {
        let engine = engine_with(
            host(&["192.0.2.5"]),
            MockResolver::empty(),
            MockConnector::new(),
        );
        let config_max = engine.config.max_destinations;
        for host_byte in 1..=15u8 {
            engine.dests.add(addr(&format!("203.0.113.{}", host_byte)));
        }
        engine
            .dests
            .trim_to(config_max, &engine.protected_destinations());
        assert_eq!(engine.dests.snapshot().len(), config_max);
    }

    #[test]
    fn positive_default_config_values() {
        let config = Config::new();
        assert_eq!(config.probe_timeout.as_secs(), 5);
        assert_eq!(config.sweep_interval.as_secs(), 10);
        assert_eq!(config.max_destinations, 10);
        assert_eq!(config.latency6, 200);
        assert_eq!(config.latency4, 250);
        assert!(!config.printing);
    }
}
