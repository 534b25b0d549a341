//! Collaborator interfaces the engine consumes from its host (spec §6).
//!
//! These are the three external dependencies named in spec §6:
//! `InterfaceLifecycle`, `Clock`, and `Random`. A standalone crate has no OS
//! integration layer to hand them from, so default implementations are
//! provided and used unless an embedder supplies its own.

use std::net::IpAddr;
use std::time::Instant;

/// A source of monotonic time, used for TTL math (spec §6).
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// `Instant::now()`-backed clock.
#[derive(Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A source of cryptographic-quality randomness, used for per-interface
/// host-name generation and probe jitter (spec §6, §9).
pub trait Random: Send + Sync {
    fn fill_bytes(&self, buf: &mut [u8]);

    fn gen_range_u64(&self, bound: u64) -> u64;
}

/// `rand::rngs::OsRng`-backed randomness.
#[derive(Default)]
pub struct OsRandom;

impl Random for OsRandom {
    fn fill_bytes(&self, buf: &mut [u8]) {
        use rand::RngCore;
        rand::rngs::OsRng.fill_bytes(buf);
    }

    fn gen_range_u64(&self, bound: u64) -> u64 {
        use rand::Rng;
        if bound == 0 {
            return 0;
        }
        rand::rngs::OsRng.gen_range(0..bound)
    }
}

/// A host's view of one network interface's link-layer addresses, as
/// reported by the OS (spec §4.3 "link properties").
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkProperties {
    pub addresses: Vec<IpAddr>,
}

impl LinkProperties {
    pub fn has_ipv4(&self) -> bool {
        self.addresses.iter().any(IpAddr::is_ipv4)
    }

    pub fn has_ipv6(&self) -> bool {
        self.addresses.iter().any(IpAddr::is_ipv6)
    }
}

/// Identifies a network the host has told us about. `Tethered` networks
/// share the sentinel "local" id described in spec §4.3.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NetworkId {
    Network(i64),
    /// Sentinel id shared by all local-only tethering interfaces.
    LocalTether,
}

/// Inbound events the host delivers to the socket provider (spec §4.3).
/// Naming this as a trait (rather than a single enum an embedder must
/// construct) lets an embedder drive the provider straight from whatever
/// native callback shape its OS integration already has.
pub trait InterfaceLifecycle: Send {
    /// Called once for every event the host wants to deliver; the socket
    /// provider's worker thread calls this in a loop until it returns `None`
    /// to indicate no further events are currently available.
    fn next_event(&mut self) -> Option<LifecycleEvent>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    LinkPropertiesChanged {
        network: NetworkId,
        properties: LinkProperties,
    },
    InterfaceLost {
        network: NetworkId,
    },
    TetheredInterfacesChanged {
        current: Vec<String>,
    },
}
