//! Discovery scheduling and behavior tuning (spec §4.4, §9).
//!
//! The teacher ties together its single, eagerly-built, process-wide
//! immutable config object with `lazy_static!`; discovery inherits that
//! pattern for the handful of constants below rather than threading a
//! config struct through every call site.

use std::time::Duration;

use lazy_static::lazy_static;

/// Tunables governing how a `ServiceTypeClient` paces its queries (spec
/// §4.4.2). These exact numbers are not pinned by any surviving original
/// source for this spec; they are this implementation's own choice,
/// consistent with RFC 6762 §5.2's informative query-interval guidance
/// (see DESIGN.md's Open Questions ledger).
#[derive(Clone, Copy, Debug)]
pub struct MdnsSearchOptions {
    /// Queries sent back-to-back at startup, in active (browsing) mode.
    pub queries_per_burst: u32,
    /// Queries sent back-to-back at startup, in passive (long-lived,
    /// low-traffic) mode.
    pub queries_per_burst_passive_mode: u32,
    /// Spacing between queries within one burst.
    pub time_between_queries_in_burst: Duration,
    /// Delay before the second burst; later bursts back off from here.
    pub initial_time_between_bursts: Duration,
    /// Steady-state spacing once the backoff ceiling is reached.
    pub time_between_bursts: Duration,
}

impl Default for MdnsSearchOptions {
    fn default() -> MdnsSearchOptions {
        MdnsSearchOptions {
            queries_per_burst: 3,
            queries_per_burst_passive_mode: 1,
            time_between_queries_in_burst: Duration::from_millis(20),
            initial_time_between_bursts: Duration::from_millis(1_000),
            time_between_bursts: Duration::from_millis(60_000),
        }
    }
}

lazy_static! {
    /// The process-wide default; the only piece of mutable-looking global
    /// state this crate keeps is this single eagerly-built, never-mutated
    /// value (spec §9's "forbidden global mutable state" design note).
    pub static ref DEFAULT_SEARCH_OPTIONS: MdnsSearchOptions = MdnsSearchOptions::default();
}
