//! A generic "send N times, waiting this long between each" driver, shared
//! by the prober and announcer (spec §4.5.3, §4.5.4, §9's shared scheduling
//! primitive).

use std::time::{Duration, Instant};

use crate::collab::Random;
use crate::scheduler::{Scheduler, TaskKey};

/// Probe: 3 sends 250ms apart, per RFC 6762 §8.1.
const PROBE_NUM_SENDS: u32 = 3;
const PROBE_DELAY: Duration = Duration::from_millis(250);
/// Initial probe jitter window, per RFC 6762 §8.1 ("a random delay of 0-250ms").
const PROBE_INITIAL_JITTER_MS: u64 = 250;

/// Announce: 8 sends, delay doubling from 1s, per RFC 6762 §8.3.
const ANNOUNCE_NUM_SENDS: u32 = 8;
const ANNOUNCE_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Drives a bounded sequence of repeated sends at increasing or constant
/// intervals. Callers drive it by scheduler deadline: `start` enqueues the
/// first fire, `fire` is called when that deadline is reached and returns
/// whether the caller should actually transmit now (always true unless the
/// sequence was already exhausted), scheduling the following send as a side
/// effect.
pub struct PacketRepeater {
    sends_remaining: u32,
    next_delay: Duration,
    double_each_time: bool,
}

impl PacketRepeater {
    pub fn new(num_sends: u32, delay: Duration, double_each_time: bool) -> PacketRepeater {
        PacketRepeater {
            sends_remaining: num_sends,
            next_delay: delay,
            double_each_time,
        }
    }

    /// A prober: 3 sends 250ms apart, with a random 0-250ms jitter applied
    /// only to its first scheduled fire.
    pub fn prober(random: &dyn Random) -> (PacketRepeater, Duration) {
        let jitter = Duration::from_millis(random.gen_range_u64(PROBE_INITIAL_JITTER_MS));
        (PacketRepeater::new(PROBE_NUM_SENDS, PROBE_DELAY, false), jitter)
    }

    /// An announcer: 8 sends, delay doubling from 1s each time.
    pub fn announcer() -> PacketRepeater {
        PacketRepeater::new(ANNOUNCE_NUM_SENDS, ANNOUNCE_INITIAL_DELAY, true)
    }

    pub fn start(&self, scheduler: &mut Scheduler, key: TaskKey, now: Instant, initial_delay: Duration) {
        scheduler.schedule(key, now + initial_delay);
    }

    /// Called when this repeater's deadline fires. Returns `true` and
    /// schedules the next send if one remains; returns `false` once the
    /// sequence is exhausted (nothing left to send, nothing rescheduled).
    pub fn fire(&mut self, scheduler: &mut Scheduler, key: TaskKey, now: Instant) -> bool {
        if self.sends_remaining == 0 {
            return false;
        }
        self.sends_remaining -= 1;
        if self.sends_remaining > 0 {
            scheduler.schedule(key, now + self.next_delay);
            if self.double_each_time {
                self.next_delay *= 2;
            }
        }
        true
    }

    pub fn is_done(&self) -> bool {
        self.sends_remaining == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::OsRandom;

    #[test]
    fn prober_fires_exactly_three_times() {
        let (mut repeater, jitter) = PacketRepeater::prober(&OsRandom);
        assert!(jitter < Duration::from_millis(250));
        let mut scheduler = Scheduler::new();
        let now = Instant::now();
        repeater.start(&mut scheduler, 1, now, jitter);

        let mut sends = 0;
        while !repeater.is_done() {
            assert!(repeater.fire(&mut scheduler, 1, now + Duration::from_secs(10)));
            sends += 1;
        }
        assert_eq!(sends, 3);
        assert!(scheduler.pop_due(now + Duration::from_secs(100)).is_none());
    }

    #[test]
    fn announcer_delay_doubles_each_send() {
        let mut repeater = PacketRepeater::announcer();
        assert_eq!(repeater.next_delay, Duration::from_secs(1));
        repeater.fire(&mut Scheduler::new(), 1, Instant::now());
        assert_eq!(repeater.next_delay, Duration::from_secs(2));
        repeater.fire(&mut Scheduler::new(), 1, Instant::now());
        assert_eq!(repeater.next_delay, Duration::from_secs(4));
    }
}
