//! Mapping between the engine's 32-bit counter and embassy's 64-bit ticks.
//!
//! The time driver runs at the engine tick rate, so the engine counter is the
//! low word of the embassy tick count.

use engine_core::time::{TICKRATE, TimeVal, time_before, time_diff};

#[allow(clippy::cast_lossless)]
const _: () = assert!(embassy_time::TICK_HZ == TICKRATE as u64);

/// Engine counter value at embassy tick `ticks`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn counter(ticks: u64) -> TimeVal {
    ticks as TimeVal
}

/// Embassy tick at which the counter next reads `time`. Times already passed
/// map to `now`.
#[must_use]
pub fn deadline(time: TimeVal, now: u64) -> u64 {
    let current = counter(now);
    if time_before(time, current) {
        now
    } else {
        now + u64::from(time_diff(time, current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_is_low_word() {
        assert_eq!(counter(0x1_0000_0005), 5);
        assert_eq!(counter(0xFFFF_FFFF), 0xFFFF_FFFF);
    }

    #[test]
    fn future_times_map_forward() {
        assert_eq!(deadline(1_500, 1_000), 1_500);
        assert_eq!(deadline(1_000, 1_000), 1_000);
    }

    #[test]
    fn deadline_crosses_counter_wrap() {
        let now = 0x1_FFFF_FFF0;
        assert_eq!(deadline(0x10, now), now + 0x20);
    }

    #[test]
    fn passed_times_fire_immediately() {
        assert_eq!(deadline(900, 1_000), 1_000);
    }
}
