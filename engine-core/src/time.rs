//! Modular arithmetic over the free-running hardware clock.
//!
//! Clock values are points on a ring, not absolute instants. Any two values
//! compared here must lie within half the ring of each other; past that the
//! ordering is undefined, which bounds how far ahead anything may be scheduled.

/// Raw value of the free-running hardware counter.
pub type TimeVal = u32;

/// Crank angle in degrees.
pub type Degrees = f32;

/// Counter ticks per second.
pub const TICKRATE: u32 = 4_000_000;

/// Ticks elapsed going forward from `earlier` to `later`.
#[must_use]
pub const fn time_diff(later: TimeVal, earlier: TimeVal) -> TimeVal {
    later.wrapping_sub(earlier)
}

/// Returns `true` when `a` happens strictly before `b`.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub const fn time_before(a: TimeVal, b: TimeVal) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// Returns `true` when `a` happens before or at `b`.
#[must_use]
pub const fn time_before_or_equal(a: TimeVal, b: TimeVal) -> bool {
    !time_before(b, a)
}

/// Returns `true` when `val` lies within the inclusive window `[start, end]`.
#[must_use]
pub const fn time_in_range(val: TimeVal, start: TimeVal, end: TimeVal) -> bool {
    time_diff(val, start) <= time_diff(end, start)
}

/// Converts microseconds to clock ticks.
#[must_use]
pub const fn time_from_us(us: u32) -> TimeVal {
    us.wrapping_mul(TICKRATE / 1_000_000)
}

/// RPM implied by `degrees` of rotation taking `ticks`.
///
/// A zero-length interval reports 0 RPM, which every caller treats as invalid.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn rpm_from_time_diff(ticks: TimeVal, degrees: Degrees) -> u32 {
    if ticks == 0 {
        return 0;
    }
    (f64::from(TICKRATE) * f64::from(degrees) / (6.0 * f64::from(ticks))) as u32
}

/// Ticks needed to rotate `degrees` at `rpm`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn time_from_rpm_diff(rpm: u32, degrees: Degrees) -> TimeVal {
    if rpm == 0 {
        return 0;
    }
    (f64::from(TICKRATE) * f64::from(degrees) / (6.0 * f64::from(rpm))) as TimeVal
}

/// Degrees rotated during `ticks` at `rpm`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn degrees_from_time_diff(ticks: TimeVal, rpm: u32) -> Degrees {
    (f64::from(ticks) * f64::from(rpm) * 6.0 / f64::from(TICKRATE)) as Degrees
}

/// Wraps `angle` into `[0, max)`.
#[must_use]
pub fn clamp_angle(angle: Degrees, max: Degrees) -> Degrees {
    let mut wrapped = angle % max;
    if wrapped < 0.0 {
        wrapped += max;
    }
    wrapped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_is_consistent_across_wraparound() {
        assert_eq!(time_diff(0x0000_0010, 0xFFFF_FF00), 0x110);
        assert_eq!(time_diff(500, 200), 300);
        assert_eq!(time_diff(200, 200), 0);
    }

    #[test]
    fn before_is_the_negation_of_reverse_before_or_equal() {
        let pairs = [
            (0u32, 1u32),
            (1, 0),
            (7, 7),
            (0xFFFF_FFF0, 0x10),
            (0x10, 0xFFFF_FFF0),
            (0x7FFF_0000, 0x8000_0000),
        ];
        for (a, b) in pairs {
            assert_eq!(
                time_before(a, b),
                !time_before_or_equal(b, a),
                "ordering mismatch for ({a:#x}, {b:#x})"
            );
        }
    }

    #[test]
    fn before_handles_wrapped_counter() {
        assert!(time_before(0xFFFF_FF00, 0x10));
        assert!(!time_before(0x10, 0xFFFF_FF00));
        assert!(!time_before(5, 5));
        assert!(time_before_or_equal(5, 5));
    }

    #[test]
    fn range_check_spans_the_wrap() {
        assert!(time_in_range(0x05, 0xFFFF_FFF0, 0x20));
        assert!(time_in_range(0xFFFF_FFF0, 0xFFFF_FFF0, 0x20));
        assert!(time_in_range(0x20, 0xFFFF_FFF0, 0x20));
        assert!(!time_in_range(0x21, 0xFFFF_FFF0, 0x20));
        assert!(!time_in_range(0xFFFF_FFEF, 0xFFFF_FFF0, 0x20));
    }

    #[test]
    fn rpm_and_time_conversions_agree() {
        // 90 degrees at 6000 RPM is 2.5ms.
        assert_eq!(time_from_rpm_diff(6000, 90.0), 10_000);
        assert_eq!(rpm_from_time_diff(10_000, 90.0), 6000);
        assert_eq!(rpm_from_time_diff(0, 90.0), 0);
        assert_eq!(time_from_rpm_diff(0, 90.0), 0);
        assert!((degrees_from_time_diff(10_000, 6000) - 90.0).abs() < 0.001);
        assert_eq!(time_from_us(1000), 4000);
    }

    #[test]
    fn clamp_wraps_both_directions() {
        assert!((clamp_angle(730.0, 720.0) - 10.0).abs() < f32::EPSILON);
        assert!((clamp_angle(-10.0, 720.0) - 710.0).abs() < f32::EPSILON);
        assert!((clamp_angle(360.0, 720.0) - 360.0).abs() < f32::EPSILON);
    }
}
