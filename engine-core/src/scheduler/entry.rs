//! Schedule entries and the primitive enable/disable writes.
//!
//! An entry is one output transition. Its `(fired, scheduled)` flags give the
//! sub-state: new `(false, false)`, pending `(false, true)`, and fired once
//! `fired` is set. A fired entry can never be changed again until its event
//! is reset.

use heapless::Vec;

use super::timeline::OutputTimeline;
use crate::platform::Platform;
use crate::time::{TimeVal, time_before, time_before_or_equal};

/// Pins retained per drain of the race log. Races beyond this still count
/// towards [`RaceLog::total`] and are tallied in [`RaceLog::dropped`].
pub const RACE_LOG_CAPACITY: usize = 8;

/// One output transition.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScheduleEntry {
    pub time: TimeVal,
    pub pin: u8,
    /// Level the pin is driven to.
    pub level: bool,
    fired: bool,
    scheduled: bool,
    buffer: Option<usize>,
}

impl ScheduleEntry {
    #[must_use]
    pub const fn new(pin: u8, level: bool) -> Self {
        Self {
            time: 0,
            pin,
            level,
            fired: false,
            scheduled: false,
            buffer: None,
        }
    }

    #[must_use]
    pub const fn is_new(&self) -> bool {
        !self.fired && !self.scheduled
    }

    /// Scheduled and still changeable.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        !self.fired && self.scheduled
    }

    #[must_use]
    pub const fn has_fired(&self) -> bool {
        self.fired
    }

    #[must_use]
    pub const fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    /// Buffer this entry's bit was written into, if any.
    #[must_use]
    pub const fn buffer(&self) -> Option<usize> {
        self.buffer
    }

    /// Returns the entry to the new state, keeping its time.
    pub fn reset(&mut self) {
        self.fired = false;
        self.scheduled = false;
        self.buffer = None;
    }

    /// A new entry for the same pin and level.
    #[must_use]
    pub(crate) const fn detached(&self) -> Self {
        Self::new(self.pin, self.level)
    }

    /// Hardware has played the buffer holding this entry.
    pub(crate) fn retire(&mut self) {
        self.fired = true;
        self.buffer = None;
    }

    pub(crate) fn attach(&mut self, buffer: usize) {
        self.buffer = Some(buffer);
    }
}

/// How an accepted enable reached the hardware.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Write {
    /// Bit written into a buffer ahead of the hardware.
    Buffered,
    /// Beyond both windows; written at a later buffer swap.
    Pending,
    /// The hardware passed the slot during the write. The transition was
    /// applied directly and the entry is fired.
    Raced,
}

/// The requested time can no longer be written, or the entry is not new.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TooLate;

/// Software fallback writes since the last drain.
#[derive(Clone, Debug, Default)]
pub struct RaceLog {
    total: u32,
    dropped: u32,
    pins: Vec<u8, RACE_LOG_CAPACITY>,
}

impl RaceLog {
    fn record(&mut self, pin: u8) {
        self.total = self.total.wrapping_add(1);
        if self.pins.push(pin).is_err() {
            self.dropped = self.dropped.wrapping_add(1);
        }
    }

    /// Races observed since startup.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Races whose pin did not fit before the next drain, since startup.
    #[must_use]
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Takes the pins that raced since the last call.
    pub fn drain(&mut self) -> Vec<u8, RACE_LOG_CAPACITY> {
        core::mem::take(&mut self.pins)
    }
}

/// Writes entries into the timeline, detecting races with the hardware.
///
/// Callers hold a critical section for every multi-step sequence of writes.
pub struct EntryWriter<'a, P: Platform + ?Sized> {
    timeline: &'a OutputTimeline,
    platform: &'a mut P,
    races: &'a mut RaceLog,
}

impl<'a, P: Platform + ?Sized> EntryWriter<'a, P> {
    pub fn new(timeline: &'a OutputTimeline, platform: &'a mut P, races: &'a mut RaceLog) -> Self {
        Self {
            timeline,
            platform,
            races,
        }
    }

    /// Schedules a new entry at `time`.
    ///
    /// # Errors
    ///
    /// [`TooLate`] if the entry is not new, or `time` is at or before the
    /// live buffer start or before the current time. The entry is unchanged.
    pub fn enable(&mut self, entry: &mut ScheduleEntry, time: TimeVal) -> Result<Write, TooLate> {
        if !entry.is_new() {
            return Err(TooLate);
        }
        let now = self.platform.current_time();
        if time_before_or_equal(time, self.timeline.live_start()) || time_before(time, now) {
            return Err(TooLate);
        }

        entry.time = time;
        entry.scheduled = true;
        let Some((buffer, slot)) = self.timeline.locate(time) else {
            entry.buffer = None;
            return Ok(Write::Pending);
        };

        self.timeline.mark(buffer, slot, entry.pin, entry.level);
        entry.buffer = Some(buffer);

        let after = self.platform.current_time();
        if time_before_or_equal(time, after) {
            self.platform.set_output(entry.pin, entry.level);
            entry.fired = true;
            self.races.record(entry.pin);
            return Ok(Write::Raced);
        }
        Ok(Write::Buffered)
    }

    /// Unschedules an entry.
    ///
    /// Returns `true` when the entry is new afterwards. Returns `false` when
    /// the transition has already happened or is happening: the entry is
    /// then marked fired, and if the hardware could not have played it the
    /// transition is applied directly.
    pub fn disable(&mut self, entry: &mut ScheduleEntry) -> bool {
        if !entry.scheduled {
            return true;
        }
        if entry.fired {
            return false;
        }

        let now = self.platform.current_time();
        if time_before_or_equal(entry.time, now) {
            if entry.buffer.is_none() {
                self.platform.set_output(entry.pin, entry.level);
                self.races.record(entry.pin);
            }
            entry.fired = true;
            return false;
        }

        if let Some(buffer) = entry.buffer {
            if let Some(slot) = self.timeline.buffer(buffer).slot_index(entry.time) {
                self.timeline.unmark(buffer, slot, entry.pin, entry.level);
            }
            let after = self.platform.current_time();
            if time_before_or_equal(entry.time, after) {
                // The slot may have been played before the clear landed.
                self.platform.set_output(entry.pin, entry.level);
                self.races.record(entry.pin);
                entry.fired = true;
                return false;
            }
        }

        entry.reset();
        true
    }

    /// Moves a stop transition to `time`.
    ///
    /// The new position is enabled before the old one is released, so the
    /// entry is never scheduled in two places and never lost. Returns
    /// `false` if the entry stays where it was or has already fired.
    pub fn reschedule_end(&mut self, entry: &mut ScheduleEntry, time: TimeVal) -> bool {
        if entry.is_new() {
            return self.enable(entry, time).is_ok();
        }
        if entry.fired {
            return false;
        }
        if time_before_or_equal(entry.time, self.platform.current_time()) {
            // Already reached by the hardware.
            self.disable(entry);
            return false;
        }
        if entry.time == time {
            return true;
        }

        let mut moved = entry.detached();
        if self.enable(&mut moved, time).is_err() {
            return false;
        }
        if self.disable(entry) {
            *entry = moved;
            true
        } else {
            self.disable(&mut moved);
            false
        }
    }
}
