//! Double-buffered output timeline.
//!
//! Each buffer is a fixed run of slots, one clock tick per slot, holding the
//! pins to drive high and low at that tick. Hardware (DMA, or the emulator's
//! playback loop) reads the live buffer while software edits the other. The
//! two buffers always cover consecutive windows exactly one buffer length
//! apart.

use core::fmt;

use portable_atomic::{AtomicU32, Ordering};

use crate::time::{TimeVal, time_diff};

/// Slots per output buffer.
pub const OUTPUT_SLOTS: usize = 128;

#[allow(clippy::cast_possible_truncation)]
const BUFFER_TICKS: TimeVal = OUTPUT_SLOTS as TimeVal;

/// Pins switched at one tick.
#[derive(Debug)]
pub struct OutputSlot {
    on_mask: AtomicU32,
    off_mask: AtomicU32,
}

impl OutputSlot {
    const fn new() -> Self {
        Self {
            on_mask: AtomicU32::new(0),
            off_mask: AtomicU32::new(0),
        }
    }

    /// Pins driven high at this tick.
    #[must_use]
    pub fn on_mask(&self) -> u32 {
        self.on_mask.load(Ordering::SeqCst)
    }

    /// Pins driven low at this tick.
    #[must_use]
    pub fn off_mask(&self) -> u32 {
        self.off_mask.load(Ordering::SeqCst)
    }

    fn mask(&self, level: bool) -> &AtomicU32 {
        if level { &self.on_mask } else { &self.off_mask }
    }

    fn clear(&self) {
        self.on_mask.store(0, Ordering::SeqCst);
        self.off_mask.store(0, Ordering::SeqCst);
    }
}

/// One window of the timeline.
#[derive(Debug)]
pub struct OutputBuffer {
    start: TimeVal,
    slots: [OutputSlot; OUTPUT_SLOTS],
}

impl OutputBuffer {
    const fn new(start: TimeVal) -> Self {
        Self {
            start,
            slots: [const { OutputSlot::new() }; OUTPUT_SLOTS],
        }
    }

    /// Time of slot zero.
    #[must_use]
    pub fn start(&self) -> TimeVal {
        self.start
    }

    /// Time of the last slot.
    #[must_use]
    pub fn end(&self) -> TimeVal {
        self.start.wrapping_add(BUFFER_TICKS - 1)
    }

    /// Slot index covering `time`, if this window contains it.
    #[must_use]
    pub fn slot_index(&self, time: TimeVal) -> Option<usize> {
        let offset = time_diff(time, self.start) as usize;
        (offset < OUTPUT_SLOTS).then_some(offset)
    }

    #[must_use]
    pub fn slot(&self, index: usize) -> Option<&OutputSlot> {
        self.slots.get(index)
    }

    /// Slot covering `time`, if this window contains it.
    #[must_use]
    pub fn slot_at(&self, time: TimeVal) -> Option<&OutputSlot> {
        self.slot_index(time).and_then(|index| self.slot(index))
    }

    pub fn slots(&self) -> impl Iterator<Item = &OutputSlot> {
        self.slots.iter()
    }
}

/// Software and hardware disagree about which buffer is live.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimelineError {
    OwnershipOverrun { expected: usize, reported: usize },
}

impl fmt::Display for TimelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimelineError::OwnershipOverrun { expected, reported } => write!(
                f,
                "output buffer overrun: expected buffer {expected} live, hardware reports {reported}"
            ),
        }
    }
}

/// The pair of alternating output buffers.
#[derive(Debug)]
pub struct OutputTimeline {
    buffers: [OutputBuffer; 2],
    live: usize,
}

impl OutputTimeline {
    /// Creates a timeline whose live buffer starts at `start`.
    #[must_use]
    pub const fn new(start: TimeVal) -> Self {
        Self {
            buffers: [
                OutputBuffer::new(start),
                OutputBuffer::new(start.wrapping_add(BUFFER_TICKS)),
            ],
            live: 0,
        }
    }

    /// Index of the buffer owned by hardware.
    #[must_use]
    pub fn live_index(&self) -> usize {
        self.live
    }

    /// Start of the live buffer. Nothing at or before it can still be written.
    #[must_use]
    pub fn live_start(&self) -> TimeVal {
        self.buffers[self.live].start
    }

    #[must_use]
    pub fn live(&self) -> &OutputBuffer {
        &self.buffers[self.live]
    }

    #[must_use]
    pub fn buffer(&self, index: usize) -> &OutputBuffer {
        &self.buffers[index & 1]
    }

    /// Buffer and slot covering `time`, if either window contains it.
    #[must_use]
    pub fn locate(&self, time: TimeVal) -> Option<(usize, usize)> {
        self.buffers
            .iter()
            .enumerate()
            .find_map(|(index, buffer)| buffer.slot_index(time).map(|slot| (index, slot)))
    }

    /// Sets the pin bit for `level` at `slot`.
    pub(crate) fn mark(&self, buffer: usize, slot: usize, pin: u8, level: bool) {
        if let Some(slot) = self.buffers[buffer & 1].slot(slot) {
            slot.mask(level).fetch_or(1 << pin, Ordering::SeqCst);
        }
    }

    /// Clears the pin bit for `level` at `slot`.
    pub(crate) fn unmark(&self, buffer: usize, slot: usize, pin: u8, level: bool) {
        if let Some(slot) = self.buffers[buffer & 1].slot(slot) {
            slot.mask(level).fetch_and(!(1 << pin), Ordering::SeqCst);
        }
    }

    /// Hands the retired buffer back to software.
    ///
    /// `reported` is the buffer hardware is now reading. The previously live
    /// buffer is moved two lengths forward, past the newly live one, and
    /// cleared. Returns the index of the retired buffer.
    ///
    /// # Errors
    ///
    /// Returns [`TimelineError::OwnershipOverrun`] when hardware did not move
    /// to the expected buffer. The timeline is left untouched.
    pub fn swap(&mut self, reported: usize) -> Result<usize, TimelineError> {
        let expected = 1 - self.live;
        if reported != expected {
            return Err(TimelineError::OwnershipOverrun { expected, reported });
        }
        let retired = self.live;
        let buffer = &mut self.buffers[retired];
        buffer.start = buffer.start.wrapping_add(2 * BUFFER_TICKS);
        for slot in &buffer.slots {
            slot.clear();
        }
        self.live = expected;
        Ok(retired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_cover_consecutive_windows() {
        let timeline = OutputTimeline::new(1000);
        assert_eq!(timeline.buffer(0).start(), 1000);
        assert_eq!(timeline.buffer(0).end(), 1127);
        assert_eq!(timeline.buffer(1).start(), 1128);
        assert_eq!(timeline.locate(1000), Some((0, 0)));
        assert_eq!(timeline.locate(1130), Some((1, 2)));
        assert_eq!(timeline.locate(1256), None);
        assert_eq!(timeline.locate(999), None);
    }

    #[test]
    fn swap_leapfrogs_and_clears_retired_buffer() {
        let mut timeline = OutputTimeline::new(0);
        timeline.mark(0, 5, 3, true);
        timeline.mark(1, 7, 4, false);

        assert_eq!(timeline.swap(1), Ok(0));
        assert_eq!(timeline.live_index(), 1);
        assert_eq!(timeline.live_start(), 128);
        assert_eq!(timeline.buffer(0).start(), 256);
        assert_eq!(timeline.buffer(0).slot(5).map(OutputSlot::on_mask), Some(0));
        assert_eq!(timeline.buffer(1).slot(7).map(OutputSlot::off_mask), Some(1 << 4));

        let starts = (timeline.buffer(0).start(), timeline.buffer(1).start());
        assert_eq!(time_diff(starts.0, starts.1), 128);
    }

    #[test]
    fn swap_rejects_unexpected_buffer() {
        let mut timeline = OutputTimeline::new(0);
        assert_eq!(
            timeline.swap(0),
            Err(TimelineError::OwnershipOverrun {
                expected: 1,
                reported: 0
            })
        );
        assert_eq!(timeline.live_index(), 0);
        assert_eq!(timeline.buffer(0).start(), 0);
    }

    #[test]
    fn windows_wrap_the_clock() {
        let mut timeline = OutputTimeline::new(0xFFFF_FF80);
        assert_eq!(timeline.locate(0xFFFF_FFFF), Some((0, 127)));
        assert_eq!(timeline.locate(0x0000_0000), Some((1, 0)));
        timeline.swap(1).expect("hardware moved to buffer 1");
        assert_eq!(timeline.buffer(0).start(), 0x80);
        assert_eq!(timeline.locate(0x85), Some((0, 5)));
    }

    #[test]
    fn mark_and_unmark_touch_only_one_pin() {
        let timeline = OutputTimeline::new(0);
        timeline.mark(0, 10, 1, true);
        timeline.mark(0, 10, 2, true);
        timeline.unmark(0, 10, 1, true);
        assert_eq!(timeline.buffer(0).slot(10).map(OutputSlot::on_mask), Some(1 << 2));
        assert_eq!(timeline.buffer(0).slot(10).map(OutputSlot::off_mask), Some(0));
    }

    #[test]
    fn slots_outside_the_window_are_absent() {
        let timeline = OutputTimeline::new(0);
        timeline.mark(0, 0, 1, true);
        let buffer = timeline.buffer(0);

        assert!(buffer.slot(OUTPUT_SLOTS - 1).is_some());
        assert!(buffer.slot(OUTPUT_SLOTS).is_none());
        assert!(buffer.slot_at(128).is_none());
        assert_eq!(buffer.slot_at(0).map(OutputSlot::on_mask), Some(1 << 1));

        // Out of range writes are dropped rather than wrapped onto slot zero.
        timeline.mark(0, OUTPUT_SLOTS, 2, true);
        assert_eq!(buffer.slot(0).map(OutputSlot::on_mask), Some(1 << 1));
    }
}
