//! Timer-driven playback of the live output buffer.
//!
//! The playback task sleeps until the next slot that switches a pin, applies
//! it, and hands the buffer back at the end of its window.

use engine_core::scheduler::OutputBuffer;
use engine_core::time::TimeVal;

/// What the playback task waits for next.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Wake {
    /// Slot `index` switches at least one pin at `time`.
    Slot { index: usize, time: TimeVal },
    /// The window is exhausted; the buffer swaps at this time.
    End(TimeVal),
}

impl Wake {
    pub const fn time(self) -> TimeVal {
        match self {
            Wake::Slot { time, .. } | Wake::End(time) => time,
        }
    }
}

/// First slot at or after `cursor` with a transition.
#[allow(clippy::cast_possible_truncation)]
pub fn next_wake(buffer: &OutputBuffer, cursor: usize) -> Wake {
    buffer
        .slots()
        .enumerate()
        .skip(cursor)
        .find(|(_, slot)| slot.on_mask() | slot.off_mask() != 0)
        .map_or(Wake::End(buffer.end().wrapping_add(1)), |(index, _)| {
            Wake::Slot {
                index,
                time: buffer.start().wrapping_add(index as TimeVal),
            }
        })
}

#[cfg(test)]
mod tests {
    use engine_core::platform::SimPlatform;
    use engine_core::scheduler::{EntryWriter, OutputTimeline, RaceLog, ScheduleEntry};

    use super::*;

    #[test]
    fn empty_buffer_waits_for_window_end() {
        let timeline = OutputTimeline::new(1_000);
        assert_eq!(next_wake(timeline.live(), 0), Wake::End(1_128));
    }

    #[test]
    fn finds_marked_slots_in_order() {
        let timeline = OutputTimeline::new(0);
        let mut platform = SimPlatform::new(5);
        let mut races = RaceLog::default();
        let mut writer = EntryWriter::new(&timeline, &mut platform, &mut races);
        let mut start = ScheduleEntry::new(1, true);
        let mut stop = ScheduleEntry::new(1, false);
        writer.enable(&mut start, 40).expect("ahead of hardware");
        writer.enable(&mut stop, 90).expect("ahead of hardware");

        let live = timeline.live();
        assert_eq!(next_wake(live, 0), Wake::Slot { index: 40, time: 40 });
        assert_eq!(next_wake(live, 41), Wake::Slot { index: 90, time: 90 });
        assert_eq!(next_wake(live, 91), Wake::End(128));
    }
}
