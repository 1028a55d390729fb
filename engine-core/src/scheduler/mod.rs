//! Hazard-free output event scheduling.
//!
//! Every configured output owns a start and a stop [`ScheduleEntry`].
//! Rescheduling reconciles the desired pair against what is already written
//! into the [`OutputTimeline`], taking into account that the hardware keeps
//! playing the live buffer while software edits it. Multi-step updates run
//! inside `critical_section::with` so the buffer-swap and capture handlers
//! never observe a half-moved event.

pub mod callbacks;
pub mod entry;
pub mod timeline;

use heapless::Vec;

pub use callbacks::{CallbackAction, CallbackError, CallbackList, MAX_CALLBACKS, TimedCallback};
pub use entry::{EntryWriter, RACE_LOG_CAPACITY, RaceLog, ScheduleEntry, TooLate, Write};
pub use timeline::{OUTPUT_SLOTS, OutputBuffer, OutputSlot, OutputTimeline, TimelineError};

use crate::config::{EventKind, MAX_EVENTS, OutputEventConfig};
use crate::decoder::EnginePosition;
use crate::platform::Platform;
use crate::time::{
    Degrees, TimeVal, clamp_angle, time_before, time_diff, time_from_rpm_diff, time_from_us,
};

/// Rotation after firing before an event may be rescheduled.
const REFIRE_GUARD_DEGREES: Degrees = 90.0;

/// Furthest a pending stop may move later in one reschedule.
const MAX_STOP_ADVANCE_DEGREES: Degrees = 360.0;

/// One controlled output and its pair of transitions.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OutputEvent {
    pub kind: EventKind,
    pub angle: Degrees,
    pub pin: u8,
    pub inverted: bool,
    pub start: ScheduleEntry,
    pub stop: ScheduleEntry,
}

impl OutputEvent {
    #[must_use]
    pub const fn new(config: &OutputEventConfig) -> Self {
        Self {
            kind: config.kind,
            angle: config.angle,
            pin: config.pin,
            inverted: config.inverted,
            start: ScheduleEntry::new(config.pin, !config.inverted),
            stop: ScheduleEntry::new(config.pin, config.inverted),
        }
    }

    /// Neither transition is placed.
    #[must_use]
    pub const fn is_unscheduled(&self) -> bool {
        self.start.is_new() && self.stop.is_new()
    }

    /// Both transitions have happened.
    #[must_use]
    pub const fn has_fired(&self) -> bool {
        self.start.has_fired() && self.stop.has_fired()
    }

    /// Mid-pulse: started, stop still pending.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.start.has_fired() && self.stop.is_pending()
    }

    fn reset_fired(&mut self) {
        self.start.reset();
        self.stop.reset();
    }
}

/// Output events, their timeline, and the timed callback list.
#[derive(Debug)]
pub struct Scheduler {
    timeline: OutputTimeline,
    events: Vec<OutputEvent, MAX_EVENTS>,
    callbacks: CallbackList,
    races: RaceLog,
}

impl Scheduler {
    /// Creates a scheduler whose live output buffer starts at `timeline_start`.
    #[must_use]
    pub fn new(events: &[OutputEventConfig], timeline_start: TimeVal) -> Self {
        Self {
            timeline: OutputTimeline::new(timeline_start),
            events: events.iter().take(MAX_EVENTS).map(OutputEvent::new).collect(),
            callbacks: CallbackList::new(),
            races: RaceLog::default(),
        }
    }

    #[must_use]
    pub fn timeline(&self) -> &OutputTimeline {
        &self.timeline
    }

    #[must_use]
    pub fn events(&self) -> &[OutputEvent] {
        &self.events
    }

    #[must_use]
    pub fn event(&self, index: usize) -> Option<&OutputEvent> {
        self.events.get(index)
    }

    #[must_use]
    pub fn callbacks(&self) -> &CallbackList {
        &self.callbacks
    }

    pub fn callbacks_mut(&mut self) -> &mut CallbackList {
        &mut self.callbacks
    }

    /// Software fallback writes since startup.
    #[must_use]
    pub fn race_total(&self) -> u32 {
        self.races.total()
    }

    /// Races that did not fit in a drain, since startup.
    #[must_use]
    pub fn races_dropped(&self) -> u32 {
        self.races.dropped()
    }

    /// Pins that raced since the last drain.
    pub fn drain_races(&mut self) -> Vec<u8, RACE_LOG_CAPACITY> {
        self.races.drain()
    }

    /// Moves event `index` to `(start, stop)` without glitching the output.
    ///
    /// With `preserve_duration`, a start that can no longer move shifts the
    /// stop by the same amount so the pulse keeps its width.
    pub fn schedule_output_event_safely<P: Platform + ?Sized>(
        &mut self,
        platform: &mut P,
        index: usize,
        start: TimeVal,
        stop: TimeVal,
        preserve_duration: bool,
    ) {
        let Some(event) = self.events.get_mut(index) else {
            return;
        };
        let mut writer = EntryWriter::new(&self.timeline, platform, &mut self.races);
        critical_section::with(|_| reconcile(&mut writer, event, start, stop, preserve_duration));
    }

    /// Unschedules event `index` unless it has started. An event mid-pulse
    /// keeps its stop.
    pub fn deschedule_event<P: Platform + ?Sized>(&mut self, platform: &mut P, index: usize) {
        let Some(event) = self.events.get_mut(index) else {
            return;
        };
        let mut writer = EntryWriter::new(&self.timeline, platform, &mut self.races);
        critical_section::with(|_| deschedule(&mut writer, event));
    }

    /// Unschedules every event. Safe in any entry state; active pulses still end.
    pub fn invalidate_scheduled_events<P: Platform + ?Sized>(&mut self, platform: &mut P) {
        let mut writer = EntryWriter::new(&self.timeline, platform, &mut self.races);
        critical_section::with(|_| {
            for event in &mut self.events {
                if !event.is_unscheduled() {
                    deschedule(&mut writer, event);
                }
            }
        });
    }

    /// Places ignition event `index` so the spark lands at its angle less
    /// `advance`, after `dwell_us` of coil charge.
    ///
    /// Returns `false` when the event is left alone: no position, fired less
    /// than 90 degrees ago, inside the spark dead time, or the stop would
    /// move more than a revolution later.
    pub fn schedule_ignition_event<P: Platform + ?Sized>(
        &mut self,
        platform: &mut P,
        index: usize,
        position: &EnginePosition,
        advance: Degrees,
        dwell_us: u32,
        min_fire_time_us: u32,
    ) -> bool {
        if !position.has_position || position.rpm == 0 {
            return false;
        }
        let Some(event) = self.events.get_mut(index) else {
            return false;
        };

        let firing_angle = clamp_angle(
            event.angle - advance - position.last_trigger_angle + position.offset,
            position.cycle_degrees,
        );
        let stop = position
            .last_trigger_time
            .wrapping_add(time_from_rpm_diff(position.rpm, firing_angle));
        let start = stop.wrapping_sub(time_from_us(dwell_us));

        if event.has_fired() {
            let last_spark = event.stop.time;
            if time_diff(stop, last_spark) < time_from_rpm_diff(position.rpm, REFIRE_GUARD_DEGREES) {
                return false;
            }
            if time_before(start, last_spark.wrapping_add(time_from_us(min_fire_time_us))) {
                return false;
            }
            event.reset_fired();
        }
        if stop_moves_too_far(event, stop, position.rpm) {
            return false;
        }

        self.schedule_output_event_safely(platform, index, start, stop, false);
        true
    }

    /// Places fuel event `index` so injection of `pulse_width_us` ends at its angle.
    ///
    /// Once placed, a callback at the stop time lets the event be rescheduled
    /// as soon as it finishes.
    ///
    /// # Errors
    ///
    /// [`CallbackError::Full`] if the reschedule callback cannot be queued.
    /// The event itself is still placed.
    pub fn schedule_fuel_event<P: Platform + ?Sized>(
        &mut self,
        platform: &mut P,
        index: usize,
        position: &EnginePosition,
        pulse_width_us: u32,
    ) -> Result<bool, CallbackError> {
        if !position.has_position || position.rpm == 0 {
            return Ok(false);
        }
        let Some(event) = self.events.get_mut(index) else {
            return Ok(false);
        };

        let firing_angle = clamp_angle(
            event.angle - position.last_trigger_angle + position.offset,
            position.cycle_degrees,
        );
        let stop = position
            .last_trigger_time
            .wrapping_add(time_from_rpm_diff(position.rpm, firing_angle));
        let start = stop.wrapping_sub(time_from_us(pulse_width_us));

        if event.has_fired() {
            if time_diff(stop, event.stop.time)
                < time_from_rpm_diff(position.rpm, REFIRE_GUARD_DEGREES)
            {
                return Ok(false);
            }
            event.reset_fired();
        }
        if stop_moves_too_far(event, stop, position.rpm) {
            return Ok(false);
        }

        self.schedule_output_event_safely(platform, index, start, stop, true);

        let stop_entry = self.events[index].stop;
        if stop_entry.is_pending() {
            self.callbacks.schedule(
                platform,
                CallbackAction::RescheduleEvent(index),
                stop_entry.time,
            )?;
        }
        Ok(true)
    }

    /// Handles the hardware moving to the next output buffer.
    ///
    /// Entries written into the buffer that just finished playing are
    /// marked fired. The retired buffer moves to the window after the live
    /// one and receives every pending entry that falls inside it.
    ///
    /// # Errors
    ///
    /// [`TimelineError::OwnershipOverrun`] when `reported` is not the buffer
    /// software expected to go live. This is not recoverable.
    pub fn buffer_swap(&mut self, reported: usize) -> Result<(), TimelineError> {
        critical_section::with(|_| {
            let retired = self.timeline.swap(reported)?;
            let timeline = &self.timeline;
            let window = timeline.buffer(retired);
            for event in &mut self.events {
                for entry in [&mut event.start, &mut event.stop] {
                    if entry.buffer() == Some(retired) {
                        entry.retire();
                    }
                    if !entry.is_pending() || entry.buffer().is_some() {
                        continue;
                    }
                    if let Some(slot) = window.slot_index(entry.time) {
                        timeline.mark(retired, slot, entry.pin, entry.level);
                        entry.attach(retired);
                    }
                }
            }
            Ok(())
        })
    }
}

fn stop_moves_too_far(event: &OutputEvent, stop: TimeVal, rpm: u32) -> bool {
    event.stop.is_pending()
        && time_before(event.stop.time, stop)
        && time_diff(stop, event.stop.time) > time_from_rpm_diff(rpm, MAX_STOP_ADVANCE_DEGREES)
}

fn deschedule<P: Platform + ?Sized>(writer: &mut EntryWriter<'_, P>, event: &mut OutputEvent) {
    if writer.disable(&mut event.start) {
        writer.disable(&mut event.stop);
    }
}

fn reconcile<P: Platform + ?Sized>(
    writer: &mut EntryWriter<'_, P>,
    event: &mut OutputEvent,
    new_start: TimeVal,
    mut new_stop: TimeVal,
    preserve_duration: bool,
) {
    let active_level = !event.inverted;
    event.start.pin = event.pin;
    event.start.level = active_level;
    event.stop.pin = event.pin;
    event.stop.level = !active_level;

    // A stop that raced in while its start was refused is left over from a
    // failed placement. It already drove the output inactive.
    if event.start.is_new() && !event.stop.is_new() {
        writer.disable(&mut event.stop);
        event.stop.reset();
    }

    if event.is_unscheduled() {
        // Stop first: a start without a stop would leave the output on.
        if writer.enable(&mut event.stop, new_stop).is_err() {
            return;
        }
        if writer.enable(&mut event.start, new_start).is_err() {
            writer.disable(&mut event.stop);
        }
        return;
    }

    let old_start = event.start.time;
    let start_delay = old_start.wrapping_sub(new_start);

    if event.start.is_pending() && old_start == new_start {
        writer.reschedule_end(&mut event.stop, new_stop);
        return;
    }

    if event.start.is_pending() && time_before(new_start, old_start) {
        let mut moved = event.start.detached();
        if writer.enable(&mut moved, new_start).is_ok() {
            if writer.disable(&mut event.start) {
                event.start = moved;
            } else {
                writer.disable(&mut moved);
            }
        } else if preserve_duration {
            new_stop = new_stop.wrapping_add(start_delay);
        }
        writer.reschedule_end(&mut event.stop, new_stop);
        return;
    }

    // Later start, or the start has already happened.
    let start_released = writer.disable(&mut event.start);
    if !start_released && preserve_duration {
        new_stop = new_stop.wrapping_add(start_delay);
    }
    writer.reschedule_end(&mut event.stop, new_stop);
    if !start_released {
        return;
    }
    if !event.stop.is_pending() {
        // Nothing would turn the output off again.
        event.stop.reset();
        return;
    }
    if writer.enable(&mut event.start, new_start).is_err() {
        writer.disable(&mut event.stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SimPlatform;

    fn scheduler() -> Scheduler {
        Scheduler::new(&[OutputEventConfig::ignition(0.0, 1)], 0)
    }

    fn on_bit(scheduler: &Scheduler, buffer: usize, slot: usize) -> bool {
        scheduler
            .timeline()
            .buffer(buffer)
            .slot(slot)
            .is_some_and(|slot| slot.on_mask() & (1 << 1) != 0)
    }

    fn off_bit(scheduler: &Scheduler, buffer: usize, slot: usize) -> bool {
        scheduler
            .timeline()
            .buffer(buffer)
            .slot(slot)
            .is_some_and(|slot| slot.off_mask() & (1 << 1) != 0)
    }

    #[test]
    fn unscheduled_event_places_both_edges() {
        let mut platform = SimPlatform::new(5);
        let mut scheduler = scheduler();
        scheduler.schedule_output_event_safely(&mut platform, 0, 20, 40, false);

        let event = scheduler.event(0).expect("configured");
        assert!(event.start.is_pending() && event.stop.is_pending());
        assert!(on_bit(&scheduler, 0, 20));
        assert!(off_bit(&scheduler, 0, 40));
    }

    #[test]
    fn start_in_the_past_leaves_event_unscheduled() {
        let mut platform = SimPlatform::new(30);
        let mut scheduler = scheduler();
        scheduler.schedule_output_event_safely(&mut platform, 0, 20, 40, false);

        let event = scheduler.event(0).expect("configured");
        assert!(event.is_unscheduled());
        assert!(!off_bit(&scheduler, 0, 40));
    }

    #[test]
    fn inverted_event_swaps_levels() {
        let mut platform = SimPlatform::new(5);
        let mut scheduler =
            Scheduler::new(&[OutputEventConfig::fuel(0.0, 1).inverted()], 0);
        scheduler.schedule_output_event_safely(&mut platform, 0, 20, 40, false);
        assert!(off_bit(&scheduler, 0, 20));
        assert!(on_bit(&scheduler, 0, 40));
    }

    #[test]
    fn deschedule_keeps_stop_of_active_event() {
        let mut platform = SimPlatform::new(5);
        let mut scheduler = scheduler();
        scheduler.schedule_output_event_safely(&mut platform, 0, 20, 40, false);

        platform.set_time(25);
        scheduler.deschedule_event(&mut platform, 0);
        let event = scheduler.event(0).expect("configured");
        assert!(event.is_active());
        assert!(off_bit(&scheduler, 0, 40));
    }

    #[test]
    fn swap_retires_played_entries_and_fills_next_window() {
        let mut platform = SimPlatform::new(5);
        let mut scheduler = scheduler();
        scheduler.schedule_output_event_safely(&mut platform, 0, 100, 300, false);
        assert_eq!(scheduler.event(0).expect("configured").stop.buffer(), None);

        platform.set_time(128);
        scheduler.buffer_swap(1).expect("hardware on buffer 1");

        let event = scheduler.event(0).expect("configured");
        assert!(event.start.has_fired());
        assert!(event.stop.is_pending());
        assert_eq!(event.stop.buffer(), Some(0));
        assert!(off_bit(&scheduler, 0, 300 - 256));
    }

    #[test]
    fn swap_overrun_is_reported() {
        let mut scheduler = scheduler();
        assert_eq!(
            scheduler.buffer_swap(0),
            Err(TimelineError::OwnershipOverrun {
                expected: 1,
                reported: 0
            })
        );
    }
}
