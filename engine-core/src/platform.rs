//! Hardware seam consumed by the decoder and scheduler.
//!
//! The platform supplies the clock, the software fallback output write, the
//! one-shot event timer, and which output buffer DMA currently owns.
//! Interrupt masking is not part of this trait: the core enters
//! `critical_section::with`, and each binary installs the implementation that
//! masks its interrupt domain.

use core::cell::Cell;

use heapless::Vec;

use crate::time::TimeVal;

/// Primitive operations the core needs from the MCU layer.
pub trait Platform {
    /// Reads the free-running hardware counter.
    fn current_time(&self) -> TimeVal;

    /// Immediately drives an output pin. Only used when a timeline write
    /// raced the hardware.
    fn set_output(&mut self, pin: u8, level: bool);

    /// Arms the one-shot event timer.
    fn set_event_timer(&mut self, time: TimeVal);

    /// Returns the armed event timer value, or `None` when disabled.
    fn event_timer(&self) -> Option<TimeVal>;

    /// Acknowledges a pending event timer interrupt.
    fn clear_event_timer(&mut self);

    /// Stops the event timer from firing.
    fn disable_event_timer(&mut self);

    /// Index of the output buffer currently owned by DMA.
    fn current_output_buffer(&self) -> usize;
}

/// Maximum number of software fallback writes retained by [`SimPlatform`].
pub const SIM_WRITE_LOG_CAPACITY: usize = 32;

/// Software fallback write observed by [`SimPlatform`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FallbackWrite {
    pub time: TimeVal,
    pub pin: u8,
    pub level: bool,
}

/// Deterministic platform used by the host emulator and tests.
///
/// The clock only moves when told to. `with_auto_advance` makes every clock
/// read advance time, which reproduces the hardware racing a timeline write.
#[derive(Debug, Default)]
pub struct SimPlatform {
    now: Cell<TimeVal>,
    auto_advance: TimeVal,
    outputs: u32,
    event_timer: Option<TimeVal>,
    event_timer_pending: bool,
    output_buffer: usize,
    fallback_writes: Vec<FallbackWrite, SIM_WRITE_LOG_CAPACITY>,
}

impl SimPlatform {
    /// Creates a platform with the clock at `now`.
    #[must_use]
    pub fn new(now: TimeVal) -> Self {
        Self {
            now: Cell::new(now),
            ..Self::default()
        }
    }

    /// Makes every clock read advance time by `ticks` after sampling.
    #[must_use]
    pub fn with_auto_advance(mut self, ticks: TimeVal) -> Self {
        self.auto_advance = ticks;
        self
    }

    /// Sets the per-read clock advance.
    pub fn set_auto_advance(&mut self, ticks: TimeVal) {
        self.auto_advance = ticks;
    }

    /// Moves the clock to an absolute value.
    pub fn set_time(&mut self, now: TimeVal) {
        self.now.set(now);
    }

    /// Moves the clock forward.
    pub fn advance(&mut self, ticks: TimeVal) {
        self.now.set(self.now.get().wrapping_add(ticks));
    }

    /// Reads the clock without the auto-advance side effect.
    #[must_use]
    pub fn peek_time(&self) -> TimeVal {
        self.now.get()
    }

    /// Records which buffer the simulated DMA engine is reading.
    pub fn set_output_buffer(&mut self, index: usize) {
        self.output_buffer = index;
    }

    /// Applies a timeline slot to the output register, as DMA would.
    pub fn apply_slot(&mut self, on_mask: u32, off_mask: u32) {
        self.outputs |= on_mask;
        self.outputs &= !off_mask;
    }

    /// Current output register.
    #[must_use]
    pub fn outputs(&self) -> u32 {
        self.outputs
    }

    /// Level of a single output pin.
    #[must_use]
    pub fn output_level(&self, pin: u8) -> bool {
        self.outputs & (1 << pin) != 0
    }

    /// Returns `true` once the clock has reached the armed event timer.
    #[must_use]
    pub fn event_timer_due(&self) -> bool {
        self.event_timer_pending
            || self
                .event_timer
                .is_some_and(|at| crate::time::time_before_or_equal(at, self.now.get()))
    }

    /// Software fallback writes in the order they happened.
    #[must_use]
    pub fn fallback_writes(&self) -> &[FallbackWrite] {
        &self.fallback_writes
    }
}

impl Platform for SimPlatform {
    fn current_time(&self) -> TimeVal {
        let now = self.now.get();
        self.now.set(now.wrapping_add(self.auto_advance));
        now
    }

    fn set_output(&mut self, pin: u8, level: bool) {
        if level {
            self.outputs |= 1 << pin;
        } else {
            self.outputs &= !(1 << pin);
        }
        let record = FallbackWrite {
            time: self.now.get(),
            pin,
            level,
        };
        if self.fallback_writes.is_full() {
            self.fallback_writes.remove(0);
        }
        let _ = self.fallback_writes.push(record);
    }

    fn set_event_timer(&mut self, time: TimeVal) {
        self.event_timer = Some(time);
        self.event_timer_pending = false;
    }

    fn event_timer(&self) -> Option<TimeVal> {
        self.event_timer
    }

    fn clear_event_timer(&mut self) {
        self.event_timer_pending = false;
    }

    fn disable_event_timer(&mut self) {
        self.event_timer = None;
        self.event_timer_pending = false;
    }

    fn current_output_buffer(&self) -> usize {
        self.output_buffer
    }
}
