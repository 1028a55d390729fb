//! Board implementation of the engine [`Platform`].
//!
//! Output pins are plain push-pull GPIO indexed by their engine pin number.
//! The event timer is forwarded to the timer task through a signal, and the
//! live buffer index is maintained by the playback task.

use embassy_stm32::gpio::{Level, Output};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::Instant;
use engine_core::platform::Platform;
use engine_core::time::TimeVal;
use heapless::Vec;
use portable_atomic::{AtomicUsize, Ordering};

use crate::clock;

/// Output channels wired on the board.
pub const OUTPUT_PINS: usize = 8;

/// Latest event timer request; `None` disarms.
pub static EVENT_TIMER: Signal<CriticalSectionRawMutex, Option<TimeVal>> = Signal::new();

/// Buffer the playback task is currently reading.
pub static OUTPUT_BUFFER: AtomicUsize = AtomicUsize::new(0);

pub struct BoardPlatform {
    outputs: Vec<Output<'static>, OUTPUT_PINS>,
    event_timer: Option<TimeVal>,
}

impl BoardPlatform {
    pub fn new(outputs: Vec<Output<'static>, OUTPUT_PINS>) -> Self {
        Self {
            outputs,
            event_timer: None,
        }
    }

    /// Applies one timeline slot.
    pub fn apply_slot(&mut self, on_mask: u32, off_mask: u32) {
        for (pin, output) in (0_u32..).zip(self.outputs.iter_mut()) {
            if on_mask & (1 << pin) != 0 {
                output.set_high();
            } else if off_mask & (1 << pin) != 0 {
                output.set_low();
            }
        }
    }
}

impl Platform for BoardPlatform {
    fn current_time(&self) -> TimeVal {
        clock::counter(Instant::now().as_ticks())
    }

    fn set_output(&mut self, pin: u8, level: bool) {
        if let Some(output) = self.outputs.get_mut(usize::from(pin)) {
            output.set_level(Level::from(level));
        }
    }

    fn set_event_timer(&mut self, time: TimeVal) {
        self.event_timer = Some(time);
        EVENT_TIMER.signal(Some(time));
    }

    fn event_timer(&self) -> Option<TimeVal> {
        self.event_timer
    }

    // The timer task consumes its own wakeup; there is no latched flag.
    fn clear_event_timer(&mut self) {}

    fn disable_event_timer(&mut self) {
        self.event_timer = None;
        EVENT_TIMER.signal(None);
    }

    fn current_output_buffer(&self) -> usize {
        OUTPUT_BUFFER.load(Ordering::Acquire)
    }
}
