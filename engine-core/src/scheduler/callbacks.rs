//! One-shot timed callbacks kept in time order.
//!
//! The earliest callback always owns the platform event timer. Callback
//! identity is the [`CallbackAction`], so rescheduling an action moves it
//! rather than adding a second copy.

use core::fmt;

use heapless::Vec;

use crate::platform::Platform;
use crate::time::{TimeVal, time_before};

/// Capacity of the callback list.
pub const MAX_CALLBACKS: usize = 32;

/// Work performed when a callback comes due.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CallbackAction {
    /// Decoder watchdog deadline.
    DecoderExpired,
    /// Reschedule the output event at this index.
    RescheduleEvent(usize),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimedCallback {
    pub action: CallbackAction,
    pub time: TimeVal,
}

/// The callback list is full.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CallbackError {
    Full,
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackError::Full => write!(f, "callback list full ({MAX_CALLBACKS} entries)"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CallbackList {
    entries: Vec<TimedCallback, MAX_CALLBACKS>,
}

impl CallbackList {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Callbacks in firing order.
    pub fn iter(&self) -> impl Iterator<Item = &TimedCallback> {
        self.entries.iter()
    }

    /// Scheduled time of `action`, if it is in the list.
    #[must_use]
    pub fn scheduled_time(&self, action: CallbackAction) -> Option<TimeVal> {
        self.entries
            .iter()
            .find(|entry| entry.action == action)
            .map(|entry| entry.time)
    }

    /// Schedules `action` at `time`, replacing any earlier schedule of it.
    ///
    /// Returns `true` if the earliest callback is already overdue; the caller
    /// should drain with [`CallbackList::pop_due`] instead of waiting for a
    /// timer interrupt that may never come.
    ///
    /// # Errors
    ///
    /// [`CallbackError::Full`] when the list has no room for a new action.
    pub fn schedule<P: Platform + ?Sized>(
        &mut self,
        platform: &mut P,
        action: CallbackAction,
        time: TimeVal,
    ) -> Result<bool, CallbackError> {
        critical_section::with(|_| {
            if let Some(index) = self.position(action) {
                self.entries.remove(index);
            } else if self.entries.is_full() {
                return Err(CallbackError::Full);
            }

            let index = self
                .entries
                .iter()
                .position(|entry| time_before(time, entry.time))
                .unwrap_or(self.entries.len());
            self.entries
                .insert(index, TimedCallback { action, time })
                .map_err(|_| CallbackError::Full)?;

            Ok(self.rearm(platform))
        })
    }

    /// Removes `action` if scheduled. Returns whether it was present.
    pub fn remove<P: Platform + ?Sized>(&mut self, platform: &mut P, action: CallbackAction) -> bool {
        critical_section::with(|_| {
            let Some(index) = self.position(action) else {
                return false;
            };
            self.entries.remove(index);
            if self.entries.is_empty() {
                platform.disable_event_timer();
            } else {
                self.rearm(platform);
            }
            true
        })
    }

    /// Pops the earliest callback if its time has passed, re-arming the
    /// event timer for the next one or disabling it when none remain.
    pub fn pop_due<P: Platform + ?Sized>(&mut self, platform: &mut P) -> Option<CallbackAction> {
        critical_section::with(|_| {
            let first = self.entries.first()?;
            if !time_before(first.time, platform.current_time()) {
                return None;
            }
            platform.clear_event_timer();
            let due = self.entries.remove(0);
            match self.entries.first() {
                Some(next) => platform.set_event_timer(next.time),
                None => platform.disable_event_timer(),
            }
            Some(due.action)
        })
    }

    fn position(&self, action: CallbackAction) -> Option<usize> {
        self.entries.iter().position(|entry| entry.action == action)
    }

    /// Points the event timer at the head. Returns `true` if the head is overdue.
    fn rearm<P: Platform + ?Sized>(&self, platform: &mut P) -> bool {
        let Some(first) = self.entries.first() else {
            return false;
        };
        if platform.event_timer() != Some(first.time) {
            platform.set_event_timer(first.time);
        }
        time_before(first.time, platform.current_time())
    }
}
