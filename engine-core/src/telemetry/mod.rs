//! Diagnostics event catalog and the in-memory telemetry ring.
//!
//! The real-time paths never log. They record compact events here, and the
//! firmware or emulator drains and prints them outside interrupt context.
//! Events encode to `u16` codes so they can travel over narrow diagnostics
//! channels.

use core::fmt;

use heapless::HistoryBuf;

use crate::decoder::LossReason;
use crate::time::TimeVal;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Sequence number assigned to each telemetry record.
pub type EventId = u32;

/// Discriminated engine events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EngineEventKind {
    SyncGained,
    SyncLost(LossReason),
    /// Every scheduled output was cancelled.
    EventsInvalidated,
    /// A timeline write raced the hardware and the pin was driven in software.
    OutputRace(u8),
    CallbackOverflow,
    /// Ignition cut engaged by the RPM limiter.
    IgnitionCut,
    /// Ignition cut released.
    IgnitionRestored,
    /// A raw code this build does not know. Only produced by
    /// [`EngineEventKind::from_raw`].
    Unknown(u16),
}

impl fmt::Display for EngineEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineEventKind::SyncGained => f.write_str("sync-gained"),
            EngineEventKind::SyncLost(reason) => write!(f, "sync-lost {reason}"),
            EngineEventKind::EventsInvalidated => f.write_str("events-invalidated"),
            EngineEventKind::OutputRace(pin) => write!(f, "output-race pin {pin}"),
            EngineEventKind::CallbackOverflow => f.write_str("callback-overflow"),
            EngineEventKind::IgnitionCut => f.write_str("ignition-cut"),
            EngineEventKind::IgnitionRestored => f.write_str("ignition-restored"),
            EngineEventKind::Unknown(code) => write!(f, "unknown({code:#06x})"),
        }
    }
}

impl EngineEventKind {
    const SYNC_GAINED_CODE: u16 = 0x0001;
    const EVENTS_INVALIDATED_CODE: u16 = 0x0002;
    const CALLBACK_OVERFLOW_CODE: u16 = 0x0003;
    const IGNITION_CUT_CODE: u16 = 0x0004;
    const IGNITION_RESTORED_CODE: u16 = 0x0005;
    const SYNC_LOST_BASE: u16 = 0x0010;
    const OUTPUT_RACE_BASE: u16 = 0x0100;
    const OUTPUT_RACE_END: u16 = 0x0120;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn to_raw(self) -> u16 {
        match self {
            EngineEventKind::SyncGained => Self::SYNC_GAINED_CODE,
            EngineEventKind::SyncLost(reason) => Self::SYNC_LOST_BASE + reason.to_raw() as u16,
            EngineEventKind::EventsInvalidated => Self::EVENTS_INVALIDATED_CODE,
            EngineEventKind::OutputRace(pin) => Self::OUTPUT_RACE_BASE + pin as u16,
            EngineEventKind::CallbackOverflow => Self::CALLBACK_OVERFLOW_CODE,
            EngineEventKind::IgnitionCut => Self::IGNITION_CUT_CODE,
            EngineEventKind::IgnitionRestored => Self::IGNITION_RESTORED_CODE,
            EngineEventKind::Unknown(code) => code,
        }
    }

    /// Decodes a raw discriminant into an event, falling back to [`EngineEventKind::Unknown`].
    #[must_use]
    pub fn from_raw(code: u16) -> Self {
        match code {
            Self::SYNC_GAINED_CODE => EngineEventKind::SyncGained,
            Self::EVENTS_INVALIDATED_CODE => EngineEventKind::EventsInvalidated,
            Self::CALLBACK_OVERFLOW_CODE => EngineEventKind::CallbackOverflow,
            Self::IGNITION_CUT_CODE => EngineEventKind::IgnitionCut,
            Self::IGNITION_RESTORED_CODE => EngineEventKind::IgnitionRestored,
            value if (Self::SYNC_LOST_BASE..Self::OUTPUT_RACE_BASE).contains(&value) => {
                u8::try_from(value - Self::SYNC_LOST_BASE)
                    .ok()
                    .and_then(LossReason::from_raw)
                    .map_or(EngineEventKind::Unknown(value), EngineEventKind::SyncLost)
            }
            value if (Self::OUTPUT_RACE_BASE..Self::OUTPUT_RACE_END).contains(&value) => {
                u8::try_from(value - Self::OUTPUT_RACE_BASE)
                    .map_or(EngineEventKind::Unknown(value), EngineEventKind::OutputRace)
            }
            other => EngineEventKind::Unknown(other),
        }
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TelemetryRecord {
    pub id: EventId,
    pub time: TimeVal,
    pub event: EngineEventKind,
}

/// Records engine events into a fixed-size ring, overwriting the oldest.
#[derive(Clone, Debug)]
pub struct TelemetryLog<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: HistoryBuf<TelemetryRecord, CAPACITY>,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> TelemetryLog<CAPACITY> {
    /// Creates a new log with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Records an event and returns its sequence number.
    pub fn record(&mut self, time: TimeVal, event: EngineEventKind) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);
        self.ring.write(TelemetryRecord { id, time, event });
        id
    }

    /// Recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> impl Iterator<Item = &TelemetryRecord> {
        self.ring.oldest_ordered()
    }

    /// Records with an id at or after `id`, oldest first.
    pub fn since(&self, id: EventId) -> impl Iterator<Item = &TelemetryRecord> {
        self.ring
            .oldest_ordered()
            .filter(move |record| record.id.wrapping_sub(id) < EventId::MAX / 2)
    }

    /// Returns the most recent record, if any.
    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    /// Id the next record will receive.
    #[must_use]
    pub fn next_id(&self) -> EventId {
        self.next_event_id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

impl<const CAPACITY: usize> Default for TelemetryLog<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}
