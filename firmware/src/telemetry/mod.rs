//! Mirrors engine telemetry to defmt (or stdout on the host).
//!
//! The engine only records into its ring. A low priority task collects new
//! records in a short critical section and logs them afterwards.

use engine_core::telemetry::{EventId, TelemetryLog, TelemetryRecord};
use heapless::Vec;

/// Records collected per drain pass.
pub const DRAIN_BATCH: usize = 16;

/// Records taken from the ring in one pass.
#[derive(Debug, Default)]
pub struct Batch {
    pub records: Vec<TelemetryRecord, DRAIN_BATCH>,
    /// Records overwritten in the ring before they could be collected.
    pub skipped: u32,
}

/// Cursor over the engine's telemetry ring.
#[derive(Debug, Default)]
pub struct TelemetryDrain {
    next_id: EventId,
}

impl TelemetryDrain {
    pub const fn new() -> Self {
        Self { next_id: 0 }
    }

    /// Copies out up to [`DRAIN_BATCH`] records not yet seen.
    pub fn collect<const N: usize>(&mut self, log: &TelemetryLog<N>) -> Batch {
        let mut batch = Batch::default();
        for record in log.since(self.next_id) {
            if batch.records.push(*record).is_err() {
                break;
            }
            batch.skipped += record.id.wrapping_sub(self.next_id);
            self.next_id = record.id.wrapping_add(1);
        }
        batch
    }
}

#[cfg(target_os = "none")]
pub fn emit(record: &TelemetryRecord) {
    defmt::info!(
        "telemetry:engine #{} t={} {}",
        record.id,
        record.time,
        record.event
    );
}

#[cfg(not(target_os = "none"))]
pub fn emit(record: &TelemetryRecord) {
    println!(
        "telemetry:engine #{} t={} {}",
        record.id, record.time, record.event
    );
}
