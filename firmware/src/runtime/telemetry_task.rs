use embassy_time::{Duration, Ticker};

use super::with_controller;
use crate::telemetry::{self, TelemetryDrain};

#[embassy_executor::task]
pub async fn run() -> ! {
    let mut drain = TelemetryDrain::new();
    let mut ticker = Ticker::every(Duration::from_millis(100));
    loop {
        ticker.next().await;
        let Some(batch) =
            with_controller(|controller| drain.collect(controller.engine.telemetry()))
        else {
            continue;
        };
        if batch.skipped > 0 {
            defmt::warn!("telemetry: {} records overwritten", batch.skipped);
        }
        for record in &batch.records {
            telemetry::emit(record);
        }
    }
}
