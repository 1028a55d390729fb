use embassy_futures::select::{Either, select};
use embassy_stm32::exti::ExtiInput;
use embassy_time::Instant;
use engine_core::decoder::{DecodeOutcome, TriggerEvent};
use engine_core::time::TimeVal;

use super::{TIMELINE_CHANGED, report, with_controller};
use crate::clock;

#[embassy_executor::task]
pub async fn run(mut trigger: ExtiInput<'static>, mut sync: ExtiInput<'static>) -> ! {
    loop {
        let edge = match select(trigger.wait_for_rising_edge(), sync.wait_for_rising_edge()).await
        {
            Either::First(()) => TriggerEvent::trigger(now()),
            Either::Second(()) => TriggerEvent::sync(now()),
        };

        let result = with_controller(|controller| {
            controller.engine.on_trigger(
                &mut controller.platform,
                &mut controller.calculator,
                edge,
            )
        });
        match result {
            Some(Ok(DecodeOutcome::GainedSync)) => defmt::info!("decoder: sync gained"),
            Some(Ok(DecodeOutcome::LostSync(reason))) => {
                defmt::warn!("decoder: sync lost ({})", reason);
            }
            Some(Ok(DecodeOutcome::Unchanged)) | None => {}
            Some(Err(error)) => report(error),
        }
        TIMELINE_CHANGED.signal(());
    }
}

fn now() -> TimeVal {
    clock::counter(Instant::now().as_ticks())
}
