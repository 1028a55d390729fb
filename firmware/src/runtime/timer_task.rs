use embassy_futures::select::{Either, select};
use embassy_time::{Instant, Timer};
use engine_core::time::TimeVal;

use super::{TIMELINE_CHANGED, report, with_controller};
use crate::clock;
use crate::hw::EVENT_TIMER;

/// One-shot event timer. Every re-arm from the engine replaces the deadline.
#[embassy_executor::task]
pub async fn run() -> ! {
    let mut armed: Option<TimeVal> = None;
    loop {
        let Some(time) = armed else {
            armed = EVENT_TIMER.wait().await;
            continue;
        };

        let at = Instant::from_ticks(clock::deadline(time, Instant::now().as_ticks()));
        match select(Timer::at(at), EVENT_TIMER.wait()).await {
            Either::First(()) => {
                armed = None;
                let result = with_controller(|controller| {
                    controller
                        .engine
                        .on_event_timer(&mut controller.platform, &mut controller.calculator)
                });
                if let Some(Err(error)) = result {
                    report(error);
                }
                TIMELINE_CHANGED.signal(());
            }
            Either::Second(next) => armed = next,
        }
    }
}
