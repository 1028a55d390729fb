use embassy_futures::select::{Either, select};
use embassy_time::{Instant, Timer};
use portable_atomic::Ordering;

use super::{TIMELINE_CHANGED, report, with_controller};
use crate::clock;
use crate::hw::OUTPUT_BUFFER;
use crate::playback::{Wake, next_wake};

/// Plays the live buffer slot by slot and swaps buffers at each window end.
#[embassy_executor::task]
pub async fn run() -> ! {
    let mut cursor = 0;
    loop {
        let wake = with_controller(|controller| {
            next_wake(controller.engine.scheduler().timeline().live(), cursor)
        });
        let Some(wake) = wake else {
            TIMELINE_CHANGED.wait().await;
            continue;
        };

        let at = Instant::from_ticks(clock::deadline(wake.time(), Instant::now().as_ticks()));
        if let Either::Second(()) = select(Timer::at(at), TIMELINE_CHANGED.wait()).await {
            // An earlier slot may have been written; rescan from the cursor.
            continue;
        }

        match wake {
            Wake::Slot { index, .. } => {
                with_controller(|controller| {
                    let timeline = controller.engine.scheduler().timeline();
                    if let Some(slot) = timeline.live().slot(index) {
                        let (on, off) = (slot.on_mask(), slot.off_mask());
                        controller.platform.apply_slot(on, off);
                    }
                });
                cursor = index + 1;
            }
            Wake::End(_) => {
                let next = 1 - OUTPUT_BUFFER.load(Ordering::Acquire);
                OUTPUT_BUFFER.store(next, Ordering::Release);
                let result = with_controller(|controller| {
                    controller.engine.on_buffer_swap(&mut controller.platform)
                });
                if let Some(Err(error)) = result {
                    report(error);
                }
                cursor = 0;
            }
        }
    }
}
