use core::cell::RefCell;

use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, Mutex, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Level, Output, Pull, Speed};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::Instant;
use engine_core::config::{ConfigError, DecoderConfig, EngineConfig, OutputEventConfig};
use engine_core::engine::{Engine, EngineError, FixedCalculator};
use heapless::Vec;

use crate::clock;
use crate::hw::{BoardPlatform, OUTPUT_PINS};

mod capture_task;
mod playback_task;
mod telemetry_task;
mod timer_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

/// Engine state shared by the capture, timer and playback tasks.
pub(super) struct Controller {
    engine: Engine,
    platform: BoardPlatform,
    calculator: FixedCalculator,
}

static CONTROLLER: Mutex<RefCell<Option<Controller>>> = Mutex::new(RefCell::new(None));

/// Raised after anything that may have written the timeline.
pub(super) static TIMELINE_CHANGED: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Runs `f` on the controller inside a critical section.
pub(super) fn with_controller<R>(f: impl FnOnce(&mut Controller) -> R) -> Option<R> {
    critical_section::with(|cs| CONTROLLER.borrow_ref_mut(cs).as_mut().map(f))
}

/// Logs recoverable engine errors. A buffer overrun means outputs can no
/// longer be trusted and halts.
pub(super) fn report(error: EngineError) {
    match error {
        EngineError::Timeline(overrun) => defmt::panic!("engine: {}", overrun),
        other => defmt::warn!("engine: {}", other),
    }
}

/// Four cylinders on a TFI pickup: coils on outputs 0-3, injectors on 4-7.
fn engine_config() -> Result<EngineConfig, ConfigError> {
    let mut config = EngineConfig::new(DecoderConfig::ford_tfi());
    for (coil, angle) in (0_u8..).zip([0.0, 180.0, 360.0, 540.0]) {
        config.add_event(OutputEventConfig::ignition(angle, coil))?;
        config.add_event(OutputEventConfig::fuel(angle, coil + 4))?;
    }
    Ok(config)
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA0,
        PA1,
        EXTI0,
        EXTI1,
        PC0,
        PC1,
        PC2,
        PC3,
        PC4,
        PC5,
        PC6,
        PC7,
        ..
    } = hal::init(config);

    let mut outputs: Vec<Output<'static>, OUTPUT_PINS> = Vec::new();
    for output in [
        Output::new(PC0, Level::Low, Speed::VeryHigh),
        Output::new(PC1, Level::Low, Speed::VeryHigh),
        Output::new(PC2, Level::Low, Speed::VeryHigh),
        Output::new(PC3, Level::Low, Speed::VeryHigh),
        Output::new(PC4, Level::Low, Speed::VeryHigh),
        Output::new(PC5, Level::Low, Speed::VeryHigh),
        Output::new(PC6, Level::Low, Speed::VeryHigh),
        Output::new(PC7, Level::Low, Speed::VeryHigh),
    ] {
        if outputs.push(output).is_err() {
            defmt::panic!("more output pins than OUTPUT_PINS");
        }
    }

    let engine_config = match engine_config() {
        Ok(config) => config,
        Err(error) => defmt::panic!("engine config: {}", error),
    };
    let start = clock::counter(Instant::now().as_ticks());
    let engine = match Engine::new(engine_config, start) {
        Ok(engine) => engine,
        Err(error) => defmt::panic!("engine config: {}", error),
    };

    critical_section::with(|cs| {
        CONTROLLER.borrow_ref_mut(cs).replace(Controller {
            engine,
            platform: BoardPlatform::new(outputs),
            calculator: FixedCalculator::new(10.0, 3000, 4000),
        });
    });
    defmt::info!("engine: ready, timeline starts at {}", start);

    let trigger = ExtiInput::new(PA0, EXTI0, Pull::None);
    let sync = ExtiInput::new(PA1, EXTI1, Pull::None);

    spawner
        .spawn(playback_task::run())
        .expect("failed to spawn playback task");
    spawner
        .spawn(timer_task::run())
        .expect("failed to spawn event timer task");
    spawner
        .spawn(capture_task::run(trigger, sync))
        .expect("failed to spawn capture task");
    spawner
        .spawn(telemetry_task::run())
        .expect("failed to spawn telemetry task");

    core::future::pending::<()>().await;
}
