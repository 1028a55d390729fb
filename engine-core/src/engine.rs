//! Engine update driver.
//!
//! [`Engine`] owns every piece of mutable engine state: configuration,
//! decoder, scheduler, the latest calculated values and telemetry. The MCU
//! layer calls into it from exactly three places: a captured edge, a buffer
//! swap, and the event timer. Hardware is reached through [`Platform`], fuel
//! and ignition quantities through [`Calculator`].

use core::fmt;

use crate::config::{ConfigError, EngineConfig, EventKind};
use crate::decoder::{
    DecodeOutcome, Decoder, DecoderState, EnginePosition, PendingEdges, TriggerEvent,
};
use crate::platform::Platform;
use crate::scheduler::{CallbackAction, CallbackError, Scheduler, TimelineError};
use crate::telemetry::{EngineEventKind, TelemetryLog};
use crate::time::{Degrees, TimeVal};

/// Outputs of the fuel and ignition calculations.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalculatedValues {
    /// Spark advance before the event angle.
    pub timing_advance: Degrees,
    pub dwell_us: u32,
    /// Injector pulse width.
    pub fueling_us: u32,
}

/// Source of advance, dwell and pulse width for the current position.
pub trait Calculator {
    fn calculate(&mut self, position: &EnginePosition) -> CalculatedValues;
}

/// Returns the same values for every position.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct FixedCalculator {
    pub values: CalculatedValues,
}

impl FixedCalculator {
    #[must_use]
    pub const fn new(timing_advance: Degrees, dwell_us: u32, fueling_us: u32) -> Self {
        Self {
            values: CalculatedValues {
                timing_advance,
                dwell_us,
                fueling_us,
            },
        }
    }
}

impl Calculator for FixedCalculator {
    fn calculate(&mut self, _position: &EnginePosition) -> CalculatedValues {
        self.values
    }
}

/// Failures surfaced by the driver entry points.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EngineError {
    /// Fatal: software and hardware disagree about the live output buffer.
    Timeline(TimelineError),
    Callback(CallbackError),
    Config(ConfigError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Timeline(error) => write!(f, "timeline: {error}"),
            EngineError::Callback(error) => write!(f, "callbacks: {error}"),
            EngineError::Config(error) => write!(f, "config: {error}"),
        }
    }
}

impl From<TimelineError> for EngineError {
    fn from(error: TimelineError) -> Self {
        EngineError::Timeline(error)
    }
}

impl From<CallbackError> for EngineError {
    fn from(error: CallbackError) -> Self {
        EngineError::Callback(error)
    }
}

impl From<ConfigError> for EngineError {
    fn from(error: ConfigError) -> Self {
        EngineError::Config(error)
    }
}

/// All engine state, passed by reference into every entry point.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    decoder: Decoder,
    scheduler: Scheduler,
    calculated: CalculatedValues,
    ignition_cut: bool,
    telemetry: TelemetryLog,
}

impl Engine {
    /// Builds the engine with its live output buffer starting at `timeline_start`.
    ///
    /// # Errors
    ///
    /// Returns the first configuration constraint violated.
    pub fn new(config: EngineConfig, timeline_start: TimeVal) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            decoder: Decoder::new(config.decoder),
            scheduler: Scheduler::new(&config.events, timeline_start),
            config,
            calculated: CalculatedValues::default(),
            ignition_cut: false,
            telemetry: TelemetryLog::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn position(&self) -> EnginePosition {
        self.decoder.position()
    }

    #[must_use]
    pub fn calculated(&self) -> CalculatedValues {
        self.calculated
    }

    #[must_use]
    pub fn ignition_cut(&self) -> bool {
        self.ignition_cut
    }

    #[must_use]
    pub fn telemetry(&self) -> &TelemetryLog {
        &self.telemetry
    }

    /// Capture interrupt path: decodes one edge and reschedules outputs.
    ///
    /// # Errors
    ///
    /// [`EngineError::Callback`] if a callback could not be queued.
    pub fn on_trigger<P, C>(
        &mut self,
        platform: &mut P,
        calculator: &mut C,
        event: TriggerEvent,
    ) -> Result<DecodeOutcome, EngineError>
    where
        P: Platform + ?Sized,
        C: Calculator + ?Sized,
    {
        let outcome = critical_section::with(|_| self.decoder.decode(event));
        self.after_decode(platform, calculator, outcome)?;
        Ok(outcome)
    }

    /// Polled capture path: decodes whatever edges are latched.
    ///
    /// # Errors
    ///
    /// [`EngineError::Callback`] if a callback could not be queued.
    pub fn on_pending_edges<P, C>(
        &mut self,
        platform: &mut P,
        calculator: &mut C,
        edges: PendingEdges,
    ) -> Result<DecodeOutcome, EngineError>
    where
        P: Platform + ?Sized,
        C: Calculator + ?Sized,
    {
        let now = platform.current_time();
        let outcome = critical_section::with(|_| self.decoder.decode_pending(edges, now));
        self.after_decode(platform, calculator, outcome)?;
        Ok(outcome)
    }

    /// Buffer swap interrupt path.
    ///
    /// # Errors
    ///
    /// [`EngineError::Timeline`] on a buffer ownership overrun. The caller
    /// must treat this as fatal.
    pub fn on_buffer_swap<P: Platform + ?Sized>(&mut self, platform: &mut P) -> Result<(), EngineError> {
        self.scheduler
            .buffer_swap(platform.current_output_buffer())
            .map_err(EngineError::from)
    }

    /// Event timer interrupt path: runs every callback that has come due.
    ///
    /// # Errors
    ///
    /// [`EngineError::Callback`] if a rescheduled event could not queue its
    /// follow-up callback.
    pub fn on_event_timer<P, C>(&mut self, platform: &mut P, calculator: &mut C) -> Result<(), EngineError>
    where
        P: Platform + ?Sized,
        C: Calculator + ?Sized,
    {
        self.run_due_callbacks(platform, calculator)
    }

    /// Emergency stop: cancels every scheduled output. Active pulses still end.
    pub fn shutdown<P: Platform + ?Sized>(&mut self, platform: &mut P) {
        let now = platform.current_time();
        self.invalidate(platform, now);
        self.record_races(now);
    }

    fn after_decode<P, C>(
        &mut self,
        platform: &mut P,
        calculator: &mut C,
        outcome: DecodeOutcome,
    ) -> Result<(), EngineError>
    where
        P: Platform + ?Sized,
        C: Calculator + ?Sized,
    {
        let now = platform.current_time();
        match outcome {
            DecodeOutcome::LostSync(reason) => {
                self.telemetry.record(now, EngineEventKind::SyncLost(reason));
                self.invalidate(platform, now);
            }
            DecodeOutcome::GainedSync => {
                self.telemetry.record(now, EngineEventKind::SyncGained);
            }
            DecodeOutcome::Unchanged => {}
        }

        if self.decoder.state() == DecoderState::NoSync {
            self.scheduler
                .callbacks_mut()
                .remove(platform, CallbackAction::DecoderExpired);
        } else {
            let deadline = self.decoder.position().valid_until;
            self.queue_callback(platform, CallbackAction::DecoderExpired, deadline, now)?;
        }

        let position = self.decoder.position();
        if position.has_position {
            self.calculated = calculator.calculate(&position);
            self.update_limiter(platform, position.rpm, now);
            for index in 0..self.scheduler.events().len() {
                self.schedule_event(platform, index, &position, now)?;
            }
        }
        self.record_races(now);

        self.run_due_callbacks(platform, calculator)
    }

    fn run_due_callbacks<P, C>(&mut self, platform: &mut P, calculator: &mut C) -> Result<(), EngineError>
    where
        P: Platform + ?Sized,
        C: Calculator + ?Sized,
    {
        while let Some(action) = self.scheduler.callbacks_mut().pop_due(platform) {
            let now = platform.current_time();
            match action {
                CallbackAction::DecoderExpired => {
                    let outcome = critical_section::with(|_| self.decoder.expire(now));
                    if let DecodeOutcome::LostSync(reason) = outcome {
                        self.telemetry.record(now, EngineEventKind::SyncLost(reason));
                        self.invalidate(platform, now);
                    }
                }
                CallbackAction::RescheduleEvent(index) => {
                    let position = self.decoder.position();
                    if position.has_position {
                        self.calculated = calculator.calculate(&position);
                        self.schedule_event(platform, index, &position, now)?;
                    }
                }
            }
            self.record_races(now);
        }
        Ok(())
    }

    fn schedule_event<P: Platform + ?Sized>(
        &mut self,
        platform: &mut P,
        index: usize,
        position: &EnginePosition,
        now: TimeVal,
    ) -> Result<(), EngineError> {
        let Some(kind) = self.scheduler.event(index).map(|event| event.kind) else {
            return Ok(());
        };
        match kind {
            EventKind::Ignition if self.ignition_cut => {
                self.scheduler.deschedule_event(platform, index);
            }
            EventKind::Ignition => {
                self.scheduler.schedule_ignition_event(
                    platform,
                    index,
                    position,
                    self.calculated.timing_advance,
                    self.calculated.dwell_us,
                    self.config.ignition.min_fire_time_us,
                );
            }
            EventKind::Fuel => {
                if let Err(error) = self.scheduler.schedule_fuel_event(
                    platform,
                    index,
                    position,
                    self.calculated.fueling_us,
                ) {
                    self.telemetry.record(now, EngineEventKind::CallbackOverflow);
                    return Err(error.into());
                }
            }
        }
        Ok(())
    }

    fn update_limiter<P: Platform + ?Sized>(&mut self, platform: &mut P, rpm: u32, now: TimeVal) {
        if !self.ignition_cut && rpm >= self.config.rpm_stop {
            self.ignition_cut = true;
            self.telemetry.record(now, EngineEventKind::IgnitionCut);
            self.invalidate(platform, now);
        } else if self.ignition_cut && rpm < self.config.rpm_start {
            self.ignition_cut = false;
            self.telemetry.record(now, EngineEventKind::IgnitionRestored);
        }
    }

    fn queue_callback<P: Platform + ?Sized>(
        &mut self,
        platform: &mut P,
        action: CallbackAction,
        time: TimeVal,
        now: TimeVal,
    ) -> Result<(), EngineError> {
        match self.scheduler.callbacks_mut().schedule(platform, action, time) {
            Ok(_) => Ok(()),
            Err(error) => {
                self.telemetry.record(now, EngineEventKind::CallbackOverflow);
                Err(error.into())
            }
        }
    }

    fn invalidate<P: Platform + ?Sized>(&mut self, platform: &mut P, now: TimeVal) {
        self.scheduler.invalidate_scheduled_events(platform);
        self.telemetry.record(now, EngineEventKind::EventsInvalidated);
    }

    fn record_races(&mut self, now: TimeVal) {
        for pin in self.scheduler.drain_races() {
            self.telemetry.record(now, EngineEventKind::OutputRace(pin));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DecoderConfig, OutputEventConfig};
    use crate::platform::SimPlatform;

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = EngineConfig::new(DecoderConfig::ford_tfi());
        config.rpm_start = config.rpm_stop + 1;
        assert_eq!(Engine::new(config, 0).err(), Some(ConfigError::RpmLimiter));
    }

    #[test]
    fn watchdog_is_armed_once_rpm_is_known() {
        let config = EngineConfig::new(DecoderConfig::ford_tfi())
            .with_event(OutputEventConfig::ignition(0.0, 0))
            .expect("room for one event");
        let mut engine = Engine::new(config, 0).expect("valid config");
        let mut platform = SimPlatform::new(0);
        let mut calculator = FixedCalculator::new(10.0, 2000, 0);

        let mut time = 0;
        for _ in 0..4 {
            time += 20_000;
            platform.set_time(time);
            engine
                .on_trigger(&mut platform, &mut calculator, TriggerEvent::trigger(time))
                .expect("callbacks fit");
        }
        assert_eq!(
            engine
                .scheduler()
                .callbacks()
                .scheduled_time(CallbackAction::DecoderExpired),
            Some(time + 30_000)
        );
        assert_eq!(platform.event_timer(), Some(time + 30_000));
    }

    #[test]
    fn overrun_surfaces_as_timeline_error() {
        let config = EngineConfig::new(DecoderConfig::ford_tfi());
        let mut engine = Engine::new(config, 0).expect("valid config");
        let mut platform = SimPlatform::new(0);
        assert!(matches!(
            engine.on_buffer_swap(&mut platform),
            Err(EngineError::Timeline(TimelineError::OwnershipOverrun { .. }))
        ));
    }
}
