//! Static engine configuration consumed by the decoder and scheduler.
//!
//! Configuration is plain data owned by the [`crate::engine::Engine`]
//! aggregate. Capacities are compile-time constants so every container in the
//! real-time path has a fixed footprint.

use core::fmt;

use heapless::Vec;

use crate::time::Degrees;

/// Largest supported tooth count per engine cycle.
pub const MAX_TRIGGERS: usize = 36;

/// Largest number of configured output events.
pub const MAX_EVENTS: usize = 16;

/// Degrees a wheel's teeth may fall short of or overshoot one revolution.
const WHEEL_GEOMETRY_TOLERANCE: Degrees = 0.01;

/// Number of output pins addressable by a timeline slot mask.
pub const MAX_OUTPUT_PINS: u8 = 32;

/// Trigger wheel decoding strategy.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecoderKind {
    /// Fixed low resolution distributor pickup. Every edge is a trigger and
    /// position is inferred from the trigger stream alone.
    TfiPip,
    /// Evenly spaced crank teeth plus one cam pulse per engine cycle.
    CamNPlusOne,
    /// Wheel with one tooth missing. The gap marks angle zero once per
    /// wheel revolution, which spans the whole cycle.
    MissingTooth,
    /// Crank wheel with one tooth missing plus a cam pulse that picks the
    /// half of the 720 degree cycle.
    MissingToothCamSync,
}

impl DecoderKind {
    /// The wheel has a gap where one tooth is left out.
    #[must_use]
    pub const fn has_missing_tooth(self) -> bool {
        matches!(self, DecoderKind::MissingTooth | DecoderKind::MissingToothCamSync)
    }

    /// The decoder expects edges on the sync input.
    #[must_use]
    pub const fn has_cam_sync(self) -> bool {
        matches!(self, DecoderKind::CamNPlusOne | DecoderKind::MissingToothCamSync)
    }

    /// Wheel revolutions per engine cycle.
    #[must_use]
    pub const fn revolutions_per_cycle(self) -> u32 {
        match self {
            DecoderKind::MissingToothCamSync => 2,
            _ => 1,
        }
    }
}

/// Trigger wheel geometry and tolerances.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DecoderConfig {
    pub kind: DecoderKind,
    /// Tooth positions per wheel revolution, counting a missing tooth.
    pub num_triggers: u32,
    pub degrees_per_trigger: Degrees,
    /// Number of intervals averaged into the smoothed RPM.
    pub rpm_window_size: u32,
    /// Consecutive triggers required before RPM is trusted.
    pub required_triggers_rpm: u32,
    /// Largest tolerated fractional deviation of a tooth from the smoothed RPM.
    pub trigger_max_rpm_change: f32,
    /// Tooth RPM at or below which the signal is considered invalid.
    pub trigger_min_rpm: u32,
    /// Crank angle of the sync tooth relative to TDC.
    pub offset: Degrees,
    /// Length of one engine cycle, 360 or 720 degrees.
    pub cycle_degrees: Degrees,
}

impl DecoderConfig {
    /// Ford TFI distributor pickup: eight edges per cycle, 90 degrees apart.
    #[must_use]
    pub const fn ford_tfi() -> Self {
        Self {
            kind: DecoderKind::TfiPip,
            num_triggers: 8,
            degrees_per_trigger: 90.0,
            rpm_window_size: 8,
            required_triggers_rpm: 4,
            trigger_max_rpm_change: 0.5,
            trigger_min_rpm: 80,
            offset: 45.0,
            cycle_degrees: 720.0,
        }
    }

    /// Evenly spaced crank wheel with `teeth` edges per cycle and a cam sync pulse.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cam_nplusone(teeth: u32) -> Self {
        let teeth = teeth.max(1);
        Self {
            kind: DecoderKind::CamNPlusOne,
            num_triggers: teeth,
            degrees_per_trigger: 720.0 / teeth as f32,
            rpm_window_size: teeth.min(8),
            required_triggers_rpm: 4,
            trigger_max_rpm_change: 0.4,
            trigger_min_rpm: 80,
            offset: 0.0,
            cycle_degrees: 720.0,
        }
    }

    /// Crank wheel with `teeth` positions, one of them missing, and no cam
    /// input. One revolution is the whole 360 degree cycle.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn missing_tooth(teeth: u32) -> Self {
        let teeth = teeth.max(3);
        Self {
            kind: DecoderKind::MissingTooth,
            num_triggers: teeth,
            degrees_per_trigger: 360.0 / teeth as f32,
            rpm_window_size: 8,
            required_triggers_rpm: 4,
            trigger_max_rpm_change: 0.4,
            trigger_min_rpm: 80,
            offset: 0.0,
            cycle_degrees: 360.0,
        }
    }

    /// Crank wheel with `teeth` positions, one of them missing, plus a cam
    /// pulse once per 720 degree cycle.
    #[must_use]
    pub fn missing_tooth_cam(teeth: u32) -> Self {
        Self {
            kind: DecoderKind::MissingToothCamSync,
            cycle_degrees: 720.0,
            ..Self::missing_tooth(teeth)
        }
    }

    /// Checks geometry and tolerances against the decoder's fixed capacities.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::float_cmp
    )]
    pub fn validate(&self) -> Result<(), ConfigError> {
        let max_triggers = MAX_TRIGGERS as u32;
        if !(1.0..=90.0).contains(&self.degrees_per_trigger) {
            return Err(ConfigError::DegreesPerTrigger);
        }
        if !(0.0..=1.0).contains(&self.trigger_max_rpm_change) {
            return Err(ConfigError::MaxRpmChange);
        }
        if self.required_triggers_rpm < 2 || self.required_triggers_rpm > max_triggers {
            return Err(ConfigError::RequiredTriggers);
        }
        if self.num_triggers == 0 || self.num_triggers > max_triggers {
            return Err(ConfigError::TriggerCount);
        }
        if self.rpm_window_size == 0 || self.rpm_window_size > max_triggers {
            return Err(ConfigError::RpmWindow);
        }
        if self.cycle_degrees != 360.0 && self.cycle_degrees != 720.0 {
            return Err(ConfigError::CycleLength);
        }
        if !(0.0..self.cycle_degrees).contains(&self.offset) {
            return Err(ConfigError::Offset);
        }
        if self.kind.has_missing_tooth() && self.num_triggers < 3 {
            return Err(ConfigError::TriggerCount);
        }
        if self.kind == DecoderKind::MissingToothCamSync && self.cycle_degrees != 720.0 {
            return Err(ConfigError::CycleLength);
        }
        let revolution = self.cycle_degrees / self.kind.revolutions_per_cycle() as f32;
        let wheel = self.num_triggers as f32 * self.degrees_per_trigger;
        if (wheel - revolution).abs() > WHEEL_GEOMETRY_TOLERANCE {
            return Err(ConfigError::WheelGeometry);
        }
        Ok(())
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self::ford_tfi()
    }
}

/// What a scheduled output drives.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventKind {
    Ignition,
    Fuel,
}

/// One controlled output channel.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OutputEventConfig {
    pub kind: EventKind,
    /// Crank angle at which the output turns off (spark or end of injection).
    pub angle: Degrees,
    pub pin: u8,
    /// Output is active low.
    pub inverted: bool,
}

impl OutputEventConfig {
    #[must_use]
    pub const fn ignition(angle: Degrees, pin: u8) -> Self {
        Self {
            kind: EventKind::Ignition,
            angle,
            pin,
            inverted: false,
        }
    }

    #[must_use]
    pub const fn fuel(angle: Degrees, pin: u8) -> Self {
        Self {
            kind: EventKind::Fuel,
            angle,
            pin,
            inverted: false,
        }
    }

    /// Marks the output as active low.
    #[must_use]
    pub const fn inverted(mut self) -> Self {
        self.inverted = true;
        self
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IgnitionConfig {
    /// Minimum dead time between consecutive sparks on one channel.
    pub min_fire_time_us: u32,
}

impl Default for IgnitionConfig {
    fn default() -> Self {
        Self {
            min_fire_time_us: 500,
        }
    }
}

/// Complete static configuration for one engine.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub decoder: DecoderConfig,
    pub events: Vec<OutputEventConfig, MAX_EVENTS>,
    pub ignition: IgnitionConfig,
    /// RPM at which the ignition cut engages.
    pub rpm_stop: u32,
    /// RPM below which an engaged ignition cut releases.
    pub rpm_start: u32,
}

impl EngineConfig {
    /// Creates a configuration with no output events.
    #[must_use]
    pub fn new(decoder: DecoderConfig) -> Self {
        Self {
            decoder,
            events: Vec::new(),
            ignition: IgnitionConfig::default(),
            rpm_stop: 6500,
            rpm_start: 6200,
        }
    }

    /// Appends an output event.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::TooManyEvents`] once [`MAX_EVENTS`] are configured.
    pub fn add_event(&mut self, event: OutputEventConfig) -> Result<(), ConfigError> {
        self.events
            .push(event)
            .map_err(|_| ConfigError::TooManyEvents)
    }

    /// Builder form of [`EngineConfig::add_event`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::TooManyEvents`] once [`MAX_EVENTS`] are configured.
    pub fn with_event(mut self, event: OutputEventConfig) -> Result<Self, ConfigError> {
        self.add_event(event)?;
        Ok(self)
    }

    /// Validates the decoder geometry, every output event, and the limiter.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.decoder.validate()?;
        for event in &self.events {
            if event.pin >= MAX_OUTPUT_PINS {
                return Err(ConfigError::PinOutOfRange { pin: event.pin });
            }
            if !(0.0..self.decoder.cycle_degrees).contains(&event.angle) {
                return Err(ConfigError::AngleOutOfRange);
            }
        }
        if self.rpm_start > self.rpm_stop {
            return Err(ConfigError::RpmLimiter);
        }
        Ok(())
    }
}

/// Reasons a configuration is rejected.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    DegreesPerTrigger,
    MaxRpmChange,
    RequiredTriggers,
    TriggerCount,
    RpmWindow,
    CycleLength,
    Offset,
    /// Teeth times degrees per tooth does not span one wheel revolution.
    WheelGeometry,
    TooManyEvents,
    PinOutOfRange { pin: u8 },
    AngleOutOfRange,
    RpmLimiter,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::DegreesPerTrigger => f.write_str("degrees per trigger outside 1..=90"),
            ConfigError::MaxRpmChange => f.write_str("max rpm change outside 0..=1"),
            ConfigError::RequiredTriggers => {
                write!(f, "required triggers outside 2..={MAX_TRIGGERS}")
            }
            ConfigError::TriggerCount => write!(f, "trigger count outside 1..={MAX_TRIGGERS}"),
            ConfigError::RpmWindow => write!(f, "rpm window outside 1..={MAX_TRIGGERS}"),
            ConfigError::CycleLength => f.write_str("cycle length must be 360 or 720"),
            ConfigError::Offset => f.write_str("offset outside the engine cycle"),
            ConfigError::WheelGeometry => {
                f.write_str("trigger count and spacing do not cover one wheel revolution")
            }
            ConfigError::TooManyEvents => write!(f, "more than {MAX_EVENTS} output events"),
            ConfigError::PinOutOfRange { pin } => write!(f, "output pin {pin} out of range"),
            ConfigError::AngleOutOfRange => f.write_str("event angle outside the engine cycle"),
            ConfigError::RpmLimiter => f.write_str("rpm_start above rpm_stop"),
        }
    }
}
