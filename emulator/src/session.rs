//! Hosted engine: the core running against [`SimPlatform`] one tick at a time.
//!
//! Each tick the session plays the live timeline slot into the simulated
//! output register, swaps buffers when the window ends, services the event
//! timer, and emits edges from a synthetic trigger wheel.

use engine_core::config::{ConfigError, DecoderConfig, EngineConfig, EventKind, OutputEventConfig};
use engine_core::decoder::{DecodeOutcome, TriggerEvent, TriggerKind};
use engine_core::engine::{Engine, EngineError, FixedCalculator};
use engine_core::platform::SimPlatform;
use engine_core::scheduler::ScheduleEntry;
use engine_core::telemetry::EventId;
use engine_core::time::{TICKRATE, TimeVal, time_from_rpm_diff};

use crate::commands::{self, Command};

/// Output transitions printed per `run` before the rest are summarised.
const MAX_REPORTED_TRANSITIONS: usize = 32;

const TICKS_PER_US: u32 = TICKRATE / 1_000_000;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("run", "run <n>[us|ms|s]     - advance simulated time"),
    ("rpm", "rpm <n>              - spin the synthetic wheel (0 stops it)"),
    ("trigger", "trigger              - inject one trigger edge now"),
    ("sync", "sync                 - inject one sync edge now"),
    ("advance", "advance <deg>        - set ignition advance"),
    ("dwell", "dwell <us>           - set coil dwell"),
    ("pw", "pw <us>              - set injector pulse width"),
    ("status", "status               - decoder and limiter state"),
    ("outputs", "outputs              - pin levels and scheduled events"),
    ("log", "log                  - telemetry since the last `log`"),
    ("help", "help [topic]         - show help for a command"),
];

/// Trigger wheel the session is built around.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WheelProfile {
    /// Ford TFI distributor, 8 edges per cycle.
    Tfi,
    /// 24 cam teeth plus one sync tooth.
    Cam24,
    /// 36-1 crank wheel plus a cam pulse every other revolution.
    Missing36,
}

impl WheelProfile {
    pub fn from_tag(tag: &str) -> Result<Self, String> {
        if tag.eq_ignore_ascii_case("tfi") {
            Ok(Self::Tfi)
        } else if tag.eq_ignore_ascii_case("cam24") {
            Ok(Self::Cam24)
        } else if tag.eq_ignore_ascii_case("36-1") {
            Ok(Self::Missing36)
        } else {
            Err(format!("Unknown wheel profile `{tag}`"))
        }
    }

    fn decoder(self) -> DecoderConfig {
        match self {
            WheelProfile::Tfi => DecoderConfig::ford_tfi(),
            WheelProfile::Cam24 => DecoderConfig::cam_nplusone(24),
            WheelProfile::Missing36 => DecoderConfig::missing_tooth_cam(36),
        }
    }
}

/// Four cylinders: coils on pins 0-3, injectors on pins 8-11.
fn engine_config(profile: WheelProfile) -> Result<EngineConfig, ConfigError> {
    let mut config = EngineConfig::new(profile.decoder());
    for (cylinder, angle) in [0.0, 180.0, 360.0, 540.0].into_iter().enumerate() {
        let pin = u8::try_from(cylinder).map_err(|_| ConfigError::TooManyEvents)?;
        config.add_event(OutputEventConfig::ignition(angle, pin))?;
        config.add_event(OutputEventConfig::fuel(angle, pin + 8))?;
    }
    Ok(config)
}

/// Edge generator for a wheel spinning at constant RPM.
#[derive(Debug)]
struct Wheel {
    teeth: u32,
    degrees_per_tooth: f32,
    cam_sync: bool,
    missing_tooth: bool,
    /// Tooth positions per engine cycle.
    positions: u32,
    rpm: u32,
    tooth: u32,
    next_tooth: Option<TimeVal>,
    next_sync: Option<TimeVal>,
}

impl Wheel {
    fn new(config: &DecoderConfig) -> Self {
        Self {
            teeth: config.num_triggers,
            degrees_per_tooth: config.degrees_per_trigger,
            cam_sync: config.kind.has_cam_sync(),
            missing_tooth: config.kind.has_missing_tooth(),
            positions: config.num_triggers * config.kind.revolutions_per_cycle(),
            rpm: 0,
            tooth: 0,
            next_tooth: None,
            next_sync: None,
        }
    }

    fn interval(&self) -> TimeVal {
        time_from_rpm_diff(self.rpm, self.degrees_per_tooth)
    }

    fn set_rpm(&mut self, rpm: u32, now: TimeVal) {
        self.rpm = rpm;
        self.next_sync = None;
        self.next_tooth = (rpm > 0).then(|| now.wrapping_add(self.interval()));
    }

    /// Edge due at exactly `now`, if any.
    fn edge_at(&mut self, now: TimeVal) -> Option<TriggerEvent> {
        if self.next_sync == Some(now) {
            self.next_sync = None;
            return Some(TriggerEvent::sync(now));
        }
        if self.next_tooth != Some(now) {
            return None;
        }
        let interval = self.interval();
        self.next_tooth = Some(now.wrapping_add(interval));
        self.tooth += 1;
        if self.tooth >= self.positions {
            self.tooth = 0;
            if self.cam_sync {
                self.next_sync = Some(now.wrapping_add(interval / 2));
            }
        }
        // The last position of each revolution is the gap.
        if self.missing_tooth && self.tooth % self.teeth == 0 {
            return None;
        }
        Some(TriggerEvent::trigger(now))
    }
}

pub struct Session {
    engine: Engine,
    platform: SimPlatform,
    calculator: FixedCalculator,
    wheel: Wheel,
    next_log_id: EventId,
}

impl Session {
    /// Builds a four cylinder engine on `profile` with the clock at zero.
    ///
    /// # Errors
    ///
    /// Returns the configuration error if the layout does not validate.
    pub fn new(profile: WheelProfile) -> Result<Self, ConfigError> {
        let config = engine_config(profile)?;
        let wheel = Wheel::new(&config.decoder);
        Ok(Self {
            engine: Engine::new(config, 0)?,
            platform: SimPlatform::new(0),
            calculator: FixedCalculator::new(10.0, 3000, 4000),
            wheel,
            next_log_id: 0,
        })
    }

    /// Runs one console line. Returns the response lines, or `None` on exit.
    pub fn handle_command(&mut self, line: &str) -> Option<Vec<String>> {
        let command = match commands::parse(line) {
            Ok(command) => command,
            Err(error) => return Some(vec![format!("ERR syntax {error}")]),
        };

        let lines = match command {
            Command::Exit => return None,
            Command::Run(us) => self.run(us),
            Command::Rpm(rpm) => {
                self.wheel.set_rpm(rpm, self.platform.peek_time());
                vec![format!("OK rpm={rpm}")]
            }
            Command::Trigger => {
                let now = self.platform.peek_time();
                self.inject(TriggerEvent::trigger(now))
            }
            Command::Sync => {
                let now = self.platform.peek_time();
                self.inject(TriggerEvent::sync(now))
            }
            Command::Advance(degrees) => {
                self.calculator.values.timing_advance = degrees;
                vec![format!("OK advance={degrees}")]
            }
            Command::Dwell(us) => {
                self.calculator.values.dwell_us = us;
                vec![format!("OK dwell={us}us")]
            }
            Command::PulseWidth(us) => {
                self.calculator.values.fueling_us = us;
                vec![format!("OK pw={us}us")]
            }
            Command::Status => self.status(),
            Command::Outputs => self.outputs(),
            Command::Log => self.log(),
            Command::Help(topic) => help(topic),
        };
        Some(lines)
    }

    fn run(&mut self, us: u64) -> Vec<String> {
        let ticks = us.saturating_mul(u64::from(TICKS_PER_US));
        let mut transitions = Vec::new();
        let mut dropped = 0_usize;

        for _ in 0..ticks {
            let before = self.platform.outputs();
            if let Err(error) = self.tick() {
                return vec![format!("FATAL {error}")];
            }
            let changed = before ^ self.platform.outputs();
            for pin in (0..32).filter(|pin| changed & (1 << pin) != 0) {
                if transitions.len() < MAX_REPORTED_TRANSITIONS {
                    let level = if self.platform.output_level(pin) { "high" } else { "low" };
                    transitions.push(format!(
                        "  t={}us pin {pin} {level}",
                        ticks_to_us(self.platform.peek_time())
                    ));
                } else {
                    dropped += 1;
                }
            }
        }

        let mut lines = transitions;
        if dropped > 0 {
            lines.push(format!("  ... {dropped} more transitions"));
        }
        lines.extend(self.log());
        lines.push(format!(
            "OK ran {us}us now={}us",
            ticks_to_us(self.platform.peek_time())
        ));
        lines
    }

    fn tick(&mut self) -> Result<(), EngineError> {
        let next = self.platform.peek_time().wrapping_add(1);
        self.platform.set_time(next);

        let timeline = self.engine.scheduler().timeline();
        let live = timeline.live();
        if let Some(slot) = live.slot_at(next) {
            let (on, off) = (slot.on_mask(), slot.off_mask());
            self.platform.apply_slot(on, off);
        }
        if next == live.end() {
            self.platform.set_output_buffer(1 - timeline.live_index());
            self.engine.on_buffer_swap(&mut self.platform)?;
        }

        if self.platform.event_timer_due() {
            self.engine
                .on_event_timer(&mut self.platform, &mut self.calculator)?;
        }
        if let Some(edge) = self.wheel.edge_at(next) {
            self.engine
                .on_trigger(&mut self.platform, &mut self.calculator, edge)?;
        }
        Ok(())
    }

    fn inject(&mut self, edge: TriggerEvent) -> Vec<String> {
        match self
            .engine
            .on_trigger(&mut self.platform, &mut self.calculator, edge)
        {
            Ok(outcome) => vec![format!(
                "OK {} decoder={} {}",
                edge_name(edge),
                self.engine.decoder().state(),
                describe_outcome(outcome)
            )],
            Err(error) => vec![format!("ERR {error}")],
        }
    }

    fn status(&self) -> Vec<String> {
        let now = self.platform.peek_time();
        let decoder = self.engine.decoder();
        let position = decoder.position();
        let (triggers, syncs) = decoder.edge_counts();
        let values = self.engine.calculated();
        vec![
            format!(
                "decoder={} loss={} rpm={} tooth-rpm={} angle={:.1} valid={}",
                decoder.state(),
                decoder.loss(),
                position.rpm,
                position.tooth_rpm,
                position.current_angle(now),
                position.is_valid_at(now),
            ),
            format!(
                "edges trigger={triggers} sync={syncs} wheel-rpm={}",
                self.wheel.rpm
            ),
            format!(
                "advance={} dwell={}us pw={}us ignition-cut={} races={} races-dropped={}",
                values.timing_advance,
                values.dwell_us,
                values.fueling_us,
                self.engine.ignition_cut(),
                self.engine.scheduler().race_total(),
                self.engine.scheduler().races_dropped(),
            ),
            format!("now={}us", ticks_to_us(now)),
        ]
    }

    fn outputs(&self) -> Vec<String> {
        let mut lines = vec![format!("outputs=0x{:08x}", self.platform.outputs())];
        for (index, event) in self.engine.scheduler().events().iter().enumerate() {
            let kind = match event.kind {
                EventKind::Ignition => "ignition",
                EventKind::Fuel => "fuel",
            };
            lines.push(format!(
                "  {index:>2} {kind:<8} pin {:>2} angle {:>5.1} start {} stop {}",
                event.pin,
                event.angle,
                describe_entry(&event.start),
                describe_entry(&event.stop)
            ));
        }
        lines
    }

    fn log(&mut self) -> Vec<String> {
        let telemetry = self.engine.telemetry();
        let lines = telemetry
            .since(self.next_log_id)
            .map(|record| {
                format!(
                    "  [{:>5}] t={}us {}",
                    record.id,
                    ticks_to_us(record.time),
                    record.event
                )
            })
            .collect();
        self.next_log_id = telemetry.next_id();
        lines
    }
}

fn help(topic: Option<&str>) -> Vec<String> {
    match topic {
        Some(target) => match HELP_TOPICS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(target))
        {
            Some((_, detail)) => vec![(*detail).to_string()],
            None => vec![
                format!("No help available for `{target}`."),
                format!("Available topics: {}", help_topic_list()),
            ],
        },
        None => {
            let mut lines = vec!["Available commands:".to_string()];
            lines.extend(HELP_TOPICS.iter().map(|(_, detail)| format!("  {detail}")));
            lines.push("Type `help <topic>` for a specific command.".to_string());
            lines
        }
    }
}

fn help_topic_list() -> String {
    HELP_TOPICS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn edge_name(edge: TriggerEvent) -> &'static str {
    match edge.kind {
        TriggerKind::Trigger => "trigger",
        TriggerKind::Sync => "sync",
    }
}

fn describe_outcome(outcome: DecodeOutcome) -> String {
    match outcome {
        DecodeOutcome::Unchanged => "unchanged".to_string(),
        DecodeOutcome::GainedSync => "gained-sync".to_string(),
        DecodeOutcome::LostSync(reason) => format!("lost-sync {reason}"),
    }
}

fn describe_entry(entry: &ScheduleEntry) -> String {
    if entry.has_fired() {
        format!("fired@{}us", ticks_to_us(entry.time))
    } else if entry.is_pending() {
        format!("pending@{}us", ticks_to_us(entry.time))
    } else {
        "-".to_string()
    }
}

fn ticks_to_us(ticks: TimeVal) -> u64 {
    u64::from(ticks / TICKS_PER_US)
}
