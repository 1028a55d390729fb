//! Trigger wheel decoder.
//!
//! Consumes timestamped TRIGGER and SYNC edges and maintains the engine
//! position: state (`NoSync`, `Rpm`, `Sync`), smoothed and per-tooth RPM,
//! the crank angle of the most recent tooth, and the time after which the
//! position goes stale. The state machine is strict: one out-of-tolerance
//! interval is enough to fall back to `NoSync`, and every desync records a
//! [`LossReason`].
//!
//! The wheel is selected by [`DecoderKind`]. Even wheels share the same
//! per-trigger bookkeeping:
//!
//! * `TfiPip` has no sync edge. Surviving `required_triggers_rpm` good
//!   triggers is enough for a position.
//! * `CamNPlusOne` anchors angle zero on a cam pulse once per cycle and
//!   checks the tooth count between consecutive pulses.
//!
//! Missing-tooth wheels judge each interval against the average of the
//! preceding ones instead. An interval near twice the average is the gap,
//! which anchors angle zero:
//!
//! * `MissingTooth` needs nothing else.
//! * `MissingToothCamSync` also needs a cam pulse in one of the last two
//!   revolutions to tell the halves of the 720 degree cycle apart.

use core::fmt;

use heapless::HistoryBuf;

use crate::config::{DecoderConfig, DecoderKind, MAX_TRIGGERS};
use crate::time::{
    Degrees, TimeVal, clamp_angle, degrees_from_time_diff, rpm_from_time_diff, time_before,
    time_diff, time_in_range,
};

const TIME_HISTORY: usize = MAX_TRIGGERS + 1;

/// Decoder synchronization state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecoderState {
    /// No reliable timing.
    NoSync,
    /// Timing established, crank angle zero unknown.
    Rpm,
    /// Absolute crank angle known.
    Sync,
}

impl fmt::Display for DecoderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecoderState::NoSync => f.write_str("nosync"),
            DecoderState::Rpm => f.write_str("rpm"),
            DecoderState::Sync => f.write_str("sync"),
        }
    }
}

/// Reason recorded for the most recent loss of sync.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LossReason {
    NoLoss,
    /// A tooth deviated from the smoothed RPM beyond tolerance, or fell
    /// below the minimum valid RPM.
    Variation,
    /// More triggers than the wheel has arrived without a sync edge.
    TriggerCountHigh,
    /// A sync edge arrived before the full tooth count.
    TriggerCountLow,
    /// No edge arrived before the watchdog deadline.
    Expired,
    /// Capture hardware reported lost edges.
    Overflow,
    /// The decoder configuration is invalid.
    BadConfig,
}

impl LossReason {
    /// Encodes the reason into a compact numeric discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            LossReason::NoLoss => 0,
            LossReason::Variation => 1,
            LossReason::TriggerCountHigh => 2,
            LossReason::TriggerCountLow => 3,
            LossReason::Expired => 4,
            LossReason::Overflow => 5,
            LossReason::BadConfig => 6,
        }
    }

    /// Decodes a compact discriminant, returning `None` for unknown codes.
    #[must_use]
    pub const fn from_raw(code: u8) -> Option<Self> {
        match code {
            0 => Some(LossReason::NoLoss),
            1 => Some(LossReason::Variation),
            2 => Some(LossReason::TriggerCountHigh),
            3 => Some(LossReason::TriggerCountLow),
            4 => Some(LossReason::Expired),
            5 => Some(LossReason::Overflow),
            6 => Some(LossReason::BadConfig),
            _ => None,
        }
    }
}

impl fmt::Display for LossReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LossReason::NoLoss => "none",
            LossReason::Variation => "variation",
            LossReason::TriggerCountHigh => "trigger-count-high",
            LossReason::TriggerCountLow => "trigger-count-low",
            LossReason::Expired => "expired",
            LossReason::Overflow => "overflow",
            LossReason::BadConfig => "bad-config",
        };
        f.write_str(name)
    }
}

/// Which input produced an edge.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TriggerKind {
    Trigger,
    Sync,
}

/// One captured edge.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TriggerEvent {
    pub kind: TriggerKind,
    pub time: TimeVal,
}

impl TriggerEvent {
    #[must_use]
    pub const fn trigger(time: TimeVal) -> Self {
        Self {
            kind: TriggerKind::Trigger,
            time,
        }
    }

    #[must_use]
    pub const fn sync(time: TimeVal) -> Self {
        Self {
            kind: TriggerKind::Sync,
            time,
        }
    }
}

/// Edges collected by a polled capture path since the last decode.
///
/// The capture unit latches one timestamp per input, so a trigger and a sync
/// edge may both be waiting with no record of which came first.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PendingEdges {
    pub trigger: Option<TimeVal>,
    pub sync: Option<TimeVal>,
    /// An input latched a second edge before the first was read.
    pub overflow: bool,
}

/// Result of feeding the decoder, used to cascade into the scheduler.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeOutcome {
    Unchanged,
    GainedSync,
    LostSync(LossReason),
}

impl DecodeOutcome {
    fn merge(self, later: Self) -> Self {
        match (self, later) {
            (_, DecodeOutcome::LostSync(reason)) | (DecodeOutcome::LostSync(reason), _) => {
                DecodeOutcome::LostSync(reason)
            }
            (DecodeOutcome::Unchanged, other) => other,
            (first, DecodeOutcome::Unchanged) => first,
            (DecodeOutcome::GainedSync, DecodeOutcome::GainedSync) => DecodeOutcome::GainedSync,
        }
    }
}

/// Snapshot of the decoded engine position.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EnginePosition {
    /// Absolute crank angle is known.
    pub has_position: bool,
    /// RPM is trustworthy.
    pub has_rpm: bool,
    /// Smoothed RPM over the configured window.
    pub rpm: u32,
    /// RPM implied by the most recent interval alone.
    pub tooth_rpm: u32,
    pub last_trigger_time: TimeVal,
    pub last_trigger_angle: Degrees,
    /// Crank angle of the sync tooth relative to TDC.
    pub offset: Degrees,
    pub cycle_degrees: Degrees,
    /// Time after which, without a further edge, the position is stale.
    pub valid_until: TimeVal,
}

impl EnginePosition {
    const fn empty() -> Self {
        Self {
            has_position: false,
            has_rpm: false,
            rpm: 0,
            tooth_rpm: 0,
            last_trigger_time: 0,
            last_trigger_angle: 0.0,
            offset: 0.0,
            cycle_degrees: 720.0,
            valid_until: 0,
        }
    }

    /// Extrapolates the crank angle at `at` from the last tooth and RPM.
    #[must_use]
    pub fn current_angle(&self, at: TimeVal) -> Degrees {
        if !self.has_position || !self.has_rpm {
            return self.last_trigger_angle;
        }
        let mut since_last = degrees_from_time_diff(time_diff(at, self.last_trigger_time), self.rpm);
        if !(0.0..=self.cycle_degrees).contains(&since_last) {
            since_last = 0.0;
        }
        clamp_angle(self.last_trigger_angle + since_last, self.cycle_degrees)
    }

    /// Returns `true` while the position is known and not yet stale at `at`.
    #[must_use]
    pub const fn is_valid_at(&self, at: TimeVal) -> bool {
        self.has_position && time_before(at, self.valid_until)
    }
}

/// Trigger wheel decoder state.
#[derive(Clone, Debug)]
pub struct Decoder {
    config: DecoderConfig,
    config_valid: bool,
    state: DecoderState,
    loss: LossReason,
    times: HistoryBuf<TimeVal, TIME_HISTORY>,
    triggers_since_last_sync: u32,
    current_triggers_rpm: u32,
    trigger_cur_rpm_change: f32,
    position: EnginePosition,
    trigger_edges: u32,
    sync_edges: u32,
    cam_seen_this_rev: bool,
    cam_seen_last_rev: bool,
}

impl Decoder {
    /// Creates a decoder in `NoSync` for the given wheel.
    #[must_use]
    pub fn new(config: DecoderConfig) -> Self {
        let mut position = EnginePosition::empty();
        position.offset = config.offset;
        position.cycle_degrees = config.cycle_degrees;
        Self {
            config_valid: config.validate().is_ok(),
            config,
            state: DecoderState::NoSync,
            loss: LossReason::NoLoss,
            times: HistoryBuf::new(),
            triggers_since_last_sync: 0,
            current_triggers_rpm: 0,
            trigger_cur_rpm_change: 0.0,
            position,
            trigger_edges: 0,
            sync_edges: 0,
            cam_seen_this_rev: false,
            cam_seen_last_rev: false,
        }
    }

    /// Replaces the wheel configuration and restarts decoding.
    pub fn reconfigure(&mut self, config: DecoderConfig) {
        *self = Self::new(config);
    }

    #[must_use]
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Reason for the most recent desync, or `NoLoss` while synced.
    #[must_use]
    pub fn loss(&self) -> LossReason {
        self.loss
    }

    /// Fractional deviation of the most recent tooth from the smoothed RPM.
    #[must_use]
    pub fn rpm_change(&self) -> f32 {
        self.trigger_cur_rpm_change
    }

    /// Triggers seen since the last sync edge.
    #[must_use]
    pub fn triggers_since_sync(&self) -> u32 {
        self.triggers_since_last_sync
    }

    /// Total trigger and sync edges received.
    #[must_use]
    pub fn edge_counts(&self) -> (u32, u32) {
        (self.trigger_edges, self.sync_edges)
    }

    /// Current position snapshot.
    #[must_use]
    pub fn position(&self) -> EnginePosition {
        EnginePosition {
            has_rpm: matches!(self.state, DecoderState::Rpm | DecoderState::Sync),
            ..self.position
        }
    }

    /// Feeds one captured edge.
    pub fn decode(&mut self, event: TriggerEvent) -> DecodeOutcome {
        match event.kind {
            TriggerKind::Trigger => self.trigger_edges = self.trigger_edges.wrapping_add(1),
            TriggerKind::Sync => self.sync_edges = self.sync_edges.wrapping_add(1),
        }

        let had_position = self.position.has_position;
        if !self.config_valid {
            self.desync(LossReason::BadConfig);
            return Self::outcome(had_position, false, self.loss);
        }

        match self.config.kind {
            DecoderKind::TfiPip => self.decode_tfi(event),
            DecoderKind::CamNPlusOne => self.decode_cam_sync(event),
            DecoderKind::MissingTooth => self.decode_missing(event),
            DecoderKind::MissingToothCamSync => self.decode_missing_cam(event, had_position),
        }
        Self::outcome(had_position, self.position.has_position, self.loss)
    }

    /// Feeds edges gathered by a polled capture path.
    ///
    /// When both inputs latched an edge the true order is unknown. If the
    /// sync timestamp lies between the trigger timestamp and `now`, the
    /// trigger is taken as first, otherwise the sync edge is. This is a
    /// heuristic for edges captured within one polling window, not a
    /// guaranteed ordering.
    pub fn decode_pending(&mut self, edges: PendingEdges, now: TimeVal) -> DecodeOutcome {
        if edges.overflow {
            let had_position = self.position.has_position;
            self.desync(LossReason::Overflow);
            return Self::outcome(had_position, false, self.loss);
        }

        match (edges.trigger, edges.sync) {
            (Some(trigger), Some(sync)) => {
                if time_in_range(sync, trigger, now) {
                    let first = self.decode(TriggerEvent::trigger(trigger));
                    first.merge(self.decode(TriggerEvent::sync(sync)))
                } else {
                    let first = self.decode(TriggerEvent::sync(sync));
                    first.merge(self.decode(TriggerEvent::trigger(trigger)))
                }
            }
            (Some(trigger), None) => self.decode(TriggerEvent::trigger(trigger)),
            (None, Some(sync)) => self.decode(TriggerEvent::sync(sync)),
            (None, None) => DecodeOutcome::Unchanged,
        }
    }

    /// Watchdog path: desyncs if no edge arrived before `valid_until`.
    pub fn expire(&mut self, now: TimeVal) -> DecodeOutcome {
        if self.state == DecoderState::NoSync || time_before(now, self.position.valid_until) {
            return DecodeOutcome::Unchanged;
        }
        let had_position = self.position.has_position;
        self.desync(LossReason::Expired);
        Self::outcome(had_position, false, self.loss)
    }

    /// Forces `NoSync` with the given reason.
    pub fn desync(&mut self, reason: LossReason) {
        self.loss = reason;
        self.state = DecoderState::NoSync;
        self.current_triggers_rpm = 0;
        self.triggers_since_last_sync = 0;
        self.position.has_position = false;
        self.position.has_rpm = false;
        self.cam_seen_this_rev = false;
        self.cam_seen_last_rev = false;
    }

    fn outcome(had_position: bool, has_position: bool, loss: LossReason) -> DecodeOutcome {
        match (had_position, has_position) {
            (true, false) => DecodeOutcome::LostSync(loss),
            (false, true) => DecodeOutcome::GainedSync,
            _ => DecodeOutcome::Unchanged,
        }
    }

    fn decode_tfi(&mut self, event: TriggerEvent) {
        // Distributor pickups have no sync input.
        if event.kind == TriggerKind::Sync {
            return;
        }
        if let Err(reason) = self.trigger_update(event.time) {
            self.desync(reason);
            return;
        }
        if self.state != DecoderState::NoSync {
            self.state = DecoderState::Sync;
            self.loss = LossReason::NoLoss;
            self.position.has_position = true;
            self.triggers_since_last_sync = 0;
        }
    }

    fn decode_cam_sync(&mut self, event: TriggerEvent) {
        let result = match event.kind {
            TriggerKind::Trigger => self.trigger_update(event.time),
            TriggerKind::Sync => self.sync_update(),
        };
        if let Err(reason) = result {
            self.desync(reason);
            return;
        }
        if self.state == DecoderState::Sync {
            self.loss = LossReason::NoLoss;
            self.position.has_position = true;
        }
    }

    fn decode_missing(&mut self, event: TriggerEvent) {
        if event.kind == TriggerKind::Sync {
            return;
        }
        if let Err(reason) = self.missing_tooth_update(event.time) {
            self.desync(reason);
            return;
        }
        if self.state == DecoderState::Sync {
            self.loss = LossReason::NoLoss;
            self.position.has_position = true;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn decode_missing_cam(&mut self, event: TriggerEvent, had_position: bool) {
        match event.kind {
            TriggerKind::Trigger => {
                if let Err(reason) = self.missing_tooth_update(event.time) {
                    self.desync(reason);
                    return;
                }
                if self.state == DecoderState::Sync && self.triggers_since_last_sync == 0 {
                    if had_position && !self.cam_seen_this_rev && !self.cam_seen_last_rev {
                        // Two revolutions without a cam pulse.
                        self.desync(LossReason::TriggerCountHigh);
                        return;
                    }
                    self.cam_seen_last_rev = self.cam_seen_this_rev;
                    self.cam_seen_this_rev = false;
                }
            }
            TriggerKind::Sync => {
                if self.state != DecoderState::Sync {
                    return;
                }
                if self.cam_seen_this_rev || self.cam_seen_last_rev {
                    // A second pulse inside one cycle.
                    if had_position {
                        self.desync(LossReason::TriggerCountLow);
                        return;
                    }
                    self.cam_seen_this_rev = false;
                } else {
                    self.cam_seen_this_rev = true;
                }
            }
        }

        if self.state != DecoderState::Sync {
            self.position.has_position = false;
        } else if !had_position && (self.cam_seen_this_rev || self.cam_seen_last_rev) {
            let half = if self.cam_seen_this_rev {
                0.0
            } else {
                self.config.cycle_degrees / 2.0
            };
            let teeth = self.triggers_since_last_sync as f32;
            self.position.last_trigger_angle = self.config.degrees_per_trigger * teeth + half;
            self.position.has_position = true;
            self.loss = LossReason::NoLoss;
        }
    }

    /// Per-trigger bookkeeping for a wheel with one missing tooth.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn missing_tooth_update(&mut self, time: TimeVal) -> Result<(), LossReason> {
        self.times.write(time);
        self.position.last_trigger_time = time;
        if (self.current_triggers_rpm as usize) < MAX_TRIGGERS {
            self.current_triggers_rpm += 1;
        }
        let config = self.config;
        if self.current_triggers_rpm < config.required_triggers_rpm {
            return Ok(());
        }
        if self.state == DecoderState::NoSync {
            self.state = DecoderState::Rpm;
        }

        // Average interval over the window before the newest tooth. A gap
        // inside the window counts as two intervals.
        let window = config.required_triggers_rpm as usize;
        let (Some(newest), Some(previous)) = (self.time_back(0), self.time_back(1)) else {
            return Ok(());
        };
        let Some(oldest) = self.time_back(window) else {
            // Too few intervals to judge yet; allow for the gap coming next.
            self.extend_deadline(newest, time_diff(newest, previous) * 2);
            return Ok(());
        };
        let mut window_intervals = config.required_triggers_rpm - 1;
        if self.state == DecoderState::Sync && self.triggers_since_last_sync < window_intervals {
            window_intervals += 1;
        }
        let average = time_diff(previous, oldest) / window_intervals;
        let last = time_diff(newest, previous);
        if average == 0 {
            return Err(LossReason::Variation);
        }

        let ratio = last as f32 / average as f32;
        let tolerance = config.trigger_max_rpm_change;
        let is_gap = (ratio - 2.0).abs() <= tolerance;
        let is_tooth = (ratio - 1.0).abs() <= tolerance;
        self.trigger_cur_rpm_change = (ratio - 1.0).abs();

        match self.state {
            DecoderState::Rpm if is_gap => {
                self.state = DecoderState::Sync;
                self.triggers_since_last_sync = 0;
                self.position.last_trigger_angle = 0.0;
                Ok(())
            }
            DecoderState::Rpm if !is_tooth => Err(LossReason::Variation),
            DecoderState::Sync => {
                self.triggers_since_last_sync += 1;
                let result = if self.triggers_since_last_sync == config.num_triggers - 1 {
                    if is_gap {
                        self.triggers_since_last_sync = 0;
                        Ok(())
                    } else {
                        Err(LossReason::TriggerCountHigh)
                    }
                } else if is_tooth {
                    Ok(())
                } else {
                    Err(LossReason::TriggerCountLow)
                };
                let spacing = if is_gap { 2.0 } else { 1.0 };
                let mut angle =
                    self.position.last_trigger_angle + config.degrees_per_trigger * spacing;
                if angle >= config.cycle_degrees {
                    angle -= config.cycle_degrees;
                }
                self.position.last_trigger_angle = angle;
                result
            }
            _ => Ok(()),
        }?;

        // Tooth RPM over the last interval, whole-wheel RPM once per revolution.
        let at_gap = self.state == DecoderState::Sync && self.triggers_since_last_sync == 0;
        let spacing = if at_gap { 2.0 } else { 1.0 };
        self.position.tooth_rpm = rpm_from_time_diff(last, config.degrees_per_trigger * spacing);
        if self.current_triggers_rpm < config.num_triggers {
            self.position.rpm = self.position.tooth_rpm;
        } else if at_gap {
            if let Some(revolution_start) = self.time_back(config.num_triggers as usize - 1) {
                self.position.rpm = rpm_from_time_diff(
                    time_diff(newest, revolution_start),
                    config.degrees_per_trigger * config.num_triggers as f32,
                );
            }
        }

        // The next interval is the gap when the wheel position is not yet
        // known or the last tooth before it just passed.
        let next_is_gap = self.state == DecoderState::Rpm
            || self.triggers_since_last_sync == config.num_triggers - 2;
        self.extend_deadline(newest, average * if next_is_gap { 2 } else { 1 });
        Ok(())
    }

    /// Position goes stale once `expected` ticks past `newest` are exceeded
    /// by more than the tooth tolerance.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn extend_deadline(&mut self, newest: TimeVal, expected: TimeVal) {
        let allowance = (expected as f32 * (1.0 + self.config.trigger_max_rpm_change)) as TimeVal;
        self.position.valid_until = newest.wrapping_add(allowance);
    }

    fn trigger_update(&mut self, time: TimeVal) -> Result<(), LossReason> {
        self.times.write(time);
        self.triggers_since_last_sync = self.triggers_since_last_sync.saturating_add(1);
        if (self.current_triggers_rpm as usize) < TIME_HISTORY {
            self.current_triggers_rpm += 1;
        }

        if self.state == DecoderState::NoSync
            && self.current_triggers_rpm >= self.config.required_triggers_rpm
        {
            self.state = DecoderState::Rpm;
        }

        if self.state == DecoderState::Sync {
            let mut angle = self.position.last_trigger_angle + self.config.degrees_per_trigger;
            if angle >= self.config.cycle_degrees {
                angle -= self.config.cycle_degrees;
            }
            self.position.last_trigger_angle = angle;
        }
        self.position.last_trigger_time = time;

        if self.state == DecoderState::NoSync {
            return Ok(());
        }
        self.update_rpm()
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn update_rpm(&mut self) -> Result<(), LossReason> {
        let config = &self.config;
        let (Some(newest), Some(previous)) = (self.time_back(0), self.time_back(1)) else {
            return Ok(());
        };
        let diff = time_diff(newest, previous);
        let tooth_rpm = rpm_from_time_diff(diff, config.degrees_per_trigger);
        self.position.tooth_rpm = tooth_rpm;

        let window = (self.current_triggers_rpm - 1).min(config.rpm_window_size);
        let rpm = match self.time_back(window as usize) {
            Some(oldest) if window > 0 => rpm_from_time_diff(
                time_diff(newest, oldest),
                config.degrees_per_trigger * window as f32,
            ),
            _ => 0,
        };
        self.position.rpm = rpm;
        if rpm > 0 {
            self.trigger_cur_rpm_change = rpm.abs_diff(tooth_rpm) as f32 / rpm as f32;
        }

        self.position.valid_until = newest.wrapping_add(diff).wrapping_add(diff / 2);

        let tolerance = rpm as f32 * config.trigger_max_rpm_change;
        let tooth = tooth_rpm as f32;
        if tooth_rpm <= config.trigger_min_rpm
            || tooth > rpm as f32 + tolerance
            || tooth < rpm as f32 - tolerance
        {
            return Err(LossReason::Variation);
        }

        if self.triggers_since_last_sync > config.num_triggers {
            return Err(LossReason::TriggerCountHigh);
        }
        Ok(())
    }

    fn sync_update(&mut self) -> Result<(), LossReason> {
        let count = self.triggers_since_last_sync;
        self.triggers_since_last_sync = 0;
        match self.state {
            DecoderState::NoSync => Ok(()),
            DecoderState::Rpm => {
                self.state = DecoderState::Sync;
                self.position.last_trigger_angle = 0.0;
                Ok(())
            }
            DecoderState::Sync if count == self.config.num_triggers => {
                self.position.last_trigger_angle = 0.0;
                Ok(())
            }
            DecoderState::Sync if count > self.config.num_triggers => {
                Err(LossReason::TriggerCountHigh)
            }
            DecoderState::Sync => Err(LossReason::TriggerCountLow),
        }
    }

    /// Timestamp `n` triggers back, zero being the most recent.
    fn time_back(&self, n: usize) -> Option<TimeVal> {
        let len = self.times.len();
        if n >= len {
            return None;
        }
        self.times.oldest_ordered().nth(len - 1 - n).copied()
    }
}
