use engine_core::config::{DecoderConfig, DecoderKind};
use engine_core::decoder::{
    DecodeOutcome, Decoder, DecoderState, LossReason, PendingEdges, TriggerEvent,
};
use engine_core::time::TimeVal;

/// Feeds edges spaced by relative durations, tracking absolute time.
struct Wheel {
    decoder: Decoder,
    time: TimeVal,
}

impl Wheel {
    fn new(config: DecoderConfig) -> Self {
        Self {
            decoder: Decoder::new(config),
            time: 0,
        }
    }

    fn trigger(&mut self, after: TimeVal) -> DecodeOutcome {
        self.time = self.time.wrapping_add(after);
        self.decoder.decode(TriggerEvent::trigger(self.time))
    }

    fn sync(&mut self, after: TimeVal) -> DecodeOutcome {
        self.time = self.time.wrapping_add(after);
        self.decoder.decode(TriggerEvent::sync(self.time))
    }

    fn triggers(&mut self, count: u32, after: TimeVal) {
        for _ in 0..count {
            self.trigger(after);
        }
    }

    fn state(&self) -> DecoderState {
        self.decoder.state()
    }
}

fn toyota_cps() -> DecoderConfig {
    DecoderConfig {
        kind: DecoderKind::CamNPlusOne,
        num_triggers: 24,
        degrees_per_trigger: 30.0,
        rpm_window_size: 8,
        required_triggers_rpm: 8,
        trigger_max_rpm_change: 0.4,
        trigger_min_rpm: 80,
        offset: 0.0,
        cycle_degrees: 720.0,
    }
}

/// Brings a 24+1 wheel to sync plus one tooth.
fn cam_startup_to_sync() -> Wheel {
    let mut wheel = Wheel::new(toyota_cps());
    wheel.triggers(7, 25_000);
    assert_eq!(wheel.state(), DecoderState::NoSync);
    wheel.trigger(25_000);
    assert_eq!(wheel.state(), DecoderState::Rpm);
    assert!(!wheel.decoder.position().has_position);

    wheel.triggers(2, 25_000);
    assert_eq!(wheel.sync(500), DecodeOutcome::GainedSync);
    assert_eq!(wheel.state(), DecoderState::Sync);
    assert_eq!(wheel.trigger(24_500), DecodeOutcome::Unchanged);
    wheel
}

#[test]
fn tfi_startup_normal() {
    let mut wheel = Wheel::new(DecoderConfig::ford_tfi());
    wheel.triggers(3, 25_000);
    assert_eq!(wheel.state(), DecoderState::NoSync);
    assert_eq!(wheel.trigger(25_000), DecodeOutcome::GainedSync);
    assert_eq!(wheel.state(), DecoderState::Sync);
    wheel.trigger(25_000);

    let position = wheel.decoder.position();
    assert!(position.has_position && position.has_rpm);
    assert_eq!(position.last_trigger_angle, 90.0);
    assert_eq!(position.rpm, 2400);
    assert_eq!(position.tooth_rpm, 2400);
}

#[test]
fn tfi_loses_sync_on_variation() {
    let mut wheel = Wheel::new(DecoderConfig::ford_tfi());
    wheel.triggers(5, 25_000);
    assert_eq!(wheel.state(), DecoderState::Sync);

    assert_eq!(
        wheel.trigger(10_000),
        DecodeOutcome::LostSync(LossReason::Variation)
    );
    assert_eq!(wheel.state(), DecoderState::NoSync);
    assert_eq!(wheel.decoder.loss(), LossReason::Variation);
    assert!(!wheel.decoder.position().has_rpm);
}

#[test]
fn tfi_expiry_is_one_and_a_half_intervals() {
    let mut wheel = Wheel::new(DecoderConfig::ford_tfi());
    wheel.triggers(5, 25_000);
    assert_eq!(wheel.decoder.position().valid_until, wheel.time + 37_500);

    let deadline = wheel.time + 37_500;
    assert_eq!(wheel.decoder.expire(deadline - 1), DecodeOutcome::Unchanged);
    assert_eq!(
        wheel.decoder.expire(deadline),
        DecodeOutcome::LostSync(LossReason::Expired)
    );
    assert_eq!(wheel.decoder.loss(), LossReason::Expired);
}

#[test]
fn tfi_recovers_after_loss() {
    let mut wheel = Wheel::new(DecoderConfig::ford_tfi());
    wheel.triggers(5, 25_000);
    wheel.trigger(10_000);
    assert_eq!(wheel.state(), DecoderState::NoSync);

    wheel.triggers(3, 25_000);
    assert_eq!(wheel.state(), DecoderState::NoSync);
    assert_eq!(wheel.trigger(25_000), DecodeOutcome::GainedSync);
    assert_eq!(wheel.decoder.loss(), LossReason::NoLoss);
}

#[test]
fn cam_startup_normal() {
    let mut wheel = cam_startup_to_sync();
    wheel.triggers(2, 25_000);

    let position = wheel.decoder.position();
    assert_eq!(position.last_trigger_angle, 90.0);
    assert_eq!(position.rpm, 800);
    assert_eq!(position.tooth_rpm, 800);
}

#[test]
fn cam_early_sync_is_trigger_count_low() {
    let mut wheel = cam_startup_to_sync();
    wheel.triggers(2, 25_000);

    assert_eq!(
        wheel.sync(500),
        DecodeOutcome::LostSync(LossReason::TriggerCountLow)
    );
    assert!(!wheel.decoder.position().has_position);
}

#[test]
fn cam_sustained_sync_wraps_angle() {
    let mut wheel = cam_startup_to_sync();
    wheel.triggers(23, 25_000);
    assert_eq!(wheel.decoder.position().last_trigger_angle, 0.0);

    assert_eq!(wheel.sync(500), DecodeOutcome::Unchanged);
    wheel.trigger(24_500);
    assert_eq!(wheel.state(), DecoderState::Sync);
    assert_eq!(wheel.decoder.position().last_trigger_angle, 30.0);
}

#[test]
fn cam_missing_sync_is_trigger_count_high() {
    let mut wheel = cam_startup_to_sync();
    wheel.triggers(23, 25_000);

    assert_eq!(
        wheel.trigger(25_500),
        DecodeOutcome::LostSync(LossReason::TriggerCountHigh)
    );
    assert!(!wheel.decoder.position().has_position);
}

#[test]
fn cam_expiry_tracks_last_tooth() {
    let mut wheel = cam_startup_to_sync();
    wheel.triggers(3, 25_000);
    assert_eq!(wheel.decoder.position().valid_until, wheel.time + 37_500);
}

#[test]
fn current_angle_extrapolates_from_last_tooth() {
    let mut wheel = cam_startup_to_sync();
    wheel.triggers(2, 25_000);

    let position = wheel.decoder.position();
    assert_eq!(position.current_angle(wheel.time + 12_500), 105.0);
    assert!(position.is_valid_at(wheel.time + 12_500));
    assert!(!position.is_valid_at(position.valid_until));
}

#[test]
fn invalid_config_never_syncs() {
    let mut config = DecoderConfig::ford_tfi();
    config.degrees_per_trigger = 0.0;
    let mut wheel = Wheel::new(config);
    wheel.triggers(8, 25_000);

    assert_eq!(wheel.state(), DecoderState::NoSync);
    assert_eq!(wheel.decoder.loss(), LossReason::BadConfig);
}

#[test]
fn pending_overflow_desyncs_and_drops_edges() {
    let mut wheel = Wheel::new(DecoderConfig::ford_tfi());
    wheel.triggers(5, 25_000);
    let before = wheel.decoder.edge_counts();

    let edges = PendingEdges {
        trigger: Some(wheel.time + 25_000),
        sync: None,
        overflow: true,
    };
    assert_eq!(
        wheel.decoder.decode_pending(edges, wheel.time + 25_100),
        DecodeOutcome::LostSync(LossReason::Overflow)
    );
    assert_eq!(wheel.decoder.edge_counts(), before);
}

#[test]
fn pending_sync_after_trigger_is_decoded_second() {
    let mut wheel = cam_startup_to_sync();
    wheel.triggers(22, 25_000);

    // Tooth 24 then the cam pulse, both latched before the poll.
    let trigger = wheel.time + 25_000;
    let edges = PendingEdges {
        trigger: Some(trigger),
        sync: Some(trigger + 500),
        overflow: false,
    };
    assert_eq!(
        wheel.decoder.decode_pending(edges, trigger + 800),
        DecodeOutcome::Unchanged
    );
    assert_eq!(wheel.state(), DecoderState::Sync);
    assert_eq!(wheel.decoder.position().last_trigger_angle, 0.0);
    assert_eq!(wheel.decoder.triggers_since_sync(), 0);
}

#[test]
fn pending_sync_before_trigger_is_decoded_first() {
    let mut wheel = cam_startup_to_sync();
    wheel.triggers(23, 25_000);

    // Cam pulse then the first tooth of the next cycle.
    let sync = wheel.time + 500;
    let edges = PendingEdges {
        trigger: Some(sync + 24_500),
        sync: Some(sync),
        overflow: false,
    };
    wheel.decoder.decode_pending(edges, sync + 24_800);
    assert_eq!(wheel.state(), DecoderState::Sync);
    assert_eq!(wheel.decoder.position().last_trigger_angle, 30.0);
    assert_eq!(wheel.decoder.triggers_since_sync(), 1);
}

/// 36-1 wheel on the cam: 20 degrees per tooth, one gap per cycle.
fn cam_36_minus_1() -> DecoderConfig {
    DecoderConfig {
        degrees_per_trigger: 20.0,
        cycle_degrees: 720.0,
        ..DecoderConfig::missing_tooth(36)
    }
}

/// Brings a 36-1 wheel to the first gap.
fn missing_tooth_to_gap(config: DecoderConfig) -> Wheel {
    let mut wheel = Wheel::new(config);
    wheel.triggers(3, 25_000);
    assert_eq!(wheel.state(), DecoderState::NoSync);
    wheel.trigger(25_000);
    assert_eq!(wheel.state(), DecoderState::Rpm);
    wheel.triggers(4, 25_000);
    assert_eq!(wheel.state(), DecoderState::Rpm);
    wheel.trigger(50_000);
    assert_eq!(wheel.state(), DecoderState::Sync);
    wheel
}

#[test]
fn missing_tooth_gap_gains_sync() {
    let mut wheel = Wheel::new(cam_36_minus_1());
    wheel.triggers(8, 25_000);
    assert_eq!(wheel.trigger(50_000), DecodeOutcome::GainedSync);

    let position = wheel.decoder.position();
    assert!(position.has_position);
    assert_eq!(position.last_trigger_angle, 0.0);
    assert_eq!(position.rpm, 533);
    assert_eq!(position.tooth_rpm, 533);

    wheel.trigger(25_000);
    assert_eq!(wheel.decoder.position().last_trigger_angle, 20.0);
}

#[test]
fn missing_tooth_full_revolution_stays_synced() {
    let mut wheel = missing_tooth_to_gap(cam_36_minus_1());
    wheel.triggers(34, 25_000);
    assert_eq!(wheel.decoder.position().last_trigger_angle, 680.0);
    // The gap is next: the deadline allows for two teeth.
    assert_eq!(wheel.decoder.position().valid_until, wheel.time + 70_000);

    assert_eq!(wheel.trigger(50_000), DecodeOutcome::Unchanged);
    let position = wheel.decoder.position();
    assert_eq!(position.last_trigger_angle, 0.0);
    assert_eq!(position.rpm, 533);
    assert_eq!(wheel.decoder.triggers_since_sync(), 0);
}

#[test]
fn missing_tooth_early_gap_is_trigger_count_low() {
    let mut wheel = missing_tooth_to_gap(cam_36_minus_1());
    wheel.triggers(5, 25_000);
    assert_eq!(
        wheel.trigger(50_000),
        DecodeOutcome::LostSync(LossReason::TriggerCountLow)
    );
    assert!(!wheel.decoder.position().has_position);
}

#[test]
fn missing_tooth_absent_gap_is_trigger_count_high() {
    let mut wheel = missing_tooth_to_gap(cam_36_minus_1());
    wheel.triggers(34, 25_000);
    assert_eq!(
        wheel.trigger(25_000),
        DecodeOutcome::LostSync(LossReason::TriggerCountHigh)
    );

    // A late gap right after does not bring sync straight back.
    wheel.trigger(50_000);
    assert_eq!(wheel.state(), DecoderState::NoSync);
    assert!(!wheel.decoder.position().has_position);
}

#[test]
fn missing_tooth_erratic_interval_is_variation() {
    let mut wheel = Wheel::new(cam_36_minus_1());
    wheel.triggers(6, 25_000);
    assert_eq!(wheel.state(), DecoderState::Rpm);
    // Half way between a tooth and the gap.
    wheel.trigger(37_500);
    assert_eq!(wheel.state(), DecoderState::NoSync);
    assert_eq!(wheel.decoder.loss(), LossReason::Variation);
}

#[test]
fn missing_tooth_decoder_never_syncs_on_even_wheel() {
    let mut wheel = Wheel::new(cam_36_minus_1());
    wheel.triggers(36 * 4, 25_000);
    assert_eq!(wheel.state(), DecoderState::Rpm);
    assert!(!wheel.decoder.position().has_position);
}

#[test]
fn even_decoder_cannot_follow_missing_tooth_wheel() {
    let config = DecoderConfig {
        kind: DecoderKind::TfiPip,
        ..cam_36_minus_1()
    };
    let mut wheel = Wheel::new(config);
    wheel.triggers(8, 25_000);
    assert_eq!(wheel.state(), DecoderState::Sync);
    assert_eq!(
        wheel.trigger(50_000),
        DecodeOutcome::LostSync(LossReason::Variation)
    );
}

#[test]
fn crank_wheel_waits_for_cam_pulse() {
    let mut wheel = missing_tooth_to_gap(DecoderConfig::missing_tooth_cam(36));
    assert!(!wheel.decoder.position().has_position);
    wheel.trigger(25_000);

    // Cam pulse during the first revolution of the cycle.
    assert_eq!(wheel.sync(5_000), DecodeOutcome::GainedSync);
    assert_eq!(wheel.decoder.position().last_trigger_angle, 10.0);
}

#[test]
fn crank_wheel_without_cam_never_syncs() {
    let mut wheel = missing_tooth_to_gap(DecoderConfig::missing_tooth_cam(36));
    wheel.triggers(34, 25_000);
    wheel.trigger(50_000);
    wheel.triggers(34, 25_000);
    wheel.trigger(50_000);

    assert_eq!(wheel.state(), DecoderState::Sync);
    assert!(!wheel.decoder.position().has_position);
}

/// Brings a 36-1 crank wheel plus cam to a position three teeth past the
/// first gap, with the cam pulse seen.
fn crank_wheel_with_cam() -> Wheel {
    let mut wheel = missing_tooth_to_gap(DecoderConfig::missing_tooth_cam(36));
    wheel.triggers(3, 25_000);
    assert_eq!(wheel.sync(5_000), DecodeOutcome::GainedSync);
    assert_eq!(wheel.decoder.position().last_trigger_angle, 30.0);
    wheel.trigger(20_000);
    wheel
}

#[test]
fn crank_wheel_second_revolution_starts_at_360() {
    let mut wheel = crank_wheel_with_cam();
    wheel.triggers(30, 25_000);
    assert_eq!(wheel.decoder.position().last_trigger_angle, 340.0);
    assert_eq!(wheel.trigger(50_000), DecodeOutcome::Unchanged);
    assert_eq!(wheel.decoder.position().last_trigger_angle, 360.0);
    wheel.triggers(3, 25_000);
    assert_eq!(wheel.decoder.position().last_trigger_angle, 390.0);
}

#[test]
fn crank_wheel_cam_pulse_two_revolutions_in_a_row_desyncs() {
    let mut wheel = crank_wheel_with_cam();
    wheel.triggers(30, 25_000);
    wheel.trigger(50_000);
    wheel.triggers(3, 25_000);

    assert_eq!(
        wheel.sync(5_000),
        DecodeOutcome::LostSync(LossReason::TriggerCountLow)
    );
    assert_eq!(wheel.state(), DecoderState::NoSync);
}

#[test]
fn crank_wheel_cam_that_stops_desyncs_after_two_revolutions() {
    let mut wheel = crank_wheel_with_cam();
    wheel.triggers(30, 25_000);
    assert_eq!(wheel.trigger(50_000), DecodeOutcome::Unchanged);
    wheel.triggers(34, 25_000);
    assert_eq!(wheel.trigger(50_000), DecodeOutcome::Unchanged);
    wheel.triggers(34, 25_000);

    assert_eq!(
        wheel.trigger(50_000),
        DecodeOutcome::LostSync(LossReason::TriggerCountHigh)
    );
}
