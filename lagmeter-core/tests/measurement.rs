mod common;

use common::{PHOTO, Recorder, Rig, Signal, VIDEO, photo_follow, video_follow};
use lagmeter_core::cancel::CancelToken;
use lagmeter_core::config::EngineConfig;
use lagmeter_core::measure::{LagProbe, MeasurementOutcome, TriggerStage};
use lagmeter_core::report::Discard;
use lagmeter_core::sampler::ThresholdSpec;

fn photo_probe() -> LagProbe {
    LagProbe::new(PHOTO, ThresholdSpec::falling(475))
}

#[test]
fn crossing_converts_snapshot_ticks_to_rounded_millis() {
    let rig = Rig::new().with_channel(PHOTO, photo_follow(&[45]));
    let mut config = EngineConfig::default();
    config.measurement.plausibility_floor_ms = u32::MAX;
    let mut instrument = rig.instrument(config);
    let token = CancelToken::new();
    let mut recorder = Recorder::default();

    let outcome = instrument.measure_lag(&photo_probe(), &token, &mut recorder);

    assert_eq!(outcome, MeasurementOutcome::Detected { millis: 45 });
    let trace = recorder.traces.last().expect("trace below floor");
    let ticks = trace.ticks.expect("ticks recorded");
    assert_eq!(trace.millis, Some(config.timer.ticks_to_millis(ticks)));
    assert!((703..=706).contains(&ticks), "ticks = {ticks}");
    assert!(trace.crossing_sample.is_some_and(|sample| sample < 475));
    assert!(!rig.interrupts_masked());
}

#[test]
fn stimulus_is_asserted_before_clock_is_armed() {
    let rig = Rig::new().with_channel(PHOTO, photo_follow(&[30]));
    let mut instrument = rig.instrument(EngineConfig::default());
    let token = CancelToken::new();

    instrument.measure_lag(&photo_probe(), &token, &mut Discard);

    let state = rig.state();
    assert_eq!(state.arms, 1);
    assert!(state.edges[0].1);
    assert!(state.edges[0].0 <= state.armed_at_us[0]);
}

#[test]
fn stimulus_stays_asserted_unless_configured() {
    let rig = Rig::new().with_channel(PHOTO, photo_follow(&[30]));
    let mut instrument = rig.instrument(EngineConfig::default());
    let token = CancelToken::new();
    instrument.measure_lag(&photo_probe(), &token, &mut Discard);
    assert!(rig.stimulus_pressed());

    let rig = Rig::new().with_channel(PHOTO, photo_follow(&[30]));
    let mut config = EngineConfig::default();
    config.measurement.release_on_exit = true;
    let mut instrument = rig.instrument(config);
    instrument.measure_lag(&photo_probe(), &token, &mut Discard);
    assert!(!rig.stimulus_pressed());
}

#[test]
fn silent_channel_times_out_after_counter_span() {
    let rig = Rig::new().with_channel(PHOTO, Signal::Constant(700));
    let mut instrument = rig.instrument(EngineConfig::default());
    let token = CancelToken::new();

    let outcome = instrument.measure_lag(&photo_probe(), &token, &mut Discard);

    assert_eq!(outcome, MeasurementOutcome::NoSignal);
    assert!(rig.now_us() >= 4_194_304);
    assert!(!rig.interrupts_masked());
}

#[test]
fn slow_polling_fails_accuracy_even_when_crossed() {
    let rig = Rig::new().with_channel(PHOTO, Signal::Constant(100));
    rig.state().read_cost_us = 2_000;
    let mut instrument = rig.instrument(EngineConfig::default());
    let token = CancelToken::new();

    let outcome = instrument.measure_lag(&photo_probe(), &token, &mut Discard);

    assert_eq!(outcome, MeasurementOutcome::AccuracyFailure);
    assert!(!token.is_cancelled());
    assert!(!rig.interrupts_masked());
}

#[test]
fn abort_beats_accuracy_failure() {
    let rig = Rig::new().with_channel(PHOTO, Signal::Constant(100));
    {
        let mut state = rig.state();
        state.read_cost_us = 2_000;
        state.abort_at_us = Some(0);
    }
    let mut instrument = rig.instrument(EngineConfig::default());
    let token = CancelToken::new();

    let outcome = instrument.measure_lag(&photo_probe(), &token, &mut Discard);

    assert_eq!(outcome, MeasurementOutcome::Aborted);
    assert!(token.is_cancelled());
    assert_eq!(rig.state().releases_waited, 1);
    assert!(!rig.interrupts_masked());
}

#[test]
fn abort_mid_measurement_unwinds_and_disarms() {
    let rig = Rig::new().with_channel(PHOTO, Signal::Constant(700));
    rig.state().abort_at_us = Some(10_000);
    let mut instrument = rig.instrument(EngineConfig::default());
    let token = CancelToken::new();

    let outcome = instrument.measure_lag(&photo_probe(), &token, &mut Discard);

    assert_eq!(outcome, MeasurementOutcome::Aborted);
    assert!(rig.now_us() < 11_000);
    assert!(!rig.interrupts_masked());
}

#[test]
fn latched_token_aborts_before_first_crossing() {
    let rig = Rig::new().with_channel(PHOTO, Signal::Constant(100));
    let mut instrument = rig.instrument(EngineConfig::default());
    let token = CancelToken::new();
    token.cancel();

    let outcome = instrument.measure_lag(&photo_probe(), &token, &mut Discard);

    assert_eq!(outcome, MeasurementOutcome::Aborted);
}

#[test]
fn trigger_stage_restarts_counter_at_trigger_crossing() {
    let rig = Rig::new()
        .with_channel(VIDEO, video_follow(&[20]))
        .with_channel(PHOTO, photo_follow(&[45]));
    let mut config = EngineConfig::default();
    config.measurement.plausibility_floor_ms = u32::MAX;
    let mut instrument = rig.instrument(config);
    let token = CancelToken::new();
    let mut recorder = Recorder::default();
    let probe = photo_probe().after(TriggerStage::exceeding(VIDEO, 100));

    let outcome = instrument.measure_lag(&probe, &token, &mut recorder);

    assert_eq!(outcome, MeasurementOutcome::Detected { millis: 25 });
    let trace = recorder.traces.last().expect("trace recorded");
    let trigger_ticks = trace.trigger_ticks.expect("trigger fired");
    assert!((312..=315).contains(&trigger_ticks), "trigger at {trigger_ticks}");
    assert!(trace.trigger_sample.is_some_and(|sample| sample > 475));
}

#[test]
fn silent_trigger_times_out() {
    let rig = Rig::new()
        .with_channel(VIDEO, Signal::Constant(40))
        .with_channel(PHOTO, photo_follow(&[45]));
    let mut instrument = rig.instrument(EngineConfig::default());
    let token = CancelToken::new();
    let probe = photo_probe().after(TriggerStage::exceeding(VIDEO, 100));

    let outcome = instrument.measure_lag(&probe, &token, &mut Discard);

    assert_eq!(outcome, MeasurementOutcome::NoSignal);
}

#[test]
fn implausibly_short_result_is_returned_and_traced() {
    let rig = Rig::new().with_channel(PHOTO, photo_follow(&[3]));
    let mut instrument = rig.instrument(EngineConfig::default());
    let token = CancelToken::new();
    let mut recorder = Recorder::default();

    let outcome = instrument.measure_lag(&photo_probe(), &token, &mut recorder);

    assert_eq!(outcome, MeasurementOutcome::Detected { millis: 3 });
    assert_eq!(recorder.traces.len(), 1);
    assert_eq!(recorder.traces[0].millis, Some(3));
}

#[test]
fn plausible_result_is_not_traced() {
    let rig = Rig::new().with_channel(PHOTO, photo_follow(&[45]));
    let mut instrument = rig.instrument(EngineConfig::default());
    let token = CancelToken::new();
    let mut recorder = Recorder::default();

    instrument.measure_lag(&photo_probe(), &token, &mut recorder);

    assert!(recorder.traces.is_empty());
}

#[test]
fn slow_polling_while_waiting_for_trigger_fails_accuracy() {
    let rig = Rig::new()
        .with_channel(VIDEO, Signal::Constant(40))
        .with_channel(PHOTO, Signal::Constant(100));
    rig.state().read_cost_us = 2_000;
    let mut instrument = rig.instrument(EngineConfig::default());
    let token = CancelToken::new();
    let mut recorder = Recorder::default();
    let probe = photo_probe().after(TriggerStage::exceeding(VIDEO, 100));

    let outcome = instrument.measure_lag(&probe, &token, &mut recorder);

    assert_eq!(outcome, MeasurementOutcome::AccuracyFailure);
    assert!(!token.is_cancelled());
    assert!(recorder.traces.is_empty());
    assert_eq!(rig.state().arms, 1);
    assert!(!rig.interrupts_masked());
}

#[test]
fn abort_while_waiting_for_trigger_latches_token() {
    let rig = Rig::new()
        .with_channel(VIDEO, Signal::Constant(40))
        .with_channel(PHOTO, photo_follow(&[45]));
    rig.state().abort_at_us = Some(10_000);
    let mut instrument = rig.instrument(EngineConfig::default());
    let token = CancelToken::new();
    let probe = photo_probe().after(TriggerStage::exceeding(VIDEO, 100));

    let outcome = instrument.measure_lag(&probe, &token, &mut Discard);

    assert_eq!(outcome, MeasurementOutcome::Aborted);
    assert!(token.is_cancelled());
    assert_eq!(rig.state().releases_waited, 1);
    assert!(rig.now_us() < 11_000);
    assert!(!rig.interrupts_masked());
}
