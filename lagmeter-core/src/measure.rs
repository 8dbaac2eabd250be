//! Lag measurement loop.
//!
//! One invocation asserts the stimulus, arms the clock and polls the primary
//! channel until its threshold is crossed. Each poll iteration takes a fresh
//! sample, snapshots the tick count, polls the accuracy watchdog, checks the
//! abort input and checks the measurement counter for overflow. When several
//! of those conditions hold in the same iteration the outcome is resolved in
//! a fixed order: abort, then accuracy failure, then timeout, then crossing.
//!
//! The two-stage variant first waits, under the same checks, for a trigger
//! channel to exceed its own threshold. At that instant the measurement
//! counter is zeroed, so the result is the propagation time from the trigger
//! stage to the primary stage.

use core::fmt;

use crate::calibration::Calibration;
use crate::cancel::CancelToken;
use crate::clock::{AccuracyCheck, ArmedClock, ClockTicks, TimerHardware};
use crate::instrument::Instrument;
use crate::io::{AnalogInput, ChannelId, ControlInput, Stimulus, Timebase};
use crate::report::DiagnosticsSink;
use crate::sampler::ThresholdSpec;

/// Measurement outcomes that end a workflow.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MeasurementFailure {
    /// The measurement counter overflowed before the channel crossed.
    NoSignal,
    /// The poll loop was not re-entered within the accuracy window.
    AccuracyFailure,
}

impl fmt::Display for MeasurementFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementFailure::NoSignal => f.write_str("no signal"),
            MeasurementFailure::AccuracyFailure => f.write_str("accuracy exceeded"),
        }
    }
}

/// Result of one measurement invocation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MeasurementOutcome {
    Detected { millis: u32 },
    NoSignal,
    AccuracyFailure,
    Aborted,
}

impl MeasurementOutcome {
    /// Splits the outcome into a workflow-level result.
    ///
    /// # Errors
    ///
    /// Returns the [`MeasurementFailure`] for `NoSignal` and
    /// `AccuracyFailure`.
    pub fn into_result(self) -> Result<Option<u32>, MeasurementFailure> {
        match self {
            MeasurementOutcome::Detected { millis } => Ok(Some(millis)),
            MeasurementOutcome::Aborted => Ok(None),
            MeasurementOutcome::NoSignal => Err(MeasurementFailure::NoSignal),
            MeasurementOutcome::AccuracyFailure => Err(MeasurementFailure::AccuracyFailure),
        }
    }
}

impl fmt::Display for MeasurementOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementOutcome::Detected { millis } => write!(f, "{millis} ms"),
            MeasurementOutcome::NoSignal => f.write_str("no signal"),
            MeasurementOutcome::AccuracyFailure => f.write_str("accuracy exceeded"),
            MeasurementOutcome::Aborted => f.write_str("aborted"),
        }
    }
}

/// States of a single measurement.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MeasurementState {
    Idle,
    Armed,
    WaitingTrigger,
    Polling,
    Detected(ClockTicks),
    TimedOut,
    AccuracyFailed,
    Aborted,
}

impl MeasurementState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            MeasurementState::Detected(_)
                | MeasurementState::TimedOut
                | MeasurementState::AccuracyFailed
                | MeasurementState::Aborted
        )
    }

    /// Picks the terminal state for an iteration in which any of the stop
    /// conditions hold. Abort beats accuracy failure, which beats timeout.
    #[must_use]
    pub const fn resolve_stop(abort: bool, accuracy_exceeded: bool, timed_out: bool) -> Option<Self> {
        if abort {
            Some(MeasurementState::Aborted)
        } else if accuracy_exceeded {
            Some(MeasurementState::AccuracyFailed)
        } else if timed_out {
            Some(MeasurementState::TimedOut)
        } else {
            None
        }
    }
}

/// Trigger stage of a two-stage measurement.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TriggerStage {
    pub channel: ChannelId,
    pub spec: ThresholdSpec,
}

impl TriggerStage {
    /// Waits for `channel` to exceed `threshold`.
    #[must_use]
    pub const fn exceeding(channel: ChannelId, threshold: i32) -> Self {
        Self {
            channel,
            spec: ThresholdSpec::rising(threshold),
        }
    }
}

/// What a measurement watches.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LagProbe {
    pub channel: ChannelId,
    pub spec: ThresholdSpec,
    pub trigger: Option<TriggerStage>,
}

impl LagProbe {
    #[must_use]
    pub const fn new(channel: ChannelId, spec: ThresholdSpec) -> Self {
        Self {
            channel,
            spec,
            trigger: None,
        }
    }

    /// Probe on the calibrated channel.
    #[must_use]
    pub const fn from_calibration(calibration: &Calibration) -> Self {
        Self::new(calibration.channel, calibration.spec)
    }

    /// Adds a trigger stage that must fire before timing starts.
    #[must_use]
    pub const fn after(mut self, trigger: TriggerStage) -> Self {
        self.trigger = Some(trigger);
        self
    }
}

/// Measurement tunables.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MeasurementConfig {
    /// Results below this are returned unchanged but traced to diagnostics.
    pub plausibility_floor_ms: u32,
    /// Release the stimulus as soon as the loop ends.
    pub release_on_exit: bool,
}

impl MeasurementConfig {
    pub const DEFAULT_PLAUSIBILITY_FLOOR_MS: u32 = 5;
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            plausibility_floor_ms: Self::DEFAULT_PLAUSIBILITY_FLOOR_MS,
            release_on_exit: false,
        }
    }
}

/// Raw values of one measurement, kept for diagnostics.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MeasurementTrace {
    pub channel: ChannelId,
    pub spec: ThresholdSpec,
    pub ticks: Option<ClockTicks>,
    pub millis: Option<u32>,
    pub trigger_ticks: Option<ClockTicks>,
    pub trigger_sample: Option<u16>,
    pub crossing_sample: Option<u16>,
}

impl MeasurementTrace {
    #[must_use]
    pub const fn new(probe: &LagProbe) -> Self {
        Self {
            channel: probe.channel,
            spec: probe.spec,
            ticks: None,
            millis: None,
            trigger_ticks: None,
            trigger_sample: None,
            crossing_sample: None,
        }
    }
}

struct OptionalValue<T>(Option<T>);

impl<T: fmt::Display> fmt::Display for OptionalValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(value) => value.fmt(f),
            None => f.write_str("-"),
        }
    }
}

impl fmt::Display for MeasurementTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "ms={} ticks={}",
            OptionalValue(self.millis),
            OptionalValue(self.ticks)
        )?;
        writeln!(
            f,
            "trigger_ticks={} trigger_sample={}",
            OptionalValue(self.trigger_ticks),
            OptionalValue(self.trigger_sample)
        )?;
        write!(
            f,
            "channel={} crossing_sample={} threshold={}",
            self.channel,
            OptionalValue(self.crossing_sample),
            self.spec
        )
    }
}

pub(crate) enum Poll {
    Pending,
    Crossed { ticks: ClockTicks, sample: u16 },
    Stopped(MeasurementState),
}

/// One poll iteration against `spec` on `channel`.
pub(crate) fn poll_once<H, A, C>(
    clock: &mut ArmedClock<'_, H>,
    analog: &mut A,
    control: &mut C,
    token: &CancelToken,
    channel: ChannelId,
    spec: &ThresholdSpec,
) -> Poll
where
    H: TimerHardware,
    A: AnalogInput,
    C: ControlInput,
{
    let sample = analog.read(channel);
    let ticks = clock.elapsed_ticks();
    let accuracy = clock.poll_accuracy();
    let abort = token.is_cancelled() || control.abort_requested();
    let timed_out = clock.timed_out();

    if let Some(stop) =
        MeasurementState::resolve_stop(abort, accuracy == AccuracyCheck::Exceeded, timed_out)
    {
        return Poll::Stopped(stop);
    }
    if spec.crossed(sample) {
        Poll::Crossed { ticks, sample }
    } else {
        Poll::Pending
    }
}

impl<S, A, H, C, T> Instrument<S, A, H, C, T>
where
    S: Stimulus,
    A: AnalogInput,
    H: TimerHardware,
    C: ControlInput,
    T: Timebase,
{
    /// Runs one lag measurement.
    ///
    /// The stimulus is left asserted unless
    /// [`MeasurementConfig::release_on_exit`] is set. An abort latches
    /// `token` and waits for the abort key to be released. Results below the
    /// plausibility floor are traced to `diagnostics`.
    pub fn measure_lag<D>(
        &mut self,
        probe: &LagProbe,
        token: &CancelToken,
        diagnostics: &mut D,
    ) -> MeasurementOutcome
    where
        D: DiagnosticsSink,
    {
        let Self {
            stimulus,
            analog,
            timer,
            control,
            config,
            ..
        } = self;
        let mut trace = MeasurementTrace::new(probe);

        stimulus.assert();
        let state = {
            let mut clock = timer.arm();
            let mut state = MeasurementState::Armed;
            loop {
                state = match state {
                    MeasurementState::Idle | MeasurementState::Armed => {
                        if probe.trigger.is_some() {
                            MeasurementState::WaitingTrigger
                        } else {
                            MeasurementState::Polling
                        }
                    }
                    MeasurementState::WaitingTrigger => match probe.trigger {
                        Some(trigger) => {
                            match poll_once(&mut clock, analog, control, token, trigger.channel, &trigger.spec) {
                                Poll::Pending => MeasurementState::WaitingTrigger,
                                Poll::Crossed { ticks, .. } => {
                                    clock.restart_measurement();
                                    trace.trigger_ticks = Some(ticks);
                                    trace.trigger_sample = Some(analog.read(probe.channel));
                                    MeasurementState::Polling
                                }
                                Poll::Stopped(stop) => stop,
                            }
                        }
                        None => MeasurementState::Polling,
                    },
                    MeasurementState::Polling => {
                        match poll_once(&mut clock, analog, control, token, probe.channel, &probe.spec) {
                            Poll::Pending => MeasurementState::Polling,
                            Poll::Crossed { ticks, sample } => {
                                trace.crossing_sample = Some(sample);
                                MeasurementState::Detected(ticks)
                            }
                            Poll::Stopped(stop) => stop,
                        }
                    }
                    terminal => break terminal,
                };
            }
        };

        if config.measurement.release_on_exit {
            stimulus.release();
        }

        match state {
            MeasurementState::Detected(ticks) => {
                let millis = config.timer.ticks_to_millis(ticks);
                trace.ticks = Some(ticks);
                trace.millis = Some(millis);
                if millis < config.measurement.plausibility_floor_ms {
                    diagnostics.trace(&trace);
                }
                MeasurementOutcome::Detected { millis }
            }
            MeasurementState::AccuracyFailed => MeasurementOutcome::AccuracyFailure,
            MeasurementState::Aborted => {
                token.cancel();
                control.wait_release();
                MeasurementOutcome::Aborted
            }
            _ => MeasurementOutcome::NoSignal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_priority_is_abort_accuracy_timeout() {
        assert_eq!(
            MeasurementState::resolve_stop(true, true, true),
            Some(MeasurementState::Aborted)
        );
        assert_eq!(
            MeasurementState::resolve_stop(false, true, true),
            Some(MeasurementState::AccuracyFailed)
        );
        assert_eq!(
            MeasurementState::resolve_stop(false, false, true),
            Some(MeasurementState::TimedOut)
        );
        assert_eq!(MeasurementState::resolve_stop(false, false, false), None);
    }

    #[test]
    fn outcome_splits_into_workflow_result() {
        assert_eq!(
            MeasurementOutcome::Detected { millis: 42 }.into_result(),
            Ok(Some(42))
        );
        assert_eq!(MeasurementOutcome::Aborted.into_result(), Ok(None));
        assert_eq!(
            MeasurementOutcome::NoSignal.into_result(),
            Err(MeasurementFailure::NoSignal)
        );
    }

    #[test]
    fn trace_renders_missing_values_as_dashes() {
        let probe = LagProbe::new(ChannelId(2), ThresholdSpec::falling(175));
        let mut trace = MeasurementTrace::new(&probe);
        trace.ticks = Some(40);
        trace.millis = Some(3);
        trace.crossing_sample = Some(150);

        let mut text: heapless::String<160> = heapless::String::new();
        core::fmt::write(&mut text, format_args!("{trace}")).unwrap();
        assert_eq!(
            text.as_str(),
            "ms=3 ticks=40\ntrigger_ticks=- trigger_sample=-\nchannel=A2 crossing_sample=150 threshold=falling 175"
        );
    }
}
