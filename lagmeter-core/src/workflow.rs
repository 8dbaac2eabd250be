//! Measurement workflows.
//!
//! A workflow calibrates the channels it needs, then repeats the lag
//! measurement for a fixed number of cycles. Between cycles the stimulus is
//! released and the channel must rest inside its released band for a
//! randomized hold, so consecutive cycles start at unrelated phases of the
//! downstream frame and poll clocks.
//!
//! Calibration rejections, `NoSignal`, accuracy failures and settle timeouts
//! end the workflow with a [`WorkflowError`]. An operator abort ends it with
//! [`WorkflowOutcome::Aborted`], which is not an error.

use core::fmt;
use core::time::Duration;

use crate::calibration::{Calibration, CalibrationError, ChannelKind, measure_ranges};
use crate::cancel::{CancelToken, Interruptible, abort_observed, pause};
use crate::clock::TimerHardware;
use crate::instrument::Instrument;
use crate::io::{AnalogInput, ChannelId, ControlInput, MonotonicInstant, Stimulus, Timebase, WaitJitter};
use crate::measure::{LagProbe, MeasurementFailure, TriggerStage};
use crate::report::{DiagnosticsSink, ReportEvent, ReportSink};
use crate::sampler::MinMaxRange;
use crate::stats::RunStatistics;

/// Operator-selectable workflows.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WorkflowKind {
    PhotoSensor,
    VideoLevel,
    VideoToDisplay,
    MinimumActuation,
    SensorMonitor,
}

impl WorkflowKind {
    pub const ALL: [WorkflowKind; 5] = [
        WorkflowKind::PhotoSensor,
        WorkflowKind::VideoLevel,
        WorkflowKind::VideoToDisplay,
        WorkflowKind::MinimumActuation,
        WorkflowKind::SensorMonitor,
    ];

    /// Short name used in menus and commands.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            WorkflowKind::PhotoSensor => "photo",
            WorkflowKind::VideoLevel => "video",
            WorkflowKind::VideoToDisplay => "display",
            WorkflowKind::MinimumActuation => "press",
            WorkflowKind::SensorMonitor => "monitor",
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Reasons a workflow ends early.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WorkflowError {
    Calibration(CalibrationError),
    Measurement(MeasurementFailure),
    /// The channel did not return to its released band within the settle
    /// watchdog.
    SignalWrong,
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowError::Calibration(error) => write!(f, "calibration: {error}"),
            WorkflowError::Measurement(failure) => failure.fmt(f),
            WorkflowError::SignalWrong => f.write_str("signal wrong"),
        }
    }
}

impl From<CalibrationError> for WorkflowError {
    fn from(error: CalibrationError) -> Self {
        WorkflowError::Calibration(error)
    }
}

impl From<MeasurementFailure> for WorkflowError {
    fn from(failure: MeasurementFailure) -> Self {
        WorkflowError::Measurement(failure)
    }
}

/// Normal end of a workflow.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WorkflowOutcome {
    Completed(RunStatistics),
    Aborted,
}

/// Release settle parameters.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SettleConfig {
    /// Upper bound on the whole settle wait.
    pub watchdog: Duration,
    /// Lower bound of the randomized hold.
    pub min_hold: Duration,
    /// Upper bound (exclusive) of the randomized hold.
    pub max_hold: Duration,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            watchdog: Duration::from_secs(4),
            min_hold: Duration::from_millis(70),
            max_hold: Duration::from_millis(150),
        }
    }
}

/// Cycle count and sensor monitor pacing.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WorkflowConfig {
    pub cycles: u32,
    /// Wait after each toggle before the monitor samples.
    pub monitor_lag: Duration,
    /// Gap between monitor samples.
    pub monitor_interval: Duration,
    pub monitor_samples: u32,
}

impl WorkflowConfig {
    pub const DEFAULT_CYCLES: u32 = 100;
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            cycles: Self::DEFAULT_CYCLES,
            monitor_lag: Duration::from_millis(150),
            monitor_interval: Duration::from_millis(500),
            monitor_samples: 3,
        }
    }
}

/// Per-run collaborators that are not part of the instrument.
pub struct WorkflowContext<'a, J, R, D> {
    pub token: &'a CancelToken,
    pub jitter: &'a mut J,
    pub report: &'a mut R,
    pub diagnostics: &'a mut D,
}

impl<'a, J, R, D> WorkflowContext<'a, J, R, D>
where
    J: WaitJitter,
    R: ReportSink,
    D: DiagnosticsSink,
{
    pub fn new(
        token: &'a CancelToken,
        jitter: &'a mut J,
        report: &'a mut R,
        diagnostics: &'a mut D,
    ) -> Self {
        Self {
            token,
            jitter,
            report,
            diagnostics,
        }
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
    /// Runs `kind` from a fresh cancellation state and reports how it ended.
    /// The stimulus is released afterwards.
    ///
    /// # Errors
    ///
    /// Propagates the error that ended the workflow, after reporting it.
    pub fn run_workflow<J, R, D>(
        &mut self,
        kind: WorkflowKind,
        ctx: &mut WorkflowContext<'_, J, R, D>,
    ) -> Result<WorkflowOutcome, WorkflowError>
    where
        J: WaitJitter,
        R: ReportSink,
        D: DiagnosticsSink,
    {
        ctx.token.reset();
        ctx.report.report(&ReportEvent::WorkflowStarted(kind));

        let result = match kind {
            WorkflowKind::PhotoSensor => self.measure_photo_sensor(ctx),
            WorkflowKind::VideoLevel => self.measure_video_level(ctx),
            WorkflowKind::VideoToDisplay => self.measure_video_to_display(ctx),
            WorkflowKind::MinimumActuation => self.run_minimum_actuation_search(ctx),
            WorkflowKind::SensorMonitor => Ok(self.run_sensor_monitor(ctx)),
        };
        self.stimulus.release();

        let event = match result {
            Ok(WorkflowOutcome::Completed(stats)) => ReportEvent::RunCompleted { kind, stats },
            Ok(WorkflowOutcome::Aborted) => ReportEvent::Aborted(kind),
            Err(error) => ReportEvent::Failed { kind, error },
        };
        ctx.report.report(&event);
        result
    }

    /// Calibrates the channel of `kind`, reporting the sampled ranges and the
    /// derived threshold.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Calibration`] when the ranges are rejected.
    pub fn calibrate<J, R, D>(
        &mut self,
        kind: ChannelKind,
        ctx: &mut WorkflowContext<'_, J, R, D>,
    ) -> Result<Interruptible<Calibration>, WorkflowError>
    where
        J: WaitJitter,
        R: ReportSink,
        D: DiagnosticsSink,
    {
        let channel = match kind {
            ChannelKind::PhotoSensor => self.config.channels.photo,
            ChannelKind::VideoLevel => self.config.channels.video,
        };
        ctx.report.report(&ReportEvent::Calibrating { kind, channel });

        let Interruptible::Completed(ranges) = measure_ranges(
            &mut self.stimulus,
            &mut self.analog,
            &mut self.timebase,
            &mut self.control,
            ctx.token,
            channel,
            &self.config.calibration,
        ) else {
            return Ok(Interruptible::Aborted);
        };
        ctx.report.report(&ReportEvent::RangesSampled { kind, ranges });

        let calibration = Calibration::derive(kind, channel, ranges, &self.config.calibration)?;
        ctx.report.report(&ReportEvent::Calibrated(calibration));
        Ok(Interruptible::Completed(calibration))
    }

    /// Releases the stimulus and waits until `channel` has stayed inside
    /// `band` for `hold` without interruption.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::SignalWrong`] when the settle watchdog
    /// expires first.
    pub fn settle_released(
        &mut self,
        channel: ChannelId,
        band: MinMaxRange,
        hold: Duration,
        token: &CancelToken,
    ) -> Result<Interruptible<()>, WorkflowError> {
        self.stimulus.release();
        let watchdog = self.config.settle.watchdog;
        let started = self.timebase.now();
        let mut steady_since = started;
        loop {
            let sample = self.analog.read(channel);
            let now = self.timebase.now();
            if !band.contains(sample) {
                steady_since = now;
            }
            if abort_observed(&mut self.control, token) {
                return Ok(Interruptible::Aborted);
            }
            if now.saturating_duration_since(steady_since) >= hold {
                return Ok(Interruptible::Completed(()));
            }
            if now.saturating_duration_since(started) > watchdog {
                return Err(WorkflowError::SignalWrong);
            }
        }
    }

    /// Photo sensor lag over the configured number of cycles.
    ///
    /// # Errors
    ///
    /// See [`run_workflow`](Self::run_workflow).
    pub fn measure_photo_sensor<J, R, D>(
        &mut self,
        ctx: &mut WorkflowContext<'_, J, R, D>,
    ) -> Result<WorkflowOutcome, WorkflowError>
    where
        J: WaitJitter,
        R: ReportSink,
        D: DiagnosticsSink,
    {
        let Interruptible::Completed(photo) = self.calibrate(ChannelKind::PhotoSensor, ctx)? else {
            return Ok(WorkflowOutcome::Aborted);
        };
        self.run_cycles(&LagProbe::from_calibration(&photo), &photo, ctx)
    }

    /// Video output lag over the configured number of cycles.
    ///
    /// # Errors
    ///
    /// See [`run_workflow`](Self::run_workflow).
    pub fn measure_video_level<J, R, D>(
        &mut self,
        ctx: &mut WorkflowContext<'_, J, R, D>,
    ) -> Result<WorkflowOutcome, WorkflowError>
    where
        J: WaitJitter,
        R: ReportSink,
        D: DiagnosticsSink,
    {
        let Interruptible::Completed(video) = self.calibrate(ChannelKind::VideoLevel, ctx)? else {
            return Ok(WorkflowOutcome::Aborted);
        };
        self.run_cycles(&LagProbe::from_calibration(&video), &video, ctx)
    }

    /// Display latency: time from the video level rising to the photo sensor
    /// reacting, over the configured number of cycles.
    ///
    /// # Errors
    ///
    /// See [`run_workflow`](Self::run_workflow).
    pub fn measure_video_to_display<J, R, D>(
        &mut self,
        ctx: &mut WorkflowContext<'_, J, R, D>,
    ) -> Result<WorkflowOutcome, WorkflowError>
    where
        J: WaitJitter,
        R: ReportSink,
        D: DiagnosticsSink,
    {
        let Interruptible::Completed(video) = self.calibrate(ChannelKind::VideoLevel, ctx)? else {
            return Ok(WorkflowOutcome::Aborted);
        };
        let Interruptible::Completed(photo) = self.calibrate(ChannelKind::PhotoSensor, ctx)? else {
            return Ok(WorkflowOutcome::Aborted);
        };
        let probe = LagProbe::from_calibration(&photo)
            .after(TriggerStage::exceeding(video.channel, video.spec.threshold));
        self.run_cycles(&probe, &photo, ctx)
    }

    /// Toggles the stimulus and reports raw photo samples until aborted.
    pub fn run_sensor_monitor<J, R, D>(
        &mut self,
        ctx: &mut WorkflowContext<'_, J, R, D>,
    ) -> WorkflowOutcome
    where
        J: WaitJitter,
        R: ReportSink,
        D: DiagnosticsSink,
    {
        let channel = self.config.channels.photo;
        let pacing = self.config.workflow;
        let mut pressed = false;
        loop {
            pressed = !pressed;
            if pressed {
                self.stimulus.assert();
            } else {
                self.stimulus.release();
            }
            ctx.report.report(&ReportEvent::StimulusToggled { pressed });
            if self.pause(pacing.monitor_lag, ctx.token).is_aborted() {
                return WorkflowOutcome::Aborted;
            }

            for _ in 0..pacing.monitor_samples {
                let sample = self.analog.read(channel);
                ctx.report.report(&ReportEvent::MonitorSample { channel, sample });
                if self.pause(pacing.monitor_interval, ctx.token).is_aborted() {
                    return WorkflowOutcome::Aborted;
                }
            }
        }
    }

    /// Abortable wait on the instrument's timebase.
    pub fn pause(&mut self, duration: Duration, token: &CancelToken) -> Interruptible<()> {
        pause(&mut self.timebase, &mut self.control, token, duration)
    }

    fn run_cycles<J, R, D>(
        &mut self,
        probe: &LagProbe,
        settle_on: &Calibration,
        ctx: &mut WorkflowContext<'_, J, R, D>,
    ) -> Result<WorkflowOutcome, WorkflowError>
    where
        J: WaitJitter,
        R: ReportSink,
        D: DiagnosticsSink,
    {
        let cycles = self.config.workflow.cycles;
        let settle = self.config.settle;
        let band = settle_on.released_band();
        let mut stats = RunStatistics::new();

        for cycle in 1..=cycles {
            let outcome = self.measure_lag(probe, ctx.token, &mut *ctx.diagnostics);
            let Some(millis) = outcome.into_result()? else {
                return Ok(WorkflowOutcome::Aborted);
            };
            stats.record(millis);
            ctx.report.report(&ReportEvent::CycleMeasured {
                cycle,
                cycles,
                millis,
                stats,
            });

            let hold = ctx.jitter.pick(settle.min_hold, settle.max_hold);
            if self
                .settle_released(settle_on.channel, band, hold, ctx.token)?
                .is_aborted()
            {
                return Ok(WorkflowOutcome::Aborted);
            }
        }
        Ok(WorkflowOutcome::Completed(stats))
    }
}
