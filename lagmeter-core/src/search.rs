//! Minimum actuation time search.
//!
//! Each round presses the stimulus for a fixed pulse width and watches the
//! calibrated channel for a downstream reaction. The release is timed with
//! the same armed measurement counter that bounds the round, so the pulse
//! width is as exact as the tick period. The operator steps the width between
//! rounds and watches how long each width keeps being recognized; the
//! longest run before the first miss is kept per width.

use core::fmt;
use core::time::Duration;

use heapless::Vec;

use crate::calibration::{Calibration, ChannelKind};
use crate::cancel::{CancelToken, Interruptible};
use crate::clock::{ClockTicks, TimerHardware};
use crate::instrument::Instrument;
use crate::io::{AnalogInput, ChannelId, ControlInput, KeyDirection, MonotonicInstant, Stimulus, Timebase, WaitJitter};
use crate::measure::{MeasurementFailure, MeasurementState, Poll, poll_once};
use crate::report::{DiagnosticsSink, ReportEvent, ReportSink};
use crate::sampler::ThresholdSpec;
use crate::workflow::{WorkflowContext, WorkflowError, WorkflowOutcome};

/// Number of distinct pulse widths whose history is kept. Trying a new
/// width beyond this drops the record created first.
pub const MAX_WIDTH_RECORDS: usize = 32;

/// Search tunables.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SearchConfig {
    /// Pulse width of the first round.
    pub seed_width_ms: u32,
    /// How long a round waits for a reaction. Widths stay below it.
    pub ceiling_ms: u32,
    /// Width step of the left/right keys.
    pub fine_step_ms: u32,
    /// Width step of the up/down keys.
    pub coarse_step_ms: u32,
    /// Channel watched for the reaction.
    pub channel: ChannelKind,
}

impl SearchConfig {
    pub const DEFAULT: Self = Self {
        seed_width_ms: 15,
        ceiling_ms: 300,
        fine_step_ms: 1,
        coarse_step_ms: 10,
        channel: ChannelKind::PhotoSensor,
    };

    fn clamp_width(&self, width_ms: i64) -> u32 {
        let upper = i64::from(self.ceiling_ms.saturating_sub(1).max(1));
        u32::try_from(width_ms.clamp(1, upper)).unwrap_or(1)
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// History of one pulse width.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WidthRecord {
    pub width_ms: u32,
    pub rounds: u32,
    pub misses: u32,
    /// Longest time from the start of a streak to its first miss.
    pub longest_run: Duration,
}

impl WidthRecord {
    const fn new(width_ms: u32) -> Self {
        Self {
            width_ms,
            rounds: 0,
            misses: 0,
            longest_run: Duration::ZERO,
        }
    }
}

/// Summary of one search round.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SearchRound {
    pub round: u32,
    pub width_ms: u32,
    /// Time to the reaction, `None` when the round was missed.
    pub reaction_ms: Option<u32>,
    /// Consecutive reactions including this round.
    pub streak: u32,
    /// Time since the current streak started.
    pub streak_elapsed: Duration,
    /// Longest run recorded for this width so far.
    pub longest_run: Duration,
}

impl SearchRound {
    #[must_use]
    pub const fn reacted(&self) -> bool {
        self.reaction_ms.is_some()
    }
}

impl fmt::Display for SearchRound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ms #{}: ", self.width_ms, self.round)?;
        match self.reaction_ms {
            Some(millis) => write!(
                f,
                "reacted in {millis} ms, streak {} over {} ms",
                self.streak,
                self.streak_elapsed.as_millis()
            ),
            None => write!(
                f,
                "missed after {} ms (best {} ms)",
                self.streak_elapsed.as_millis(),
                self.longest_run.as_millis()
            ),
        }
    }
}

/// Result of applying an operator key to the search.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Adjustment {
    Width(u32),
    Unchanged,
    Exit,
}

/// Bookkeeping of a running search.
pub struct ActuationSearch<I> {
    config: SearchConfig,
    width_ms: u32,
    rounds: u32,
    streak: u32,
    streak_started: I,
    records: Vec<WidthRecord, MAX_WIDTH_RECORDS>,
}

impl<I> ActuationSearch<I>
where
    I: MonotonicInstant,
{
    #[must_use]
    pub fn new(config: SearchConfig, now: I) -> Self {
        Self {
            width_ms: config.clamp_width(i64::from(config.seed_width_ms)),
            config,
            rounds: 0,
            streak: 0,
            streak_started: now,
            records: Vec::new(),
        }
    }

    #[must_use]
    pub const fn width_ms(&self) -> u32 {
        self.width_ms
    }

    #[must_use]
    pub const fn streak(&self) -> u32 {
        self.streak
    }

    /// Per-width history in order of first use.
    #[must_use]
    pub fn records(&self) -> &[WidthRecord] {
        &self.records
    }

    #[must_use]
    pub fn record_for(&self, width_ms: u32) -> Option<&WidthRecord> {
        self.records.iter().find(|record| record.width_ms == width_ms)
    }

    /// Applies an operator key. A width change restarts the streak.
    pub fn adjust(&mut self, direction: KeyDirection, now: I) -> Adjustment {
        let fine = i64::from(self.config.fine_step_ms);
        let coarse = i64::from(self.config.coarse_step_ms);
        let delta = match direction {
            KeyDirection::Right => fine,
            KeyDirection::Left => -fine,
            KeyDirection::Up => coarse,
            KeyDirection::Down => -coarse,
            KeyDirection::Select => return Adjustment::Exit,
        };
        let width_ms = self.config.clamp_width(i64::from(self.width_ms) + delta);
        if width_ms == self.width_ms {
            return Adjustment::Unchanged;
        }
        self.width_ms = width_ms;
        self.streak = 0;
        self.streak_started = now;
        Adjustment::Width(width_ms)
    }

    /// Records the result of a round at the current width.
    pub fn record_round(&mut self, reaction_ms: Option<u32>, now: I) -> SearchRound {
        self.rounds += 1;
        let elapsed = now.saturating_duration_since(self.streak_started);
        let record = width_entry(&mut self.records, self.width_ms);

        let longest_run = if reaction_ms.is_some() {
            self.streak += 1;
            if let Some(record) = record {
                record.rounds += 1;
                record.longest_run
            } else {
                Duration::ZERO
            }
        } else {
            self.streak = 0;
            self.streak_started = now;
            if let Some(record) = record {
                record.rounds += 1;
                record.misses += 1;
                record.longest_run = record.longest_run.max(elapsed);
                record.longest_run
            } else {
                elapsed
            }
        };

        SearchRound {
            round: self.rounds,
            width_ms: self.width_ms,
            reaction_ms,
            streak: self.streak,
            streak_elapsed: elapsed,
            longest_run,
        }
    }
}

/// Record for `width_ms`, created on first use.
fn width_entry(
    records: &mut Vec<WidthRecord, MAX_WIDTH_RECORDS>,
    width_ms: u32,
) -> Option<&mut WidthRecord> {
    if let Some(index) = records.iter().position(|record| record.width_ms == width_ms) {
        return records.get_mut(index);
    }
    if records.is_full() {
        records.remove(0);
    }
    records.push(WidthRecord::new(width_ms)).ok()?;
    records.last_mut()
}

/// Outcome of a single actuation round.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Actuation {
    Reacted { millis: u32 },
    Missed,
    Aborted,
    AccuracyFailure,
}

impl<S, A, H, C, T> Instrument<S, A, H, C, T>
where
    S: Stimulus,
    A: AnalogInput,
    H: TimerHardware,
    C: ControlInput,
    T: Timebase,
{
    /// Presses the stimulus for `width_ms` and waits up to the search ceiling
    /// for `spec` to cross on `channel`.
    pub fn actuate(
        &mut self,
        channel: ChannelId,
        spec: &ThresholdSpec,
        width_ms: u32,
        token: &CancelToken,
    ) -> Actuation {
        let Self {
            stimulus,
            analog,
            timer,
            control,
            config,
            ..
        } = self;
        let release_at: ClockTicks = config.timer.millis_to_ticks(width_ms);
        let ceiling: ClockTicks = config.timer.millis_to_ticks(config.search.ceiling_ms);
        let mut released = false;

        stimulus.assert();
        let state = {
            let mut clock = timer.arm();
            loop {
                let poll = poll_once(&mut clock, analog, control, token, channel, spec);
                let ticks = clock.elapsed_ticks();
                if !released && ticks >= release_at {
                    stimulus.release();
                    released = true;
                }
                match poll {
                    Poll::Stopped(stop) => break stop,
                    Poll::Crossed { ticks, .. } => break MeasurementState::Detected(ticks),
                    Poll::Pending if ticks >= ceiling => break MeasurementState::TimedOut,
                    Poll::Pending => {}
                }
            }
        };
        if !released {
            stimulus.release();
        }

        match state {
            MeasurementState::Detected(ticks) => Actuation::Reacted {
                millis: config.timer.ticks_to_millis(ticks),
            },
            MeasurementState::AccuracyFailed => Actuation::AccuracyFailure,
            MeasurementState::Aborted => {
                token.cancel();
                control.wait_release();
                Actuation::Aborted
            }
            _ => Actuation::Missed,
        }
    }

    /// Calibrates the search channel, then runs actuation rounds until the
    /// operator leaves with select or abort.
    ///
    /// # Errors
    ///
    /// Fails on a rejected calibration, an accuracy failure during a round
    /// or a settle timeout.
    pub fn run_minimum_actuation_search<J, R, D>(
        &mut self,
        ctx: &mut WorkflowContext<'_, J, R, D>,
    ) -> Result<WorkflowOutcome, WorkflowError>
    where
        J: WaitJitter,
        R: ReportSink,
        D: DiagnosticsSink,
    {
        let kind = self.config.search.channel;
        let Interruptible::Completed(calibration) = self.calibrate(kind, ctx)? else {
            return Ok(WorkflowOutcome::Aborted);
        };
        self.search_with(&calibration, ctx)
    }

    fn search_with<J, R, D>(
        &mut self,
        calibration: &Calibration,
        ctx: &mut WorkflowContext<'_, J, R, D>,
    ) -> Result<WorkflowOutcome, WorkflowError>
    where
        J: WaitJitter,
        R: ReportSink,
        D: DiagnosticsSink,
    {
        let band = calibration.released_band();
        let settle = self.config.settle;
        let now = self.timebase.now();
        let mut search = ActuationSearch::new(self.config.search, now);
        ctx.report.report(&ReportEvent::WidthChanged {
            width_ms: search.width_ms(),
        });

        loop {
            if ctx.token.is_cancelled() {
                return Ok(WorkflowOutcome::Aborted);
            }
            if let Some(direction) = self.control.direction() {
                let now = self.timebase.now();
                match search.adjust(direction, now) {
                    Adjustment::Exit => {
                        ctx.token.cancel();
                        return Ok(WorkflowOutcome::Aborted);
                    }
                    Adjustment::Width(width_ms) => {
                        ctx.report.report(&ReportEvent::WidthChanged { width_ms });
                    }
                    Adjustment::Unchanged => {}
                }
            }

            let reaction_ms = match self.actuate(
                calibration.channel,
                &calibration.spec,
                search.width_ms(),
                ctx.token,
            ) {
                Actuation::Reacted { millis } => Some(millis),
                Actuation::Missed => None,
                Actuation::Aborted => return Ok(WorkflowOutcome::Aborted),
                Actuation::AccuracyFailure => {
                    return Err(WorkflowError::Measurement(
                        MeasurementFailure::AccuracyFailure,
                    ));
                }
            };
            let now = self.timebase.now();
            let round = search.record_round(reaction_ms, now);
            ctx.report.report(&ReportEvent::SearchRound(round));

            let hold = ctx.jitter.pick(settle.min_hold, settle.max_hold);
            if self
                .settle_released(calibration.channel, band, hold, ctx.token)?
                .is_aborted()
            {
                return Ok(WorkflowOutcome::Aborted);
            }
        }
    }
}
