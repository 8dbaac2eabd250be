//! Threshold calibration.
//!
//! The stimulus is driven through one press/release cycle. For each state the
//! channel is left to settle, then its min/max excursion is sampled over a
//! fixed window and widened by a safety margin. The two ranges yield the
//! discriminating threshold and the direction the signal moves on a press.
//!
//! Photo sensors are judged on their full ranges, which must not overlap.
//! Video levels only carry information in their peaks (the blanking interval
//! pulls every frame back to black), so only the maxima are compared.

use core::fmt;
use core::time::Duration;

use crate::cancel::{CancelToken, Interruptible, abort_observed, pause};
use crate::io::{AnalogInput, ChannelId, ControlInput, MonotonicInstant, Stimulus, Timebase};
use crate::sampler::{MinMaxRange, Polarity, ThresholdSpec};

/// How a channel's ranges are compared.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChannelKind {
    PhotoSensor,
    VideoLevel,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::PhotoSensor => f.write_str("photo"),
            ChannelKind::VideoLevel => f.write_str("video"),
        }
    }
}

/// Reasons a calibration is rejected.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CalibrationError {
    /// Pressed and released photo ranges share values.
    RangesOverlap,
    /// Video peak moved less than the configured separation.
    SignalTooWeak,
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationError::RangesOverlap => f.write_str("ranges overlap"),
            CalibrationError::SignalTooWeak => f.write_str("signal too weak"),
        }
    }
}

/// Timing and acceptance parameters of a calibration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CalibrationConfig {
    /// Time allowed for the chain to react before sampling starts.
    pub settle: Duration,
    /// Length of each sampling window.
    pub window: Duration,
    /// Amount each range is widened by after sampling.
    pub margin: i32,
    /// Smallest accepted difference between pressed and released video peaks.
    pub min_video_separation: i32,
}

impl CalibrationConfig {
    pub const DEFAULT_SETTLE: Duration = Duration::from_millis(500);
    pub const DEFAULT_WINDOW: Duration = Duration::from_millis(1_500);
    pub const DEFAULT_MARGIN: i32 = 1;
    pub const DEFAULT_MIN_VIDEO_SEPARATION: i32 = 20;

    #[must_use]
    pub const fn new(settle: Duration, window: Duration) -> Self {
        Self {
            settle,
            window,
            margin: Self::DEFAULT_MARGIN,
            min_video_separation: Self::DEFAULT_MIN_VIDEO_SEPARATION,
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SETTLE, Self::DEFAULT_WINDOW)
    }
}

/// Pressed and released ranges of one channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RangePair {
    pub on: MinMaxRange,
    pub off: MinMaxRange,
}

impl RangePair {
    /// Difference between the pressed and released peaks.
    #[must_use]
    pub const fn peak_separation(&self) -> i32 {
        self.on.max - self.off.max
    }
}

/// Accepted calibration of a channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Calibration {
    pub kind: ChannelKind,
    pub channel: ChannelId,
    pub on: MinMaxRange,
    pub off: MinMaxRange,
    pub spec: ThresholdSpec,
}

impl Calibration {
    /// Validates `ranges` for `kind` and derives the threshold.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError::RangesOverlap`] when photo ranges overlap
    /// and [`CalibrationError::SignalTooWeak`] when the video peaks are too
    /// close.
    pub fn derive(
        kind: ChannelKind,
        channel: ChannelId,
        ranges: RangePair,
        config: &CalibrationConfig,
    ) -> Result<Self, CalibrationError> {
        let spec = derive_threshold(kind, ranges, config)?;
        Ok(Self {
            kind,
            channel,
            on: ranges.on,
            off: ranges.off,
            spec,
        })
    }

    /// Values the channel shows once the chain has returned to rest.
    #[must_use]
    pub const fn released_band(&self) -> MinMaxRange {
        match self.kind {
            ChannelKind::PhotoSensor => self.off,
            ChannelKind::VideoLevel => MinMaxRange::new(0, self.off.max),
        }
    }
}

/// Derives the threshold separating `ranges`.
///
/// # Errors
///
/// See [`Calibration::derive`].
pub fn derive_threshold(
    kind: ChannelKind,
    ranges: RangePair,
    config: &CalibrationConfig,
) -> Result<ThresholdSpec, CalibrationError> {
    let RangePair { on, off } = ranges;
    match kind {
        ChannelKind::PhotoSensor => {
            if on.overlaps(&off) {
                return Err(CalibrationError::RangesOverlap);
            }
            if on.max < off.min {
                Ok(ThresholdSpec::new(midpoint(on.max, off.min), Polarity::Falling))
            } else {
                Ok(ThresholdSpec::new(midpoint(off.max, on.min), Polarity::Rising))
            }
        }
        ChannelKind::VideoLevel => {
            if ranges.peak_separation() < config.min_video_separation {
                return Err(CalibrationError::SignalTooWeak);
            }
            Ok(ThresholdSpec::new(midpoint(on.max, off.max), Polarity::Rising))
        }
    }
}

const fn midpoint(low: i32, high: i32) -> i32 {
    (low + high) / 2
}

/// Samples `channel` for `window` and returns its excursion widened by
/// `margin`.
pub fn sample_range<A, T, C>(
    analog: &mut A,
    timebase: &mut T,
    control: &mut C,
    token: &CancelToken,
    channel: ChannelId,
    window: Duration,
    margin: i32,
) -> Interruptible<MinMaxRange>
where
    A: AnalogInput,
    T: Timebase,
    C: ControlInput,
{
    let started = timebase.now();
    let mut range = MinMaxRange::from_sample(analog.read(channel));
    loop {
        range.include(analog.read(channel));
        if abort_observed(control, token) {
            return Interruptible::Aborted;
        }
        if timebase.now().saturating_duration_since(started) >= window {
            return Interruptible::Completed(range.widened(margin));
        }
    }
}

/// Drives the stimulus through one press/release cycle and samples the
/// pressed and released ranges of `channel`. Leaves the stimulus released.
pub fn measure_ranges<S, A, T, C>(
    stimulus: &mut S,
    analog: &mut A,
    timebase: &mut T,
    control: &mut C,
    token: &CancelToken,
    channel: ChannelId,
    config: &CalibrationConfig,
) -> Interruptible<RangePair>
where
    S: Stimulus,
    A: AnalogInput,
    T: Timebase,
    C: ControlInput,
{
    let mut sample_state = |stimulus: &mut S, pressed: bool| {
        if pressed {
            stimulus.assert();
        } else {
            stimulus.release();
        }
        if pause(timebase, control, token, config.settle).is_aborted() {
            return Interruptible::Aborted;
        }
        sample_range(
            analog,
            timebase,
            control,
            token,
            channel,
            config.window,
            config.margin,
        )
    };

    let Interruptible::Completed(on) = sample_state(stimulus, true) else {
        stimulus.release();
        return Interruptible::Aborted;
    };
    let Interruptible::Completed(off) = sample_state(stimulus, false) else {
        return Interruptible::Aborted;
    };
    Interruptible::Completed(RangePair { on, off })
}
