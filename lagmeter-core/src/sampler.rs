//! Threshold classification of analog samples.

use core::fmt;

/// Direction the signal moves when the stimulus is asserted.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Polarity {
    Rising,
    Falling,
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Polarity::Rising => f.write_str("rising"),
            Polarity::Falling => f.write_str("falling"),
        }
    }
}

/// Discriminating threshold produced by calibration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ThresholdSpec {
    pub threshold: i32,
    pub polarity: Polarity,
}

impl ThresholdSpec {
    #[must_use]
    pub const fn new(threshold: i32, polarity: Polarity) -> Self {
        Self {
            threshold,
            polarity,
        }
    }

    #[must_use]
    pub const fn rising(threshold: i32) -> Self {
        Self::new(threshold, Polarity::Rising)
    }

    #[must_use]
    pub const fn falling(threshold: i32) -> Self {
        Self::new(threshold, Polarity::Falling)
    }

    /// Strict comparison in the direction of `polarity`. A sample equal to
    /// the threshold never counts as crossed.
    #[must_use]
    pub fn crossed(&self, sample: u16) -> bool {
        let sample = i32::from(sample);
        match self.polarity {
            Polarity::Rising => sample > self.threshold,
            Polarity::Falling => sample < self.threshold,
        }
    }
}

impl fmt::Display for ThresholdSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.polarity, self.threshold)
    }
}

/// Observed excursion of a channel over a sampling window.
///
/// Values are signed so that a safety margin can push `min` below zero.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MinMaxRange {
    pub min: i32,
    pub max: i32,
}

impl MinMaxRange {
    #[must_use]
    pub const fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    /// Range covering a single sample.
    #[must_use]
    pub fn from_sample(sample: u16) -> Self {
        let value = i32::from(sample);
        Self::new(value, value)
    }

    /// Widens the range to include `sample`.
    pub fn include(&mut self, sample: u16) {
        let value = i32::from(sample);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Returns the range grown by `margin` on both ends.
    #[must_use]
    pub const fn widened(self, margin: i32) -> Self {
        Self::new(self.min - margin, self.max + margin)
    }

    /// Whether the two ranges share at least one value.
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.max >= other.min && self.min <= other.max
    }

    #[must_use]
    pub fn contains(&self, sample: u16) -> bool {
        let value = i32::from(sample);
        value >= self.min && value <= self.max
    }

    #[must_use]
    pub const fn span(&self) -> i32 {
        self.max - self.min
    }
}

impl fmt::Display for MinMaxRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

/// Analog converter resolution.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AdcConfig {
    /// Largest value a sample can take.
    pub max_sample: u16,
}

impl AdcConfig {
    /// Ten-bit converter.
    pub const TEN_BIT: Self = Self::new(1_023);

    #[must_use]
    pub const fn new(max_sample: u16) -> Self {
        Self { max_sample }
    }

    /// Full-scale range of the converter.
    #[must_use]
    pub const fn full_scale(&self) -> MinMaxRange {
        MinMaxRange::new(0, self.max_sample as i32)
    }
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self::TEN_BIT
    }
}
