//! Running statistics over a series of measurements.

use core::fmt;

/// Count, extremes and sum of the measured durations.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RunStatistics {
    count: u32,
    min: Option<u32>,
    max: Option<u32>,
    sum: u64,
}

impl RunStatistics {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            count: 0,
            min: None,
            max: None,
            sum: 0,
        }
    }

    pub fn record(&mut self, millis: u32) {
        self.count += 1;
        self.sum += u64::from(millis);
        self.min = Some(self.min.map_or(millis, |min| min.min(millis)));
        self.max = Some(self.max.map_or(millis, |max| max.max(millis)));
    }

    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    #[must_use]
    pub const fn min(&self) -> Option<u32> {
        self.min
    }

    #[must_use]
    pub const fn max(&self) -> Option<u32> {
        self.max
    }

    #[must_use]
    pub const fn sum(&self) -> u64 {
        self.sum
    }

    /// Integer average (`sum / count`), `None` before the first record.
    #[must_use]
    pub fn average(&self) -> Option<u32> {
        if self.count == 0 {
            return None;
        }
        u32::try_from(self.sum / u64::from(self.count)).ok()
    }

    /// Displays the min/max span, collapsed to one value when they agree.
    #[must_use]
    pub const fn span(&self) -> Span {
        Span {
            min: self.min,
            max: self.max,
        }
    }
}

/// `min-max` label of a [`RunStatistics`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Span {
    min: Option<u32>,
    max: Option<u32>,
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min, self.max) {
            (Some(min), Some(max)) if min != max => write!(f, "{min}-{max}"),
            (_, Some(max)) => write!(f, "{max}"),
            _ => f.write_str("-"),
        }
    }
}
