//! Hardware seams consumed by the engine.
//!
//! Firmware implements these over GPIO, ADC and the embassy timebase; the
//! emulator implements them over a simulated rig; tests use scripted mocks.

use core::fmt;
use core::ops::Add;
use core::time::Duration;

/// Index of an analog input channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ChannelId(pub u8);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A{}", self.0)
    }
}

/// Output line that simulates a button actuation.
pub trait Stimulus {
    /// Drives the line to its pressed state.
    fn assert(&mut self);

    /// Returns the line to its idle state.
    fn release(&mut self);
}

/// Analog sampling of a channel.
pub trait AnalogInput {
    /// Takes a fresh sample of `channel`.
    fn read(&mut self, channel: ChannelId) -> u16;
}

/// Direction reported by the operator keypad.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum KeyDirection {
    Left,
    Right,
    Up,
    Down,
    Select,
}

impl fmt::Display for KeyDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            KeyDirection::Left => "left",
            KeyDirection::Right => "right",
            KeyDirection::Up => "up",
            KeyDirection::Down => "down",
            KeyDirection::Select => "select",
        };
        f.write_str(label)
    }
}

/// Operator input observed while the engine is running.
pub trait ControlInput {
    /// Cheap check for a pending abort, called once per poll iteration.
    fn abort_requested(&mut self) -> bool;

    /// Key pressed since the last call, if any. Used between search rounds.
    fn direction(&mut self) -> Option<KeyDirection>;

    /// Blocks until the abort key has been let go.
    fn wait_release(&mut self) {}
}

/// Monotonic instant produced by a [`Timebase`].
pub trait MonotonicInstant: Copy + Ord + Add<Duration, Output = Self> {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// Wall clock used outside the armed measurement, where interrupts run.
pub trait Timebase {
    type Instant: MonotonicInstant;

    /// Current instant.
    fn now(&mut self) -> Self::Instant;
}

/// Microseconds since an arbitrary origin.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Micros(pub u64);

impl Add<Duration> for Micros {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        let delta = u64::try_from(rhs.as_micros()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(delta))
    }
}

impl MonotonicInstant for Micros {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

/// Source of the randomized hold between consecutive measurements.
pub trait WaitJitter {
    /// Picks a duration in `[min, max)`.
    fn pick(&mut self, min: Duration, max: Duration) -> Duration;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micros_saturate_instead_of_wrapping() {
        let later = Micros(1_500);
        assert_eq!(
            later.saturating_duration_since(Micros(500)),
            Duration::from_millis(1)
        );
        assert_eq!(Micros(10).saturating_duration_since(later), Duration::ZERO);
        assert_eq!(Micros(10) + Duration::from_millis(2), Micros(2_010));
    }
}
