#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Settle hold randomization for the firmware target.

use core::time::Duration;

use lagmeter_core::io::WaitJitter;

/// Uniform hold picker over a seeded [`fastrand::Rng`].
#[derive(Clone, Debug)]
pub struct SettleJitter(fastrand::Rng);

impl SettleJitter {
    pub fn with_seed(seed: u64) -> Self {
        Self(fastrand::Rng::with_seed(seed))
    }
}

impl WaitJitter for SettleJitter {
    fn pick(&mut self, min: Duration, max: Duration) -> Duration {
        let min_us = u64::try_from(min.as_micros()).unwrap_or(u64::MAX);
        let max_us = u64::try_from(max.as_micros()).unwrap_or(u64::MAX);
        if max_us <= min_us {
            return min;
        }
        Duration::from_micros(self.0.u64(min_us..max_us))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_stay_inside_the_requested_window() {
        let mut jitter = SettleJitter::with_seed(7);
        let min = Duration::from_millis(70);
        let max = Duration::from_millis(150);
        let mut distinct = 0;
        let mut previous = Duration::ZERO;
        for _ in 0..1_000 {
            let hold = jitter.pick(min, max);
            assert!(hold >= min && hold < max, "{hold:?}");
            if hold != previous {
                distinct += 1;
            }
            previous = hold;
        }
        assert!(distinct > 900);
    }

    #[test]
    fn equal_seeds_repeat_the_sequence() {
        let min = Duration::from_millis(70);
        let max = Duration::from_millis(150);
        let mut first = SettleJitter::with_seed(0x5EED);
        let mut second = SettleJitter::with_seed(0x5EED);
        for _ in 0..32 {
            assert_eq!(first.pick(min, max), second.pick(min, max));
        }
    }

    #[test]
    fn empty_window_returns_lower_bound() {
        let mut jitter = SettleJitter::with_seed(0);
        let min = Duration::from_millis(70);
        assert_eq!(jitter.pick(min, min), min);
        assert_eq!(jitter.pick(min, Duration::ZERO), min);
    }
}
