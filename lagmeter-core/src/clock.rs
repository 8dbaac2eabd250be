//! Dual-timer clock used by every timed measurement.
//!
//! Two hardware counters run from the same prescaled clock. The measurement
//! counter free-runs from the moment the stimulus is asserted and yields the
//! raw tick count of the interval. The watchdog counter is reloaded on every
//! poll so that it overflows once the accuracy window elapses; if that
//! overflow is ever observed, the polling loop was not re-entered quickly
//! enough and the measurement cannot be trusted.
//!
//! [`DualTimer::arm`] masks interrupts and returns an [`ArmedClock`] guard.
//! Dropping the guard stops both counters and restores the interrupt state
//! that was active before arming, on every exit path.

use core::fmt;

/// Raw count of measurement timer ticks.
pub type ClockTicks = u32;

/// Prescaler, counter widths and accuracy window of a dual-timer setup.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TimerConfig {
    /// Timer input clock in hertz.
    pub clock_hz: u32,
    /// Input clock divider shared by both counters.
    pub prescaler: u32,
    /// Width of the measurement counter in bits.
    pub measurement_bits: u8,
    /// Width of the watchdog counter in bits.
    pub watchdog_bits: u8,
    /// Longest tolerated gap between two accuracy polls.
    pub accuracy_window_us: u32,
}

impl TimerConfig {
    /// Default accuracy window (one millisecond).
    pub const DEFAULT_ACCURACY_WINDOW_US: u32 = 1_000;

    /// Creates a configuration with the default accuracy window.
    #[must_use]
    pub const fn new(clock_hz: u32, prescaler: u32, measurement_bits: u8, watchdog_bits: u8) -> Self {
        Self {
            clock_hz,
            prescaler,
            measurement_bits,
            watchdog_bits,
            accuracy_window_us: Self::DEFAULT_ACCURACY_WINDOW_US,
        }
    }

    /// 16 MHz AVR with a /1024 prescaler: 16-bit measurement counter,
    /// 8-bit watchdog, 64 µs ticks.
    #[must_use]
    pub const fn atmega328p() -> Self {
        Self::new(16_000_000, 1_024, 16, 8)
    }

    /// 64 MHz STM32G0 timers with a /4096 prescaler: two 16-bit counters,
    /// 64 µs ticks.
    #[must_use]
    pub const fn stm32g0() -> Self {
        Self::new(64_000_000, 4_096, 16, 16)
    }

    /// Returns a copy using a different accuracy window.
    #[must_use]
    pub const fn with_accuracy_window_us(mut self, window_us: u32) -> Self {
        self.accuracy_window_us = window_us;
        self
    }

    /// Returns a copy whose prescaler is derived from `clock_hz` so that one
    /// tick lasts as close to `tick_us` as the divider allows.
    #[must_use]
    pub fn with_tick_period(mut self, clock_hz: u32, tick_us: u32) -> Self {
        let prescaler = rounded_div(u64::from(clock_hz) * u64::from(tick_us), 1_000_000).max(1);
        self.clock_hz = clock_hz;
        self.prescaler = u32::try_from(prescaler).unwrap_or(u32::MAX);
        self
    }

    /// Tick period in nanoseconds, rounded to nearest.
    #[must_use]
    pub fn tick_period_ns(&self) -> u64 {
        rounded_div(u64::from(self.prescaler) * 1_000_000_000, self.hz())
    }

    /// Converts a tick count to microseconds, rounded to nearest.
    #[must_use]
    pub fn ticks_to_micros(&self, ticks: ClockTicks) -> u64 {
        rounded_div(
            self.scaled_ticks(u64::from(ticks)).saturating_mul(1_000_000),
            self.hz(),
        )
    }

    /// Converts a tick count to whole milliseconds, rounded to nearest.
    #[must_use]
    pub fn ticks_to_millis(&self, ticks: ClockTicks) -> u32 {
        let millis = rounded_div(self.scaled_ticks(u64::from(ticks)).saturating_mul(1_000), self.hz());
        u32::try_from(millis).unwrap_or(u32::MAX)
    }

    /// Converts microseconds to the nearest whole number of ticks.
    #[must_use]
    pub fn micros_to_ticks(&self, micros: u64) -> ClockTicks {
        let ticks = rounded_div(
            micros.saturating_mul(self.hz()),
            u64::from(self.prescaler.max(1)) * 1_000_000,
        );
        ClockTicks::try_from(ticks).unwrap_or(ClockTicks::MAX)
    }

    /// Converts milliseconds to the nearest whole number of ticks.
    #[must_use]
    pub fn millis_to_ticks(&self, millis: u32) -> ClockTicks {
        self.micros_to_ticks(u64::from(millis) * 1_000)
    }

    /// Number of ticks after which the measurement counter overflows.
    #[must_use]
    pub fn measurement_span(&self) -> u64 {
        1_u64 << self.measurement_bits.min(32)
    }

    /// Measurement counter span expressed in milliseconds.
    #[must_use]
    pub fn measurement_span_millis(&self) -> u32 {
        let millis = rounded_div(
            self.scaled_ticks(self.measurement_span()).saturating_mul(1_000),
            self.hz(),
        );
        u32::try_from(millis).unwrap_or(u32::MAX)
    }

    /// Number of ticks after which the watchdog counter overflows.
    #[must_use]
    pub fn watchdog_span(&self) -> u64 {
        1_u64 << self.watchdog_bits.min(32)
    }

    /// Accuracy window in whole ticks.
    ///
    /// Truncated to whole ticks, then held between one tick and the watchdog
    /// span. A window shorter than one tick therefore becomes one full tick.
    #[must_use]
    pub fn watchdog_window_ticks(&self) -> ClockTicks {
        let ticks = (u64::from(self.accuracy_window_us) * self.hz())
            / (u64::from(self.prescaler.max(1)) * 1_000_000);
        let ticks = ticks.clamp(1, self.watchdog_span());
        ClockTicks::try_from(ticks).unwrap_or(ClockTicks::MAX)
    }

    /// Value loaded into the watchdog counter so it overflows after
    /// [`watchdog_window_ticks`](Self::watchdog_window_ticks).
    #[must_use]
    pub fn watchdog_reload(&self) -> ClockTicks {
        let reload = self.watchdog_span() - u64::from(self.watchdog_window_ticks());
        ClockTicks::try_from(reload).unwrap_or(ClockTicks::MAX)
    }

    /// Clock cycles covered by `ticks`, saturating at `u64::MAX`.
    fn scaled_ticks(&self, ticks: u64) -> u64 {
        ticks.saturating_mul(u64::from(self.prescaler))
    }

    fn hz(&self) -> u64 {
        u64::from(self.clock_hz.max(1))
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self::atmega328p()
    }
}

impl fmt::Display for TimerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz /{} ({} ns ticks, {}-bit span {} ms, window {} us)",
            self.clock_hz,
            self.prescaler,
            self.tick_period_ns(),
            self.measurement_bits,
            self.measurement_span_millis(),
            self.accuracy_window_us
        )
    }
}

fn rounded_div(numerator: u64, denominator: u64) -> u64 {
    let denominator = denominator.max(1);
    numerator.saturating_add(denominator / 2) / denominator
}

/// Register-level access to the two counters and the interrupt mask.
///
/// Implementations drive real timer peripherals on the firmware and virtual
/// counters on the host. The engine only calls these through [`DualTimer`]
/// and [`ArmedClock`].
pub trait TimerHardware {
    /// Masks interrupts, remembering the previous mask state.
    fn suppress_interrupts(&mut self);

    /// Restores the mask state saved by [`suppress_interrupts`](Self::suppress_interrupts).
    fn restore_interrupts(&mut self);

    /// Programs both counters with the shared prescaler, zeroes them, clears
    /// pending overflow flags and starts counting.
    fn start(&mut self, config: &TimerConfig);

    /// Stops both counters.
    fn stop(&mut self);

    /// Current measurement counter value.
    fn measurement_count(&mut self) -> ClockTicks;

    /// Whether the measurement counter wrapped since it was started.
    fn measurement_overflowed(&mut self) -> bool;

    /// Zeroes the measurement counter without stopping it.
    fn reset_measurement(&mut self);

    /// Loads the watchdog counter with `count`.
    fn load_watchdog(&mut self, count: ClockTicks);

    /// Returns and clears the watchdog overflow flag.
    fn take_watchdog_overflow(&mut self) -> bool;
}

/// Result of a single accuracy poll.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AccuracyCheck {
    /// The previous poll happened within the accuracy window.
    Within,
    /// The watchdog overflowed since the previous poll.
    Exceeded,
}

/// Owns the timer hardware together with its configuration.
pub struct DualTimer<H> {
    hardware: H,
    config: TimerConfig,
}

impl<H> DualTimer<H>
where
    H: TimerHardware,
{
    /// Wraps `hardware` driven with `config`.
    #[must_use]
    pub const fn new(hardware: H, config: TimerConfig) -> Self {
        Self { hardware, config }
    }

    /// Active timer configuration.
    #[must_use]
    pub const fn config(&self) -> &TimerConfig {
        &self.config
    }

    /// Replaces the timer configuration for subsequent arms.
    pub fn set_config(&mut self, config: TimerConfig) {
        self.config = config;
    }

    /// Shared access to the underlying hardware.
    #[must_use]
    pub const fn hardware(&self) -> &H {
        &self.hardware
    }

    /// Exclusive access to the underlying hardware.
    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hardware
    }

    /// Masks interrupts, zeroes and starts both counters and loads the
    /// watchdog. The counters run until the returned guard is dropped.
    pub fn arm(&mut self) -> ArmedClock<'_, H> {
        let reload = self.config.watchdog_reload();
        self.hardware.suppress_interrupts();
        self.hardware.start(&self.config);
        self.hardware.load_watchdog(reload);
        ArmedClock {
            hardware: &mut self.hardware,
            config: &self.config,
            reload,
        }
    }
}

/// Running clock. Disarms on drop.
pub struct ArmedClock<'a, H>
where
    H: TimerHardware,
{
    hardware: &'a mut H,
    config: &'a TimerConfig,
    reload: ClockTicks,
}

impl<H> ArmedClock<'_, H>
where
    H: TimerHardware,
{
    /// Raw measurement count. Does not disarm.
    pub fn elapsed_ticks(&mut self) -> ClockTicks {
        self.hardware.measurement_count()
    }

    /// Checks the watchdog for an overflow since the last poll, then reloads
    /// it for the next accuracy window.
    pub fn poll_accuracy(&mut self) -> AccuracyCheck {
        let overflowed = self.hardware.take_watchdog_overflow();
        self.hardware.load_watchdog(self.reload);
        if overflowed {
            AccuracyCheck::Exceeded
        } else {
            AccuracyCheck::Within
        }
    }

    /// Whether the measurement counter overflowed.
    pub fn timed_out(&mut self) -> bool {
        self.hardware.measurement_overflowed()
    }

    /// Zeroes the measurement counter and restarts the accuracy window.
    pub fn restart_measurement(&mut self) {
        self.hardware.reset_measurement();
        self.hardware.load_watchdog(self.reload);
    }

    /// Configuration the clock was armed with.
    #[must_use]
    pub fn config(&self) -> &TimerConfig {
        self.config
    }
}

impl<H> Drop for ArmedClock<'_, H>
where
    H: TimerHardware,
{
    fn drop(&mut self) {
        self.hardware.stop();
        self.hardware.restore_interrupts();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingTimer {
        interrupts_masked: bool,
        running: bool,
        count: ClockTicks,
        watchdog: ClockTicks,
        watchdog_flag: bool,
        overflowed: bool,
        starts: u32,
    }

    impl TimerHardware for RecordingTimer {
        fn suppress_interrupts(&mut self) {
            self.interrupts_masked = true;
        }

        fn restore_interrupts(&mut self) {
            self.interrupts_masked = false;
        }

        fn start(&mut self, _config: &TimerConfig) {
            self.running = true;
            self.count = 0;
            self.watchdog_flag = false;
            self.overflowed = false;
            self.starts += 1;
        }

        fn stop(&mut self) {
            self.running = false;
        }

        fn measurement_count(&mut self) -> ClockTicks {
            self.count
        }

        fn measurement_overflowed(&mut self) -> bool {
            self.overflowed
        }

        fn reset_measurement(&mut self) {
            self.count = 0;
        }

        fn load_watchdog(&mut self, count: ClockTicks) {
            self.watchdog = count;
        }

        fn take_watchdog_overflow(&mut self) -> bool {
            core::mem::take(&mut self.watchdog_flag)
        }
    }

    #[test]
    fn atmega_ticks_are_sixty_four_micros() {
        let config = TimerConfig::atmega328p();
        assert_eq!(config.tick_period_ns(), 64_000);
        assert_eq!(config.ticks_to_micros(1), 64);
        assert_eq!(config.ticks_to_millis(703), 45);
        assert_eq!(config.measurement_span(), 65_536);
        assert_eq!(config.measurement_span_millis(), 4_194);
    }

    #[test]
    fn watchdog_window_truncates_to_whole_ticks() {
        let avr = TimerConfig::atmega328p();
        assert_eq!(avr.watchdog_window_ticks(), 15);
        assert_eq!(avr.watchdog_reload(), 241);

        let stm = TimerConfig::stm32g0();
        assert_eq!(stm.watchdog_window_ticks(), 15);
        assert_eq!(stm.watchdog_reload(), 65_521);

        let tiny = TimerConfig::atmega328p().with_accuracy_window_us(10);
        assert_eq!(tiny.watchdog_window_ticks(), 1);
    }

    #[test]
    fn conversions_round_trip_within_one_tick() {
        let configs = [
            TimerConfig::atmega328p(),
            TimerConfig::new(8_000_000, 1_024, 16, 8),
            TimerConfig::new(12_000_000, 1_024, 16, 8),
            TimerConfig::stm32g0(),
            TimerConfig::new(16_000_000, 256, 16, 16),
        ];

        for config in configs {
            for ticks in [0, 1, 2, 15, 16, 333, 1_000, 65_535] {
                let back = config.micros_to_ticks(config.ticks_to_micros(ticks));
                assert!(
                    back.abs_diff(ticks) <= 1,
                    "{config}: {ticks} ticks came back as {back}"
                );
            }
        }
    }

    #[test]
    fn wide_counters_saturate_instead_of_overflowing() {
        let config = TimerConfig::new(64_000_000, 65_536, 32, 16);
        assert_eq!(config.ticks_to_micros(ClockTicks::MAX), u64::MAX / 64_000_000);
        assert_eq!(config.ticks_to_millis(ClockTicks::MAX), u32::MAX);
        assert_eq!(config.measurement_span_millis(), u32::MAX);
        assert_eq!(config.ticks_to_micros(1), 1_024);
    }

    #[test]
    fn tick_period_is_derived_from_clock() {
        let config = TimerConfig::stm32g0().with_tick_period(16_000_000, 64);
        assert_eq!(config.prescaler, 1_024);
        assert_eq!(config.ticks_to_micros(10), 640);
    }

    #[test]
    fn guard_restores_interrupts_on_drop() {
        let mut timer = DualTimer::new(RecordingTimer::default(), TimerConfig::atmega328p());
        {
            let mut clock = timer.arm();
            assert_eq!(clock.elapsed_ticks(), 0);
            assert_eq!(clock.poll_accuracy(), AccuracyCheck::Within);
        }
        let hardware = timer.hardware();
        assert!(!hardware.interrupts_masked);
        assert!(!hardware.running);
        assert_eq!(hardware.starts, 1);
        assert_eq!(hardware.watchdog, 241);
    }

    #[test]
    fn accuracy_poll_reports_and_clears_overflow() {
        let mut timer = DualTimer::new(RecordingTimer::default(), TimerConfig::atmega328p());
        let mut clock = timer.arm();
        clock.hardware.watchdog_flag = true;
        clock.hardware.watchdog = 255;
        assert_eq!(clock.poll_accuracy(), AccuracyCheck::Exceeded);
        assert_eq!(clock.hardware.watchdog, 241);
        assert_eq!(clock.poll_accuracy(), AccuracyCheck::Within);
    }

    #[test]
    fn restart_zeroes_measurement_counter() {
        let mut timer = DualTimer::new(RecordingTimer::default(), TimerConfig::atmega328p());
        let mut clock = timer.arm();
        clock.hardware.count = 120;
        clock.restart_measurement();
        assert_eq!(clock.elapsed_ticks(), 0);
    }
}
