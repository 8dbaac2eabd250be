//! TIM3/TIM14 pair behind the engine's dual-timer clock.
//!
//! TIM3 is the measurement counter and TIM14 the accuracy watchdog. Both are
//! 16-bit up-counters fed from the same timer clock with the same prescaler,
//! so the tick period is shared. Overflows are observed through the update
//! interrupt flag only; no timer interrupt is ever enabled.

use critical_section::RestoreState;
use embassy_stm32::Peri;
use embassy_stm32::pac::timer::TimCore;
use embassy_stm32::peripherals::{TIM3, TIM14};
use embassy_stm32::timer::low_level::Timer;
use lagmeter_core::clock::{ClockTicks, TimerConfig, TimerHardware};

/// Both counters, plus the interrupt state saved while armed.
pub struct Stm32DualTimer {
    measurement: Timer<'static, TIM3>,
    watchdog: Timer<'static, TIM14>,
    masked: Option<RestoreState>,
}

impl Stm32DualTimer {
    pub fn new(measurement: Peri<'static, TIM3>, watchdog: Peri<'static, TIM14>) -> Self {
        Self {
            measurement: Timer::new(measurement),
            watchdog: Timer::new(watchdog),
            masked: None,
        }
    }

    /// Input clock of both counters in hertz.
    pub fn clock_hz(&self) -> u32 {
        self.measurement.get_clock_frequency().0
    }
}

fn counter_top(bits: u8) -> u16 {
    if bits >= 16 {
        u16::MAX
    } else {
        (1u16 << bits) - 1
    }
}

fn restart(regs: TimCore, prescaler: u16, top: u16) {
    regs.cr1().modify(|w| w.set_cen(false));
    regs.psc().write_value(prescaler);
    regs.arr().write(|w| w.set_arr(top));
    // Latch the prescaler now instead of at the first overflow.
    regs.egr().write(|w| w.set_ug(true));
    regs.cnt().write(|w| w.set_cnt(0));
    clear_update(regs);
    regs.cr1().modify(|w| w.set_cen(true));
}

fn clear_update(regs: TimCore) {
    regs.sr().modify(|w| w.set_uif(false));
}

impl TimerHardware for Stm32DualTimer {
    fn suppress_interrupts(&mut self) {
        if self.masked.is_none() {
            // SAFETY: released exactly once in `restore_interrupts`.
            self.masked = Some(unsafe { critical_section::acquire() });
        }
    }

    fn restore_interrupts(&mut self) {
        if let Some(state) = self.masked.take() {
            // SAFETY: `state` came from the matching `acquire`.
            unsafe { critical_section::release(state) };
        }
    }

    fn start(&mut self, config: &TimerConfig) {
        let prescaler = u16::try_from(config.prescaler.saturating_sub(1)).unwrap_or(u16::MAX);
        restart(
            self.measurement.regs_core(),
            prescaler,
            counter_top(config.measurement_bits),
        );
        restart(
            self.watchdog.regs_core(),
            prescaler,
            counter_top(config.watchdog_bits),
        );
    }

    fn stop(&mut self) {
        self.measurement.regs_core().cr1().modify(|w| w.set_cen(false));
        self.watchdog.regs_core().cr1().modify(|w| w.set_cen(false));
    }

    fn measurement_count(&mut self) -> ClockTicks {
        ClockTicks::from(self.measurement.regs_core().cnt().read().cnt())
    }

    fn measurement_overflowed(&mut self) -> bool {
        self.measurement.regs_core().sr().read().uif()
    }

    fn reset_measurement(&mut self) {
        let regs = self.measurement.regs_core();
        regs.cnt().write(|w| w.set_cnt(0));
        clear_update(regs);
    }

    fn load_watchdog(&mut self, count: ClockTicks) {
        let count = u16::try_from(count).unwrap_or(u16::MAX);
        self.watchdog.regs_core().cnt().write(|w| w.set_cnt(count));
    }

    fn take_watchdog_overflow(&mut self) -> bool {
        let regs = self.watchdog.regs_core();
        let overflowed = regs.sr().read().uif();
        if overflowed {
            clear_update(regs);
        }
        overflowed
    }
}
