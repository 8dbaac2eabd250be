//! The assembled lag meter: stimulus, channels, timers, keypad and timebase.

use crate::clock::{DualTimer, TimerConfig, TimerHardware};
use crate::config::EngineConfig;
use crate::io::{AnalogInput, ControlInput, Stimulus, Timebase};

/// Owns every collaborator the engine drives.
///
/// Measurement, calibration, search and workflow operations are implemented
/// on this type in their own modules.
pub struct Instrument<S, A, H, C, T> {
    pub(crate) stimulus: S,
    pub(crate) analog: A,
    pub(crate) timer: DualTimer<H>,
    pub(crate) control: C,
    pub(crate) timebase: T,
    pub(crate) config: EngineConfig,
}

impl<S, A, H, C, T> Instrument<S, A, H, C, T>
where
    S: Stimulus,
    A: AnalogInput,
    H: TimerHardware,
    C: ControlInput,
    T: Timebase,
{
    /// Assembles an instrument. The timer is driven with `config.timer`.
    pub fn new(stimulus: S, analog: A, timer: H, control: C, timebase: T, config: EngineConfig) -> Self {
        Self {
            stimulus,
            analog,
            timer: DualTimer::new(timer, config.timer),
            control,
            timebase,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replaces the configuration, including the timer setup.
    pub fn set_config(&mut self, config: EngineConfig) {
        self.timer.set_config(config.timer);
        self.config = config;
    }

    /// Replaces only the timer setup.
    pub fn set_timer_config(&mut self, timer: TimerConfig) {
        self.config.timer = timer;
        self.timer.set_config(timer);
    }

    pub fn stimulus_mut(&mut self) -> &mut S {
        &mut self.stimulus
    }

    pub fn analog_mut(&mut self) -> &mut A {
        &mut self.analog
    }

    pub fn timer_mut(&mut self) -> &mut DualTimer<H> {
        &mut self.timer
    }

    pub fn control_mut(&mut self) -> &mut C {
        &mut self.control
    }

    pub fn timebase_mut(&mut self) -> &mut T {
        &mut self.timebase
    }
}
