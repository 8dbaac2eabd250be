#![allow(dead_code)]

//! Virtual-time rig shared by the integration tests.
//!
//! Time only advances when the engine touches the rig: every analog read
//! costs `read_cost_us` and every timebase query costs `TIMEBASE_STEP_US`.
//! Counters are derived from the virtual clock with the armed timer config,
//! so tick arithmetic matches real hardware exactly.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use lagmeter_core::clock::{ClockTicks, TimerConfig, TimerHardware};
use lagmeter_core::config::EngineConfig;
use lagmeter_core::instrument::Instrument;
use lagmeter_core::io::{
    AnalogInput, ChannelId, ControlInput, KeyDirection, Micros, Stimulus, Timebase, WaitJitter,
};
use lagmeter_core::measure::MeasurementTrace;
use lagmeter_core::report::{DiagnosticsSink, ReportEvent, ReportSink};

pub const READ_COST_US: u64 = 100;
pub const TIMEBASE_STEP_US: u64 = 50;

pub const PHOTO: ChannelId = ChannelId(2);
pub const VIDEO: ChannelId = ChannelId(1);

/// How a channel responds to the stimulus.
#[derive(Clone, Copy, Debug)]
pub enum Signal {
    Constant(u16),
    /// Switches to `active` a per-press delay after each press and back
    /// to `idle` the same delay after the release.
    Follow {
        idle: u16,
        active: u16,
        delays_ms: &'static [u64],
        noise: u16,
    },
    /// Like `Follow`, but presses shorter than `min_press_ms` are ignored.
    Debounced {
        idle: u16,
        active: u16,
        delay_ms: u64,
        min_press_ms: u64,
    },
}

pub struct RigState {
    pub now_us: u64,
    pub read_cost_us: u64,
    /// Stimulus edges as `(time, pressed)`.
    pub edges: Vec<(u64, bool)>,
    channels: Vec<(ChannelId, Signal)>,
    pub abort_at_us: Option<u64>,
    pub keys: VecDeque<Option<KeyDirection>>,
    pub releases_waited: u32,
    pub interrupts_masked: bool,
    pub arms: u32,
    pub armed_at_us: Vec<u64>,
    timer: TimerConfig,
    running: bool,
    measurement_origin_us: u64,
    watchdog_loaded_at_us: u64,
    watchdog_count: ClockTicks,
}

impl RigState {
    fn ticks_since(&self, origin_us: u64) -> u64 {
        let elapsed = self.now_us.saturating_sub(origin_us);
        elapsed * u64::from(self.timer.clock_hz) / (u64::from(self.timer.prescaler) * 1_000_000)
    }

    fn level(&self, signal: Signal) -> u16 {
        let now = self.now_us;
        let last_press = self
            .edges
            .iter()
            .enumerate()
            .filter(|(_, (at, pressed))| *pressed && *at <= now)
            .map(|(index, (at, _))| (index, *at))
            .last();
        let press_number = |edge_index: usize| {
            self.edges[..edge_index]
                .iter()
                .filter(|(_, pressed)| *pressed)
                .count()
        };
        let release_after = |edge_index: usize| {
            self.edges[edge_index..]
                .iter()
                .find(|(at, pressed)| !*pressed && *at <= now)
                .map(|(at, _)| *at)
        };

        match signal {
            Signal::Constant(value) => value,
            Signal::Follow {
                idle,
                active,
                delays_ms,
                noise,
            } => {
                let on = last_press.is_some_and(|(index, pressed_at)| {
                    let delay = delays_ms[press_number(index) % delays_ms.len()] * 1_000;
                    now >= pressed_at + delay
                        && release_after(index).is_none_or(|released| now < released + delay)
                });
                let base = if on { active } else { idle };
                wobble(base, noise, now)
            }
            Signal::Debounced {
                idle,
                active,
                delay_ms,
                min_press_ms,
            } => {
                let on = last_press.is_some_and(|(index, pressed_at)| {
                    let released = release_after(index);
                    let held = released.unwrap_or(now) - pressed_at;
                    let delay = delay_ms * 1_000;
                    held >= min_press_ms * 1_000
                        && now >= pressed_at + delay
                        && released.is_none_or(|released| now < released + delay)
                });
                if on { active } else { idle }
            }
        }
    }
}

fn wobble(base: u16, noise: u16, now: u64) -> u16 {
    if noise == 0 {
        return base;
    }
    let span = u64::from(noise) * 2 + 1;
    let offset = (now / 131) % span;
    (u64::from(base) + offset).saturating_sub(u64::from(noise)) as u16
}

#[derive(Clone)]
pub struct Rig(Rc<RefCell<RigState>>);

impl Rig {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(RigState {
            now_us: 0,
            read_cost_us: READ_COST_US,
            edges: Vec::new(),
            channels: Vec::new(),
            abort_at_us: None,
            keys: VecDeque::new(),
            releases_waited: 0,
            interrupts_masked: false,
            arms: 0,
            armed_at_us: Vec::new(),
            timer: TimerConfig::atmega328p(),
            running: false,
            measurement_origin_us: 0,
            watchdog_loaded_at_us: 0,
            watchdog_count: 0,
        })))
    }

    pub fn with_channel(self, channel: ChannelId, signal: Signal) -> Self {
        self.0.borrow_mut().channels.push((channel, signal));
        self
    }

    pub fn state(&self) -> std::cell::RefMut<'_, RigState> {
        self.0.borrow_mut()
    }

    pub fn now_us(&self) -> u64 {
        self.0.borrow().now_us
    }

    pub fn interrupts_masked(&self) -> bool {
        self.0.borrow().interrupts_masked
    }

    pub fn stimulus_pressed(&self) -> bool {
        self.0.borrow().edges.last().is_some_and(|(_, pressed)| *pressed)
    }

    /// Durations of completed presses, in order.
    pub fn press_widths_us(&self) -> Vec<u64> {
        let state = self.0.borrow();
        let mut widths = Vec::new();
        let mut pressed_at = None;
        for (at, pressed) in &state.edges {
            match (pressed, pressed_at) {
                (true, None) => pressed_at = Some(*at),
                (false, Some(start)) => {
                    widths.push(at - start);
                    pressed_at = None;
                }
                _ => {}
            }
        }
        widths
    }

    pub fn instrument(&self, config: EngineConfig) -> RigInstrument {
        Instrument::new(
            RigStimulus(self.clone()),
            RigAnalog(self.clone()),
            RigTimer(self.clone()),
            RigControl(self.clone()),
            RigTimebase(self.clone()),
            config,
        )
    }
}

pub type RigInstrument = Instrument<RigStimulus, RigAnalog, RigTimer, RigControl, RigTimebase>;

pub struct RigStimulus(Rig);

impl Stimulus for RigStimulus {
    fn assert(&mut self) {
        let mut state = self.0.state();
        let now = state.now_us;
        if state.edges.last().is_none_or(|(_, pressed)| !*pressed) {
            state.edges.push((now, true));
        }
    }

    fn release(&mut self) {
        let mut state = self.0.state();
        let now = state.now_us;
        if state.edges.last().is_some_and(|(_, pressed)| *pressed) {
            state.edges.push((now, false));
        }
    }
}

pub struct RigAnalog(Rig);

impl AnalogInput for RigAnalog {
    fn read(&mut self, channel: ChannelId) -> u16 {
        let mut state = self.0.state();
        state.now_us += state.read_cost_us;
        let signal = state
            .channels
            .iter()
            .find(|(id, _)| *id == channel)
            .map(|(_, signal)| *signal)
            .unwrap_or(Signal::Constant(0));
        state.level(signal)
    }
}

pub struct RigTimer(Rig);

impl TimerHardware for RigTimer {
    fn suppress_interrupts(&mut self) {
        self.0.state().interrupts_masked = true;
    }

    fn restore_interrupts(&mut self) {
        self.0.state().interrupts_masked = false;
    }

    fn start(&mut self, config: &TimerConfig) {
        let mut state = self.0.state();
        let now = state.now_us;
        state.timer = *config;
        state.running = true;
        state.arms += 1;
        state.armed_at_us.push(now);
        state.measurement_origin_us = now;
        state.watchdog_loaded_at_us = now;
        state.watchdog_count = 0;
    }

    fn stop(&mut self) {
        self.0.state().running = false;
    }

    fn measurement_count(&mut self) -> ClockTicks {
        let state = self.0.state();
        let ticks = state.ticks_since(state.measurement_origin_us);
        (ticks % state.timer.measurement_span()) as ClockTicks
    }

    fn measurement_overflowed(&mut self) -> bool {
        let state = self.0.state();
        state.ticks_since(state.measurement_origin_us) >= state.timer.measurement_span()
    }

    fn reset_measurement(&mut self) {
        let mut state = self.0.state();
        state.measurement_origin_us = state.now_us;
    }

    fn load_watchdog(&mut self, count: ClockTicks) {
        let mut state = self.0.state();
        state.watchdog_loaded_at_us = state.now_us;
        state.watchdog_count = count;
    }

    fn take_watchdog_overflow(&mut self) -> bool {
        let state = self.0.state();
        let elapsed = state.ticks_since(state.watchdog_loaded_at_us);
        u64::from(state.watchdog_count) + elapsed >= state.timer.watchdog_span()
    }
}

pub struct RigControl(Rig);

impl ControlInput for RigControl {
    fn abort_requested(&mut self) -> bool {
        let state = self.0.state();
        state.abort_at_us.is_some_and(|at| state.now_us >= at)
    }

    fn direction(&mut self) -> Option<KeyDirection> {
        self.0.state().keys.pop_front().flatten()
    }

    fn wait_release(&mut self) {
        let mut state = self.0.state();
        state.abort_at_us = None;
        state.releases_waited += 1;
    }
}

pub struct RigTimebase(Rig);

impl Timebase for RigTimebase {
    type Instant = Micros;

    fn now(&mut self) -> Micros {
        let mut state = self.0.state();
        state.now_us += TIMEBASE_STEP_US;
        Micros(state.now_us)
    }
}

/// Always picks the shortest hold.
pub struct ShortestHold;

impl WaitJitter for ShortestHold {
    fn pick(&mut self, min: Duration, _max: Duration) -> Duration {
        min
    }
}

#[derive(Default)]
pub struct Recorder {
    pub events: Vec<ReportEvent>,
    pub traces: Vec<MeasurementTrace>,
}

impl Recorder {
    pub fn cycle_millis(&self) -> Vec<u32> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ReportEvent::CycleMeasured { millis, .. } => Some(*millis),
                _ => None,
            })
            .collect()
    }
}

impl ReportSink for Recorder {
    fn report(&mut self, event: &ReportEvent) {
        self.events.push(*event);
    }
}

impl DiagnosticsSink for Recorder {
    fn trace(&mut self, trace: &MeasurementTrace) {
        self.traces.push(*trace);
    }
}

pub fn photo_follow(delays_ms: &'static [u64]) -> Signal {
    Signal::Follow {
        idle: 700,
        active: 250,
        delays_ms,
        noise: 3,
    }
}

pub fn video_follow(delays_ms: &'static [u64]) -> Signal {
    Signal::Follow {
        idle: 40,
        active: 160,
        delays_ms,
        noise: 2,
    }
}
