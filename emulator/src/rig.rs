//! Simulated controller and display chain driven by the real engine.
//!
//! A press is registered by the controller at its next poll once it has been
//! held for the debounce time. The game reacts on the frame boundary after
//! its pipeline depth, which is when the video level changes; the panel then
//! shows it after the display lag, which is when the photo sensor changes.
//! Releases travel the same path. Frame and poll phases make consecutive
//! measurements differ the way they do on real hardware.
//!
//! The rig runs either on the host clock, for interactive sessions, or on a
//! virtual clock that advances only when the engine samples or asks for the
//! time, which makes transcripts reproducible and fast.

use std::cell::{RefCell, RefMut};
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use lagmeter_core::clock::{ClockTicks, TimerConfig, TimerHardware};
use lagmeter_core::config::{ChannelMap, EngineConfig};
use lagmeter_core::instrument::Instrument;
use lagmeter_core::io::{
    AnalogInput, ChannelId, ControlInput, KeyDirection, Micros, Stimulus, Timebase, WaitJitter,
};

use crate::keys::{Key, KeySource};

/// Frame period of the simulated 60 Hz output.
pub const FRAME_US: u64 = 16_667;
/// Virtual time consumed by one timebase query.
const TIMEBASE_STEP_US: u64 = 50;
/// Keypad ladder reading with no key down.
const KEYPAD_IDLE: u16 = 1_023;
/// Presses old enough to have left the chain are forgotten.
const PRESS_HISTORY: usize = 4;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Levels {
    pub idle: u16,
    pub active: u16,
}

/// Behaviour of the simulated chain.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RigProfile {
    pub name: &'static str,
    pub summary: &'static str,
    pub photo: Levels,
    pub video: Levels,
    /// Peak sample noise on every channel.
    pub noise: u16,
    /// Controller input poll period.
    pub poll_us: u64,
    /// Shortest press the controller accepts.
    pub min_press_us: u64,
    /// Frames between registration and the video change.
    pub pipeline_frames: u64,
    /// Panel processing and response time.
    pub display_lag_us: u64,
    /// Time one analog conversion takes.
    pub read_cost_us: u64,
}

pub const PROFILES: &[RigProfile] = &[
    RigProfile {
        name: "lcd",
        summary: "gaming monitor, 250 Hz controller",
        photo: Levels {
            idle: 720,
            active: 260,
        },
        video: Levels {
            idle: 40,
            active: 180,
        },
        noise: 4,
        poll_us: 4_000,
        min_press_us: 8_000,
        pipeline_frames: 2,
        display_lag_us: 12_000,
        read_cost_us: 110,
    },
    RigProfile {
        name: "crt",
        summary: "CRT with a 1 kHz controller",
        photo: Levels {
            idle: 690,
            active: 180,
        },
        video: Levels {
            idle: 35,
            active: 200,
        },
        noise: 3,
        poll_us: 1_000,
        min_press_us: 2_000,
        pipeline_frames: 1,
        display_lag_us: 1_000,
        read_cost_us: 110,
    },
    RigProfile {
        name: "tv",
        summary: "TV outside game mode, 125 Hz controller",
        photo: Levels {
            idle: 760,
            active: 310,
        },
        video: Levels {
            idle: 45,
            active: 170,
        },
        noise: 6,
        poll_us: 8_000,
        min_press_us: 16_000,
        pipeline_frames: 4,
        display_lag_us: 35_000,
        read_cost_us: 110,
    },
    RigProfile {
        name: "weak",
        summary: "video tap too faint to calibrate",
        photo: Levels {
            idle: 720,
            active: 260,
        },
        video: Levels {
            idle: 40,
            active: 52,
        },
        noise: 4,
        poll_us: 4_000,
        min_press_us: 8_000,
        pipeline_frames: 2,
        display_lag_us: 12_000,
        read_cost_us: 110,
    },
    RigProfile {
        name: "slow-adc",
        summary: "converter slower than the accuracy window",
        photo: Levels {
            idle: 720,
            active: 260,
        },
        video: Levels {
            idle: 40,
            active: 180,
        },
        noise: 4,
        poll_us: 4_000,
        min_press_us: 8_000,
        pipeline_frames: 2,
        display_lag_us: 12_000,
        read_cost_us: 1_500,
    },
];

impl RigProfile {
    pub fn from_tag(tag: &str) -> Result<Self, String> {
        PROFILES
            .iter()
            .find(|profile| profile.name.eq_ignore_ascii_case(tag))
            .copied()
            .ok_or_else(|| format!("Unknown rig profile `{tag}`"))
    }

    fn registered_at(&self, edge_us: u64) -> u64 {
        ceil_to(edge_us, self.poll_us)
    }

    /// When the video level follows an input registered at `registered_us`.
    pub fn video_at(&self, registered_us: u64) -> u64 {
        ceil_to(registered_us + self.pipeline_frames * FRAME_US, FRAME_US)
    }

    /// When the panel follows an input registered at `registered_us`.
    pub fn photo_at(&self, registered_us: u64) -> u64 {
        self.video_at(registered_us) + self.display_lag_us
    }
}

impl Default for RigProfile {
    fn default() -> Self {
        PROFILES[0]
    }
}

impl fmt::Display for RigProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): poll={}us min-press={}us frames={} display-lag={}us noise={} read-cost={}us",
            self.name,
            self.summary,
            self.poll_us,
            self.min_press_us,
            self.pipeline_frames,
            self.display_lag_us,
            self.noise,
            self.read_cost_us
        )
    }
}

fn ceil_to(value: u64, step: u64) -> u64 {
    if step == 0 {
        value
    } else {
        value.div_ceil(step) * step
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Stage {
    Video,
    Photo,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Press {
    pressed_at: u64,
    released_at: Option<u64>,
}

#[derive(Debug)]
pub enum RigClock {
    Host(Instant),
    Virtual(u64),
}

impl RigClock {
    fn now_us(&self) -> u64 {
        match self {
            RigClock::Host(origin) => u64::try_from(origin.elapsed().as_micros()).unwrap_or(u64::MAX),
            RigClock::Virtual(now_us) => *now_us,
        }
    }

    fn spend(&mut self, micros: u64) {
        match self {
            RigClock::Host(origin) => {
                let until = origin.elapsed() + Duration::from_micros(micros);
                while origin.elapsed() < until {
                    std::hint::spin_loop();
                }
            }
            RigClock::Virtual(now_us) => *now_us += micros,
        }
    }

    fn step(&mut self) {
        if let RigClock::Virtual(now_us) = self {
            *now_us += TIMEBASE_STEP_US;
        }
    }
}

pub struct RigState {
    clock: RigClock,
    profile: RigProfile,
    channels: ChannelMap,
    presses: Vec<Press>,
    rng: fastrand::Rng,
    keys: KeySource,
    timer: TimerConfig,
    measurement_origin_us: u64,
    watchdog_loaded_at_us: u64,
    watchdog_count: ClockTicks,
    interrupts_masked: bool,
}

impl RigState {
    fn level(&mut self, channel: ChannelId) -> u16 {
        let now = self.clock.now_us();
        let (levels, stage) = if channel == self.channels.photo {
            (self.profile.photo, Stage::Photo)
        } else if channel == self.channels.video {
            (self.profile.video, Stage::Video)
        } else {
            return KEYPAD_IDLE;
        };
        let base = if self.is_active(stage, now) {
            levels.active
        } else {
            levels.idle
        };
        let noise = self.profile.noise;
        if noise == 0 {
            return base;
        }
        let offset = self.rng.u16(0..=noise * 2);
        base.saturating_add(offset).saturating_sub(noise)
    }

    fn is_active(&self, stage: Stage, now: u64) -> bool {
        self.presses
            .iter()
            .any(|press| self.press_visible(*press, stage, now))
    }

    fn press_visible(&self, press: Press, stage: Stage, now: u64) -> bool {
        let profile = &self.profile;
        let held_until = press.released_at.unwrap_or(now);
        let accepted_at = press.pressed_at + profile.min_press_us;
        if held_until < accepted_at {
            return false;
        }
        let registered = profile.registered_at(accepted_at);
        if press.released_at.is_some_and(|released| released < registered) {
            return false;
        }
        let visible_at = |registered_us| match stage {
            Stage::Video => profile.video_at(registered_us),
            Stage::Photo => profile.photo_at(registered_us),
        };
        let on = visible_at(registered);
        let off = press
            .released_at
            .map(|released| visible_at(profile.registered_at(released)));
        now >= on && off.is_none_or(|off| now < off)
    }

    fn ticks_since(&self, origin_us: u64) -> u64 {
        let elapsed = self.clock.now_us().saturating_sub(origin_us);
        elapsed * u64::from(self.timer.clock_hz)
            / (u64::from(self.timer.prescaler) * 1_000_000)
    }
}

/// Shared handle to the simulated chain.
#[derive(Clone)]
pub struct Rig(Rc<RefCell<RigState>>);

impl Rig {
    fn with_clock(profile: RigProfile, clock: RigClock, keys: KeySource, seed: u64) -> Self {
        Self(Rc::new(RefCell::new(RigState {
            clock,
            profile,
            channels: ChannelMap::DEFAULT,
            presses: Vec::new(),
            rng: fastrand::Rng::with_seed(seed),
            keys,
            timer: TimerConfig::default(),
            measurement_origin_us: 0,
            watchdog_loaded_at_us: 0,
            watchdog_count: 0,
            interrupts_masked: false,
        })))
    }

    /// Rig on the host clock reading keys from the terminal.
    pub fn interactive(profile: RigProfile) -> Self {
        let seed = u64::try_from(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map_or(0, |since| since.as_micros() & u128::from(u64::MAX)),
        )
        .unwrap_or(0);
        Self::with_clock(profile, RigClock::Host(Instant::now()), KeySource::terminal(), seed)
    }

    /// Reproducible rig on a virtual clock with scripted keys.
    pub fn simulated(profile: RigProfile, seed: u64) -> Self {
        Self::with_clock(profile, RigClock::Virtual(0), KeySource::scripted(), seed)
    }

    fn state(&self) -> RefMut<'_, RigState> {
        self.0.borrow_mut()
    }

    pub fn profile(&self) -> RigProfile {
        self.0.borrow().profile
    }

    pub fn set_profile(&self, profile: RigProfile) {
        self.state().profile = profile;
    }

    pub fn update_profile(&self, update: impl FnOnce(&mut RigProfile)) {
        update(&mut self.state().profile);
    }

    pub fn now(&self) -> Duration {
        Duration::from_micros(self.0.borrow().clock.now_us())
    }

    pub fn is_interactive(&self) -> bool {
        self.0.borrow().keys.is_terminal()
    }

    /// Schedules `key` at `delay` from now. Ignored on interactive rigs.
    pub fn schedule_key(&self, delay: Duration, key: Key) {
        let mut state = self.state();
        let at_us = state.clock.now_us() + u64::try_from(delay.as_micros()).unwrap_or(u64::MAX);
        state.keys.schedule(at_us, key);
    }

    pub fn clear_pending_keys(&self) {
        self.state().keys.clear_pending();
    }

    pub fn interrupts_masked(&self) -> bool {
        self.0.borrow().interrupts_masked
    }

    pub fn instrument(&self, config: EngineConfig) -> SimInstrument {
        self.state().channels = config.channels;
        Instrument::new(
            SimStimulus(self.clone()),
            SimAnalog(self.clone()),
            SimTimer(self.clone()),
            SimControl(self.clone()),
            SimTimebase(self.clone()),
            config,
        )
    }

    pub fn jitter(&self) -> SimJitter {
        let seed = self.state().rng.u64(..);
        SimJitter::with_seed(seed)
    }
}

pub type SimInstrument = Instrument<SimStimulus, SimAnalog, SimTimer, SimControl, SimTimebase>;

pub struct SimStimulus(Rig);

impl Stimulus for SimStimulus {
    fn assert(&mut self) {
        let mut state = self.0.state();
        let now = state.clock.now_us();
        if state
            .presses
            .last()
            .is_none_or(|press| press.released_at.is_some())
        {
            if state.presses.len() >= PRESS_HISTORY {
                state.presses.remove(0);
            }
            state.presses.push(Press {
                pressed_at: now,
                released_at: None,
            });
        }
    }

    fn release(&mut self) {
        let mut state = self.0.state();
        let now = state.clock.now_us();
        if let Some(press) = state.presses.last_mut() {
            press.released_at.get_or_insert(now);
        }
    }
}

pub struct SimAnalog(Rig);

impl AnalogInput for SimAnalog {
    fn read(&mut self, channel: ChannelId) -> u16 {
        let mut state = self.0.state();
        let cost = state.profile.read_cost_us;
        state.clock.spend(cost);
        state.level(channel)
    }
}

pub struct SimTimer(Rig);

impl TimerHardware for SimTimer {
    fn suppress_interrupts(&mut self) {
        self.0.state().interrupts_masked = true;
    }

    fn restore_interrupts(&mut self) {
        self.0.state().interrupts_masked = false;
    }

    fn start(&mut self, config: &TimerConfig) {
        let mut state = self.0.state();
        let now = state.clock.now_us();
        state.timer = *config;
        state.measurement_origin_us = now;
        state.watchdog_loaded_at_us = now;
        state.watchdog_count = 0;
    }

    fn stop(&mut self) {}

    fn measurement_count(&mut self) -> ClockTicks {
        let state = self.0.state();
        let ticks = state.ticks_since(state.measurement_origin_us) % state.timer.measurement_span();
        ClockTicks::try_from(ticks).unwrap_or(ClockTicks::MAX)
    }

    fn measurement_overflowed(&mut self) -> bool {
        let state = self.0.state();
        state.ticks_since(state.measurement_origin_us) >= state.timer.measurement_span()
    }

    fn reset_measurement(&mut self) {
        let mut state = self.0.state();
        state.measurement_origin_us = state.clock.now_us();
    }

    fn load_watchdog(&mut self, count: ClockTicks) {
        let mut state = self.0.state();
        state.watchdog_loaded_at_us = state.clock.now_us();
        state.watchdog_count = count;
    }

    fn take_watchdog_overflow(&mut self) -> bool {
        let state = self.0.state();
        let elapsed = state.ticks_since(state.watchdog_loaded_at_us);
        u64::from(state.watchdog_count) + elapsed >= state.timer.watchdog_span()
    }
}

pub struct SimControl(Rig);

impl ControlInput for SimControl {
    fn abort_requested(&mut self) -> bool {
        let mut state = self.0.state();
        let now = state.clock.now_us();
        state.keys.abort_requested(now)
    }

    fn direction(&mut self) -> Option<KeyDirection> {
        let mut state = self.0.state();
        let now = state.clock.now_us();
        state.keys.direction(now)
    }
}

pub struct SimTimebase(Rig);

impl Timebase for SimTimebase {
    type Instant = Micros;

    fn now(&mut self) -> Micros {
        let mut state = self.0.state();
        state.clock.step();
        Micros(state.clock.now_us())
    }
}

/// Uniform settle holds from a seeded generator.
pub struct SimJitter(fastrand::Rng);

impl SimJitter {
    pub fn with_seed(seed: u64) -> Self {
        Self(fastrand::Rng::with_seed(seed))
    }
}

impl WaitJitter for SimJitter {
    fn pick(&mut self, min: Duration, max: Duration) -> Duration {
        let min_us = u64::try_from(min.as_micros()).unwrap_or(u64::MAX);
        let max_us = u64::try_from(max.as_micros()).unwrap_or(u64::MAX);
        if max_us <= min_us {
            return min;
        }
        Duration::from_micros(self.0.u64(min_us..max_us))
    }
}
