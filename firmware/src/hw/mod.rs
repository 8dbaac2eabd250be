//! STM32G0 adapters for the engine's hardware seams.
//!
//! The converter is shared between the measured channels and the keypad
//! ladder, so it sits behind a blocking mutex that both [`AdcInputs`] and
//! [`KeypadControl`] borrow for the duration of a single conversion.

pub mod timers;

use core::cell::RefCell;
use core::ops::Add;
use core::time::Duration;

use embassy_stm32::adc::{Adc, AnyAdcChannel};
use embassy_stm32::gpio::OutputOpenDrain;
use embassy_stm32::peripherals::ADC1;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_time::Instant;
use lagmeter_core::io::{
    AnalogInput, ChannelId, ControlInput, KeyDirection, MonotonicInstant, Stimulus, Timebase,
};

use crate::keypad::{AbortKeys, KeypadState, decode};

/// Number of analog inputs wired on the shield (keypad, video, photo).
pub const ANALOG_CHANNELS: usize = 3;

/// Converter plus the channels it samples, indexed by [`ChannelId`].
pub struct AdcBank {
    adc: Adc<'static, ADC1>,
    channels: [AnyAdcChannel<ADC1>; ANALOG_CHANNELS],
}

impl AdcBank {
    pub fn new(adc: Adc<'static, ADC1>, channels: [AnyAdcChannel<ADC1>; ANALOG_CHANNELS]) -> Self {
        Self { adc, channels }
    }

    /// Blocking conversion of `channel`; unknown channels read as zero.
    pub fn read(&mut self, channel: ChannelId) -> u16 {
        match self.channels.get_mut(usize::from(channel.0)) {
            Some(input) => self.adc.blocking_read(input),
            None => 0,
        }
    }
}

pub type SharedAdc = Mutex<ThreadModeRawMutex, RefCell<AdcBank>>;

fn sample(bank: &SharedAdc, channel: ChannelId) -> u16 {
    bank.lock(|bank| bank.borrow_mut().read(channel))
}

/// Button line driven through an open-drain output; pressed pulls low.
pub struct GpioStimulus {
    line: OutputOpenDrain<'static>,
}

impl GpioStimulus {
    pub fn new(line: OutputOpenDrain<'static>) -> Self {
        Self { line }
    }
}

impl Stimulus for GpioStimulus {
    fn assert(&mut self) {
        self.line.set_low();
    }

    fn release(&mut self) {
        self.line.set_high();
    }
}

/// Photo and video channels.
pub struct AdcInputs {
    bank: &'static SharedAdc,
}

impl AdcInputs {
    pub fn new(bank: &'static SharedAdc) -> Self {
        Self { bank }
    }
}

impl AnalogInput for AdcInputs {
    fn read(&mut self, channel: ChannelId) -> u16 {
        sample(self.bank, channel)
    }
}

/// Keypad ladder as the engine's control input; see [`AbortKeys`].
pub struct KeypadControl {
    bank: &'static SharedAdc,
    channel: ChannelId,
    keys: KeypadState,
}

impl KeypadControl {
    pub fn new(bank: &'static SharedAdc, channel: ChannelId) -> Self {
        Self {
            bank,
            channel,
            keys: KeypadState::new(),
        }
    }

    /// Chooses which keys abort the next workflow.
    pub fn set_abort_keys(&mut self, abort_keys: AbortKeys) {
        self.keys.set_abort_keys(abort_keys);
    }
}

impl ControlInput for KeypadControl {
    fn abort_requested(&mut self) -> bool {
        self.keys.observe(sample(self.bank, self.channel))
    }

    fn direction(&mut self) -> Option<KeyDirection> {
        self.keys.take_direction(sample(self.bank, self.channel))
    }

    fn wait_release(&mut self) {
        while decode(sample(self.bank, self.channel)).is_some() {}
        self.keys.clear();
    }
}

/// Embassy instant adapted to the engine's instant trait.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct FirmwareInstant(Instant);

impl FirmwareInstant {
    pub fn now() -> Self {
        Self(Instant::now())
    }
}

impl Add<Duration> for FirmwareInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        let micros = u64::try_from(rhs.as_micros()).unwrap_or(u64::MAX);
        Self(self.0 + embassy_time::Duration::from_micros(micros))
    }
}

impl MonotonicInstant for FirmwareInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_duration_since(earlier.0).as_micros())
    }
}

/// Embassy time driver as the engine's timebase.
#[derive(Copy, Clone, Debug, Default)]
pub struct EmbassyTimebase;

impl Timebase for EmbassyTimebase {
    type Instant = FirmwareInstant;

    fn now(&mut self) -> FirmwareInstant {
        FirmwareInstant::now()
    }
}
