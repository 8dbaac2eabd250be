use core::cell::RefCell;

use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::adc::{Adc, AdcChannel, Resolution, SampleTime};
use embassy_stm32::gpio::{Level, OutputOpenDrain, Speed};
use embassy_sync::blocking_mutex::Mutex;
use lagmeter_core::clock::TimerConfig;
use lagmeter_core::config::EngineConfig;
use lagmeter_core::instrument::Instrument;
use static_cell::StaticCell;

use crate::hw::timers::Stm32DualTimer;
use crate::hw::{AdcBank, AdcInputs, EmbassyTimebase, GpioStimulus, KeypadControl, SharedAdc};

mod menu_task;

/// Target tick period of the dual-timer clock.
const TICK_US: u32 = 64;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

static ADC_BANK: StaticCell<SharedAdc> = StaticCell::new();

pub(crate) type FirmwareInstrument =
    Instrument<GpioStimulus, AdcInputs, Stm32DualTimer, KeypadControl, EmbassyTimebase>;

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA0,
        PA1,
        PA4,
        PB3,
        ADC1,
        TIM3,
        TIM14,
        ..
    } = hal::init(config);

    let mut adc = Adc::new(ADC1);
    adc.set_resolution(Resolution::BITS10);
    adc.set_sample_time(SampleTime::CYCLES12_5);
    let bank: &'static SharedAdc = ADC_BANK.init(Mutex::new(RefCell::new(AdcBank::new(
        adc,
        [PA0.degrade_adc(), PA1.degrade_adc(), PA4.degrade_adc()],
    ))));

    let stimulus = GpioStimulus::new(OutputOpenDrain::new(PB3, Level::High, Speed::VeryHigh));
    let timers = Stm32DualTimer::new(TIM3, TIM14);
    let timer_config = TimerConfig::stm32g0().with_tick_period(timers.clock_hz(), TICK_US);
    let engine_config = EngineConfig::with_timer(timer_config);
    defmt::info!(
        "lag meter ready: {}",
        defmt::Display2Format(&engine_config.timer)
    );

    let instrument = Instrument::new(
        stimulus,
        AdcInputs::new(bank),
        timers,
        KeypadControl::new(bank, engine_config.channels.keypad),
        EmbassyTimebase,
        engine_config,
    );

    spawner
        .spawn(menu_task::run(instrument, bank))
        .expect("failed to spawn menu task");

    core::future::pending::<()>().await;
}
