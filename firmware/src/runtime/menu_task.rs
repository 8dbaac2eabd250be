use embassy_time::{Instant, Timer};
use lagmeter_core::workflow::WorkflowContext;

use super::FirmwareInstrument;
use crate::hw::SharedAdc;
use crate::jitter::SettleJitter;
use crate::keypad::{AbortKeys, KeyLatch, decode};
use crate::menu::{Menu, MenuAction};
use crate::status::{self, ABORT};
use crate::telemetry::{TelemetryRecorder, TraceLogger};

const KEY_POLL_MS: u64 = 20;

#[embassy_executor::task]
pub async fn run(mut instrument: FirmwareInstrument, bank: &'static SharedAdc) -> ! {
    let keypad = instrument.config().channels.keypad;
    let photo = instrument.config().channels.photo;
    let mut menu = Menu::new();
    let mut keys = KeyLatch::new();
    let mut telemetry = TelemetryRecorder::new();
    let mut traces = TraceLogger::new();

    // Sensor noise and boot time are enough to vary the hold sequence.
    let noise = u64::from(bank.lock(|bank| bank.borrow_mut().read(photo)));
    let mut jitter = SettleJitter::with_seed(noise.rotate_left(48) ^ Instant::now().as_ticks());

    defmt::info!("menu: {}", menu.selected().label());
    loop {
        Timer::after_millis(KEY_POLL_MS).await;
        let sample = bank.lock(|bank| bank.borrow_mut().read(keypad));
        let Some(key) = keys.update(decode(sample)) else {
            continue;
        };

        match menu.handle(key) {
            MenuAction::Show(kind) => defmt::info!("menu: {}", kind.label()),
            MenuAction::Start(kind) => {
                // The start key would read as an abort; let go of it first.
                instrument.control_mut().wait_release();
                instrument.control_mut().set_abort_keys(AbortKeys::for_workflow(kind));
                keys = KeyLatch::new();
                status::record_active(Some(kind));

                let mut ctx = WorkflowContext::new(&ABORT, &mut jitter, &mut telemetry, &mut traces);
                let result = instrument.run_workflow(kind, &mut ctx);
                status::record_result(kind, &result);

                let snapshot = status::snapshot();
                defmt::info!(
                    "status: runs={} failed={} last avg={} ms",
                    snapshot.runs_completed,
                    snapshot.runs_failed,
                    snapshot.last_average_ms
                );
                defmt::info!("menu: {}", menu.selected().label());
            }
        }
    }
}
