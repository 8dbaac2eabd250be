#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Shared status storage for the firmware target.
//!
//! Atomics track the running workflow and the last completed result so the
//! menu can show a [`StatusSnapshot`] while the engine owns the hardware.
//! The abort token lives here as well.

use lagmeter_core::cancel::CancelToken;
use lagmeter_core::workflow::{WorkflowError, WorkflowKind, WorkflowOutcome};
use portable_atomic::{AtomicU8, AtomicU32, Ordering};

const NO_WORKFLOW: u8 = 0;
const NO_AVERAGE: u32 = 0;

/// Abort latch shared by the engine and the menu.
pub static ABORT: CancelToken = CancelToken::new();

/// Workflow index + 1 (0 == idle).
static ACTIVE: AtomicU8 = AtomicU8::new(NO_WORKFLOW);
/// Workflow index + 1 of the last finished run.
static LAST_KIND: AtomicU8 = AtomicU8::new(NO_WORKFLOW);
/// Average of the last completed run in ms, +1 (0 == none).
static LAST_AVERAGE_MS: AtomicU32 = AtomicU32::new(NO_AVERAGE);
static RUNS_COMPLETED: AtomicU32 = AtomicU32::new(0);
static RUNS_FAILED: AtomicU32 = AtomicU32::new(0);

fn encode_kind(kind: Option<WorkflowKind>) -> u8 {
    kind.and_then(|kind| WorkflowKind::ALL.iter().position(|candidate| *candidate == kind))
        .and_then(|index| u8::try_from(index + 1).ok())
        .unwrap_or(NO_WORKFLOW)
}

fn decode_kind(raw: u8) -> Option<WorkflowKind> {
    let index = usize::from(raw.checked_sub(1)?);
    WorkflowKind::ALL.get(index).copied()
}

/// Marks `kind` as running, or the engine as idle.
pub fn record_active(kind: Option<WorkflowKind>) {
    ACTIVE.store(encode_kind(kind), Ordering::Relaxed);
}

pub fn active() -> Option<WorkflowKind> {
    decode_kind(ACTIVE.load(Ordering::Relaxed))
}

/// Stores how a workflow ended and marks the engine idle.
pub fn record_result(kind: WorkflowKind, result: &Result<WorkflowOutcome, WorkflowError>) {
    match result {
        Ok(WorkflowOutcome::Completed(stats)) => {
            let average = stats
                .average()
                .map_or(NO_AVERAGE, |millis| millis.saturating_add(1));
            LAST_AVERAGE_MS.store(average, Ordering::Relaxed);
            LAST_KIND.store(encode_kind(Some(kind)), Ordering::Relaxed);
            RUNS_COMPLETED.fetch_add(1, Ordering::Relaxed);
        }
        Ok(WorkflowOutcome::Aborted) => {}
        Err(_) => {
            RUNS_FAILED.fetch_add(1, Ordering::Relaxed);
        }
    }
    record_active(None);
}

/// Point-in-time view of the status cells.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StatusSnapshot {
    pub active: Option<WorkflowKind>,
    pub last_kind: Option<WorkflowKind>,
    pub last_average_ms: Option<u32>,
    pub runs_completed: u32,
    pub runs_failed: u32,
}

pub fn snapshot() -> StatusSnapshot {
    let last_average_ms = match LAST_AVERAGE_MS.load(Ordering::Relaxed) {
        NO_AVERAGE => None,
        raw => Some(raw - 1),
    };
    StatusSnapshot {
        active: active(),
        last_kind: decode_kind(LAST_KIND.load(Ordering::Relaxed)),
        last_average_ms,
        runs_completed: RUNS_COMPLETED.load(Ordering::Relaxed),
        runs_failed: RUNS_FAILED.load(Ordering::Relaxed),
    }
}
