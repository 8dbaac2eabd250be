//! Run history and logging helpers.
//!
//! [`TelemetryRecorder`] receives the engine's report events, mirrors every
//! one of them to defmt (stdout off target) and keeps a small ring of
//! completed run summaries. [`TraceLogger`] dumps the raw measurement traces
//! the engine emits for implausibly short results.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use heapless::{HistoryBuf, OldestOrdered};
use lagmeter_core::measure::MeasurementTrace;
use lagmeter_core::report::{DiagnosticsSink, ReportEvent, ReportSink};
use lagmeter_core::workflow::WorkflowKind;

/// Number of completed runs retained in memory.
pub const RUN_HISTORY_CAPACITY: usize = 8;

/// Summary of a completed workflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub kind: WorkflowKind,
    pub cycles: u32,
    pub average_ms: Option<u32>,
    pub min_ms: Option<u32>,
    pub max_ms: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Severity {
    Info,
    Warn,
}

impl Severity {
    const fn of(event: &ReportEvent) -> Self {
        match event {
            ReportEvent::Failed { .. } | ReportEvent::Aborted(_) => Severity::Warn,
            _ => Severity::Info,
        }
    }
}

/// Logs report events and remembers completed runs.
pub struct TelemetryRecorder {
    history: HistoryBuf<RunSummary, RUN_HISTORY_CAPACITY>,
    events: u32,
}

impl TelemetryRecorder {
    pub const fn new() -> Self {
        Self {
            history: HistoryBuf::new(),
            events: 0,
        }
    }

    /// Completed runs in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, RunSummary> {
        self.history.oldest_ordered()
    }

    pub fn latest(&self) -> Option<&RunSummary> {
        self.history.recent()
    }

    /// Number of events seen since boot.
    pub const fn events(&self) -> u32 {
        self.events
    }
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportSink for TelemetryRecorder {
    fn report(&mut self, event: &ReportEvent) {
        self.events = self.events.wrapping_add(1);
        if let ReportEvent::RunCompleted { kind, stats } = *event {
            self.history.write(RunSummary {
                kind,
                cycles: stats.count(),
                average_ms: stats.average(),
                min_ms: stats.min(),
                max_ms: stats.max(),
            });
        }
        emit_event(Severity::of(event), event);
    }
}

/// Dumps measurement traces to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct TraceLogger {
    traces: u32,
}

impl TraceLogger {
    pub const fn new() -> Self {
        Self { traces: 0 }
    }

    pub const fn traces(&self) -> u32 {
        self.traces
    }
}

impl DiagnosticsSink for TraceLogger {
    fn trace(&mut self, trace: &MeasurementTrace) {
        self.traces = self.traces.wrapping_add(1);
        emit_trace(trace);
    }
}

#[cfg(target_os = "none")]
fn emit_event(severity: Severity, event: &ReportEvent) {
    match severity {
        Severity::Info => defmt::info!("lag: {}", defmt::Display2Format(event)),
        Severity::Warn => defmt::warn!("lag: {}", defmt::Display2Format(event)),
    }
}

#[cfg(not(target_os = "none"))]
fn emit_event(severity: Severity, event: &ReportEvent) {
    match severity {
        Severity::Info => println!("lag: {event}"),
        Severity::Warn => println!("lag[warn]: {event}"),
    }
}

#[cfg(target_os = "none")]
fn emit_trace(trace: &MeasurementTrace) {
    defmt::warn!("trace:\n{}", defmt::Display2Format(trace));
}

#[cfg(not(target_os = "none"))]
fn emit_trace(trace: &MeasurementTrace) {
    println!("trace:\n{trace}");
}
