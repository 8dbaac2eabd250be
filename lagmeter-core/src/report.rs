//! Progress reporting and diagnostics seams.
//!
//! The engine never formats output itself. Workflows emit [`ReportEvent`]s and
//! the measurement loop emits [`MeasurementTrace`]s for implausible results;
//! firmware forwards both to defmt and the emulator to its transcript. Every
//! event renders as a short human-readable line through `Display`.

use core::fmt;

use crate::calibration::{Calibration, ChannelKind, RangePair};
use crate::io::ChannelId;
use crate::measure::MeasurementTrace;
use crate::search::SearchRound;
use crate::stats::RunStatistics;
use crate::workflow::{WorkflowError, WorkflowKind};

/// Structured progress emitted by the workflows.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReportEvent {
    WorkflowStarted(WorkflowKind),
    Calibrating {
        kind: ChannelKind,
        channel: ChannelId,
    },
    RangesSampled {
        kind: ChannelKind,
        ranges: RangePair,
    },
    Calibrated(Calibration),
    CycleMeasured {
        cycle: u32,
        cycles: u32,
        millis: u32,
        stats: RunStatistics,
    },
    RunCompleted {
        kind: WorkflowKind,
        stats: RunStatistics,
    },
    StimulusToggled {
        pressed: bool,
    },
    MonitorSample {
        channel: ChannelId,
        sample: u16,
    },
    WidthChanged {
        width_ms: u32,
    },
    SearchRound(SearchRound),
    Aborted(WorkflowKind),
    Failed {
        kind: WorkflowKind,
        error: WorkflowError,
    },
}

impl fmt::Display for ReportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportEvent::WorkflowStarted(kind) => write!(f, "start {kind}"),
            ReportEvent::Calibrating { kind, channel } => {
                write!(f, "calibrating {kind} on {channel}")
            }
            ReportEvent::RangesSampled { kind, ranges } => match kind {
                ChannelKind::PhotoSensor => {
                    write!(f, "{kind} on {} off {}", ranges.on, ranges.off)
                }
                ChannelKind::VideoLevel => write!(
                    f,
                    "{kind} on {} off {} diff={}",
                    ranges.on.max,
                    ranges.off.max,
                    ranges.peak_separation()
                ),
            },
            ReportEvent::Calibrated(calibration) => {
                write!(f, "{} threshold {}", calibration.kind, calibration.spec)
            }
            ReportEvent::CycleMeasured {
                cycle,
                cycles,
                millis,
                stats,
            } => write!(f, "{cycle}/{cycles}: {millis} ms, lag {} ms", stats.span()),
            ReportEvent::RunCompleted { kind, stats } => match stats.average() {
                Some(average) => write!(
                    f,
                    "avg {kind}: {average} ms ({} ms over {} cycles)",
                    stats.span(),
                    stats.count()
                ),
                None => write!(f, "avg {kind}: -"),
            },
            ReportEvent::StimulusToggled { pressed } => {
                f.write_str(if *pressed { "button on" } else { "button off" })
            }
            ReportEvent::MonitorSample { channel, sample } => write!(f, "sensor {channel}: {sample}"),
            ReportEvent::WidthChanged { width_ms } => write!(f, "pulse width {width_ms} ms"),
            ReportEvent::SearchRound(round) => round.fmt(f),
            ReportEvent::Aborted(kind) => write!(f, "{kind} aborted"),
            ReportEvent::Failed { kind, error } => write!(f, "{kind} failed: {error}"),
        }
    }
}

/// Receives workflow progress.
pub trait ReportSink {
    fn report(&mut self, event: &ReportEvent);
}

/// Receives raw traces of implausibly short measurements.
pub trait DiagnosticsSink {
    fn trace(&mut self, trace: &MeasurementTrace);
}

impl<T> ReportSink for &mut T
where
    T: ReportSink + ?Sized,
{
    fn report(&mut self, event: &ReportEvent) {
        (**self).report(event);
    }
}

impl<T> DiagnosticsSink for &mut T
where
    T: DiagnosticsSink + ?Sized,
{
    fn trace(&mut self, trace: &MeasurementTrace) {
        (**self).trace(trace);
    }
}

/// Sink that drops everything.
#[derive(Copy, Clone, Debug, Default)]
pub struct Discard;

impl ReportSink for Discard {
    fn report(&mut self, _event: &ReportEvent) {}
}

impl DiagnosticsSink for Discard {
    fn trace(&mut self, _trace: &MeasurementTrace) {}
}
