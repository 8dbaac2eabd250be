#![no_std]

// Portable measurement engine for the lag meter.
//
// Everything here runs unchanged on the STM32 firmware and on the host
// emulator. Hardware is reached only through the traits in `io` and
// `clock::TimerHardware`, so the engine can be driven by mock rigs in tests.

pub mod calibration;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod instrument;
pub mod io;
pub mod measure;
pub mod report;
pub mod sampler;
pub mod search;
pub mod stats;
pub mod workflow;
