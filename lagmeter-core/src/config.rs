//! Aggregated engine configuration.

use crate::calibration::CalibrationConfig;
use crate::clock::TimerConfig;
use crate::io::ChannelId;
use crate::measure::MeasurementConfig;
use crate::sampler::AdcConfig;
use crate::search::SearchConfig;
use crate::workflow::{SettleConfig, WorkflowConfig};

/// Analog channel assignment of the rig.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ChannelMap {
    pub photo: ChannelId,
    pub video: ChannelId,
    pub keypad: ChannelId,
}

impl ChannelMap {
    /// Photo sensor on A2, video level on A1, keypad ladder on A0.
    pub const DEFAULT: Self = Self {
        photo: ChannelId(2),
        video: ChannelId(1),
        keypad: ChannelId(0),
    };
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Every tunable of the engine in one place.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct EngineConfig {
    pub timer: TimerConfig,
    pub adc: AdcConfig,
    pub channels: ChannelMap,
    pub calibration: CalibrationConfig,
    pub measurement: MeasurementConfig,
    pub settle: SettleConfig,
    pub search: SearchConfig,
    pub workflow: WorkflowConfig,
}

impl EngineConfig {
    /// Defaults with a different timer setup.
    #[must_use]
    pub fn with_timer(timer: TimerConfig) -> Self {
        Self {
            timer,
            ..Self::default()
        }
    }
}
