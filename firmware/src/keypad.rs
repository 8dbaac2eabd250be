#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Resistor-ladder keypad on the shield's analog line.
//!
//! Every key pulls the line to a different level. Readings above
//! [`RELEASED_FROM`] mean no key is down. Thresholds assume the converter is
//! configured for 10-bit samples.

use lagmeter_core::io::KeyDirection;
use lagmeter_core::workflow::WorkflowKind;

/// Lowest reading with every key released.
pub const RELEASED_FROM: u16 = 800;

/// Maps a raw ladder reading to the key holding it down.
#[must_use]
pub const fn decode(sample: u16) -> Option<KeyDirection> {
    match sample {
        0..60 => Some(KeyDirection::Right),
        60..200 => Some(KeyDirection::Up),
        200..400 => Some(KeyDirection::Down),
        400..650 => Some(KeyDirection::Left),
        650..RELEASED_FROM => Some(KeyDirection::Select),
        _ => None,
    }
}

/// Turns sampled key levels into one event per press.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct KeyLatch {
    held: Option<KeyDirection>,
}

impl KeyLatch {
    pub const fn new() -> Self {
        Self { held: None }
    }

    /// Feeds the key currently down and returns it on its press edge.
    pub fn update(&mut self, key: Option<KeyDirection>) -> Option<KeyDirection> {
        let edge = match (self.held, key) {
            (None, Some(pressed)) => Some(pressed),
            _ => None,
        };
        self.held = key;
        edge
    }

    pub const fn is_held(&self) -> bool {
        self.held.is_some()
    }
}

/// Keys that abort a running workflow.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum AbortKeys {
    /// Any key down aborts.
    #[default]
    AnyKey,
    /// Only `Select` aborts; the other keys steer the run.
    SelectOnly,
}

impl AbortKeys {
    /// The actuation search reads direction keys; every other workflow
    /// stops on the first key.
    #[must_use]
    pub const fn for_workflow(kind: WorkflowKind) -> Self {
        match kind {
            WorkflowKind::MinimumActuation => Self::SelectOnly,
            _ => Self::AnyKey,
        }
    }
}

/// Keypad bookkeeping behind the engine's control input.
///
/// With [`AbortKeys::SelectOnly`], other keys pressed while a round is
/// running are kept until the search asks for a direction, so a short tap
/// between two polls of [`KeypadState::take_direction`] is not lost.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct KeypadState {
    latch: KeyLatch,
    pending: Option<KeyDirection>,
    abort_keys: AbortKeys,
}

impl KeypadState {
    pub const fn new() -> Self {
        Self {
            latch: KeyLatch::new(),
            pending: None,
            abort_keys: AbortKeys::AnyKey,
        }
    }

    pub fn set_abort_keys(&mut self, abort_keys: AbortKeys) {
        self.abort_keys = abort_keys;
    }

    /// Records a sample taken during a poll; returns whether abort is held.
    pub fn observe(&mut self, sample: u16) -> bool {
        let key = decode(sample);
        let edge = self.latch.update(key);
        match self.abort_keys {
            AbortKeys::AnyKey => key.is_some(),
            AbortKeys::SelectOnly => {
                if let Some(pressed) = edge
                    && pressed != KeyDirection::Select
                {
                    self.pending = Some(pressed);
                }
                key == Some(KeyDirection::Select)
            }
        }
    }

    /// Records a sample and returns the oldest unconsumed key press.
    pub fn take_direction(&mut self, sample: u16) -> Option<KeyDirection> {
        let edge = self.latch.update(decode(sample));
        self.pending.take().or(edge)
    }

    /// Marks every key as released after the operator let go.
    pub fn clear(&mut self) {
        self.latch = KeyLatch::new();
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_levels_map_to_keys() {
        assert_eq!(decode(0), Some(KeyDirection::Right));
        assert_eq!(decode(131), Some(KeyDirection::Up));
        assert_eq!(decode(307), Some(KeyDirection::Down));
        assert_eq!(decode(481), Some(KeyDirection::Left));
        assert_eq!(decode(722), Some(KeyDirection::Select));
        assert_eq!(decode(1_023), None);
        assert_eq!(decode(RELEASED_FROM), None);
    }

    #[test]
    fn latch_reports_each_press_once() {
        let mut latch = KeyLatch::new();
        assert_eq!(latch.update(Some(KeyDirection::Up)), Some(KeyDirection::Up));
        assert_eq!(latch.update(Some(KeyDirection::Up)), None);
        assert!(latch.is_held());
        assert_eq!(latch.update(None), None);
        assert_eq!(latch.update(Some(KeyDirection::Up)), Some(KeyDirection::Up));
    }

    #[test]
    fn any_key_aborts_a_cycle_workflow() {
        let mut keys = KeypadState::new();
        keys.set_abort_keys(AbortKeys::for_workflow(WorkflowKind::VideoToDisplay));
        assert!(!keys.observe(1_000));
        assert!(keys.observe(307));
        assert!(keys.observe(0));
        keys.clear();
        assert_eq!(keys.take_direction(1_000), None);
    }

    #[test]
    fn taps_during_a_round_are_kept_for_the_search() {
        let mut keys = KeypadState::new();
        keys.set_abort_keys(AbortKeys::for_workflow(WorkflowKind::MinimumActuation));
        assert!(!keys.observe(1_000));
        assert!(!keys.observe(307));
        assert!(!keys.observe(1_000));
        assert_eq!(keys.take_direction(1_000), Some(KeyDirection::Down));
        assert_eq!(keys.take_direction(1_000), None);
    }

    #[test]
    fn select_aborts_without_queueing_a_direction() {
        let mut keys = KeypadState::new();
        keys.set_abort_keys(AbortKeys::SelectOnly);
        assert!(keys.observe(700));
        assert!(keys.observe(700));
        keys.clear();
        assert_eq!(keys.take_direction(1_000), None);
    }
}
