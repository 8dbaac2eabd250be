#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Operator menu driven by the keypad.

use lagmeter_core::io::KeyDirection;
use lagmeter_core::workflow::WorkflowKind;

/// What the menu wants done after a key press.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MenuAction {
    Show(WorkflowKind),
    Start(WorkflowKind),
}

/// Cycles through the workflows; select starts the highlighted one.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Menu {
    index: usize,
}

impl Menu {
    pub const fn new() -> Self {
        Self { index: 0 }
    }

    pub const fn selected(&self) -> WorkflowKind {
        WorkflowKind::ALL[self.index]
    }

    pub fn handle(&mut self, key: KeyDirection) -> MenuAction {
        let count = WorkflowKind::ALL.len();
        match key {
            KeyDirection::Left | KeyDirection::Up => {
                self.index = (self.index + count - 1) % count;
            }
            KeyDirection::Right | KeyDirection::Down => {
                self.index = (self.index + 1) % count;
            }
            KeyDirection::Select => return MenuAction::Start(self.selected()),
        }
        MenuAction::Show(self.selected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_wraps_both_ways() {
        let mut menu = Menu::new();
        assert_eq!(menu.selected(), WorkflowKind::PhotoSensor);
        assert_eq!(
            menu.handle(KeyDirection::Left),
            MenuAction::Show(WorkflowKind::SensorMonitor)
        );
        assert_eq!(
            menu.handle(KeyDirection::Right),
            MenuAction::Show(WorkflowKind::PhotoSensor)
        );
        menu.handle(KeyDirection::Down);
        assert_eq!(
            menu.handle(KeyDirection::Select),
            MenuAction::Start(WorkflowKind::VideoLevel)
        );
    }
}
