//! Operator key input for the emulator.
//!
//! Interactive sessions read the terminal through crossterm in raw mode;
//! transcript captures replay a script of keys at fixed rig times.

use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal;
use lagmeter_core::io::KeyDirection;

/// Minimum gap between two terminal polls while the engine spins.
const TERMINAL_POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Key {
    Direction(KeyDirection),
    Abort,
}

impl Key {
    pub fn label(self) -> String {
        match self {
            Key::Direction(direction) => direction.to_string(),
            Key::Abort => "abort".to_string(),
        }
    }
}

/// Arrows step, enter selects, escape, space or `q` abort.
pub fn map_key(code: KeyCode) -> Option<Key> {
    match code {
        KeyCode::Left => Some(Key::Direction(KeyDirection::Left)),
        KeyCode::Right => Some(Key::Direction(KeyDirection::Right)),
        KeyCode::Up => Some(Key::Direction(KeyDirection::Up)),
        KeyCode::Down => Some(Key::Direction(KeyDirection::Down)),
        KeyCode::Enter => Some(Key::Direction(KeyDirection::Select)),
        KeyCode::Esc | KeyCode::Char(' ' | 'q') => Some(Key::Abort),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ScriptedKey {
    pub at_us: u64,
    pub key: Key,
}

#[derive(Debug, Default)]
pub struct TerminalKeys {
    pending: VecDeque<Key>,
    last_poll: Option<Instant>,
}

impl TerminalKeys {
    fn pump(&mut self) {
        let now = Instant::now();
        if self
            .last_poll
            .is_some_and(|last| now.duration_since(last) < TERMINAL_POLL_INTERVAL)
        {
            return;
        }
        self.last_poll = Some(now);

        while let Ok(true) = event::poll(Duration::ZERO) {
            match event::read() {
                Ok(Event::Key(press)) if press.kind != KeyEventKind::Release => {
                    if let Some(key) = map_key(press.code) {
                        self.pending.push_back(key);
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    }
}

/// Where operator keys come from.
#[derive(Debug)]
pub enum KeySource {
    Terminal(TerminalKeys),
    Scripted(VecDeque<ScriptedKey>),
}

impl KeySource {
    pub fn terminal() -> Self {
        KeySource::Terminal(TerminalKeys::default())
    }

    pub fn scripted() -> Self {
        KeySource::Scripted(VecDeque::new())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, KeySource::Terminal(_))
    }

    /// Queues `key` for rig time `at_us`. Terminal sources ignore scripts.
    pub fn schedule(&mut self, at_us: u64, key: Key) {
        if let KeySource::Scripted(script) = self {
            let index = script.partition_point(|queued| queued.at_us <= at_us);
            script.insert(index, ScriptedKey { at_us, key });
        }
    }

    /// Drops keys typed before a run started.
    pub fn clear_pending(&mut self) {
        if let KeySource::Terminal(keys) = self {
            keys.pump();
            keys.pending.clear();
        }
    }

    pub fn abort_requested(&mut self, now_us: u64) -> bool {
        match self {
            KeySource::Terminal(keys) => {
                keys.pump();
                match keys.pending.iter().position(|key| *key == Key::Abort) {
                    Some(index) => {
                        keys.pending.remove(index);
                        true
                    }
                    None => false,
                }
            }
            KeySource::Scripted(script) => {
                let due = script
                    .front()
                    .is_some_and(|next| next.at_us <= now_us && next.key == Key::Abort);
                if due {
                    script.pop_front();
                }
                due
            }
        }
    }

    pub fn direction(&mut self, now_us: u64) -> Option<KeyDirection> {
        match self {
            KeySource::Terminal(keys) => {
                keys.pump();
                let index = keys
                    .pending
                    .iter()
                    .position(|key| matches!(key, Key::Direction(_)))?;
                match keys.pending.remove(index) {
                    Some(Key::Direction(direction)) => Some(direction),
                    _ => None,
                }
            }
            KeySource::Scripted(script) => match script.front() {
                Some(ScriptedKey {
                    at_us,
                    key: Key::Direction(direction),
                }) if *at_us <= now_us => {
                    let direction = *direction;
                    script.pop_front();
                    Some(direction)
                }
                _ => None,
            },
        }
    }
}

/// Keeps the terminal in raw mode while alive.
pub struct RawMode;

impl RawMode {
    pub fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}
