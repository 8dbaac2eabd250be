//! Line grammar of the emulator console.
//!
//! ```text
//! run <photo|video|display|press|monitor>
//! set <setting> <value>
//! profile <name> | profiles
//! status | history | help [topic]
//! ```
//!
//! Keywords are case-insensitive.

use std::fmt;

use lagmeter_core::workflow::WorkflowKind;
use winnow::ascii::{Caseless, dec_uint, space0, space1};
use winnow::combinator::{alt, eof, opt, peek, preceded, terminated};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::take_till;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Command<'a> {
    Run(WorkflowKind),
    Set(Setting),
    Profile(&'a str),
    Profiles,
    Help(Option<&'a str>),
    Status,
    History,
}

/// Engine and rig tunables adjustable from the console.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Setting {
    /// Measurement cycles per run.
    Cycles(u32),
    /// Accuracy window in microseconds.
    Window(u32),
    /// Plausibility floor in milliseconds.
    Floor(u32),
    /// Release the stimulus as soon as a measurement loop ends.
    Release(bool),
    /// First pulse width of the actuation search in milliseconds.
    Width(u32),
    /// Panel lag of the rig in milliseconds.
    DisplayLag(u64),
    /// Pipeline depth of the rig in frames.
    Frames(u64),
    /// Controller poll period in microseconds.
    Poll(u64),
    /// Controller debounce in milliseconds.
    MinPress(u64),
    /// Peak sample noise.
    Noise(u16),
    /// Conversion time in microseconds.
    ReadCost(u64),
    /// Seed of the settle hold generator.
    Seed(u64),
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Setting::Cycles(cycles) => write!(f, "cycles={cycles}"),
            Setting::Window(micros) => write!(f, "window={micros}us"),
            Setting::Floor(millis) => write!(f, "floor={millis}ms"),
            Setting::Release(on) => write!(f, "release={}", if *on { "on" } else { "off" }),
            Setting::Width(millis) => write!(f, "width={millis}ms"),
            Setting::DisplayLag(millis) => write!(f, "display-lag={millis}ms"),
            Setting::Frames(frames) => write!(f, "frames={frames}"),
            Setting::Poll(micros) => write!(f, "poll={micros}us"),
            Setting::MinPress(millis) => write!(f, "min-press={millis}ms"),
            Setting::Noise(noise) => write!(f, "noise={noise}"),
            Setting::ReadCost(micros) => write!(f, "read-cost={micros}us"),
            Setting::Seed(seed) => write!(f, "seed={seed}"),
        }
    }
}

/// Rejected console input.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SyntaxError {
    /// Byte offset of the first character that could not be parsed.
    pub offset: usize,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unexpected input at column {}", self.offset + 1)
    }
}

pub fn parse_command(line: &str) -> Result<Command<'_>, SyntaxError> {
    let line = line.trim();
    terminated(command, space0)
        .parse(line)
        .map_err(|error| SyntaxError {
            offset: error.offset(),
        })
}

fn command<'a>(input: &mut &'a str) -> ModalResult<Command<'a>> {
    alt((
        preceded((keyword("run"), space1), workflow).map(Command::Run),
        preceded((keyword("set"), space1), setting).map(Command::Set),
        keyword("profiles").value(Command::Profiles),
        preceded((keyword("profile"), space1), word).map(Command::Profile),
        preceded(keyword("help"), opt(preceded(space1, word))).map(Command::Help),
        keyword("status").value(Command::Status),
        keyword("history").value(Command::History),
    ))
    .parse_next(input)
}

fn workflow(input: &mut &str) -> ModalResult<WorkflowKind> {
    alt((
        keyword("photo").value(WorkflowKind::PhotoSensor),
        keyword("video").value(WorkflowKind::VideoLevel),
        keyword("display").value(WorkflowKind::VideoToDisplay),
        keyword("press").value(WorkflowKind::MinimumActuation),
        keyword("monitor").value(WorkflowKind::SensorMonitor),
    ))
    .parse_next(input)
}

fn setting(input: &mut &str) -> ModalResult<Setting> {
    alt((
        preceded((keyword("cycles"), space1), dec_uint).map(Setting::Cycles),
        preceded((keyword("window"), space1), dec_uint).map(Setting::Window),
        preceded((keyword("floor"), space1), dec_uint).map(Setting::Floor),
        preceded((keyword("release"), space1), switch).map(Setting::Release),
        preceded((keyword("width"), space1), dec_uint).map(Setting::Width),
        preceded((keyword("display-lag"), space1), dec_uint).map(Setting::DisplayLag),
        preceded((keyword("frames"), space1), dec_uint).map(Setting::Frames),
        preceded((keyword("poll"), space1), dec_uint).map(Setting::Poll),
        preceded((keyword("min-press"), space1), dec_uint).map(Setting::MinPress),
        preceded((keyword("noise"), space1), dec_uint).map(Setting::Noise),
        preceded((keyword("read-cost"), space1), dec_uint).map(Setting::ReadCost),
        preceded((keyword("seed"), space1), dec_uint).map(Setting::Seed),
    ))
    .parse_next(input)
}

fn switch(input: &mut &str) -> ModalResult<bool> {
    alt((keyword("on").value(true), keyword("off").value(false))).parse_next(input)
}

fn word<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    take_till(1.., |c: char| c.is_ascii_whitespace()).parse_next(input)
}

/// Case-insensitive `literal` that must end at a word boundary.
fn keyword<'a>(literal: &'static str) -> impl Parser<&'a str, &'a str, ErrMode<ContextError>> {
    terminated(Caseless(literal), peek(alt((space1, eof))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_parse_every_workflow() {
        for kind in WorkflowKind::ALL {
            let line = format!("run {}", kind.label());
            assert_eq!(parse_command(&line), Ok(Command::Run(kind)));
        }
        assert_eq!(
            parse_command("  RUN Display  "),
            Ok(Command::Run(WorkflowKind::VideoToDisplay))
        );
    }

    #[test]
    fn settings_carry_their_values() {
        assert_eq!(
            parse_command("set cycles 25"),
            Ok(Command::Set(Setting::Cycles(25)))
        );
        assert_eq!(
            parse_command("set display-lag 40"),
            Ok(Command::Set(Setting::DisplayLag(40)))
        );
        assert_eq!(
            parse_command("set release off"),
            Ok(Command::Set(Setting::Release(false)))
        );
        assert_eq!(
            parse_command("set min-press 3"),
            Ok(Command::Set(Setting::MinPress(3)))
        );
    }

    #[test]
    fn profile_and_profiles_are_distinct() {
        assert_eq!(parse_command("profiles"), Ok(Command::Profiles));
        assert_eq!(parse_command("profile tv"), Ok(Command::Profile("tv")));
        assert!(parse_command("profile").is_err());
    }

    #[test]
    fn help_topic_is_optional() {
        assert_eq!(parse_command("help"), Ok(Command::Help(None)));
        assert_eq!(parse_command("help set"), Ok(Command::Help(Some("set"))));
    }

    #[test]
    fn rejects_partial_keywords_and_trailing_input() {
        assert!(parse_command("running photo").is_err());
        assert!(parse_command("run photos").is_err());
        assert!(parse_command("status now").is_err());
        assert!(parse_command("set noise loud").is_err());
    }

    #[test]
    fn syntax_errors_point_into_the_line() {
        let error = parse_command("set cycles x").unwrap_err();
        assert!(error.offset <= "set cycles ".len());
        assert!(error.to_string().starts_with("unexpected input at column"));
    }
}
