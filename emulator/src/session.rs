use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use lagmeter_core::cancel::CancelToken;
use lagmeter_core::config::EngineConfig;
use lagmeter_core::measure::MeasurementTrace;
use lagmeter_core::report::{DiagnosticsSink, ReportEvent, ReportSink};
use lagmeter_core::workflow::{WorkflowContext, WorkflowError, WorkflowKind, WorkflowOutcome};

use crate::commands::{Command, Setting, parse_command};
use crate::keys::{Key, RawMode};
use crate::rig::{PROFILES, Rig, RigProfile, SimInstrument, SimJitter};

const HISTORY_CAPACITY: usize = 16;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    (
        "run",
        "run <photo|video|display|press|monitor>  - calibrate and run a workflow",
    ),
    (
        "set",
        "set <setting> <value>   - cycles, window, floor, release, width, display-lag, frames, poll, min-press, noise, read-cost, seed",
    ),
    (
        "profile",
        "profile <name>          - switch the simulated rig",
    ),
    ("profiles", "profiles                - list rig profiles"),
    (
        "status",
        "status                  - show engine and rig settings",
    ),
    ("history", "history                 - list recent runs"),
    (
        "help",
        "help [topic]            - show help for a command",
    ),
];

const RUN_KEYS: &str = "keys: esc/space/q abort, arrows change the width, enter ends the search";

/// Default transcript location for a session tag.
pub fn transcript_path(tag: &str) -> PathBuf {
    Path::new("transcripts").join(format!("{tag}.log"))
}

#[derive(Clone, Copy, Debug)]
struct RunRecord {
    kind: WorkflowKind,
    finished_at: Duration,
    result: Result<WorkflowOutcome, WorkflowError>,
}

impl fmt::Display for RunRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[+{:>6} ms] {}: ", self.finished_at.as_millis(), self.kind)?;
        match &self.result {
            Ok(WorkflowOutcome::Completed(stats)) => match stats.average() {
                Some(average) => write!(
                    f,
                    "avg {average} ms, {} ms over {} cycles",
                    stats.span(),
                    stats.count()
                ),
                None => f.write_str("no cycles"),
            },
            Ok(WorkflowOutcome::Aborted) => f.write_str("aborted"),
            Err(error) => write!(f, "failed ({error})"),
        }
    }
}

/// Console session over a simulated rig.
///
/// Every command and every reply is appended to the transcript, stamped with
/// rig time. On interactive rigs run output is printed as it happens instead
/// of being returned.
pub struct Session {
    rig: Rig,
    instrument: SimInstrument,
    transcript: TranscriptLogger,
    token: CancelToken,
    jitter: SimJitter,
    history: VecDeque<RunRecord>,
    echo: bool,
}

impl Session {
    pub fn new(rig: Rig, transcript: &Path, header: &str) -> io::Result<Self> {
        let transcript = TranscriptLogger::new(transcript, header)?;
        let instrument = rig.instrument(EngineConfig::default());
        let jitter = rig.jitter();
        let echo = rig.is_interactive();
        Ok(Self {
            rig,
            instrument,
            transcript,
            token: CancelToken::new(),
            jitter,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            echo,
        })
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.rig.now();
        self.transcript
            .append_line(elapsed, TranscriptRole::Host, trimmed)?;

        let lines = match parse_command(trimmed) {
            Ok(Command::Run(kind)) => return self.run(kind),
            Ok(Command::Set(setting)) => vec![self.apply(setting)],
            Ok(Command::Profile(tag)) => match RigProfile::from_tag(tag) {
                Ok(profile) => {
                    self.rig.set_profile(profile);
                    vec![format!("OK profile {profile}")]
                }
                Err(err) => vec![format!("ERR {err}")],
            },
            Ok(Command::Profiles) => PROFILES.iter().map(|profile| format!("  {profile}")).collect(),
            Ok(Command::Help(topic)) => help_lines(topic),
            Ok(Command::Status) => self.status_lines(),
            Ok(Command::History) => self.history_lines(),
            Err(err) => vec![format!("ERR syntax {err}")],
        };

        self.record_output(elapsed, &lines)?;
        Ok(lines)
    }

    /// Presses `key` on the rig `delay` after the current rig time.
    /// Interactive rigs take keys from the terminal instead.
    pub fn schedule_key(&mut self, delay: Duration, key: Key) -> io::Result<()> {
        let elapsed = self.rig.now();
        self.rig.schedule_key(delay, key);
        let line = format!("[key {} at +{} ms]", key.label(), (elapsed + delay).as_millis());
        self.transcript
            .append_line(elapsed, TranscriptRole::Host, &line)
    }

    fn run(&mut self, kind: WorkflowKind) -> io::Result<Vec<String>> {
        let _raw = if self.echo {
            Some(RawMode::enable()?)
        } else {
            None
        };
        self.rig.clear_pending_keys();

        let log = RefCell::new(RunLog {
            transcript: &mut self.transcript,
            rig: &self.rig,
            echo: self.echo,
            lines: Vec::new(),
            error: None,
        });
        if self.echo {
            log.borrow_mut().emit(RUN_KEYS.to_string());
        }

        let mut events = Events(&log);
        let mut traces = Traces(&log);
        let mut ctx = WorkflowContext::new(&self.token, &mut self.jitter, &mut events, &mut traces);
        let result = self.instrument.run_workflow(kind, &mut ctx);
        let lines = log.into_inner().finish()?;

        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(RunRecord {
            kind,
            finished_at: self.rig.now(),
            result,
        });
        Ok(lines)
    }

    fn apply(&mut self, setting: Setting) -> String {
        let mut config = *self.instrument.config();
        match setting {
            Setting::Cycles(0) => return "ERR cycles must be at least 1".to_string(),
            Setting::Window(0) => return "ERR window must be at least 1 us".to_string(),
            Setting::Cycles(cycles) => config.workflow.cycles = cycles,
            Setting::Window(micros) => {
                config.timer = config.timer.with_accuracy_window_us(micros);
            }
            Setting::Floor(millis) => config.measurement.plausibility_floor_ms = millis,
            Setting::Release(on) => config.measurement.release_on_exit = on,
            Setting::Width(millis) => config.search.seed_width_ms = millis,
            Setting::DisplayLag(millis) => self
                .rig
                .update_profile(|profile| profile.display_lag_us = millis.saturating_mul(1_000)),
            Setting::Frames(frames) => self
                .rig
                .update_profile(|profile| profile.pipeline_frames = frames),
            Setting::Poll(micros) => self.rig.update_profile(|profile| profile.poll_us = micros),
            Setting::MinPress(millis) => self
                .rig
                .update_profile(|profile| profile.min_press_us = millis.saturating_mul(1_000)),
            Setting::Noise(noise) => self.rig.update_profile(|profile| profile.noise = noise),
            Setting::ReadCost(micros) => self
                .rig
                .update_profile(|profile| profile.read_cost_us = micros),
            Setting::Seed(seed) => self.jitter = SimJitter::with_seed(seed),
        }
        self.instrument.set_config(config);
        format!("OK {setting}")
    }

    fn status_lines(&self) -> Vec<String> {
        let config = self.instrument.config();
        let rig_now = self.rig.now();
        vec![
            format!("profile {}", self.rig.profile()),
            format!("timer {}", config.timer),
            format!(
                "cycles={} floor={}ms release={} width={}ms",
                config.workflow.cycles,
                config.measurement.plausibility_floor_ms,
                if config.measurement.release_on_exit {
                    "on"
                } else {
                    "off"
                },
                config.search.seed_width_ms
            ),
            format!(
                "rig time {} ms, interrupts {}",
                rig_now.as_millis(),
                if self.rig.interrupts_masked() {
                    "masked"
                } else {
                    "enabled"
                }
            ),
            format!("runs recorded: {}", self.history.len()),
        ]
    }

    fn history_lines(&self) -> Vec<String> {
        if self.history.is_empty() {
            return vec!["no runs yet".to_string()];
        }
        self.history.iter().map(ToString::to_string).collect()
    }

    fn record_output(&mut self, elapsed: Duration, lines: &[String]) -> io::Result<()> {
        for line in lines {
            self.transcript
                .append_line(elapsed, TranscriptRole::Emulator, line)?;
        }
        Ok(())
    }
}

fn help_lines(topic: Option<&str>) -> Vec<String> {
    let mut lines = Vec::new();
    match topic {
        Some(target) => {
            if let Some((_, detail)) = HELP_TOPICS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(target))
            {
                lines.push((*detail).to_string());
            } else {
                lines.push(format!("No help available for `{target}`."));
                lines.push(format!("Available topics: {}", help_topic_list()));
            }
        }
        None => {
            lines.push("Available commands:".to_string());
            for (_, detail) in HELP_TOPICS {
                lines.push(format!("  {detail}"));
            }
            lines.push("Type `help <topic>` for a specific command.".to_string());
        }
    }
    lines
}

fn help_topic_list() -> String {
    HELP_TOPICS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Output of one run, shared by the report and diagnostics sinks.
struct RunLog<'a> {
    transcript: &'a mut TranscriptLogger,
    rig: &'a Rig,
    echo: bool,
    lines: Vec<String>,
    error: Option<io::Error>,
}

impl RunLog<'_> {
    fn emit(&mut self, line: String) {
        let written = self
            .transcript
            .append_line(self.rig.now(), TranscriptRole::Emulator, &line)
            .and_then(|()| {
                if self.echo {
                    // raw mode: the terminal does not translate newlines
                    let mut stdout = io::stdout().lock();
                    write!(stdout, "{line}\r\n")?;
                    stdout.flush()
                } else {
                    Ok(())
                }
            });
        if let Err(err) = written {
            self.error.get_or_insert(err);
        }
        if !self.echo {
            self.lines.push(line);
        }
    }

    fn finish(self) -> io::Result<Vec<String>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.lines),
        }
    }
}

struct Events<'l, 'a>(&'l RefCell<RunLog<'a>>);

impl ReportSink for Events<'_, '_> {
    fn report(&mut self, event: &ReportEvent) {
        self.0.borrow_mut().emit(event.to_string());
    }
}

struct Traces<'l, 'a>(&'l RefCell<RunLog<'a>>);

impl DiagnosticsSink for Traces<'_, '_> {
    fn trace(&mut self, trace: &MeasurementTrace) {
        self.0.borrow_mut().emit(format!("implausible: {trace}"));
    }
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path, header: &str) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };

        writeln!(logger.writer, "# {header}")?;
        writeln!(logger.writer, "# Timestamps are milliseconds of rig time")?;
        writeln!(logger.writer)?;
        logger.writer.flush()?;
        Ok(logger)
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

#[derive(Clone, Copy)]
enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lagmeter_core::io::KeyDirection;

    fn session(tag: &str, profile: &str) -> (Session, PathBuf) {
        let path = std::env::temp_dir()
            .join(format!("lagmeter-emulator-{}", std::process::id()))
            .join(format!("{tag}.log"));
        let rig = Rig::simulated(RigProfile::from_tag(profile).unwrap(), 11);
        let session = Session::new(rig, &path, "test transcript").unwrap();
        (session, path)
    }

    #[test]
    fn photo_run_reports_cycles_and_average() {
        let (mut session, path) = session("photo", "crt");
        session.handle_command("set cycles 4").unwrap();
        let lines = session.handle_command("run photo").unwrap();

        assert_eq!(lines.first().map(String::as_str), Some("start photo"));
        assert_eq!(
            lines.iter().filter(|line| line.contains("/4: ")).count(),
            4
        );
        assert!(lines.last().unwrap().starts_with("avg photo: "));

        let history = session.handle_command("history").unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].contains("photo: avg"));

        let transcript = fs::read_to_string(path).unwrap();
        assert!(transcript.contains("HOST> run photo"));
        assert!(transcript.contains("EMU < avg photo: "));
    }

    #[test]
    fn faint_video_fails_calibration() {
        let (mut session, _) = session("weak", "weak");
        let lines = session.handle_command("run video").unwrap();
        assert!(lines.last().unwrap().starts_with("video failed: calibration"));
        assert!(session.handle_command("history").unwrap()[0].contains("failed"));
    }

    #[test]
    fn slow_converter_fails_accuracy() {
        let (mut session, _) = session("slow", "slow-adc");
        session.handle_command("set cycles 2").unwrap();
        let lines = session.handle_command("run photo").unwrap();
        assert!(lines.last().unwrap().starts_with("photo failed"));
    }

    #[test]
    fn monitor_runs_until_the_scripted_abort() {
        let (mut session, _) = session("monitor", "lcd");
        session
            .schedule_key(Duration::from_secs(2), Key::Abort)
            .unwrap();
        let lines = session.handle_command("run monitor").unwrap();
        assert!(lines.iter().any(|line| line == "button on"));
        assert!(lines.iter().any(|line| line.starts_with("sensor A2: ")));
        assert_eq!(lines.last().map(String::as_str), Some("monitor aborted"));
        assert!(!session.rig.interrupts_masked());
    }

    #[test]
    fn search_follows_scripted_keys() {
        let (mut session, _) = session("press", "lcd");
        session
            .schedule_key(
                Duration::from_secs(5),
                Key::Direction(KeyDirection::Down),
            )
            .unwrap();
        session
            .schedule_key(
                Duration::from_secs(8),
                Key::Direction(KeyDirection::Select),
            )
            .unwrap();
        let lines = session.handle_command("run press").unwrap();
        assert!(lines.iter().any(|line| line == "pulse width 15 ms"));
        assert!(lines.iter().any(|line| line == "pulse width 5 ms"));
        assert_eq!(lines.last().map(String::as_str), Some("press aborted"));
    }

    #[test]
    fn settings_update_engine_and_rig() {
        let (mut session, _) = session("settings", "lcd");
        assert_eq!(
            session.handle_command("set display-lag 30").unwrap(),
            vec!["OK display-lag=30ms".to_string()]
        );
        assert_eq!(session.rig.profile().display_lag_us, 30_000);
        assert_eq!(
            session.handle_command("set cycles 0").unwrap(),
            vec!["ERR cycles must be at least 1".to_string()]
        );
        session.handle_command("set window 500").unwrap();
        assert_eq!(session.instrument.config().timer.accuracy_window_us, 500);
        assert!(
            session.handle_command("frobnicate").unwrap()[0].starts_with("ERR syntax")
        );
    }

    #[test]
    fn help_lists_topics_for_unknown_commands() {
        let (mut session, _) = session("help", "lcd");
        let lines = session.handle_command("help nope").unwrap();
        assert_eq!(lines[0], "No help available for `nope`.");
        assert!(lines[1].contains("run, set, profile"));
        assert_eq!(session.handle_command("help").unwrap().len(), HELP_TOPICS.len() + 2);
    }
}
