//! Interactive console over the simulated lag meter rig.
//!
//! ```text
//! lagmeter-emulator [--profile <tag>] [--seed <n>] [--list-profiles]
//! ```
//!
//! Without `--seed` the rig follows the host clock and the terminal keys.
//! With it, runs execute on the virtual clock and replay identically.

mod commands;
mod keys;
mod rig;
mod session;

use std::env;
use std::io::{self, Write};
use std::process;

use rig::{PROFILES, Rig, RigProfile};
use session::{Session, transcript_path};

const USAGE: &str = "Usage: lagmeter-emulator [--profile <tag>] [--seed <n>] [--list-profiles]";

#[derive(Debug, Default, Eq, PartialEq)]
struct Options {
    profile: RigProfile,
    seed: Option<u64>,
    list_profiles: bool,
}

impl Options {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self, String> {
        let mut options = Self::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) => (flag.to_owned(), Some(value.to_owned())),
                None => (arg, None),
            };
            let mut value = || {
                inline
                    .clone()
                    .or_else(|| args.next())
                    .ok_or_else(|| format!("missing value after {flag}"))
            };
            match flag.as_str() {
                "--profile" => options.profile = RigProfile::from_tag(&value()?)?,
                "--seed" => {
                    let seed = value()?;
                    options.seed = Some(
                        seed.parse()
                            .map_err(|_| format!("seed `{seed}` is not a number"))?,
                    );
                }
                "--list-profiles" => options.list_profiles = true,
                other => return Err(format!("unknown argument `{other}`")),
            }
        }
        Ok(options)
    }

    fn rig(&self) -> Rig {
        match self.seed {
            Some(seed) => Rig::simulated(self.profile, seed),
            None => Rig::interactive(self.profile),
        }
    }

    fn transcript_tag(&self) -> String {
        match self.seed {
            Some(seed) => format!("seeded-{}-{seed}", self.profile.name),
            None => format!("interactive-{}", self.profile.name),
        }
    }
}

fn main() -> io::Result<()> {
    let options = Options::parse(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let mut out = io::stdout().lock();
    if options.list_profiles {
        for profile in PROFILES {
            writeln!(out, "{profile}")?;
        }
        return Ok(());
    }

    let mut session = Session::new(
        options.rig(),
        &transcript_path(&options.transcript_tag()),
        &format!("Lag meter emulator session on the {} rig", options.profile.name),
    )?;
    writeln!(out, "Rig {} ready. `help` lists commands, `exit` leaves.", options.profile)?;

    let mut lines = io::stdin().lines();
    loop {
        write!(out, "> ")?;
        out.flush()?;
        let Some(line) = lines.next().transpose()? else {
            writeln!(out)?;
            break;
        };
        let command = line.trim();
        if matches!(command.to_ascii_lowercase().as_str(), "exit" | "quit") {
            break;
        }
        // interactive runs print as they go and return nothing here
        for reply in session.handle_command(command)? {
            writeln!(out, "{reply}")?;
        }
    }
    Ok(())
}
