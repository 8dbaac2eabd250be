//! Records reproducible transcripts on the virtual rig clock.

use std::io;
use std::time::Duration;

#[allow(dead_code)]
#[path = "../commands.rs"]
mod commands;
#[allow(dead_code)]
#[path = "../keys.rs"]
mod keys;
#[allow(dead_code)]
#[path = "../rig.rs"]
mod rig;
#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use keys::Key;
use lagmeter_core::io::KeyDirection;
use rig::{Rig, RigProfile};
use session::{Session, transcript_path};

const SEED: u64 = 0x5EED;

fn main() -> io::Result<()> {
    record("lcd", record_lcd)?;
    record("tv", |session| {
        session.handle_command("set cycles 10")?;
        session.handle_command("run display")?;
        Ok(())
    })?;
    record("weak", |session| {
        session.handle_command("run video")?;
        session.handle_command("profile lcd")?;
        session.handle_command("set cycles 5")?;
        session.handle_command("run video")?;
        Ok(())
    })?;
    record("slow-adc", |session| {
        session.handle_command("run photo")?;
        session.handle_command("set read-cost 200")?;
        session.handle_command("set cycles 5")?;
        session.handle_command("run photo")?;
        Ok(())
    })?;
    record("crt", record_search)?;
    Ok(())
}

fn record(tag: &str, script: impl FnOnce(&mut Session) -> io::Result<()>) -> io::Result<()> {
    let profile = RigProfile::from_tag(tag).map_err(io::Error::other)?;
    let mut session = Session::new(
        Rig::simulated(profile, SEED),
        &transcript_path(tag),
        &format!("Lag meter emulator transcript on the {tag} rig"),
    )?;
    session.handle_command("status")?;
    script(&mut session)?;
    session.handle_command("history")?;
    Ok(())
}

fn record_lcd(session: &mut Session) -> io::Result<()> {
    session.handle_command("help")?;
    session.handle_command("set cycles 10")?;
    session.handle_command("run photo")?;
    session.handle_command("run video")?;
    session.handle_command("run display")?;
    session.handle_command("set display-lag 2")?;
    session.handle_command("set floor 20")?;
    session.handle_command("run display")?;
    session.schedule_key(Duration::from_secs(3), Key::Abort)?;
    session.handle_command("run monitor")?;
    Ok(())
}

fn record_search(session: &mut Session) -> io::Result<()> {
    session.handle_command("set min-press 6")?;
    let steps = [
        (8, KeyDirection::Down),
        (12, KeyDirection::Right),
        (16, KeyDirection::Right),
        (24, KeyDirection::Select),
    ];
    for (secs, direction) in steps {
        session.schedule_key(Duration::from_secs(secs), Key::Direction(direction))?;
    }
    session.handle_command("run press")?;
    Ok(())
}
