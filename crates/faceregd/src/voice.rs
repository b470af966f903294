//! Spoken feedback through an external speech command.

use facereg_core::Voice;
use std::process::{Command, Stdio};

/// Runs `program args.. <text>` without waiting for it.
pub struct CommandVoice {
    program: String,
    args: Vec<String>,
}

impl CommandVoice {
    /// Parse a whitespace-separated command line, e.g. `espeak -s 150`.
    pub fn parse(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl Voice for CommandVoice {
    fn speak(&self, text: &str) {
        let spawned = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            Ok(mut child) => {
                // Reap in the background so the speaker never blocks the session.
                let _ = std::thread::Builder::new()
                    .name("facereg-voice".into())
                    .spawn(move || {
                        let _ = child.wait();
                    });
            }
            Err(e) => {
                tracing::warn!(program = %self.program, error = %e, "speech command failed to start");
            }
        }
    }
}

/// Voice for headless setups: the phrase only goes to the log.
pub struct LogVoice;

impl Voice for LogVoice {
    fn speak(&self, text: &str) {
        tracing::info!(text, "speak");
    }
}

/// Voice for the configured command, or [`LogVoice`] when none is set.
pub fn from_config(command: Option<&str>) -> Box<dyn Voice + Send> {
    match command.and_then(CommandVoice::parse) {
        Some(v) => Box::new(v),
        None => Box::new(LogVoice),
    }
}
