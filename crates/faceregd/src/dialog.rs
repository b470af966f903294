//! Terminal profile dialog: prompts on stderr, answers on stdin.
//!
//! Input lines come from one long-lived reader thread, so a dialog that is
//! cancelled mid-prompt stops waiting without a read left pending on the
//! terminal. A line that reaches a cancelled dialog is held for the next one.

use facereg_core::{CancelFlag, DialogOutcome, ProfileDialog, ProfileRecord};
use std::io::{BufRead, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Mutex;
use std::time::Duration;

const FIELDS: [&str; 4] = ["name", "domain", "age", "year"];

/// How often a waiting prompt checks its cancel flag.
const INPUT_POLL: Duration = Duration::from_millis(25);

/// Lines read from the terminal, plus one handed back by a cancelled dialog.
struct LineInput {
    lines: Receiver<String>,
    held: Option<String>,
}

enum Answer {
    Line(String),
    Cancelled,
    Closed,
}

impl LineInput {
    fn next(&mut self, cancel: &CancelFlag) -> Answer {
        loop {
            if cancel.is_cancelled() {
                return Answer::Cancelled;
            }
            if let Some(line) = self.held.take() {
                return Answer::Line(line);
            }
            match self.lines.recv_timeout(INPUT_POLL) {
                Ok(line) if cancel.is_cancelled() => {
                    self.held = Some(line);
                    return Answer::Cancelled;
                }
                Ok(line) => return Answer::Line(line),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Answer::Closed,
            }
        }
    }
}

pub struct TerminalDialog<W> {
    io: Mutex<(LineInput, W)>,
}

impl TerminalDialog<std::io::Stderr> {
    pub fn stdio() -> std::io::Result<Self> {
        Self::new(std::io::BufReader::new(std::io::stdin()), std::io::stderr())
    }
}

impl<W: Write> TerminalDialog<W> {
    /// Start a reader thread over `input`; it ends at EOF or on a read error.
    pub fn new<R>(mut input: R, prompts: W) -> std::io::Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        std::thread::Builder::new()
            .name("facereg-input".into())
            .spawn(move || loop {
                let mut line = String::new();
                match input.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "terminal input failed");
                        break;
                    }
                }
            })?;
        Ok(Self::from_lines(rx, prompts))
    }

    /// Dialog over already-split input lines.
    pub fn from_lines(lines: Receiver<String>, prompts: W) -> Self {
        Self {
            io: Mutex::new((LineInput { lines, held: None }, prompts)),
        }
    }
}

impl<W> ProfileDialog for TerminalDialog<W>
where
    W: Write + Send,
{
    fn collect_profile(&self, cancel: &CancelFlag) -> DialogOutcome {
        let Ok(mut guard) = self.io.lock() else {
            return DialogOutcome::Cancelled;
        };
        let (input, prompts) = &mut *guard;

        let mut answers = Vec::with_capacity(FIELDS.len());
        for field in FIELDS {
            if cancel.is_cancelled() {
                return DialogOutcome::Cancelled;
            }
            let _ = write!(prompts, "User Registration - enter your {field}: ");
            let _ = prompts.flush();

            match input.next(cancel) {
                Answer::Line(line) if !line.trim().is_empty() => answers.push(line.trim().to_string()),
                Answer::Cancelled => {
                    let _ = writeln!(prompts);
                    return DialogOutcome::Cancelled;
                }
                Answer::Line(_) | Answer::Closed => {
                    let _ = writeln!(prompts, "registration cancelled");
                    return DialogOutcome::Cancelled;
                }
            }
        }

        let mut answers = answers.into_iter();
        DialogOutcome::Completed(ProfileRecord {
            name: answers.next().unwrap_or_default(),
            domain: answers.next().unwrap_or_default(),
            age: answers.next().unwrap_or_default(),
            year: answers.next().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Arc;

    fn dialog(input: &str) -> TerminalDialog<Vec<u8>> {
        TerminalDialog::new(Cursor::new(input.as_bytes().to_vec()), Vec::new()).unwrap()
    }

    fn bob() -> ProfileRecord {
        ProfileRecord { name: "Bob".into(), domain: "Ops".into(), age: "41".into(), year: "2025".into() }
    }

    #[test]
    fn test_collects_all_fields_in_order() {
        let d = dialog("Ana\nEng\n30\n2024\n");
        assert_eq!(
            d.collect_profile(&CancelFlag::new()),
            DialogOutcome::Completed(ProfileRecord {
                name: "Ana".into(),
                domain: "Eng".into(),
                age: "30".into(),
                year: "2024".into(),
            })
        );
        let prompts = String::from_utf8(d.io.lock().unwrap().1.clone()).unwrap();
        let order: Vec<_> = FIELDS.iter().map(|f| prompts.find(f).unwrap()).collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_empty_answer_cancels() {
        let d = dialog("Ana\n\n30\n2024\n");
        assert_eq!(d.collect_profile(&CancelFlag::new()), DialogOutcome::Cancelled);
    }

    #[test]
    fn test_eof_cancels() {
        let d = dialog("Ana\nEng\n30\n");
        assert_eq!(d.collect_profile(&CancelFlag::new()), DialogOutcome::Cancelled);
    }

    #[test]
    fn test_cancel_flag_wins() {
        let d = dialog("Ana\nEng\n30\n2024\n");
        let flag = CancelFlag::new();
        flag.cancel();
        assert_eq!(d.collect_profile(&flag), DialogOutcome::Cancelled);
    }

    #[test]
    fn test_cancelled_dialog_leaves_input_to_the_next() {
        let (tx, rx) = mpsc::channel();
        let d = Arc::new(TerminalDialog::from_lines(rx, Vec::new()));

        // First dialog waits on a terminal nobody is typing into.
        let first_flag = CancelFlag::new();
        let first = {
            let (d, flag) = (Arc::clone(&d), first_flag.clone());
            std::thread::spawn(move || d.collect_profile(&flag))
        };
        std::thread::sleep(Duration::from_millis(50));
        first_flag.cancel();

        let second = {
            let d = Arc::clone(&d);
            std::thread::spawn(move || d.collect_profile(&CancelFlag::new()))
        };
        for line in ["Bob\n", "Ops\n", "41\n", "2025\n"] {
            tx.send(line.to_string()).unwrap();
        }

        assert_eq!(first.join().unwrap(), DialogOutcome::Cancelled);
        assert_eq!(second.join().unwrap(), DialogOutcome::Completed(bob()));
    }

    #[test]
    fn test_line_reaching_cancelled_dialog_is_held() {
        let (tx, rx) = mpsc::channel();
        let d = TerminalDialog::from_lines(rx, Vec::new());
        let mut guard = d.io.lock().unwrap();
        let flag = CancelFlag::new();
        tx.send("Bob\n".to_string()).unwrap();
        flag.cancel();

        assert!(matches!(guard.0.next(&flag), Answer::Cancelled));
        // Nothing was consumed: the line is still queued or held.
        assert!(matches!(guard.0.next(&CancelFlag::new()), Answer::Line(l) if l == "Bob\n"));
    }
}
