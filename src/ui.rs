//! Terminal front end
//!
//! Enter toggles the session, `q` quits. Status changes and committed
//! transcript entries are printed as they are published; the in-progress
//! turn is redrawn on a single line.

use anyhow::Result;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::session::{Command, SessionHandle, Snapshot, Speaker, Status, TranscriptEntry};

/// Terminal renderer for session snapshots
pub struct TerminalUi {
    session: SessionHandle,
    assistant_name: String,
    last_status: Option<Status>,
    printed_entries: usize,
    live_line: String,
}

impl TerminalUi {
    pub fn new(session: SessionHandle, assistant_name: impl Into<String>) -> Self {
        Self {
            session,
            assistant_name: assistant_name.into(),
            last_status: None,
            printed_entries: 0,
            live_line: String::new(),
        }
    }

    /// Run until the user quits, stdin and Ctrl+C both count
    pub async fn run(mut self) -> Result<()> {
        let mut updates = self.session.subscribe();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;

        println!(
            "{} is ready. Press Enter to start or stop talking, q then Enter to quit.",
            self.assistant_name
        );
        let initial = updates.borrow_and_update().clone();
        self.render(&initial)?;

        loop {
            tokio::select! {
                line = lines.next_line(), if stdin_open => {
                    match line? {
                        Some(line) if line.trim().eq_ignore_ascii_case("q") => break,
                        Some(_) => self.session.send(Command::Toggle).await?,
                        None => {
                            debug!("stdin closed, waiting for Ctrl+C");
                            stdin_open = false;
                        }
                    }
                }
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = updates.borrow_and_update().clone();
                    self.render(&snapshot)?;
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        self.clear_live_line()?;
        Ok(())
    }

    fn render(&mut self, snapshot: &Snapshot) -> Result<()> {
        // A new session clears the transcript
        if snapshot.transcripts.len() < self.printed_entries {
            self.printed_entries = 0;
        }

        if self.last_status != Some(snapshot.status) {
            self.clear_live_line()?;
            match (&snapshot.status, &snapshot.error) {
                (Status::Error, Some(message)) => println!("[error] {}", message),
                (status, _) => println!("[{}]", status),
            }
            self.last_status = Some(snapshot.status);
        }

        let new_entries = &snapshot.transcripts[self.printed_entries..];
        if !new_entries.is_empty() {
            self.clear_live_line()?;
            for entry in new_entries {
                println!("{}", self.format_entry(entry));
            }
            self.printed_entries = snapshot.transcripts.len();
        }

        self.draw_live_line(snapshot)
    }

    fn format_entry(&self, entry: &TranscriptEntry) -> String {
        let label = match entry.speaker {
            Speaker::User => "You",
            Speaker::Assistant => self.assistant_name.as_str(),
        };
        format!("{}: {}", label, entry.text)
    }

    fn draw_live_line(&mut self, snapshot: &Snapshot) -> Result<()> {
        let line = if !snapshot.current_output.is_empty() {
            format!("{}: {}", self.assistant_name, snapshot.current_output)
        } else if !snapshot.current_input.is_empty() {
            format!("You: {}", snapshot.current_input)
        } else {
            String::new()
        };

        if line != self.live_line {
            let mut out = std::io::stdout();
            write!(out, "\r\x1b[2K{}", line)?;
            out.flush()?;
            self.live_line = line;
        }
        Ok(())
    }

    fn clear_live_line(&mut self) -> Result<()> {
        if !self.live_line.is_empty() {
            let mut out = std::io::stdout();
            write!(out, "\r\x1b[2K")?;
            out.flush()?;
            self.live_line.clear();
        }
        Ok(())
    }
}
