//! Running a flash session from the terminal
//!
//! The session runs on its own thread. This side renders its events with an
//! indicatif spinner and feeds operator input back: answers to prompts, and
//! `q` + Enter to cancel at any time.

use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use multiflash_session::{
    Collaborators, FlashConfig, FlashSession, Operation, Outcome, SessionEvent, SessionHandle,
    Target,
};

const UI_TICK: Duration = Duration::from_millis(100);

/// Create a standard spinner style
fn create_spinner_style() -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?)
}

fn create_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(create_spinner_style().unwrap_or_else(|_| ProgressStyle::default_spinner()));
    pb.enable_steady_tick(UI_TICK);
    pb
}

/// Forward stdin lines until EOF
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn parse_answer(line: &str) -> Option<bool> {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" | "" => Some(false),
        _ => None,
    }
}

/// Terminal front end of one session
struct Console {
    spinner: ProgressBar,
    waiting: Option<String>,
    assume_yes: bool,
    prompt_pending: bool,
    stdin: Receiver<String>,
    stdin_open: bool,
}

impl Console {
    fn new(assume_yes: bool) -> Self {
        Self {
            spinner: create_spinner(),
            waiting: None,
            assume_yes,
            prompt_pending: false,
            stdin: spawn_stdin_reader(),
            stdin_open: true,
        }
    }

    /// Handle one event; returns the outcome once the session has ended
    fn on_event(&mut self, handle: &SessionHandle, event: SessionEvent) -> Option<Outcome> {
        match event {
            SessionEvent::Progress { step, total, label } => {
                self.waiting = None;
                self.spinner.set_message(format!("[{}/{}] {}", step, total, label));
            }
            SessionEvent::Prompt(question) => {
                if self.assume_yes {
                    self.spinner.println(format!("{} [y/N] yes", question));
                    handle.confirm(true);
                } else if !self.stdin_open {
                    log::warn!("No terminal input, declining: {}", question);
                    handle.confirm(false);
                } else {
                    self.spinner.suspend(|| {
                        print!("{} [y/N] ", question);
                        let _ = io::stdout().flush();
                    });
                    self.prompt_pending = true;
                }
            }
            SessionEvent::AwaitDevice {
                kind,
                present,
                timeout,
            } => {
                let action = if present {
                    "to be plugged in"
                } else {
                    "to be unplugged"
                };
                let waiting = format!("Waiting for {} {}", kind, action);
                self.spinner.set_message(format!(
                    "{} ({}s left, q to cancel)",
                    waiting,
                    timeout.as_secs()
                ));
                self.waiting = Some(waiting);
            }
            SessionEvent::RecoveryTick { elapsed, total } => {
                log::trace!("Recovery {}s of {}s", elapsed, total);
                if let Some(waiting) = &self.waiting {
                    self.spinner.set_message(format!(
                        "{} ({}s left, q to cancel)",
                        waiting,
                        total.saturating_sub(elapsed)
                    ));
                }
            }
            SessionEvent::SuspendMonitor { port } => {
                log::debug!("Serial monitor on {} suspended", port)
            }
            SessionEvent::ResumeMonitor { port, delay } => {
                log::debug!("Serial monitor on {} may reconnect after {:?}", port, delay)
            }
            SessionEvent::Terminal(outcome) => {
                let message = match &outcome {
                    Outcome::Succeeded => "Done".to_string(),
                    other => other.to_string(),
                };
                self.spinner.finish_with_message(message);
                return Some(outcome);
            }
            // Already written through the logger by the session
            SessionEvent::Log(_) | SessionEvent::Verbose(_) | SessionEvent::Phase(_) => {}
        }
        None
    }

    /// Act on terminal input received since the last call
    fn poll_input(&mut self, handle: &SessionHandle) {
        loop {
            match self.stdin.try_recv() {
                Ok(line) => self.on_line(handle, &line),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.stdin_open && self.prompt_pending {
                        self.prompt_pending = false;
                        handle.confirm(false);
                    }
                    self.stdin_open = false;
                    break;
                }
            }
        }
    }

    fn on_line(&mut self, handle: &SessionHandle, line: &str) {
        if self.prompt_pending {
            match parse_answer(line) {
                Some(answer) => {
                    self.prompt_pending = false;
                    handle.confirm(answer);
                }
                None => self.spinner.suspend(|| {
                    print!("Please answer y or n: ");
                    let _ = io::stdout().flush();
                }),
            }
        } else if line.trim().eq_ignore_ascii_case("q") {
            self.spinner.set_message("Cancelling...");
            handle.cancel();
        }
    }
}

/// Run `operation` and report how it ended
pub fn run(
    config: FlashConfig,
    target: Target,
    operation: Operation,
    assume_yes: bool,
) -> Result<Outcome, Box<dyn std::error::Error>> {
    let collaborators = Collaborators::system(&config);
    let handle = FlashSession::new(config, target, operation, collaborators).spawn()?;
    let mut console = Console::new(assume_yes);

    let reported = loop {
        console.poll_input(&handle);
        match handle.events().recv_timeout(UI_TICK) {
            Ok(event) => {
                if let Some(outcome) = console.on_event(&handle, event) {
                    break Some(outcome);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break None,
        }
    };

    // A session that died without a terminal event still has an outcome
    let joined = handle.join();
    Ok(reported.unwrap_or(joined))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_answer() {
        assert_eq!(parse_answer("Y"), Some(true));
        assert_eq!(parse_answer(" yes "), Some(true));
        assert_eq!(parse_answer(""), Some(false));
        assert_eq!(parse_answer("no"), Some(false));
        assert_eq!(parse_answer("maybe"), None);
    }
}
