//! Running a session on its own thread

use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use crate::events::{Control, Outcome, SessionEvent};
use crate::session::FlashSession;

/// Owner's end of a session running on a worker thread
pub struct SessionHandle {
    events: Receiver<SessionEvent>,
    control: Sender<Control>,
    thread: JoinHandle<Outcome>,
}

impl SessionHandle {
    /// Events in emission order; the last one is always
    /// [`SessionEvent::Terminal`]
    pub fn events(&self) -> &Receiver<SessionEvent> {
        &self.events
    }

    /// A sender for control messages, for use from another thread
    pub fn controller(&self) -> Sender<Control> {
        self.control.clone()
    }

    /// Ask the session to stop at its next check
    pub fn cancel(&self) {
        let _ = self.control.send(Control::Cancel);
    }

    /// Answer the pending prompt
    pub fn confirm(&self, answer: bool) {
        let _ = self.control.send(Control::Confirm(answer));
    }

    /// Wait for the session to finish
    pub fn join(self) -> Outcome {
        match self.thread.join() {
            Ok(outcome) => outcome,
            Err(_) => Outcome::Failed("flash session panicked".to_string()),
        }
    }
}

impl FlashSession {
    /// Start the session on a new thread
    pub fn spawn(self) -> io::Result<SessionHandle> {
        let (event_tx, events) = mpsc::channel();
        let (control, control_rx) = mpsc::channel();

        let thread = thread::Builder::new()
            .name("flash-session".to_string())
            .spawn(move || self.run(event_tx, control_rx))?;

        Ok(SessionHandle {
            events,
            control,
            thread,
        })
    }
}
