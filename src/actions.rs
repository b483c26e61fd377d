use crossterm::event::KeyEvent;

use crate::capture::CaptureResult;
use crate::health::ProbeOutcome;
use crate::tmux::TmuxSession;

/// Actions that can be dispatched through the application
#[derive(Debug, Clone)]
pub enum Action {
    /// A key was pressed
    KeyPress(KeyEvent),
    /// Terminal was resized
    Resize(u16, u16),
    /// Sessions were listed from tmux
    SessionsUpdated(Vec<TmuxSession>),
    /// A capture finished for a session
    Captured {
        session_id: String,
        result: CaptureResult,
    },
    /// A liveness probe finished for a session
    Probed {
        session_id: String,
        outcome: ProbeOutcome,
    },
    /// An error occurred
    Error(String),
    /// Outcome of a background effect worth telling the operator
    Notice(String),
    /// A launch for a reserved session number finished
    Launched {
        number: u32,
        /// The new session id, or why the launch failed
        result: Result<String, String>,
    },
    /// A dead session was relaunched, or why it could not be
    Restarted {
        session_id: String,
        result: Result<(), String>,
    },
    /// A kill request finished
    Killed {
        session_id: String,
        result: Result<(), String>,
    },

    // Effects requested by the app and carried out by the main loop
    /// Launch a new session, optionally typing a command into it
    CreateSession(Option<String>),
    /// Start recording a session found already running in tmux
    TrackSession(String),
    /// Kill a session
    KillSession(String),
    /// Relaunch a dead session under its old name
    RestartSession(String),
    /// Type text into a session
    SendText {
        session_id: String,
        text: String,
        press_enter: bool,
    },
    /// Send a named key (`Enter`, `C-c`, ...) to a session
    SendKey { session_id: String, key: String },
    /// Write the last lines of a session to its checkpoint file
    Checkpoint(String),
    /// Copy text to the clipboard
    Yank(String),
    /// Suspend the console and attach to a session full-screen
    AttachSession(String),
}
