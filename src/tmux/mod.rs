mod client;
mod control;
mod keys;

pub use client::TmuxClient;
pub use control::{parse_control_line, ControlEvent, Utf8Stream};
pub use keys::{forward_key, Forward};

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::AsyncRead;

/// A multiplexer session as reported by `list-sessions`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmuxSession {
    /// Session name; used as the session id throughout the console
    pub name: String,
}

#[cfg(test)]
impl TmuxSession {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

/// Starts, drives and stops managed-process sessions.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Start a session named `name` in `work_dir`, optionally typing
    /// `initial_input` into it. Returns the session id.
    async fn start(&self, name: &str, work_dir: &Path, initial_input: Option<&str>)
        -> Result<String>;

    async fn send_text(&self, session_id: &str, text: &str, press_enter: bool) -> bool;

    /// `key` is a tmux key name such as `Enter`, `BSpace` or `C-c`.
    async fn send_control_key(&self, session_id: &str, key: &str) -> bool;

    async fn exists(&self, session_id: &str) -> bool;

    async fn terminate(&self, session_id: &str) -> bool;
}

/// Output stream of a standing attached reader.
pub struct AttachedStream {
    /// Control-mode protocol lines
    pub output: Box<dyn AsyncRead + Send + Unpin>,
    /// The attached client process; dropping it detaches
    pub child: Option<tokio::process::Child>,
}

/// Opens a standing reader on a session.
#[async_trait]
pub trait Attach: Send + Sync {
    async fn attach(&self, session_id: &str) -> Result<AttachedStream>;
}
