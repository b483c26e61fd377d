use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crossterm::style::Color;
use tracing::{debug, info, warn};

use crate::actions::Action;
use crate::ansi;
use crate::capture::{CaptureMethod, CaptureResult};
use crate::config::Config;
use crate::error::DeckError;
use crate::health::{HealthEvent, HealthMonitor, HealthPolicy, ProbeOutcome};
use crate::session::{CycleOutcome, Lifecycle, Session, SessionRegistry};
use crate::tmux::{forward_key, Forward, TmuxSession};

/// Sessions shown at once in the grid layout
pub const GRID_SLOTS: usize = 4;

/// Theme colors inspired by Claude Code
pub struct Theme {
    pub fg: Color,
    pub accent: Color,
    pub dim: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            fg: Color::Rgb { r: 220, g: 220, b: 220 },
            accent: Color::Rgb { r: 217, g: 119, b: 87 }, // Claude orange
            dim: Color::Rgb { r: 100, g: 100, b: 100 },
            success: Color::Rgb { r: 80, g: 200, b: 120 },
            warning: Color::Rgb { r: 255, g: 193, b: 7 },
            error: Color::Rgb { r: 220, g: 53, b: 69 },
        }
    }
}

/// Input mode for the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    /// Keys go to the active session
    Insert,
    /// Typing the initial command for a new session
    Creating,
    /// Typing an alias for the active session
    Aliasing,
    /// Waiting for y/n before killing this session
    Confirming(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Single,
    Grid,
}

/// Latest captured view of one session
#[derive(Debug, Clone)]
pub struct PaneState {
    /// Content of the last successful capture
    pub content: String,
    /// Method of the latest capture; `None` when it failed
    pub method: CaptureMethod,
    pub error: Option<DeckError>,
    pub updated: Instant,
}

/// Main application state
pub struct App {
    pub registry: SessionRegistry,
    pub health: HealthMonitor,
    panes: HashMap<String, PaneState>,
    pub layout: Layout,
    pub theme: Theme,
    /// Current input mode
    pub input_mode: InputMode,
    /// Text input buffer
    pub input_buffer: String,
    /// Current message to display (info or error)
    pub message: Option<String>,
    /// Pending action queue
    pending_actions: Vec<Action>,
    default_command: Option<String>,
    size: (u16, u16),
}

impl App {
    pub fn new(config: &Config) -> Self {
        Self {
            registry: SessionRegistry::new(config.session_prefix.clone()),
            health: HealthMonitor::new(HealthPolicy {
                failure_threshold: config.failure_threshold,
                probe_timeout: config.probe_timeout(),
            }),
            panes: HashMap::new(),
            layout: Layout::Single,
            theme: Theme::default(),
            input_mode: InputMode::Normal,
            input_buffer: String::new(),
            message: None,
            pending_actions: Vec::new(),
            default_command: config.default_command.clone(),
            size: (80, 24),
        }
    }

    pub fn size(&self) -> (u16, u16) {
        self.size
    }

    pub fn set_size(&mut self, width: u16, height: u16) {
        self.size = (width, height);
    }

    pub fn pane(&self, session_id: &str) -> Option<&PaneState> {
        self.panes.get(session_id)
    }

    /// Take pending actions (drains the queue)
    pub fn take_pending_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.pending_actions)
    }

    pub fn report(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    /// Sessions whose output is on screen, in display order.
    pub fn visible_sessions(&self) -> Vec<Session> {
        let sessions = self.registry.sessions();
        match self.layout {
            Layout::Single => self.registry.active_snapshot().into_iter().collect(),
            Layout::Grid => {
                let page = self.registry.active_index().unwrap_or(0) / GRID_SLOTS;
                sessions
                    .iter()
                    .skip(page * GRID_SLOTS)
                    .take(GRID_SLOTS)
                    .cloned()
                    .collect()
            }
        }
    }

    /// Handle an action and return whether to quit
    pub fn handle_action(&mut self, action: Action) -> Result<bool> {
        match action {
            Action::KeyPress(key) => self.handle_key(key),
            Action::Resize(width, height) => {
                self.set_size(width, height);
                Ok(false)
            }
            Action::SessionsUpdated(listed) => {
                self.sync_sessions(&listed);
                Ok(false)
            }
            Action::Captured { session_id, result } => {
                self.record_capture(&session_id, result);
                Ok(false)
            }
            Action::Probed {
                session_id,
                outcome,
            } => {
                self.record_probe(&session_id, &outcome);
                Ok(false)
            }
            Action::Error(msg) | Action::Notice(msg) => {
                self.message = Some(msg);
                Ok(false)
            }
            Action::Launched { number, result } => {
                match result {
                    Ok(session_id) => {
                        let session = self.registry.confirm(number, session_id).clone();
                        self.session_started(&session);
                    }
                    Err(e) => self.message = Some(e),
                }
                Ok(false)
            }
            Action::Restarted { session_id, result } => {
                match result {
                    Ok(()) => self.session_restarted(&session_id),
                    Err(e) => self.message = Some(e),
                }
                Ok(false)
            }
            Action::Killed { session_id, result } => {
                let message = match result.map(|()| self.forget_session(&session_id)) {
                    Ok(Ok(session)) => format!("killed session {}", session.label()),
                    Ok(Err(e)) => e.to_string(),
                    Err(e) => e,
                };
                self.message = Some(message);
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    fn sync_sessions(&mut self, listed: &[TmuxSession]) {
        let names: Vec<String> = listed.iter().map(|s| s.name.clone()).collect();
        let report = self.registry.sync_listing(&names);
        for id in &report.promoted {
            debug!(session = %id, "session is up");
        }
        for id in report.adopted {
            info!(session = %id, "tracking existing session");
            self.pending_actions.push(Action::TrackSession(id));
        }
        for id in report.missing {
            let event = self.health.observe(&id, &ProbeOutcome::NotFound, None);
            self.on_health_event(&id, event);
        }
    }

    fn record_capture(&mut self, session_id: &str, result: CaptureResult) {
        if self.registry.get(session_id).is_none() {
            return;
        }
        match self.panes.get_mut(session_id) {
            Some(pane) if !result.is_success() => {
                // keep the last good content on screen, flag it as offline
                pane.method = CaptureMethod::None;
                pane.error = result.error;
                pane.updated = Instant::now();
            }
            _ => {
                self.panes.insert(
                    session_id.to_string(),
                    PaneState {
                        content: result.content,
                        method: result.method,
                        error: result.error,
                        updated: Instant::now(),
                    },
                );
            }
        }
    }

    fn record_probe(&mut self, session_id: &str, outcome: &ProbeOutcome) {
        if self.registry.get(session_id).is_none() {
            return;
        }
        let recent = self
            .panes
            .get(session_id)
            .filter(|p| p.method != CaptureMethod::None)
            .map(|p| p.content.clone());
        let event = self.health.observe(session_id, outcome, recent.as_deref());
        self.on_health_event(session_id, event);
    }

    fn on_health_event(&mut self, session_id: &str, event: Option<HealthEvent>) {
        let Some(event) = event else { return };
        let label = self
            .registry
            .get(session_id)
            .map(|s| s.label())
            .unwrap_or_else(|| session_id.to_string());

        let lifecycle = match event {
            HealthEvent::Checkpoint => {
                self.pending_actions
                    .push(Action::Checkpoint(session_id.to_string()));
                self.message = Some(format!("{} hit a limit; saving checkpoint", label));
                None
            }
            HealthEvent::Unresponsive => Some(Lifecycle::Unresponsive),
            HealthEvent::Recovered => Some(Lifecycle::Running),
            HealthEvent::Died => {
                self.pending_actions
                    .push(Action::Checkpoint(session_id.to_string()));
                self.message = Some(format!("{} ended; press r to restart", label));
                Some(Lifecycle::Dead)
            }
        };

        if let Some(lifecycle) = lifecycle {
            if let Err(e) = self.registry.set_lifecycle(session_id, lifecycle) {
                debug!(session = session_id, error = %e, "lifecycle update skipped");
            }
        }
    }

    /// A launched session is ready.
    fn session_started(&mut self, session: &Session) {
        self.health.reset(&session.id);
        self.panes.remove(&session.id);
        self.message = Some(format!("started session {}", session.label()));
    }

    /// A dead session was relaunched under the same id.
    fn session_restarted(&mut self, session_id: &str) {
        if let Err(e) = self.registry.revive(session_id) {
            warn!(session = session_id, error = %e, "restarted session is not tracked");
            return;
        }
        self.health.reset(session_id);
        self.panes.remove(session_id);
        self.message = Some(format!("restarted {}", session_id));
    }

    /// Stop tracking a session.
    fn forget_session(&mut self, session_id: &str) -> Result<Session, DeckError> {
        let session = self.registry.remove(session_id)?;
        self.health.forget(session_id);
        self.panes.remove(session_id);
        Ok(session)
    }

    /// Periodic bookkeeping: drop sessions dead for longer than `grace` and
    /// repair the registry if needed. Returns the ids that were dropped.
    pub fn maintain(&mut self, grace: Duration) -> Vec<String> {
        let reaped: Vec<String> = self
            .registry
            .reap_dead(grace)
            .into_iter()
            .map(|s| s.id)
            .collect();
        for id in &reaped {
            self.health.forget(id);
            self.panes.remove(id);
        }
        self.registry.check_invariants();
        if let InputMode::Confirming(id) = &self.input_mode {
            if self.registry.get(id).is_none() {
                self.input_mode = InputMode::Normal;
            }
        }
        if self.input_mode == InputMode::Insert && self.registry.active().is_none() {
            self.input_mode = InputMode::Normal;
        }
        reaped
    }

    /// Plain text of the bottom of the active pane, as many lines as fit on
    /// screen.
    pub fn visible_tail(&self) -> Option<String> {
        let session = self.registry.active()?;
        let pane = self.panes.get(&session.id)?;
        let rows = self.size.1.saturating_sub(2).max(1) as usize;
        let lines: Vec<&str> = pane.content.split('\n').collect();
        let start = lines.len().saturating_sub(rows);
        Some(
            lines[start..]
                .iter()
                .map(|l| ansi::strip(l).trim_end().to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        // Clear message on any key press
        if self.message.is_some() && self.input_mode == InputMode::Normal {
            self.message = None;
        }

        match self.input_mode.clone() {
            InputMode::Normal => self.handle_normal_key(key),
            InputMode::Insert => self.handle_insert_key(key),
            InputMode::Creating => self.handle_creating_key(key),
            InputMode::Aliasing => self.handle_aliasing_key(key),
            InputMode::Confirming(id) => self.handle_confirming_key(key, id),
        }
    }

    fn active_id(&self) -> Option<String> {
        self.registry.active().map(|s| s.id.clone())
    }

    fn handle_normal_key(&mut self, key: KeyEvent) -> Result<bool> {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            return Ok(key.code == KeyCode::Char('c'));
        }

        match key.code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('n') => {
                self.input_mode = InputMode::Creating;
                self.input_buffer = self.default_command.clone().unwrap_or_default();
            }
            KeyCode::Char('x') => match self.active_id() {
                Some(id) => self.input_mode = InputMode::Confirming(id),
                None => self.message = Some("no session to kill".to_string()),
            },
            KeyCode::Char('a') => match self.registry.active() {
                Some(session) => {
                    self.input_buffer = session.alias.clone().unwrap_or_default();
                    self.input_mode = InputMode::Aliasing;
                }
                None => self.message = Some("no session to name".to_string()),
            },
            KeyCode::Char(c @ '1'..='9') => {
                if let Err(e) = self.registry.switch_to(&c.to_string()) {
                    self.message = Some(e.to_string());
                }
            }
            KeyCode::Tab => self.cycle(true),
            KeyCode::BackTab => self.cycle(false),
            KeyCode::Char('i') | KeyCode::Enter => match self.registry.active() {
                Some(session) if session.is_dead() => {
                    self.message = Some(format!("{} has ended; press r to restart", session.label()));
                }
                Some(_) => self.input_mode = InputMode::Insert,
                None => self.message = Some("no session; press n to start one".to_string()),
            },
            KeyCode::Char('g') => {
                self.layout = match self.layout {
                    Layout::Single => Layout::Grid,
                    Layout::Grid => Layout::Single,
                };
            }
            KeyCode::Char('s') => {
                if let Some(id) = self.active_id() {
                    self.pending_actions.push(Action::Checkpoint(id));
                }
            }
            KeyCode::Char('y') => match self.visible_tail() {
                Some(text) => self.pending_actions.push(Action::Yank(text)),
                None => self.message = Some("nothing to copy".to_string()),
            },
            KeyCode::Char('r') => match self.registry.active() {
                Some(session) if session.is_dead() => {
                    self.pending_actions
                        .push(Action::RestartSession(session.id.clone()));
                }
                Some(session) => {
                    self.message = Some(format!("{} is still running", session.label()));
                }
                None => {}
            },
            KeyCode::Char('o') => {
                if let Some(id) = self.active_id() {
                    self.pending_actions.push(Action::AttachSession(id));
                }
            }
            _ => {}
        }
        Ok(false)
    }

    fn cycle(&mut self, forward: bool) {
        let outcome = if forward {
            self.registry.cycle_next()
        } else {
            self.registry.cycle_prev()
        };
        if outcome == CycleOutcome::NothingToCycle {
            self.message = Some("nothing to cycle to".to_string());
        }
    }

    fn handle_insert_key(&mut self, key: KeyEvent) -> Result<bool> {
        // Ctrl-] arrives as either ']' or '5' depending on the terminal
        if key.modifiers.contains(KeyModifiers::CONTROL)
            && matches!(key.code, KeyCode::Char(']') | KeyCode::Char('5'))
        {
            self.input_mode = InputMode::Normal;
            return Ok(false);
        }

        let Some(session_id) = self.active_id() else {
            self.input_mode = InputMode::Normal;
            self.message = Some("no active session".to_string());
            return Ok(false);
        };

        match forward_key(key) {
            Some(Forward::Text(text)) => self.pending_actions.push(Action::SendText {
                session_id,
                text,
                press_enter: false,
            }),
            Some(Forward::Key(key)) => {
                self.pending_actions.push(Action::SendKey { session_id, key })
            }
            None => {}
        }
        Ok(false)
    }

    fn handle_creating_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Enter => {
                let command = std::mem::take(&mut self.input_buffer);
                let command = Some(command.trim().to_string()).filter(|c| !c.is_empty());
                self.pending_actions.push(Action::CreateSession(command));
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Esc => {
                self.input_buffer.clear();
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Char(c) => self.input_buffer.push(c),
            KeyCode::Backspace => {
                self.input_buffer.pop();
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_aliasing_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Enter => {
                let alias = std::mem::take(&mut self.input_buffer);
                self.input_mode = InputMode::Normal;
                let Some(number) = self.registry.active().map(|s| s.number) else {
                    return Ok(false);
                };
                let result = if alias.trim().is_empty() {
                    self.registry.clear_alias(number)
                } else {
                    self.registry.set_alias(number, &alias)
                };
                if let Err(e) = result {
                    self.message = Some(e.to_string());
                }
            }
            KeyCode::Esc => {
                self.input_buffer.clear();
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Char(c) if !c.is_whitespace() => self.input_buffer.push(c),
            KeyCode::Backspace => {
                self.input_buffer.pop();
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_confirming_key(&mut self, key: KeyEvent, session_id: String) -> Result<bool> {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => {
                self.pending_actions.push(Action::KillSession(session_id));
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                self.input_mode = InputMode::Normal;
            }
            _ => {}
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventKind;

    fn key(code: KeyCode) -> Action {
        Action::KeyPress(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn ctrl(c: char) -> Action {
        Action::KeyPress(KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL))
    }

    fn app_with(n: u32) -> App {
        let mut app = App::new(&Config::default());
        for i in 1..=n {
            app.registry.adopt(&format!("deck-{}", i));
        }
        app
    }

    fn press(app: &mut App, action: Action) -> bool {
        app.handle_action(action).expect("handle")
    }

    #[test]
    fn test_quit_keys() {
        let mut app = app_with(0);
        assert!(press(&mut app, key(KeyCode::Char('q'))));
        assert!(press(&mut app, ctrl('c')));
    }

    #[test]
    fn test_number_keys_switch_and_report_unknown() {
        let mut app = app_with(3);
        press(&mut app, key(KeyCode::Char('2')));
        assert_eq!(app.registry.active().map(|s| s.number), Some(2));

        press(&mut app, key(KeyCode::Char('7')));
        assert_eq!(app.registry.active().map(|s| s.number), Some(2));
        assert_eq!(app.message.as_deref(), Some("no session matches '7'"));
    }

    #[test]
    fn test_tab_cycles() {
        let mut app = app_with(2);
        press(&mut app, key(KeyCode::Tab));
        assert_eq!(app.registry.active().map(|s| s.number), Some(2));
        press(&mut app, key(KeyCode::BackTab));
        assert_eq!(app.registry.active().map(|s| s.number), Some(1));
    }

    #[test]
    fn test_insert_mode_forwards_keys() {
        let mut app = app_with(1);
        press(&mut app, key(KeyCode::Char('i')));
        assert_eq!(app.input_mode, InputMode::Insert);

        press(&mut app, key(KeyCode::Char('q')));
        press(&mut app, key(KeyCode::Enter));
        press(&mut app, ctrl('c'));
        press(&mut app, ctrl(']'));
        assert_eq!(app.input_mode, InputMode::Normal);

        let sent: Vec<String> = app
            .take_pending_actions()
            .into_iter()
            .map(|a| match a {
                Action::SendText { text, .. } => format!("text:{}", text),
                Action::SendKey { key, .. } => format!("key:{}", key),
                other => format!("{:?}", other),
            })
            .collect();
        assert_eq!(sent, vec!["text:q", "key:Enter", "key:C-c"]);
    }

    #[test]
    fn test_insert_without_session_gives_guidance() {
        let mut app = app_with(0);
        press(&mut app, key(KeyCode::Char('i')));
        assert_eq!(app.input_mode, InputMode::Normal);
        assert!(app.message.as_deref().is_some_and(|m| m.contains("press n")));
    }

    #[test]
    fn test_create_prompt() {
        let mut app = app_with(0);
        press(&mut app, key(KeyCode::Char('n')));
        for c in "htop".chars() {
            press(&mut app, key(KeyCode::Char(c)));
        }
        press(&mut app, key(KeyCode::Enter));
        let actions = app.take_pending_actions();
        assert!(matches!(
            actions.as_slice(),
            [Action::CreateSession(Some(cmd))] if cmd == "htop"
        ));

        press(&mut app, key(KeyCode::Char('n')));
        press(&mut app, key(KeyCode::Enter));
        assert!(matches!(
            app.take_pending_actions().as_slice(),
            [Action::CreateSession(None)]
        ));
    }

    #[test]
    fn test_kill_needs_confirmation() {
        let mut app = app_with(2);
        press(&mut app, key(KeyCode::Char('x')));
        assert_eq!(app.input_mode, InputMode::Confirming("deck-1".to_string()));
        press(&mut app, key(KeyCode::Char('n')));
        assert!(app.take_pending_actions().is_empty());

        press(&mut app, key(KeyCode::Char('x')));
        press(&mut app, key(KeyCode::Char('y')));
        assert!(matches!(
            app.take_pending_actions().as_slice(),
            [Action::KillSession(id)] if id == "deck-1"
        ));
    }

    #[test]
    fn test_alias_prompt() {
        let mut app = app_with(2);
        press(&mut app, key(KeyCode::Char('a')));
        for c in "main".chars() {
            press(&mut app, key(KeyCode::Char(c)));
        }
        press(&mut app, key(KeyCode::Enter));
        assert_eq!(app.registry.resolve("main").map(|s| s.number), Ok(1));

        press(&mut app, key(KeyCode::Char('a')));
        assert_eq!(app.input_buffer, "main");
        for _ in 0..4 {
            press(&mut app, key(KeyCode::Backspace));
        }
        press(&mut app, key(KeyCode::Char('9')));
        press(&mut app, key(KeyCode::Enter));
        assert_eq!(app.message.as_deref(), Some("invalid alias '9'"));
    }

    #[test]
    fn test_absent_session_dies_once_and_checkpoints() {
        let mut app = app_with(2);
        for _ in 0..3 {
            press(
                &mut app,
                Action::SessionsUpdated(vec![TmuxSession::new("deck-2")]),
            );
        }

        let checkpoints: Vec<_> = app
            .take_pending_actions()
            .into_iter()
            .filter(|a| matches!(a, Action::Checkpoint(id) if id == "deck-1"))
            .collect();
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(
            app.registry.get("deck-1").map(|s| s.lifecycle),
            Some(Lifecycle::Dead)
        );
        assert_eq!(
            app.registry.get("deck-2").map(|s| s.lifecycle),
            Some(Lifecycle::Running)
        );

        let reaped = app.maintain(Duration::ZERO);
        assert_eq!(reaped, vec!["deck-1".to_string()]);
        assert_eq!(app.registry.active().map(|s| s.number), Some(2));
    }

    #[test]
    fn test_critical_output_requests_checkpoint() {
        let mut app = app_with(1);
        press(
            &mut app,
            Action::Captured {
                session_id: "deck-1".to_string(),
                result: CaptureResult::success(CaptureMethod::LiveMemory, "usage limit reached".into()),
            },
        );
        press(
            &mut app,
            Action::Probed {
                session_id: "deck-1".to_string(),
                outcome: ProbeOutcome::Alive,
            },
        );
        assert!(matches!(
            app.take_pending_actions().as_slice(),
            [Action::Checkpoint(id)] if id == "deck-1"
        ));
        assert_eq!(
            app.registry.get("deck-1").map(|s| s.lifecycle),
            Some(Lifecycle::Running)
        );
    }

    #[test]
    fn test_failed_capture_keeps_last_content() {
        let mut app = app_with(1);
        press(
            &mut app,
            Action::Captured {
                session_id: "deck-1".to_string(),
                result: CaptureResult::success(CaptureMethod::OneShotDump, "hello".into()),
            },
        );
        press(
            &mut app,
            Action::Captured {
                session_id: "deck-1".to_string(),
                result: CaptureResult::unavailable(DeckError::CaptureUnavailable("gone".into())),
            },
        );
        let pane = app.pane("deck-1").expect("pane");
        assert_eq!(pane.content, "hello");
        assert_eq!(pane.method, CaptureMethod::None);
        assert!(pane.error.is_some());
    }

    #[test]
    fn test_yank_copies_plain_tail() {
        let mut app = app_with(1);
        app.set_size(40, 4);
        press(
            &mut app,
            Action::Captured {
                session_id: "deck-1".to_string(),
                result: CaptureResult::success(
                    CaptureMethod::LiveMemory,
                    "a\nb\n\x1b[31mc\x1b[0m  ".into(),
                ),
            },
        );
        let mut event = KeyEvent::new(KeyCode::Char('y'), KeyModifiers::NONE);
        event.kind = KeyEventKind::Press;
        press(&mut app, Action::KeyPress(event));
        assert!(matches!(
            app.take_pending_actions().as_slice(),
            [Action::Yank(text)] if text == "b\nc"
        ));
    }

    #[test]
    fn test_grid_shows_page_of_active_session() {
        let mut app = app_with(6);
        press(&mut app, key(KeyCode::Char('g')));
        let ids: Vec<u32> = app.visible_sessions().iter().map(|s| s.number).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);

        press(&mut app, key(KeyCode::Char('6')));
        let ids: Vec<u32> = app.visible_sessions().iter().map(|s| s.number).collect();
        assert_eq!(ids, vec![5, 6]);
    }

    #[test]
    fn test_restart_only_for_dead_sessions() {
        let mut app = app_with(1);
        press(&mut app, key(KeyCode::Char('r')));
        assert!(app.take_pending_actions().is_empty());

        app.registry
            .set_lifecycle("deck-1", Lifecycle::Dead)
            .expect("mark dead");
        press(&mut app, key(KeyCode::Char('r')));
        assert!(matches!(
            app.take_pending_actions().as_slice(),
            [Action::RestartSession(id)] if id == "deck-1"
        ));

        press(
            &mut app,
            Action::Restarted {
                session_id: "deck-1".to_string(),
                result: Ok(()),
            },
        );
        assert_eq!(
            app.registry.get("deck-1").map(|s| s.lifecycle),
            Some(Lifecycle::Starting)
        );
    }

    #[test]
    fn test_launch_result_confirms_reserved_number() {
        let mut app = app_with(1);
        let (number, name) = app.registry.reserve();
        assert!(app.registry.get(&name).is_none());

        press(
            &mut app,
            Action::Launched {
                number,
                result: Ok(name.clone()),
            },
        );
        assert_eq!(app.registry.active().map(|s| s.id.as_str()), Some("deck-2"));
        assert_eq!(app.message.as_deref(), Some("started session 2"));

        let (number, _) = app.registry.reserve();
        press(
            &mut app,
            Action::Launched {
                number,
                result: Err("failed to launch session: no server".to_string()),
            },
        );
        assert_eq!(app.registry.len(), 2);
        assert_eq!(app.registry.reserve().0, 4);
        assert!(app.message.as_deref().is_some_and(|m| m.contains("no server")));
    }

    #[test]
    fn test_kill_result_forgets_only_on_success() {
        let mut app = app_with(2);
        press(
            &mut app,
            Action::Killed {
                session_id: "deck-1".to_string(),
                result: Err("multiplexer: failed to kill deck-1".to_string()),
            },
        );
        assert_eq!(app.registry.len(), 2);

        press(
            &mut app,
            Action::Killed {
                session_id: "deck-1".to_string(),
                result: Ok(()),
            },
        );
        assert!(app.registry.get("deck-1").is_none());
        assert_eq!(app.message.as_deref(), Some("killed session 1"));
    }
}
