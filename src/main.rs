use anyhow::{Context, Result};
use crossterm::{
    cursor,
    event::{self, Event, KeyEventKind},
    execute, terminal,
};
use std::io::{self, Stdout};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod actions;
mod ansi;
mod app;
mod buffer;
mod capture;
mod config;
mod error;
mod health;
mod render;
mod session;
mod tmux;
mod transcript;
mod ui;

use actions::Action;
use app::App;
use capture::{
    CaptureCascade, CaptureOptions, DumpCapture, LiveFeeds, LiveMemoryCapture, LogFallbackCapture,
};
use config::Config;
use error::DeckError;
use health::probe_with_timeout;
use render::FrameRenderer;
use tmux::{Launcher, TmuxClient};
use transcript::TranscriptStore;

/// Raw mode and the alternate screen, undone on drop.
struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> Result<Self> {
        terminal::enable_raw_mode().context("Failed to enable raw mode")?;
        execute!(io::stdout(), terminal::EnterAlternateScreen, cursor::Hide)
            .context("Failed to enter alternate screen")?;
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), cursor::Show, terminal::LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
    }
}

/// Log to a file under the data dir; the terminal belongs to the console.
fn init_logging(data_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(data_dir.join("agent-deck.log"))
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

/// Everything the main loop needs to carry out effects.
#[derive(Clone)]
struct Deck {
    client: Arc<TmuxClient>,
    store: TranscriptStore,
    feeds: Arc<LiveFeeds>,
    cascade: Arc<CaptureCascade>,
    work_dir: PathBuf,
    default_command: Option<String>,
    checkpoint_lines: usize,
}

impl Deck {
    fn new(config: &Config) -> Self {
        let client = Arc::new(
            TmuxClient::with_path(config.tmux_path.clone())
                .on_socket(config.tmux_socket.clone())
                .with_timeout(config.command_timeout()),
        );
        let store = TranscriptStore::new(config.data_dir());
        let feeds = Arc::new(
            LiveFeeds::new(client.clone(), config.buffer_capacity).with_seeder(client.clone()),
        );
        let cascade = Arc::new(CaptureCascade::new(
            vec![
                Box::new(LiveMemoryCapture::new(feeds.clone(), config.stale_after())),
                Box::new(LogFallbackCapture::new(store.clone(), Some(config.stale_after()))),
                Box::new(DumpCapture::new(client.clone())),
            ],
            CaptureOptions {
                timeout: config.capture_timeout(),
                ttl: config.cache_ttl(),
            },
        ));

        Self {
            client,
            store,
            feeds,
            cascade,
            work_dir: config.work_dir(),
            default_command: config.default_command.clone(),
            checkpoint_lines: config.checkpoint_lines,
        }
    }

    /// Fresh transcript and reader state for a session that was just
    /// (re)created under `session_id`.
    async fn prepare(&self, session_id: &str) {
        if let Err(e) = self.store.reset(session_id).await {
            warn!(session = session_id, error = %e, "transcript reset failed");
        }
        self.record(session_id).await;
        self.feeds.reset(session_id);
        self.cascade.forget(session_id);
    }

    /// Mirror the session's output into its transcript file.
    async fn record(&self, session_id: &str) {
        let path = self.store.transcript_path(session_id);
        if let Err(e) = self.client.pipe_to_file(session_id, &path).await {
            warn!(session = session_id, error = %format!("{:#}", e), "transcript pipe failed");
        }
    }

    fn release(&self, session_id: &str) {
        self.feeds.detach(session_id);
        self.cascade.forget(session_id);
    }

    /// Carry out one effect requested by the app.
    ///
    /// Keystrokes go out inline so a failed send shows up before the next
    /// key. Everything slower runs in its own task and reports back through
    /// `tx`, leaving the loop free to keep drawing.
    async fn perform(&self, app: &mut App, action: Action, tx: &mpsc::UnboundedSender<Action>) {
        match action {
            Action::CreateSession(command) => {
                let (number, name) = app.registry.reserve();
                let deck = self.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let result = deck.launch(&name).await;
                    let started = result.clone().ok();
                    let _ = tx.send(Action::Launched { number, result });
                    if let (Some(session_id), Some(command)) = (started, command) {
                        deck.type_line(&session_id, &command, &tx).await;
                    }
                });
            }
            Action::TrackSession(session_id) => {
                let deck = self.clone();
                tokio::spawn(async move { deck.record(&session_id).await });
            }
            Action::KillSession(session_id) => {
                let deck = self.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let result = deck.kill(&session_id).await;
                    let _ = tx.send(Action::Killed { session_id, result });
                });
            }
            Action::RestartSession(session_id) => {
                let deck = self.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let result = deck.restart(&session_id).await;
                    let restarted = result.is_ok();
                    let _ = tx.send(Action::Restarted {
                        session_id: session_id.clone(),
                        result,
                    });
                    if let (true, Some(command)) = (restarted, &deck.default_command) {
                        deck.type_line(&session_id, command, &tx).await;
                    }
                });
            }
            Action::SendText {
                session_id,
                text,
                press_enter,
            } => {
                if !self.client.send_text(&session_id, &text, press_enter).await {
                    app.report(
                        DeckError::Multiplexer(format!("could not send input to {}", session_id))
                            .to_string(),
                    );
                }
            }
            Action::SendKey { session_id, key } => {
                if !self.client.send_control_key(&session_id, &key).await {
                    app.report(
                        DeckError::Multiplexer(format!("could not send {} to {}", key, session_id))
                            .to_string(),
                    );
                }
            }
            Action::Checkpoint(session_id) => {
                let last_seen = app.pane(&session_id).map(|p| p.content.clone());
                let deck = self.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let message = deck.checkpoint(&session_id, last_seen).await;
                    let _ = tx.send(Action::Notice(message));
                });
            }
            Action::Yank(text) => match arboard::Clipboard::new() {
                Ok(mut clipboard) => {
                    if let Err(e) = clipboard.set_text(&text) {
                        app.report(format!("Clipboard error: {}", e));
                    } else {
                        app.report(format!("copied {} lines", text.lines().count()));
                    }
                }
                Err(e) => app.report(format!("Clipboard error: {}", e)),
            },
            _ => {}
        }
    }

    /// Start the reserved session `name` with its transcript in place.
    async fn launch(&self, name: &str) -> Result<String, String> {
        let session_id = session::launch(&*self.client, name, &self.work_dir, None)
            .await
            .map_err(|e| e.to_string())?;
        self.prepare(&session_id).await;
        Ok(session_id)
    }

    async fn kill(&self, session_id: &str) -> Result<(), String> {
        if self.client.terminate(session_id).await || !self.client.exists(session_id).await {
            self.release(session_id);
            Ok(())
        } else {
            Err(DeckError::Multiplexer(format!("failed to kill {}", session_id)).to_string())
        }
    }

    /// Relaunch a dead session under its old name.
    async fn restart(&self, session_id: &str) -> Result<(), String> {
        if self.client.exists(session_id).await {
            self.client.terminate(session_id).await;
        }
        session::launch(&*self.client, session_id, &self.work_dir, None)
            .await
            .map_err(|e| e.to_string())?;
        self.prepare(session_id).await;
        Ok(())
    }

    async fn type_line(&self, session_id: &str, line: &str, tx: &mpsc::UnboundedSender<Action>) {
        if !self.client.send_text(session_id, line, true).await {
            let _ = tx.send(Action::Notice(format!(
                "could not type '{}' into {}",
                line, session_id
            )));
        }
    }

    /// Save the last known lines of a session: from its live buffer if there
    /// is one, otherwise from whatever the cascade can still get, otherwise
    /// from what was last on screen. Returns the message for the operator.
    async fn checkpoint(&self, session_id: &str, last_seen: Option<String>) -> String {
        let lines = match self.feeds.buffer(session_id) {
            Some(buffer) if !buffer.is_empty() => buffer.last_lines(self.checkpoint_lines),
            _ => {
                let result = self.cascade.capture(session_id, self.checkpoint_lines).await;
                if result.is_success() {
                    result.lines().iter().map(|l| l.to_string()).collect()
                } else {
                    last_seen
                        .map(|content| content.split('\n').map(str::to_string).collect())
                        .unwrap_or_default()
                }
            }
        };

        if lines.is_empty() {
            return format!("nothing to save for {}", session_id);
        }
        match self
            .store
            .write_checkpoint(session_id, &lines, self.checkpoint_lines)
            .await
        {
            Ok(path) => format!("checkpoint saved to {}", path.display()),
            Err(e) => format!("checkpoint failed: {:#}", e),
        }
    }

    /// Kick off captures for the on-screen sessions. Results come back as
    /// actions; a slow session never holds up the others.
    fn spawn_captures(&self, app: &App, tx: &mpsc::UnboundedSender<Action>) {
        let lines = (app.size().1 as usize).max(1) * 2;
        for session in app.visible_sessions() {
            if session.is_dead() {
                continue;
            }
            let cascade = self.cascade.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = cascade.capture(&session.id, lines).await;
                let _ = tx.send(Action::Captured {
                    session_id: session.id,
                    result,
                });
            });
        }
    }

    /// Probe every live session, refreshing its capture first so distress
    /// markers are judged on recent output.
    fn spawn_health_checks(&self, app: &App, tx: &mpsc::UnboundedSender<Action>) {
        let timeout = app.health.policy().probe_timeout;
        for session in app.registry.sessions() {
            if session.is_dead() {
                continue;
            }
            let session_id = session.id.clone();
            let client = self.client.clone();
            let cascade = self.cascade.clone();
            let lines = self.checkpoint_lines;
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = cascade.capture(&session_id, lines).await;
                let _ = tx.send(Action::Captured {
                    session_id: session_id.clone(),
                    result,
                });
                let outcome = probe_with_timeout(&*client, &session_id, timeout).await;
                let _ = tx.send(Action::Probed {
                    session_id,
                    outcome,
                });
            });
        }
    }
}

/// Lets the input reader hand the terminal to a child process and take it
/// back afterwards.
#[derive(Debug, Default)]
struct InputGate {
    paused: AtomicBool,
    parked: AtomicBool,
}

impl InputGate {
    /// Stop the reader and wait until it is no longer polling stdin.
    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        for _ in 0..50 {
            if self.parked.load(Ordering::SeqCst) {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        warn!("input reader still busy while handing over the terminal");
    }

    fn resume(&self) {
        self.parked.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Reader side: true while the terminal belongs to someone else.
    fn hold(&self) -> bool {
        let paused = self.paused.load(Ordering::SeqCst);
        self.parked.store(paused, Ordering::SeqCst);
        paused
    }
}

/// Hand the terminal to `tmux attach` until the operator detaches.
fn attach(
    client: &TmuxClient,
    session_id: &str,
    guard: &mut Option<TerminalGuard>,
    gate: &InputGate,
) -> Result<()> {
    gate.pause();
    guard.take();
    let cmd = client.attach_command(session_id);
    let status = std::process::Command::new(&cmd[0])
        .args(&cmd[1..])
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status();
    let entered = TerminalGuard::enter();
    gate.resume();
    *guard = Some(entered?);
    status.context("Failed to attach")?;
    Ok(())
}

fn spawn_input(tx: mpsc::UnboundedSender<Action>, gate: Arc<InputGate>) {
    tokio::task::spawn_blocking(move || loop {
        if gate.hold() {
            if tx.is_closed() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
            continue;
        }
        if !event::poll(Duration::from_millis(100)).unwrap_or(false) {
            if tx.is_closed() {
                break;
            }
            continue;
        }
        let action = match event::read() {
            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => Action::KeyPress(key),
            Ok(Event::Resize(width, height)) => Action::Resize(width, height),
            Ok(_) => continue,
            Err(e) => Action::Error(format!("Input: {}", e)),
        };
        if tx.send(action).is_err() {
            break;
        }
    });
}

fn spawn_listing(client: Arc<TmuxClient>, interval: Duration, tx: mpsc::UnboundedSender<Action>) {
    tokio::spawn(async move {
        loop {
            let action = match client.list_sessions().await {
                Ok(sessions) => Action::SessionsUpdated(sessions),
                Err(e) => Action::Error(format!("Tmux: {:#}", e)),
            };
            if tx.send(action).is_err() {
                break;
            }
            tokio::time::sleep(interval).await;
        }
    });
}

async fn run(
    config: &Config,
    deck: &Deck,
    renderer: &mut FrameRenderer<Stdout>,
    guard: &mut Option<TerminalGuard>,
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Action>();
    let mut app = App::new(config);
    if let Ok((width, height)) = terminal::size() {
        app.set_size(width, height);
    }

    let gate = Arc::new(InputGate::default());
    spawn_input(tx.clone(), gate.clone());
    spawn_listing(deck.client.clone(), config.list_interval(), tx.clone());

    let mut tick = tokio::time::interval(config.tick());
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut health_tick = tokio::time::interval(config.health_interval());
    health_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            Some(action) = rx.recv() => {
                if let Action::Resize(..) = action {
                    renderer.invalidate();
                }
                if app.handle_action(action)? {
                    break;
                }
            }
            _ = tick.tick() => {
                for session_id in app.maintain(config.dead_grace()) {
                    deck.release(&session_id);
                }
                deck.spawn_captures(&app, &tx);
            }
            _ = health_tick.tick() => {
                deck.spawn_health_checks(&app, &tx);
            }
        }

        for pending in app.take_pending_actions() {
            match pending {
                Action::AttachSession(session_id) => {
                    if let Err(e) = attach(&deck.client, &session_id, guard, &gate) {
                        app.report(format!("{:#}", e));
                    }
                    renderer.invalidate();
                }
                other => deck.perform(&mut app, other, &tx).await,
            }
        }

        // Only losing the terminal ends the loop
        renderer
            .render(ui::compose(&app))
            .context("Failed to draw to the terminal")?;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let loaded = Config::load();
    let config = loaded.as_ref().cloned().unwrap_or_default();

    if let Err(e) = init_logging(&config.data_dir()) {
        eprintln!("agent-deck: logging disabled: {:#}", e);
    }
    match &loaded {
        Ok(_) => info!(path = ?Config::path(), "config loaded"),
        Err(e) => warn!(error = %format!("{:#}", e), "ignoring unreadable config"),
    }

    let deck = Deck::new(&config);
    if let Err(e) = deck.store.ensure_dirs().await {
        warn!(error = %format!("{:#}", e), "transcript directory unavailable");
    }
    if !deck.client.is_server_running().await {
        info!("no tmux server yet; it starts with the first session");
    }

    let mut guard = Some(TerminalGuard::enter()?);
    let mut renderer = FrameRenderer::new(io::stdout());

    let result = run(&config, &deck, &mut renderer, &mut guard).await;

    deck.feeds.detach_all();
    drop(guard);
    if let Err(e) = &result {
        error!(error = %format!("{:#}", e), "console stopped");
    }
    result
}
