//! Turns application state into a [`Frame`].

use crossterm::style::{Attribute, Color, Stylize};

use crate::ansi;
use crate::app::{App, InputMode, Layout, PaneState};
use crate::capture::CaptureMethod;
use crate::health::HealthStatus;
use crate::render::Frame;
use crate::session::Session;

const TITLE: &str = " agent-deck ";

const HINTS: &str =
    "n new  x kill  a alias  1-9 switch  Tab cycle  i insert  g grid  s save  y yank  o attach  q quit";

fn paint(text: &str, color: Color) -> String {
    text.with(color).to_string()
}

fn status_color(app: &App, status: HealthStatus) -> Color {
    match status {
        HealthStatus::Healthy => app.theme.success,
        HealthStatus::Warning => app.theme.warning,
        HealthStatus::Critical | HealthStatus::Dead => app.theme.error,
    }
}

/// Compose the whole screen.
pub fn compose(app: &App) -> Frame {
    let (width, height) = app.size();
    // one consistent view of the active session for the whole pass
    let active = app.registry.active_snapshot();

    let mut rows = Vec::with_capacity(height as usize);
    rows.push(header(app, active.as_ref()));

    let body_height = height.saturating_sub(2) as usize;
    let body = match (&active, app.layout) {
        (None, _) => guidance(width as usize, body_height),
        (Some(session), Layout::Single) => pane_lines(app, session, width as usize, body_height),
        (Some(_), Layout::Grid) => grid(app, active.as_ref(), width as usize, body_height),
    };
    rows.extend(body.into_iter().take(body_height));
    while rows.len() < height.saturating_sub(1) as usize {
        rows.push(String::new());
    }
    rows.push(footer(app, active.as_ref()));

    Frame::new(width, height, rows)
}

fn header(app: &App, active: Option<&Session>) -> String {
    let mut line = TITLE.with(app.theme.accent).attribute(Attribute::Bold).to_string();
    line.push_str(&paint("│", app.theme.dim));

    for session in app.registry.sessions() {
        let status = app.health.status(&session.id);
        let tab = format!(" {} {} ", status.icon(), session.label());
        let styled = if active.is_some_and(|a| a.id == session.id) {
            tab.with(status_color(app, status)).attribute(Attribute::Reverse).to_string()
        } else {
            paint(&tab, status_color(app, status))
        };
        line.push_str(&styled);
    }
    line
}

fn footer(app: &App, active: Option<&Session>) -> String {
    let label = active.map(|s| s.label()).unwrap_or_default();
    match &app.input_mode {
        InputMode::Creating => format!(" command for new session> {}", app.input_buffer),
        InputMode::Aliasing => format!(" alias for {}> {}", label, app.input_buffer),
        InputMode::Confirming(id) => {
            let name = app
                .registry
                .get(id)
                .map(|s| s.label())
                .unwrap_or_else(|| id.clone());
            paint(&format!(" kill session {}? y/n", name), app.theme.warning)
        }
        InputMode::Insert => format!(
            " {} {}  (Ctrl-] to leave)",
            " INSERT ".reverse(),
            label
        ),
        InputMode::Normal => {
            let method = active
                .and_then(|s| app.pane(&s.id))
                .map(|p| format!("[{}] ", p.method))
                .unwrap_or_default();
            match &app.message {
                Some(message) => format!(" {}{}", method, message),
                None => format!(" {}{}", method, paint(HINTS, app.theme.dim)),
            }
        }
    }
}

/// "No session" screen: says what to do instead of showing nothing.
fn guidance(width: usize, height: usize) -> Vec<String> {
    let text = [
        "No sessions yet.",
        "",
        "Press n to start one (type a command or just Enter),",
        "or start a tmux session named deck-<number> and it will be picked up.",
        "q quits.",
    ];
    let top = height.saturating_sub(text.len()) / 2;
    let mut rows = vec![String::new(); top];
    for line in text {
        let pad = width.saturating_sub(ansi::visible_width(line)) / 2;
        rows.push(format!("{}{}", " ".repeat(pad), line));
    }
    rows
}

/// Bottom `height` rows of a session's output wrapped to `width`.
fn pane_lines(app: &App, session: &Session, width: usize, height: usize) -> Vec<String> {
    if height == 0 {
        return Vec::new();
    }
    let pane = app.pane(&session.id);
    let mut lines = match pane {
        Some(p) if !p.content.is_empty() => ansi::wrap(&p.content, width),
        _ => placeholder(app, session, pane),
    };

    if session.is_dead() {
        lines.push(paint(
            &format!("[{} has ended; r restarts it]", session.label()),
            app.theme.error,
        ));
    }

    let start = lines.len().saturating_sub(height);
    lines.split_off(start)
}

fn placeholder(app: &App, session: &Session, pane: Option<&PaneState>) -> Vec<String> {
    match pane.and_then(|p| p.error.as_ref()) {
        Some(error) if !error.is_transient() => {
            vec![paint(&format!("{} is offline: {}", session.id, error), app.theme.error)]
        }
        error => {
            let mut lines = vec![paint(
                &format!("waiting for output from {}...", session.id),
                app.theme.dim,
            )];
            if let Some(error) = error {
                lines.push(paint(&format!("({})", error), app.theme.dim));
            }
            lines
        }
    }
}

/// Up to four sessions in a 2x2 grid, each with a title row.
fn grid(app: &App, active: Option<&Session>, width: usize, height: usize) -> Vec<String> {
    let visible = app.visible_sessions();
    let left = width.saturating_sub(1) / 2;
    let right = width.saturating_sub(1) - left;
    let top = height / 2;
    let bottom = height - top;

    let cell = |slot: usize, w: usize, h: usize| -> Vec<String> {
        let mut out = vec![" ".repeat(w); h];
        if let Some(session) = visible.get(slot) {
            let lines = quadrant(app, session, active, w, h);
            for (row, line) in out.iter_mut().zip(lines) {
                *row = ansi::fit(&line, w);
            }
        }
        out
    };

    let separator = paint("│", app.theme.dim);
    let mut rows = Vec::with_capacity(height);
    for (first, second, h) in [(0, 1, top), (2, 3, bottom)] {
        let a = cell(first, left, h);
        let b = cell(second, right, h);
        for (l, r) in a.into_iter().zip(b) {
            rows.push(format!("{}{}{}", l, separator, r));
        }
    }
    rows
}

fn quadrant(
    app: &App,
    session: &Session,
    active: Option<&Session>,
    width: usize,
    height: usize,
) -> Vec<String> {
    if height == 0 {
        return Vec::new();
    }
    let status = app.health.status(&session.id);
    let method = app
        .pane(&session.id)
        .map(|p| p.method)
        .unwrap_or(CaptureMethod::None);

    let title = format!(" {} {} [{}] ", status.icon(), session.label(), method);
    let title = ansi::fit(&title, width);
    let title = if active.is_some_and(|a| a.id == session.id) {
        title.with(app.theme.accent).attribute(Attribute::Reverse).to_string()
    } else {
        title.with(app.theme.fg).to_string()
    };

    let mut out = vec![title];
    out.extend(pane_lines(app, session, width, height - 1));
    out
}
