//! ANSI-aware text layout.
//!
//! Everything here works on styled strings as they come out of a pane: printable
//! text interleaved with escape sequences. Escape sequences take no columns and are
//! never split. An escape introducer that never terminates is kept as literal text.

mod sanitize;
mod width;

pub use sanitize::sanitize_line;
pub use width::char_width;

pub const ESC: char = '\x1b';

/// SGR reset.
pub const RESET: &str = "\x1b[0m";

/// One lexical unit of a styled string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    /// A complete escape sequence, introducer included
    Escape(&'a str),
    /// A single code point (printable or literal)
    Char(char),
}

/// Iterator over the tokens of a styled string.
pub struct Tokens<'a> {
    src: &'a str,
    pos: usize,
}

pub fn tokens(s: &str) -> Tokens<'_> {
    Tokens { src: s, pos: 0 }
}

impl<'a> Iterator for Tokens<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        let rest = &self.src[self.pos..];
        let c = rest.chars().next()?;
        if c == ESC {
            if let Some(len) = escape_len(rest) {
                self.pos += len;
                return Some(Token::Escape(&rest[..len]));
            }
        }
        self.pos += c.len_utf8();
        Some(Token::Char(c))
    }
}

/// Byte length of the escape sequence starting at `s[0]`, or `None` when it
/// is not terminated within `s`.
fn escape_len(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    match *bytes.get(1)? {
        // CSI: parameters and intermediates, then a final byte in 0x40..=0x7E
        b'[' => {
            for (i, &b) in bytes.iter().enumerate().skip(2) {
                match b {
                    0x20..=0x3F => continue,
                    0x40..=0x7E => return Some(i + 1),
                    _ => return None,
                }
            }
            None
        }
        // OSC: ends at BEL or ST
        b']' => {
            let mut i = 2;
            while i < bytes.len() {
                match bytes[i] {
                    0x07 => return Some(i + 1),
                    0x1B if bytes.get(i + 1) == Some(&b'\\') => return Some(i + 2),
                    0x1B => return None,
                    _ => i += 1,
                }
            }
            None
        }
        // nF: intermediates then a final byte, e.g. charset selection `ESC ( B`
        0x20..=0x2F => {
            for (i, &b) in bytes.iter().enumerate().skip(2) {
                match b {
                    0x20..=0x2F => continue,
                    0x30..=0x7E => return Some(i + 1),
                    _ => return None,
                }
            }
            None
        }
        0x30..=0x7E => Some(2),
        _ => None,
    }
}

/// True for `ESC [ ... m` with purely numeric parameters.
pub fn is_sgr(seq: &str) -> bool {
    seq.len() >= 3
        && seq.starts_with("\x1b[")
        && seq.ends_with('m')
        && seq[2..seq.len() - 1]
            .bytes()
            .all(|b| b.is_ascii_digit() || b == b';' || b == b':')
}

/// The SGR attributes in force at some point of a styled string.
///
/// Stored as the sequences seen since the last reset; replaying them in order
/// restores the same rendition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleState {
    codes: Vec<String>,
}

impl StyleState {
    pub fn apply(&mut self, seq: &str) {
        if !is_sgr(seq) {
            return;
        }
        let params = &seq[2..seq.len() - 1];
        let mut parts = params.splitn(2, ';');
        let first = parts.next().unwrap_or("");
        if first.is_empty() || first.bytes().all(|b| b == b'0') {
            self.codes.clear();
            if let Some(rest) = parts.next().filter(|r| !r.is_empty()) {
                self.codes.push(format!("\x1b[{}m", rest));
            }
        } else {
            self.codes.push(seq.to_string());
        }
    }

    pub fn is_active(&self) -> bool {
        !self.codes.is_empty()
    }

    /// Sequences that re-establish this state from a clean terminal.
    pub fn prefix(&self) -> String {
        self.codes.concat()
    }
}

/// Style in force after the whole of `s`.
pub fn style_at_end(s: &str) -> StyleState {
    let mut state = StyleState::default();
    for token in tokens(s) {
        if let Token::Escape(seq) = token {
            state.apply(seq);
        }
    }
    state
}

/// Terminal columns occupied by `s`.
pub fn visible_width(s: &str) -> usize {
    tokens(s)
        .map(|t| match t {
            Token::Char(c) => char_width(c),
            Token::Escape(_) => 0,
        })
        .sum()
}

/// `s` with every complete escape sequence removed.
pub fn strip(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for token in tokens(s) {
        if let Token::Char(c) = token {
            out.push(c);
        }
    }
    out
}

/// Cut `s` to at most `max_width` columns.
///
/// Escape sequences are copied whole. If anything was cut and any escape was
/// copied, a reset is appended so the cut does not leave a style open.
pub fn truncate(s: &str, max_width: usize) -> String {
    let mut out = String::with_capacity(s.len().min(max_width * 4 + 16));
    let mut width = 0;
    let mut styled = false;
    let mut cut = false;

    for token in tokens(s) {
        match token {
            Token::Escape(seq) => {
                styled = true;
                out.push_str(seq);
            }
            Token::Char(c) => {
                let w = char_width(c);
                if width + w > max_width {
                    cut = true;
                    break;
                }
                width += w;
                out.push(c);
            }
        }
    }

    if cut && styled {
        out.push_str(RESET);
    }
    out
}

/// Wrap `s` at explicit newlines and at `max_width` columns.
///
/// A style open at a width break is closed at the end of the line and reopened
/// at the start of the continuation. A code point wider than `max_width` is
/// placed alone on its line rather than dropped. `max_width == 0` disables
/// width breaking.
pub fn wrap(s: &str, max_width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for raw in s.split('\n') {
        wrap_line(raw, max_width, &mut lines);
    }
    lines
}

fn wrap_line(line: &str, max_width: usize, out: &mut Vec<String>) {
    let mut style = StyleState::default();
    let mut current = String::new();
    let mut width = 0;

    for token in tokens(line) {
        match token {
            Token::Escape(seq) => {
                style.apply(seq);
                current.push_str(seq);
            }
            Token::Char(c) => {
                let w = char_width(c);
                if max_width > 0 && width > 0 && width + w > max_width {
                    if style.is_active() {
                        current.push_str(RESET);
                    }
                    out.push(std::mem::take(&mut current));
                    current.push_str(&style.prefix());
                    width = 0;
                }
                current.push(c);
                width += w;
            }
        }
    }

    if style.is_active() {
        current.push_str(RESET);
    }
    out.push(current);
}

/// Exactly `width` columns: truncated if longer, space-padded if shorter, and
/// never ending with a style open.
pub fn fit(s: &str, width: usize) -> String {
    let mut out = truncate(s, width);
    if style_at_end(&out).is_active() {
        out.push_str(RESET);
    }
    let used = visible_width(&out);
    if used < width {
        out.extend(std::iter::repeat(' ').take(width - used));
    }
    out
}

/// Styled remainder of `s` starting at its `skip`-th character (counted over
/// the stripped text), preceded by whatever SGR state was in force there.
pub fn styled_suffix(s: &str, skip: usize) -> String {
    let mut style = StyleState::default();
    let mut seen = 0;
    let mut iter = tokens(s);
    let mut out = String::new();

    for token in iter.by_ref() {
        match token {
            Token::Escape(seq) => style.apply(seq),
            Token::Char(c) => {
                if seen == skip {
                    out.push_str(&style.prefix());
                    out.push(c);
                    break;
                }
                seen += 1;
            }
        }
    }

    for token in iter {
        match token {
            Token::Escape(seq) => out.push_str(seq),
            Token::Char(c) => out.push(c),
        }
    }
    out
}

/// Columns covered by the first `chars` characters of plain text.
pub fn column_of(plain: &str, chars: usize) -> usize {
    plain.chars().take(chars).map(char_width).sum()
}
