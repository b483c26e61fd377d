use super::{char_width, is_sgr, tokens, StyleState, Token};

const TAB_STOP: usize = 8;

/// Normalize one line of raw pane output for storage.
///
/// Keeps printable text and SGR sequences. Cursor movement, OSC titles, lone
/// escape introducers and other control bytes are dropped; tabs expand to the
/// next tab stop; a bare carriage return restarts the line the way a terminal
/// would overwrite it.
pub fn sanitize_line(raw: &str) -> String {
    let raw = raw.strip_suffix('\r').unwrap_or(raw);
    let mut out = String::with_capacity(raw.len());
    let mut style = StyleState::default();
    let mut width = 0;

    for token in tokens(raw) {
        match token {
            Token::Escape(seq) => {
                if is_sgr(seq) {
                    style.apply(seq);
                    out.push_str(seq);
                }
            }
            Token::Char('\t') => {
                let pad = TAB_STOP - width % TAB_STOP;
                out.extend(std::iter::repeat(' ').take(pad));
                width += pad;
            }
            Token::Char('\r') => {
                out.clear();
                out.push_str(&style.prefix());
                width = 0;
            }
            Token::Char(c) if (c as u32) < 0x20 || ('\u{7f}'..='\u{9f}').contains(&c) => {}
            Token::Char(c) => {
                width += char_width(c);
                out.push(c);
            }
        }
    }
    out
}
