//! tmux control-mode protocol lines.

/// One notification from a control-mode client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// Pane output, unescaped but still raw bytes; a multibyte character
    /// may be split across two notifications
    Output { pane: String, data: Vec<u8> },
    /// The client is detaching; the optional reason comes from tmux
    Exit(Option<String>),
    /// Command replies and notifications the reader does not care about
    Other,
}

pub fn parse_control_line(line: &[u8]) -> ControlEvent {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if let Some(rest) = line.strip_prefix(b"%output ") {
        let (pane, data) = match rest.iter().position(|&b| b == b' ') {
            Some(at) => (&rest[..at], &rest[at + 1..]),
            None => (rest, &b""[..]),
        };
        return ControlEvent::Output {
            pane: String::from_utf8_lossy(pane).into_owned(),
            data: unescape(data),
        };
    }
    if let Some(rest) = line.strip_prefix(b"%exit") {
        let reason = String::from_utf8_lossy(rest).trim().to_string();
        return ControlEvent::Exit((!reason.is_empty()).then_some(reason));
    }
    ControlEvent::Other
}

/// tmux escapes bytes below 0x20 and the backslash as `\ooo`.
fn unescape(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal(&bytes[i + 1..i + 4]) {
            let value = bytes[i + 1..i + 4]
                .iter()
                .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            out.push(value as u8);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    out
}

fn is_octal(digits: &[u8]) -> bool {
    digits.len() == 3 && digits.iter().all(|b| (b'0'..=b'7').contains(b)) && digits[0] <= b'3'
}

/// Decodes a byte stream chunk by chunk, holding back an incomplete
/// trailing UTF-8 sequence until the rest of it arrives.
#[derive(Debug, Default)]
pub struct Utf8Stream {
    pending: Vec<u8>,
}

impl Utf8Stream {
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending.len());
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(std::str::from_utf8(&self.pending[..valid]).unwrap_or_default());
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }
}
