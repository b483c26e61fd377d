use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// What a key press turns into when forwarded to a managed session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Forward {
    /// Literal text, sent with `send-keys -l`
    Text(String),
    /// A tmux key name
    Key(String),
}

/// Translate an operator key event into something tmux can replay.
pub fn forward_key(key: KeyEvent) -> Option<Forward> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let alt = key.modifiers.contains(KeyModifiers::ALT);

    let named = |name: &str| {
        let mut out = String::new();
        if ctrl {
            out.push_str("C-");
        }
        if alt {
            out.push_str("M-");
        }
        out.push_str(name);
        Some(Forward::Key(out))
    };

    match key.code {
        KeyCode::Char(c) if ctrl || alt => named(&c.to_ascii_lowercase().to_string()),
        KeyCode::Char(c) => Some(Forward::Text(c.to_string())),
        KeyCode::Enter => named("Enter"),
        KeyCode::Backspace => named("BSpace"),
        KeyCode::Tab => named("Tab"),
        KeyCode::BackTab => Some(Forward::Key("BTab".to_string())),
        KeyCode::Esc => named("Escape"),
        KeyCode::Up => named("Up"),
        KeyCode::Down => named("Down"),
        KeyCode::Left => named("Left"),
        KeyCode::Right => named("Right"),
        KeyCode::Home => named("Home"),
        KeyCode::End => named("End"),
        KeyCode::PageUp => named("PPage"),
        KeyCode::PageDown => named("NPage"),
        KeyCode::Delete => named("DC"),
        KeyCode::Insert => named("IC"),
        KeyCode::F(n) if (1..=12).contains(&n) => named(&format!("F{n}")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn test_plain_chars_are_text() {
        assert_eq!(
            forward_key(key(KeyCode::Char('x'), KeyModifiers::NONE)),
            Some(Forward::Text("x".into()))
        );
        assert_eq!(
            forward_key(key(KeyCode::Char('X'), KeyModifiers::SHIFT)),
            Some(Forward::Text("X".into()))
        );
    }

    #[test]
    fn test_control_keys() {
        assert_eq!(
            forward_key(key(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(Forward::Key("C-c".into()))
        );
        assert_eq!(
            forward_key(key(KeyCode::Left, KeyModifiers::ALT)),
            Some(Forward::Key("M-Left".into()))
        );
    }

    #[test]
    fn test_named_keys() {
        assert_eq!(
            forward_key(key(KeyCode::Enter, KeyModifiers::NONE)),
            Some(Forward::Key("Enter".into()))
        );
        assert_eq!(
            forward_key(key(KeyCode::Backspace, KeyModifiers::NONE)),
            Some(Forward::Key("BSpace".into()))
        );
        assert_eq!(
            forward_key(key(KeyCode::F(5), KeyModifiers::NONE)),
            Some(Forward::Key("F5".into()))
        );
        assert_eq!(forward_key(key(KeyCode::F(20), KeyModifiers::NONE)), None);
    }
}
