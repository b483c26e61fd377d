use crate::ansi::{self, RESET};

/// One fully composed screen: exactly `height` rows, each exactly `width`
/// visible columns with no style left open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u16,
    height: u16,
    rows: Vec<String>,
}

impl Frame {
    /// Rows beyond `height` are dropped, missing rows are blank, and every row
    /// is fitted to `width`.
    pub fn new(width: u16, height: u16, rows: impl IntoIterator<Item = String>) -> Self {
        let mut fitted: Vec<String> = rows
            .into_iter()
            .take(height as usize)
            .map(|row| ansi::fit(&row, width as usize))
            .collect();
        fitted.resize_with(height as usize, || " ".repeat(width as usize));
        Self {
            width,
            height,
            rows: fitted,
        }
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn rows(&self) -> &[String] {
        &self.rows
    }

    fn same_size(&self, other: &Frame) -> bool {
        self.width == other.width && self.height == other.height
    }
}

/// One terminal write operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateInstruction {
    ClearScreen,
    /// Zero-based
    MoveTo { row: u16, col: u16 },
    ClearToEol,
    Text(String),
}

/// Instructions that turn the screen showing `previous` into `next`.
///
/// No previous frame, or one of another size, means a full redraw. Otherwise
/// only rows whose plain text changed are touched, starting at the first
/// differing column.
pub fn diff(previous: Option<&Frame>, next: &Frame) -> Vec<UpdateInstruction> {
    let previous = match previous {
        Some(prev) if prev.same_size(next) => prev,
        _ => return full_redraw(next),
    };

    let mut out = Vec::new();
    for (row, (old, new)) in previous.rows.iter().zip(&next.rows).enumerate() {
        let old_plain = ansi::strip(old);
        let new_plain = ansi::strip(new);
        if old_plain == new_plain {
            continue;
        }

        let first_diff = old_plain
            .chars()
            .zip(new_plain.chars())
            .take_while(|(a, b)| a == b)
            .count();

        let mut text = ansi::styled_suffix(new, first_diff);
        if ansi::style_at_end(&text).is_active() {
            text.push_str(RESET);
        }

        out.push(UpdateInstruction::MoveTo {
            row: row as u16,
            col: ansi::column_of(&new_plain, first_diff) as u16,
        });
        out.push(UpdateInstruction::ClearToEol);
        if !text.is_empty() {
            out.push(UpdateInstruction::Text(text));
        }
    }
    out
}

fn full_redraw(next: &Frame) -> Vec<UpdateInstruction> {
    let mut out = Vec::with_capacity(next.rows.len() * 2 + 1);
    out.push(UpdateInstruction::ClearScreen);
    for (row, text) in next.rows.iter().enumerate() {
        out.push(UpdateInstruction::MoveTo {
            row: row as u16,
            col: 0,
        });
        out.push(UpdateInstruction::Text(text.clone()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u16, rows: &[&str]) -> Frame {
        Frame::new(width, rows.len() as u16, rows.iter().map(|r| r.to_string()))
    }

    fn touched_rows(instructions: &[UpdateInstruction]) -> Vec<u16> {
        instructions
            .iter()
            .filter_map(|i| match i {
                UpdateInstruction::MoveTo { row, .. } => Some(*row),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_frame_is_exact_size() {
        let f = Frame::new(4, 3, vec!["abcdef".to_string(), "\x1b[31mx".to_string()]);
        assert_eq!(f.rows().len(), 3);
        assert!(f.rows().iter().all(|r| ansi::visible_width(r) == 4));
        assert!(f.rows().iter().all(|r| !ansi::style_at_end(r).is_active()));
        assert_eq!(f.rows()[2], "    ");
    }

    #[test]
    fn test_no_previous_frame_redraws_everything() {
        let next = frame(5, &["a", "b"]);
        let out = diff(None, &next);
        assert_eq!(out[0], UpdateInstruction::ClearScreen);
        assert_eq!(touched_rows(&out), vec![0, 1]);
    }

    #[test]
    fn test_size_change_redraws_everything() {
        let prev = frame(5, &["a", "b"]);
        let next = frame(6, &["a", "b"]);
        assert_eq!(diff(Some(&prev), &next)[0], UpdateInstruction::ClearScreen);

        let taller = frame(5, &["a", "b", "c"]);
        assert_eq!(diff(Some(&prev), &taller)[0], UpdateInstruction::ClearScreen);
    }

    #[test]
    fn test_identical_frames_emit_nothing() {
        let prev = frame(8, &["\x1b[32mok\x1b[0m", "same"]);
        let next = prev.clone();
        assert!(diff(Some(&prev), &next).is_empty());
    }

    #[test]
    fn test_restyled_but_same_text_is_skipped() {
        let prev = frame(8, &["hello"]);
        let next = frame(8, &["\x1b[1mhello\x1b[0m"]);
        assert!(diff(Some(&prev), &next).is_empty());
    }

    #[test]
    fn test_single_changed_row() {
        let prev = frame(10, &["top", "status: ok", "bottom"]);
        let next = frame(10, &["top", "status: no", "bottom"]);
        let out = diff(Some(&prev), &next);

        assert_eq!(touched_rows(&out), vec![1]);
        assert_eq!(
            out,
            vec![
                UpdateInstruction::MoveTo { row: 1, col: 8 },
                UpdateInstruction::ClearToEol,
                UpdateInstruction::Text("no".to_string()),
            ]
        );
    }

    #[test]
    fn test_suffix_carries_style_from_before_divergence() {
        let prev = frame(6, &["\x1b[31mabcdef"]);
        let next = frame(6, &["\x1b[31mabcXYZ"]);
        let out = diff(Some(&prev), &next);
        assert_eq!(
            out[2],
            UpdateInstruction::Text("\x1b[31mXYZ\x1b[0m".to_string())
        );
        assert_eq!(out[0], UpdateInstruction::MoveTo { row: 0, col: 3 });
    }

    #[test]
    fn test_shorter_row_clears_leftovers() {
        let prev = frame(10, &["long line"]);
        let next = frame(10, &["long"]);
        let out = diff(Some(&prev), &next);
        assert_eq!(out[0], UpdateInstruction::MoveTo { row: 0, col: 5 });
        assert_eq!(out[1], UpdateInstruction::ClearToEol);
    }

    #[test]
    fn test_wide_characters_shift_column() {
        let prev = frame(10, &["日本a"]);
        let next = frame(10, &["日本b"]);
        let out = diff(Some(&prev), &next);
        assert_eq!(out[0], UpdateInstruction::MoveTo { row: 0, col: 4 });
    }
}
