//! Differential terminal output.
//!
//! Composition produces a [`Frame`]; [`diff`] compares it with the frame
//! currently on screen and yields the minimal [`UpdateInstruction`]s, which
//! [`FrameRenderer`] writes through crossterm.

mod frame;

pub use frame::{diff, Frame, UpdateInstruction};

use std::io::{self, Write};

use crossterm::{
    cursor::MoveTo,
    queue,
    style::Print,
    terminal::{Clear, ClearType},
};

/// Owns an output device and the frame last written to it.
pub struct FrameRenderer<W: Write> {
    out: W,
    previous: Option<Frame>,
}

impl<W: Write> FrameRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            previous: None,
        }
    }

    /// Force the next render to repaint everything.
    pub fn invalidate(&mut self) {
        self.previous = None;
    }

    /// Bring the screen from the previous frame to `next`. Returns the number
    /// of instructions written.
    ///
    /// On a write error the previous frame is dropped, so the following call
    /// starts from a full redraw instead of diffing against a screen that may
    /// be half-updated.
    pub fn render(&mut self, next: Frame) -> io::Result<usize> {
        let instructions = diff(self.previous.as_ref(), &next);
        if instructions.is_empty() {
            return Ok(0);
        }

        match self.write_all(&instructions) {
            Ok(()) => {
                self.previous = Some(next);
                Ok(instructions.len())
            }
            Err(e) => {
                self.previous = None;
                Err(e)
            }
        }
    }

    fn write_all(&mut self, instructions: &[UpdateInstruction]) -> io::Result<()> {
        for instruction in instructions {
            match instruction {
                UpdateInstruction::ClearScreen => queue!(self.out, Clear(ClearType::All))?,
                UpdateInstruction::MoveTo { row, col } => queue!(self.out, MoveTo(*col, *row))?,
                UpdateInstruction::ClearToEol => queue!(self.out, Clear(ClearType::UntilNewLine))?,
                UpdateInstruction::Text(text) => queue!(self.out, Print(text))?,
            }
        }
        self.out.flush()
    }

    #[cfg(test)]
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.out
    }
}
