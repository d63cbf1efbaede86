//! The `Terminal` abstraction and its concrete implementations.
//!
//! The core never talks to a TTY directly: every surface write goes through
//! this trait, so the rest of the crate (and its tests) can run against an
//! in-memory recording instead of a real terminal.

use crate::buffer::CellChange;
use crate::escape::{Capabilities, EscapeWriter};
use crate::style::Style;
use crossterm::{
    ExecutableCommand,
    event::{DisableMouseCapture, EnableMouseCapture},
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use std::io::{self, Write};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Abstraction over a raw-mode TTY, injected into [`crate::app::App`] so the
/// event loop never depends on a concrete terminal implementation.
pub trait Terminal {
    /// Current terminal dimensions in cells.
    fn size(&self) -> io::Result<(u16, u16)>;

    /// Enters raw mode (no line buffering, no echo).
    fn enter_raw_mode(&mut self) -> io::Result<()>;

    /// Restores cooked mode.
    fn exit_raw_mode(&mut self) -> io::Result<()>;

    /// Switches to the alternate screen buffer.
    fn enter_alt_screen(&mut self) -> io::Result<()>;

    /// Restores the primary screen buffer.
    fn exit_alt_screen(&mut self) -> io::Result<()>;

    /// Enables SGR mouse reporting.
    fn enable_mouse(&mut self) -> io::Result<()>;

    /// Disables mouse reporting.
    fn disable_mouse(&mut self) -> io::Result<()>;

    /// Hides the cursor.
    fn hide_cursor(&mut self) -> io::Result<()>;

    /// Shows the cursor.
    fn show_cursor(&mut self) -> io::Result<()>;

    /// Moves the cursor to 0-indexed `(x, y)`.
    fn set_cursor(&mut self, x: u16, y: u16) -> io::Result<()>;

    /// Clears the whole screen.
    fn clear(&mut self) -> io::Result<()>;

    /// Clears from the cursor to the end of the current line.
    fn clear_to_end(&mut self) -> io::Result<()>;

    /// Writes a minimal set of cursor moves and styled runes for `changes`,
    /// then flushes the underlying stream.
    fn flush(&mut self, changes: &[CellChange]) -> io::Result<()>;

    /// Writes raw bytes directly, bypassing cell tracking. Used by the
    /// inline session for history writes that live outside the buffer.
    fn write_direct(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// The color capabilities this terminal should be driven at.
    fn caps(&self) -> Capabilities;
}

/// A `Terminal` backed by `crossterm` and real stdout.
pub struct CrosstermTerminal {
    stdout: io::Stdout,
    current_style: Option<Style>,
    current_pos: Option<(u16, u16)>,
    caps: Capabilities,
}

/// An in-memory `Terminal` that records every escape sequence written to it
/// instead of touching a real TTY. Used by tests and by headless hosts that
/// want golden-file diffing.
pub struct RecordingTerminal {
    pub out: Vec<u8>,
    size: (u16, u16),
    current_style: Option<Style>,
    current_pos: Option<(u16, u16)>,
    caps: Capabilities,
    pub raw_mode: bool,
    pub alt_screen: bool,
    pub mouse_enabled: bool,
    pub cursor_visible: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CrosstermTerminal {
    /// Creates a new terminal writer over real stdout. Detects 24-bit color
    /// support from `COLORTERM`, falling back to the 256-color palette.
    pub fn new() -> Self {
        Self {
            stdout: io::stdout(),
            current_style: None,
            current_pos: None,
            caps: detect_capabilities(),
        }
    }

    /// Writes one coalesced run. `width` is the real terminal-column advance
    /// the run's glyphs occupy (wide glyphs count for 2), which is not
    /// necessarily `text.chars().count()`. A run with no printable text (a
    /// lone wide-character continuation marker) is a no-op: it was already
    /// accounted for by the wide glyph to its left.
    fn write_run(&mut self, x: u16, y: u16, style: Style, text: &str, width: u16) -> io::Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        let mut w = EscapeWriter::new();
        if self.current_pos != Some((x, y)) {
            w.move_to(x, y);
        }
        if self.current_style != Some(style) {
            w.set_style(style, self.caps);
        }
        w.text(text);
        self.stdout.write_all(w.as_bytes())?;
        self.current_pos = Some((x + width, y));
        self.current_style = Some(style);
        Ok(())
    }
}

impl Default for CrosstermTerminal {
    fn default() -> Self {
        Self::new()
    }
}

fn detect_capabilities() -> Capabilities {
    if std::env::var("COLORTERM").is_ok_and(|v| v == "truecolor" || v == "24bit") {
        Capabilities::TrueColor
    } else if std::env::var("TERM").is_ok_and(|t| t.contains("256color")) {
        Capabilities::Extended256
    } else {
        Capabilities::Basic
    }
}

/// Groups sorted changes into runs of consecutive same-row, same-style
/// cells, mirroring the coalescing an optimizing terminal writer performs.
///
/// Adjacency is judged by buffer column (`next.x == this_x + 1`), not by
/// terminal-cursor advance: a wide glyph's continuation cell always sits one
/// buffer column to its right, even though the glyph itself consumes two
/// *terminal* columns. Continuation cells (`width == 0`) contribute no text
/// of their own — they're already covered by the wide glyph that precedes
/// them — so the run's returned width is the sum of the display widths of
/// the codepoints actually pushed, which is the real cursor advance after
/// writing the run, not `text.chars().count()`.
fn group_runs(changes: &[CellChange]) -> Vec<(u16, u16, Style, String, u16)> {
    let mut runs = Vec::new();
    let mut iter = changes.iter().peekable();
    while let Some(first) = iter.next() {
        let (y, style) = (first.y, first.cell.style);
        let start_x = first.x;
        let mut text = String::new();
        let mut printed_width: u16 = 0;
        if first.cell.width != 0 {
            text.push(first.cell.rune);
            printed_width += first.cell.width as u16;
        }
        let mut next_col = first.x + 1;
        while let Some(&next) = iter.peek() {
            if next.y == y && next.x == next_col && next.cell.style == style {
                let nc = iter.next().unwrap();
                if nc.cell.width != 0 {
                    text.push(nc.cell.rune);
                    printed_width += nc.cell.width as u16;
                }
                next_col += 1;
            } else {
                break;
            }
        }
        runs.push((start_x, y, style, text, printed_width));
    }
    runs
}

impl Terminal for CrosstermTerminal {
    fn size(&self) -> io::Result<(u16, u16)> {
        crossterm::terminal::size()
    }

    fn enter_raw_mode(&mut self) -> io::Result<()> {
        enable_raw_mode()
    }

    fn exit_raw_mode(&mut self) -> io::Result<()> {
        disable_raw_mode()
    }

    fn enter_alt_screen(&mut self) -> io::Result<()> {
        self.stdout.execute(EnterAlternateScreen)?;
        Ok(())
    }

    fn exit_alt_screen(&mut self) -> io::Result<()> {
        self.stdout.execute(LeaveAlternateScreen)?;
        Ok(())
    }

    fn enable_mouse(&mut self) -> io::Result<()> {
        self.stdout.execute(EnableMouseCapture)?;
        Ok(())
    }

    fn disable_mouse(&mut self) -> io::Result<()> {
        self.stdout.execute(DisableMouseCapture)?;
        Ok(())
    }

    fn hide_cursor(&mut self) -> io::Result<()> {
        let mut w = EscapeWriter::new();
        w.hide_cursor();
        self.stdout.write_all(w.as_bytes())
    }

    fn show_cursor(&mut self) -> io::Result<()> {
        let mut w = EscapeWriter::new();
        w.show_cursor();
        self.stdout.write_all(w.as_bytes())
    }

    fn set_cursor(&mut self, x: u16, y: u16) -> io::Result<()> {
        let mut w = EscapeWriter::new();
        w.move_to(x, y);
        self.current_pos = Some((x, y));
        self.stdout.write_all(w.as_bytes())
    }

    fn clear(&mut self) -> io::Result<()> {
        let mut w = EscapeWriter::new();
        w.clear_screen().move_to(0, 0);
        self.current_pos = Some((0, 0));
        self.current_style = None;
        self.stdout.write_all(w.as_bytes())
    }

    fn clear_to_end(&mut self) -> io::Result<()> {
        let mut w = EscapeWriter::new();
        w.clear_line();
        self.stdout.write_all(w.as_bytes())
    }

    fn flush(&mut self, changes: &[CellChange]) -> io::Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut sorted = changes.to_vec();
        sorted.sort_by_key(|c| (c.y, c.x));
        for (x, y, style, text, width) in group_runs(&sorted) {
            self.write_run(x, y, style, &text, width)?;
        }
        self.stdout.flush()
    }

    fn write_direct(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.current_pos = None;
        self.current_style = None;
        self.stdout.write_all(bytes)?;
        self.stdout.flush()
    }

    fn caps(&self) -> Capabilities {
        self.caps
    }
}

impl RecordingTerminal {
    /// Creates a recording terminal of the given size, reporting
    /// [`Capabilities::TrueColor`] by default (override with
    /// [`RecordingTerminal::with_caps`]).
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            out: Vec::new(),
            size: (width, height),
            current_style: None,
            current_pos: None,
            caps: Capabilities::TrueColor,
            raw_mode: false,
            alt_screen: false,
            mouse_enabled: false,
            cursor_visible: true,
        }
    }

    /// Overrides the reported capability level.
    pub fn with_caps(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self
    }

    /// Simulates a resize signal.
    pub fn set_size(&mut self, width: u16, height: u16) {
        self.size = (width, height);
    }
}

impl Terminal for RecordingTerminal {
    fn size(&self) -> io::Result<(u16, u16)> {
        Ok(self.size)
    }

    fn enter_raw_mode(&mut self) -> io::Result<()> {
        self.raw_mode = true;
        Ok(())
    }

    fn exit_raw_mode(&mut self) -> io::Result<()> {
        self.raw_mode = false;
        Ok(())
    }

    fn enter_alt_screen(&mut self) -> io::Result<()> {
        self.alt_screen = true;
        let mut w = EscapeWriter::new();
        w.enter_alt_screen();
        self.out.extend_from_slice(w.as_bytes());
        Ok(())
    }

    fn exit_alt_screen(&mut self) -> io::Result<()> {
        self.alt_screen = false;
        let mut w = EscapeWriter::new();
        w.exit_alt_screen();
        self.out.extend_from_slice(w.as_bytes());
        Ok(())
    }

    fn enable_mouse(&mut self) -> io::Result<()> {
        self.mouse_enabled = true;
        let mut w = EscapeWriter::new();
        w.enable_mouse();
        self.out.extend_from_slice(w.as_bytes());
        Ok(())
    }

    fn disable_mouse(&mut self) -> io::Result<()> {
        self.mouse_enabled = false;
        let mut w = EscapeWriter::new();
        w.disable_mouse();
        self.out.extend_from_slice(w.as_bytes());
        Ok(())
    }

    fn hide_cursor(&mut self) -> io::Result<()> {
        self.cursor_visible = false;
        let mut w = EscapeWriter::new();
        w.hide_cursor();
        self.out.extend_from_slice(w.as_bytes());
        Ok(())
    }

    fn show_cursor(&mut self) -> io::Result<()> {
        self.cursor_visible = true;
        let mut w = EscapeWriter::new();
        w.show_cursor();
        self.out.extend_from_slice(w.as_bytes());
        Ok(())
    }

    fn set_cursor(&mut self, x: u16, y: u16) -> io::Result<()> {
        self.current_pos = Some((x, y));
        let mut w = EscapeWriter::new();
        w.move_to(x, y);
        self.out.extend_from_slice(w.as_bytes());
        Ok(())
    }

    fn clear(&mut self) -> io::Result<()> {
        self.current_pos = Some((0, 0));
        self.current_style = None;
        let mut w = EscapeWriter::new();
        w.clear_screen().move_to(0, 0);
        self.out.extend_from_slice(w.as_bytes());
        Ok(())
    }

    fn clear_to_end(&mut self) -> io::Result<()> {
        let mut w = EscapeWriter::new();
        w.clear_line();
        self.out.extend_from_slice(w.as_bytes());
        Ok(())
    }

    fn flush(&mut self, changes: &[CellChange]) -> io::Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut sorted = changes.to_vec();
        sorted.sort_by_key(|c| (c.y, c.x));
        for (x, y, style, text, width) in group_runs(&sorted) {
            if text.is_empty() {
                continue;
            }
            let mut w = EscapeWriter::new();
            if self.current_pos != Some((x, y)) {
                w.move_to(x, y);
            }
            if self.current_style != Some(style) {
                w.set_style(style, self.caps);
            }
            w.text(&text);
            self.out.extend_from_slice(w.as_bytes());
            self.current_pos = Some((x + width, y));
            self.current_style = Some(style);
        }
        Ok(())
    }

    fn write_direct(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.current_pos = None;
        self.current_style = None;
        self.out.extend_from_slice(bytes);
        Ok(())
    }

    fn caps(&self) -> Capabilities {
        self.caps
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Cell;

    #[test]
    fn flush_moves_cursor_and_writes_run() {
        let mut term = RecordingTerminal::new(10, 2);
        let style = Style::new();
        let changes = vec![
            CellChange { x: 0, y: 0, cell: Cell { rune: 'H', style, width: 1 } },
            CellChange { x: 1, y: 0, cell: Cell { rune: 'i', style, width: 1 } },
        ];
        term.flush(&changes).unwrap();
        let s = String::from_utf8_lossy(&term.out);
        assert!(s.contains("1;1H"));
        assert!(s.contains("Hi"));
    }

    #[test]
    fn flush_skips_cursor_move_when_already_in_position() {
        let mut term = RecordingTerminal::new(10, 2);
        term.set_cursor(0, 0).unwrap();
        term.out.clear();
        let style = Style::new();
        let changes = vec![CellChange { x: 0, y: 0, cell: Cell { rune: 'x', style, width: 1 } }];
        term.flush(&changes).unwrap();
        let s = String::from_utf8_lossy(&term.out);
        assert!(!s.contains('H') || s.matches("H").count() == 0);
    }

    #[test]
    fn flush_advances_cursor_by_display_width_across_wide_glyph() {
        let mut term = RecordingTerminal::new(10, 2);
        let style = Style::new();
        // A wide glyph at (0,0), its continuation marker at (1,0), then an
        // ASCII cell at (2,0) immediately after — the real terminal cursor
        // lands at column 2 once the 2-wide glyph is printed, not column 1
        // (its codepoint count). If this were tracked wrong, the 'x' write
        // would reuse the stale position and silently land on top of the
        // glyph's own continuation column instead.
        let changes = vec![
            CellChange { x: 0, y: 0, cell: Cell { rune: '字', style, width: 2 } },
            CellChange { x: 1, y: 0, cell: Cell { rune: '\0', style, width: 0 } },
            CellChange { x: 2, y: 0, cell: Cell { rune: 'x', style, width: 1 } },
        ];
        term.flush(&changes).unwrap();
        let s = String::from_utf8_lossy(&term.out);
        assert!(s.contains('字'));
        assert!(s.contains("字x"), "continuation cell must not split the run or insert a stray space");
        assert_eq!(s.matches('H').count(), 1, "only the initial move; no move for the continuation or the trailing cell");
    }

    #[test]
    fn alt_screen_and_mouse_state_tracked() {
        let mut term = RecordingTerminal::new(80, 24);
        term.enter_alt_screen().unwrap();
        term.enable_mouse().unwrap();
        assert!(term.alt_screen);
        assert!(term.mouse_enabled);
        term.exit_alt_screen().unwrap();
        term.disable_mouse().unwrap();
        assert!(!term.alt_screen);
        assert!(!term.mouse_enabled);
    }
}
