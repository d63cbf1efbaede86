//! Inline-mode terminal surface management: a bottom-anchored widget over a
//! scrolling history region, written directly via escape sequences rather
//! than through the cell-diff pipeline.
//!
//! Reserves space by emitting newlines and moving the cursor back up, clears
//! reserved rows, and tracks an origin row, all via `crossterm` cursor and
//! terminal commands. `InlineLayoutState` additionally manages a scrolling
//! history region above the fixed-height widget: growth/shrink arithmetic,
//! three distinct append regimes, and a `consume_for_growth` step that feeds
//! history lines back into widget space as the widget shrinks.

use crate::buffer::rune_width;
use crate::terminal::Terminal;
use std::io;

//--------------------------------------------------------------------------------------------------
// InlineLayoutState
//--------------------------------------------------------------------------------------------------

/// Tracks where, within the `historyCapacity` rows above the widget, the
/// currently-visible appended content sits.
#[derive(Debug, Clone, Copy)]
pub struct InlineLayoutState {
    pub history_capacity: u16,
    pub content_start_row: u16,
    pub visible_rows: u16,
    pub valid: bool,
}

impl InlineLayoutState {
    pub fn new(history_capacity: u16) -> Self {
        Self { history_capacity, content_start_row: history_capacity, visible_rows: 0, valid: true }
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    fn content_end_row(&self) -> u16 {
        self.content_start_row + self.visible_rows - 1
    }
}

//--------------------------------------------------------------------------------------------------
// StartupPolicy
//--------------------------------------------------------------------------------------------------

/// How an inline session treats whatever is already on screen when it first
/// reserves its widget rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartupPolicy {
    /// Clear the whole screen before the first paint. History begins empty.
    FreshViewport,
    /// Push existing visible rows into scrollback, then start with an empty
    /// history.
    SoftReset,
    /// Leave existing content untouched; invalidate the layout so the first
    /// appends are conservative about what's already in scrollback.
    #[default]
    PreserveVisible,
}

//--------------------------------------------------------------------------------------------------
// InlineSession
//--------------------------------------------------------------------------------------------------

/// Saved state for a temporary switch to the alternate screen (e.g. a modal
/// overlay drawn full-screen over an otherwise inline app).
struct OverlaySave {
    widget_height: u16,
    term_height: u16,
    layout: InlineLayoutState,
}

/// Manages the bottom-anchored widget plus the scrolling history region
/// above it.
pub struct InlineSession {
    widget_height: u16,
    width: u16,
    term_height: u16,
    layout: InlineLayoutState,
    overlay: Option<OverlaySave>,
}

impl InlineSession {
    pub fn new(width: u16, term_height: u16, widget_height: u16) -> Self {
        let widget_height = widget_height.min(term_height);
        let history_capacity = term_height.saturating_sub(widget_height);
        Self {
            widget_height,
            width,
            term_height,
            layout: InlineLayoutState::new(history_capacity),
            overlay: None,
        }
    }

    pub fn history_capacity(&self) -> u16 {
        self.layout.history_capacity
    }

    pub fn widget_height(&self) -> u16 {
        self.widget_height
    }

    /// Row the widget region starts at (`historyCapacity`), i.e. the first
    /// buffer row maps to this terminal row.
    pub fn widget_start_row(&self) -> u16 {
        self.layout.history_capacity
    }

    pub fn layout(&self) -> InlineLayoutState {
        self.layout
    }

    /// Reserves `widget_height` rows at the bottom of the terminal by
    /// writing newlines past the last row, then moving back up.
    pub fn reserve(&mut self, terminal: &mut dyn Terminal) -> io::Result<()> {
        let mut bytes = Vec::new();
        for _ in 0..self.widget_height {
            bytes.extend_from_slice(b"\r\n");
        }
        terminal.write_direct(&bytes)?;
        let mut w = crate::escape::EscapeWriter::new();
        w.cursor_up(self.widget_height);
        terminal.write_direct(w.as_bytes())
    }

    /// Applies the configured startup policy before the first paint.
    pub fn apply_startup_policy(
        &mut self,
        terminal: &mut dyn Terminal,
        policy: StartupPolicy,
    ) -> io::Result<()> {
        match policy {
            StartupPolicy::FreshViewport => {
                let mut w = crate::escape::EscapeWriter::new();
                w.clear_screen().move_to(0, 0);
                terminal.write_direct(w.as_bytes())?;
                self.layout = InlineLayoutState::new(self.layout.history_capacity);
            }
            StartupPolicy::SoftReset => {
                // `reserve()` already ran and left the cursor at the widget's
                // top row, not the terminal's bottom row. Writing the
                // linefeeds from there would only scroll
                // `term_height - 1 - history_capacity` lines; moving to the
                // last row first guarantees the full `term_height` lines
                // scroll into scrollback, so nothing on-screen survives into
                // the fresh history/widget area.
                let mut w = crate::escape::EscapeWriter::new();
                w.move_to(0, self.term_height.saturating_sub(1));
                terminal.write_direct(w.as_bytes())?;
                let bytes = "\n".repeat(self.term_height as usize);
                terminal.write_direct(bytes.as_bytes())?;
                self.layout = InlineLayoutState::new(self.layout.history_capacity);
            }
            StartupPolicy::PreserveVisible => {
                self.layout.invalidate();
            }
        }
        Ok(())
    }

    /// Sanitizes, wraps, and appends `content` to the history region.
    pub fn append_text(&mut self, terminal: &mut dyn Terminal, content: &str) -> io::Result<()> {
        let sanitized = sanitize_for_inline(content);
        let width = self.width.max(1);
        let mut row = String::new();
        let mut row_width: u16 = 0;

        for ch in sanitized.chars() {
            if ch == '\n' {
                self.append_row(terminal, &row)?;
                row.clear();
                row_width = 0;
                continue;
            }
            let w = rune_width(ch) as u16;
            if row_width + w > width {
                self.append_row(terminal, &row)?;
                row.clear();
                row_width = 0;
            }
            row.push(ch);
            row_width += w;
        }
        if !row.is_empty() {
            self.append_row(terminal, &row)?;
        }
        Ok(())
    }

    /// Appends one already-wrapped row to the history, scrolling content
    /// already in the visible window when the widget floor is reached.
    pub fn append_row(&mut self, terminal: &mut dyn Terminal, row: &str) -> io::Result<()> {
        let cap = self.layout.history_capacity;
        if cap == 0 {
            return Ok(());
        }

        if self.layout.visible_rows == 0 {
            let target_row = cap - 1;
            self.write_row_at(terminal, target_row, row)?;
            self.layout.content_start_row = target_row;
            self.layout.visible_rows = 1;
            return Ok(());
        }

        let content_end_row = self.layout.content_end_row();
        let bottom_blanks = cap.saturating_sub(1).saturating_sub(content_end_row);

        if bottom_blanks > 0 {
            let target_row = content_end_row + 1;
            self.write_row_at(terminal, target_row, row)?;
            self.layout.visible_rows += 1;
            return Ok(());
        }

        let full = self.layout.visible_rows >= cap;
        let original_start = self.layout.content_start_row;
        let mut top_row = original_start;
        if !full && top_row > 0 {
            top_row -= 1;
        }

        self.scroll_up(terminal, top_row, cap - 1, 1)?;
        self.write_row_at(terminal, cap - 1, row)?;

        if full {
            // The window was already full: the top content row scrolled into
            // scrollback and everything else shifted up by one, so the
            // window's bounds don't move.
        } else {
            // We expanded the scroll window to swallow one blank row above
            // the content for free; the content's logical top is now there.
            self.layout.content_start_row = top_row;
            self.layout.visible_rows = (self.layout.visible_rows + 1).min(cap);
        }
        Ok(())
    }

    fn write_row_at(&self, terminal: &mut dyn Terminal, row: u16, text: &str) -> io::Result<()> {
        let mut w = crate::escape::EscapeWriter::new();
        w.move_to(0, row).clear_line().text(text);
        terminal.write_direct(w.as_bytes())
    }

    /// Scrolls `[top, bottom]` up by `lines` using a scroll region plus a
    /// reverse/forward line feed, restoring the full-screen scroll region
    /// afterward.
    fn scroll_up(&self, terminal: &mut dyn Terminal, top: u16, bottom: u16, lines: u16) -> io::Result<()> {
        let mut w = crate::escape::EscapeWriter::new();
        w.set_scroll_region(top, bottom);
        for _ in 0..lines {
            w.move_to(0, bottom).text("\n");
        }
        w.reset_scroll_region();
        terminal.write_direct(w.as_bytes())
    }

    /// Called on resize. Clears the old widget rows, then grows/shrinks the
    /// history window to fit the new capacity.
    pub fn resize(
        &mut self,
        terminal: &mut dyn Terminal,
        new_term_height: u16,
        new_width: u16,
    ) -> io::Result<()> {
        self.clear_widget_rows(terminal)?;

        let old_cap = self.layout.history_capacity;
        let new_cap = new_term_height.saturating_sub(self.widget_height.min(new_term_height));

        if !self.layout.valid {
            self.layout = InlineLayoutState::new(new_cap);
            self.width = new_width;
            self.term_height = new_term_height;
            return Ok(());
        }

        let width_changed = new_width != self.width;

        self.layout.visible_rows = self.layout.visible_rows.min(old_cap);
        if new_cap < old_cap {
            self.consume_for_growth(old_cap, old_cap - new_cap);
        }
        self.layout.history_capacity = new_cap;
        self.layout.content_start_row = self.layout.content_start_row.min(new_cap.saturating_sub(self.layout.visible_rows));
        self.layout.visible_rows = self.layout.visible_rows.min(new_cap);
        self.width = new_width;
        self.term_height = new_term_height;
        if width_changed {
            self.layout.invalidate();
        }
        Ok(())
    }

    /// Drops `lines` rows from the top of history to make room for a taller
    /// widget.
    fn consume_for_growth(&mut self, cap: u16, mut lines: u16) {
        lines = lines.min(cap);
        while lines > 0 {
            let top_blanks = self.layout.content_start_row;
            if top_blanks == 0 && self.layout.visible_rows == 0 {
                break;
            }

            if top_blanks > lines {
                self.layout.content_start_row -= lines;
                lines = 0;
            } else if top_blanks > 1 {
                let consume = (top_blanks - 1).min(lines);
                self.layout.content_start_row -= consume;
                lines -= consume;
            } else {
                let consumed_content = lines.saturating_sub(top_blanks);
                self.layout.visible_rows = self.layout.visible_rows.saturating_sub(consumed_content).max(0);
                self.layout.content_start_row = 0;
                lines = 0;
            }
        }
    }

    fn clear_widget_rows(&self, terminal: &mut dyn Terminal) -> io::Result<()> {
        let cap = self.layout.history_capacity;
        for row in cap..self.term_height {
            let mut w = crate::escape::EscapeWriter::new();
            w.move_to(0, row).clear_line();
            terminal.write_direct(w.as_bytes())?;
        }
        Ok(())
    }

    /// Invalidates the layout in response to a width-only change, per spec.
    pub fn invalidate_for_width(&mut self) {
        self.layout.invalidate();
    }

    /// Enters a temporary alt-screen overlay, saving inline state to be
    /// restored by [`InlineSession::exit_overlay`].
    pub fn enter_overlay(&mut self, terminal: &mut dyn Terminal) -> io::Result<()> {
        self.clear_widget_rows(terminal)?;
        self.overlay = Some(OverlaySave {
            widget_height: self.widget_height,
            term_height: self.term_height,
            layout: self.layout,
        });
        terminal.enter_alt_screen()
    }

    /// Restores the state saved by [`InlineSession::enter_overlay`].
    pub fn exit_overlay(&mut self, terminal: &mut dyn Terminal) -> io::Result<()> {
        terminal.exit_alt_screen()?;
        if let Some(saved) = self.overlay.take() {
            self.widget_height = saved.widget_height;
            self.term_height = saved.term_height;
            self.layout = saved.layout;
            self.layout.visible_rows = self.layout.visible_rows.min(self.layout.history_capacity);
        }
        Ok(())
    }
}

/// Strips ANSI CSI/OSC/plain-ESC sequences, maps tabs to spaces, keeps
/// newlines, and drops other control bytes.
fn sanitize_for_inline(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\x1b' => {
                match chars.peek() {
                    Some('[') => {
                        chars.next();
                        for c in chars.by_ref() {
                            if ('@'..='~').contains(&c) {
                                break;
                            }
                        }
                    }
                    Some(']') => {
                        chars.next();
                        for c in chars.by_ref() {
                            if c == '\u{7}' {
                                break;
                            }
                        }
                    }
                    Some(_) => {
                        chars.next();
                    }
                    None => {}
                }
            }
            '\t' => out.push(' '),
            '\n' => out.push('\n'),
            c if (c as u32) < 0x20 || (c as u32) == 0x7f => {}
            c => out.push(c),
        }
    }
    out
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
