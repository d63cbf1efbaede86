//! Double buffering and cell-level diffing for flicker-free rendering.
//!
//! This module implements a double-buffering system that maintains two complete
//! representations of the terminal screen. By comparing these buffers cell-by-cell,
//! we can generate minimal updates that eliminate flicker entirely.
//!
//! Wide characters (CJK, emoji) occupy two columns. The second column holds a
//! **continuation** cell (`width == 0`) that carries no rune of its own; it
//! exists only so the diff and the terminal writer see a cell at every
//! column. Every mutator here is responsible for keeping that invariant
//! intact, since callers are never expected to reason about continuations
//! themselves.
//!
//! ## Architecture
//!
//! ```text
//!     Current Screen          Next Frame           Diff Result
//!     ┌─────────────┐      ┌─────────────┐      ┌─────────────┐
//!     │ Hello World │      │ Hello Rust! │      │      ^^^^   │
//!     │ Terminal UI │      │ Terminal UI │      │ (no change) │
//!     └─────────────┘      └─────────────┘      └─────────────┘
//!        Front Buffer         Back Buffer          Cell Updates
//! ```

use crate::style::Style;
use unicode_width::UnicodeWidthChar;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A single cell in the terminal grid.
///
/// `width` is 0 for a continuation cell (the right half of a wide rune at
/// `x-1`), 1 for a normal cell, or 2 for the left half of a wide rune.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    /// The codepoint displayed in this cell. `0` (NUL) for an empty or
    /// continuation cell.
    pub rune: char,

    /// Visual style (colors + attributes).
    pub style: Style,

    /// Display width of this cell: 0 (continuation), 1, or 2.
    pub width: u8,
}

/// A rectangular region of the buffer, used by clip-aware mutators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

/// A single-cell change produced by [`Buffer::diff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellChange {
    pub x: u16,
    pub y: u16,
    pub cell: Cell,
}

/// A row-major grid of cells, plus a shadow copy for diffing.
///
/// `front` is the state the terminal is presumed to be in; `back` is the
/// state being built for the next frame. Call [`Buffer::swap`] once the
/// diff has been flushed to the terminal.
pub struct Buffer {
    front: Vec<Cell>,
    back: Vec<Cell>,
    width: u16,
    height: u16,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Cell {
    /// An empty cell: a space with default style and width 1.
    pub const fn empty() -> Self {
        Self {
            rune: ' ',
            style: Style::new(),
            width: 1,
        }
    }

    /// A continuation cell following a wide primary at the previous column.
    const fn continuation(style: Style) -> Self {
        Self {
            rune: '\0',
            style,
            width: 0,
        }
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::empty()
    }
}

impl Rect {
    /// The exclusive right edge, `x + width`.
    pub fn right(&self) -> u16 {
        self.x.saturating_add(self.width)
    }

    /// The exclusive bottom edge, `y + height`.
    pub fn bottom(&self) -> u16 {
        self.y.saturating_add(self.height)
    }

    fn intersect(&self, width: u16, height: u16) -> Rect {
        let x0 = self.x.min(width);
        let y0 = self.y.min(height);
        let x1 = self.right().min(width);
        let y1 = self.bottom().min(height);
        Rect {
            x: x0,
            y: y0,
            width: x1.saturating_sub(x0),
            height: y1.saturating_sub(y0),
        }
    }
}

/// Returns the display width of a rune: 0 is never returned here (that value
/// is reserved for continuation cells created by the buffer itself).
/// Control and zero-width codepoints count as width 1 so every printable
/// position still occupies a cell; East-Asian-wide and common emoji ranges
/// count as width 2.
pub fn rune_width(r: char) -> u8 {
    if (r as u32) < 0x20 || r == '\u{7f}' {
        return 1;
    }
    match UnicodeWidthChar::width(r) {
        Some(0) => 1,
        Some(w) => w.min(2) as u8,
        None => 1,
    }
}

impl Buffer {
    /// Creates a buffer of the given dimensions, filled with empty cells.
    pub fn new(width: u16, height: u16) -> Self {
        let size = width as usize * height as usize;
        Self {
            front: vec![Cell::empty(); size],
            back: vec![Cell::empty(); size],
            width,
            height,
        }
    }

    /// Current dimensions.
    pub fn dimensions(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    fn index(&self, x: u16, y: u16) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(y as usize * self.width as usize + x as usize)
    }

    /// Reads the back-buffer cell at `(x, y)`. Out of bounds returns a
    /// default (empty) cell.
    pub fn cell(&self, x: u16, y: u16) -> Cell {
        self.index(x, y)
            .map(|i| self.back[i])
            .unwrap_or_default()
    }

    /// Clears a wide primary/continuation pair that occupies `(x, y)`,
    /// whichever half it is.
    fn clear_wide_at(&mut self, x: u16, y: u16) {
        let Some(i) = self.index(x, y) else { return };
        match self.back[i].width {
            0 => {
                // continuation: clear the primary at x-1 too
                self.back[i] = Cell::empty();
                if x > 0 {
                    if let Some(pi) = self.index(x - 1, y) {
                        self.back[pi] = Cell::empty();
                    }
                }
            }
            2 => {
                self.back[i] = Cell::empty();
                if let Some(ci) = self.index(x + 1, y) {
                    self.back[ci] = Cell::empty();
                }
            }
            _ => {}
        }
    }

    /// Writes a single rune at `(x, y)` with the given style, maintaining
    /// the wide-cell invariant (see module docs).
    pub fn set_rune(&mut self, x: u16, y: u16, r: char, style: Style) {
        let Some(i) = self.index(x, y) else { return };
        let w = rune_width(r);

        // Writing over either half of an existing wide pair clears both
        // halves first.
        self.clear_wide_at(x, y);

        if w == 2 {
            if x + 1 >= self.width {
                // Cannot fit: substitute a narrow space in the requested style.
                self.back[i] = Cell {
                    rune: ' ',
                    style,
                    width: 1,
                };
                return;
            }
            // The neighbor might itself be part of another wide pair.
            self.clear_wide_at(x + 1, y);
            self.back[i] = Cell {
                rune: r,
                style,
                width: 2,
            };
            if let Some(ci) = self.index(x + 1, y) {
                self.back[ci] = Cell::continuation(style);
            }
        } else {
            self.back[i] = Cell {
                rune: r,
                style,
                width: 1,
            };
        }
    }

    /// Writes `s` horizontally starting at `x0` (which may be negative: runes
    /// that end before column 0 are skipped, supporting content that scrolls
    /// partially into view). Writing stops once the cursor reaches the
    /// buffer's right edge; a wide rune that doesn't fit halts the write
    /// rather than being truncated to a space. Returns the total display
    /// width written.
    pub fn set_string(&mut self, x0: i32, y: u16, s: &str, style: Style) -> u16 {
        let mut cur: i32 = x0;
        let mut written: u16 = 0;
        for ch in s.chars() {
            let w = rune_width(ch) as i32;
            if cur < 0 {
                cur += w;
                continue;
            }
            if cur as i64 + w as i64 > self.width as i64 {
                break;
            }
            self.set_rune(cur as u16, y, ch, style);
            written += w as u16;
            cur += w;
        }
        written
    }

    /// Writes `s` horizontally starting at unsigned `x0`, respecting
    /// `clip`: runes entirely left of `clip.x` are skipped, the write stops
    /// at `clip.right()`, and a wide rune that would straddle the clip's
    /// right edge is skipped entirely (not truncated).
    pub fn set_string_clipped(&mut self, x0: u16, y: u16, s: &str, style: Style, clip: Rect) {
        if y < clip.y || y >= clip.bottom() {
            return;
        }
        let mut cur: u16 = x0;
        for ch in s.chars() {
            let w = rune_width(ch) as u16;
            if cur < clip.x {
                cur += w;
                continue;
            }
            if cur >= clip.right() {
                break;
            }
            if cur + w > clip.right() {
                // Would straddle the clip edge; skip instead of truncating.
                cur += w;
                continue;
            }
            self.set_rune(cur, y, ch, style);
            cur += w;
        }
    }

    /// Fills `rect` with `r` in `style`. A wide rune that doesn't fit at the
    /// tail of a row is replaced by a space for that last column.
    pub fn fill(&mut self, rect: Rect, r: char, style: Style) {
        let rect = rect.intersect(self.width, self.height);
        for y in rect.y..rect.bottom() {
            let mut x = rect.x;
            while x < rect.right() {
                let w = rune_width(r);
                if w == 2 && x + 1 >= rect.right() {
                    self.set_rune(x, y, ' ', style);
                    x += 1;
                } else {
                    self.set_rune(x, y, r, style);
                    x += w as u16;
                }
            }
        }
    }

    /// Clears the whole back buffer to empty cells.
    pub fn clear(&mut self) {
        self.back.fill(Cell::empty());
    }

    /// Clears `rect` to empty cells, restoring the wide-cell invariant at
    /// the rect's edges (a continuation at the left edge pulls in its
    /// primary; a primary at the right edge pulls in its continuation).
    pub fn clear_rect(&mut self, rect: Rect) {
        let rect = rect.intersect(self.width, self.height);
        if rect.width == 0 || rect.height == 0 {
            return;
        }
        for y in rect.y..rect.bottom() {
            self.clear_wide_at(rect.x, y);
            if rect.right() > 0 {
                self.clear_wide_at(rect.right() - 1, y);
            }
            for x in rect.x..rect.right() {
                if let Some(i) = self.index(x, y) {
                    self.back[i] = Cell::empty();
                }
            }
        }
    }

    /// Compares `front` and `back`, returning every differing cell in
    /// `(y, x)` order.
    pub fn diff(&self) -> Vec<CellChange> {
        let mut changes = Vec::new();
        for y in 0..self.height {
            for x in 0..self.width {
                let i = y as usize * self.width as usize + x as usize;
                if self.front[i] != self.back[i] {
                    changes.push(CellChange {
                        x,
                        y,
                        cell: self.back[i],
                    });
                }
            }
        }
        changes
    }

    /// Copies `back` into `front`. After this, `diff()` is empty until
    /// `back` is mutated again.
    pub fn swap(&mut self) {
        self.front.copy_from_slice(&self.back);
    }

    /// Resizes both buffers, preserving the top-left overlap of the old and
    /// new dimensions; newly exposed area is filled with empty cells.
    pub fn resize(&mut self, width: u16, height: u16) {
        if width == self.width && height == self.height {
            return;
        }
        let mut new_front = vec![Cell::empty(); width as usize * height as usize];
        let mut new_back = vec![Cell::empty(); width as usize * height as usize];
        let copy_w = width.min(self.width);
        let copy_h = height.min(self.height);
        for y in 0..copy_h {
            let old_row = y as usize * self.width as usize;
            let new_row = y as usize * width as usize;
            for x in 0..copy_w {
                new_front[new_row + x as usize] = self.front[old_row + x as usize];
                new_back[new_row + x as usize] = self.back[old_row + x as usize];
            }
        }
        self.front = new_front;
        self.back = new_back;
        self.width = width;
        self.height = height;
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::Color;

    #[test]
    fn diff_is_empty_initially_and_after_swap() {
        let mut b = Buffer::new(10, 5);
        assert!(b.diff().is_empty());
        b.set_rune(2, 1, 'x', Style::default());
        assert_eq!(b.diff().len(), 1);
        b.swap();
        assert!(b.diff().is_empty());
    }

    #[test]
    fn diff_is_sorted_by_y_then_x() {
        let mut b = Buffer::new(5, 2);
        b.set_rune(3, 1, 'a', Style::default());
        b.set_rune(1, 0, 'b', Style::default());
        b.set_rune(4, 0, 'c', Style::default());
        let changes = b.diff();
        let coords: Vec<(u16, u16)> = changes.iter().map(|c| (c.y, c.x)).collect();
        let mut sorted = coords.clone();
        sorted.sort();
        assert_eq!(coords, sorted);
    }

    #[test]
    fn wide_char_writes_continuation_cell() {
        let mut b = Buffer::new(5, 1);
        b.set_rune(2, 0, '\u{597d}', Style::default()); // 好, width 2
        assert_eq!(b.cell(2, 0).width, 2);
        assert_eq!(b.cell(3, 0).width, 0);
        assert_eq!(b.cell(3, 0).rune, '\0');
    }

    #[test]
    fn scenario_a_wide_char_overwrite() {
        let mut b = Buffer::new(5, 1);
        let s = Style::default();
        b.set_rune(2, 0, '\u{597d}', s);
        b.set_rune(2, 0, 'Y', s);
        assert_eq!(b.cell(2, 0).rune, 'Y');
        assert_eq!(b.cell(3, 0).rune, ' ');
        assert_eq!(b.cell(3, 0).width, 1);
    }

    #[test]
    fn wide_char_at_right_edge_becomes_space() {
        let mut b = Buffer::new(3, 1);
        b.set_rune(2, 0, '\u{597d}', Style::default());
        assert_eq!(b.cell(2, 0).rune, ' ');
        assert_eq!(b.cell(2, 0).width, 1);
    }

    #[test]
    fn set_string_supports_negative_start() {
        let mut b = Buffer::new(5, 1);
        let written = b.set_string(-2, 0, "abcd", Style::default());
        // 'a','b' skipped (end before column 0), 'c','d' written at 0,1
        assert_eq!(b.cell(0, 0).rune, 'c');
        assert_eq!(b.cell(1, 0).rune, 'd');
        assert_eq!(written, 2);
    }

    #[test]
    fn set_string_clipped_skips_straddling_wide_rune() {
        let mut b = Buffer::new(10, 1);
        let clip = Rect { x: 0, y: 0, width: 4, height: 1 };
        b.set_string_clipped(0, 0, "ab\u{597d}c", Style::default(), clip);
        assert_eq!(b.cell(0, 0).rune, 'a');
        assert_eq!(b.cell(1, 0).rune, 'b');
        // wide char at column 2 would occupy 2..4 which is within clip actually (right()=4)
        // so it should fit; test the straddle case explicitly below instead.
        let mut b2 = Buffer::new(10, 1);
        let clip2 = Rect { x: 0, y: 0, width: 3, height: 1 };
        b2.set_string_clipped(0, 0, "ab\u{597d}c", Style::default(), clip2);
        assert_eq!(b2.cell(0, 0).rune, 'a');
        assert_eq!(b2.cell(1, 0).rune, 'b');
        assert_eq!(b2.cell(2, 0).rune, ' ');
    }

    #[test]
    fn resize_preserves_overlap() {
        let mut b = Buffer::new(5, 2);
        b.set_rune(1, 1, 'z', Style::default());
        b.swap();
        b.set_rune(1, 1, 'z', Style::default());
        b.resize(3, 3);
        assert_eq!(b.cell(1, 1).rune, 'z');
        assert_eq!(b.dimensions(), (3, 3));
    }

    #[test]
    fn clear_rect_restores_wide_invariant_at_edges() {
        let mut b = Buffer::new(5, 1);
        b.set_rune(1, 0, '\u{597d}', Style::default());
        b.clear_rect(Rect { x: 2, y: 0, width: 3, height: 1 });
        // clearing starting at the continuation should also clear the primary
        assert_eq!(b.cell(1, 0).rune, ' ');
        assert_eq!(b.cell(2, 0).rune, ' ');
    }

    #[test]
    fn rune_width_basic_cases() {
        assert_eq!(rune_width('a'), 1);
        assert_eq!(rune_width('\u{597d}'), 2); // 好
        assert_eq!(rune_width('\n'), 1);
        assert_eq!(rune_width('\0'), 1);
    }

    #[test]
    fn fill_sets_style_across_rect() {
        let mut b = Buffer::new(4, 2);
        let style = Style::default().fg(Color::Ansi(2));
        b.fill(Rect { x: 0, y: 0, width: 4, height: 2 }, '#', style);
        for y in 0..2 {
            for x in 0..4 {
                assert_eq!(b.cell(x, y).rune, '#');
                assert_eq!(b.cell(x, y).style, style);
            }
        }
    }
}
