//! Append-only ANSI/VT escape sequence byte builder.
//!
//! `EscapeWriter` knows how to encode cursor moves, screen/line clears, the
//! alternate screen, and SGR styling into bytes; it never performs I/O
//! itself. [`crate::terminal::Terminal`] implementations use it to build the
//! byte strings they then write to the real (or recorded) terminal.

use crate::style::{Attributes, Color, Style};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// What color encodings the target terminal understands. Degrades styling
/// requests that exceed the reported level rather than failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capabilities {
    /// Only the 16 basic ANSI colors.
    Basic,
    /// 256-color palette (`38;5;n`).
    Extended256,
    /// 24-bit true color (`38;2;r;g;b`).
    TrueColor,
}

/// An append-only buffer of escape-sequence bytes.
#[derive(Debug, Default, Clone)]
pub struct EscapeWriter {
    buf: Vec<u8>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl EscapeWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Consumes the writer, returning the accumulated bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Borrows the accumulated bytes so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    fn push_str(&mut self, s: &str) -> &mut Self {
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    /// Moves the cursor to 0-indexed `(x, y)`, emitted as the 1-indexed
    /// `CSI row;col H`.
    pub fn move_to(&mut self, x: u16, y: u16) -> &mut Self {
        self.push_str(&format!("\x1b[{};{}H", y + 1, x + 1))
    }

    /// Moves the cursor up `n` rows. No-op for `n == 0`.
    pub fn cursor_up(&mut self, n: u16) -> &mut Self {
        if n == 0 {
            return self;
        }
        if n == 1 {
            self.push_str("\x1b[A")
        } else {
            self.push_str(&format!("\x1b[{n}A"))
        }
    }

    /// Moves the cursor down `n` rows. No-op for `n == 0`.
    pub fn cursor_down(&mut self, n: u16) -> &mut Self {
        if n == 0 {
            return self;
        }
        if n == 1 {
            self.push_str("\x1b[B")
        } else {
            self.push_str(&format!("\x1b[{n}B"))
        }
    }

    /// Moves the cursor to column `x` (0-indexed) on the current row.
    pub fn cursor_to_column(&mut self, x: u16) -> &mut Self {
        self.push_str(&format!("\x1b[{}G", x + 1))
    }

    /// Clears the entire screen (`CSI 2 J`).
    pub fn clear_screen(&mut self) -> &mut Self {
        self.push_str("\x1b[2J")
    }

    /// Clears the current line (`CSI 2 K`).
    pub fn clear_line(&mut self) -> &mut Self {
        self.push_str("\x1b[2K")
    }

    /// Shows the cursor.
    pub fn show_cursor(&mut self) -> &mut Self {
        self.push_str("\x1b[?25h")
    }

    /// Hides the cursor.
    pub fn hide_cursor(&mut self) -> &mut Self {
        self.push_str("\x1b[?25l")
    }

    /// Enters the alternate screen buffer.
    pub fn enter_alt_screen(&mut self) -> &mut Self {
        self.push_str("\x1b[?1049h")
    }

    /// Exits the alternate screen buffer.
    pub fn exit_alt_screen(&mut self) -> &mut Self {
        self.push_str("\x1b[?1049l")
    }

    /// Enables SGR-encoded mouse reporting (1006 extended mode).
    pub fn enable_mouse(&mut self) -> &mut Self {
        self.push_str("\x1b[?1000h\x1b[?1006h")
    }

    /// Disables mouse reporting.
    pub fn disable_mouse(&mut self) -> &mut Self {
        self.push_str("\x1b[?1006l\x1b[?1000l")
    }

    /// Resets all SGR attributes (`CSI 0 m`).
    pub fn reset_style(&mut self) -> &mut Self {
        self.push_str("\x1b[0m")
    }

    /// Sets a scroll region `[top, bottom]` (0-indexed, inclusive).
    pub fn set_scroll_region(&mut self, top: u16, bottom: u16) -> &mut Self {
        self.push_str(&format!("\x1b[{};{}r", top + 1, bottom + 1))
    }

    /// Resets the scroll region to the full screen.
    pub fn reset_scroll_region(&mut self) -> &mut Self {
        self.push_str("\x1b[r")
    }

    /// Reverse index: scroll the current scroll region down one line (or
    /// move the cursor up if already at the top margin).
    pub fn reverse_index(&mut self) -> &mut Self {
        self.push_str("\x1bM")
    }

    /// Writes raw text without any style prefix. Callers are responsible for
    /// having issued `set_style` beforehand if styling is desired.
    pub fn text(&mut self, s: &str) -> &mut Self {
        self.push_str(s)
    }

    /// Emits a full SGR sequence for `style`, always starting with `0;` so
    /// no earlier state leaks forward, encoding colors according to `caps`.
    pub fn set_style(&mut self, style: Style, caps: Capabilities) -> &mut Self {
        let mut codes: Vec<String> = vec!["0".to_string()];

        if style.attrs.contains(Attributes::BOLD) {
            codes.push("1".into());
        }
        if style.attrs.contains(Attributes::DIM) {
            codes.push("2".into());
        }
        if style.attrs.contains(Attributes::ITALIC) {
            codes.push("3".into());
        }
        if style.attrs.contains(Attributes::UNDERLINE) {
            codes.push("4".into());
        }
        if style.attrs.contains(Attributes::BLINK) {
            codes.push("5".into());
        }
        if style.attrs.contains(Attributes::REVERSE) {
            codes.push("7".into());
        }
        if style.attrs.contains(Attributes::STRIKETHROUGH) {
            codes.push("9".into());
        }

        push_color_codes(&mut codes, style.fg, caps, false);
        push_color_codes(&mut codes, style.bg, caps, true);

        self.push_str("\x1b[");
        self.push_str(&codes.join(";"));
        self.push_str("m")
    }
}

/// Appends the SGR codes for a single foreground/background color.
fn push_color_codes(codes: &mut Vec<String>, color: Color, caps: Capabilities, bg: bool) {
    match color {
        Color::Default => {}
        Color::Ansi(idx) => {
            if idx < 8 {
                codes.push(format!("{}", if bg { 40 + idx } else { 30 + idx }));
            } else if idx < 16 {
                codes.push(format!("{}", if bg { 100 + (idx - 8) } else { 90 + (idx - 8) }));
            } else if matches!(caps, Capabilities::Extended256 | Capabilities::TrueColor) {
                codes.push(if bg { "48".into() } else { "38".into() });
                codes.push("5".into());
                codes.push(format!("{idx}"));
            } else {
                let basic = nearest_basic_from_256(idx);
                codes.push(format!("{}", if bg { 40 + basic } else { 30 + basic }));
            }
        }
        Color::Rgb(r, g, b) => match caps {
            Capabilities::TrueColor => {
                codes.push(if bg { "48".into() } else { "38".into() });
                codes.push("2".into());
                codes.push(format!("{r}"));
                codes.push(format!("{g}"));
                codes.push(format!("{b}"));
            }
            Capabilities::Extended256 => {
                let idx = rgb_to_256(r, g, b);
                codes.push(if bg { "48".into() } else { "38".into() });
                codes.push("5".into());
                codes.push(format!("{idx}"));
            }
            Capabilities::Basic => {
                let basic = nearest_basic_from_rgb(r, g, b);
                codes.push(format!("{}", if bg { 40 + basic } else { 30 + basic }));
            }
        },
    }
}

/// Maps a 256-color index to the nearest of the 8 basic ANSI colors.
fn nearest_basic_from_256(idx: u8) -> u8 {
    if idx >= 232 {
        // grayscale ramp: treat as either black or white
        if idx < 244 { 0 } else { 7 }
    } else if idx >= 16 {
        let cube = idx - 16;
        let r = cube / 36;
        let g = (cube / 6) % 6;
        let b = cube % 6;
        nearest_basic_from_rgb(r * 51, g * 51, b * 51)
    } else {
        idx % 8
    }
}

/// Maps an RGB triple to its nearest 256-color cube index (6x6x6 + grayscale).
fn rgb_to_256(r: u8, g: u8, b: u8) -> u8 {
    if r == g && g == b {
        if r < 8 {
            return 16;
        }
        if r > 248 {
            return 231;
        }
        return 232 + ((r as u16 - 8) * 24 / 247) as u8;
    }
    let q = |c: u8| -> u8 { (c as u16 * 5 / 255) as u8 };
    16 + 36 * q(r) + 6 * q(g) + q(b)
}

/// Maps an RGB triple to the nearest of the 8 basic ANSI colors by simple
/// channel-dominance heuristic.
fn nearest_basic_from_rgb(r: u8, g: u8, b: u8) -> u8 {
    let bit = |c: u8| -> u8 { (c > 127) as u8 };
    bit(r) | (bit(g) << 1) | (bit(b) << 2)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_to_is_one_indexed() {
        let mut w = EscapeWriter::new();
        w.move_to(0, 0);
        assert_eq!(w.into_bytes(), b"\x1b[1;1H");
    }

    #[test]
    fn cursor_moves_omit_parameter_for_one() {
        let mut w = EscapeWriter::new();
        w.cursor_up(1);
        assert_eq!(w.as_bytes(), b"\x1b[A");
    }

    #[test]
    fn cursor_moves_noop_for_zero() {
        let mut w = EscapeWriter::new();
        w.cursor_up(0).cursor_down(0);
        assert!(w.as_bytes().is_empty());
    }

    #[test]
    fn set_style_basic_ansi_fg() {
        let mut w = EscapeWriter::new();
        w.set_style(Style::new().fg(Color::Ansi(1)), Capabilities::Basic);
        assert_eq!(w.into_bytes(), b"\x1b[0;31m");
    }

    #[test]
    fn set_style_bright_ansi_uses_90_series() {
        let mut w = EscapeWriter::new();
        w.set_style(Style::new().fg(Color::Ansi(9)), Capabilities::Basic);
        assert_eq!(w.into_bytes(), b"\x1b[0;91m");
    }

    #[test]
    fn set_style_truecolor_rgb() {
        let mut w = EscapeWriter::new();
        w.set_style(Style::new().bg(Color::Rgb(10, 20, 30)), Capabilities::TrueColor);
        assert_eq!(w.into_bytes(), b"\x1b[0;48;2;10;20;30m");
    }

    #[test]
    fn set_style_rgb_falls_back_to_basic_without_truecolor() {
        let mut w = EscapeWriter::new();
        w.set_style(Style::new().fg(Color::Rgb(255, 0, 0)), Capabilities::Basic);
        // pure red -> bit pattern r=1,g=0,b=0 -> index 1 -> 31
        assert_eq!(w.into_bytes(), b"\x1b[0;31m");
    }

    #[test]
    fn set_style_with_attributes() {
        let mut w = EscapeWriter::new();
        w.set_style(Style::new().bold().underline(), Capabilities::Basic);
        assert_eq!(w.into_bytes(), b"\x1b[0;1;4m");
    }

    #[test]
    fn alt_screen_and_mouse_sequences() {
        let mut w = EscapeWriter::new();
        w.enter_alt_screen();
        assert_eq!(w.as_bytes(), b"\x1b[?1049h");
    }
}
