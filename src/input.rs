//! ANSI/VT input decoding: keyboard, SGR mouse, and debounced resize.
//!
//! `InputDecoder` owns no I/O; it is fed raw bytes (from a reader task) and
//! OS-level size-change signals, and produces [`InputEvent`]s. Keeping the
//! decoder pure makes it exercisable byte-for-byte in tests without a TTY,
//! matching how the pack's terminal writer (`terminal.rs`) keeps its own
//! state machine free of actual I/O until the very last step.

use std::time::{Duration, Instant};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A symbolic key, independent of the rune it may also carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Rune,
    Enter,
    Tab,
    Backspace,
    Escape,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Insert,
    Delete,
    BackTab,
    F(u8),
    Ctrl(char),
}

bitflags::bitflags! {
    /// Keyboard/mouse modifier bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct Modifier: u8 {
        const SHIFT = 0b001;
        const ALT   = 0b010;
        const CTRL  = 0b100;
    }
}

/// A decoded keyboard event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    pub rune: char,
    pub modifiers: Modifier,
}

/// Mouse button / wheel identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
    WheelUp,
    WheelDown,
    None,
}

/// Mouse action kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseAction {
    Press,
    Release,
    Drag,
}

/// A decoded mouse event. `x`/`y` are 0-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseEvent {
    pub button: MouseButton,
    pub action: MouseAction,
    pub x: u16,
    pub y: u16,
    pub modifiers: Modifier,
}

/// A coalesced terminal resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeEvent {
    pub width: u16,
    pub height: u16,
}

/// An event produced by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Key(KeyEvent),
    Mouse(MouseEvent),
    Resize(ResizeEvent),
}

/// Window the decoder waits before emitting a coalesced resize.
pub const RESIZE_DEBOUNCE: Duration = Duration::from_millis(16);

/// Streaming decoder: feed it bytes via [`InputDecoder::feed`] and drain
/// fully-parsed events with [`InputDecoder::events`]; feed size-change
/// signals via [`InputDecoder::signal_resize`] and let [`InputDecoder::poll_resize`]
/// decide when the debounce window has elapsed.
#[derive(Default)]
pub struct InputDecoder {
    buf: Vec<u8>,
    pending_resize: Option<(u16, u16, Instant)>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl KeyEvent {
    pub fn rune(r: char, modifiers: Modifier) -> Self {
        Self { key: Key::Rune, rune: r, modifiers }
    }

    pub fn symbolic(key: Key, modifiers: Modifier) -> Self {
        Self { key, rune: '\0', modifiers }
    }
}

impl InputDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes from the input stream.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Records that the controlling terminal signaled a size change. Does
    /// not itself produce an event; see [`InputDecoder::poll_resize`].
    pub fn signal_resize(&mut self, width: u16, height: u16, now: Instant) {
        self.pending_resize = Some((width, height, now));
    }

    /// Returns `Some(ResizeEvent)` once `RESIZE_DEBOUNCE` has elapsed since
    /// the last `signal_resize` call, consuming the pending signal. Returns
    /// `None` (without consuming) if still inside the debounce window.
    pub fn poll_resize(&mut self, now: Instant) -> Option<ResizeEvent> {
        let (w, h, last) = self.pending_resize?;
        if now.duration_since(last) >= RESIZE_DEBOUNCE {
            self.pending_resize = None;
            Some(ResizeEvent { width: w, height: h })
        } else {
            None
        }
    }

    /// Drains as many complete events as can currently be parsed from the
    /// internal buffer, leaving any trailing partial sequence for the next
    /// `feed`.
    pub fn events(&mut self) -> Vec<InputEvent> {
        let mut out = Vec::new();
        loop {
            match parse_one(&self.buf) {
                ParseResult::Event(ev, consumed) => {
                    out.push(ev);
                    self.buf.drain(0..consumed);
                }
                ParseResult::NeedMore => break,
                ParseResult::Invalid(consumed) => {
                    self.buf.drain(0..consumed.max(1));
                }
            }
        }
        out
    }
}

enum ParseResult {
    Event(InputEvent, usize),
    NeedMore,
    Invalid(usize),
}

/// Attempts to parse exactly one event from the front of `buf`.
fn parse_one(buf: &[u8]) -> ParseResult {
    if buf.is_empty() {
        return ParseResult::NeedMore;
    }

    match buf[0] {
        0x1b => parse_escape(buf),
        0x00..=0x1f | 0x7f => {
            let key = control_key(buf[0]);
            ParseResult::Event(InputEvent::Key(key), 1)
        }
        b => parse_utf8_rune(buf, b),
    }
}

fn control_key(b: u8) -> KeyEvent {
    match b {
        0x09 => KeyEvent::symbolic(Key::Tab, Modifier::empty()),
        0x0d => KeyEvent::symbolic(Key::Enter, Modifier::empty()),
        0x7f => KeyEvent::symbolic(Key::Backspace, Modifier::empty()),
        1..=26 => {
            let ch = (b - 1 + b'a') as char;
            KeyEvent::symbolic(Key::Ctrl(ch), Modifier::CTRL)
        }
        _ => KeyEvent::symbolic(Key::Rune, Modifier::empty()),
    }
}

fn parse_utf8_rune(buf: &[u8], first: u8) -> ParseResult {
    let width = utf8_width(first);
    if buf.len() < width {
        return ParseResult::NeedMore;
    }
    match std::str::from_utf8(&buf[0..width]) {
        Ok(s) => match s.chars().next() {
            Some(ch) => ParseResult::Event(InputEvent::Key(KeyEvent::rune(ch, Modifier::empty())), width),
            None => ParseResult::Invalid(1),
        },
        Err(_) => ParseResult::Invalid(1),
    }
}

fn utf8_width(first: u8) -> usize {
    if first & 0x80 == 0 {
        1
    } else if first & 0xe0 == 0xc0 {
        2
    } else if first & 0xf0 == 0xe0 {
        3
    } else if first & 0xf8 == 0xf0 {
        4
    } else {
        1
    }
}

fn parse_escape(buf: &[u8]) -> ParseResult {
    if buf.len() == 1 {
        // A lone ESC with nothing buffered after it in this read is
        // delivered as a bare Escape key rather than held indefinitely.
        return ParseResult::Event(
            InputEvent::Key(KeyEvent::symbolic(Key::Escape, Modifier::empty())),
            1,
        );
    }
    match buf[1] {
        b'[' => parse_csi(buf),
        b'O' => parse_ss3(buf),
        _ => {
            // Alt+<rune>: re-decode the byte(s) after ESC as a rune.
            match parse_one(&buf[1..]) {
                ParseResult::Event(InputEvent::Key(mut k), consumed) => {
                    k.modifiers |= Modifier::ALT;
                    ParseResult::Event(InputEvent::Key(k), consumed + 1)
                }
                ParseResult::Event(other, consumed) => ParseResult::Event(other, consumed + 1),
                ParseResult::NeedMore => ParseResult::NeedMore,
                ParseResult::Invalid(_) => ParseResult::Invalid(1),
            }
        }
    }
}

/// Decodes a modifier parameter value `M` (1-based: `M-1` is the bitset).
fn decode_mod_param(m: u32) -> Modifier {
    Modifier::from_bits_truncate((m.saturating_sub(1)) as u8 & 0b111)
}

fn parse_csi(buf: &[u8]) -> ParseResult {
    // buf[0]=ESC buf[1]='['
    if buf.len() < 3 {
        return ParseResult::NeedMore;
    }

    if buf[2] == b'<' {
        return parse_sgr_mouse(buf);
    }

    // Scan for the final byte: a letter (A-Z,a-z) or '~'.
    let mut i = 2;
    while i < buf.len() {
        let b = buf[i];
        if b.is_ascii_alphabetic() || b == b'~' {
            break;
        }
        i += 1;
    }
    if i >= buf.len() {
        return ParseResult::NeedMore;
    }
    let final_byte = buf[i];
    let params_str = std::str::from_utf8(&buf[2..i]).unwrap_or("");
    let parts: Vec<&str> = params_str.split(';').collect();
    let consumed = i + 1;

    let modifiers = if parts.len() >= 2 {
        parts[1].parse::<u32>().map(decode_mod_param).unwrap_or(Modifier::empty())
    } else {
        Modifier::empty()
    };

    let key = match final_byte {
        b'A' => Some(Key::Up),
        b'B' => Some(Key::Down),
        b'C' => Some(Key::Right),
        b'D' => Some(Key::Left),
        b'H' => Some(Key::Home),
        b'F' => Some(Key::End),
        b'Z' => Some(Key::BackTab),
        b'~' => {
            let code: u32 = parts.first().and_then(|s| s.parse().ok()).unwrap_or(0);
            match code {
                1 => Some(Key::Home),
                2 => Some(Key::Insert),
                3 => Some(Key::Delete),
                4 => Some(Key::End),
                5 => Some(Key::PageUp),
                6 => Some(Key::PageDown),
                11..=24 => Some(Key::F((code - 10) as u8)),
                _ => None,
            }
        }
        _ => None,
    };

    match key {
        Some(k) => ParseResult::Event(InputEvent::Key(KeyEvent::symbolic(k, modifiers)), consumed),
        None => ParseResult::Invalid(consumed),
    }
}

fn parse_ss3(buf: &[u8]) -> ParseResult {
    // buf[0]=ESC buf[1]='O'
    if buf.len() < 3 {
        return ParseResult::NeedMore;
    }
    let key = match buf[2] {
        b'P' => Some(Key::F(1)),
        b'Q' => Some(Key::F(2)),
        b'R' => Some(Key::F(3)),
        b'S' => Some(Key::F(4)),
        b'A' => Some(Key::Up),
        b'B' => Some(Key::Down),
        b'C' => Some(Key::Right),
        b'D' => Some(Key::Left),
        _ => None,
    };
    match key {
        Some(k) => ParseResult::Event(InputEvent::Key(KeyEvent::symbolic(k, Modifier::empty())), 3),
        None => ParseResult::Invalid(3),
    }
}

/// Parses `ESC [ < b ; x ; y (M|m)`.
fn parse_sgr_mouse(buf: &[u8]) -> ParseResult {
    // buf[0..3] = ESC [ <
    let rest = &buf[3..];
    let Some(end_rel) = rest.iter().position(|&b| b == b'M' || b == b'm') else {
        return ParseResult::NeedMore;
    };
    let body = std::str::from_utf8(&rest[..end_rel]).unwrap_or("");
    let is_release = rest[end_rel] == b'm';
    let consumed = 3 + end_rel + 1;

    let parts: Vec<&str> = body.split(';').collect();
    if parts.len() != 3 {
        return ParseResult::Invalid(consumed);
    }
    let (Ok(b), Ok(x), Ok(y)) = (
        parts[0].parse::<u32>(),
        parts[1].parse::<u32>(),
        parts[2].parse::<u32>(),
    ) else {
        return ParseResult::Invalid(consumed);
    };

    let mut modifiers = Modifier::empty();
    if b & 0b0000_0100 != 0 {
        modifiers |= Modifier::SHIFT;
    }
    if b & 0b0000_1000 != 0 {
        modifiers |= Modifier::ALT;
    }
    if b & 0b0001_0000 != 0 {
        modifiers |= Modifier::CTRL;
    }

    let is_wheel = b & 0b0100_0000 != 0;
    let is_drag = b & 0b0010_0000 != 0;
    let low = b & 0b0000_0011;

    let button = if is_wheel {
        if low == 0 { MouseButton::WheelUp } else { MouseButton::WheelDown }
    } else {
        match low {
            0 => MouseButton::Left,
            1 => MouseButton::Middle,
            2 => MouseButton::Right,
            _ => MouseButton::None,
        }
    };

    let action = if is_drag {
        MouseAction::Drag
    } else if is_release {
        MouseAction::Release
    } else {
        MouseAction::Press
    };

    let event = MouseEvent {
        button,
        action,
        x: (x.saturating_sub(1)) as u16,
        y: (y.saturating_sub(1)) as u16,
        modifiers,
    };
    ParseResult::Event(InputEvent::Mouse(event), consumed)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_ascii_rune() {
        let mut d = InputDecoder::new();
        d.feed(b"a");
        let evs = d.events();
        assert_eq!(evs, vec![InputEvent::Key(KeyEvent::rune('a', Modifier::empty()))]);
    }

    #[test]
    fn decodes_ctrl_a() {
        let mut d = InputDecoder::new();
        d.feed(&[0x01]);
        let evs = d.events();
        assert_eq!(
            evs,
            vec![InputEvent::Key(KeyEvent::symbolic(Key::Ctrl('a'), Modifier::CTRL))]
        );
    }

    #[test]
    fn decodes_arrow_keys() {
        let mut d = InputDecoder::new();
        d.feed(b"\x1b[A\x1b[B\x1b[C\x1b[D");
        let evs = d.events();
        assert_eq!(evs.len(), 4);
        assert_eq!(evs[0], InputEvent::Key(KeyEvent::symbolic(Key::Up, Modifier::empty())));
        assert_eq!(evs[3], InputEvent::Key(KeyEvent::symbolic(Key::Left, Modifier::empty())));
    }

    #[test]
    fn decodes_tilde_forms() {
        let mut d = InputDecoder::new();
        d.feed(b"\x1b[3~");
        assert_eq!(
            d.events(),
            vec![InputEvent::Key(KeyEvent::symbolic(Key::Delete, Modifier::empty()))]
        );
    }

    #[test]
    fn decodes_ss3_function_keys() {
        let mut d = InputDecoder::new();
        d.feed(b"\x1bOP");
        assert_eq!(
            d.events(),
            vec![InputEvent::Key(KeyEvent::symbolic(Key::F(1), Modifier::empty()))]
        );
    }

    #[test]
    fn decodes_alt_plus_rune() {
        let mut d = InputDecoder::new();
        d.feed(b"\x1bx");
        assert_eq!(
            d.events(),
            vec![InputEvent::Key(KeyEvent::rune('x', Modifier::ALT))]
        );
    }

    #[test]
    fn scenario_c_sgr_mouse_left_press() {
        let mut d = InputDecoder::new();
        d.feed(b"\x1b[<0;10;20M");
        let evs = d.events();
        assert_eq!(evs.len(), 1);
        assert_eq!(
            evs[0],
            InputEvent::Mouse(MouseEvent {
                button: MouseButton::Left,
                action: MouseAction::Press,
                x: 9,
                y: 19,
                modifiers: Modifier::empty(),
            })
        );
    }

    #[test]
    fn decodes_sgr_mouse_release() {
        let mut d = InputDecoder::new();
        d.feed(b"\x1b[<0;1;1m");
        let evs = d.events();
        assert_eq!(evs.len(), 1);
        match evs[0] {
            InputEvent::Mouse(m) => assert_eq!(m.action, MouseAction::Release),
            _ => panic!("expected mouse event"),
        }
    }

    #[test]
    fn decodes_sgr_wheel() {
        let mut d = InputDecoder::new();
        d.feed(b"\x1b[<64;5;5M");
        let evs = d.events();
        match evs[0] {
            InputEvent::Mouse(m) => assert_eq!(m.button, MouseButton::WheelUp),
            _ => panic!("expected mouse event"),
        }
    }

    #[test]
    fn partial_sequence_waits_for_more_bytes() {
        let mut d = InputDecoder::new();
        d.feed(b"\x1b[");
        assert!(d.events().is_empty());
        d.feed(b"A");
        assert_eq!(
            d.events(),
            vec![InputEvent::Key(KeyEvent::symbolic(Key::Up, Modifier::empty()))]
        );
    }

    #[test]
    fn resize_debounces_within_window() {
        let mut d = InputDecoder::new();
        let t0 = Instant::now();
        d.signal_resize(80, 24, t0);
        assert!(d.poll_resize(t0).is_none());
        d.signal_resize(81, 25, t0);
        let later = t0 + RESIZE_DEBOUNCE + Duration::from_millis(1);
        let resize = d.poll_resize(later).unwrap();
        assert_eq!(resize, ResizeEvent { width: 81, height: 25 });
        assert!(d.poll_resize(later).is_none());
    }
}
