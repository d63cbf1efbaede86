//! Styling primitives for terminal cells.
//!
//! A [`Style`] is the full visual state of a single [`crate::buffer::Cell`]:
//! a foreground color, a background color, and a bitset of text attributes.
//! Style composition (themes, cascading, layout-aware style merging) lives
//! above this crate; this module only defines the value types the buffer and
//! the escape writer agree on.

use bitflags::bitflags;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A terminal color.
///
/// `Default` means "whatever the terminal's current default is" and emits no
/// SGR color codes at all, which is different from explicitly requesting
/// black or white.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Color {
    /// The terminal's default foreground/background.
    #[default]
    Default,

    /// A classic ANSI palette index.
    ///
    /// 0-7 are the normal colors, 8-15 the bright variants, 16-255 the
    /// extended 256-color cube/grayscale ramp.
    Ansi(u8),

    /// A 24-bit RGB color.
    Rgb(u8, u8, u8),
}

bitflags! {
    /// Text attribute flags, combinable with bitwise OR.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Attributes: u8 {
        /// Bold / increased intensity.
        const BOLD = 0b0000_0001;
        /// Dim / decreased intensity.
        const DIM = 0b0000_0010;
        /// Italic.
        const ITALIC = 0b0000_0100;
        /// Underline.
        const UNDERLINE = 0b0000_1000;
        /// Blink.
        const BLINK = 0b0001_0000;
        /// Reverse video (swap fg/bg).
        const REVERSE = 0b0010_0000;
        /// Strikethrough.
        const STRIKETHROUGH = 0b0100_0000;
    }
}

/// The complete visual style of a cell: foreground, background, attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Style {
    /// Foreground color.
    pub fg: Color,

    /// Background color.
    pub bg: Color,

    /// Text attribute bitset.
    pub attrs: Attributes,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Style {
    /// The default style: default colors, no attributes.
    pub const fn new() -> Self {
        Self {
            fg: Color::Default,
            bg: Color::Default,
            attrs: Attributes::empty(),
        }
    }

    /// Sets the foreground color.
    pub fn fg(mut self, color: Color) -> Self {
        self.fg = color;
        self
    }

    /// Sets the background color.
    pub fn bg(mut self, color: Color) -> Self {
        self.bg = color;
        self
    }

    /// Adds one or more attribute flags.
    pub fn attr(mut self, attrs: Attributes) -> Self {
        self.attrs |= attrs;
        self
    }

    /// Convenience for `attr(Attributes::BOLD)`.
    pub fn bold(self) -> Self {
        self.attr(Attributes::BOLD)
    }

    /// Convenience for `attr(Attributes::ITALIC)`.
    pub fn italic(self) -> Self {
        self.attr(Attributes::ITALIC)
    }

    /// Convenience for `attr(Attributes::UNDERLINE)`.
    pub fn underline(self) -> Self {
        self.attr(Attributes::UNDERLINE)
    }
}

impl Color {
    /// Constructs an RGB color from individual components.
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color::Rgb(r, g, b)
    }

    /// Constructs an ANSI palette color.
    pub const fn ansi(index: u8) -> Self {
        Color::Ansi(index)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_style_has_default_colors_and_no_attrs() {
        let s = Style::default();
        assert_eq!(s.fg, Color::Default);
        assert_eq!(s.bg, Color::Default);
        assert!(s.attrs.is_empty());
    }

    #[test]
    fn builder_methods_compose() {
        let s = Style::new()
            .fg(Color::rgb(255, 0, 0))
            .bg(Color::ansi(4))
            .bold()
            .underline();
        assert_eq!(s.fg, Color::Rgb(255, 0, 0));
        assert_eq!(s.bg, Color::Ansi(4));
        assert!(s.attrs.contains(Attributes::BOLD));
        assert!(s.attrs.contains(Attributes::UNDERLINE));
        assert!(!s.attrs.contains(Attributes::ITALIC));
    }

    #[test]
    fn attributes_are_independent_bits() {
        let a = Attributes::BOLD | Attributes::ITALIC;
        assert!(a.contains(Attributes::BOLD));
        assert!(a.contains(Attributes::ITALIC));
        assert!(!a.contains(Attributes::DIM));
    }
}
