//! Spectra 6 ink colors and their 4-bit panel codes

use embedded_graphics_core::pixelcolor::PixelColor;
use embedded_graphics_core::pixelcolor::raw::RawU4;
use embedded_graphics_core::prelude::RawData;

/// One of the six inks; the discriminant is the code the controller expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Color {
    Black = 0x0,
    #[default]
    White = 0x1,
    Yellow = 0x2,
    Red = 0x3,
    Blue = 0x5,
    Green = 0x6,
}

impl Color {
    pub const fn nibble(self) -> u8 {
        self as u8
    }

    /// Both pixels of a framebuffer byte in this color
    pub const fn fill_byte(self) -> u8 {
        (self.nibble() << 4) | self.nibble()
    }

    /// Codes 0x4 and 0x7..=0xF are unused by the panel and read back as white
    pub const fn from_nibble(code: u8) -> Self {
        match code & 0x0F {
            0x0 => Color::Black,
            0x2 => Color::Yellow,
            0x3 => Color::Red,
            0x5 => Color::Blue,
            0x6 => Color::Green,
            _ => Color::White,
        }
    }
}

impl PixelColor for Color {
    type Raw = RawU4;
}

impl From<RawU4> for Color {
    fn from(raw: RawU4) -> Self {
        Color::from_nibble(raw.into_inner())
    }
}

impl From<Color> for RawU4 {
    fn from(color: Color) -> Self {
        RawU4::new(color.nibble())
    }
}
