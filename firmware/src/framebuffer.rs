//! Framebuffer for the 7.3" e-paper panel
//!
//! 800x480 pixels at 4 bits per pixel, two pixels per byte: high nibble is
//! the left pixel. Allocated on the heap, which lands in PSRAM.

use alloc::boxed::Box;
use core::convert::Infallible;

use embedded_graphics_core::Pixel;
use embedded_graphics_core::draw_target::DrawTarget;
use embedded_graphics_core::geometry::{OriginDimensions, Size};

use crate::epd::{BUFFER_SIZE, Color, HEIGHT, WIDTH};

pub struct Framebuffer {
    buffer: Box<[u8; BUFFER_SIZE]>,
}

impl Framebuffer {
    /// Create a framebuffer initialized to white
    pub fn new() -> Self {
        let mut buffer = Box::new([0u8; BUFFER_SIZE]);
        buffer.fill(Color::White.fill_byte());
        Self { buffer }
    }

    pub fn clear(&mut self, color: Color) {
        self.buffer.fill(color.fill_byte());
    }

    /// Raw buffer for sending to the display
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer[..]
    }

    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, color: Color) {
        if x >= WIDTH || y >= HEIGHT {
            return;
        }

        let byte_idx = (y as usize * (WIDTH as usize / 2)) + (x as usize / 2);
        if x % 2 == 0 {
            self.buffer[byte_idx] = (self.buffer[byte_idx] & 0x0F) | (color.nibble() << 4);
        } else {
            self.buffer[byte_idx] = (self.buffer[byte_idx] & 0xF0) | color.nibble();
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        if x >= WIDTH || y >= HEIGHT {
            return None;
        }
        let byte = self.buffer[(y as usize * (WIDTH as usize / 2)) + (x as usize / 2)];
        let nibble = if x % 2 == 0 { byte >> 4 } else { byte & 0x0F };
        Some(Color::from_nibble(nibble))
    }

    /// Fill a rectangle, clipped to the panel
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, color: Color) {
        for row in y..(y + height).min(HEIGHT) {
            for col in x..(x + width).min(WIDTH) {
                self.set_pixel(col, row, color);
            }
        }
    }

    /// One-pixel line between two points
    pub fn line(&mut self, from: (i32, i32), to: (i32, i32), color: Color) {
        let (mut x, mut y) = from;
        let dx = (to.0 - x).abs();
        let dy = -(to.1 - y).abs();
        let sx = if x < to.0 { 1 } else { -1 };
        let sy = if y < to.1 { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            if x >= 0 && y >= 0 {
                self.set_pixel(x as u32, y as u32, color);
            }
            if x == to.0 && y == to.1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }
}

impl Default for Framebuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl OriginDimensions for Framebuffer {
    fn size(&self) -> Size {
        Size::new(WIDTH, HEIGHT)
    }
}

impl DrawTarget for Framebuffer {
    type Color = Color;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.x >= 0 && point.y >= 0 {
                self.set_pixel(point.x as u32, point.y as u32, color);
            }
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        Framebuffer::clear(self, color);
        Ok(())
    }
}
