//! The e-paper panel as the controller's display
//!
//! The controller sleeps between refreshes; it is woken (hardware reset and
//! init) on the next render.

use embassy_time::Delay;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::SpiDevice;
use wakeframe_core::display::{Display, Screen};

use crate::epd::{Epd7in3e, EpdError};
use crate::framebuffer::Framebuffer;
use crate::render;

pub struct Panel<SPI, BUSY, DC, RST> {
    epd: Epd7in3e<SPI, BUSY, DC, RST>,
    framebuffer: Framebuffer,
    delay: Delay,
    asleep: bool,
}

impl<SPI, BUSY, DC, RST> Panel<SPI, BUSY, DC, RST>
where
    SPI: SpiDevice,
    BUSY: InputPin,
    DC: OutputPin,
    RST: OutputPin,
{
    pub fn new(epd: Epd7in3e<SPI, BUSY, DC, RST>) -> Self {
        Self {
            epd,
            framebuffer: Framebuffer::new(),
            delay: Delay,
            asleep: false,
        }
    }
}

impl<SPI, BUSY, DC, RST> Display for Panel<SPI, BUSY, DC, RST>
where
    SPI: SpiDevice,
    BUSY: InputPin,
    DC: OutputPin,
    RST: OutputPin,
{
    type Error = EpdError<SPI::Error>;

    fn render(&mut self, screen: &Screen<'_>) -> Result<(), Self::Error> {
        if self.asleep {
            self.epd.wake_up(&mut self.delay)?;
            self.asleep = false;
        }
        render::draw(&mut self.framebuffer, screen);
        self.epd.display_start(self.framebuffer.as_slice(), &mut self.delay)
    }

    fn is_busy(&mut self) -> bool {
        self.epd.is_busy()
    }

    fn finish(&mut self) -> Result<(), Self::Error> {
        self.epd.finish_display(&mut self.delay)?;
        self.epd.sleep(&mut self.delay)?;
        self.asleep = true;
        Ok(())
    }
}
