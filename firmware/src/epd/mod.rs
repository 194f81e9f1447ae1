//! Driver for the Good Display GDEP073E01 (Spectra 6, 7.3", 800x480)
//!
//! Refreshes are split in two so the caller can sleep or serve commands while
//! the panel works: [`Epd7in3e::display_start`] sends the frame and triggers
//! the refresh, [`Epd7in3e::finish_display`] powers the panel down once
//! [`Epd7in3e::is_busy`] clears.

mod color;
mod reg;

pub use color::Color;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::SpiDevice;

pub const WIDTH: u32 = 800;
pub const HEIGHT: u32 = 480;
/// 4 bits per pixel, 2 pixels per byte
pub const BUFFER_SIZE: usize = (WIDTH as usize * HEIGHT as usize) / 2;

/// Longest blocking wait on the busy line outside a refresh
const BUSY_WAIT_LIMIT_MS: u32 = 5_000;
const BUSY_POLL_MS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshMode {
    /// ~15-20 s, best image quality
    #[default]
    Standard,
    /// ~5-8 s, slightly reduced quality
    Fast,
}

type Sequence = &'static [(u8, &'static [u8])];

const INIT_STANDARD: Sequence = &[
    (reg::CMDH, &[0x49, 0x55, 0x20, 0x08, 0x09, 0x18]),
    (reg::PWRR, &[0x3F]),
    (reg::PSR, &[0x5F, 0x69]),
    (reg::POFS, &[0x00, 0x54, 0x00, 0x44]),
    (reg::BTST1, &[0x40, 0x1F, 0x1F, 0x2C]),
    (reg::BTST2, &[0x6F, 0x1F, 0x17, 0x49]),
    (reg::BTST3, &[0x6F, 0x1F, 0x1F, 0x22]),
    (reg::PLL, &[0x08]),
    (reg::CDI, &[0x3F]),
    (reg::TCON, &[0x02, 0x00]),
    // 800x480
    (reg::TRES, &[0x03, 0x20, 0x01, 0xE0]),
    (reg::T_VDCS, &[0x01]),
    (reg::PWS, &[0x2F]),
];

const INIT_FAST: Sequence = &[
    (reg::CMDH, &[0x49, 0x55, 0x20, 0x08, 0x09, 0x18]),
    (reg::PWRR, &[0x3F, 0x00, 0x32, 0x2A, 0x0E, 0x2A]),
    (reg::PSR, &[0x5F, 0x69]),
    (reg::POFS, &[0x00, 0x54, 0x00, 0x44]),
    (reg::BTST1, &[0x40, 0x1F, 0x1F, 0x2C]),
    (reg::BTST2, &[0x6F, 0x1F, 0x16, 0x25]),
    (reg::BTST3, &[0x6F, 0x1F, 0x1F, 0x22]),
    (reg::IPC, &[0x00, 0x04]),
    (reg::PLL, &[0x02]),
    (reg::TSE, &[0x00]),
    (reg::CDI, &[0x3F]),
    (reg::TCON, &[0x02, 0x00]),
    (reg::TRES, &[0x03, 0x20, 0x01, 0xE0]),
    (reg::VDCS, &[0x1E]),
    (reg::T_VDCS, &[0x01]),
    (reg::AGID, &[0x00]),
    (reg::PWS, &[0x2F]),
    (reg::CCSET, &[0x00]),
    (reg::TSSET, &[0x00]),
];

#[derive(Debug)]
pub enum EpdError<E> {
    Spi(E),
    /// Busy line stuck outside a refresh
    Busy,
}

impl<E> From<E> for EpdError<E> {
    fn from(e: E) -> Self {
        EpdError::Spi(e)
    }
}

pub struct Epd7in3e<SPI, BUSY, DC, RST> {
    spi: SPI,
    busy: BUSY,
    dc: DC,
    rst: RST,
    refresh_mode: RefreshMode,
}

impl<SPI, BUSY, DC, RST> Epd7in3e<SPI, BUSY, DC, RST>
where
    SPI: SpiDevice,
    BUSY: InputPin,
    DC: OutputPin,
    RST: OutputPin,
{
    /// Reset and initialize the controller
    pub fn new<DELAY: DelayNs>(
        spi: SPI,
        busy: BUSY,
        dc: DC,
        rst: RST,
        delay: &mut DELAY,
        refresh_mode: RefreshMode,
    ) -> Result<Self, EpdError<SPI::Error>> {
        let mut epd = Self {
            spi,
            busy,
            dc,
            rst,
            refresh_mode,
        };
        epd.wake_up(delay)?;
        Ok(epd)
    }

    fn hardware_reset<DELAY: DelayNs>(&mut self, delay: &mut DELAY) {
        let _ = self.rst.set_high();
        delay.delay_ms(50);
        let _ = self.rst.set_low();
        delay.delay_ms(20);
        let _ = self.rst.set_high();
        delay.delay_ms(50);
    }

    /// Busy is active low
    pub fn is_busy(&mut self) -> bool {
        self.busy.is_low().unwrap_or(true)
    }

    fn wait_until_idle<DELAY: DelayNs>(&mut self, delay: &mut DELAY) -> Result<(), EpdError<SPI::Error>> {
        let mut waited = 0;
        while self.is_busy() {
            if waited >= BUSY_WAIT_LIMIT_MS {
                return Err(EpdError::Busy);
            }
            delay.delay_ms(BUSY_POLL_MS);
            waited += BUSY_POLL_MS;
        }
        Ok(())
    }

    fn send_command(&mut self, register: u8) -> Result<(), SPI::Error> {
        let _ = self.dc.set_low();
        self.spi.write(&[register])
    }

    fn send_data(&mut self, data: &[u8]) -> Result<(), SPI::Error> {
        let _ = self.dc.set_high();
        self.spi.write(data)
    }

    fn cmd_with_data(&mut self, register: u8, data: &[u8]) -> Result<(), SPI::Error> {
        self.send_command(register)?;
        self.send_data(data)
    }

    fn init<DELAY: DelayNs>(&mut self, delay: &mut DELAY) -> Result<(), EpdError<SPI::Error>> {
        let sequence = match self.refresh_mode {
            RefreshMode::Standard => INIT_STANDARD,
            RefreshMode::Fast => INIT_FAST,
        };
        for &(register, data) in sequence {
            self.cmd_with_data(register, data)?;
        }
        self.send_command(reg::PON)?;
        self.wait_until_idle(delay)
    }

    /// Send a full frame and start the refresh without waiting for it
    pub fn display_start<DELAY: DelayNs>(
        &mut self,
        buffer: &[u8],
        delay: &mut DELAY,
    ) -> Result<(), EpdError<SPI::Error>> {
        self.send_command(reg::DTM)?;
        self.send_data(buffer)?;

        self.send_command(reg::PON)?;
        self.wait_until_idle(delay)?;
        let booster: &[u8] = match self.refresh_mode {
            RefreshMode::Standard => &[0x6F, 0x1F, 0x17, 0x49],
            RefreshMode::Fast => &[0x6F, 0x1F, 0x16, 0x25],
        };
        self.cmd_with_data(reg::BTST2, booster)?;
        self.cmd_with_data(reg::DRF, &[0x00])?;
        // at least 200 us before busy is valid
        delay.delay_ms(1);
        Ok(())
    }

    /// Power the panel off after [`Self::is_busy`] cleared
    pub fn finish_display<DELAY: DelayNs>(&mut self, delay: &mut DELAY) -> Result<(), EpdError<SPI::Error>> {
        self.cmd_with_data(reg::POF, &[0x00])?;
        self.wait_until_idle(delay)
    }

    /// Deep sleep; only a hardware reset wakes the controller
    pub fn sleep<DELAY: DelayNs>(&mut self, delay: &mut DELAY) -> Result<(), EpdError<SPI::Error>> {
        self.cmd_with_data(reg::DSLP, &[0xA5])?;
        delay.delay_ms(100);
        Ok(())
    }

    pub fn wake_up<DELAY: DelayNs>(&mut self, delay: &mut DELAY) -> Result<(), EpdError<SPI::Error>> {
        self.hardware_reset(delay);
        self.init(delay)
    }
}
