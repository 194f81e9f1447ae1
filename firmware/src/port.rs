//! Host command port over the USB Serial/JTAG controller
//!
//! Any byte from the host marks the link alive for [`HOST_LINK_WINDOW_MS`].

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embassy_time::Instant;
use embedded_io::{ErrorKind, ErrorType, Read, ReadReady, Write};
use esp_hal::Blocking;
use esp_hal::usb_serial_jtag::UsbSerialJtag;
use heapless::Deque;

pub const HOST_LINK_WINDOW_MS: u32 = 30_000;

static HOST_SEEN: AtomicBool = AtomicBool::new(false);
/// Uptime of the last received byte, wrapping
static LAST_RX_MS: AtomicU32 = AtomicU32::new(0);

fn uptime_ms() -> u32 {
    Instant::now().as_millis() as u32
}

/// The host sent something within the last [`HOST_LINK_WINDOW_MS`]
pub fn host_link_alive() -> bool {
    HOST_SEEN.load(Ordering::Relaxed)
        && uptime_ms().wrapping_sub(LAST_RX_MS.load(Ordering::Relaxed)) < HOST_LINK_WINDOW_MS
}

pub struct HostPort {
    usb: UsbSerialJtag<'static, Blocking>,
    pending: Deque<u8, 64>,
}

impl HostPort {
    pub fn new(usb: UsbSerialJtag<'static, Blocking>) -> Self {
        Self {
            usb,
            pending: Deque::new(),
        }
    }

    fn fill(&mut self) {
        let mut chunk = [0u8; 64];
        let room = self.pending.capacity() - self.pending.len();
        let n = self.usb.drain_rx_fifo(&mut chunk[..room]);
        if n > 0 {
            LAST_RX_MS.store(uptime_ms(), Ordering::Relaxed);
            HOST_SEEN.store(true, Ordering::Relaxed);
        }
        for byte in &chunk[..n] {
            let _ = self.pending.push_back(*byte);
        }
    }
}

impl ErrorType for HostPort {
    type Error = ErrorKind;
}

impl ReadReady for HostPort {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        if self.pending.is_empty() {
            self.fill();
        }
        Ok(!self.pending.is_empty())
    }
}

impl Read for HostPort {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        while self.pending.is_empty() && !buf.is_empty() {
            self.fill();
        }
        let mut n = 0;
        while n < buf.len() {
            match self.pending.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }
}

impl Write for HostPort {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.usb.write(buf).map_err(|_| ErrorKind::Other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.usb.flush_tx().map_err(|_| ErrorKind::Other)
    }
}
