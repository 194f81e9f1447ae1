//! Display collaborator
//!
//! The core decides what to show; drawing belongs to the [`Display`]
//! implementation. A panel refresh takes tens of seconds and must finish
//! before the device changes power state.

use embedded_hal_async::delay::DelayNs;

use crate::battery::BatteryStatus;
use crate::calendar::TimeZone;
use crate::retained::CachedResult;
use crate::retry::{self, Watchdog};

pub const BUSY_POLL_MS: u32 = 100;
pub const BUSY_TIMEOUT_MS: u32 = 60_000;

/// Fixed diagnostic content for safe mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafeModeInfo {
    pub boot_count: u32,
    pub rapid_boot_count: u32,
}

/// The data screen
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportView<'a> {
    pub result: &'a CachedResult,
    /// Not produced during this boot
    pub stale: bool,
    /// Use the low-battery presentation
    pub reduced_power: bool,
    pub battery: BatteryStatus,
    /// 0 = never
    pub last_sync_epoch: u64,
    pub zone: TimeZone,
    /// Why this boot's sync failed, if it did
    pub failure: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Screen<'a> {
    /// Setup instructions for an unconfigured device
    FirstRun,
    SafeMode(SafeModeInfo),
    Report(ReportView<'a>),
}

impl Screen<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Screen::FirstRun => "first-run",
            Screen::SafeMode(_) => "safe-mode",
            Screen::Report(v) if v.stale => "report (stale)",
            Screen::Report(_) => "report",
        }
    }
}

pub trait Display {
    type Error: core::fmt::Debug;

    /// Draw `screen` and start the panel refresh without waiting for it
    fn render(&mut self, screen: &Screen<'_>) -> Result<(), Self::Error>;

    fn is_busy(&mut self) -> bool;

    /// Put the panel to sleep once the refresh has completed
    fn finish(&mut self) -> Result<(), Self::Error>;
}

/// The panel stayed busy past [`BUSY_TIMEOUT_MS`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("display busy for more than {} ms", BUSY_TIMEOUT_MS)]
pub struct BusyTimeout;

/// Poll the busy line every [`BUSY_POLL_MS`], feeding the watchdog, then finish
pub async fn wait_until_idle<P, D, W>(
    display: &mut P,
    delay: &mut D,
    watchdog: &mut W,
) -> Result<(), BusyTimeout>
where
    P: Display + ?Sized,
    D: DelayNs,
    W: Watchdog + ?Sized,
{
    let mut waited = 0;
    while display.is_busy() {
        if waited >= BUSY_TIMEOUT_MS {
            log::error!("display still busy after {} ms", waited);
            return Err(BusyTimeout);
        }
        retry::pause(delay, watchdog, BUSY_POLL_MS).await;
        waited += BUSY_POLL_MS;
    }
    log::debug!("display idle after {} ms", waited);
    if let Err(e) = display.finish() {
        log::warn!("display finish failed: {:?}", e);
    }
    Ok(())
}

/// Render and block until the panel is idle again
pub async fn show<P, D, W>(display: &mut P, delay: &mut D, watchdog: &mut W, screen: &Screen<'_>)
where
    P: Display + ?Sized,
    D: DelayNs,
    W: Watchdog + ?Sized,
{
    log::info!("rendering {}", screen.name());
    watchdog.feed();
    if let Err(e) = display.render(screen) {
        log::error!("render failed: {:?}", e);
    }
    let _ = wait_until_idle(display, delay, watchdog).await;
}
