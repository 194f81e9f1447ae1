//! External power presence
//!
//! The PMU drives the VBUS sense line high while USB power is attached. The
//! same line is the power-connect wake source during deep sleep.

use esp_hal::gpio::Input;
use wakeframe_core::presence::PresenceSignals;

use crate::port;

pub struct SenseLines {
    vbus: Input<'static>,
}

impl SenseLines {
    pub fn new(vbus: Input<'static>) -> Self {
        Self { vbus }
    }
}

impl PresenceSignals for SenseLines {
    fn power_sense(&mut self) -> bool {
        self.vbus.is_high()
    }

    fn host_link_alive(&mut self) -> bool {
        port::host_link_alive()
    }
}
