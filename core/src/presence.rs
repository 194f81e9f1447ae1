//! External power detection
//!
//! Two independent hints say the device is plugged in: the PMU's VBUS sense
//! line and a live host on the command transport. Either is enough. A plug
//! is trusted at once; an unplug has to persist before the device may sleep.

/// Samples needed before an unplug is believed
pub const DISCONNECT_SAMPLES: u8 = 10;

/// Spacing between presence samples in the idle loop
pub const SAMPLE_INTERVAL_MS: u32 = 1_000;

/// Raw presence inputs
pub trait PresenceSignals {
    /// PMU sense line reports external power
    fn power_sense(&mut self) -> bool;

    /// A host is actively talking to the command transport
    fn host_link_alive(&mut self) -> bool;
}

/// Named presence predicate over [`PresenceSignals`]
pub struct PresenceMonitor<S> {
    signals: S,
}

impl<S: PresenceSignals> PresenceMonitor<S> {
    pub fn new(signals: S) -> Self {
        Self { signals }
    }

    /// External power is present right now
    pub fn is_present(&mut self) -> bool {
        let sense = self.signals.power_sense();
        let link = self.signals.host_link_alive();
        log::trace!("presence: sense={} link={}", sense, link);
        sense || link
    }

    pub fn signals(&mut self) -> &mut S {
        &mut self.signals
    }
}

/// Counts consecutive absent samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisconnectDebounce {
    absent: u8,
}

impl DisconnectDebounce {
    pub const fn new() -> Self {
        Self { absent: 0 }
    }

    /// Feed one sample. Returns true once [`DISCONNECT_SAMPLES`] consecutive
    /// absent samples have been seen; any present sample starts over.
    pub fn sample(&mut self, present: bool) -> bool {
        if present {
            self.absent = 0;
        } else {
            self.absent = self.absent.saturating_add(1);
        }
        self.is_disconnected()
    }

    pub fn is_disconnected(&self) -> bool {
        self.absent >= DISCONNECT_SAMPLES
    }

    pub fn reset(&mut self) {
        self.absent = 0;
    }
}
