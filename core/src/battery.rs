//! Battery level reporting
//!
//! The fuel gauge on the PMIC under-reports while charging from a depleted
//! cell: anything below 20% with external power attached is almost always a
//! gauge artefact. [`BatteryClamp`] replaces such readings with a neutral value
//! instead of hard-coding the quirk into the driver.

/// Fuel gauge capability
pub trait BatteryGauge {
    /// State of charge in percent, `None` if the gauge could not be read
    fn percent(&mut self) -> Option<u8>;
}

/// Readings at or below this are shown with the reduced-power indicator
pub const LOW_BATTERY_PERCENT: u8 = 20;

/// Substitute for implausibly low readings taken on external power
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryClamp {
    /// Readings strictly below this are replaced
    pub floor: u8,
    pub substitute: u8,
}

impl BatteryClamp {
    pub const DEFAULT: Self = Self {
        floor: 20,
        substitute: 50,
    };

    pub fn apply(&self, percent: u8, externally_powered: bool) -> u8 {
        if externally_powered && percent < self.floor {
            self.substitute
        } else {
            percent
        }
    }
}

impl Default for BatteryClamp {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// A battery reading prepared for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatteryStatus {
    /// Percent after clamping, `None` when unreadable
    pub percent: Option<u8>,
    pub externally_powered: bool,
}

impl BatteryStatus {
    /// Read the gauge, applying `clamp` when one is configured
    pub fn sample<B: BatteryGauge + ?Sized>(
        gauge: &mut B,
        externally_powered: bool,
        clamp: Option<BatteryClamp>,
    ) -> Self {
        let raw = gauge.percent().map(|p| p.min(100));
        let percent = match (raw, clamp) {
            (Some(p), Some(clamp)) => Some(clamp.apply(p, externally_powered)),
            (p, _) => p,
        };
        if let Some(p) = percent {
            log::debug!("battery {}% (raw {:?}, external {})", p, raw, externally_powered);
        } else {
            log::warn!("battery gauge unreadable");
        }
        Self {
            percent,
            externally_powered,
        }
    }

    /// The display should use its reduced-power presentation
    pub fn reduced_power(&self) -> bool {
        !self.externally_powered && matches!(self.percent, Some(p) if p <= LOW_BATTERY_PERCENT)
    }
}
