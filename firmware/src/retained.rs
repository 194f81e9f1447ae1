//! Retained state in RTC fast memory
//!
//! The slot is not initialized by the startup code, so it survives deep sleep,
//! software resets, panics and watchdog resets. Only a power-on reset clears
//! it, see [`RtcRetained::take`].

use core::sync::atomic::{AtomicBool, Ordering};

use esp_hal::rtc_cntl::{SocResetReason, reset_reason};
use esp_hal::system::Cpu;
use wakeframe_core::retained::{RetainedCell, RetainedState, RetainedStore};

#[repr(transparent)]
struct Slot(RetainedCell);

// The cell is only trusted after its magic number checks out.
unsafe impl esp_hal::Persistable for Slot {}

#[esp_hal::ram(unstable(rtc_fast, persistent))]
static mut RETAINED: Slot = Slot(RetainedCell::new());

static TAKEN: AtomicBool = AtomicBool::new(false);

/// Exclusive handle to the RTC slot
pub struct RtcRetained {
    cell: &'static mut RetainedCell,
}

impl RtcRetained {
    /// Claim the slot; `None` if it was already claimed
    pub fn take() -> Option<Self> {
        if TAKEN.swap(true, Ordering::AcqRel) {
            return None;
        }
        let power_on = matches!(reset_reason(Cpu::ProCpu), Some(SocResetReason::ChipPowerOn));
        // SAFETY: TAKEN hands out at most one reference for the program's lifetime.
        // After a power-on reset the memory holds noise, so it is overwritten
        // before any reference to it exists.
        let slot = unsafe {
            let slot = &raw mut RETAINED;
            if power_on {
                core::ptr::write(slot, Slot(RetainedCell::new()));
            }
            &mut *slot
        };
        Some(Self { cell: &mut slot.0 })
    }
}

impl RetainedStore for RtcRetained {
    fn load(&mut self) -> Option<RetainedState> {
        self.cell.load()
    }

    fn commit(&mut self, state: &RetainedState) {
        self.cell.commit(state)
    }

    fn wipe(&mut self) {
        self.cell.wipe()
    }
}
