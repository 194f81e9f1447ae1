//! Crash-loop detection and the factory-reset gesture

use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal_async::delay::DelayNs;

use crate::retained::RetainedState;
use crate::retry::{self, Watchdog};
use crate::wake::WakeTrigger;

/// Consecutive unrecognized power-ons that put the device in safe mode
pub const SAFE_MODE_THRESHOLD: u32 = 5;

/// How long the reset button must stay down after the confirmation blinks
pub const FACTORY_RESET_HOLD_MS: u32 = 5_000;
pub const CONFIRM_BLINKS: u8 = 3;
pub const BLINK_MS: u32 = 150;
/// Button polling period while a hold is being timed
pub const HOLD_POLL_MS: u32 = 50;

/// Count this power-on. Returns the updated state; the caller commits it.
///
/// A recognized trigger clears the rapid-boot counter, an unrecognized one
/// increments it.
pub fn record_boot(state: &RetainedState, trigger: WakeTrigger) -> RetainedState {
    let mut next = state.clone();
    next.boot_count = next.boot_count.wrapping_add(1);
    next.rapid_boot_count = if trigger.is_recognized() {
        0
    } else {
        next.rapid_boot_count.saturating_add(1)
    };
    next.manual_wake = trigger == WakeTrigger::Button;
    next
}

/// True once enough unexplained power-ons happened back to back
pub fn check_crash_loop(state: &RetainedState) -> bool {
    let looping = state.rapid_boot_count >= SAFE_MODE_THRESHOLD;
    if looping {
        log::error!(
            "{} consecutive unrecognized boots, entering safe mode",
            state.rapid_boot_count
        );
    }
    looping
}

/// Active-low button read; a pin error counts as released
fn held<P: InputPin>(button: &mut P) -> bool {
    button.is_low().unwrap_or(false)
}

/// Watch for the factory-reset gesture.
///
/// Returns immediately with `false` if the button is up. Otherwise blinks the
/// (active-low) LED [`CONFIRM_BLINKS`] times and then requires the button to
/// stay down for [`FACTORY_RESET_HOLD_MS`]. Releasing at any point aborts.
/// Returns true when the gesture completed; erasing and restarting is up to
/// the caller.
pub async fn reset_gesture_held<P, L, D, W>(
    button: &mut P,
    led: &mut L,
    delay: &mut D,
    watchdog: &mut W,
) -> bool
where
    P: InputPin,
    L: OutputPin,
    D: DelayNs,
    W: Watchdog + ?Sized,
{
    if !held(button) {
        return false;
    }
    log::info!("reset button down, confirming");

    for _ in 0..CONFIRM_BLINKS {
        let _ = led.set_low();
        retry::pause(delay, watchdog, BLINK_MS).await;
        let _ = led.set_high();
        retry::pause(delay, watchdog, BLINK_MS).await;
        if !held(button) {
            log::info!("reset button released during confirmation");
            return false;
        }
    }

    let _ = led.set_low();
    let mut elapsed = 0;
    while elapsed < FACTORY_RESET_HOLD_MS {
        retry::pause(delay, watchdog, HOLD_POLL_MS).await;
        elapsed += HOLD_POLL_MS;
        if !held(button) {
            let _ = led.set_high();
            log::info!("reset button released after {} ms", elapsed);
            return false;
        }
    }
    log::warn!("factory reset gesture confirmed");
    true
}
