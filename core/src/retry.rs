//! Bounded polling with a liveness pulse
//!
//! Every wait in the controller goes through [`pause`] or [`poll_until`], which
//! split delays into slices of at most [`LIVENESS_SLICE_MS`] and feed the
//! watchdog between slices. Waits that cannot be sliced, like a network
//! exchange, run under [`feeding`] instead. The platform restarts the device if
//! the watchdog is starved for longer than a second.

use core::convert::Infallible;

use embassy_futures::select::{Either, select};
use embedded_hal_async::delay::DelayNs;

/// Longest delay between two watchdog feeds
pub const LIVENESS_SLICE_MS: u32 = 500;

/// Hardware watchdog (or any liveness sink)
pub trait Watchdog {
    fn feed(&mut self);
}

impl<F: FnMut()> Watchdog for F {
    fn feed(&mut self) {
        self()
    }
}

/// Attempt budget for a polled condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval_ms: u32,
}

impl RetryPolicy {
    /// Wi-Fi association: 40 polls, 500 ms apart
    pub const ASSOCIATION: Self = Self::new(40, 500);

    pub const fn new(max_attempts: u32, interval_ms: u32) -> Self {
        Self {
            max_attempts,
            interval_ms,
        }
    }

    /// Upper bound on the time spent polling
    pub const fn budget_ms(&self) -> u64 {
        self.max_attempts as u64 * self.interval_ms as u64
    }
}

/// The condition never became true within the policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("gave up after {attempts} attempts")]
pub struct Exhausted {
    pub attempts: u32,
}

/// Sleep for `ms`, feeding the watchdog at least every [`LIVENESS_SLICE_MS`]
pub async fn pause<D, W>(delay: &mut D, watchdog: &mut W, ms: u32)
where
    D: DelayNs,
    W: Watchdog + ?Sized,
{
    let mut remaining = ms;
    watchdog.feed();
    while remaining > 0 {
        let slice = remaining.min(LIVENESS_SLICE_MS);
        delay.delay_ms(slice).await;
        watchdog.feed();
        remaining -= slice;
    }
}

/// Poll `ready` until it returns true or the policy runs out.
///
/// Returns the number of attempts used on success.
pub async fn poll_until<D, W, F>(
    policy: RetryPolicy,
    delay: &mut D,
    watchdog: &mut W,
    mut ready: F,
) -> Result<u32, Exhausted>
where
    D: DelayNs,
    W: Watchdog + ?Sized,
    F: FnMut() -> bool,
{
    for attempt in 1..=policy.max_attempts {
        watchdog.feed();
        if ready() {
            return Ok(attempt);
        }
        if attempt < policy.max_attempts {
            pause(delay, watchdog, policy.interval_ms).await;
        }
    }
    Err(Exhausted {
        attempts: policy.max_attempts,
    })
}

/// Run `work` to completion, feeding the watchdog every [`LIVENESS_SLICE_MS`]
/// until it finishes. `work` must bound its own duration.
pub async fn feeding<D, W, F>(delay: &mut D, watchdog: &mut W, work: F) -> F::Output
where
    D: DelayNs,
    W: Watchdog + ?Sized,
    F: Future,
{
    match select(work, pulse(delay, watchdog)).await {
        Either::First(output) => output,
        Either::Second(never) => match never {},
    }
}

async fn pulse<D, W>(delay: &mut D, watchdog: &mut W) -> Infallible
where
    D: DelayNs,
    W: Watchdog + ?Sized,
{
    loop {
        watchdog.feed();
        delay.delay_ms(LIVENESS_SLICE_MS).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualClock, StepDelay, TestWatchdog};
    use embassy_futures::{block_on, yield_now};

    #[test]
    fn test_feeding_covers_a_long_wait() {
        let clock = ManualClock::new(0);
        let mut delay = StepDelay::new(clock.clone());
        let mut wd = TestWatchdog::new(clock.clone());
        let work = async {
            while clock.elapsed_ms() < 12_000 {
                yield_now().await;
            }
            7
        };
        assert_eq!(block_on(feeding(&mut delay, &mut wd, work)), 7);
        assert!(wd.feeds >= 24, "{} feeds", wd.feeds);
        assert!(wd.max_gap_ms <= LIVENESS_SLICE_MS as u64, "{} ms", wd.max_gap_ms);
    }

    #[test]
    fn test_feeding_returns_ready_work_untouched() {
        let clock = ManualClock::new(0);
        let mut delay = StepDelay::new(clock.clone());
        let mut wd = TestWatchdog::new(clock.clone());
        assert_eq!(block_on(feeding(&mut delay, &mut wd, async { "done" })), "done");
        assert_eq!(clock.elapsed_ms(), 0);
    }

    #[test]
    fn test_pause_feeds_in_slices() {
        let clock = ManualClock::new(0);
        let mut delay = StepDelay::new(clock.clone());
        let mut feeds = 0u32;
        let mut wd = || feeds += 1;
        block_on(pause(&mut delay, &mut wd, 1_200));
        // one up-front feed plus one per 500/500/200 slice
        assert_eq!(feeds, 4);
        assert_eq!(clock.elapsed_ms(), 1_200);
    }

    #[test]
    fn test_poll_until_succeeds_midway() {
        let clock = ManualClock::new(0);
        let mut delay = StepDelay::new(clock.clone());
        let mut polls = 0;
        let result = block_on(poll_until(
            RetryPolicy::ASSOCIATION,
            &mut delay,
            &mut || {},
            || {
                polls += 1;
                polls == 3
            },
        ));
        assert_eq!(result, Ok(3));
        assert_eq!(clock.elapsed_ms(), 1_000);
    }

    #[test]
    fn test_poll_until_exhausts_budget() {
        let clock = ManualClock::new(0);
        let mut delay = StepDelay::new(clock.clone());
        let mut polls = 0;
        let result = block_on(poll_until(
            RetryPolicy::ASSOCIATION,
            &mut delay,
            &mut || {},
            || {
                polls += 1;
                false
            },
        ));
        assert_eq!(result, Err(Exhausted { attempts: 40 }));
        assert_eq!(polls, 40);
        // no trailing sleep after the last attempt
        assert_eq!(clock.elapsed_ms(), 39 * 500);
    }
}
