//! Sleep scheduling and wake-source arming

use core::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::calendar::{self, TimeZone, SECS_PER_DAY, SECS_PER_HOUR, SECS_PER_MINUTE};
use crate::presence::{PresenceMonitor, PresenceSignals};

pub const DEFAULT_REFRESH_HOURS: u16 = 6;
/// Sleep used while the device has no configuration
pub const UNCONFIGURED_SLEEP_SECS: u64 = 7 * SECS_PER_DAY;
pub const MIN_SLEEP_SECS: u64 = 10 * SECS_PER_MINUTE;
/// Upper bound on the sleep following a failed sync
pub const FAILURE_RETRY_SECS: u64 = SECS_PER_HOUR;

/// A local time of day with minute resolution, written `HH:MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    minutes: u16,
}

impl TimeOfDay {
    pub const fn new(hour: u8, minute: u8) -> Option<Self> {
        if hour > 23 || minute > 59 {
            return None;
        }
        Some(Self {
            minutes: hour as u16 * 60 + minute as u16,
        })
    }

    pub fn parse(s: &str) -> Option<Self> {
        let (h, m) = s.trim().split_once(':')?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return None;
        }
        Self::new(h.parse().ok()?, m.parse().ok()?)
    }

    pub fn hour(&self) -> u8 {
        (self.minutes / 60) as u8
    }

    pub fn minute(&self) -> u8 {
        (self.minutes % 60) as u8
    }

    pub fn seconds_of_day(&self) -> u64 {
        self.minutes as u64 * SECS_PER_MINUTE
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Visitor;

        impl de::Visitor<'_> for Visitor {
            type Value = TimeOfDay;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a time of day as \"HH:MM\"")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<TimeOfDay, E> {
                TimeOfDay::parse(v).ok_or_else(|| E::invalid_value(de::Unexpected::Str(v), &self))
            }
        }

        deserializer.deserialize_str(Visitor)
    }
}

/// How the next wake is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepPolicy<'a> {
    FixedInterval { hours: u16 },
    /// Wake at each listed local time
    FixedSchedule(&'a [TimeOfDay]),
}

/// Seconds to sleep from `now`.
///
/// Unconfigured devices sleep a week. A schedule picks the first entry
/// strictly after local now, wrapping to tomorrow's first entry. Without a
/// plausible clock a schedule cannot be placed and the default interval is
/// used. The result is never below [`MIN_SLEEP_SECS`].
pub fn compute_sleep_duration(
    policy: SleepPolicy<'_>,
    configured: bool,
    now: u64,
    zone: &TimeZone,
) -> u64 {
    if !configured {
        return UNCONFIGURED_SLEEP_SECS;
    }
    let secs = match policy {
        SleepPolicy::FixedInterval { hours } => hours as u64 * SECS_PER_HOUR,
        SleepPolicy::FixedSchedule(times) if times.is_empty() => {
            DEFAULT_REFRESH_HOURS as u64 * SECS_PER_HOUR
        }
        SleepPolicy::FixedSchedule(_) if !calendar::is_plausible(now) => {
            log::warn!("clock not set, using default interval instead of schedule");
            DEFAULT_REFRESH_HOURS as u64 * SECS_PER_HOUR
        }
        SleepPolicy::FixedSchedule(times) => {
            let sod = calendar::local_seconds_of_day(now, zone) as u64;
            let target = times
                .iter()
                .map(TimeOfDay::seconds_of_day)
                .filter(|t| *t > sod)
                .min()
                .or_else(|| {
                    times
                        .iter()
                        .map(|t| t.seconds_of_day() + SECS_PER_DAY)
                        .min()
                })
                .unwrap_or(sod + DEFAULT_REFRESH_HOURS as u64 * SECS_PER_HOUR);
            // through local wall time, so a DST change in between is honoured
            let midnight = calendar::to_local(now, zone) - sod as i64;
            calendar::from_local(midnight + target as i64, zone).saturating_sub(now)
        }
    };
    secs.max(MIN_SLEEP_SECS)
}

/// Shorten the sleep after a failed sync so the device retries sooner
pub fn after_failure(secs: u64) -> u64 {
    secs.min(FAILURE_RETRY_SECS)
}

/// Electrical level that wakes the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeLevel {
    Low,
    High,
}

/// The wake sources to arm before powering off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakePlan {
    pub timer_secs: u64,
    /// The user button is active low
    pub button_level: WakeLevel,
    /// The PMU sense line goes high when external power is attached
    pub power_level: WakeLevel,
}

impl WakePlan {
    pub fn new(timer_secs: u64) -> Self {
        Self {
            timer_secs,
            button_level: WakeLevel::Low,
            power_level: WakeLevel::High,
        }
    }
}

/// Platform power control
pub trait PowerControl {
    /// Enable the timer, button and power-presence wake sources
    fn arm_wake_sources(&mut self, plan: &WakePlan);

    /// Enter the lowest power state. Does not return on hardware.
    fn power_off(&mut self);

    /// Reboot. Does not return on hardware.
    fn restart(&mut self);
}

/// Powering off was refused because external power is present
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("external power present, not sleeping")]
pub struct SleepRefused;

/// Arm wake sources and power off, unless external power is present.
///
/// While presence reports true this returns `Err(SleepRefused)` every time
/// and never touches the power control.
pub fn enter_sleep<P, S>(
    power: &mut P,
    presence: &mut PresenceMonitor<S>,
    plan: &WakePlan,
) -> Result<(), SleepRefused>
where
    P: PowerControl + ?Sized,
    S: PresenceSignals,
{
    if presence.is_present() {
        log::info!("sleep refused: external power present");
        return Err(SleepRefused);
    }
    log::info!("sleeping for {} s", plan.timer_secs);
    power.arm_wake_sources(plan);
    power.power_off();
    Ok(())
}
