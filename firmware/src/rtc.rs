//! RTC-backed services: wall clock, watchdog, deep sleep and wake cause
//!
//! The RTC keeps counting through deep sleep, so the wall clock set from SNTP
//! stays valid across wakes. All three services share one [`Rtc`].

use core::cell::RefCell;
use core::time::Duration as CoreDuration;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use esp_hal::gpio::{RtcPin, RtcPinWithResistors};
use esp_hal::peripherals::{GPIO4, GPIO5};
use esp_hal::rtc_cntl::sleep::{
    Ext0WakeupSource, Ext1WakeupSource, TimerWakeupSource, WakeupLevel,
};
use esp_hal::rtc_cntl::{Rtc, RwdtStage, RwdtStageAction};
use esp_hal::system::SleepSource;
use esp_hal::time::Duration;
use wakeframe_core::calendar::WallClock;
use wakeframe_core::retry::Watchdog;
use wakeframe_core::schedule::{MIN_SLEEP_SECS, PowerControl, WakeLevel, WakePlan};
use wakeframe_core::wake::WakeTrigger;

pub type SharedRtc = Mutex<CriticalSectionRawMutex, RefCell<Rtc<'static>>>;

/// Reset if not fed for this long
pub const WATCHDOG_TIMEOUT_SECS: u64 = 30;

/// Map the hardware wake cause
pub fn wake_trigger() -> WakeTrigger {
    match esp_hal::rtc_cntl::wakeup_cause() {
        SleepSource::Timer => WakeTrigger::Timer,
        SleepSource::Ext0 => WakeTrigger::Button,
        SleepSource::Ext1 => WakeTrigger::PowerConnect,
        other => {
            log::debug!("wake cause {:?}", other);
            WakeTrigger::Unrecognized
        }
    }
}

pub struct RtcClock {
    rtc: &'static SharedRtc,
}

impl RtcClock {
    pub fn new(rtc: &'static SharedRtc) -> Self {
        Self { rtc }
    }
}

impl WallClock for RtcClock {
    fn now(&mut self) -> u64 {
        self.rtc.lock(|rtc| rtc.borrow().current_time_us()) / 1_000_000
    }

    fn set(&mut self, epoch: u64) {
        self.rtc
            .lock(|rtc| rtc.borrow().set_current_time_us(epoch * 1_000_000));
    }
}

/// RTC watchdog, resets the whole system at stage 0
pub struct RtcWatchdog {
    rtc: &'static SharedRtc,
}

impl RtcWatchdog {
    pub fn start(rtc: &'static SharedRtc) -> Self {
        rtc.lock(|rtc| {
            let mut rtc = rtc.borrow_mut();
            rtc.rwdt
                .set_timeout(RwdtStage::Stage0, Duration::from_secs(WATCHDOG_TIMEOUT_SECS));
            rtc.rwdt
                .set_stage_action(RwdtStage::Stage0, RwdtStageAction::ResetSystem);
            rtc.rwdt.enable();
        });
        Self { rtc }
    }
}

impl Watchdog for RtcWatchdog {
    fn feed(&mut self) {
        self.rtc.lock(|rtc| rtc.borrow_mut().rwdt.feed());
    }
}

/// Deep sleep with timer, button (GPIO4) and VBUS sense (GPIO5) wake sources
pub struct DeepSleep {
    rtc: &'static SharedRtc,
    plan: Option<WakePlan>,
}

impl DeepSleep {
    pub fn new(rtc: &'static SharedRtc) -> Self {
        Self { rtc, plan: None }
    }
}

fn level(level: WakeLevel) -> WakeupLevel {
    match level {
        WakeLevel::Low => WakeupLevel::Low,
        WakeLevel::High => WakeupLevel::High,
    }
}

impl PowerControl for DeepSleep {
    fn arm_wake_sources(&mut self, plan: &WakePlan) {
        self.plan = Some(*plan);
    }

    fn power_off(&mut self) {
        let plan = self.plan.unwrap_or_else(|| WakePlan::new(MIN_SLEEP_SECS));
        log::info!("deep sleep for {} s", plan.timer_secs);

        let timer = TimerWakeupSource::new(CoreDuration::from_secs(plan.timer_secs));

        // SAFETY: the GPIO drivers for these pins are not used past this point
        let key_pin = unsafe { GPIO4::steal() };
        let mut sense_pin = unsafe { GPIO5::steal() };

        // Keep the button line from floating into spurious wakes
        key_pin.rtcio_pullup(true);
        key_pin.rtcio_pulldown(false);
        let ext0 = Ext0WakeupSource::new(key_pin, level(plan.button_level));

        let mut sense_pins: [&mut dyn RtcPin; 1] = [&mut sense_pin];
        let ext1 = Ext1WakeupSource::new(&mut sense_pins, level(plan.power_level));

        // Let the logger flush
        esp_hal::delay::Delay::new().delay_millis(100);

        self.rtc
            .lock(|rtc| rtc.borrow_mut().sleep_deep(&[&timer, &ext0, &ext1]))
    }

    fn restart(&mut self) {
        log::info!("restarting");
        esp_hal::system::software_reset()
    }
}
