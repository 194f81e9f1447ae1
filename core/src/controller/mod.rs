//! Wake-cycle controller
//!
//! Owns the board for one power-on: stability checks, the wake decision, the
//! sync and render, the external-power idle session with its command channel,
//! and finally the sleep. [`Controller::run`] only returns if the platform's
//! power-off or restart returns, which it does on the host.

use alloc::format;

use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal_async::delay::DelayNs;
use embedded_io::{Read, ReadReady, Write};

use crate::battery::{BatteryGauge, BatteryStatus};
use crate::calendar::WallClock;
use crate::command::{Command, CommandChannel, CommandError, LineEvent, StatusReport};
use crate::config::{ConfigStore, Configuration, Variant};
use crate::display::{self, Display, ReportView, SafeModeInfo, Screen};
use crate::net::Network;
use crate::presence::{
    DisconnectDebounce, PresenceMonitor, PresenceSignals, DISCONNECT_SAMPLES, SAMPLE_INTERVAL_MS,
};
use crate::retained::{CachedCredential, RetainedState, RetainedStore};
use crate::retry::{self, Watchdog};
use crate::schedule::{self, PowerControl, WakePlan};
use crate::stability;
use crate::sync::{Endpoints, SyncContext, SyncError};
use crate::wake::{self, WakeAction, WakeInputs, WakeTrigger};

/// LED pulse while parked in safe mode
const SAFE_MODE_PULSE_MS: u32 = 100;
const SAFE_MODE_PERIOD_MS: u32 = 2_000;

/// Concrete capability types of a board
pub trait Hardware {
    type Delay: DelayNs;
    type Watchdog: Watchdog;
    type Clock: WallClock;
    type Signals: PresenceSignals;
    type Battery: BatteryGauge;
    type Power: PowerControl;
    type Display: Display;
    type Retained: RetainedStore;
    type Config: ConfigStore;
    type Network: Network;
    type Port: Read + ReadReady + Write;
    type ResetButton: InputPin;
    type Led: OutputPin;
}

/// Every collaborator the controller drives
pub struct Board<H: Hardware> {
    pub delay: H::Delay,
    pub watchdog: H::Watchdog,
    pub clock: H::Clock,
    pub presence: PresenceMonitor<H::Signals>,
    pub battery: H::Battery,
    pub power: H::Power,
    pub display: H::Display,
    pub retained: H::Retained,
    pub config_store: H::Config,
    pub network: H::Network,
    pub commands: CommandChannel<H::Port>,
    pub reset_button: H::ResetButton,
    pub led: H::Led,
}

/// How a wake cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    PoweredOff,
    Restarted,
}

/// What the idle loop does after a command
enum Flow {
    Continue,
    Sleep,
    Stop(Shutdown),
}

pub struct Controller<H: Hardware> {
    pub board: Board<H>,
    variant: Variant,
    endpoints: Endpoints,
    state: RetainedState,
    config: Configuration,
    /// Configuration changed during this idle session
    config_changed: bool,
    /// `GO_SLEEP` was received; leave idle without the exit refresh
    skip_exit_refresh: bool,
    /// The cached result was produced during this boot
    fresh: bool,
    /// Code of this boot's last sync failure
    last_failure: Option<&'static str>,
}

impl<H: Hardware> Controller<H> {
    pub fn new(board: Board<H>, variant: Variant, endpoints: Endpoints) -> Self {
        Self {
            board,
            variant,
            endpoints,
            state: RetainedState::new(),
            config: Configuration::default(),
            config_changed: false,
            skip_exit_refresh: false,
            fresh: false,
            last_failure: None,
        }
    }

    /// Retained state as last committed
    pub fn state(&self) -> &RetainedState {
        &self.state
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Run one wake cycle
    pub async fn run(&mut self, trigger: WakeTrigger) -> Shutdown {
        self.board.watchdog.feed();
        log::info!("{} wake, variant {}", trigger.as_str(), self.variant.as_str());

        self.state = self.board.retained.load().unwrap_or_else(|| {
            log::info!("retained state invalid, starting fresh");
            RetainedState::new()
        });
        self.config = Configuration::load(&mut self.board.config_store).unwrap_or_else(|e| {
            log::error!("config load failed: {}", e);
            Configuration::default()
        });

        if self.factory_reset_gesture().await {
            return self.restart();
        }

        let next = stability::record_boot(&self.state, trigger);
        self.commit(next);
        log::info!(
            "boot #{} (rapid {})",
            self.state.boot_count,
            self.state.rapid_boot_count
        );
        if stability::check_crash_loop(&self.state) {
            return self.safe_mode().await;
        }

        let configured = self.configured();
        let decision = wake::decide(&WakeInputs {
            configured,
            trigger,
            setup_screen_shown: self.state.setup_screen_shown,
            present: self.board.presence.is_present(),
            first_boot_after_config: configured && !self.state.has_synced(),
        });
        if decision.draw_first_run {
            self.show_first_run().await;
        }
        self.perform(decision.action).await;
        self.sleep_or_idle().await
    }

    async fn perform(&mut self, action: WakeAction) {
        match action {
            WakeAction::ShowFirstRunScreen | WakeAction::Idle => {}
            WakeAction::RefreshAndRender => {
                // a button press asks for fresh data, so the clock is resynced too
                let manual = self.take_manual_wake();
                let _ = self.refresh_and_render(manual, false).await;
            }
            WakeAction::RenderFromCache => self.render_report().await,
        }
    }

    /// Read and clear the button-wake flag; true at most once per boot
    fn take_manual_wake(&mut self) -> bool {
        if !self.state.manual_wake {
            return false;
        }
        let mut next = self.state.clone();
        next.manual_wake = false;
        self.commit(next);
        true
    }

    fn configured(&self) -> bool {
        self.config.is_complete(self.variant)
    }

    fn commit(&mut self, next: RetainedState) {
        self.board.retained.commit(&next);
        self.state = next;
    }

    fn restart(&mut self) -> Shutdown {
        log::warn!("restarting");
        self.board.power.restart();
        Shutdown::Restarted
    }

    /// Erase configuration and retained state once the reset gesture completes
    async fn factory_reset_gesture(&mut self) -> bool {
        let board = &mut self.board;
        if !stability::reset_gesture_held(
            &mut board.reset_button,
            &mut board.led,
            &mut board.delay,
            &mut board.watchdog,
        )
        .await
        {
            return false;
        }
        if let Err(e) = self.erase() {
            log::error!("factory reset: {}", e);
        }
        true
    }

    fn erase(&mut self) -> Result<(), CommandError> {
        log::warn!("erasing configuration and retained state");
        self.board.retained.wipe();
        self.state = RetainedState::new();
        self.config = Configuration::default();
        self.config_changed = true;
        self.board.config_store.erase_all().map_err(|e| {
            log::error!("config store erase failed: {:?}", e);
            CommandError::Config(crate::config::ConfigError::Store)
        })
    }

    /// Park with a slow LED pulse, no network, until the reset gesture
    async fn safe_mode(&mut self) -> Shutdown {
        let info = SafeModeInfo {
            boot_count: self.state.boot_count,
            rapid_boot_count: self.state.rapid_boot_count,
        };
        let board = &mut self.board;
        display::show(
            &mut board.display,
            &mut board.delay,
            &mut board.watchdog,
            &Screen::SafeMode(info),
        )
        .await;
        loop {
            if self.factory_reset_gesture().await {
                return self.restart();
            }
            let board = &mut self.board;
            let _ = board.led.set_low();
            retry::pause(&mut board.delay, &mut board.watchdog, SAFE_MODE_PULSE_MS).await;
            let _ = board.led.set_high();
            retry::pause(
                &mut board.delay,
                &mut board.watchdog,
                SAFE_MODE_PERIOD_MS - SAFE_MODE_PULSE_MS,
            )
            .await;
        }
    }

    async fn show_first_run(&mut self) {
        let board = &mut self.board;
        display::show(
            &mut board.display,
            &mut board.delay,
            &mut board.watchdog,
            &Screen::FirstRun,
        )
        .await;
        if !self.state.setup_screen_shown {
            let mut next = self.state.clone();
            next.setup_screen_shown = true;
            self.commit(next);
        }
    }

    /// Sync, then draw the new result or fall back to the cache
    async fn refresh_and_render(&mut self, force: bool, report: bool) -> Result<(), SyncError> {
        let board = &mut self.board;
        let mut ctx = SyncContext {
            network: &mut board.network,
            delay: &mut board.delay,
            watchdog: &mut board.watchdog,
            clock: &mut board.clock,
            retained: &mut board.retained,
            config: &self.config,
            variant: self.variant,
            endpoints: &self.endpoints,
        };
        let result = if report {
            ctx.run(&mut self.state, force, &mut board.commands).await
        } else {
            ctx.run(&mut self.state, force, &mut ()).await
        };

        match &result {
            Ok(_) => {
                self.fresh = true;
                self.last_failure = None;
            }
            Err(SyncError::NotConfigured) => return Err(SyncError::NotConfigured),
            Err(e) => {
                log::warn!("{}, rendering from cache", e);
                self.last_failure = Some(e.code());
            }
        }
        self.render_report().await;
        result.map(|_| ())
    }

    async fn render_report(&mut self) {
        let present = self.board.presence.is_present();
        let battery = BatteryStatus::sample(
            &mut self.board.battery,
            present,
            self.config.battery_clamp(),
        );
        let view = ReportView {
            result: &self.state.cached_result,
            stale: !self.fresh,
            reduced_power: battery.reduced_power(),
            battery,
            last_sync_epoch: self.state.last_sync_epoch,
            zone: self.config.time_zone(),
            failure: self.last_failure,
        };
        let board = &mut self.board;
        display::show(
            &mut board.display,
            &mut board.delay,
            &mut board.watchdog,
            &Screen::Report(view),
        )
        .await;
    }

    fn sleep_secs(&mut self) -> u64 {
        let now = self.board.clock.now();
        let configured = self.configured();
        let secs = schedule::compute_sleep_duration(
            self.config.sleep_policy(),
            configured,
            now,
            &self.config.time_zone(),
        );
        if configured && self.last_failure.is_some() {
            schedule::after_failure(secs)
        } else {
            secs
        }
    }

    /// Power off, or idle for as long as external power keeps refusing it
    async fn sleep_or_idle(&mut self) -> Shutdown {
        loop {
            let plan = WakePlan::new(self.sleep_secs());
            if schedule::enter_sleep(&mut self.board.power, &mut self.board.presence, &plan).is_ok()
            {
                return Shutdown::PoweredOff;
            }
            if let Some(shutdown) = self.idle().await {
                return shutdown;
            }
        }
    }

    /// Serve commands until external power has been gone for
    /// [`DISCONNECT_SAMPLES`] consecutive samples
    async fn idle(&mut self) -> Option<Shutdown> {
        log::info!("external power present, idling");
        let mut debounce = DisconnectDebounce::new();
        loop {
            while let Some(event) = self.board.commands.poll() {
                match self.handle(event).await {
                    Flow::Continue => {}
                    Flow::Sleep => return None,
                    Flow::Stop(shutdown) => return Some(shutdown),
                }
            }
            let board = &mut self.board;
            retry::pause(&mut board.delay, &mut board.watchdog, SAMPLE_INTERVAL_MS).await;
            if debounce.sample(board.presence.is_present()) {
                log::info!("external power gone for {} samples", DISCONNECT_SAMPLES);
                break;
            }
        }

        let stale_config = self.config_changed || !self.state.has_synced();
        if !self.skip_exit_refresh && self.configured() && stale_config {
            log::info!("refreshing before sleep");
            let _ = self.refresh_and_render(false, false).await;
        }
        self.config_changed = false;
        None
    }

    async fn handle(&mut self, event: LineEvent) -> Flow {
        self.board.watchdog.feed();
        let line = match event {
            LineEvent::Line(line) => line,
            LineEvent::TooLong => {
                self.board.commands.finish(Err(CommandError::LineTooLong));
                return Flow::Continue;
            }
        };
        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                self.board.commands.finish(Err(e));
                return Flow::Continue;
            }
        };
        log::info!("command {}", command.name());

        match command {
            Command::Ping => {
                self.board.commands.send("PONG");
                Flow::Continue
            }
            Command::GetConfig => {
                let line = format!("CONFIG:{}", self.config.to_json());
                self.board.commands.send(&line);
                self.board.commands.finish(Ok(()));
                Flow::Continue
            }
            Command::GetStatus => {
                let line = format!("STATUS:{}", self.status_json());
                self.board.commands.send(&line);
                self.board.commands.finish(Ok(()));
                Flow::Continue
            }
            Command::SetConfig(json) => {
                let result = self.set_config(json);
                self.board.commands.finish(result);
                Flow::Continue
            }
            Command::WipeConfig => {
                let result = self.wipe_config();
                self.board.commands.finish(result);
                Flow::Continue
            }
            Command::FactoryReset => {
                let result = self.erase();
                self.show_first_run().await;
                self.board.commands.finish(result);
                Flow::Continue
            }
            Command::Refresh => {
                let result = self
                    .refresh_and_render(true, true)
                    .await
                    .map_err(CommandError::from);
                self.board.commands.finish(result);
                Flow::Continue
            }
            Command::GoSleep => {
                self.skip_exit_refresh = true;
                self.board.commands.finish(Ok(()));
                Flow::Sleep
            }
            Command::Restart => {
                self.board.commands.finish(Ok(()));
                Flow::Stop(self.restart())
            }
        }
    }

    /// Merge, persist, then adopt. A changed credential field drops the cached
    /// bearer token.
    fn set_config(&mut self, json: &str) -> Result<(), CommandError> {
        let mut next = self.config.clone();
        let change = next.merge_json(json)?;
        if !change.changed {
            return Ok(());
        }
        next.save(&mut self.board.config_store)?;
        self.config = next;
        self.config_changed = true;
        if change.credentials_changed {
            log::info!("credentials changed, dropping cached token");
            self.clear_credential();
        }
        Ok(())
    }

    fn wipe_config(&mut self) -> Result<(), CommandError> {
        self.board.config_store.erase_all().map_err(|e| {
            log::error!("config store erase failed: {:?}", e);
            crate::config::ConfigError::Store
        })?;
        self.config = Configuration::default();
        self.config_changed = true;
        self.clear_credential();
        Ok(())
    }

    fn clear_credential(&mut self) {
        if self.state.cached_credential.is_empty() {
            return;
        }
        let mut next = self.state.clone();
        next.cached_credential = CachedCredential::empty();
        self.commit(next);
    }

    fn status_json(&mut self) -> alloc::string::String {
        let present = self.board.presence.is_present();
        let battery = BatteryStatus::sample(
            &mut self.board.battery,
            present,
            self.config.battery_clamp(),
        );
        let report = StatusReport {
            variant: self.variant.as_str(),
            configured: self.configured(),
            boot_count: self.state.boot_count,
            rapid_boot_count: self.state.rapid_boot_count,
            last_sync_epoch: self.state.last_sync_epoch,
            last_clock_sync_epoch: self.state.last_clock_sync_epoch,
            now: self.board.clock.now(),
            battery_percent: battery.percent,
            external_power: present,
            credential_cached: !self.state.cached_credential.is_empty(),
            has_cached_result: !self.state.cached_result.is_empty(),
        };
        serde_json::to_string(&report).unwrap_or_default()
    }
}
