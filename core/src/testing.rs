//! Host-side fakes for every capability the controller consumes.
//!
//! Time is simulated: [`StepDelay`] advances a shared [`ManualClock`] instead
//! of sleeping, and the other fakes read that clock to decide what they
//! report, so whole wake cycles run instantly and deterministically.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::rc::Rc;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::cell::Cell;
use core::convert::Infallible;

use embedded_hal::digital::{ErrorType as PinErrorType, InputPin, OutputPin};
use embedded_hal_async::delay::DelayNs;
use embedded_io::{ErrorKind, ErrorType as IoErrorType, Read, ReadReady, Write};

use crate::battery::BatteryGauge;
use crate::calendar::WallClock;
use crate::config::ConfigStore;
use crate::display::{Display, Screen};
use crate::net::{Network, Request, TransportError, MAX_BODY_BYTES};
use crate::presence::PresenceSignals;
use crate::retry::Watchdog;
use crate::schedule::{PowerControl, WakePlan};

/// Shared simulated time: a wall-clock base plus elapsed nanoseconds
#[derive(Debug, Clone)]
pub struct ManualClock {
    base_epoch: Rc<Cell<u64>>,
    elapsed_ns: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new(base_epoch: u64) -> Self {
        Self {
            base_epoch: Rc::new(Cell::new(base_epoch)),
            elapsed_ns: Rc::new(Cell::new(0)),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ns.get() / 1_000_000
    }

    pub fn advance_ns(&self, ns: u64) {
        self.elapsed_ns.set(self.elapsed_ns.get() + ns);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance_ns(ms * 1_000_000);
    }

    /// Wall-clock seconds
    pub fn now(&self) -> u64 {
        self.base_epoch.get() + self.elapsed_ms() / 1_000
    }

    pub fn set_now(&self, epoch: u64) {
        self.base_epoch
            .set(epoch.saturating_sub(self.elapsed_ms() / 1_000));
    }
}

/// Delay that advances the shared clock, then yields once so concurrent
/// futures get polled
pub struct StepDelay {
    clock: ManualClock,
}

impl StepDelay {
    pub fn new(clock: ManualClock) -> Self {
        Self { clock }
    }
}

impl DelayNs for StepDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.clock.advance_ns(ns as u64);
        embassy_futures::yield_now().await;
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.clock.advance_ms(ms as u64);
        embassy_futures::yield_now().await;
    }
}

/// [`WallClock`] backed by the simulated clock
pub struct TestClock {
    clock: ManualClock,
}

impl TestClock {
    pub fn new(clock: ManualClock) -> Self {
        Self { clock }
    }
}

impl WallClock for TestClock {
    fn now(&mut self) -> u64 {
        self.clock.now()
    }

    fn set(&mut self, epoch: u64) {
        self.clock.set_now(epoch);
    }
}

/// Records the largest gap between two feeds
pub struct TestWatchdog {
    clock: ManualClock,
    last_feed_ms: u64,
    pub feeds: u64,
    pub max_gap_ms: u64,
}

impl TestWatchdog {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            last_feed_ms: 0,
            feeds: 0,
            max_gap_ms: 0,
        }
    }
}

impl Watchdog for TestWatchdog {
    fn feed(&mut self) {
        let now = self.clock.elapsed_ms();
        self.max_gap_ms = self.max_gap_ms.max(now - self.last_feed_ms);
        self.last_feed_ms = now;
        self.feeds += 1;
    }
}

#[derive(Debug)]
struct Route {
    pattern: String,
    responses: VecDeque<(u16, String)>,
    last: (u16, String),
}

/// One request as seen by [`FakeNetwork`]
#[derive(Debug, Clone)]
pub struct LoggedRequest {
    pub url: String,
    pub bearer: Option<String>,
    pub form: Option<String>,
    pub limit: Option<usize>,
    pub at_ms: u64,
}

/// Scripted network: responses are chosen by URL substring
pub struct FakeNetwork {
    clock: ManualClock,
    associates: bool,
    connected: bool,
    time_fails: bool,
    network_epoch: Option<u64>,
    routes: Vec<Route>,
    log: Vec<LoggedRequest>,
    connects: u32,
    time_queries: u32,
    shut_down: bool,
    latency_ms: u64,
    verifies_peers: bool,
}

impl FakeNetwork {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            associates: true,
            connected: false,
            time_fails: false,
            network_epoch: None,
            routes: Vec::new(),
            log: Vec::new(),
            connects: 0,
            time_queries: 0,
            shut_down: false,
            latency_ms: 0,
            verifies_peers: true,
        }
    }

    /// Always answer requests matching `pattern` with this response
    pub fn respond(&mut self, pattern: &str, status: u16, body: &str) {
        self.respond_seq(pattern, &[(status, body.to_string())]);
    }

    /// Answer in order, repeating the last response once exhausted
    pub fn respond_seq(&mut self, pattern: &str, responses: &[(u16, String)]) {
        let mut queue: VecDeque<(u16, String)> = responses.iter().cloned().collect();
        let last = queue.back().cloned().unwrap_or((404, String::new()));
        if queue.len() == 1 {
            queue.clear();
        }
        self.routes.retain(|r| r.pattern != pattern);
        self.routes.push(Route {
            pattern: pattern.to_string(),
            responses: queue,
            last,
        });
    }

    /// Hold every request and time query until the clock has moved this far
    pub fn set_latency(&mut self, ms: u64) {
        self.latency_ms = ms;
    }

    /// Pending until `latency_ms` of simulated time has passed
    async fn stall(&self) {
        let until = self.clock.elapsed_ms() + self.latency_ms;
        while self.clock.elapsed_ms() < until {
            embassy_futures::yield_now().await;
        }
    }

    /// Behave like a transport that skips certificate checks
    pub fn skip_peer_verification(&mut self) {
        self.verifies_peers = false;
    }

    pub fn never_associate(&mut self) {
        self.associates = false;
    }

    pub fn fail_time(&mut self) {
        self.time_fails = true;
    }

    /// Report this time instead of the simulated clock
    pub fn set_network_time(&mut self, epoch: u64) {
        self.network_epoch = Some(epoch);
    }

    fn matching<'a>(&'a self, pattern: &'a str) -> impl Iterator<Item = &'a LoggedRequest> + 'a {
        self.log.iter().filter(move |r| r.url.contains(pattern))
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.matching(pattern).count()
    }

    pub fn total_requests(&self) -> usize {
        self.log.len()
    }

    pub fn first_index(&self, pattern: &str) -> Option<usize> {
        self.log.iter().position(|r| r.url.contains(pattern))
    }

    pub fn bearers(&self, pattern: &str) -> Vec<String> {
        self.matching(pattern)
            .map(|r| r.bearer.clone().unwrap_or_default())
            .collect()
    }

    pub fn forms(&self, pattern: &str) -> Vec<String> {
        self.matching(pattern)
            .map(|r| r.form.clone().unwrap_or_default())
            .collect()
    }

    pub fn limit_for(&self, pattern: &str) -> Option<usize> {
        self.matching(pattern).last().and_then(|r| r.limit)
    }

    pub fn request_gaps_ms(&self, pattern: &str) -> Vec<u64> {
        let times: Vec<u64> = self.matching(pattern).map(|r| r.at_ms).collect();
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }

    pub fn connects(&self) -> u32 {
        self.connects
    }

    pub fn time_queries(&self) -> u32 {
        self.time_queries
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl Network for FakeNetwork {
    async fn begin_connect(&mut self, _ssid: &str, _password: &str) -> Result<(), TransportError> {
        self.connects += 1;
        self.shut_down = false;
        self.connected = self.associates;
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        self.connected
    }

    fn verifies_peers(&self) -> bool {
        self.verifies_peers
    }

    async fn network_time(&mut self) -> Result<u64, TransportError> {
        self.time_queries += 1;
        self.stall().await;
        if self.time_fails {
            return Err(TransportError::Timeout);
        }
        Ok(self.network_epoch.unwrap_or_else(|| self.clock.now()))
    }

    async fn request(
        &mut self,
        request: &Request<'_>,
        body: &mut Vec<u8>,
    ) -> Result<u16, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.log.push(LoggedRequest {
            url: request.url.to_string(),
            bearer: request.bearer.map(String::from),
            form: request.form.map(String::from),
            limit: request.limit,
            at_ms: self.clock.elapsed_ms(),
        });
        self.stall().await;
        let Some(route) = self
            .routes
            .iter_mut()
            .find(|r| request.url.contains(r.pattern.as_str()))
        else {
            body.clear();
            return Ok(404);
        };
        let (status, text) = route.responses.pop_front().unwrap_or_else(|| route.last.clone());
        body.clear();
        body.extend_from_slice(text.as_bytes());
        match request.limit {
            Some(limit) => body.truncate(limit),
            None if body.len() > MAX_BODY_BYTES => return Err(TransportError::TooLarge),
            None => {}
        }
        Ok(status)
    }

    async fn shutdown(&mut self) {
        self.connected = false;
        self.shut_down = true;
    }
}

/// Records what was drawn; each render keeps the panel busy for `busy_ms`
pub struct FakeDisplay {
    clock: ManualClock,
    busy_ms: u64,
    busy_until_ms: u64,
    pub screens: Vec<&'static str>,
    /// `(stale, reduced_power, battery)` of each report screen
    pub reports: Vec<(bool, bool, Option<u8>)>,
    pub finished: u32,
}

impl FakeDisplay {
    pub fn new(clock: ManualClock, busy_ms: u64) -> Self {
        Self {
            clock,
            busy_ms,
            busy_until_ms: 0,
            screens: Vec::new(),
            reports: Vec::new(),
            finished: 0,
        }
    }
}

impl Display for FakeDisplay {
    type Error = Infallible;

    fn render(&mut self, screen: &Screen<'_>) -> Result<(), Infallible> {
        self.screens.push(screen.name());
        if let Screen::Report(view) = screen {
            self.reports
                .push((view.stale, view.reduced_power, view.battery.percent));
        }
        self.busy_until_ms = self.clock.elapsed_ms().saturating_add(self.busy_ms);
        Ok(())
    }

    fn is_busy(&mut self) -> bool {
        self.clock.elapsed_ms() < self.busy_until_ms
    }

    fn finish(&mut self) -> Result<(), Infallible> {
        self.finished += 1;
        Ok(())
    }
}

/// Presence that follows a timeline of `(from_ms, sense, link)` entries
pub struct FakeSignals {
    clock: ManualClock,
    timeline: Vec<(u64, bool, bool)>,
}

impl FakeSignals {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            timeline: Vec::new(),
        }
    }

    /// From `from_ms` on, report these signal levels
    pub fn at(mut self, from_ms: u64, sense: bool, link: bool) -> Self {
        self.timeline.push((from_ms, sense, link));
        self.timeline.sort_by_key(|e| e.0);
        self
    }

    fn current(&self) -> (bool, bool) {
        let now = self.clock.elapsed_ms();
        self.timeline
            .iter()
            .rev()
            .find(|e| e.0 <= now)
            .map(|e| (e.1, e.2))
            .unwrap_or((false, false))
    }
}

impl PresenceSignals for FakeSignals {
    fn power_sense(&mut self) -> bool {
        self.current().0
    }

    fn host_link_alive(&mut self) -> bool {
        self.current().1
    }
}

pub struct FakeBattery(pub Option<u8>);

impl BatteryGauge for FakeBattery {
    fn percent(&mut self) -> Option<u8> {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct FakePower {
    pub armed: Vec<WakePlan>,
    pub power_offs: u32,
    pub restarts: u32,
}

impl PowerControl for FakePower {
    fn arm_wake_sources(&mut self, plan: &WakePlan) {
        self.armed.push(*plan);
    }

    fn power_off(&mut self) {
        self.power_offs += 1;
    }

    fn restart(&mut self) {
        self.restarts += 1;
    }
}

#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    pub values: BTreeMap<String, String>,
    pub erases: u32,
}

impl ConfigStore for MemoryConfigStore {
    type Error = Infallible;

    fn get(&mut self, key: &str) -> Result<Option<String>, Infallible> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), Infallible> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn erase_all(&mut self) -> Result<(), Infallible> {
        self.values.clear();
        self.erases += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("fake port failed")]
pub struct PortError;

impl embedded_io::Error for PortError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Serial port fake; input can be queued now or at a simulated time
#[derive(Debug, Default)]
pub struct FakePort {
    clock: Option<ManualClock>,
    rx: VecDeque<u8>,
    scheduled: Vec<(u64, String)>,
    tx: Vec<u8>,
}

impl FakePort {
    pub fn with_clock(clock: ManualClock) -> Self {
        Self {
            clock: Some(clock),
            ..Self::default()
        }
    }

    /// Make `text` readable immediately
    pub fn feed(&mut self, text: &str) {
        self.rx.extend(text.bytes());
    }

    /// Make `line` readable once the clock reaches `at_ms`
    pub fn feed_at(&mut self, at_ms: u64, line: &str) {
        let mut line = line.to_string();
        line.push('\n');
        self.scheduled.push((at_ms, line));
        self.scheduled.sort_by_key(|e| e.0);
    }

    /// Everything written so far, one entry per line
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.tx)
            .lines()
            .map(String::from)
            .collect()
    }

    fn release_due(&mut self) {
        let Some(clock) = &self.clock else {
            return;
        };
        let now = clock.elapsed_ms();
        while self.scheduled.first().is_some_and(|e| e.0 <= now) {
            let (_, line) = self.scheduled.remove(0);
            self.rx.extend(line.bytes());
        }
    }
}

impl IoErrorType for FakePort {
    type Error = PortError;
}

impl ReadReady for FakePort {
    fn read_ready(&mut self) -> Result<bool, PortError> {
        self.release_due();
        Ok(!self.rx.is_empty())
    }
}

impl Read for FakePort {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PortError> {
        self.release_due();
        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for FakePort {
    fn write(&mut self, buf: &[u8]) -> Result<usize, PortError> {
        self.tx.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), PortError> {
        Ok(())
    }
}

/// Active-low button that is held until the clock reaches a deadline
pub struct ScriptedPin {
    clock: Option<ManualClock>,
    from_ms: u64,
    until_ms: u64,
}

impl ScriptedPin {
    pub fn released() -> Self {
        Self {
            clock: None,
            from_ms: 0,
            until_ms: 0,
        }
    }

    pub fn held_for(clock: &ManualClock, ms: u64) -> Self {
        Self::held_between(clock, 0, ms)
    }

    pub fn held_between(clock: &ManualClock, from_ms: u64, until_ms: u64) -> Self {
        Self {
            clock: Some(clock.clone()),
            from_ms,
            until_ms,
        }
    }

    fn held(&self) -> bool {
        self.clock.as_ref().is_some_and(|c| {
            let now = c.elapsed_ms();
            now >= self.from_ms && now < self.until_ms
        })
    }
}

impl PinErrorType for ScriptedPin {
    type Error = Infallible;
}

impl InputPin for ScriptedPin {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(!self.held())
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(self.held())
    }
}

/// Active-low LED
#[derive(Debug, Default)]
pub struct TestLed {
    pub lit: bool,
    pub toggles: u32,
}

impl PinErrorType for TestLed {
    type Error = Infallible;
}

impl OutputPin for TestLed {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.lit = true;
        self.toggles += 1;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.lit = false;
        self.toggles += 1;
        Ok(())
    }
}
