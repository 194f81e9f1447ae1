//! Data sync orchestrator
//!
//! Runs the phases of one sync strictly in order: network, clock, credential,
//! sources, commit. Each phase that changes retained state commits a whole
//! replacement before the next phase starts. Sources fail independently; the
//! sync succeeds if any of them produced data.

use alloc::string::String;
use alloc::vec::Vec;

use embedded_hal_async::delay::DelayNs;
use heapless::Vec as HVec;

use crate::activity::{self, ActivityAccumulator};
use crate::calendar::{self, WallClock, SECS_PER_HOUR};
use crate::config::{Configuration, Variant};
use crate::credential::{self, CredentialError};
use crate::environment::{self, EnvironmentReport};
use crate::net::{Network, Request, TransportError};
use crate::retained::{CachedResult, RetainedState, RetainedStore};
use crate::retry::{self, RetryPolicy, Watchdog};

/// Clock sync is skipped if the last one is younger than this
pub const CLOCK_FRESHNESS_SECS: u64 = 12 * SECS_PER_HOUR;

/// Service base URLs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    pub activity_api: &'static str,
    pub token_url: &'static str,
    pub weather_api: &'static str,
    pub tide_api: &'static str,
    pub buoy_api: &'static str,
}

impl Endpoints {
    pub const DEFAULT: Self = Self {
        activity_api: "https://www.strava.com/api/v3",
        token_url: "https://www.strava.com/oauth/token",
        weather_api: "https://api.open-meteo.com/v1/forecast",
        tide_api: "https://api.tidesandcurrents.noaa.gov/api/prod/datagetter",
        buoy_api: "https://www.ndbc.noaa.gov/data/realtime2",
    };
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceId {
    Activities,
    Weather,
    Tide,
    Surf,
}

impl SourceId {
    pub fn name(&self) -> &'static str {
        match self {
            SourceId::Activities => "ACTIVITIES",
            SourceId::Weather => "WEATHER",
            SourceId::Tide => "TIDE",
            SourceId::Surf => "SURF",
        }
    }
}

/// Why a single source produced nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("credential rejected")]
    Unauthorized,
    #[error("http status {0}")]
    Status(u16),
    #[error("malformed payload")]
    Malformed,
    #[error("service reported an error")]
    Rejected,
    #[error("no usable records")]
    NoData,
    #[error("clock not synchronized")]
    ClockUnset,
}

impl SourceError {
    pub fn code(&self) -> &'static str {
        match self {
            SourceError::Transport(e) => e.code(),
            SourceError::Unauthorized => "UNAUTHORIZED",
            SourceError::Status(_) => "HTTP_STATUS",
            SourceError::Malformed => "MALFORMED",
            SourceError::Rejected => "REJECTED",
            SourceError::NoData => "NO_DATA",
            SourceError::ClockUnset => "CLOCK_UNSET",
        }
    }
}

/// Map an HTTP status to a source outcome
pub fn check_status(status: u16) -> Result<(), SourceError> {
    match status {
        200..=299 => Ok(()),
        401 | 403 => Err(SourceError::Unauthorized),
        _ => Err(SourceError::Status(status)),
    }
}

/// Per-source outcome of one sync
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceReport {
    entries: HVec<(SourceId, Result<(), SourceError>), 4>,
}

impl SourceReport {
    pub fn record(&mut self, id: SourceId, outcome: Result<(), SourceError>) {
        if let Some(entry) = self.entries.iter_mut().find(|(i, _)| *i == id) {
            entry.1 = outcome;
        } else {
            // four sources, four slots
            let _ = self.entries.push((id, outcome));
        }
    }

    pub fn get(&self, id: SourceId) -> Option<Result<(), SourceError>> {
        self.entries.iter().find(|(i, _)| *i == id).map(|(_, r)| *r)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(SourceId, Result<(), SourceError>)> {
        self.entries.iter()
    }

    pub fn attempted(&self) -> usize {
        self.entries.len()
    }

    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|(_, r)| r.is_ok()).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("device not configured")]
    NotConfigured,
    #[error("network unavailable")]
    NetworkUnavailable,
    #[error("credential refresh failed: {0}")]
    CredentialRefreshFailed(CredentialError),
    #[error("all {} sources failed", .0.attempted())]
    SourcesFailed(SourceReport),
}

impl SyncError {
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::NotConfigured => "NOT_CONFIGURED",
            SyncError::NetworkUnavailable => "NETWORK_UNAVAILABLE",
            SyncError::CredentialRefreshFailed(_) => "CREDENTIAL_REFRESH_FAILED",
            SyncError::SourcesFailed(_) => "SOURCES_FAILED",
        }
    }
}

/// A phase of the sync, as reported to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStep {
    Network,
    Clock,
    Credential,
    Source(SourceId),
}

impl SyncStep {
    pub fn name(&self) -> &'static str {
        match self {
            SyncStep::Network => "NETWORK",
            SyncStep::Clock => "CLOCK",
            SyncStep::Credential => "CREDENTIAL",
            SyncStep::Source(id) => id.name(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Ok,
    /// Not needed this time (fresh clock, trusted credential)
    Skipped,
    Failed(&'static str),
}

/// Receives progress as phases complete
pub trait SyncObserver {
    fn step(&mut self, step: SyncStep, outcome: StepOutcome);
}

impl SyncObserver for () {
    fn step(&mut self, _: SyncStep, _: StepOutcome) {}
}

/// Everything one sync borrows from the board
pub struct SyncContext<'a, N, D, W: ?Sized, C, R> {
    pub network: &'a mut N,
    pub delay: &'a mut D,
    pub watchdog: &'a mut W,
    pub clock: &'a mut C,
    pub retained: &'a mut R,
    pub config: &'a Configuration,
    pub variant: Variant,
    pub endpoints: &'a Endpoints,
}

impl<N, D, W, C, R> SyncContext<'_, N, D, W, C, R>
where
    N: Network,
    D: DelayNs,
    W: Watchdog + ?Sized,
    C: WallClock,
    R: RetainedStore,
{
    /// Run one complete sync and power the radio down afterwards.
    ///
    /// `state` is the caller's copy of retained state and is kept equal to
    /// what has been committed. `force_fetch` ignores the clock freshness
    /// window.
    pub async fn run<O: SyncObserver + ?Sized>(
        &mut self,
        state: &mut RetainedState,
        force_fetch: bool,
        observer: &mut O,
    ) -> Result<CachedResult, SyncError> {
        if !self.config.is_complete(self.variant) {
            return Err(SyncError::NotConfigured);
        }
        let result = self.run_phases(state, force_fetch, observer).await;
        self.network.shutdown().await;
        self.watchdog.feed();
        match &result {
            Ok(_) => log::info!("sync complete"),
            Err(e) => log::warn!("sync failed: {}", e),
        }
        result
    }

    async fn run_phases<O: SyncObserver + ?Sized>(
        &mut self,
        state: &mut RetainedState,
        force_fetch: bool,
        observer: &mut O,
    ) -> Result<CachedResult, SyncError> {
        let connected = self.connect().await;
        let outcome = if connected.is_ok() { Ok(()) } else { Err("ASSOCIATION") };
        self.report(observer, SyncStep::Network, outcome);
        connected?;

        self.sync_clock(state, force_fetch, observer).await;

        let token = match self.variant {
            Variant::Activity => Some(self.credential(state, observer).await?),
            Variant::Environment => None,
        };

        let mut report = SourceReport::default();
        let result = match token {
            Some(token) => self.fetch_activity(&token, &mut report, observer).await,
            None => self.fetch_environment(&mut report, observer).await,
        };

        if report.succeeded() == 0 {
            return Err(SyncError::SourcesFailed(report));
        }
        log::info!("{}/{} sources ok", report.succeeded(), report.attempted());
        let mut next = state.clone();
        next.last_sync_epoch = self.clock.now();
        next.cached_result = result.clone();
        self.commit(state, next);
        Ok(result)
    }

    fn commit(&mut self, state: &mut RetainedState, next: RetainedState) {
        self.retained.commit(&next);
        *state = next;
    }

    fn report<O: SyncObserver + ?Sized>(
        &mut self,
        observer: &mut O,
        step: SyncStep,
        outcome: Result<(), &'static str>,
    ) {
        self.watchdog.feed();
        let outcome = match outcome {
            Ok(()) => StepOutcome::Ok,
            Err(code) => StepOutcome::Failed(code),
        };
        log::info!("sync {}: {:?}", step.name(), outcome);
        observer.step(step, outcome);
    }

    async fn connect(&mut self) -> Result<(), SyncError> {
        self.watchdog.feed();
        log::info!("connecting to {:?}", self.config.wifi_ssid);
        if let Err(e) = self
            .network
            .begin_connect(&self.config.wifi_ssid, &self.config.wifi_pass)
            .await
        {
            log::warn!("wifi start failed: {}", e);
            return Err(SyncError::NetworkUnavailable);
        }
        let network = &mut *self.network;
        match retry::poll_until(RetryPolicy::ASSOCIATION, self.delay, self.watchdog, || {
            network.is_connected()
        })
        .await
        {
            Ok(attempts) => {
                log::info!("network up after {} polls", attempts);
                Ok(())
            }
            Err(e) => {
                log::warn!("wifi association {}", e);
                Err(SyncError::NetworkUnavailable)
            }
        }
    }

    async fn sync_clock<O: SyncObserver + ?Sized>(
        &mut self,
        state: &mut RetainedState,
        force_fetch: bool,
        observer: &mut O,
    ) {
        self.watchdog.feed();
        let now = self.clock.now();
        let fresh = calendar::is_plausible(now)
            && state.last_clock_sync_epoch != 0
            && now >= state.last_clock_sync_epoch
            && now - state.last_clock_sync_epoch < CLOCK_FRESHNESS_SECS;
        if fresh && !force_fetch {
            log::debug!("clock synced {} s ago, skipping", now - state.last_clock_sync_epoch);
            self.watchdog.feed();
            observer.step(SyncStep::Clock, StepOutcome::Skipped);
            return;
        }

        // a failed clock sync is not fatal; the RTC keeps its old value
        let queried =
            retry::feeding(self.delay, self.watchdog, self.network.network_time()).await;
        let outcome = match queried {
            Ok(epoch) if calendar::is_plausible(epoch) => {
                log::info!("clock set to {} (was {})", epoch, now);
                self.clock.set(epoch);
                let mut next = state.clone();
                next.last_clock_sync_epoch = epoch;
                self.commit(state, next);
                Ok(())
            }
            Ok(epoch) => {
                log::warn!("ignoring implausible network time {}", epoch);
                Err("IMPLAUSIBLE")
            }
            Err(e) => Err(e.code()),
        };
        self.report(observer, SyncStep::Clock, outcome);
    }

    async fn credential<O: SyncObserver + ?Sized>(
        &mut self,
        state: &mut RetainedState,
        observer: &mut O,
    ) -> Result<String, SyncError> {
        self.watchdog.feed();
        if !self.network.verifies_peers() && !self.config.allow_unverified_tls {
            log::error!("not sending credentials over unverified tls (allow_unverified_tls is off)");
            let refused = CredentialError::Transport(TransportError::Unverified);
            self.report(observer, SyncStep::Credential, Err(refused.code()));
            return Err(SyncError::CredentialRefreshFailed(refused));
        }
        let now = self.clock.now();
        if state.cached_credential.is_trusted(now) {
            log::debug!(
                "reusing credential, {} s left",
                state.cached_credential.expires_at - now
            );
            self.watchdog.feed();
            observer.step(SyncStep::Credential, StepOutcome::Skipped);
            return Ok(String::from(state.cached_credential.token.as_str()));
        }

        let exchange = credential::exchange(self.network, self.endpoints.token_url, self.config, now);
        let exchanged = retry::feeding(self.delay, self.watchdog, exchange).await;
        self.report(
            observer,
            SyncStep::Credential,
            exchanged.as_ref().map(|_| ()).map_err(CredentialError::code),
        );
        let credential = exchanged.map_err(SyncError::CredentialRefreshFailed)?;
        let token = String::from(credential.token.as_str());
        let mut next = state.clone();
        next.cached_credential = credential;
        self.commit(state, next);
        Ok(token)
    }

    async fn fetch_activity<O: SyncObserver + ?Sized>(
        &mut self,
        token: &str,
        report: &mut SourceReport,
        observer: &mut O,
    ) -> CachedResult {
        self.watchdog.feed();
        let now = self.clock.now();
        let outcome = if calendar::is_plausible(now) {
            let start = self.config.window.start(now, &self.config.time_zone());
            let mut acc = ActivityAccumulator::new(&self.config.sport, self.config.window, start);
            activity::fetch_activities(
                self.network,
                self.delay,
                self.watchdog,
                self.endpoints.activity_api,
                token,
                &mut acc,
            )
            .await
            .map(|stats| {
                log::info!(
                    "activities: {} requests, {} records, {} rejected",
                    stats.requests,
                    stats.records,
                    acc.rejected
                );
                acc.finish()
            })
        } else {
            Err(SourceError::ClockUnset)
        };
        self.finish_source(report, observer, SourceId::Activities, outcome)
            .map(CachedResult::Activity)
            .unwrap_or(CachedResult::Empty)
    }

    async fn fetch_environment<O: SyncObserver + ?Sized>(
        &mut self,
        report: &mut SourceReport,
        observer: &mut O,
    ) -> CachedResult {
        let mut env = EnvironmentReport::default();
        let now = self.clock.now();
        let zone = self.config.time_zone();

        if let Some((lat, lon)) = self.config.location() {
            let url = environment::weather_url(self.endpoints.weather_api, lat, lon);
            let outcome = match self.fetch(&url, None).await {
                Ok(body) => environment::parse_weather(&body),
                Err(e) => Err(e),
            };
            env.weather = self.finish_source(report, observer, SourceId::Weather, outcome);
        }

        if !self.config.tide_station.is_empty() {
            let outcome = if calendar::is_plausible(now) {
                let url = environment::tide_url(
                    self.endpoints.tide_api,
                    &self.config.tide_station,
                    now,
                    &zone,
                );
                match self.fetch(&url, None).await {
                    Ok(body) => environment::parse_tides(&body, calendar::to_local(now, &zone)),
                    Err(e) => Err(e),
                }
            } else {
                Err(SourceError::ClockUnset)
            };
            env.tide = self.finish_source(report, observer, SourceId::Tide, outcome);
        }

        if !self.config.buoy_station.is_empty() {
            let url = environment::buoy_url(self.endpoints.buoy_api, &self.config.buoy_station);
            let outcome = match self.fetch(&url, Some(environment::BUOY_READ_LIMIT)).await {
                Ok(body) => environment::parse_buoy(&body),
                Err(e) => Err(e),
            };
            env.surf = self.finish_source(report, observer, SourceId::Surf, outcome);
        }

        CachedResult::Environment(env)
    }

    async fn fetch(&mut self, url: &str, limit: Option<usize>) -> Result<Vec<u8>, SourceError> {
        self.watchdog.feed();
        let mut request = Request::get(url);
        if let Some(limit) = limit {
            request = request.with_limit(limit);
        }
        let mut body = Vec::new();
        let status =
            retry::feeding(self.delay, self.watchdog, self.network.request(&request, &mut body))
                .await?;
        check_status(status)?;
        Ok(body)
    }

    fn finish_source<T, O: SyncObserver + ?Sized>(
        &mut self,
        report: &mut SourceReport,
        observer: &mut O,
        id: SourceId,
        outcome: Result<T, SourceError>,
    ) -> Option<T> {
        let status = outcome.as_ref().map(|_| ()).map_err(|e| *e);
        if let Err(e) = &status {
            log::warn!("source {} failed: {}", id.name(), e);
        }
        report.record(id, status);
        self.report(observer, SyncStep::Source(id), status.map_err(|e| e.code()));
        outcome.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retained::{CachedCredential, RetainedCell};
    use crate::retry::LIVENESS_SLICE_MS;
    use crate::testing::{FakeNetwork, ManualClock, StepDelay, TestClock, TestWatchdog};

    const NOW: u64 = 1_715_169_600;
    const TOKEN_URL: &str = "https://www.strava.com/oauth/token";

    #[derive(Default)]
    struct Lines(Vec<String>);

    impl SyncObserver for Lines {
        fn step(&mut self, step: SyncStep, outcome: StepOutcome) {
            self.0.push(alloc::format!("{}:{:?}", step.name(), outcome));
        }
    }

    fn activity_config() -> Configuration {
        let mut config = Configuration::default();
        config
            .merge_json(r#"{"wifi_ssid":"home","client_id":"1","client_secret":"s","refresh_token":"r"}"#)
            .unwrap();
        config
    }

    fn page(n: usize) -> String {
        let records: Vec<String> = (0..n)
            .map(|i| {
                alloc::format!(
                    r#"{{"name":"run {i}","sport_type":"Run","start_date":"2024-05-08T0{}:00:00Z","distance":1000.0,"moving_time":600,"total_elevation_gain":1.0}}"#,
                    i % 10
                )
            })
            .collect();
        alloc::format!("[{}]", records.join(","))
    }

    fn token_body() -> String {
        alloc::format!(r#"{{"access_token":"fresh","expires_at":{}}}"#, NOW + 21_600)
    }

    struct Rig {
        clock: ManualClock,
        net: FakeNetwork,
        watchdog: TestWatchdog,
        cell: RetainedCell,
        state: RetainedState,
        config: Configuration,
        variant: Variant,
    }

    impl Rig {
        fn new(config: Configuration, variant: Variant) -> Self {
            let clock = ManualClock::new(NOW);
            Self {
                net: FakeNetwork::new(clock.clone()),
                watchdog: TestWatchdog::new(clock.clone()),
                clock,
                cell: RetainedCell::new(),
                state: RetainedState::new(),
                config,
                variant,
            }
        }

        fn sync(&mut self, force: bool, lines: &mut Lines) -> Result<CachedResult, SyncError> {
            let mut delay = StepDelay::new(self.clock.clone());
            let mut wall = TestClock::new(self.clock.clone());
            let mut ctx = SyncContext {
                network: &mut self.net,
                delay: &mut delay,
                watchdog: &mut self.watchdog,
                clock: &mut wall,
                retained: &mut self.cell,
                config: &self.config,
                variant: self.variant,
                endpoints: &Endpoints::DEFAULT,
            };
            embassy_futures::block_on(ctx.run(&mut self.state, force, lines))
        }
    }

    #[test]
    fn test_pagination_stops_on_empty_page() {
        let mut rig = Rig::new(activity_config(), Variant::Activity);
        rig.net.respond(TOKEN_URL, 200, &token_body());
        rig.net.respond_seq(
            "/athlete/activities",
            &[(200, page(30)), (200, page(30)), (200, page(5)), (200, "[]".into())],
        );
        let result = rig.sync(false, &mut Lines::default()).unwrap();

        assert_eq!(rig.net.count("/athlete/activities"), 4);
        let CachedResult::Activity(summary) = result else {
            panic!("expected activity result");
        };
        assert_eq!(summary.totals.count, 65);
        assert_eq!(rig.state.last_sync_epoch, rig.clock.now());
        assert_eq!(rig.cell.load(), Some(rig.state.clone()));
    }

    #[test]
    fn test_pages_spaced_and_capped() {
        let mut rig = Rig::new(activity_config(), Variant::Activity);
        rig.net.respond(TOKEN_URL, 200, &token_body());
        rig.net.respond("/athlete/activities", 200, &page(30));
        rig.sync(false, &mut Lines::default()).unwrap();
        assert_eq!(rig.net.count("/athlete/activities"), MAX_PAGES_FOR_TEST);
        let gaps = rig.net.request_gaps_ms("/athlete/activities");
        assert!(gaps.iter().all(|g| *g >= 200), "{:?}", gaps);
    }

    const MAX_PAGES_FOR_TEST: usize = activity::MAX_PAGES as usize;

    #[test]
    fn test_slow_server_never_starves_the_watchdog() {
        let mut rig = Rig::new(activity_config(), Variant::Activity);
        rig.net.set_latency(15_000);
        rig.net.respond(TOKEN_URL, 200, &token_body());
        rig.net.respond_seq("/athlete/activities", &[(200, page(3)), (200, "[]".into())]);
        rig.sync(true, &mut Lines::default()).unwrap();

        // clock query, token exchange and two pages, each held for 15 s
        assert!(rig.clock.elapsed_ms() >= 60_000);
        assert!(
            rig.watchdog.max_gap_ms <= LIVENESS_SLICE_MS as u64,
            "watchdog starved for {} ms",
            rig.watchdog.max_gap_ms
        );
    }

    #[test]
    fn test_paging_stops_once_a_page_reaches_past_the_window() {
        let mut rig = Rig::new(activity_config(), Variant::Activity);
        rig.net.respond(TOKEN_URL, 200, &token_body());
        // newest first, as the API returns without an `after` filter
        let first = r#"[
            {"name":"today","sport_type":"Run","start_date":"2024-05-08T09:00:00Z","distance":5000.0,"moving_time":1500,"total_elevation_gain":10.0},
            {"name":"monday","sport_type":"Run","start_date":"2024-05-06T07:00:00Z","distance":3000.0,"moving_time":900,"total_elevation_gain":4.0},
            {"name":"last week","sport_type":"Run","start_date":"2024-05-04T07:00:00Z","distance":9000.0,"moving_time":2700,"total_elevation_gain":30.0}
        ]"#;
        rig.net.respond_seq("/athlete/activities", &[(200, first.into()), (200, page(30))]);
        let result = rig.sync(false, &mut Lines::default()).unwrap();

        assert_eq!(rig.net.count("/athlete/activities"), 1);
        assert_eq!(rig.net.count("after="), 0);
        let CachedResult::Activity(summary) = result else {
            panic!("expected activity result");
        };
        assert_eq!(summary.totals.count, 2);
        assert_eq!(summary.totals.distance_m, 8_000.0);
        assert_eq!(summary.latest.unwrap().title.as_str(), "today");
    }

    #[test]
    fn test_trusted_credential_reused() {
        let mut rig = Rig::new(activity_config(), Variant::Activity);
        rig.state.cached_credential = CachedCredential {
            token: "cached".try_into().unwrap(),
            expires_at: NOW + 301,
        };
        rig.net.respond("/athlete/activities", 200, "[]");
        let mut lines = Lines::default();
        rig.sync(false, &mut lines).unwrap();
        assert_eq!(rig.net.count(TOKEN_URL), 0);
        assert_eq!(rig.net.bearers("/athlete/activities"), ["cached"]);
        assert!(lines.0.contains(&"CREDENTIAL:Skipped".into()));
    }

    #[test]
    fn test_expiring_credential_exchanged_once_before_fetch() {
        let mut rig = Rig::new(activity_config(), Variant::Activity);
        rig.state.cached_credential = CachedCredential {
            token: "cached".try_into().unwrap(),
            expires_at: NOW + 300,
        };
        rig.net.respond(TOKEN_URL, 200, &token_body());
        rig.net.respond("/athlete/activities", 200, "[]");
        rig.sync(false, &mut Lines::default()).unwrap();
        assert_eq!(rig.net.count(TOKEN_URL), 1);
        assert_eq!(rig.net.first_index(TOKEN_URL), Some(0));
        assert_eq!(rig.net.bearers("/athlete/activities"), ["fresh"]);
        assert_eq!(rig.state.cached_credential.token.as_str(), "fresh");
    }

    #[test]
    fn test_credential_failure_stops_sync() {
        let mut rig = Rig::new(activity_config(), Variant::Activity);
        rig.net.respond(TOKEN_URL, 400, r#"{"message":"Bad Request"}"#);
        let err = rig.sync(false, &mut Lines::default()).unwrap_err();
        assert_eq!(
            err,
            SyncError::CredentialRefreshFailed(CredentialError::Rejected(400))
        );
        assert_eq!(rig.net.count("/athlete/activities"), 0);
        assert_eq!(rig.state.last_sync_epoch, 0);
    }

    #[test]
    fn test_network_unavailable() {
        let mut rig = Rig::new(activity_config(), Variant::Activity);
        rig.net.never_associate();
        let err = rig.sync(false, &mut Lines::default()).unwrap_err();
        assert_eq!(err, SyncError::NetworkUnavailable);
        assert_eq!(rig.net.total_requests(), 0);
        assert!(rig.net.is_shut_down());
        // 40 polls, 500 ms apart
        assert_eq!(rig.clock.elapsed_ms(), 39 * 500);
    }

    #[test]
    fn test_page_error_fails_source_and_keeps_cache() {
        let mut rig = Rig::new(activity_config(), Variant::Activity);
        rig.state.cached_result = CachedResult::Activity(Default::default());
        rig.state.last_sync_epoch = NOW - 86_400;
        rig.net.respond(TOKEN_URL, 200, &token_body());
        rig.net.respond_seq("/athlete/activities", &[(200, page(30)), (500, String::new())]);
        let err = rig.sync(false, &mut Lines::default()).unwrap_err();
        let SyncError::SourcesFailed(report) = err else {
            panic!("expected source failure");
        };
        assert_eq!(report.get(SourceId::Activities), Some(Err(SourceError::Status(500))));
        assert_eq!(rig.state.last_sync_epoch, NOW - 86_400);
        assert!(matches!(rig.state.cached_result, CachedResult::Activity(_)));
    }

    #[test]
    fn test_clock_sync_skipped_when_fresh() {
        let mut rig = Rig::new(activity_config(), Variant::Activity);
        rig.state.last_clock_sync_epoch = NOW - 3_600;
        rig.net.respond(TOKEN_URL, 200, &token_body());
        rig.net.respond("/athlete/activities", 200, "[]");
        let mut lines = Lines::default();
        rig.sync(false, &mut lines).unwrap();
        assert_eq!(rig.net.time_queries(), 0);
        assert_eq!(lines.0[1], "CLOCK:Skipped");

        // forcing ignores the freshness window
        let mut lines = Lines::default();
        rig.sync(true, &mut lines).unwrap();
        assert_eq!(rig.net.time_queries(), 1);
        assert_eq!(lines.0[1], "CLOCK:Ok");
    }

    #[test]
    fn test_clock_failure_is_not_fatal() {
        let mut rig = Rig::new(activity_config(), Variant::Activity);
        rig.net.fail_time();
        rig.net.respond(TOKEN_URL, 200, &token_body());
        rig.net.respond("/athlete/activities", 200, "[]");
        let mut lines = Lines::default();
        assert!(rig.sync(false, &mut lines).is_ok());
        assert_eq!(lines.0[1], "CLOCK:Failed(\"TIMEOUT\")");
        assert_eq!(rig.state.last_clock_sync_epoch, 0);
    }

    #[test]
    fn test_unconfigured_does_nothing() {
        let mut rig = Rig::new(Configuration::default(), Variant::Activity);
        assert_eq!(rig.sync(false, &mut Lines::default()), Err(SyncError::NotConfigured));
        assert_eq!(rig.net.connects(), 0);
    }

    fn environment_config() -> Configuration {
        let mut config = Configuration::default();
        config
            .merge_json(r#"{"wifi_ssid":"home","latitude":36.97,"longitude":-122.01,"tide_station":"9413450","buoy_station":"46236"}"#)
            .unwrap();
        config
    }

    #[test]
    fn test_environment_partial_failure() {
        let mut rig = Rig::new(environment_config(), Variant::Environment);
        rig.net.respond(
            "api.open-meteo.com",
            200,
            r#"{"current":{"temperature_2m":15.0,"weather_code":3,"wind_speed_10m":4.0}}"#,
        );
        rig.net.respond("tidesandcurrents", 503, "");
        rig.net.respond(
            "46236.txt",
            200,
            "#YY  MM DD hh mm WVHT DPD MWD WTMP\n2024 05 08 11 40 1.2 14 270 13.5\n",
        );
        let mut lines = Lines::default();
        let CachedResult::Environment(env) = rig.sync(false, &mut lines).unwrap() else {
            panic!("expected environment result");
        };
        assert!(env.weather.is_some());
        assert!(env.tide.is_none());
        assert_eq!(env.surf.map(|s| s.wave_height_m), Some(1.2));
        assert!(lines.0.contains(&"TIDE:Failed(\"HTTP_STATUS\")".into()));
        assert_eq!(rig.net.limit_for("46236.txt"), Some(environment::BUOY_READ_LIMIT));
        assert_eq!(rig.net.count(TOKEN_URL), 0);
    }

    #[test]
    fn test_environment_all_failed() {
        let mut rig = Rig::new(environment_config(), Variant::Environment);
        rig.net.respond("api.open-meteo.com", 500, "");
        rig.net.respond("tidesandcurrents", 500, "");
        rig.net.respond("46236.txt", 404, "");
        let err = rig.sync(false, &mut Lines::default()).unwrap_err();
        let SyncError::SourcesFailed(report) = err else {
            panic!("expected source failure");
        };
        assert_eq!(report.attempted(), 3);
        assert_eq!(report.succeeded(), 0);
        assert_eq!(rig.state.last_sync_epoch, 0);
        assert!(rig.state.cached_result.is_empty());
    }

    #[test]
    fn test_credentials_withheld_without_peer_verification() {
        let mut rig = Rig::new(activity_config(), Variant::Activity);
        rig.net.skip_peer_verification();
        rig.state.cached_credential = CachedCredential {
            token: "cached".try_into().unwrap(),
            expires_at: NOW + 3_600,
        };
        rig.net.respond(TOKEN_URL, 200, &token_body());
        rig.net.respond("/athlete/activities", 200, "[]");
        let mut lines = Lines::default();
        let err = rig.sync(false, &mut lines).unwrap_err();

        assert_eq!(
            err,
            SyncError::CredentialRefreshFailed(CredentialError::Transport(TransportError::Unverified))
        );
        assert!(lines.0.contains(&"CREDENTIAL:Failed(\"UNVERIFIED_TLS\")".into()));
        assert_eq!(rig.net.count(TOKEN_URL), 0);
        assert_eq!(rig.net.count("/athlete/activities"), 0);
    }

    #[test]
    fn test_unverified_tls_opt_in_sends_credentials() {
        let mut config = activity_config();
        config.merge_json(r#"{"allow_unverified_tls":true}"#).unwrap();
        let mut rig = Rig::new(config, Variant::Activity);
        rig.net.skip_peer_verification();
        rig.net.respond(TOKEN_URL, 200, &token_body());
        rig.net.respond("/athlete/activities", 200, "[]");
        rig.sync(false, &mut Lines::default()).unwrap();
        assert_eq!(rig.net.count(TOKEN_URL), 1);
        assert_eq!(rig.net.bearers("/athlete/activities"), vec![String::from("fresh")]);
    }

    #[test]
    fn test_public_sources_fetch_without_peer_verification() {
        let mut rig = Rig::new(environment_config(), Variant::Environment);
        rig.net.skip_peer_verification();
        rig.net.respond(
            "api.open-meteo.com",
            200,
            r#"{"current":{"temperature_2m":15.0,"weather_code":3,"wind_speed_10m":4.0}}"#,
        );
        rig.net.respond("tidesandcurrents", 503, "");
        rig.net.respond("46236.txt", 404, "");
        let CachedResult::Environment(env) = rig.sync(false, &mut Lines::default()).unwrap() else {
            panic!("expected environment result");
        };
        assert!(env.weather.is_some());
    }

    #[test]
    fn test_check_status() {
        assert_eq!(check_status(200), Ok(()));
        assert_eq!(check_status(401), Err(SourceError::Unauthorized));
        assert_eq!(check_status(429), Err(SourceError::Status(429)));
    }
}
