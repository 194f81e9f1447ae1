//! Tracked-activity source
//!
//! Pages through the athlete activity list of the credentialed REST service,
//! drops records that fail range validation and folds the rest into an
//! [`ActivitySummary`] for the configured sport and tracking window.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use embedded_hal_async::delay::DelayNs;
use heapless::{String as HString, Vec as HVec};
use serde::Deserialize;

use crate::calendar::{self, TrackingWindow};
use crate::net::{Network, Request};
use crate::retry::{self, Watchdog};
use crate::sync::{check_status, SourceError};

pub const PAGE_SIZE: u32 = 30;
pub const MAX_PAGES: u32 = 10;
/// Minimum gap between two page requests
pub const PAGE_DELAY_MS: u32 = 200;

pub const MAX_DISTANCE_M: f64 = 1_000_000.0;
pub const MAX_MOVING_TIME_S: i64 = 7 * 86_400;
pub const MAX_ELEVATION_M: f64 = 20_000.0;

pub const TITLE_CAPACITY: usize = 64;
pub const PATH_CAPACITY: usize = 64;

/// One entry of an activity list page, as sent by the service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sport_type: Option<String>,
    /// Older field carrying the same information as `sport_type`
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub moving_time: Option<i64>,
    #[serde(default)]
    pub total_elevation_gain: Option<f64>,
    #[serde(default)]
    pub map: Option<RouteMap>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteMap {
    #[serde(default)]
    pub summary_polyline: Option<String>,
}

/// Why a record was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing or unparsable start date")]
    StartDate,
    #[error("distance out of range")]
    Distance,
    #[error("moving time out of range")]
    MovingTime,
    #[error("elevation gain out of range")]
    Elevation,
}

/// A record that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    pub title: String,
    pub sport: String,
    pub start_epoch: u64,
    pub distance_m: f64,
    pub moving_time_s: u32,
    pub elevation_m: f64,
    pub polyline: Option<String>,
}

impl ActivityRecord {
    pub fn sport(&self) -> &str {
        self.sport_type
            .as_deref()
            .or(self.kind.as_deref())
            .unwrap_or("")
    }

    pub fn validate(self) -> Result<Activity, ValidationError> {
        let start_epoch = self
            .start_date
            .as_deref()
            .and_then(calendar::parse_utc)
            .ok_or(ValidationError::StartDate)?;

        let distance_m = self.distance.unwrap_or(0.0);
        if !distance_m.is_finite() || !(0.0..=MAX_DISTANCE_M).contains(&distance_m) {
            return Err(ValidationError::Distance);
        }
        let moving_time = self.moving_time.unwrap_or(0);
        if !(0..=MAX_MOVING_TIME_S).contains(&moving_time) {
            return Err(ValidationError::MovingTime);
        }
        let elevation_m = self.total_elevation_gain.unwrap_or(0.0);
        if !elevation_m.is_finite() || !(0.0..=MAX_ELEVATION_M).contains(&elevation_m) {
            return Err(ValidationError::Elevation);
        }

        let sport = String::from(self.sport());
        Ok(Activity {
            title: self.name.unwrap_or_default(),
            sport,
            start_epoch,
            distance_m,
            moving_time_s: moving_time as u32,
            elevation_m,
            polyline: self
                .map
                .and_then(|m| m.summary_polyline)
                .filter(|p| !p.is_empty()),
        })
    }
}

/// A route point in 1e-5 degree units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PathPoint {
    pub lat_e5: i32,
    pub lon_e5: i32,
}

/// Sums over the tracking window
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ActivityTotals {
    pub count: u16,
    pub distance_m: f32,
    pub moving_time_s: u32,
    pub elevation_m: f32,
}

/// Detail of the most recent matching activity
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LatestActivity {
    pub title: HString<TITLE_CAPACITY>,
    pub start_epoch: u64,
    pub distance_m: f32,
    pub moving_time_s: u32,
    pub path: HVec<PathPoint, PATH_CAPACITY>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActivitySummary {
    pub window: TrackingWindow,
    pub window_start: u64,
    pub totals: ActivityTotals,
    pub latest: Option<LatestActivity>,
}

/// Folds pages of records into a summary
#[derive(Debug)]
pub struct ActivityAccumulator<'a> {
    sport: &'a str,
    window: TrackingWindow,
    window_start: u64,
    count: u16,
    distance_m: f64,
    moving_time_s: u64,
    elevation_m: f64,
    latest: Option<LatestActivity>,
    reached_window_start: bool,
    /// Records offered, before validation and filtering
    pub seen: usize,
    /// Records dropped by validation
    pub rejected: usize,
}

impl<'a> ActivityAccumulator<'a> {
    /// `sport` is matched case-insensitively; empty matches everything.
    pub fn new(sport: &'a str, window: TrackingWindow, window_start: u64) -> Self {
        Self {
            sport: sport.trim(),
            window,
            window_start,
            count: 0,
            distance_m: 0.0,
            moving_time_s: 0,
            elevation_m: 0.0,
            latest: None,
            reached_window_start: false,
            seen: 0,
            rejected: 0,
        }
    }

    pub fn offer(&mut self, record: ActivityRecord) {
        self.seen += 1;
        let activity = match record.validate() {
            Ok(a) => a,
            Err(e) => {
                log::debug!("dropping activity record: {}", e);
                self.rejected += 1;
                return;
            }
        };
        if activity.start_epoch < self.window_start {
            self.reached_window_start = true;
            return;
        }
        if !self.sport.is_empty() && !activity.sport.eq_ignore_ascii_case(self.sport) {
            return;
        }

        self.count = self.count.saturating_add(1);
        self.distance_m += activity.distance_m;
        self.moving_time_s += activity.moving_time_s as u64;
        self.elevation_m += activity.elevation_m;

        // pages arrive newest first, so the first match is the latest one
        if self.latest.is_none() {
            self.latest = Some(LatestActivity {
                title: truncate(&activity.title),
                start_epoch: activity.start_epoch,
                distance_m: activity.distance_m as f32,
                moving_time_s: activity.moving_time_s,
                path: activity
                    .polyline
                    .as_deref()
                    .map(|p| downsample(&decode_polyline(p)))
                    .unwrap_or_default(),
            });
        }
    }

    /// True once a record older than the window has been offered. Later
    /// pages can only be older still.
    pub fn reached_window_start(&self) -> bool {
        self.reached_window_start
    }

    pub fn finish(self) -> ActivitySummary {
        ActivitySummary {
            window: self.window,
            window_start: self.window_start,
            totals: ActivityTotals {
                count: self.count,
                distance_m: self.distance_m as f32,
                moving_time_s: self.moving_time_s.min(u32::MAX as u64) as u32,
                elevation_m: self.elevation_m as f32,
            },
            latest: self.latest,
        }
    }
}

fn truncate<const N: usize>(s: &str) -> HString<N> {
    let mut out = HString::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

/// Decode an encoded polyline (5 decimal places). Stops at the first
/// malformed chunk and returns the points decoded so far.
pub fn decode_polyline(encoded: &str) -> Vec<PathPoint> {
    fn next_value(bytes: &mut core::slice::Iter<'_, u8>) -> Option<i32> {
        let mut result: i64 = 0;
        let mut shift = 0;
        loop {
            let b = (*bytes.next()? as i64) - 63;
            if !(0..64).contains(&b) || shift > 30 {
                return None;
            }
            result |= (b & 0x1f) << shift;
            shift += 5;
            if b < 0x20 {
                break;
            }
        }
        let value = if result & 1 != 0 {
            !(result >> 1)
        } else {
            result >> 1
        };
        Some(value as i32)
    }

    let mut points = Vec::new();
    let mut bytes = encoded.as_bytes().iter();
    let (mut lat, mut lon) = (0i32, 0i32);
    while bytes.len() > 0 {
        let Some(dlat) = next_value(&mut bytes) else {
            break;
        };
        let Some(dlon) = next_value(&mut bytes) else {
            break;
        };
        lat = lat.wrapping_add(dlat);
        lon = lon.wrapping_add(dlon);
        points.push(PathPoint {
            lat_e5: lat,
            lon_e5: lon,
        });
    }
    points
}

/// Evenly pick at most [`PATH_CAPACITY`] points, keeping both endpoints
pub fn downsample(points: &[PathPoint]) -> HVec<PathPoint, PATH_CAPACITY> {
    let mut out = HVec::new();
    if points.len() <= PATH_CAPACITY {
        // cannot overflow: length checked above
        let _ = out.extend_from_slice(points);
        return out;
    }
    let last = points.len() - 1;
    for i in 0..PATH_CAPACITY {
        let idx = i * last / (PATH_CAPACITY - 1);
        let _ = out.push(points[idx]);
    }
    out
}

/// What a paginated fetch did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageStats {
    pub requests: u32,
    pub records: usize,
}

/// Fetch activity pages newest first until an empty page, a page that reaches
/// back past the window start, or [`MAX_PAGES`].
///
/// No `after` filter is sent: with one the API returns oldest first, and the
/// latest activity would land on the last page.
///
/// Any page failure fails the whole source: a partial window would render
/// totals that silently undercount.
pub async fn fetch_activities<N, D, W>(
    network: &mut N,
    delay: &mut D,
    watchdog: &mut W,
    api_base: &str,
    token: &str,
    acc: &mut ActivityAccumulator<'_>,
) -> Result<PageStats, SourceError>
where
    N: Network,
    D: DelayNs,
    W: Watchdog + ?Sized,
{
    let mut stats = PageStats::default();
    let mut body = Vec::new();
    for page in 1..=MAX_PAGES {
        if page > 1 {
            retry::pause(delay, watchdog, PAGE_DELAY_MS).await;
        }
        let url = format!(
            "{}/athlete/activities?page={}&per_page={}",
            api_base, page, PAGE_SIZE
        );
        let request = Request::get(&url).with_bearer(token);
        let status = retry::feeding(delay, watchdog, network.request(&request, &mut body)).await?;
        stats.requests += 1;
        check_status(status)?;

        let records: Vec<ActivityRecord> =
            serde_json::from_slice(&body).map_err(|_| SourceError::Malformed)?;
        log::debug!("activity page {}: {} records", page, records.len());
        if records.is_empty() {
            break;
        }
        stats.records += records.len();
        for record in records {
            acc.offer(record);
        }
        if acc.reached_window_start() {
            log::debug!("activity page {} reaches past the window", page);
            break;
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, sport: &str, start: &str, distance: f64) -> ActivityRecord {
        ActivityRecord {
            name: Some(name.into()),
            sport_type: Some(sport.into()),
            start_date: Some(start.into()),
            distance: Some(distance),
            moving_time: Some(1_800),
            total_elevation_gain: Some(12.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_validation_ranges() {
        assert!(record("a", "Run", "2024-05-07T06:00:00Z", 5_000.0).validate().is_ok());
        assert_eq!(
            record("a", "Run", "2024-05-07T06:00:00Z", -1.0).validate(),
            Err(ValidationError::Distance)
        );
        assert_eq!(
            record("a", "Run", "2024-05-07T06:00:00Z", 2_000_000.0).validate(),
            Err(ValidationError::Distance)
        );
        assert_eq!(
            record("a", "Run", "yesterday", 1.0).validate(),
            Err(ValidationError::StartDate)
        );

        let mut long = record("a", "Run", "2024-05-07T06:00:00Z", 1.0);
        long.moving_time = Some(8 * 86_400);
        assert_eq!(long.validate(), Err(ValidationError::MovingTime));

        let mut high = record("a", "Run", "2024-05-07T06:00:00Z", 1.0);
        high.total_elevation_gain = Some(25_000.0);
        assert_eq!(high.validate(), Err(ValidationError::Elevation));
    }

    #[test]
    fn test_record_parses_service_json() {
        let json = br#"[{"name":"Morning Run","type":"Run","sport_type":"TrailRun",
            "start_date":"2024-05-07T06:00:00Z","distance":5012.3,"moving_time":1800,
            "total_elevation_gain":40.5,"map":{"summary_polyline":"_p~iF~ps|U"},"kudos_count":3}]"#;
        let records: Vec<ActivityRecord> = serde_json::from_slice(json).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sport(), "TrailRun");
        let activity = records[0].clone().validate().unwrap();
        assert_eq!(activity.start_epoch, 1_715_061_600);
        assert_eq!(activity.polyline.as_deref(), Some("_p~iF~ps|U"));
    }

    #[test]
    fn test_accumulator_filters_sport_and_window() {
        let window_start = 1_714_953_600; // Monday 2024-05-06
        let mut acc = ActivityAccumulator::new("run", TrackingWindow::Week, window_start);
        acc.offer(record("newest", "Run", "2024-05-08T06:00:00Z", 5_000.0));
        acc.offer(record("ride", "Ride", "2024-05-07T06:00:00Z", 40_000.0));
        acc.offer(record("older", "RUN", "2024-05-06T06:00:00Z", 3_000.0));
        acc.offer(record("bad", "Run", "2024-05-06T07:00:00Z", -5.0));
        assert!(!acc.reached_window_start());
        acc.offer(record("last week", "Run", "2024-05-05T06:00:00Z", 9_000.0));
        assert!(acc.reached_window_start());

        assert_eq!(acc.seen, 5);
        assert_eq!(acc.rejected, 1);
        let summary = acc.finish();
        assert_eq!(summary.totals.count, 2);
        assert_eq!(summary.totals.distance_m, 8_000.0);
        assert_eq!(summary.totals.moving_time_s, 3_600);
        assert_eq!(summary.latest.unwrap().title.as_str(), "newest");
    }

    #[test]
    fn test_empty_sport_matches_everything() {
        let mut acc = ActivityAccumulator::new("", TrackingWindow::Year, 0);
        acc.offer(record("a", "Run", "2024-05-08T06:00:00Z", 1.0));
        acc.offer(record("b", "Swim", "2024-05-07T06:00:00Z", 1.0));
        assert_eq!(acc.finish().totals.count, 2);
    }

    #[test]
    fn test_latest_ties_first_seen_wins() {
        let mut acc = ActivityAccumulator::new("", TrackingWindow::Year, 0);
        acc.offer(record("first", "Run", "2024-05-08T06:00:00Z", 1.0));
        acc.offer(record("second", "Run", "2024-05-08T06:00:00Z", 1.0));
        assert_eq!(acc.finish().latest.unwrap().title.as_str(), "first");
    }

    #[test]
    fn test_title_truncated_on_char_boundary() {
        let long: String = core::iter::repeat('é').take(40).collect();
        let mut acc = ActivityAccumulator::new("", TrackingWindow::Year, 0);
        acc.offer(record(&long, "Run", "2024-05-08T06:00:00Z", 1.0));
        let title = acc.finish().latest.unwrap().title;
        assert_eq!(title.chars().count(), 32);
    }

    #[test]
    fn test_decode_polyline_reference() {
        let points = decode_polyline("_p~iF~ps|U_ulLnnqC_mqNvxq`@");
        assert_eq!(
            points,
            [
                PathPoint { lat_e5: 3_850_000, lon_e5: -12_020_000 },
                PathPoint { lat_e5: 4_070_000, lon_e5: -12_095_000 },
                PathPoint { lat_e5: 4_325_200, lon_e5: -12_645_300 },
            ]
        );
    }

    #[test]
    fn test_decode_polyline_stops_at_garbage() {
        // a truncated second pair leaves only the first point
        let points = decode_polyline("_p~iF~ps|U_ulL");
        assert_eq!(points.len(), 1);
        assert!(decode_polyline("").is_empty());
    }

    #[test]
    fn test_downsample_keeps_endpoints() {
        let points: Vec<PathPoint> = (0..1_000)
            .map(|i| PathPoint { lat_e5: i, lon_e5: -i })
            .collect();
        let path = downsample(&points);
        assert_eq!(path.len(), PATH_CAPACITY);
        assert_eq!(path[0], points[0]);
        assert_eq!(path[PATH_CAPACITY - 1], points[999]);

        let short = downsample(&points[..10]);
        assert_eq!(short.len(), 10);
    }
}
