//! Environmental sources: weather forecast, tide predictions, buoy readings
//!
//! Each source is independent and optional. Parsers take the raw body and
//! return compact heapless readings that fit in retained memory.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use heapless::Vec as HVec;
use serde::Deserialize;

use crate::calendar::{self, CivilDate, TimeZone, SECS_PER_DAY, SECS_PER_HOUR, SECS_PER_MINUTE};
use crate::sync::SourceError;

pub const FORECAST_DAYS: usize = 7;
pub const TIDE_EVENTS: usize = 6;
/// The buoy feed is tens of kilobytes; only the newest rows are needed
pub const BUOY_READ_LIMIT: usize = 4 * 1024;

/// Coarse sky condition, one icon each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Condition {
    #[default]
    Clear,
    PartlyCloudy,
    Cloudy,
    Fog,
    Drizzle,
    Rain,
    Snow,
    Thunderstorm,
}

impl Condition {
    /// Map a WMO weather interpretation code
    pub fn from_wmo(code: u8) -> Self {
        match code {
            0 => Condition::Clear,
            1 | 2 => Condition::PartlyCloudy,
            3 => Condition::Cloudy,
            45 | 48 => Condition::Fog,
            51..=57 => Condition::Drizzle,
            61..=67 | 80..=82 => Condition::Rain,
            71..=77 | 85 | 86 => Condition::Snow,
            95..=99 => Condition::Thunderstorm,
            _ => Condition::Cloudy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CurrentWeather {
    pub temperature_c: f32,
    pub wind_kmh: f32,
    pub condition: Condition,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ForecastDay {
    pub date: CivilDate,
    pub high_c: f32,
    pub low_c: f32,
    pub condition: Condition,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WeatherReport {
    pub current: CurrentWeather,
    pub forecast: HVec<ForecastDay, FORECAST_DAYS>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TideKind {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TideEvent {
    /// Station-local seconds since 1970
    pub local_time: i64,
    pub height_ft: f32,
    pub kind: TideKind,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TideReport {
    pub events: HVec<TideEvent, TIDE_EVENTS>,
}

impl TideReport {
    /// First event at or after `local_now`
    pub fn next(&self) -> Option<&TideEvent> {
        self.events.first()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SurfReading {
    pub observed_epoch: u64,
    pub wave_height_m: f32,
    pub dominant_period_s: Option<f32>,
    pub mean_direction_deg: Option<u16>,
    pub water_temp_c: Option<f32>,
}

/// Whatever the environmental sources produced this sync
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnvironmentReport {
    pub weather: Option<WeatherReport>,
    pub tide: Option<TideReport>,
    pub surf: Option<SurfReading>,
}

// ---- weather ----

#[derive(Deserialize)]
struct ForecastResponse {
    current: Option<CurrentBlock>,
    daily: Option<DailyBlock>,
}

#[derive(Deserialize)]
struct CurrentBlock {
    temperature_2m: Option<f32>,
    weather_code: Option<u8>,
    wind_speed_10m: Option<f32>,
}

#[derive(Deserialize)]
struct DailyBlock {
    #[serde(default)]
    time: Vec<String>,
    #[serde(default)]
    weather_code: Vec<Option<u8>>,
    #[serde(default)]
    temperature_2m_max: Vec<Option<f32>>,
    #[serde(default)]
    temperature_2m_min: Vec<Option<f32>>,
}

fn plausible_temp(c: f32) -> bool {
    c.is_finite() && (-90.0..=60.0).contains(&c)
}

pub fn weather_url(api: &str, latitude: f64, longitude: f64) -> String {
    format!(
        "{}?latitude={:.4}&longitude={:.4}\
         &current=temperature_2m,weather_code,wind_speed_10m\
         &daily=weather_code,temperature_2m_max,temperature_2m_min\
         &timezone=auto&forecast_days={}",
        api, latitude, longitude, FORECAST_DAYS
    )
}

/// Parse a forecast body. Current conditions are required; forecast days
/// with missing or implausible values are skipped.
pub fn parse_weather(body: &[u8]) -> Result<WeatherReport, SourceError> {
    let response: ForecastResponse =
        serde_json::from_slice(body).map_err(|_| SourceError::Malformed)?;
    let current = response.current.ok_or(SourceError::NoData)?;

    let temperature_c = current.temperature_2m.ok_or(SourceError::NoData)?;
    let wind_kmh = current.wind_speed_10m.unwrap_or(0.0);
    if !plausible_temp(temperature_c) || !(0.0..=500.0).contains(&wind_kmh) {
        return Err(SourceError::Malformed);
    }
    let mut report = WeatherReport {
        current: CurrentWeather {
            temperature_c,
            wind_kmh,
            condition: Condition::from_wmo(current.weather_code.unwrap_or(0)),
        },
        forecast: HVec::new(),
    };

    if let Some(daily) = response.daily {
        for (i, day) in daily.time.iter().enumerate() {
            let Some(date) = calendar::parse_date_time(day) else {
                continue;
            };
            let high = daily.temperature_2m_max.get(i).copied().flatten();
            let low = daily.temperature_2m_min.get(i).copied().flatten();
            let (Some(high_c), Some(low_c)) = (high, low) else {
                continue;
            };
            if !plausible_temp(high_c) || !plausible_temp(low_c) || low_c > high_c {
                continue;
            }
            let entry = ForecastDay {
                date: calendar::civil_from_days(date.div_euclid(SECS_PER_DAY as i64)),
                high_c,
                low_c,
                condition: Condition::from_wmo(
                    daily.weather_code.get(i).copied().flatten().unwrap_or(0),
                ),
            };
            if report.forecast.push(entry).is_err() {
                break;
            }
        }
    }
    Ok(report)
}

// ---- tides ----

#[derive(Deserialize)]
struct TideResponse {
    #[serde(default)]
    predictions: Vec<TidePrediction>,
    error: Option<ServiceError>,
}

#[derive(Deserialize)]
struct TidePrediction {
    t: String,
    v: String,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Deserialize)]
struct ServiceError {
    #[serde(default)]
    message: String,
}

/// High/low predictions for 48 h starting at the local date of `now`
pub fn tide_url(api: &str, station: &str, now: u64, zone: &TimeZone) -> String {
    let date = calendar::local_date(now, zone);
    format!(
        "{}?product=predictions&application=wakeframe&begin_date={:04}{:02}{:02}\
         &range=48&datum=MLLW&station={}&time_zone=lst_ldt&units=english\
         &interval=hilo&format=json",
        api, date.year, date.month, date.day, station
    )
}

/// Parse hi/lo predictions, keeping upcoming events only
pub fn parse_tides(body: &[u8], local_now: i64) -> Result<TideReport, SourceError> {
    let response: TideResponse =
        serde_json::from_slice(body).map_err(|_| SourceError::Malformed)?;
    if let Some(error) = response.error {
        log::warn!("tide service error: {}", error.message);
        return Err(SourceError::Rejected);
    }

    let mut report = TideReport::default();
    for prediction in &response.predictions {
        let Some(local_time) = calendar::parse_date_time(&prediction.t) else {
            continue;
        };
        if local_time < local_now {
            continue;
        }
        let Ok(height_ft) = prediction.v.trim().parse::<f32>() else {
            continue;
        };
        if !height_ft.is_finite() || !(-20.0..=30.0).contains(&height_ft) {
            continue;
        }
        // "HH"/"LL" mark the higher high and lower low of a mixed tide
        let kind = match prediction.kind.as_deref().and_then(|k| k.bytes().next()) {
            Some(b'H') => TideKind::High,
            Some(b'L') => TideKind::Low,
            _ => continue,
        };
        if report
            .events
            .push(TideEvent {
                local_time,
                height_ft,
                kind,
            })
            .is_err()
        {
            break;
        }
    }

    if report.events.is_empty() {
        return Err(SourceError::NoData);
    }
    Ok(report)
}

// ---- buoy ----

pub fn buoy_url(api: &str, station: &str) -> String {
    format!("{}/{}.txt", api, station)
}

fn column(header: &[&str], name: &str) -> Option<usize> {
    header.iter().position(|h| *h == name)
}

fn field<T: core::str::FromStr>(row: &[&str], idx: Option<usize>) -> Option<T> {
    let raw = *row.get(idx?)?;
    if raw == "MM" {
        return None;
    }
    raw.parse().ok()
}

/// Parse a realtime standard meteorological text feed.
///
/// Rows are newest first; the first row with a wave height wins. `MM` marks a
/// missing value. The body may be cut mid-row.
pub fn parse_buoy(body: &[u8]) -> Result<SurfReading, SourceError> {
    let text = match core::str::from_utf8(body) {
        Ok(text) => text,
        // a truncated body can end inside a multi-byte sequence
        Err(e) => core::str::from_utf8(&body[..e.valid_up_to()]).map_err(|_| SourceError::Malformed)?,
    };

    let mut lines = text.lines();
    let header: Vec<&str> = lines
        .by_ref()
        .find(|l| l.starts_with('#'))
        .ok_or(SourceError::Malformed)?
        .trim_start_matches('#')
        .split_whitespace()
        .collect();

    let wvht = column(&header, "WVHT").ok_or(SourceError::Malformed)?;
    let dpd = column(&header, "DPD");
    let mwd = column(&header, "MWD");
    let wtmp = column(&header, "WTMP");

    for line in lines.filter(|l| !l.starts_with('#')) {
        let row: Vec<&str> = line.split_whitespace().collect();
        if row.len() < header.len() {
            continue;
        }
        let Some(wave_height_m) = field::<f32>(&row, Some(wvht)) else {
            continue;
        };
        if !(0.0..=30.0).contains(&wave_height_m) {
            continue;
        }
        let (Some(year), Some(month), Some(day), Some(hour), Some(minute)) = (
            field::<i32>(&row, Some(0)),
            field::<u8>(&row, Some(1)),
            field::<u8>(&row, Some(2)),
            field::<u64>(&row, Some(3)),
            field::<u64>(&row, Some(4)),
        ) else {
            continue;
        };
        let days = calendar::days_from_civil(year, month, day);
        if days < 0 {
            continue;
        }
        return Ok(SurfReading {
            observed_epoch: days as u64 * SECS_PER_DAY
                + hour * SECS_PER_HOUR
                + minute * SECS_PER_MINUTE,
            wave_height_m,
            dominant_period_s: field(&row, dpd),
            mean_direction_deg: field(&row, mwd).filter(|d: &u16| *d <= 360),
            water_temp_c: field(&row, wtmp),
        });
    }
    Err(SourceError::NoData)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORECAST: &[u8] = br#"{"latitude":36.97,"longitude":-122.01,
        "current":{"time":"2024-05-08T12:00","temperature_2m":16.4,"weather_code":2,"wind_speed_10m":11.2},
        "daily":{"time":["2024-05-08","2024-05-09","2024-05-10"],
                 "weather_code":[2,61,null],
                 "temperature_2m_max":[18.1,15.0,17.0],
                 "temperature_2m_min":[10.2,9.8,null]}}"#;

    #[test]
    fn test_parse_weather() {
        let report = parse_weather(FORECAST).unwrap();
        assert_eq!(report.current.temperature_c, 16.4);
        assert_eq!(report.current.condition, Condition::PartlyCloudy);
        // the third day has no low and is skipped
        assert_eq!(report.forecast.len(), 2);
        assert_eq!(report.forecast[1].date, CivilDate::new(2024, 5, 9));
        assert_eq!(report.forecast[1].condition, Condition::Rain);
    }

    #[test]
    fn test_weather_without_current_is_no_data() {
        assert_eq!(parse_weather(br#"{"daily":{}}"#), Err(SourceError::NoData));
        assert_eq!(parse_weather(b"<html>"), Err(SourceError::Malformed));
    }

    #[test]
    fn test_weather_rejects_absurd_temperature() {
        let body = br#"{"current":{"temperature_2m":99.0,"weather_code":0}}"#;
        assert_eq!(parse_weather(body), Err(SourceError::Malformed));
    }

    #[test]
    fn test_weather_url() {
        let url = weather_url("https://api.open-meteo.com/v1/forecast", 36.97, -122.01);
        assert!(url.starts_with("https://api.open-meteo.com/v1/forecast?latitude=36.9700&longitude=-122.0100&current="));
        assert!(url.ends_with("&forecast_days=7"));
    }

    const TIDES: &[u8] = br#"{"predictions":[
        {"t":"2024-05-08 03:10","v":"4.812","type":"H"},
        {"t":"2024-05-08 09:40","v":"-0.521","type":"L"},
        {"t":"2024-05-08 16:02","v":"3.900","type":"HH"},
        {"t":"2024-05-08 21:55","v":"1.2","type":"LL"}]}"#;

    #[test]
    fn test_parse_tides_skips_past_events() {
        let now = calendar::parse_date_time("2024-05-08 09:00").unwrap();
        let report = parse_tides(TIDES, now).unwrap();
        assert_eq!(report.events.len(), 3);
        let next = report.next().unwrap();
        assert_eq!(next.kind, TideKind::Low);
        assert_eq!(next.height_ft, -0.521);
        assert_eq!(report.events[1].kind, TideKind::High);
    }

    #[test]
    fn test_tides_service_error_and_empty() {
        let body = br#"{"error":{"message":"No Predictions data was found."}}"#;
        assert_eq!(parse_tides(body, 0), Err(SourceError::Rejected));
        let late = calendar::parse_date_time("2024-05-09 00:00").unwrap();
        assert_eq!(parse_tides(TIDES, late), Err(SourceError::NoData));
    }

    #[test]
    fn test_tide_url_uses_local_date() {
        // 2024-05-08 03:00 UTC is still the 7th at UTC-7
        let url = tide_url("https://tides.example/api", "9413450", 1_715_137_200, &TimeZone::fixed(-420));
        assert!(url.contains("begin_date=20240507"));
        assert!(url.contains("station=9413450"));
    }

    const BUOY: &[u8] = b"#YY  MM DD hh mm WDIR WSPD GST  WVHT   DPD   APD MWD   PRES  ATMP  WTMP  DEWP  VIS PTDY  TIDE
#yr  mo dy hr mn degT m/s  m/s     m   sec   sec degT   hPa  degC  degC  degC  nmi  hPa    ft
2024 05 08 12 40  MM   MM   MM    MM    MM    MM  MM     MM    MM  13.1    MM   MM   MM    MM
2024 05 08 12 10  MM   MM   MM   1.4    13   8.2 283     MM    MM  13.0    MM   MM   MM    MM
2024 05 08 11 40  MM   MM   MM   1.5    12   8.0 280     MM    MM  13.0    MM   MM   MM    MM
2024 05 08 11 ";

    #[test]
    fn test_parse_buoy_first_row_with_waves() {
        let reading = parse_buoy(BUOY).unwrap();
        assert_eq!(reading.wave_height_m, 1.4);
        assert_eq!(reading.dominant_period_s, Some(13.0));
        assert_eq!(reading.mean_direction_deg, Some(283));
        assert_eq!(reading.water_temp_c, Some(13.0));
        // 2024-05-08 12:10 UTC
        assert_eq!(reading.observed_epoch, 1_715_170_200);
    }

    #[test]
    fn test_parse_buoy_without_waves() {
        let body = b"#YY  MM DD hh mm WVHT\n2024 05 08 12 40 MM\n";
        assert_eq!(parse_buoy(body), Err(SourceError::NoData));
        assert_eq!(parse_buoy(b"not a feed"), Err(SourceError::Malformed));
    }

    #[test]
    fn test_wmo_mapping() {
        assert_eq!(Condition::from_wmo(0), Condition::Clear);
        assert_eq!(Condition::from_wmo(45), Condition::Fog);
        assert_eq!(Condition::from_wmo(81), Condition::Rain);
        assert_eq!(Condition::from_wmo(75), Condition::Snow);
        assert_eq!(Condition::from_wmo(96), Condition::Thunderstorm);
    }
}
