//! Calendar math for Unix epoch seconds
//!
//! Uses Howard Hinnant's `days_from_civil` / `civil_from_days` algorithms so the
//! core does not need a date crate. All values are proleptic Gregorian, no leap
//! seconds. Local time follows a POSIX `TZ` rule such as
//! `PST8PDT,M3.2.0,M11.1.0`, the same format ESP-IDF takes.

use serde::{Deserialize, Serialize};

pub const SECS_PER_MINUTE: u64 = 60;
pub const SECS_PER_HOUR: u64 = 3_600;
pub const SECS_PER_DAY: u64 = 86_400;

/// Anything before 2020-01-01 means the RTC was never set.
pub const MIN_VALID_EPOCH: u64 = 1_577_836_800;

/// Returns true if `epoch` looks like a synchronized wall-clock reading.
pub fn is_plausible(epoch: u64) -> bool {
    epoch >= MIN_VALID_EPOCH
}

/// Real-time clock that keeps running through deep sleep
pub trait WallClock {
    /// Seconds since the Unix epoch, UTC. Implausibly small if never set.
    fn now(&mut self) -> u64;

    fn set(&mut self, epoch: u64);
}

/// A calendar date
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct CivilDate {
    pub year: i32,
    pub month: u8,
    pub day: u8,
}

impl CivilDate {
    pub const fn new(year: i32, month: u8, day: u8) -> Self {
        Self { year, month, day }
    }

    /// Days since 1970-01-01
    pub fn to_days(self) -> i64 {
        days_from_civil(self.year, self.month, self.day)
    }

    /// Weekday with Monday = 0 ... Sunday = 6
    pub fn weekday(self) -> u8 {
        weekday_from_days(self.to_days())
    }
}

/// Days since 1970-01-01 for a Gregorian date
pub fn days_from_civil(year: i32, month: u8, day: u8) -> i64 {
    let y = if month <= 2 { year as i64 - 1 } else { year as i64 };
    let era = (if y >= 0 { y } else { y - 399 }) / 400;
    let yoe = y - era * 400;
    let m = month as i64;
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Gregorian date for a count of days since 1970-01-01
pub fn civil_from_days(days: i64) -> CivilDate {
    let z = days + 719_468;
    let era = (if z >= 0 { z } else { z - 146_096 }) / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u8;
    let year = (yoe + era * 400 + if month <= 2 { 1 } else { 0 }) as i32;
    CivilDate { year, month, day }
}

/// Monday = 0 ... Sunday = 6. 1970-01-01 was a Thursday.
pub fn weekday_from_days(days: i64) -> u8 {
    (days + 3).rem_euclid(7) as u8
}

pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// When a daylight-saving transition happens in a given year
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleDate {
    /// `Jn`: day 1..=365, February 29 is never counted
    Julian(u16),
    /// `n`: day 0..=365, February 29 counts in leap years
    DayOfYear(u16),
    /// `Mm.w.d`: weekday `d` (0 = Sunday) of week `w` (5 = last) in month `m`
    MonthWeekDay { month: u8, week: u8, weekday: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Transition {
    date: RuleDate,
    /// Local wall time of the switch, seconds after midnight
    time: i32,
}

impl Transition {
    /// Local seconds since 1970 of the switch in `year`
    fn local_instant(&self, year: i32) -> i64 {
        let jan1 = days_from_civil(year, 1, 1);
        let day = match self.date {
            RuleDate::Julian(n) => {
                let skip_leap = is_leap_year(year) && n >= 60;
                jan1 + n as i64 - 1 + skip_leap as i64
            }
            RuleDate::DayOfYear(n) => jan1 + n as i64,
            RuleDate::MonthWeekDay { month, week, weekday } => {
                let first = days_from_civil(year, month, 1);
                let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
                let month_len = days_from_civil(next_year, next_month, 1) - first;
                // weekday_from_days is Monday-based
                let first_weekday = (weekday_from_days(first) as i64 + 1) % 7;
                let mut offset = (weekday as i64 - first_weekday).rem_euclid(7) + (week as i64 - 1) * 7;
                while offset >= month_len {
                    offset -= 7;
                }
                first + offset
            }
        };
        day * SECS_PER_DAY as i64 + self.time as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DaylightSaving {
    /// Seconds east of UTC while in effect
    offset: i32,
    start: Transition,
    end: Transition,
}

/// A POSIX `TZ` rule: a standard offset and optional yearly daylight saving
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeZone {
    /// Seconds east of UTC
    std_offset: i32,
    dst: Option<DaylightSaving>,
}

/// Rules assumed when a zone names daylight time but gives no dates
const DEFAULT_DST_RULES: [Transition; 2] = [
    Transition {
        date: RuleDate::MonthWeekDay { month: 3, week: 2, weekday: 0 },
        time: 7_200,
    },
    Transition {
        date: RuleDate::MonthWeekDay { month: 11, week: 1, weekday: 0 },
        time: 7_200,
    },
];

struct Cursor<'a> {
    rest: &'a [u8],
}

impl Cursor<'_> {
    fn peek(&self) -> Option<u8> {
        self.rest.first().copied()
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.rest = &self.rest[1..];
            true
        } else {
            false
        }
    }

    fn number(&mut self, max_digits: usize) -> Option<u32> {
        let len = self
            .rest
            .iter()
            .take(max_digits)
            .take_while(|b| b.is_ascii_digit())
            .count();
        if len == 0 {
            return None;
        }
        let value = self.rest[..len]
            .iter()
            .fold(0u32, |acc, b| acc * 10 + (b - b'0') as u32);
        self.rest = &self.rest[len..];
        Some(value)
    }

    /// `std` / `dst` designation: three or more letters, or `<...>`
    fn name(&mut self) -> Option<()> {
        if self.eat(b'<') {
            let len = self.rest.iter().position(|b| *b == b'>')?;
            let ok = len >= 3
                && self.rest[..len]
                    .iter()
                    .all(|b| b.is_ascii_alphanumeric() || *b == b'+' || *b == b'-');
            self.rest = &self.rest[len + 1..];
            return ok.then_some(());
        }
        let len = self.rest.iter().take_while(|b| b.is_ascii_alphabetic()).count();
        self.rest = &self.rest[len..];
        (len >= 3).then_some(())
    }

    /// `[+-]hh[:mm[:ss]]` in seconds
    fn duration(&mut self, max_hours: u32) -> Option<i32> {
        let sign = if self.eat(b'-') {
            -1
        } else {
            self.eat(b'+');
            1
        };
        let hours = self.number(3)?;
        let mut secs = hours * SECS_PER_HOUR as u32;
        if self.eat(b':') {
            secs += self.number(2).filter(|m| *m < 60)? * SECS_PER_MINUTE as u32;
            if self.eat(b':') {
                secs += self.number(2).filter(|s| *s < 60)?;
            }
        }
        (hours <= max_hours).then_some(sign * secs as i32)
    }

    fn transition(&mut self) -> Option<Transition> {
        let date = if self.eat(b'J') {
            RuleDate::Julian(self.number(3).filter(|n| (1..=365).contains(n))? as u16)
        } else if self.eat(b'M') {
            let month = self.number(2).filter(|m| (1..=12).contains(m))? as u8;
            self.eat(b'.').then_some(())?;
            let week = self.number(1).filter(|w| (1..=5).contains(w))? as u8;
            self.eat(b'.').then_some(())?;
            let weekday = self.number(1).filter(|d| *d <= 6)? as u8;
            RuleDate::MonthWeekDay { month, week, weekday }
        } else {
            RuleDate::DayOfYear(self.number(3).filter(|n| *n <= 365)? as u16)
        };
        let time = if self.eat(b'/') { self.duration(167)? } else { 7_200 };
        Some(Transition { date, time })
    }
}

impl TimeZone {
    pub const UTC: TimeZone = TimeZone {
        std_offset: 0,
        dst: None,
    };

    /// A zone without daylight saving, `minutes` east of UTC
    pub const fn fixed(minutes: i16) -> Self {
        Self {
            std_offset: minutes as i32 * 60,
            dst: None,
        }
    }

    /// Parse a POSIX `TZ` value, e.g. `CET-1CEST,M3.5.0,M10.5.0/3`.
    ///
    /// Offsets in the string are west of UTC, as POSIX has them. A daylight
    /// name without dates gets the US rules.
    pub fn parse(s: &str) -> Option<Self> {
        let mut cur = Cursor { rest: s.trim().as_bytes() };
        cur.name()?;
        let std_offset = -cur.duration(24)?;
        if cur.peek().is_none() {
            return Some(Self { std_offset, dst: None });
        }

        cur.name()?;
        let offset = match cur.peek() {
            Some(b',') | None => std_offset + SECS_PER_HOUR as i32,
            Some(_) => -cur.duration(24)?,
        };
        let [start, end] = if cur.eat(b',') {
            let start = cur.transition()?;
            cur.eat(b',').then_some(())?;
            [start, cur.transition()?]
        } else {
            DEFAULT_DST_RULES
        };
        if cur.peek().is_some() {
            return None;
        }
        Some(Self {
            std_offset,
            dst: Some(DaylightSaving { offset, start, end }),
        })
    }

    /// Seconds east of UTC in effect at `epoch`
    pub fn offset_at(&self, epoch: i64) -> i32 {
        let Some(dst) = self.dst else {
            return self.std_offset;
        };
        let year = civil_from_days((epoch + self.std_offset as i64).div_euclid(SECS_PER_DAY as i64)).year;
        // the start is given in standard time, the end in daylight time
        let start = dst.start.local_instant(year) - self.std_offset as i64;
        let end = dst.end.local_instant(year) - dst.offset as i64;
        let in_dst = if start < end {
            (start..end).contains(&epoch)
        } else {
            !(end..start).contains(&epoch)
        };
        if in_dst { dst.offset } else { self.std_offset }
    }

    pub fn has_dst(&self) -> bool {
        self.dst.is_some()
    }
}

impl Default for TimeZone {
    fn default() -> Self {
        Self::UTC
    }
}

/// Seconds since the Unix epoch in local time (may be negative near 1970)
pub fn to_local(epoch: u64, zone: &TimeZone) -> i64 {
    epoch as i64 + zone.offset_at(epoch as i64) as i64
}

/// Convert local seconds back to UTC epoch seconds, saturating at zero.
///
/// A wall time skipped by a spring-forward resolves past the gap; a repeated
/// one resolves to its first occurrence.
pub fn from_local(local: i64, zone: &TimeZone) -> u64 {
    let first = zone.offset_at(local - zone.std_offset as i64);
    let mut utc = local - first as i64;
    let second = zone.offset_at(utc);
    if second != first {
        utc = local - second as i64;
    }
    utc.max(0) as u64
}

/// Seconds elapsed since local midnight
pub fn local_seconds_of_day(epoch: u64, zone: &TimeZone) -> u32 {
    to_local(epoch, zone).rem_euclid(SECS_PER_DAY as i64) as u32
}

/// Local calendar date of an epoch
pub fn local_date(epoch: u64, zone: &TimeZone) -> CivilDate {
    civil_from_days(to_local(epoch, zone).div_euclid(SECS_PER_DAY as i64))
}

/// Period over which tracked activities are summed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingWindow {
    /// Rolling week starting Monday 00:00 local
    #[default]
    Week,
    /// Calendar month
    Month,
    /// Calendar year
    Year,
}

impl TrackingWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingWindow::Week => "week",
            TrackingWindow::Month => "month",
            TrackingWindow::Year => "year",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            v if v.eq_ignore_ascii_case("week") => Some(TrackingWindow::Week),
            v if v.eq_ignore_ascii_case("month") => Some(TrackingWindow::Month),
            v if v.eq_ignore_ascii_case("year") => Some(TrackingWindow::Year),
            _ => None,
        }
    }

    /// UTC epoch of local midnight on the first day of the window containing `now`
    pub fn start(&self, now: u64, zone: &TimeZone) -> u64 {
        let local_days = to_local(now, zone).div_euclid(SECS_PER_DAY as i64);
        let start_days = match self {
            TrackingWindow::Week => local_days - weekday_from_days(local_days) as i64,
            TrackingWindow::Month => {
                let date = civil_from_days(local_days);
                days_from_civil(date.year, date.month, 1)
            }
            TrackingWindow::Year => days_from_civil(civil_from_days(local_days).year, 1, 1),
        };
        from_local(start_days * SECS_PER_DAY as i64, zone)
    }
}

fn digits<T: core::str::FromStr>(s: &str, range: core::ops::Range<usize>) -> Option<T> {
    let part = s.get(range)?;
    if !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

/// Parse `YYYY-MM-DD?hh:mm[:ss]` into seconds since 1970 in the same zone.
///
/// The separator between date and time may be `T` or a space. Anything after
/// the seconds field (`Z`, fractional seconds, offsets) is ignored.
pub fn parse_date_time(s: &str) -> Option<i64> {
    let s = s.trim();
    let year: i32 = digits(s, 0..4)?;
    let month: u8 = digits(s, 5..7)?;
    let day: u8 = digits(s, 8..10)?;
    if s.as_bytes().get(4) != Some(&b'-') || s.as_bytes().get(7) != Some(&b'-') {
        return None;
    }
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    let (hour, minute, second) = if s.len() > 10 {
        let sep = *s.as_bytes().get(10)?;
        if sep != b'T' && sep != b' ' {
            return None;
        }
        let hour: u8 = digits(s, 11..13)?;
        let minute: u8 = digits(s, 14..16)?;
        let second: u8 = if s.as_bytes().get(16) == Some(&b':') {
            digits(s, 17..19)?
        } else {
            0
        };
        (hour, minute, second)
    } else {
        (0, 0, 0)
    };
    if hour > 23 || minute > 59 || second > 60 {
        return None;
    }
    Some(
        days_from_civil(year, month, day) * SECS_PER_DAY as i64
            + hour as i64 * SECS_PER_HOUR as i64
            + minute as i64 * SECS_PER_MINUTE as i64
            + second as i64,
    )
}

/// Parse an ISO-8601 UTC timestamp (`2024-05-06T07:08:09Z`) into epoch seconds
pub fn parse_utc(s: &str) -> Option<u64> {
    parse_date_time(s).filter(|secs| *secs >= 0).map(|secs| secs as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_days_round_trip_known_dates() {
        assert_eq!(days_from_civil(1970, 1, 1), 0);
        assert_eq!(days_from_civil(2024, 1, 1), 19_723);
        assert_eq!(civil_from_days(19_723), CivilDate::new(2024, 1, 1));
        assert_eq!(civil_from_days(19_782), CivilDate::new(2024, 2, 29));
        assert_eq!(civil_from_days(-1), CivilDate::new(1969, 12, 31));
    }

    #[test]
    fn test_weekday() {
        assert_eq!(CivilDate::new(1970, 1, 1).weekday(), 3);
        assert_eq!(CivilDate::new(2024, 5, 6).weekday(), 0);
        assert_eq!(CivilDate::new(2024, 5, 12).weekday(), 6);
    }

    #[test]
    fn test_leap_year() {
        assert!(is_leap_year(2000));
        assert!(is_leap_year(2024));
        assert!(!is_leap_year(1900));
        assert!(!is_leap_year(2023));
    }

    #[test]
    fn test_week_window_starts_monday() {
        // Wednesday 2024-05-08 12:00 UTC
        let now = 1_715_169_600;
        assert_eq!(TrackingWindow::Week.start(now, &TimeZone::UTC), 1_714_953_600);
        // Monday midnight is already inside its own week
        assert_eq!(TrackingWindow::Week.start(1_714_953_600, &TimeZone::UTC), 1_714_953_600);
    }

    #[test]
    fn test_month_and_year_windows() {
        let now = 1_715_169_600;
        assert_eq!(TrackingWindow::Month.start(now, &TimeZone::UTC), 1_714_521_600);
        assert_eq!(TrackingWindow::Year.start(now, &TimeZone::UTC), 1_704_067_200);
    }

    #[test]
    fn test_window_honours_utc_offset() {
        // Monday 2024-05-06 03:00 UTC is still Sunday evening at UTC-7
        let now = 1_714_964_400;
        let start = TrackingWindow::Week.start(now, &TimeZone::fixed(-420));
        // Monday 2024-04-29 00:00 local = 07:00 UTC
        assert_eq!(start, 1_714_374_000);
    }

    #[test]
    fn test_parse_date_time_variants() {
        assert_eq!(parse_utc("2024-05-06T00:00:00Z"), Some(1_714_953_600));
        assert_eq!(parse_date_time("2024-05-06 04:12"), Some(1_714_953_600 + 4 * 3600 + 12 * 60));
        assert_eq!(parse_date_time("2024-05-06"), Some(1_714_953_600));
        assert_eq!(parse_date_time("2024-13-06"), None);
        assert_eq!(parse_date_time("garbage"), None);
    }

    #[test]
    fn test_local_helpers() {
        let epoch = 1_714_953_600 + 3600;
        assert_eq!(local_seconds_of_day(epoch, &TimeZone::UTC), 3600);
        let minus_two = TimeZone::fixed(-120);
        assert_eq!(local_seconds_of_day(epoch, &minus_two), 23 * 3600);
        assert_eq!(local_date(epoch, &minus_two), CivilDate::new(2024, 5, 5));
    }

    const PACIFIC: &str = "PST8PDT,M3.2.0,M11.1.0";

    #[test]
    fn test_parse_time_zones() {
        assert_eq!(TimeZone::parse("UTC0"), Some(TimeZone::UTC));
        assert_eq!(TimeZone::parse("<+0530>-5:30"), Some(TimeZone::fixed(330)));
        assert_eq!(TimeZone::parse("EST5"), Some(TimeZone::fixed(-300)));
        assert!(TimeZone::parse(PACIFIC).is_some_and(|z| z.has_dst()));
        assert!(TimeZone::parse("CET-1CEST,M3.5.0,M10.5.0/3").is_some());
        assert!(TimeZone::parse("AEST-10AEDT,M10.1.0,M4.1.0/3").is_some());
        // names without rules fall back to the US dates
        assert_eq!(TimeZone::parse("PST8PDT"), TimeZone::parse(PACIFIC));

        assert_eq!(TimeZone::parse(""), None);
        assert_eq!(TimeZone::parse("America/Los_Angeles"), None);
        assert_eq!(TimeZone::parse("PST"), None);
        assert_eq!(TimeZone::parse("PST8PDT,M13.2.0,M11.1.0"), None);
        assert_eq!(TimeZone::parse("PST8PDT,M3.2.0"), None);
        assert_eq!(TimeZone::parse("PST8 trailing"), None);
    }

    #[test]
    fn test_pacific_daylight_saving() {
        let zone = TimeZone::parse(PACIFIC).unwrap();
        // 2024-01-15 12:00 UTC, winter
        assert_eq!(zone.offset_at(1_705_320_000), -8 * 3600);
        // 2024-07-01 12:00 UTC, summer
        assert_eq!(zone.offset_at(1_719_835_200), -7 * 3600);
        // spring forward 2024-03-10 02:00 PST = 10:00 UTC
        assert_eq!(zone.offset_at(1_710_064_800 - 1), -8 * 3600);
        assert_eq!(zone.offset_at(1_710_064_800), -7 * 3600);
        // fall back 2024-11-03 02:00 PDT = 09:00 UTC
        assert_eq!(zone.offset_at(1_730_624_400 - 1), -7 * 3600);
        assert_eq!(zone.offset_at(1_730_624_400), -8 * 3600);
    }

    #[test]
    fn test_southern_hemisphere_daylight_saving() {
        let zone = TimeZone::parse("AEST-10AEDT,M10.1.0,M4.1.0/3").unwrap();
        // January is summer in Sydney
        assert_eq!(zone.offset_at(1_705_320_000), 11 * 3600);
        assert_eq!(zone.offset_at(1_719_835_200), 10 * 3600);
    }

    #[test]
    fn test_local_round_trip_across_dst() {
        let zone = TimeZone::parse(PACIFIC).unwrap();
        for epoch in [1_705_320_000u64, 1_719_835_200, 1_710_064_800, 1_730_624_400 + 3600] {
            assert_eq!(from_local(to_local(epoch, &zone), &zone), epoch);
        }
        // 2024-07-01 00:00 PDT
        let midnight = days_from_civil(2024, 7, 1) * SECS_PER_DAY as i64;
        assert_eq!(from_local(midnight, &zone), 1_719_817_200);
    }

    #[test]
    fn test_week_window_in_daylight_time() {
        let zone = TimeZone::parse(PACIFIC).unwrap();
        // Wednesday 2024-07-03 12:00 UTC; Monday 2024-07-01 00:00 PDT = 07:00 UTC
        assert_eq!(TrackingWindow::Week.start(1_720_008_000, &zone), 1_719_817_200);
        // same week in winter is an hour later in UTC
        // Wednesday 2024-01-17 12:00 UTC; Monday 2024-01-15 00:00 PST = 08:00 UTC
        assert_eq!(TrackingWindow::Week.start(1_705_492_800, &zone), 1_705_305_600);
    }
}
