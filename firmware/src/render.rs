//! Screen layouts
//!
//! Everything is drawn with the embedded-graphics mono fonts into the panel
//! framebuffer. Colour is used sparingly: red for warnings, the route in blue.

use core::fmt::Write as _;

use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::mono_font::ascii::{FONT_6X13, FONT_10X20};
use embedded_graphics::prelude::*;
use embedded_graphics::text::{Baseline, Text};
use heapless::String;
use wakeframe_core::activity::{ActivitySummary, PathPoint};
use wakeframe_core::calendar::{self, SECS_PER_DAY, TimeZone};
use wakeframe_core::display::{ReportView, SafeModeInfo, Screen};
use wakeframe_core::environment::{Condition, EnvironmentReport, TideKind};
use wakeframe_core::retained::CachedResult;
use wakeframe_core::stability::FACTORY_RESET_HOLD_MS;

use crate::battery::{self, BATTERY_WIDTH};
use crate::epd::{Color, HEIGHT, WIDTH};
use crate::framebuffer::Framebuffer;

const MARGIN: i32 = 24;
const LINE: i32 = 26;
const SMALL_LINE: i32 = 16;

const ROUTE_LEFT: u32 = 420;
const ROUTE_TOP: u32 = 110;
const ROUTE_SIZE: u32 = 320;

type Line = String<96>;

/// Vertical text flow down the left column
struct Page<'a> {
    fb: &'a mut Framebuffer,
    x: i32,
    y: i32,
}

impl<'a> Page<'a> {
    fn new(fb: &'a mut Framebuffer, x: i32, y: i32) -> Self {
        Self { fb, x, y }
    }

    fn large(&mut self, text: &str, color: Color) {
        let style = MonoTextStyle::new(&FONT_10X20, color);
        let _ = Text::with_baseline(text, Point::new(self.x, self.y), style, Baseline::Top).draw(self.fb);
        self.y += LINE;
    }

    fn small(&mut self, text: &str, color: Color) {
        let style = MonoTextStyle::new(&FONT_6X13, color);
        let _ = Text::with_baseline(text, Point::new(self.x, self.y), style, Baseline::Top).draw(self.fb);
        self.y += SMALL_LINE;
    }

    fn gap(&mut self) {
        self.y += LINE / 2;
    }
}

/// Draw `screen` over a cleared framebuffer
pub fn draw(fb: &mut Framebuffer, screen: &Screen<'_>) {
    fb.clear(Color::White);
    match screen {
        Screen::FirstRun => first_run(fb),
        Screen::SafeMode(info) => safe_mode(fb, info),
        Screen::Report(view) => report(fb, view),
    }
}

fn first_run(fb: &mut Framebuffer) {
    let mut page = Page::new(fb, MARGIN, MARGIN);
    page.large("Setup required", Color::Black);
    page.gap();
    page.small("Connect the frame to a computer over USB and open the serial port.", Color::Black);
    page.small("Send one line per command, for example:", Color::Black);
    page.gap();
    page.small(r#"  SET_CONFIG:{"wifi_ssid":"home","wifi_pass":"secret"}"#, Color::Blue);
    page.small("  GET_CONFIG", Color::Blue);
    page.small("  REFRESH", Color::Blue);
    page.gap();
    page.small("The frame stays awake while it is plugged in and sleeps once unplugged.", Color::Black);
}

fn safe_mode(fb: &mut Framebuffer, info: &SafeModeInfo) {
    let mut page = Page::new(fb, MARGIN, MARGIN);
    let mut line = Line::new();
    page.large("Safe mode", Color::Red);
    page.gap();
    page.small("The frame restarted repeatedly without a known cause.", Color::Black);
    line.clear();
    let _ = write!(line, "Boots: {}  unexplained in a row: {}", info.boot_count, info.rapid_boot_count);
    page.small(&line, Color::Black);
    page.gap();
    line.clear();
    let _ = write!(
        line,
        "Hold the button for {} s to erase settings and start over.",
        FACTORY_RESET_HOLD_MS / 1000
    );
    page.small(&line, Color::Black);
}

fn report(fb: &mut Framebuffer, view: &ReportView<'_>) {
    let battery_x = WIDTH - MARGIN as u32 - BATTERY_WIDTH - 16;
    battery::draw_battery(fb, battery_x, MARGIN as u32, &view.battery);

    let mut page = Page::new(fb, MARGIN, MARGIN);
    let mut line = Line::new();

    if view.reduced_power {
        page.small("Battery low: charge soon", Color::Red);
    }
    if let Some(code) = view.failure {
        line.clear();
        let _ = write!(line, "Update failed ({}), showing saved data", code);
        page.small(&line, Color::Red);
    } else if view.stale {
        page.small("Showing saved data", Color::Black);
    }
    page.gap();

    match view.result {
        CachedResult::Empty => page.large("No data yet", Color::Black),
        CachedResult::Activity(summary) => {
            activity(&mut page, summary, view);
            if !view.reduced_power
                && let Some(latest) = &summary.latest
            {
                route(page.fb, &latest.path);
            }
        }
        CachedResult::Environment(env) => environment(&mut page, env, view),
    }

    line.clear();
    if view.last_sync_epoch == 0 {
        let _ = write!(line, "Never updated");
    } else {
        let _ = write!(line, "Updated ");
        local_time(&mut line, view.last_sync_epoch, &view.zone);
    }
    let footer_y = HEIGHT as i32 - MARGIN - SMALL_LINE;
    let mut footer = Page::new(page.fb, MARGIN, footer_y);
    footer.small(&line, Color::Black);
}

fn activity(page: &mut Page<'_>, summary: &ActivitySummary, view: &ReportView<'_>) {
    let mut line = Line::new();
    let totals = &summary.totals;

    let _ = write!(line, "This {}", summary.window.as_str());
    page.large(&line, Color::Black);

    line.clear();
    let _ = write!(line, "{} activities", totals.count);
    page.large(&line, Color::Black);
    line.clear();
    let _ = write!(line, "{:.1} km", totals.distance_m / 1000.0);
    page.large(&line, Color::Black);
    line.clear();
    duration(&mut line, totals.moving_time_s);
    page.large(&line, Color::Black);
    if !view.reduced_power {
        line.clear();
        let _ = write!(line, "{:.0} m climbed", totals.elevation_m);
        page.large(&line, Color::Black);
    }

    let Some(latest) = &summary.latest else {
        return;
    };
    page.gap();
    page.small("Latest", Color::Black);
    page.large(&latest.title, Color::Blue);
    line.clear();
    local_time(&mut line, latest.start_epoch, &view.zone);
    let _ = write!(line, "  {:.1} km  ", latest.distance_m / 1000.0);
    duration(&mut line, latest.moving_time_s);
    page.small(&line, Color::Black);
}

/// Fit the path into the route box, keeping its aspect ratio
fn route(fb: &mut Framebuffer, path: &[PathPoint]) {
    if path.len() < 2 {
        return;
    }
    let (mut min_lat, mut max_lat, mut min_lon, mut max_lon) = (i32::MAX, i32::MIN, i32::MAX, i32::MIN);
    for p in path {
        min_lat = min_lat.min(p.lat_e5);
        max_lat = max_lat.max(p.lat_e5);
        min_lon = min_lon.min(p.lon_e5);
        max_lon = max_lon.max(p.lon_e5);
    }
    let span = (max_lat - min_lat).max(max_lon - min_lon).max(1) as i64;
    let size = ROUTE_SIZE as i64;
    let project = |p: &PathPoint| {
        let x = ROUTE_LEFT as i64 + (p.lon_e5 - min_lon) as i64 * size / span;
        // north up
        let y = ROUTE_TOP as i64 + size - (p.lat_e5 - min_lat) as i64 * size / span;
        (x as i32, y as i32)
    };
    for pair in path.windows(2) {
        let (a, b) = (project(&pair[0]), project(&pair[1]));
        fb.line(a, b, Color::Blue);
        fb.line((a.0 + 1, a.1), (b.0 + 1, b.1), Color::Blue);
    }
}

fn environment(page: &mut Page<'_>, env: &EnvironmentReport, view: &ReportView<'_>) {
    let mut line = Line::new();

    match &env.weather {
        Some(weather) => {
            let now = &weather.current;
            let _ = write!(
                line,
                "{:.0} C  {}  wind {:.0} km/h",
                now.temperature_c,
                condition_name(now.condition),
                now.wind_kmh
            );
            page.large(&line, Color::Black);
            if !view.reduced_power {
                for day in &weather.forecast {
                    line.clear();
                    let _ = write!(
                        line,
                        "{}  {:>3.0} / {:<3.0}  {}",
                        weekday_name(day.date.weekday()),
                        day.high_c,
                        day.low_c,
                        condition_name(day.condition)
                    );
                    page.small(&line, Color::Black);
                }
            }
        }
        None => page.small("Weather unavailable", Color::Red),
    }
    page.gap();

    match &env.tide {
        Some(tide) if !tide.events.is_empty() => {
            page.small("Tides", Color::Black);
            let shown = if view.reduced_power { 1 } else { tide.events.len() };
            for event in tide.events.iter().take(shown) {
                line.clear();
                let kind = match event.kind {
                    TideKind::High => "High",
                    TideKind::Low => "Low ",
                };
                let seconds = event.local_time.rem_euclid(SECS_PER_DAY as i64);
                let _ = write!(
                    line,
                    "{} {:02}:{:02}  {:.1} ft",
                    kind,
                    seconds / 3600,
                    seconds % 3600 / 60,
                    event.height_ft
                );
                page.small(&line, Color::Blue);
            }
        }
        _ => page.small("Tides unavailable", Color::Red),
    }
    page.gap();

    match &env.surf {
        Some(surf) => {
            line.clear();
            let _ = write!(line, "Waves {:.1} m", surf.wave_height_m);
            if let Some(period) = surf.dominant_period_s {
                let _ = write!(line, " @ {:.0} s", period);
            }
            if let Some(direction) = surf.mean_direction_deg {
                let _ = write!(line, " from {} deg", direction);
            }
            page.small(&line, Color::Black);
            if let Some(water) = surf.water_temp_c {
                line.clear();
                let _ = write!(line, "Water {:.1} C", water);
                page.small(&line, Color::Black);
            }
        }
        None => page.small("Buoy unavailable", Color::Red),
    }
}

fn duration(line: &mut Line, seconds: u32) {
    let _ = write!(line, "{}h{:02}", seconds / 3600, seconds % 3600 / 60);
}

fn local_time(line: &mut Line, epoch: u64, zone: &TimeZone) {
    let local = calendar::to_local(epoch, zone);
    let date = calendar::civil_from_days(local.div_euclid(SECS_PER_DAY as i64));
    let seconds = local.rem_euclid(SECS_PER_DAY as i64);
    let _ = write!(
        line,
        "{:04}-{:02}-{:02} {:02}:{:02}",
        date.year,
        date.month,
        date.day,
        seconds / 3600,
        seconds % 3600 / 60
    );
}

fn weekday_name(weekday: u8) -> &'static str {
    ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"]
        .get(weekday as usize)
        .copied()
        .unwrap_or("???")
}

fn condition_name(condition: Condition) -> &'static str {
    match condition {
        Condition::Clear => "clear",
        Condition::PartlyCloudy => "partly cloudy",
        Condition::Cloudy => "cloudy",
        Condition::Fog => "fog",
        Condition::Drizzle => "drizzle",
        Condition::Rain => "rain",
        Condition::Snow => "snow",
        Condition::Thunderstorm => "thunderstorm",
    }
}
