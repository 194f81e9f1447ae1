//! Battery indicator
//!
//! A horizontal cell outline with its tip on the right, filled left to right
//! in a colour that follows the charge level. Unknown charge draws an empty
//! cell with a cross; external power adds a bolt beside it.

use wakeframe_core::battery::BatteryStatus;

use crate::epd::Color;
use crate::framebuffer::Framebuffer;

pub const BATTERY_WIDTH: u32 = 48;
pub const BATTERY_HEIGHT: u32 = 24;

const BODY_WIDTH: u32 = 42;
const TIP_WIDTH: u32 = 6;
const TIP_HEIGHT: u32 = 12;
const BORDER: u32 = 2;

/// Fill colour for a charge level
pub fn percentage_color(percentage: u8) -> Color {
    match percentage {
        0..=15 => Color::Red,
        16..=40 => Color::Yellow,
        _ => Color::Green,
    }
}

fn outline(fb: &mut Framebuffer, x: u32, y: u32, width: u32, height: u32) {
    fb.fill_rect(x, y, width, height, Color::Black);
    fb.fill_rect(
        x + BORDER,
        y + BORDER,
        width - 2 * BORDER,
        height - 2 * BORDER,
        Color::White,
    );
}

/// Draw the indicator with its top-left corner at (`x`, `y`)
pub fn draw_battery(fb: &mut Framebuffer, x: u32, y: u32, status: &BatteryStatus) {
    outline(fb, x, y, BODY_WIDTH, BATTERY_HEIGHT);

    let tip_y = y + (BATTERY_HEIGHT - TIP_HEIGHT) / 2;
    fb.fill_rect(x + BODY_WIDTH, tip_y, TIP_WIDTH - BORDER, TIP_HEIGHT, Color::Black);

    let inner_x = x + 2 * BORDER;
    let inner_y = y + 2 * BORDER;
    let inner_w = BODY_WIDTH - 4 * BORDER;
    let inner_h = BATTERY_HEIGHT - 4 * BORDER;

    match status.percent {
        Some(percentage) => {
            let fill = inner_w * percentage.min(100) as u32 / 100;
            fb.fill_rect(inner_x, inner_y, fill, inner_h, percentage_color(percentage));
        }
        None => {
            let (x0, y0) = (inner_x as i32, inner_y as i32);
            let (x1, y1) = ((inner_x + inner_w - 1) as i32, (inner_y + inner_h - 1) as i32);
            fb.line((x0, y0), (x1, y1), Color::Red);
            fb.line((x0, y1), (x1, y0), Color::Red);
        }
    }

    if status.externally_powered {
        draw_bolt(fb, x + BATTERY_WIDTH + 4, y);
    }
}

fn draw_bolt(fb: &mut Framebuffer, x: u32, y: u32) {
    let (x, y) = (x as i32, y as i32);
    let points = [(x + 8, y), (x + 2, y + 13), (x + 8, y + 11), (x + 4, y + 23)];
    for pair in points.windows(2) {
        fb.line(pair[0], pair[1], Color::Yellow);
        fb.line((pair[0].0 + 1, pair[0].1), (pair[1].0 + 1, pair[1].1), Color::Black);
    }
}
