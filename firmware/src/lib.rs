#![no_std]

extern crate alloc;

pub mod battery;
pub mod epd;
pub mod framebuffer;
pub mod net;
pub mod panel;
pub mod pmu;
pub mod port;
pub mod render;
pub mod retained;
pub mod rtc;
pub mod sense;
pub mod store;
