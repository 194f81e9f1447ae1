#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod activity;
pub mod battery;
pub mod calendar;
pub mod command;
pub mod config;
pub mod controller;
pub mod credential;
pub mod display;
pub mod environment;
pub mod net;
pub mod presence;
pub mod retained;
pub mod retry;
pub mod schedule;
pub mod sntp;
pub mod stability;
pub mod sync;
pub mod wake;

#[cfg(test)]
mod testing;
