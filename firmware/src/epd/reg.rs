//! Controller registers used by the init tables and the refresh cycle
//!
//! Names follow the GDEP073E01 datasheet.

// Panel and power
pub const PSR: u8 = 0x00;
pub const PWRR: u8 = 0x01;
pub const POF: u8 = 0x02;
pub const POFS: u8 = 0x03;
pub const PON: u8 = 0x04;
pub const PWS: u8 = 0xE3;

// Booster soft start, phases 1-3
pub const BTST1: u8 = 0x05;
pub const BTST2: u8 = 0x06;
pub const BTST3: u8 = 0x08;

/// Deep sleep, takes the 0xA5 check byte
pub const DSLP: u8 = 0x07;

// Frame transfer
pub const DTM: u8 = 0x10;
pub const DRF: u8 = 0x12;

// Timing and geometry
pub const PLL: u8 = 0x30;
pub const CDI: u8 = 0x50;
pub const TCON: u8 = 0x60;
pub const TRES: u8 = 0x61;

// VCOM
pub const VDCS: u8 = 0x82;
pub const T_VDCS: u8 = 0x84;

/// Unlock header sent before any configuration
pub const CMDH: u8 = 0xAA;

// Fast-refresh only: image processing, temperature sensor, cascade
pub const IPC: u8 = 0x13;
pub const TSE: u8 = 0x41;
pub const AGID: u8 = 0x86;
pub const CCSET: u8 = 0xE0;
pub const TSSET: u8 = 0xE6;
