//! AXP2101 power management IC
//!
//! Supplies the panel rails (ALDO3/ALDO4) and carries the battery fuel gauge.
//! I2C address 0x34.

use embedded_hal::i2c::I2c;
use wakeframe_core::battery::BatteryGauge;

pub const AXP2101_ADDR: u8 = 0x34;

const STATUS1: u8 = 0x00;
const FUEL_GAUGE_CTRL: u8 = 0x18;
const LDO_ONOFF_CTRL0: u8 = 0x90;
/// ALDO3 voltage
const LDO_VOL2_CTRL: u8 = 0x94;
/// ALDO4 voltage
const LDO_VOL3_CTRL: u8 = 0x95;
const BAT_PERCENT_REG: u8 = 0xA4;

const STATUS1_VBUS_GOOD: u8 = 1 << 5;
const STATUS1_BAT_PRESENT: u8 = 1 << 3;
const FUEL_GAUGE_ENABLE: u8 = 1 << 3;
/// (3300 - 500) / 100
const LDO_3V3: u8 = 0x1C;

pub struct Axp2101<I2C> {
    i2c: I2C,
}

impl<I2C: I2c> Axp2101<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self { i2c }
    }

    fn read(&mut self, reg: u8) -> Result<u8, I2C::Error> {
        let mut value = [0u8];
        self.i2c.write_read(AXP2101_ADDR, &[reg], &mut value)?;
        Ok(value[0])
    }

    fn write(&mut self, reg: u8, value: u8) -> Result<(), I2C::Error> {
        self.i2c.write(AXP2101_ADDR, &[reg, value])
    }

    /// Panel rails at 3.3 V and the fuel gauge on. The bootloader may already
    /// have done this.
    pub fn configure(&mut self) -> Result<(), I2C::Error> {
        self.write(LDO_VOL2_CTRL, LDO_3V3)?;
        self.write(LDO_VOL3_CTRL, LDO_3V3)?;
        self.write(LDO_ONOFF_CTRL0, 0x0F)?;
        let gauge = self.read(FUEL_GAUGE_CTRL)?;
        self.write(FUEL_GAUGE_CTRL, gauge | FUEL_GAUGE_ENABLE)
    }

    pub fn vbus_good(&mut self) -> Result<bool, I2C::Error> {
        Ok(self.read(STATUS1)? & STATUS1_VBUS_GOOD != 0)
    }

    pub fn battery_present(&mut self) -> Result<bool, I2C::Error> {
        Ok(self.read(STATUS1)? & STATUS1_BAT_PRESENT != 0)
    }
}

impl<I2C: I2c> BatteryGauge for Axp2101<I2C> {
    fn percent(&mut self) -> Option<u8> {
        match self.battery_present() {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                log::warn!("pmu status read failed: {:?}", e);
                return None;
            }
        }
        match self.read(BAT_PERCENT_REG) {
            Ok(percent) if percent <= 100 => Some(percent),
            Ok(percent) => {
                log::warn!("fuel gauge reported {}%", percent);
                None
            }
            Err(e) => {
                log::warn!("fuel gauge read failed: {:?}", e);
                None
            }
        }
    }
}
