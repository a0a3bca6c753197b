//! VL6180X time-of-flight distance sensor.
//!
//! Reports true millimeter distances over I2C, which makes the
//! plunger adapter almost trivial: millimeters are already linear in
//! displacement. The sensor's resolution (1 mm over ~82 mm of plunger
//! travel) is coarse next to the imaging sensors, so this is a
//! budget/simplicity option rather than a precision one, but it rides
//! the same capability interface as everything else.

use plunger::{RawSample, Sensor};

use super::clock::now_us;
use super::i2c::{I2cBus, I2cError};

const ADDR: u8 = 0x29;

// 16-bit register addresses.
const REG_SYSRANGE_START: u16 = 0x018;
const REG_INTERCONFIG_GPIO: u16 = 0x014;
const REG_INT_CLEAR: u16 = 0x015;
const REG_RESULT_INT_STATUS: u16 = 0x04F;
const REG_RESULT_RANGE_VAL: u16 = 0x062;
const REG_SYSTEM_FRESH_OUT_OF_RESET: u16 = 0x016;
const REG_RANGE_INTERMEASUREMENT: u16 = 0x01B;

/// New-sample flag in RESULT_INT_STATUS.
const INT_RANGE_READY: u8 = 0x04;

pub struct Vl6180x {
    bus: I2cBus,
    sample_ready: bool,
    last_mm: u32,
    last_t: u64,
    pub errors: u32,
}

impl Vl6180x {
    fn write_reg(bus: &I2cBus, reg: u16, val: u8) -> Result<(), I2cError> {
        bus.write(ADDR, &[(reg >> 8) as u8, (reg & 0xFF) as u8, val])
    }

    fn read_reg(bus: &I2cBus, reg: u16) -> Result<u8, I2cError> {
        let mut out = [0u8; 1];
        bus.write_read(ADDR, &[(reg >> 8) as u8, (reg & 0xFF) as u8], &mut out)?;
        Ok(out[0])
    }

    /// Starts continuous ranging at the fastest inter-measurement
    /// period (10 ms), with the range-ready interrupt as the
    /// new-sample flag.
    pub fn init(bus: I2cBus) -> Result<Vl6180x, I2cError> {
        let _ = Self::read_reg(&bus, REG_SYSTEM_FRESH_OUT_OF_RESET)?;
        Self::write_reg(&bus, REG_INTERCONFIG_GPIO, INT_RANGE_READY)?;
        Self::write_reg(&bus, REG_RANGE_INTERMEASUREMENT, 0)?; // 10 ms
        Self::write_reg(&bus, REG_SYSRANGE_START, 0x03)?; // continuous
        Ok(Vl6180x {
            bus,
            sample_ready: false,
            last_mm: 0,
            last_t: 0,
            errors: 0,
        })
    }

    pub fn task(&mut self) {
        if self.sample_ready {
            return;
        }
        match Self::read_reg(&self.bus, REG_RESULT_INT_STATUS) {
            Ok(status) if status & INT_RANGE_READY != 0 => {
                match Self::read_reg(&self.bus, REG_RESULT_RANGE_VAL) {
                    Ok(mm) => {
                        let _ = Self::write_reg(&self.bus, REG_INT_CLEAR, 0x07);
                        self.last_mm = mm as u32;
                        self.last_t = now_us();
                        self.sample_ready = true;
                    }
                    Err(_) => self.errors += 1,
                }
            }
            Ok(_) => {}
            Err(_) => self.errors += 1,
        }
    }

    pub fn is_sample_ready(&self) -> bool {
        self.sample_ready
    }

    pub fn read(&mut self) -> (u32, u64, bool) {
        let fresh = self.sample_ready;
        self.sample_ready = false;
        (self.last_mm, self.last_t, fresh)
    }
}

/// Plunger sensor adapter: millimeters map straight onto the raw
/// scale. ~82 mm of physical travel plus headroom gives a native
/// scale of 100.
pub struct TofPlungerSensor {
    dev: Vl6180x,
}

impl TofPlungerSensor {
    pub fn new(dev: Vl6180x) -> Self {
        TofPlungerSensor { dev }
    }

    pub fn task(&mut self) {
        self.dev.task();
    }
}

impl Sensor for TofPlungerSensor {
    fn name(&self) -> &'static str {
        "vl6180x"
    }

    fn native_scale(&self) -> u32 {
        100
    }

    fn is_ready(&mut self) -> bool {
        self.dev.is_sample_ready()
    }

    fn read_raw(&mut self) -> Option<RawSample> {
        let (mm, t, fresh) = self.dev.read();
        if !fresh {
            return None;
        }
        Some(RawSample {
            t,
            pos: mm.min(99),
        })
    }
}
