//! VCNL4010 IR proximity sensor.
//!
//! The chip measures the intensity of its own reflected IR pulse,
//! which falls off with the target distance; the conversion to a
//! linear position lives in `plunger::prox`. This driver owns the
//! register-level traffic: self-timed continuous proximity
//! measurements at the chip's top rate, polled for completion from
//! the task loop.

use plunger::prox::ProxCurve;
use plunger::{CalibrationData, JitterFilter, RawSample, Sensor};

use super::clock::now_us;
use super::i2c::{I2cBus, I2cError};

const ADDR: u8 = 0x13;

// Register map (partial).
const REG_COMMAND: u8 = 0x80;
const REG_PROX_RATE: u8 = 0x82;
const REG_LED_CURRENT: u8 = 0x83;
const REG_PROX_RESULT: u8 = 0x87;

// Command register bits.
const CMD_SELFTIMED_EN: u8 = 0x01;
const CMD_PROX_EN: u8 = 0x02;
const CMD_PROX_DATA_RDY: u8 = 0x20;

pub struct Vcnl4010 {
    bus: I2cBus,
    sample_ready: bool,
    last_count: u16,
    last_t: u64,
    /// Transient-failure counter; each failed poll is retried on the
    /// next task iteration.
    pub errors: u32,
}

impl Vcnl4010 {
    /// Configures continuous measurements: 250 samples/s, 200 mA LED
    /// drive (the reflective plunger tip is a small target).
    pub fn init(bus: I2cBus) -> Result<Vcnl4010, I2cError> {
        bus.write(ADDR, &[REG_PROX_RATE, 0x07])?;
        bus.write(ADDR, &[REG_LED_CURRENT, 20])?;
        bus.write(ADDR, &[REG_COMMAND, CMD_SELFTIMED_EN | CMD_PROX_EN])?;
        Ok(Vcnl4010 {
            bus,
            sample_ready: false,
            last_count: 0,
            last_t: 0,
            errors: 0,
        })
    }

    /// Task-loop poll: checks the data-ready flag and fetches a new
    /// proximity count when one is waiting.
    pub fn task(&mut self) {
        if self.sample_ready {
            return;
        }
        let mut status = [0u8; 1];
        match self.bus.write_read(ADDR, &[REG_COMMAND], &mut status) {
            Ok(()) if status[0] & CMD_PROX_DATA_RDY != 0 => {
                let mut raw = [0u8; 2];
                match self.bus.write_read(ADDR, &[REG_PROX_RESULT], &mut raw) {
                    Ok(()) => {
                        self.last_count = u16::from_be_bytes(raw);
                        self.last_t = now_us();
                        self.sample_ready = true;
                    }
                    Err(_) => self.errors += 1,
                }
            }
            Ok(()) => {}
            Err(_) => self.errors += 1,
        }
    }

    pub fn is_sample_ready(&self) -> bool {
        self.sample_ready
    }

    /// Returns the latest count; `true` when it is new since the last
    /// read.
    pub fn read(&mut self) -> (u16, u64, bool) {
        let fresh = self.sample_ready;
        self.sample_ready = false;
        (self.last_count, self.last_t, fresh)
    }
}

/// Plunger sensor adapter over the VCNL4010.
///
/// Jitter filtering happens here in the *count* domain rather than in
/// the generic layer: the inverse power-law conversion bends the
/// scale enough that a hysteresis window only behaves where the
/// signal is still linear in the measured quantity.
pub struct ProxPlungerSensor {
    dev: Vcnl4010,
    curve: ProxCurve,
    filter: JitterFilter,
    calibrating: bool,
}

impl ProxPlungerSensor {
    pub fn new(dev: Vcnl4010, power_law_exp: f32) -> Self {
        ProxPlungerSensor {
            dev,
            curve: ProxCurve::new(power_law_exp),
            filter: JitterFilter::new(0),
            calibrating: false,
        }
    }

    pub fn task(&mut self) {
        self.dev.task();
    }

    pub fn set_jitter_window(&mut self, w: u32) {
        self.filter.set_window(w);
    }
}

impl Sensor for ProxPlungerSensor {
    fn name(&self) -> &'static str {
        "vcnl4010"
    }

    fn native_scale(&self) -> u32 {
        // The fixed position axis from the power-law conversion.
        plunger::prox::MAX_POSITION + 1
    }

    fn is_ready(&mut self) -> bool {
        self.dev.is_sample_ready()
    }

    fn read_raw(&mut self) -> Option<RawSample> {
        let (count, t, fresh) = self.dev.read();
        if !fresh {
            return None;
        }
        let count = if self.calibrating {
            self.curve.calibration_sample(count as u32);
            count as u32
        } else {
            self.filter.apply(count as u32).min(65535)
        };
        Some(RawSample {
            t,
            pos: self.curve.position(count),
        })
    }

    fn use_jitter_filter(&self) -> bool {
        // Filtered locally, pre-conversion; see the type docs.
        false
    }

    fn on_restore_calibration(&mut self, cal: &CalibrationData) {
        self.curve.restore(cal);
    }

    fn begin_calibration(&mut self, _cal: &mut CalibrationData) {
        self.curve.begin_calibration(self.dev.last_count as u32);
        self.calibrating = true;
    }

    fn end_calibration(&mut self, cal: &mut CalibrationData) {
        self.curve.end_calibration(cal);
        self.calibrating = false;
    }
}
