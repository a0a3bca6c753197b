//! Plunger position pipeline: sensor capability interface, calibration,
//! jitter filtering, and the firing-event state machine that turns raw
//! sensor readings into host-ready logical-axis samples.
//!
//! This crate is deliberately architecture-independent to allow for
//! testing on the host. Hardware sensor drivers live elsewhere and plug
//! in through the [`Sensor`] trait.
//!
//! # Unit systems
//!
//! Sensors report positions as non-negative integers in their own native
//! quanta; the only requirement is that the value be linear with respect
//! to physical displacement, with higher values conventionally meaning
//! further retraction. The pipeline converts native readings to the
//! *logical Z axis*: a signed 16-bit scale where 0 is the rest (park)
//! position, +32767 is maximum retraction, and negative values are
//! forward of rest. The mapping is a single linear function anchored at
//! the calibrated zero; the forward (negative) range reuses the same
//! scale factor rather than being stretched to fill the numeric range.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod filter;
pub mod pipeline;
pub mod prox;
pub mod quad;
pub mod scan;

pub use filter::JitterFilter;
pub use pipeline::{Pipeline, PipelineConfig};

/// One position reading from a sensor, in the sensor's native units.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RawSample {
    /// Microseconds since boot at the moment the physical measurement
    /// was taken (not when it was retrieved).
    pub t: u64,
    /// Position in native sensor quanta, 0 ..= native_scale.
    pub pos: u32,
}

/// A logical Z axis sample with its measurement time.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ZSample {
    pub t: u64,
    pub z: i16,
}

/// Phase of a firing (pull-and-release) event.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FiringState {
    /// No release motion detected.
    None,
    /// Fast forward motion from a retracted position; reported Z is
    /// frozen at the retraction point where the run started.
    Moving,
    /// The plunger crossed the rest position; reported Z holds at the
    /// calibrated forward limit.
    Fired,
    /// Post-launch hold at the rest position while the real plunger
    /// finishes bouncing.
    Settling,
}

impl Default for FiringState {
    fn default() -> Self {
        FiringState::None
    }
}

/// Calibration results mapping native sensor units to the logical axis.
///
/// When `calibrated` is set, `min <= zero < max` holds. `sensor_data` is
/// opaque to the generic layer; sensor drivers may stash private
/// calibration state there (a proximity sensor records its raw count
/// range, for example).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CalibrationData {
    pub calibrated: bool,
    pub min: u32,
    pub zero: u32,
    pub max: u32,
    /// Average duration of the release motions measured during the last
    /// calibration, in microseconds; zero if none were seen.
    pub firing_time_measured: u32,
    pub sensor_data: [u32; 8],
}

impl Default for CalibrationData {
    fn default() -> Self {
        CalibrationData {
            calibrated: false,
            min: 0,
            zero: 0,
            max: 0,
            firing_time_measured: 0,
            sensor_data: [0; 8],
        }
    }
}

/// Capability interface implemented by every plunger position sensor.
///
/// The set is small and stable: readiness polling, raw reads, scale
/// reporting, and calibration hooks. Long-running acquisition (imaging
/// sensors) happens asynchronously in the driver; `is_ready` lets the
/// task loop poll for completion without blocking.
pub trait Sensor {
    /// Short name, also used to key the persistent settings blob.
    fn name(&self) -> &'static str;

    /// Number of units in the raw reading range; readings run from 0 to
    /// `native_scale() - 1`. Assumed constant for the session.
    fn native_scale(&self) -> u32;

    /// Is a new reading available? Sensors with long cycle times return
    /// false until their current acquisition completes.
    fn is_ready(&mut self) -> bool {
        true
    }

    /// Take a raw reading. Returns `None` when no reading could be
    /// taken this cycle.
    fn read_raw(&mut self) -> Option<RawSample>;

    /// Should the generic layer run the hysteresis jitter filter on raw
    /// readings? Sensors that filter earlier in their own processing
    /// (in a domain where the signal is still linear) opt out.
    fn use_jitter_filter(&self) -> bool {
        true
    }

    /// Reset a relative sensor's reference point to the park position.
    /// Called after a long period without motion. Returns true if the
    /// reset was applied; absolute sensors return false.
    fn auto_zero(&mut self, cal: &CalibrationData) -> bool {
        let _ = cal;
        false
    }

    /// Apply previously saved calibration. Called at startup and after
    /// host-supplied calibration updates, even when uncalibrated.
    fn on_restore_calibration(&mut self, cal: &CalibrationData) {
        let _ = cal;
    }

    /// Calibration mode is starting; relative sensors set their
    /// reference point here.
    fn begin_calibration(&mut self, cal: &mut CalibrationData) {
        let _ = cal;
    }

    /// Calibration mode ended; sensors may finalize `cal.sensor_data`.
    fn end_calibration(&mut self, cal: &mut CalibrationData) {
        let _ = cal;
    }

    /// Set the exposure time for imaging sensors; others ignore it.
    fn set_integration_time(&mut self, us: u32) {
        let _ = us;
    }

    /// Select an image-analysis algorithm variant; see [`scan`].
    fn set_scan_mode(&mut self, mode: u8) {
        let _ = mode;
    }

    /// Average acquisition time per reading, in microseconds.
    fn avg_scan_time(&self) -> u32 {
        0
    }
}

/// Placeholder sensor used when no hardware is configured. Always
/// reports not-ready so the task loop ignores it; raw reads give the
/// idealized rest position (15% of full scale) should anyone ask.
pub struct NullSensor;

impl Sensor for NullSensor {
    fn name(&self) -> &'static str {
        "null"
    }

    fn native_scale(&self) -> u32 {
        65535
    }

    fn is_ready(&mut self) -> bool {
        false
    }

    fn read_raw(&mut self) -> Option<RawSample> {
        Some(RawSample { t: 0, pos: 9830 })
    }
}

pub use persist::{BlobLoad, BlobStore, StoreError};

/// Clips a wide intermediate value to the i16 HID axis range.
#[inline]
pub(crate) fn clip_i16(v: i64) -> i16 {
    if v < -32768 {
        -32768
    } else if v > 32767 {
        32767
    } else {
        v as i16
    }
}
