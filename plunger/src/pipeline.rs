//! The generic plunger pipeline.
//!
//! One instance of [`Pipeline`] sits between a position sensor and the
//! HID reporting layer. On each main-loop tick it pulls at most one raw
//! sample, runs orientation correction and jitter filtering, converts
//! to the logical Z axis through the calibration map, estimates speed
//! from a three-point history, and runs the firing-event state machine
//! that makes fast release gestures reconstructible by the host.
//!
//! # Why the firing-event machine exists
//!
//! A released plunger bounces forward in 2-4 ms, while the host polls
//! HID reports every 1-10 ms. Sampling a signal faster than half the
//! polling rate aliases: the host sees essentially random positions and
//! computes a random launch impulse. The fix is to track the release on
//! the device, where sampling is fast enough, and feed the host a
//! synthetic position trajectory that its naive sample-and-difference
//! model integrates into the correct impulse: hold the retraction point
//! while the plunger is in flight, snap to the forward limit when it
//! crosses the rest position, then park at zero while the real plunger
//! settles.

use crate::filter::JitterFilter;
use crate::{clip_i16, BlobLoad, BlobStore, CalibrationData, FiringState, RawSample, Sensor, ZSample};

/// How long the calibration button must be held to start calibration.
const CAL_BUTTON_HOLD_US: u64 = 2_100_000;

/// Wall-time length of a calibration run.
const CAL_MODE_TIME_US: u64 = 15_000_000;

/// Widened Moving-state window used while calibrating, so firing events
/// are captured for the release-time statistics even if the user has
/// configured a short limit.
const CAL_FIRING_TIME_LIMIT_US: u64 = 100_000;

/// Default firing time limit.
pub const DEFAULT_FIRING_TIME_LIMIT_US: u32 = 50_000;

/// Hold times for the Fired and Settling phases, and for the Z0 peak
/// hold. These only need to cover a few HID polling cycles.
const FIRED_HOLD_US: u64 = 40_000;
const SETTLE_HOLD_US: u64 = 100_000;
const Z0_HOLD_US: u64 = 40_000;

/// Minimum spacing between samples admitted to the speed history.
/// Closer spacing makes the dt error dominate the speed estimate.
const MIN_SAMPLE_SPACING_US: u64 = 1_000;

/// Static configuration for a [`Pipeline`].
#[derive(Copy, Clone, Debug)]
pub struct PipelineConfig {
    /// Re-anchor relative sensors after this long without motion.
    pub auto_zero: bool,
    /// Inactivity period before auto-zeroing, in microseconds.
    pub auto_zero_interval_us: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            auto_zero: false,
            auto_zero_interval_us: 5_000_000,
        }
    }
}

/// Serialized settings blob, stored per sensor type so switching sensor
/// hardware starts from a clean slate. Versioning is by size.
pub const SETTINGS_BLOB_LEN: usize = 72;

/// Run-time adjustable settings, mirrored to persistent storage.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct Settings {
    jitter_window: u32,
    firing_time_limit: u32,
    integration_time: u32,
    manual_scale: u32,
    reverse: bool,
    scan_mode: u8,
    cal: CalibrationData,
}

impl Settings {
    fn to_bytes(&self) -> [u8; SETTINGS_BLOB_LEN] {
        let mut b = [0u8; SETTINGS_BLOB_LEN];
        b[0..4].copy_from_slice(&self.jitter_window.to_le_bytes());
        b[4..8].copy_from_slice(&self.firing_time_limit.to_le_bytes());
        b[8..12].copy_from_slice(&self.integration_time.to_le_bytes());
        b[12..16].copy_from_slice(&self.manual_scale.to_le_bytes());
        b[16] = self.reverse as u8;
        b[17] = self.scan_mode;
        b[20] = self.cal.calibrated as u8;
        b[24..28].copy_from_slice(&self.cal.min.to_le_bytes());
        b[28..32].copy_from_slice(&self.cal.zero.to_le_bytes());
        b[32..36].copy_from_slice(&self.cal.max.to_le_bytes());
        b[36..40].copy_from_slice(&self.cal.firing_time_measured.to_le_bytes());
        for (i, w) in self.cal.sensor_data.iter().enumerate() {
            b[40 + i * 4..44 + i * 4].copy_from_slice(&w.to_le_bytes());
        }
        b
    }

    fn from_bytes(b: &[u8]) -> Option<Settings> {
        if b.len() != SETTINGS_BLOB_LEN {
            return None;
        }
        let u32_at = |o: usize| u32::from_le_bytes([b[o], b[o + 1], b[o + 2], b[o + 3]]);
        let mut cal = CalibrationData {
            calibrated: b[20] != 0,
            min: u32_at(24),
            zero: u32_at(28),
            max: u32_at(32),
            firing_time_measured: u32_at(36),
            sensor_data: [0; 8],
        };
        for i in 0..8 {
            cal.sensor_data[i] = u32_at(40 + i * 4);
        }
        Some(Settings {
            jitter_window: u32_at(0),
            firing_time_limit: u32_at(4),
            integration_time: u32_at(8),
            manual_scale: u32_at(12),
            reverse: b[16] != 0,
            scan_mode: b[17],
            cal,
        })
    }
}

/// The plunger pipeline. See the module docs for the data flow.
pub struct Pipeline {
    config: PipelineConfig,

    // Calibration state.
    cal: CalibrationData,
    cal_mode: bool,
    cal_auto_save: bool,
    t_cal_mode_start: u64,
    cal_button: bool,
    t_cal_button_push: u64,
    cal_zero_anchor: RawSample,
    cal_zero_sum: u64,
    cal_zero_count: u32,
    release_time_sum: u64,
    release_time_count: u32,

    // Raw-domain processing.
    jitter: JitterFilter,
    reverse: bool,
    manual_scale: u32,
    integration_time: u32,
    scan_mode: u8,
    native_scale: u32,
    /// 16.16 fixed-point factor mapping (raw - zero) to logical units.
    scale_factor: i32,
    last_raw: RawSample,

    // Logical-axis state.
    z_cur: ZSample,
    z0_prv: ZSample,
    z0_cur: ZSample,
    z0_nxt: ZSample,
    z0_reported: ZSample,
    z0_hold: ZSample,
    speed_hold: i16,
    z_forward_start: ZSample,
    speed_cur: i16,
    speed_prv: i16,

    // Firing-event state machine.
    firing: FiringState,
    firing_time_limit: u32,
    t_firing_state: u64,

    // Auto-zero scheduling.
    t_auto_zero: u64,

    // A settings save was requested (end of an auto-save calibration);
    // the owner performs the flash write from task context.
    pending_save: bool,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Pipeline {
            config,
            cal: CalibrationData::default(),
            cal_mode: false,
            cal_auto_save: false,
            t_cal_mode_start: 0,
            cal_button: false,
            t_cal_button_push: 0,
            cal_zero_anchor: RawSample::default(),
            cal_zero_sum: 0,
            cal_zero_count: 0,
            release_time_sum: 0,
            release_time_count: 0,
            jitter: JitterFilter::new(0),
            reverse: false,
            manual_scale: 100,
            integration_time: 0,
            scan_mode: 0,
            native_scale: 0,
            scale_factor: 32767,
            last_raw: RawSample::default(),
            z_cur: ZSample::default(),
            z0_prv: ZSample::default(),
            z0_cur: ZSample::default(),
            z0_nxt: ZSample::default(),
            z0_reported: ZSample::default(),
            z0_hold: ZSample::default(),
            speed_hold: 0,
            z_forward_start: ZSample::default(),
            speed_cur: 0,
            speed_prv: 0,
            firing: FiringState::None,
            firing_time_limit: DEFAULT_FIRING_TIME_LIMIT_US,
            t_firing_state: 0,
            t_auto_zero: u64::MAX,
            pending_save: false,
        }
    }

    /// One-time setup after the sensor is configured: caches the native
    /// scale and restores saved settings (or defaults).
    pub fn init(&mut self, sensor: &mut dyn Sensor, store: &mut dyn BlobStore) {
        self.native_scale = sensor.native_scale();
        self.restore_settings(sensor, store);
    }

    // --- report accessors -------------------------------------------------

    /// Launch-corrected Z, for hosts using the position-only model.
    pub fn z(&self) -> i16 {
        self.z_cur.z
    }

    /// Uncorrected Z (calibrated and filtered only), for hosts that use
    /// the speed input. Subject to the post-bounce peak hold.
    pub fn z0(&self) -> i16 {
        self.z0_reported.z
    }

    /// Speed in logical units per 10 ms.
    pub fn speed(&self) -> i16 {
        self.speed_cur
    }

    /// Latest raw sensor reading (orientation- and jitter-corrected).
    pub fn raw(&self) -> u32 {
        self.last_raw.pos
    }

    pub fn firing_state(&self) -> FiringState {
        self.firing
    }

    /// A firing event is only certain once the Settling phase begins;
    /// earlier phases can still be aborted by the user.
    pub fn is_firing(&self) -> bool {
        self.firing == FiringState::Settling
    }

    pub fn is_calibrated(&self) -> bool {
        self.cal.calibrated
    }

    pub fn is_cal_mode(&self) -> bool {
        self.cal_mode
    }

    pub fn calibration(&self) -> &CalibrationData {
        &self.cal
    }

    /// Average measured release time from the current session's
    /// calibration, in microseconds; zero if none were recorded.
    pub fn average_release_time(&self) -> u32 {
        if self.release_time_count != 0 {
            (self.release_time_sum / self.release_time_count as u64) as u32
        } else {
            0
        }
    }

    /// True once when a deferred settings save has been requested.
    pub fn take_pending_save(&mut self) -> bool {
        let p = self.pending_save;
        self.pending_save = false;
        p
    }

    // --- run-time settings ------------------------------------------------

    pub fn set_jitter_window(&mut self, w: u32) {
        self.jitter.set_window(w);
    }

    pub fn set_firing_time_limit(&mut self, us: u32) {
        self.firing_time_limit = us;
    }

    pub fn set_manual_scale(&mut self, percent: u32) {
        self.manual_scale = percent;
    }

    pub fn set_reverse_orientation(&mut self, reverse: bool) {
        self.reverse = reverse;
    }

    pub fn is_reverse_orientation(&self) -> bool {
        self.reverse
    }

    pub fn set_integration_time(&mut self, sensor: &mut dyn Sensor, us: u32) {
        sensor.set_integration_time(us);
        self.integration_time = us;
    }

    pub fn set_scan_mode(&mut self, sensor: &mut dyn Sensor, mode: u8) {
        sensor.set_scan_mode(mode);
        self.scan_mode = mode;
    }

    // --- calibration ------------------------------------------------------

    /// Tracks the logical calibration button; holding it past the
    /// threshold starts an auto-saving calibration run.
    pub fn push_cal_button(&mut self, on: bool, now: u64) {
        if on && !self.cal_button {
            self.t_cal_button_push = now;
        }
        self.cal_button = on;
    }

    /// Starts or stops calibration mode. With `auto_save`, the settings
    /// are committed when the mode ends (however it ends).
    pub fn set_cal_mode(&mut self, start: bool, auto_save: bool, sensor: &mut dyn Sensor, now: u64) {
        if start == self.cal_mode {
            return;
        }

        if start {
            self.t_cal_mode_start = now;

            // The only range seen so far is the current position.
            self.cal.min = self.last_raw.pos;
            self.cal.zero = self.last_raw.pos;
            self.cal.max = self.last_raw.pos;

            self.cal_zero_sum = self.cal.zero as u64;
            self.cal_zero_count = 1;
            self.release_time_sum = 0;
            self.release_time_count = 0;

            sensor.begin_calibration(&mut self.cal);
            self.cal_zero_anchor = self.last_raw;
            self.on_update_cal();
        } else {
            // Rest position = average of the accumulated still samples.
            self.cal.zero = (self.cal_zero_sum / self.cal_zero_count as u64) as u32;

            if self.cal.max <= self.cal.zero {
                // The range never opened up; something went wrong.
                // Fall back to defaults and mark uncalibrated.
                self.cal.min = 0;
                self.cal.max = self.native_scale;
                self.cal.zero = self.native_scale / 6;
                self.cal.calibrated = false;
            } else {
                self.cal.calibrated = true;
            }

            self.cal.firing_time_measured = if self.release_time_count != 0 {
                (self.release_time_sum / self.release_time_count as u64) as u32
            } else {
                0
            };

            sensor.end_calibration(&mut self.cal);
            self.on_update_cal();

            if auto_save || self.cal_auto_save {
                self.pending_save = true;
            }
        }

        self.cal_mode = start;
        self.cal_auto_save = auto_save;
    }

    /// Applies host-supplied calibration data directly.
    pub fn set_calibration(&mut self, sensor: &mut dyn Sensor, cal: &CalibrationData) {
        self.cal = *cal;
        self.on_update_cal();
        sensor.on_restore_calibration(&self.cal);
    }

    /// Recomputes the raw-to-logical scale factor from the calibration
    /// anchors. The factor is anchored on the retraction half only; the
    /// forward (negative) half reuses it so that physical distance maps
    /// uniformly across the whole axis.
    fn on_update_cal(&mut self) {
        self.scale_factor = if self.cal.max > self.cal.zero {
            (32767i64 * 65536 / (self.cal.max - self.cal.zero) as i64) as i32
        } else {
            32767
        };
    }

    /// Converts a raw reading to logical units through the calibration
    /// map and the manual scaling adjustment.
    pub fn apply_calibration(&mut self, raw: u32) -> i16 {
        let pos = raw as i64 - self.cal.zero as i64;
        let pos = (pos * self.scale_factor as i64) / 65536;
        let pos = (pos * self.manual_scale as i64) / 100;
        clip_i16(pos)
    }

    // --- persistence ------------------------------------------------------

    /// Writes the live settings to the per-sensor blob.
    pub fn commit_settings(&mut self, sensor: &dyn Sensor, store: &mut dyn BlobStore) -> bool {
        let blob = self.live_settings().to_bytes();
        store.save(sensor.name(), &blob).is_ok()
    }

    fn live_settings(&self) -> Settings {
        Settings {
            jitter_window: self.jitter.window,
            firing_time_limit: self.firing_time_limit,
            integration_time: self.integration_time,
            manual_scale: self.manual_scale,
            reverse: self.reverse,
            scan_mode: self.scan_mode,
            cal: self.cal,
        }
    }

    /// Restores settings from the blob store. A missing blob is not an
    /// error: defaults apply (full-scale range with the rest point at
    /// the 1/6 mark, matching standard plunger geometry). Returns false
    /// only on a store failure.
    pub fn restore_settings(&mut self, sensor: &mut dyn Sensor, store: &mut dyn BlobStore) -> bool {
        let mut buf = [0u8; SETTINGS_BLOB_LEN];
        let (loaded, ok) = match store.load(sensor.name(), &mut buf) {
            Ok(BlobLoad::Loaded(n)) => (Settings::from_bytes(&buf[..n]), true),
            Ok(BlobLoad::Missing) => (None, true),
            Err(_) => (None, false),
        };

        let settings = loaded.unwrap_or_else(|| {
            let mut s = Settings::default();
            s.cal.min = 0;
            s.cal.max = self.native_scale;
            s.cal.zero = self.native_scale / 6;
            s
        });

        self.cal = settings.cal;
        self.on_update_cal();
        sensor.on_restore_calibration(&self.cal);

        self.set_jitter_window(settings.jitter_window);
        self.set_firing_time_limit(if settings.firing_time_limit != 0 {
            settings.firing_time_limit
        } else {
            DEFAULT_FIRING_TIME_LIMIT_US
        });
        self.set_integration_time(sensor, settings.integration_time);
        self.set_reverse_orientation(settings.reverse);
        self.set_scan_mode(sensor, settings.scan_mode);
        self.manual_scale = if settings.manual_scale == 0 {
            100
        } else {
            settings.manual_scale
        };

        ok
    }

    // --- the periodic task ------------------------------------------------

    /// Reads one sample with orientation and jitter corrections.
    fn read_sensor(&mut self, sensor: &mut dyn Sensor) -> Option<RawSample> {
        if !sensor.is_ready() {
            return None;
        }
        let mut s = sensor.read_raw()?;

        if self.reverse {
            s.pos = self.native_scale.saturating_sub(s.pos);
        }
        if sensor.use_jitter_filter() {
            s.pos = self.jitter.apply(s.pos);
        }

        self.last_raw = s;
        Some(s)
    }

    /// Main-loop tick: run the whole pipeline once.
    pub fn task(&mut self, sensor: &mut dyn Sensor, now: u64) {
        // Start a calibration run if the button has been held long
        // enough; button-initiated runs auto-save, since the dedicated
        // button is meant to be a one-step interface.
        if !self.cal_mode && self.cal_button && now > self.t_cal_button_push + CAL_BUTTON_HOLD_US {
            self.set_cal_mode(true, true, sensor, now);
        }

        // Calibration runs are strictly timed.
        if self.cal_mode && now > self.t_cal_mode_start + CAL_MODE_TIME_US {
            self.set_cal_mode(false, false, sensor, now);
        }

        let s = match self.read_sensor(sensor) {
            Some(s) => s,
            None => return,
        };

        let mut effective_firing_limit = self.firing_time_limit as u64;
        let z_new = if self.cal_mode {
            // Track the observed range.
            if s.pos > self.cal.max {
                self.cal.max = s.pos;
            }
            if s.pos < self.cal.min {
                self.cal.min = s.pos;
            }

            // Accumulate the rest-position average: readings in the
            // lower 40% of the range that stay within 1% of the anchor
            // for 200 ms count as "at rest".
            if s.pos < self.native_scale / 10 * 4 {
                let moved = (s.pos as i64 - self.cal_zero_anchor.pos as i64).abs();
                if moved < (self.native_scale / 100) as i64 {
                    if s.t - self.cal_zero_anchor.t > 200_000 {
                        self.cal_zero_sum += s.pos as u64;
                        self.cal_zero_count += 1;
                    }
                } else {
                    self.cal_zero_anchor = s;
                }
            }

            self.on_update_cal();

            // The maximum isn't known yet, so provisionally scale as
            // though readings span the rest of the native range.
            let denom = (self.native_scale as i64 - self.cal.zero as i64).max(1);
            let z = (s.pos as i64 - self.cal.zero as i64) * 32767 / denom;

            // Keep the Moving window wide during calibration so the
            // release-time statistics catch every firing event.
            effective_firing_limit = CAL_FIRING_TIME_LIMIT_US;

            ZSample {
                t: s.t,
                z: clip_i16(z),
            }
        } else {
            ZSample {
                t: s.t,
                z: self.apply_calibration(s.pos),
            }
        };

        // Too close to the previous history sample: skip, to keep the
        // dt in the speed estimate meaningful.
        if z_new.t.wrapping_sub(self.z0_nxt.t) < MIN_SAMPLE_SPACING_US {
            return;
        }

        // Shift the three-point history.
        self.z0_prv = self.z0_cur;
        self.z0_cur = self.z0_nxt;
        self.z0_nxt = z_new;
        self.speed_prv = self.speed_cur;

        // Central-difference speed at the current sample, in logical
        // units per 10 ms. That unit keeps real plunger speeds (about
        // 20000 on this scale at the fast end) snug in an i16.
        let dt = (self.z0_nxt.t - self.z0_prv.t) as i64;
        let dz = (self.z0_nxt.z as i64 - self.z0_prv.z as i64) * 10_000;
        self.speed_cur = clip_i16(dz / dt.max(1));

        // Any motion re-arms the auto-zero timer.
        if self.config.auto_zero && self.z0_prv.z != self.z0_cur.z {
            self.t_auto_zero = now + self.config.auto_zero_interval_us;
        }

        self.z0_reported = self.z0_cur;

        // Z0 peak hold: when the bounce off the barrel spring first
        // shows up (direction reversal below the rest point during a
        // firing event), freeze the reported Z0 and speed at the peak
        // for a few polling cycles, so the host is guaranteed to see
        // the full forward excursion despite its slow sampling.
        if self.z0_cur.t < self.z0_hold.t {
            self.z0_reported.z = self.z0_hold.z;
            self.speed_cur = self.speed_hold;
        } else if (self.firing == FiringState::Moving || self.firing == FiringState::Fired)
            && self.z0_prv.z < 0
            && self.z0_cur.z > self.z0_prv.z
        {
            self.z0_hold.z = self.z0_prv.z;
            self.z0_hold.t = self.z0_cur.t + Z0_HOLD_US;
            self.z0_reported.z = self.z0_prv.z;
            self.speed_hold = self.speed_prv;
        }

        // Tentative processed reading; the state machine below may
        // override it.
        self.z_cur = self.z0_cur;

        // Rearward motion restarts the candidate forward-run origin.
        if self.speed_cur > 0 {
            self.z_forward_start = self.z0_cur;
        }

        match self.firing {
            FiringState::None => {
                // Forward acceleration from at least 1/6 retraction
                // starts a candidate firing event. Freeze the report at
                // the run's starting point so the host reliably sees
                // the full retraction amount.
                if self.z_cur.z >= 32767 / 6 && self.speed_cur < 0 {
                    self.firing = FiringState::Moving;
                    self.t_firing_state = self.z_cur.t;
                    self.z_cur = self.z_forward_start;
                }
            }
            FiringState::Moving => {
                if self.z_cur.z <= 0 {
                    // Crossed the rest point: this is the moment the
                    // real plunger strikes the ball. Report the forward
                    // limit so the simulator fires now.
                    self.firing = FiringState::Fired;
                    self.t_firing_state = self.z_cur.t;
                    let fired_t = self.z_cur.t;
                    self.z_cur.z = self.apply_calibration(self.cal.min);

                    if self.cal_mode {
                        self.release_time_sum += fired_t - self.z_forward_start.t;
                        self.release_time_count += 1;
                    }
                } else if self.speed_cur < 0
                    && self.z_cur.t < self.z_forward_start.t + effective_firing_limit
                {
                    // Still accelerating forward within the window:
                    // keep reporting the starting point.
                    self.z_cur = self.z_forward_start;
                } else {
                    // Stalled or too slow to be a release; the user is
                    // moving it by hand.
                    self.firing = FiringState::None;
                    self.t_firing_state = self.z_cur.t;
                    self.z_forward_start = self.z_cur;
                }
            }
            FiringState::Fired => {
                if self.z_cur.t < self.t_firing_state + FIRED_HOLD_US {
                    self.z_cur.z = self.apply_calibration(self.cal.min);
                } else {
                    self.firing = FiringState::Settling;
                    self.t_firing_state = self.z_cur.t;
                    self.z_cur.z = 0;
                }
            }
            FiringState::Settling => {
                if self.z_cur.t < self.t_firing_state + SETTLE_HOLD_US {
                    self.z_cur.z = 0;
                } else {
                    self.firing = FiringState::None;
                    self.t_firing_state = self.z_cur.t;
                }
            }
        }

        // Auto-zero: after the configured stretch with no change in
        // position, re-anchor relative sensors at the park position and
        // flatten the history so the correction doesn't read as motion.
        if self.config.auto_zero && now >= self.t_auto_zero {
            if sensor.auto_zero(&self.cal) {
                self.z_cur.z = 0;
                self.z0_prv.z = 0;
                self.z0_cur.z = 0;
                self.z0_nxt.z = 0;
                self.z0_reported.z = 0;
            }
            // One shot per quiet period.
            self.t_auto_zero = u64::MAX;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::vec::Vec;

    /// Sensor fed from a script of samples.
    struct ScriptSensor {
        samples: Vec<RawSample>,
        next: usize,
        scale: u32,
        zeroed: bool,
        relative: bool,
    }

    impl ScriptSensor {
        fn new(scale: u32, samples: &[(u64, u32)]) -> Self {
            ScriptSensor {
                samples: samples.iter().map(|&(t, pos)| RawSample { t, pos }).collect(),
                next: 0,
                scale,
                zeroed: false,
                relative: false,
            }
        }
    }

    impl Sensor for ScriptSensor {
        fn name(&self) -> &'static str {
            "script"
        }
        fn native_scale(&self) -> u32 {
            self.scale
        }
        fn is_ready(&mut self) -> bool {
            self.next < self.samples.len()
        }
        fn read_raw(&mut self) -> Option<RawSample> {
            let mut s = *self.samples.get(self.next)?;
            self.next += 1;
            if self.zeroed {
                // A re-anchored relative sensor reads at the rest
                // point from then on.
                s.pos = 2000;
            }
            Some(s)
        }
        fn auto_zero(&mut self, _cal: &CalibrationData) -> bool {
            if self.relative {
                self.zeroed = true;
            }
            self.relative
        }
    }

    #[derive(Default)]
    struct MemStore {
        blobs: HashMap<String, Vec<u8>>,
    }

    impl BlobStore for MemStore {
        fn save(&mut self, name: &str, blob: &[u8]) -> Result<(), crate::StoreError> {
            self.blobs.insert(name.to_string(), blob.to_vec());
            Ok(())
        }
        fn load(&mut self, name: &str, buf: &mut [u8]) -> Result<BlobLoad, crate::StoreError> {
            match self.blobs.get(name) {
                Some(b) => {
                    buf[..b.len()].copy_from_slice(b);
                    Ok(BlobLoad::Loaded(b.len()))
                }
                None => Ok(BlobLoad::Missing),
            }
        }
    }

    /// Pipeline with an identity-like calibration: zero at 2000, one
    /// logical unit per raw unit (max - zero = 32767).
    fn calibrated_pipeline() -> Pipeline {
        let mut p = Pipeline::new(PipelineConfig::default());
        p.native_scale = 65535;
        p.cal = CalibrationData {
            calibrated: true,
            min: 0,
            zero: 2000,
            max: 34767,
            firing_time_measured: 0,
            sensor_data: [0; 8],
        };
        p.on_update_cal();
        p
    }

    fn run(p: &mut Pipeline, sensor: &mut ScriptSensor) -> Vec<(u64, i16, i16, i16, FiringState)> {
        let mut out = Vec::new();
        while sensor.next < sensor.samples.len() {
            let now = sensor.samples[sensor.next].t;
            p.task(sensor, now);
            out.push((now, p.z(), p.z0(), p.speed(), p.firing_state()));
        }
        out
    }

    #[test]
    fn scale_is_linear_over_retraction_range() {
        let mut p = calibrated_pipeline();
        // A range that doesn't divide the logical scale evenly, to
        // exercise the fixed-point rounding.
        p.cal.zero = 1000;
        p.cal.max = 47000;
        p.on_update_cal();
        let (zero, max) = (p.cal.zero, p.cal.max);
        for raw in (zero..=max).step_by(97) {
            let z = p.apply_calibration(raw) as i64;
            let exact = 32767 * (raw - zero) as i64;
            let got = z * (max - zero) as i64;
            assert!(
                (got - exact).abs() <= (max - zero) as i64,
                "raw {}: {} vs {}",
                raw,
                got,
                exact
            );
        }
    }

    #[test]
    fn history_timestamps_are_ordered() {
        let mut p = calibrated_pipeline();
        let samples: Vec<(u64, u32)> = (0..50).map(|i| (i * 1500, 2000 + i as u32 * 10)).collect();
        let mut s = ScriptSensor::new(65535, &samples);
        while s.next < s.samples.len() {
            let now = s.samples[s.next].t;
            p.task(&mut s, now);
            assert!(p.z0_prv.t <= p.z0_cur.t && p.z0_cur.t <= p.z0_nxt.t);
        }
    }

    #[test]
    fn firing_event_reconstruction() {
        // Pull-and-release: rest at the 1/2 retraction point, then a
        // fast forward run that crosses the rest position and bounces.
        let mut p = calibrated_pipeline();
        let mut samples = vec![
            (0, 18384),
            (1000, 18384),
            (3000, 16000),
            (5000, 10000),
            (7000, 2000),
            (9000, 1200),
            (11000, 2000),
        ];
        // Settled at rest from then on.
        for t in (15000..250_000).step_by(5000) {
            samples.push((t, 2000));
        }
        let mut s = ScriptSensor::new(65535, &samples);
        let log = run(&mut p, &mut s);

        let at = |t: u64| log.iter().find(|e| e.0 == t).unwrap().clone();

        // During the forward run the report freezes at the retraction
        // point where the run started.
        assert_eq!(at(5000).1, 16384);
        assert_eq!(at(5000).4, FiringState::Moving);
        assert_eq!(at(7000).1, 16384);

        // Crossing the rest point snaps the report to the calibrated
        // forward limit.
        assert_eq!(at(9000).1, -2000);
        assert_eq!(at(9000).4, FiringState::Fired);

        // The forward limit holds while the current sample is within
        // the Fired window (entry at sample time 7000).
        for e in log.iter().filter(|e| e.0 >= 9000 && e.0 < 45000) {
            assert_eq!(e.1, -2000, "at t={}", e.0);
        }

        // Then the report parks at zero through the Settling phase...
        let settling: Vec<_> = log.iter().filter(|e| e.0 > 55000 && e.0 < 140_000).collect();
        assert!(!settling.is_empty());
        for e in &settling {
            assert_eq!(e.1, 0, "at t={}", e.0);
            assert_eq!(e.4, FiringState::Settling, "at t={}", e.0);
        }

        // ...and finally returns to live readings.
        let tail = log.last().unwrap();
        assert_eq!(tail.4, FiringState::None);
        assert_eq!(tail.1, 0);
    }

    #[test]
    fn z0_peak_is_held_through_the_bounce() {
        let mut p = calibrated_pipeline();
        let mut samples = vec![
            (0, 18384),
            (1000, 18384),
            (3000, 16000),
            (5000, 10000),
            (7000, 2000),
            (9000, 1200), // peak forward: z0 = -800
            (11000, 2000),
        ];
        for t in (13000..80_000).step_by(2000) {
            samples.push((t, 2000));
        }
        let mut s = ScriptSensor::new(65535, &samples);
        let log = run(&mut p, &mut s);

        // The tick that sees the direction reversal (prv = -800,
        // cur = 0) latches the peak; it stays latched for 40 ms of
        // sample time past the reversal sample.
        let held: Vec<_> = log.iter().filter(|e| e.0 >= 15000 && e.0 <= 49000).collect();
        assert!(!held.is_empty());
        for e in &held {
            assert_eq!(e.2, -800, "z0 at t={}", e.0);
        }
        // After the hold expires, Z0 goes back to live readings.
        assert_eq!(log.last().unwrap().2, 0);
    }

    #[test]
    fn moving_state_times_out_on_slow_forward_motion() {
        // A slow, steady push forward: enters Moving (negative speed
        // from half retraction) but must fall back to None within the
        // firing time limit instead of sticking.
        let mut p = calibrated_pipeline();
        let samples: Vec<(u64, u32)> = (0..60)
            .map(|i| (i as u64 * 2000, 18384 - i as u32 * 100))
            .collect();
        let mut s = ScriptSensor::new(65535, &samples);

        let mut entered_at = None;
        let mut exited_within_limit = false;
        while s.next < s.samples.len() {
            let now = s.samples[s.next].t;
            p.task(&mut s, now);
            match (entered_at, p.firing_state()) {
                (None, FiringState::Moving) => entered_at = Some(now),
                (Some(t0), FiringState::None) => {
                    // Sample cadence adds at most a couple of periods
                    // of slack past the nominal limit.
                    assert!(now - t0 <= DEFAULT_FIRING_TIME_LIMIT_US as u64 + 6000);
                    exited_within_limit = true;
                    break;
                }
                (Some(_), FiringState::Fired) => {
                    exited_within_limit = true;
                    break;
                }
                _ => {}
            }
        }
        assert!(entered_at.is_some(), "never entered Moving");
        assert!(exited_within_limit, "Moving never exited");
    }

    #[test]
    fn auto_zero_fires_after_quiet_period() {
        let mut p = calibrated_pipeline();
        p.config.auto_zero = true;
        p.config.auto_zero_interval_us = 100_000;

        // Some motion, then a long still stretch at an off-rest value.
        let mut samples = vec![(0, 2000), (2000, 3000), (4000, 4000)];
        for t in (6000..300_000).step_by(2000) {
            samples.push((t, 4000));
        }
        let mut s = ScriptSensor::new(65535, &samples);
        s.relative = true;

        while s.next < s.samples.len() {
            let now = s.samples[s.next].t;
            p.task(&mut s, now);
        }
        assert!(s.zeroed, "sensor auto-zero never invoked");
        assert_eq!(p.z0(), 0);
        assert_eq!(p.z(), 0);
    }

    #[test]
    fn calibration_run_measures_range_and_rest_point() {
        let mut p = Pipeline::new(PipelineConfig::default());
        let mut store = MemStore::default();

        // Rest near 10000, one full pull to 60000, then rest again.
        let mut samples: Vec<(u64, u32)> = Vec::new();
        let mut t = 0;
        for _ in 0..40 {
            samples.push((t, 10000));
            t += 10_000;
        }
        for pos in (10000..60000).step_by(5000) {
            samples.push((t, pos));
            t += 10_000;
        }
        samples.push((t, 60000));
        t += 10_000;
        for _ in 0..40 {
            samples.push((t, 10000));
            t += 10_000;
        }

        let mut s = ScriptSensor::new(65535, &samples);
        p.init(&mut s, &mut store);

        // Prime last_raw, then start a calibration run.
        let now0 = s.samples[0].t;
        p.task(&mut s, now0);
        p.set_cal_mode(true, false, &mut s, now0);

        while s.next < s.samples.len() {
            let now = s.samples[s.next].t;
            p.task(&mut s, now);
        }
        p.set_cal_mode(false, true, &mut s, t);

        assert!(p.is_calibrated());
        assert_eq!(p.calibration().max, 60000);
        assert!(p.calibration().min <= 10000);
        let zero = p.calibration().zero;
        assert!(
            (zero as i64 - 10000).abs() <= 20,
            "rest point {} not near 10000",
            zero
        );
        assert!(p.take_pending_save());
        assert!(!p.take_pending_save());
    }

    #[test]
    fn settings_round_trip_through_store() {
        let mut store = MemStore::default();
        let mut s = ScriptSensor::new(65535, &[]);

        let mut p = Pipeline::new(PipelineConfig::default());
        p.native_scale = 65535;
        p.set_jitter_window(12);
        p.set_firing_time_limit(60_000);
        p.set_reverse_orientation(true);
        p.set_manual_scale(95);
        p.cal = CalibrationData {
            calibrated: true,
            min: 5,
            zero: 1000,
            max: 50_000,
            firing_time_measured: 31_000,
            sensor_data: [7; 8],
        };
        assert!(p.commit_settings(&s, &mut store));

        let mut q = Pipeline::new(PipelineConfig::default());
        q.native_scale = 65535;
        assert!(q.restore_settings(&mut s, &mut store));
        assert_eq!(q.calibration(), &p.cal);
        assert_eq!(q.jitter.window, 12);
        assert_eq!(q.firing_time_limit, 60_000);
        assert!(q.is_reverse_orientation());
        assert_eq!(q.manual_scale, 95);
    }

    #[test]
    fn missing_settings_blob_applies_defaults() {
        let mut store = MemStore::default();
        let mut s = ScriptSensor::new(1546, &[]);
        let mut p = Pipeline::new(PipelineConfig::default());
        p.init(&mut s, &mut store);
        assert!(!p.is_calibrated());
        assert_eq!(p.calibration().max, 1546);
        assert_eq!(p.calibration().zero, 1546 / 6);
        assert_eq!(p.firing_time_limit, DEFAULT_FIRING_TIME_LIMIT_US);
        assert_eq!(p.manual_scale, 100);
    }
}
