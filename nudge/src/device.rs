//! The nudge device: broker between the accelerometer driver and the
//! USB reporting layer.
//!
//! Each task tick pulls one sample, rotates it into the cabinet frame,
//! feeds the rolling averagers, evaluates auto-centering, filters each
//! axis, updates the decaying velocity integral, and accumulates into
//! any active averaging views.
//!
//! # Centering
//!
//! Gravity projects a constant term onto every axis of a tilted
//! sensor. The term is constant as long as the tilt is (the device is
//! bolted to the cabinet), so it can be measured and subtracted: when
//! readings stay inside the quiet thresholds around the current
//! rolling average for the full centering interval, the cabinet is
//! considered stationary and that average becomes the new center.
//!
//! # Velocity
//!
//! Integrating acceleration gives a velocity reading that simulators
//! consume more faithfully than raw samples, because we integrate at
//! the sensor rate while the host only sees polled snapshots. Any bias
//! in the samples would integrate without bound, so the integral
//! decays with a configured half-life, encoding the assumption that
//! the cabinet as a whole is stationary.

use crate::average::RollingAverage;
use crate::filter::AxisFilter;
use crate::{clip_i16, clip_i16_f, Accelerometer, Xyz};
use libm::{powf, sqrtf};
use persist::{BlobLoad, BlobStore};
use smart_default::SmartDefault;

/// Maximum number of averaging views; one per reporting USB device.
pub const MAX_VIEWS: usize = 4;

/// Wall-time length of a noise calibration run.
const CAL_MODE_TIME_US: u64 = 15_000_000;

/// Default quiet thresholds: 1% of full scale on the horizontal axes,
/// 3% on Z, whose noise rides on the 1g standing bias.
const DEFAULT_QUIET_XY: i32 = 328;
const DEFAULT_QUIET_Z: i32 = 984;

/// Sigma multiplier applied to measured noise when calibrating the
/// quiet thresholds.
const QUIET_SIGMA: f32 = 3.0;

const MM_PER_S2_PER_G: f32 = 9806.65;

/// Name of the persistent settings blob.
const SETTINGS_NAME: &str = "nudge";
pub const SETTINGS_BLOB_LEN: usize = 40;

/// Static configuration, normally populated at boot.
#[derive(Copy, Clone, Debug, SmartDefault)]
pub struct NudgeConfig {
    #[default = true]
    pub auto_center: bool,
    /// Quiet time required before a center is adopted, microseconds.
    #[default = 4_000_000]
    pub auto_center_interval_us: u64,
    /// Sensor-to-cabinet rotation, column-major with entries in
    /// {-1, 0, 1}: logical x = dot(sample, transform[0..3]), and so
    /// on. Right angles only, which keeps the math in integers.
    #[default([1, 0, 0, 0, 1, 0, 0, 0, 1])]
    pub transform: [i8; 9],
    /// DC blocker adaptation time constant in seconds; 0 disables.
    #[default = 0.0]
    pub dc_time_s: f32,
    /// Hysteresis window applied to each filtered axis; 0 disables.
    #[default = 0]
    pub jitter_window: i32,
    /// Velocity half-life, milliseconds.
    #[default = 2000]
    pub velocity_decay_ms: u32,
    /// INT16 units per mm/s in velocity reports.
    #[default = 100]
    pub velocity_scale: u32,
}

/// Averaging view handle; see [`NudgeDevice::create_view`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ViewId(usize);

#[derive(Copy, Clone, Debug, Default)]
struct View {
    in_use: bool,
    sum: Xyz,
    n: i32,
    snap: (i16, i16, i16),
}

pub struct NudgeDevice {
    config: NudgeConfig,
    sample_rate: u32,
    one_g: i32,

    // Latest instantaneous reading, cabinet frame, uncentered.
    ax: i16,
    ay: i16,
    az: i16,
    t_last: u64,

    // Filtered, centered outputs.
    fx: i32,
    fy: i32,
    fz: i32,

    // Current center (gravity bias estimate).
    cx: i16,
    cy: i16,
    cz: i16,

    x_filter: AxisFilter,
    y_filter: AxisFilter,
    z_filter: AxisFilter,

    /// Long averager for auto-centering: 4 windows of 4 s.
    auto_avg: RollingAverage<4>,
    /// Short averager for manual centering: 2 windows of 1/2 s, so a
    /// manual center reflects the near-instantaneous state with just
    /// enough smoothing to ride out vibration.
    manual_avg: RollingAverage<2>,

    views: [View; MAX_VIEWS],

    quiet_threshold: Xyz,
    quiet_period_end: u64,
    manual_center_request: bool,

    // Velocity integral, mm/s, cabinet frame.
    vx: f32,
    vy: f32,
    vz: f32,
    velocity_conv: f32,
    velocity_decay: f32,

    cal_mode: bool,
    cal_auto_save: bool,
    cal_end: u64,
    cal_sum: [i64; 3],
    cal_sum2: [i64; 3],
    cal_n: i64,

    pending_save: bool,
}

impl NudgeDevice {
    /// `sample_rate` and `one_g` come from the configured driver.
    pub fn new(sample_rate: u32, one_g: i32, config: NudgeConfig) -> Self {
        let rate = sample_rate.max(1);
        let mut d = NudgeDevice {
            config,
            sample_rate: rate,
            one_g: one_g.max(1),
            ax: 0,
            ay: 0,
            az: 0,
            t_last: 0,
            fx: 0,
            fy: 0,
            fz: 0,
            cx: 0,
            cy: 0,
            cz: 0,
            x_filter: AxisFilter::new(),
            y_filter: AxisFilter::new(),
            z_filter: AxisFilter::new(),
            auto_avg: RollingAverage::new(rate as i32 * 4),
            manual_avg: RollingAverage::new(rate as i32 / 2),
            views: [View::default(); MAX_VIEWS],
            quiet_threshold: Xyz::new(DEFAULT_QUIET_XY, DEFAULT_QUIET_XY, DEFAULT_QUIET_Z),
            quiet_period_end: 0,
            manual_center_request: false,
            vx: 0.0,
            vy: 0.0,
            vz: 0.0,
            velocity_conv: 0.0,
            velocity_decay: 1.0,
            cal_mode: false,
            cal_auto_save: false,
            cal_end: 0,
            cal_sum: [0; 3],
            cal_sum2: [0; 3],
            cal_n: 0,
            pending_save: false,
        };
        d.apply_filter_params();
        d
    }

    fn apply_filter_params(&mut self) {
        let rate = self.sample_rate;
        self.x_filter.set_time_constant(rate, self.config.dc_time_s);
        self.y_filter.set_time_constant(rate, self.config.dc_time_s);
        self.z_filter.set_time_constant(rate, self.config.dc_time_s);
        self.x_filter.set_window(self.config.jitter_window);
        self.y_filter.set_window(self.config.jitter_window);
        self.z_filter.set_window(self.config.jitter_window);

        self.velocity_conv = MM_PER_S2_PER_G / self.one_g as f32 / rate as f32;
        let half_life_ms = self.config.velocity_decay_ms.max(1) as f32;
        self.velocity_decay = powf(0.5, 1000.0 / (rate as f32 * half_life_ms));
    }

    // --- accessors --------------------------------------------------------

    /// Latest instantaneous reading (cabinet frame, uncentered).
    pub fn raw(&self) -> (i16, i16, i16) {
        (self.ax, self.ay, self.az)
    }

    /// Latest filtered, centered reading.
    pub fn filtered(&self) -> (i16, i16, i16) {
        (clip_i16(self.fx), clip_i16(self.fy), clip_i16(self.fz))
    }

    /// Current center estimate.
    pub fn center(&self) -> (i16, i16, i16) {
        (self.cx, self.cy, self.cz)
    }

    pub fn timestamp(&self) -> u64 {
        self.t_last
    }

    pub fn velocity_x(&self) -> i16 {
        clip_i16_f(self.vx * self.config.velocity_scale as f32)
    }

    pub fn velocity_y(&self) -> i16 {
        clip_i16_f(self.vy * self.config.velocity_scale as f32)
    }

    pub fn velocity_z(&self) -> i16 {
        clip_i16_f(self.vz * self.config.velocity_scale as f32)
    }

    pub fn quiet_threshold(&self) -> Xyz {
        self.quiet_threshold
    }

    pub fn is_cal_mode(&self) -> bool {
        self.cal_mode
    }

    /// True once when a deferred settings save has been requested.
    pub fn take_pending_save(&mut self) -> bool {
        let p = self.pending_save;
        self.pending_save = false;
        p
    }

    // --- views ------------------------------------------------------------

    /// Allocates an averaging view. Every USB device that reports
    /// accelerometer axes gets its own view, so devices polled at
    /// different host rates each see a true average of the physical
    /// samples taken between their own polls.
    pub fn create_view(&mut self) -> Option<ViewId> {
        for (i, v) in self.views.iter_mut().enumerate() {
            if !v.in_use {
                *v = View {
                    in_use: true,
                    ..View::default()
                };
                return Some(ViewId(i));
            }
        }
        None
    }

    /// Closes out the view's averaging period: returns the average of
    /// the samples accumulated since the previous snapshot, and starts
    /// a new period. With no new samples, repeats the last snapshot.
    pub fn view_snapshot(&mut self, id: ViewId) -> (i16, i16, i16) {
        let v = &mut self.views[id.0];
        if v.n > 0 {
            v.snap = (
                clip_i16(v.sum.x / v.n),
                clip_i16(v.sum.y / v.n),
                clip_i16(v.sum.z / v.n),
            );
            v.sum = Xyz::default();
            v.n = 0;
        }
        v.snap
    }

    // --- centering and calibration ----------------------------------------

    /// Requests a manual re-center; applied on the next task tick from
    /// the short rolling average.
    pub fn request_manual_center(&mut self) {
        self.manual_center_request = true;
    }

    fn center_now(&mut self, avg: Xyz) {
        self.cx = clip_i16(avg.x);
        self.cy = clip_i16(avg.y);
        self.cz = clip_i16(avg.z);
    }

    /// Starts a timed noise-measurement run: the user holds the
    /// cabinet still while we collect mean and deviation per axis to
    /// size the quiet thresholds.
    pub fn start_calibration(&mut self, auto_save: bool, now: u64) {
        self.cal_mode = true;
        self.cal_auto_save = auto_save;
        self.cal_end = now + CAL_MODE_TIME_US;
        self.cal_sum = [0; 3];
        self.cal_sum2 = [0; 3];
        self.cal_n = 0;
    }

    fn finish_calibration(&mut self) {
        self.cal_mode = false;
        if self.cal_n == 0 {
            return;
        }

        let n = self.cal_n as f32;
        let sigma = |sum: i64, sum2: i64| {
            let mean = sum as f32 / n;
            let var = sum2 as f32 / n - mean * mean;
            if var > 0.0 {
                sqrtf(var)
            } else {
                0.0
            }
        };
        let sx = sigma(self.cal_sum[0], self.cal_sum2[0]) * QUIET_SIGMA;
        let sy = sigma(self.cal_sum[1], self.cal_sum2[1]) * QUIET_SIGMA;
        let sz = sigma(self.cal_sum[2], self.cal_sum2[2]) * QUIET_SIGMA;

        self.quiet_threshold = Xyz::new(
            (sx as i32).max(DEFAULT_QUIET_XY),
            (sy as i32).max(DEFAULT_QUIET_XY),
            (sz as i32).max(DEFAULT_QUIET_Z),
        );

        if self.cal_auto_save {
            self.pending_save = true;
        }
    }

    // --- settings persistence ---------------------------------------------

    pub fn commit_settings(&mut self, store: &mut dyn BlobStore) -> bool {
        let mut b = [0u8; SETTINGS_BLOB_LEN];
        b[0] = self.config.auto_center as u8;
        b[4..8].copy_from_slice(&(self.config.auto_center_interval_us as u32).to_le_bytes());
        b[8..12].copy_from_slice(&self.quiet_threshold.x.to_le_bytes());
        b[12..16].copy_from_slice(&self.quiet_threshold.y.to_le_bytes());
        b[16..20].copy_from_slice(&self.quiet_threshold.z.to_le_bytes());
        b[20..24].copy_from_slice(&self.config.dc_time_s.to_bits().to_le_bytes());
        b[24..28].copy_from_slice(&self.config.jitter_window.to_le_bytes());
        b[28..32].copy_from_slice(&self.config.velocity_decay_ms.to_le_bytes());
        b[32..36].copy_from_slice(&self.config.velocity_scale.to_le_bytes());
        store.save(SETTINGS_NAME, &b).is_ok()
    }

    /// Restores saved tuning. A missing blob (or one of an unexpected
    /// size) leaves the configured defaults in place and still counts
    /// as success.
    pub fn restore_settings(&mut self, store: &mut dyn BlobStore) -> bool {
        let mut b = [0u8; SETTINGS_BLOB_LEN];
        match store.load(SETTINGS_NAME, &mut b) {
            Ok(BlobLoad::Loaded(n)) if n == SETTINGS_BLOB_LEN => {
                let u32_at =
                    |o: usize| u32::from_le_bytes([b[o], b[o + 1], b[o + 2], b[o + 3]]);
                self.config.auto_center = b[0] != 0;
                self.config.auto_center_interval_us = u32_at(4) as u64;
                self.quiet_threshold = Xyz::new(
                    u32_at(8) as i32,
                    u32_at(12) as i32,
                    u32_at(16) as i32,
                );
                self.config.dc_time_s = f32::from_bits(u32_at(20));
                self.config.jitter_window = u32_at(24) as i32;
                self.config.velocity_decay_ms = u32_at(28);
                self.config.velocity_scale = u32_at(32);
                self.apply_filter_params();
                true
            }
            Ok(_) => true,
            Err(_) => false,
        }
    }

    // --- the periodic task ------------------------------------------------

    fn transform(&self, x: i16, y: i16, z: i16) -> (i32, i32, i32) {
        let m = &self.config.transform;
        let (x, y, z) = (x as i32, y as i32, z as i32);
        (
            x * m[0] as i32 + y * m[1] as i32 + z * m[2] as i32,
            x * m[3] as i32 + y * m[4] as i32 + z * m[5] as i32,
            x * m[6] as i32 + y * m[7] as i32 + z * m[8] as i32,
        )
    }

    /// Main-loop tick: process at most one accelerometer sample.
    pub fn task(&mut self, accel: &mut dyn Accelerometer, now: u64) {
        if self.cal_mode && now >= self.cal_end {
            self.finish_calibration();
        }

        let s = match accel.read() {
            Some(s) => s,
            None => return,
        };

        let (x, y, z) = self.transform(s.x, s.y, s.z);
        self.ax = clip_i16(x);
        self.ay = clip_i16(y);
        self.az = clip_i16(z);
        self.t_last = s.t;

        self.auto_avg.add(self.ax, self.ay, self.az);
        self.manual_avg.add(self.ax, self.ay, self.az);

        if self.cal_mode {
            for (i, v) in [x, y, z].iter().enumerate() {
                self.cal_sum[i] += *v as i64;
                self.cal_sum2[i] += (*v as i64) * (*v as i64);
            }
            self.cal_n += 1;
        }

        // Quiet check against the rolling average: deviation below the
        // noise thresholds on all axes means no deliberate motion.
        // Sustained quiet for the full centering interval lets us take
        // the average as the true gravity bias.
        let snap = self.auto_avg.snapshot;
        let quiet = (x - snap.x).abs() <= self.quiet_threshold.x
            && (y - snap.y).abs() <= self.quiet_threshold.y
            && (z - snap.z).abs() <= self.quiet_threshold.z;
        if !quiet {
            self.quiet_period_end = now + self.config.auto_center_interval_us;
        } else if self.config.auto_center && now >= self.quiet_period_end {
            self.center_now(snap);
            self.quiet_period_end = now + self.config.auto_center_interval_us;
        }

        if self.manual_center_request {
            let snap = self.manual_avg.snapshot;
            self.center_now(snap);
            self.manual_center_request = false;
        }

        // Centered, filtered outputs.
        let dx = x - self.cx as i32;
        let dy = y - self.cy as i32;
        let dz = z - self.cz as i32;
        self.fx = self.x_filter.apply(dx);
        self.fy = self.y_filter.apply(dy);
        self.fz = self.z_filter.apply(dz);

        // Feed the averaging views with the reportable values.
        let (fx, fy, fz) = (self.fx, self.fy, self.fz);
        for v in self.views.iter_mut().filter(|v| v.in_use) {
            v.sum.x += fx;
            v.sum.y += fy;
            v.sum.z += fz;
            v.n += 1;
        }

        // Decaying velocity integral in mm/s.
        self.vx = self.vx * self.velocity_decay + dx as f32 * self.velocity_conv;
        self.vy = self.vy * self.velocity_decay + dy as f32 * self.velocity_conv;
        self.vz = self.vz * self.velocity_decay + dz as f32 * self.velocity_conv;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AccelSample;
    use std::collections::HashMap;
    use std::vec::Vec;

    struct ScriptAccel {
        rate: u32,
        samples: Vec<AccelSample>,
        next: usize,
    }

    impl ScriptAccel {
        fn new(rate: u32, samples: Vec<AccelSample>) -> Self {
            ScriptAccel {
                rate,
                samples,
                next: 0,
            }
        }
    }

    impl Accelerometer for ScriptAccel {
        fn name(&self) -> &'static str {
            "script"
        }
        fn sample_rate(&self) -> u32 {
            self.rate
        }
        fn one_g(&self) -> i32 {
            16384
        }
        fn read(&mut self) -> Option<AccelSample> {
            let s = *self.samples.get(self.next)?;
            self.next += 1;
            Some(s)
        }
    }

    #[derive(Default)]
    struct MemStore {
        blobs: HashMap<String, Vec<u8>>,
    }

    impl BlobStore for MemStore {
        fn save(&mut self, name: &str, blob: &[u8]) -> Result<(), persist::StoreError> {
            self.blobs.insert(name.to_string(), blob.to_vec());
            Ok(())
        }
        fn load(
            &mut self,
            name: &str,
            buf: &mut [u8],
        ) -> Result<BlobLoad, persist::StoreError> {
            match self.blobs.get(name) {
                Some(b) => {
                    buf[..b.len()].copy_from_slice(b);
                    Ok(BlobLoad::Loaded(b.len()))
                }
                None => Ok(BlobLoad::Missing),
            }
        }
    }

    fn run(dev: &mut NudgeDevice, accel: &mut ScriptAccel) {
        while accel.next < accel.samples.len() {
            let now = accel.samples[accel.next].t;
            dev.task(accel, now);
        }
    }

    #[test]
    fn auto_center_converges_on_static_bias() {
        // A slightly tilted, stationary cabinet: constant (100, 50)
        // bias on the horizontal axes, 1g on Z with a few counts of
        // sensor wobble. After the centering interval, the center must
        // land on the bias.
        let rate = 250;
        let samples: Vec<AccelSample> = (0..10_000)
            .map(|i| AccelSample {
                x: 100,
                y: 50,
                z: 16384 + (i % 11) as i16 - 5,
                t: (i as u64 + 1) * 4_000,
            })
            .collect();
        let mut accel = ScriptAccel::new(rate, samples);
        let mut dev = NudgeDevice::new(rate, 16384, NudgeConfig::default());

        run(&mut dev, &mut accel);

        let (cx, cy, cz) = dev.center();
        assert!((cx as i32 - 100).abs() <= 2, "cx {}", cx);
        assert!((cy as i32 - 50).abs() <= 2, "cy {}", cy);
        assert!((cz as i32 - 16384).abs() <= 2, "cz {}", cz);

        // With the bias subtracted, the filtered outputs sit near zero.
        let (fx, fy, fz) = dev.filtered();
        assert!(fx.abs() <= 2 && fy.abs() <= 2 && fz.abs() <= 8);
    }

    #[test]
    fn velocity_integrates_and_decays() {
        let rate = 100;
        let mut config = NudgeConfig::default();
        config.auto_center = false;
        config.velocity_scale = 1;

        // 10 samples of a 1g push, then stillness for 20 s.
        let mut samples = Vec::new();
        for i in 0..10 {
            samples.push(AccelSample {
                x: 16384,
                y: 0,
                z: 0,
                t: (i + 1) * 10_000,
            });
        }
        for i in 10..2010 {
            samples.push(AccelSample {
                x: 0,
                y: 0,
                z: 0,
                t: (i + 1) * 10_000,
            });
        }

        let mut accel = ScriptAccel::new(rate, samples);
        let mut dev = NudgeDevice::new(rate, 16384, config);

        // Run the push.
        for _ in 0..10 {
            let now = accel.samples[accel.next].t;
            dev.task(&mut accel, now);
        }
        // 10 samples of 1g at 100 Hz integrate to roughly 0.98 m/s,
        // less a little decay.
        let v = dev.velocity_x();
        assert!(v > 900 && v < 1000, "velocity {}", v);

        // Ten half-lives of stillness: essentially zero.
        run(&mut dev, &mut accel);
        assert!(dev.velocity_x().abs() <= 2, "velocity {}", dev.velocity_x());
    }

    #[test]
    fn views_average_between_snapshots() {
        let rate = 100;
        let mut config = NudgeConfig::default();
        config.auto_center = false;

        let samples: Vec<AccelSample> = [100i16, 200, 300, 400]
            .iter()
            .enumerate()
            .map(|(i, &x)| AccelSample {
                x,
                y: 0,
                z: 0,
                t: (i as u64 + 1) * 10_000,
            })
            .collect();
        let mut accel = ScriptAccel::new(rate, samples);
        let mut dev = NudgeDevice::new(rate, 16384, config);
        let view = dev.create_view().unwrap();

        run(&mut dev, &mut accel);

        assert_eq!(dev.view_snapshot(view), (250, 0, 0));
        // No new samples: the snapshot repeats rather than zeroing.
        assert_eq!(dev.view_snapshot(view), (250, 0, 0));
    }

    #[test]
    fn view_pool_is_bounded() {
        let mut dev = NudgeDevice::new(100, 16384, NudgeConfig::default());
        for _ in 0..MAX_VIEWS {
            assert!(dev.create_view().is_some());
        }
        assert!(dev.create_view().is_none());
    }

    #[test]
    fn manual_center_uses_short_average() {
        let rate = 100;
        let mut config = NudgeConfig::default();
        config.auto_center = false;

        let samples: Vec<AccelSample> = (0..200)
            .map(|i| AccelSample {
                x: 500,
                y: -300,
                z: 16000,
                t: (i as u64 + 1) * 10_000,
            })
            .collect();
        let mut accel = ScriptAccel::new(rate, samples);
        let mut dev = NudgeDevice::new(rate, 16384, config);

        // Warm up the short averager, then request a manual center.
        for _ in 0..150 {
            let now = accel.samples[accel.next].t;
            dev.task(&mut accel, now);
        }
        dev.request_manual_center();
        let now = accel.samples[accel.next].t;
        dev.task(&mut accel, now);

        assert_eq!(dev.center(), (500, -300, 16000));
    }

    #[test]
    fn calibration_sizes_quiet_thresholds_from_noise() {
        let rate = 100;
        // X alternates +-200 (sigma 200), Y is clean, Z is clean:
        // X gets 3 sigma = 600, Y and Z keep the defaults.
        let samples: Vec<AccelSample> = (0..1700)
            .map(|i| AccelSample {
                x: if i % 2 == 0 { 200 } else { -200 },
                y: 0,
                z: 0,
                t: (i as u64 + 1) * 10_000,
            })
            .collect();
        let mut accel = ScriptAccel::new(rate, samples);
        let mut dev = NudgeDevice::new(rate, 16384, NudgeConfig::default());

        dev.start_calibration(true, 10_000);
        run(&mut dev, &mut accel);

        assert!(!dev.is_cal_mode());
        let qt = dev.quiet_threshold();
        assert!((qt.x - 600).abs() <= 1, "qt.x {}", qt.x);
        assert_eq!(qt.y, DEFAULT_QUIET_XY);
        assert_eq!(qt.z, DEFAULT_QUIET_Z);
        assert!(dev.take_pending_save());
    }

    #[test]
    fn settings_round_trip_through_store() {
        let mut store = MemStore::default();
        let mut dev = NudgeDevice::new(100, 16384, NudgeConfig::default());
        dev.quiet_threshold = Xyz::new(500, 600, 1500);
        dev.config.dc_time_s = 2.5;
        dev.config.jitter_window = 24;
        dev.config.velocity_decay_ms = 1500;
        dev.config.velocity_scale = 80;
        assert!(dev.commit_settings(&mut store));

        let mut dev2 = NudgeDevice::new(100, 16384, NudgeConfig::default());
        assert!(dev2.restore_settings(&mut store));
        assert_eq!(dev2.quiet_threshold(), Xyz::new(500, 600, 1500));
        assert_eq!(dev2.config.dc_time_s, 2.5);
        assert_eq!(dev2.config.jitter_window, 24);
        assert_eq!(dev2.config.velocity_decay_ms, 1500);
        assert_eq!(dev2.config.velocity_scale, 80);
    }
}
