//! Staggered rolling averages.
//!
//! Centering needs a retrospective average of recent samples with the
//! vibration and noise washed out. A single accumulator of W samples
//! only refreshes every W samples; N parallel windows with staggered
//! starting counts close in rotation, so a fresh snapshot appears every
//! W/N samples while each snapshot still averages a full W.

use crate::Xyz;

#[derive(Copy, Clone, Debug, Default)]
struct Axis {
    sum: i64,
    min: i16,
    max: i16,
}

impl Axis {
    fn add(&mut self, v: i16) {
        self.sum += v as i64;
        if v < self.min {
            self.min = v;
        }
        if v > self.max {
            self.max = v;
        }
    }

    fn reset(&mut self, v: i16) {
        self.sum = 0;
        self.min = v;
        self.max = v;
    }
}

#[derive(Copy, Clone, Debug, Default)]
struct Window {
    /// Progress toward the next close; starts staggered.
    n: i32,
    /// Samples actually accumulated (differs from `n` during the first
    /// staggered cycle).
    count: i32,
    x: Axis,
    y: Axis,
    z: Axis,
}

/// N rolling windows of `window_size` samples each.
#[derive(Copy, Clone, Debug)]
pub struct RollingAverage<const N: usize> {
    window_size: i32,
    windows: [Window; N],
    /// Average from the most recently closed window.
    pub snapshot: Xyz,
}

impl<const N: usize> RollingAverage<N> {
    /// `window_size` is the averaging period in samples (seconds of
    /// coverage times the sensor sample rate).
    pub fn new(window_size: i32) -> Self {
        let mut r = RollingAverage {
            window_size: window_size.max(1),
            windows: [Window::default(); N],
            snapshot: Xyz::default(),
        };
        // Stagger the starting counts so one window closes every
        // window_size/N samples once the pipeline is warm.
        for (i, w) in r.windows.iter_mut().enumerate() {
            w.n = (i as i32 * r.window_size) / N as i32;
        }
        r
    }

    /// Adds a sample to every window, closing out any window that has
    /// filled (its average becomes the new snapshot).
    pub fn add(&mut self, x: i16, y: i16, z: i16) {
        for w in self.windows.iter_mut() {
            w.n += 1;
            w.count += 1;
            w.x.add(x);
            w.y.add(y);
            w.z.add(z);

            if w.n >= self.window_size {
                let avg = Xyz::new(
                    (w.x.sum / w.count as i64) as i32,
                    (w.y.sum / w.count as i64) as i32,
                    (w.z.sum / w.count as i64) as i32,
                );
                self.snapshot = avg;
                w.n = 0;
                w.count = 0;
                w.x.reset(avg.x as i16);
                w.y.reset(avg.y as i16);
                w.z.reset(avg.z as i16);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_window_average() {
        let mut r: RollingAverage<1> = RollingAverage::new(10);
        for i in 0..10 {
            r.add(100 + i, 50, -10);
        }
        // Average of 100..=109 is 104 (integer).
        assert_eq!(r.snapshot, Xyz::new(104, 50, -10));
    }

    #[test]
    fn staggered_windows_refresh_faster_than_one_window() {
        let mut r: RollingAverage<4> = RollingAverage::new(40);
        // The most advanced window starts 3/4 full, so the first
        // snapshot appears after only window_size/4 samples.
        let mut first_close = None;
        for i in 0..40 {
            r.add(200, 0, 0);
            if r.snapshot != Xyz::default() && first_close.is_none() {
                first_close = Some(i + 1);
            }
        }
        assert_eq!(first_close, Some(10));
        assert_eq!(r.snapshot.x, 200);
    }

    #[test]
    fn snapshot_tracks_level_changes() {
        let mut r: RollingAverage<2> = RollingAverage::new(8);
        for _ in 0..16 {
            r.add(10, 10, 10);
        }
        assert_eq!(r.snapshot, Xyz::new(10, 10, 10));
        for _ in 0..32 {
            r.add(-30, -30, -30);
        }
        assert_eq!(r.snapshot, Xyz::new(-30, -30, -30));
    }
}
