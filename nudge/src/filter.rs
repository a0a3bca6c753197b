//! Per-axis DC blocker and hysteresis filter.
//!
//! The DC blocker is the classic one-pole high-pass:
//!
//! ```text
//! y[n] = x[n] - x[n-1] + alpha * y[n-1]
//! ```
//!
//! with `alpha = exp(-dt/tau)` derived from the sample rate and the
//! adaptation time constant. It passes transients (nudges) and bleeds
//! off anything constant, adapting to slow bias drift faster than the
//! auto-centering machinery but without its motion heuristics. A time
//! constant of zero disables the stage entirely (the raw value passes
//! through), since a degenerate blocker would differentiate the signal
//! instead.
//!
//! The output then runs through a hysteresis window to squelch
//! residual noise: values inside the window repeat the last output,
//! escapes drag the window along, and the reported value is the window
//! center.

use libm::expf;

#[derive(Copy, Clone, Debug, Default)]
pub struct AxisFilter {
    /// High-pass pole; 0 disables the DC blocker stage.
    alpha: f32,
    /// Hysteresis window size; 0 disables the hysteresis stage.
    window: i32,
    win_min: i32,
    win_max: i32,
    in_prv: i32,
    out_prv: f32,
}

impl AxisFilter {
    pub const fn new() -> Self {
        AxisFilter {
            alpha: 0.0,
            window: 0,
            win_min: 0,
            win_max: 0,
            in_prv: 0,
            out_prv: 0.0,
        }
    }

    /// Derives alpha from the sampling rate and the DC adaptation time
    /// constant in seconds; `tau = 0` disables DC blocking.
    pub fn set_time_constant(&mut self, sample_rate: u32, tau_s: f32) {
        self.alpha = if tau_s <= 0.0 || sample_rate == 0 {
            0.0
        } else {
            expf(-1.0 / (sample_rate as f32 * tau_s))
        };
        self.in_prv = 0;
        self.out_prv = 0.0;
    }

    pub fn set_window(&mut self, size: i32) {
        self.window = size;
        self.win_min = 0;
        self.win_max = 0;
    }

    /// Runs one reading through both stages.
    pub fn apply(&mut self, x: i32) -> i32 {
        let y = if self.alpha == 0.0 {
            x as f32
        } else {
            (x - self.in_prv) as f32 + self.alpha * self.out_prv
        };
        self.in_prv = x;
        self.out_prv = y;

        let yi = y as i32;
        if self.window == 0 {
            return yi;
        }
        if yi < self.win_min {
            self.win_min = yi;
            self.win_max = yi + self.window;
        } else if yi > self.win_max {
            self.win_max = yi;
            self.win_min = yi - self.window;
        }
        (self.win_min + self.win_max) / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_filter_passes_through() {
        let mut f = AxisFilter::new();
        for &x in &[0, 100, -250, 32000, 7] {
            assert_eq!(f.apply(x), x);
        }
    }

    #[test]
    fn dc_blocker_bleeds_off_constant_bias() {
        let mut f = AxisFilter::new();
        f.set_time_constant(100, 0.5);
        // A constant 1000-count bias: the first sample passes as a
        // transient, then the output decays geometrically toward zero.
        let first = f.apply(1000);
        assert_eq!(first, 1000);
        let mut last = first;
        for _ in 0..100 {
            last = f.apply(1000);
        }
        assert!(last.abs() < 150, "residual {}", last);
        for _ in 0..400 {
            last = f.apply(1000);
        }
        assert!(last.abs() < 5, "residual {}", last);
    }

    #[test]
    fn dc_blocker_passes_transients() {
        let mut f = AxisFilter::new();
        f.set_time_constant(100, 1.0);
        // Settle on a bias, then hit it with a step: the step shows up
        // at nearly full amplitude.
        for _ in 0..1000 {
            f.apply(300);
        }
        let kick = f.apply(300 + 5000);
        assert!(kick > 4800, "kick {}", kick);
    }

    #[test]
    fn hysteresis_swallows_small_wiggle() {
        let mut f = AxisFilter::new();
        f.set_window(8);
        // First reading anchors the window at [92, 100].
        let base = f.apply(100);
        for &x in &[99, 93, 98, 94, 96] {
            assert_eq!(f.apply(x), base);
        }
        // A real excursion gets through.
        assert_ne!(f.apply(140), base);
    }
}
