//! Distance linearization for reflected-intensity proximity sensors.
//!
//! Proximity chips report the brightness of a reflected IR signal,
//! which falls off as an inverse power of the distance to the target:
//! `count = 1/d^X` up to scale, with X nominally 2 for a small target.
//! The plunger layer requires readings linear in distance, so the
//! driver inverts the curve: `d = 1/count^(1/X)`, then scales onto a
//! fixed position axis.
//!
//! Position units are chosen so they convert 1:1 to logical Z units
//! after calibration: the park-to-max-retraction span maps to 32767
//! units, and since the park point sits at about 1/6 of total plunger
//! travel, the forward span gets 6553 units. Total range is therefore
//! 0..=39320, with the park position fixed at 6553.

use crate::CalibrationData;
use libm::{powf, sqrtf};

/// Maximum-retraction position code; also the span of the axis.
pub const MAX_POSITION: u32 = 39320;

/// Park position on the fixed axis (1/6 of the travel from the front).
pub const PARK_POSITION: u32 = 6553;

/// Count floor: the inverse curve is meaningless at zero and unstable
/// at small counts, and the physical DC offset (internal reflections,
/// ambient light, detector noise) is far above this anyway.
const MIN_COUNT_FLOOR: u32 = 100;

/// Margin below the observed minimum count taken as the DC offset.
const DC_OFFSET_DELTA: u32 = 50;

/// Calibrated count-to-position conversion state.
pub struct ProxCurve {
    /// X in `count = 1/d^X`; 2 for ideal point-target reflection.
    power_law_exp: f32,
    /// Brightness registered with no target in range; approximated as
    /// slightly below the minimum count seen during calibration.
    dc_offset: u32,
    scaling_factor: f32,
    scaling_offset: f32,

    min_count: u32,
    max_count: u32,
    park_count: u32,

    // Calibration-mode accumulators.
    calibrating: bool,
    park_sum: u64,
    park_samples: u32,
}

impl ProxCurve {
    pub fn new(power_law_exp: f32) -> Self {
        let mut c = ProxCurve {
            power_law_exp,
            dc_offset: 0,
            scaling_factor: 1.0,
            scaling_offset: 0.0,
            min_count: MIN_COUNT_FLOOR,
            max_count: 65535,
            park_count: 20000,
            calibrating: false,
            park_sum: 0,
            park_samples: 0,
        };
        c.recalc();
        c
    }

    /// `x^(1/X)`, with the common X = 2 case on the cheap path.
    fn root(&self, x: f32) -> f32 {
        if self.power_law_exp == 2.0 {
            sqrtf(x)
        } else {
            powf(x, 1.0 / self.power_law_exp)
        }
    }

    /// Recomputes the scale and offset from the count range, working on
    /// counts with the DC offset subtracted out (the raw curve only
    /// follows the power law after the constant floor is removed).
    fn recalc(&mut self) {
        if self.min_count < MIN_COUNT_FLOOR {
            self.min_count = MIN_COUNT_FLOOR;
        }
        if self.max_count > 65535 {
            self.max_count = 65535;
        }
        self.dc_offset = self.min_count.saturating_sub(DC_OFFSET_DELTA);

        let park = (self.park_count - self.dc_offset) as f32;
        let park_inv = 1.0 / self.root(park);
        let min_inv = 1.0 / self.root((self.min_count - self.dc_offset) as f32);
        self.scaling_factor = 32767.0 / (min_inv - park_inv);
        self.scaling_offset = PARK_POSITION as f32 - self.scaling_factor * park_inv;
    }

    /// Converts a proximity count to a linear position.
    ///
    /// Counts at or below the DC offset mean the target is out of
    /// sensor range; since the plunger can't actually be missing, that
    /// reads as "pulled back past the sensor's reach", pegged at the
    /// maximum-retraction code.
    pub fn position(&self, count: u32) -> u32 {
        if count <= self.dc_offset {
            return MAX_POSITION;
        }
        let d = self.scaling_factor / self.root((count - self.dc_offset) as f32)
            + self.scaling_offset;
        if d < 0.0 {
            0
        } else if d > MAX_POSITION as f32 {
            MAX_POSITION
        } else {
            d as u32
        }
    }

    /// Restores the count range from the private calibration words, or
    /// applies defaults when uncalibrated.
    pub fn restore(&mut self, cal: &CalibrationData) {
        if cal.calibrated {
            self.min_count = cal.sensor_data[0];
            self.max_count = cal.sensor_data[1];
            self.park_count = cal.sensor_data[2];
        } else {
            self.min_count = MIN_COUNT_FLOOR;
            self.max_count = 65535;
            self.park_count = 20000;
        }
        self.recalc();
    }

    /// Starts a calibration pass. The plunger is at rest when the user
    /// initiates calibration, so the current count seeds the park
    /// average and the observed minimum. The maximum pegs at the
    /// sensor limit up front: a plunger at the forward stop saturates
    /// the count in any workable installation, and a non-empty initial
    /// range keeps the scaling factor stable.
    pub fn begin_calibration(&mut self, current_count: u32) {
        self.park_count = current_count;
        self.min_count = current_count;
        self.max_count = 65535;
        self.recalc();
        self.calibrating = true;
        self.park_sum = current_count as u64;
        self.park_samples = 1;
    }

    /// Feeds one reading taken during calibration: tracks the count
    /// extremes, and accumulates the park average when the reading
    /// looks like a rest-position one (within the neighborhood of the
    /// current park estimate).
    pub fn calibration_sample(&mut self, count: u32) {
        if !self.calibrating {
            return;
        }
        if count < self.min_count {
            self.min_count = count;
            self.recalc();
        }
        let park = self.park_count as i64;
        if (count as i64 - park).abs() < park / 50 + 1 {
            self.park_sum += count as u64;
            self.park_samples += 1;
        }
    }

    /// Finishes calibration: fixes the park count at the accumulated
    /// average, and writes the generic anchors in *position* units so
    /// they agree exactly with what `position` will report, plus the
    /// private count range for future restores.
    pub fn end_calibration(&mut self, cal: &mut CalibrationData) {
        self.park_count = (self.park_sum / self.park_samples.max(1) as u64) as u32;
        self.recalc();

        cal.zero = self.position(self.park_count);
        // Maximum position corresponds to the minimum count: the axis
        // is positive in the retraction direction, away from the
        // sensor, where the reflection is dimmest.
        cal.max = self.position(self.min_count);
        cal.sensor_data[0] = self.min_count;
        cal.sensor_data[1] = self.max_count;
        cal.sensor_data[2] = self.park_count;

        self.calibrating = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve() -> ProxCurve {
        let mut c = ProxCurve::new(2.0);
        c.min_count = 2000;
        c.max_count = 65535;
        c.park_count = 20000;
        c.recalc();
        c
    }

    #[test]
    fn park_maps_to_park_position() {
        let c = curve();
        let p = c.position(20000);
        assert!(
            (p as i64 - PARK_POSITION as i64).abs() <= 1,
            "park position {}",
            p
        );
    }

    #[test]
    fn minimum_count_maps_to_full_retraction() {
        let c = curve();
        let p = c.position(2000);
        assert!((p as i64 - MAX_POSITION as i64).abs() <= 1, "position {}", p);
    }

    #[test]
    fn position_is_monotonic_in_distance() {
        // Decreasing count = increasing distance = increasing position.
        let c = curve();
        let mut prev = c.position(65535);
        for count in (2000..65535).rev().step_by(997) {
            let p = c.position(count);
            assert!(p >= prev, "count {}: {} < {}", count, p, prev);
            prev = p;
        }
    }

    #[test]
    fn out_of_range_count_pegs_at_max() {
        let c = curve();
        assert_eq!(c.position(c.dc_offset), MAX_POSITION);
        assert_eq!(c.position(0), MAX_POSITION);
    }

    #[test]
    fn calibration_round_trip() {
        let mut c = ProxCurve::new(2.0);
        let mut cal = CalibrationData::default();

        c.begin_calibration(21000);
        // A pull sweeps the count down to 3000 and back near park.
        let mut count = 21000;
        while count >= 3000 {
            c.calibration_sample(count);
            count -= 500;
        }
        for _ in 0..50 {
            c.calibration_sample(21000);
        }
        c.end_calibration(&mut cal);
        cal.calibrated = true;

        assert_eq!(cal.sensor_data[0], 3000);
        assert!((cal.sensor_data[2] as i64 - 21000).abs() <= 200);
        assert!((cal.zero as i64 - PARK_POSITION as i64).abs() <= 2);
        assert!((cal.max as i64 - MAX_POSITION as i64).abs() <= 2);

        // A fresh curve restored from the same data converts alike.
        let mut d = ProxCurve::new(2.0);
        d.restore(&cal);
        for &count in &[3000u32, 5000, 12000, 21000, 60000] {
            assert_eq!(c.position(count), d.position(count));
        }
    }
}
