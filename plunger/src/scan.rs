//! Edge detection for linear imaging sensors.
//!
//! A linear photo sensor gives us a one-dimensional image: a row of
//! brightness samples with the plunger appearing as a bright-to-dark
//! transition (shadow-casting setups) or a bright tip against a dark
//! background (reflective setups). These routines locate that feature
//! and return its pixel coordinate, which serves as the raw position
//! reading.
//!
//! Three selectable algorithms cover the shadow-style sensors, with
//! different tradeoffs against motion blur; the reflective TCD-style
//! sensor has its own scan that uses the chip's masked dark-reference
//! pixels. All of them return the caller's previous reading when the
//! frame is unusable (low contrast, no edge), so a bad frame repeats
//! the last good position instead of injecting a wild value.

/// Scan algorithm selector for shadow-style sensors.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScanMode {
    /// Sustained monotonic slope; most tolerant of motion blur.
    SteadySlope,
    /// Steepest gradient across a fixed 2-pixel gap.
    SteepestSlope,
    /// Steepest gradient across a gap sized from recent speed.
    SpeedGap,
}

impl ScanMode {
    pub fn from_code(code: u8) -> Option<ScanMode> {
        match code {
            0 => Some(ScanMode::SteadySlope),
            1 => Some(ScanMode::SteepestSlope),
            2 => Some(ScanMode::SpeedGap),
            _ => None,
        }
    }
}

impl Default for ScanMode {
    fn default() -> Self {
        ScanMode::SteadySlope
    }
}

/// Last two positions returned by the speed-gap scan, which sizes its
/// gap from the distance covered between recent frames.
#[derive(Copy, Clone, Debug, Default)]
pub struct GapHistory {
    prev0: u32,
    prev1: u32,
}

/// Rolling-average window size for the steady-slope scan (power of two
/// so the threshold scaling is a shift).
const SLOPE_WINDOW: usize = 8;

/// Window size for the two gradient scans.
const GRAD_WINDOW: usize = 5;

/// Minimum accepted gradient, scaled by the window size. Below this the
/// frame has too little contrast for a meaningful reading.
const MIN_GRADIENT: i32 = 10 * GRAD_WINDOW as i32;

/// Dispatches to the selected shadow-scan algorithm.
pub fn scan_shadow(
    mode: ScanMode,
    pix: &[u8],
    reverse: bool,
    last: u32,
    hist: &mut GapHistory,
) -> u32 {
    match mode {
        ScanMode::SteadySlope => scan_steady_slope(pix, reverse, last),
        ScanMode::SteepestSlope => scan_steepest_slope(pix, reverse, last),
        ScanMode::SpeedGap => scan_speed_gap(pix, reverse, last, hist),
    }
}

/// Brightness at scan position `i`, where position 0 is the end the
/// scan starts from (the nominally bright end).
#[inline]
fn at(pix: &[u8], reverse: bool, i: usize) -> i32 {
    let idx = if reverse { pix.len() - 1 - i } else { i };
    pix[idx] as i32
}

/// Maps a scan position back to a buffer pixel coordinate.
#[inline]
fn to_coord(pix: &[u8], reverse: bool, i: usize) -> u32 {
    (if reverse { pix.len() - 1 - i } else { i }) as u32
}

/// Average of four pixels starting at scan position `i`.
#[inline]
fn avg4(pix: &[u8], reverse: bool, i: usize) -> i32 {
    (at(pix, reverse, i) + at(pix, reverse, i + 1) + at(pix, reverse, i + 2)
        + at(pix, reverse, i + 3))
        / 4
}

/// Mode 0: search for a sustained monotonic bright-to-dark slope that
/// crosses the midpoint brightness and settles into shadow.
///
/// The slope may be arbitrarily shallow (a fast-moving plunger smears
/// the edge over many pixels), so we key on monotonicity rather than
/// steepness: a falling run of rolling-window averages that crosses the
/// brightness midpoint and then stays below the dark threshold for a
/// sustained stretch. The midpoint crossing is the reported position.
pub fn scan_steady_slope(pix: &[u8], reverse: bool, last: u32) -> u32 {
    let n = pix.len();
    if n < SLOPE_WINDOW * 8 {
        return last;
    }

    // Reference levels from the five pixels at each end.
    let mut a = 0;
    let mut b = 0;
    for i in 0..5 {
        a += at(pix, reverse, i);
        b += at(pix, reverse, n - 1 - i);
    }
    let (a, b) = (a / 5, b / 5);
    let midpt = (a + b) / 2;
    let bright_threshold = (a.max(b) + midpt) / 2;
    let dark_threshold = (a.min(b) + midpt) / 2;

    // Binary-search a coarse bracket around the bright-to-dark
    // transition so we don't have to walk the whole bright region.
    // Each probe compares a small average against the bright threshold
    // and keeps a window of margin on the shrinking side.
    let mut left = 0usize;
    let mut right = n - 5;
    for _ in 0..8 {
        let center = (left + right) / 2;
        if avg4(pix, reverse, center) > bright_threshold {
            left = center.saturating_sub(SLOPE_WINDOW);
        } else {
            right = (center + SLOPE_WINDOW).min(n - 5);
        }
    }
    let start = left.saturating_sub(SLOPE_WINDOW);

    // Thresholds scaled to window sums.
    let midpt = midpt << 3;
    let dark_threshold = dark_threshold << 3;

    // Seed the rolling window.
    let mut window = [0i32; SLOPE_WINDOW];
    let mut sum = 0;
    for (i, slot) in window.iter_mut().enumerate() {
        *slot = at(pix, reverse, start + i);
        sum += *slot;
    }

    let mut prv = sum;
    let mut in_edge = false;
    let mut edge_mid: Option<usize> = None;
    let mut candidate: Option<usize> = None;
    let mut n_shadow = 0;
    let mut wi = 0;
    for i in start + SLOPE_WINDOW..n {
        sum -= window[wi];
        window[wi] = at(pix, reverse, i);
        sum += window[wi];
        wi = (wi + 1) & (SLOPE_WINDOW - 1);

        if sum < prv {
            in_edge = true;
        } else if sum > prv {
            in_edge = false;
            edge_mid = None;
        }

        if in_edge {
            if prv > midpt && sum <= midpt {
                edge_mid = Some(i - SLOPE_WINDOW / 2);
            }
            if sum < dark_threshold && edge_mid.is_some() {
                candidate = edge_mid;
            }
        }

        // Climbing back above the midpoint means the dip wasn't a real
        // shadow; discard any tentative match.
        if sum > midpt {
            candidate = None;
            n_shadow = 0;
        }

        if candidate.is_some() && sum < dark_threshold {
            n_shadow += 1;
            if n_shadow > 10 {
                return to_coord(pix, reverse, candidate.unwrap());
            }
        }

        prv = sum;
    }

    last
}

/// Core of modes 1 and 2: find the steepest positive bright-to-dark
/// gradient between two rolling windows separated by `gap` pixels.
fn steepest_gradient(pix: &[u8], reverse: bool, gap: usize) -> Option<u32> {
    let n = pix.len();
    if n < GRAD_WINDOW * 2 + gap + 1 {
        return None;
    }

    // Leading window at [i, i+W), trailing window at [i+W+gap, i+W+gap+W).
    let mut sum1 = 0;
    let mut sum2 = 0;
    for k in 0..GRAD_WINDOW {
        sum1 += at(pix, reverse, k);
        sum2 += at(pix, reverse, k + GRAD_WINDOW + gap);
    }

    let mut steepest = 0;
    let mut steepest_at = 0usize;
    let span = GRAD_WINDOW * 2 + gap;
    let mut i = 0;
    loop {
        let slope = sum1 - sum2;
        if slope > steepest {
            steepest = slope;
            // middle of the gap between the windows
            steepest_at = i + GRAD_WINDOW + gap / 2;
        }

        if i + span >= n {
            break;
        }
        sum1 -= at(pix, reverse, i);
        sum1 += at(pix, reverse, i + GRAD_WINDOW);
        sum2 -= at(pix, reverse, i + GRAD_WINDOW + gap);
        sum2 += at(pix, reverse, i + span);
        i += 1;
    }

    if steepest < MIN_GRADIENT {
        // Contrast too low to trust; the caller repeats its previous
        // reading instead of taking a noise peak.
        return None;
    }
    Some(to_coord(pix, reverse, steepest_at))
}

/// Mode 1: steepest gradient across a fixed 2-pixel gap. The gap
/// approximates the blur width of the unfocused shadow at rest.
pub fn scan_steepest_slope(pix: &[u8], reverse: bool, last: u32) -> u32 {
    steepest_gradient(pix, reverse, 2).unwrap_or(last)
}

/// Mode 2: as mode 1, but the gap grows with the estimated speed, since
/// motion blur spreads the edge across the distance covered during the
/// exposure. Speed is estimated from the last two returned positions;
/// the gap is clamped to [2, 175] pixels.
pub fn scan_speed_gap(pix: &[u8], reverse: bool, last: u32, hist: &mut GapHistory) -> u32 {
    let delta = (hist.prev0 as i64 - hist.prev1 as i64).abs() as usize;
    let gap = delta.max(2).min(175);
    match steepest_gradient(pix, reverse, gap) {
        Some(pos) => {
            hist.prev1 = hist.prev0;
            hist.prev0 = pos;
            pos
        }
        None => last,
    }
}

/// TCD1103 frame geometry: 32 leading dummy outputs, 1500 effective
/// pixels, 14 trailing dummies.
pub const TCD_FRAME_LEN: usize = 1546;
/// First and last effective pixel indices.
pub const TCD_ACTIVE: core::ops::Range<usize> = 32..1532;
/// Physically light-shielded pixels used as the per-frame dark level.
pub const TCD_DARK_REF: core::ops::RangeInclusive<usize> = 16..=28;

/// Bright-tip scan for the TCD1103-class sensor.
///
/// This sensor's analog output is inverted (brighter pixels read lower)
/// and its dark level drifts frame to frame with the integration time,
/// so each frame carries its own reference in the masked pixels. The
/// plunger appears as a bright (reflective) block; the near edge of the
/// first sustained bright run from the tip end is the position.
pub fn scan_bright_tip(pix: &[u8], reverse: bool, last: u32) -> u32 {
    if pix.len() < TCD_FRAME_LEN {
        return last;
    }

    // Per-frame dark level from the shielded reference pixels.
    let mut dark_sum = 0u32;
    for i in TCD_DARK_REF {
        dark_sum += pix[i] as u32;
    }
    let dark_ref = (dark_sum / (28 - 16 + 1)) as i32;

    // Histogram the active region and take the brightest level present
    // (lowest reading), discarding the two lowest occupied levels as
    // possible ADC noise outliers.
    let mut hist = [0u16; 256];
    for &p in &pix[TCD_ACTIVE] {
        hist[p as usize] += 1;
    }
    let mut bright_ref = dark_ref;
    let mut occupied = 0;
    for (level, &count) in hist.iter().enumerate() {
        if count != 0 {
            occupied += 1;
            if occupied > 2 {
                bright_ref = level as i32;
                break;
            }
        }
    }

    // Too little dynamic range means an underexposed frame or no
    // plunger in view; any match would just be noise.
    if dark_ref - bright_ref < 20 {
        return last;
    }
    let mid_ref = (dark_ref + bright_ref) / 2;

    // Scan from the tip end: there is always dark background beyond the
    // plunger tip, so the first bright block is the tip.
    let (start, end, step): (i32, i32, i32) = if reverse {
        (TCD_ACTIVE.end as i32 - 1, TCD_ACTIVE.start as i32 - 1, -1)
    } else {
        (TCD_ACTIVE.start as i32, TCD_ACTIVE.end as i32, 1)
    };

    const CONFIRM: i32 = 16;
    let mut i = start;
    while i != end {
        if (pix[i as usize] as i32) <= mid_ref {
            // Candidate edge: require at least 3/4 of the next run of
            // pixels to also be bright, to reject lone noisy pixels.
            let mut n_bright = 0;
            let mut k = 1;
            while k < CONFIRM {
                let j = i + k * step;
                if j < 0 || j as usize >= pix.len() {
                    break;
                }
                if (pix[j as usize] as i32) <= mid_ref {
                    n_bright += 1;
                }
                k += 1;
            }
            if n_bright > CONFIRM * 3 / 4 {
                return i as u32;
            }
        }
        i += step;
    }

    last
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bright plateau, linear ramp, dark plateau.
    fn shadow_image(n: usize, edge: usize, ramp: usize, bright: u8, dark: u8) -> Vec<u8> {
        let mut pix = vec![bright; n];
        for i in 0..ramp {
            let frac = i as i32 * (bright as i32 - dark as i32) / ramp as i32;
            pix[edge + i] = (bright as i32 - frac) as u8;
        }
        for p in pix.iter_mut().skip(edge + ramp) {
            *p = dark;
        }
        pix
    }

    #[test]
    fn steady_slope_finds_blurred_edge() {
        let pix = shadow_image(1500, 600, 40, 200, 20);
        let pos = scan_steady_slope(&pix, false, 0);
        // Midpoint of the ramp is at ~620.
        assert!(
            (pos as i32 - 620).abs() <= 16,
            "position {} not near 620",
            pos
        );
    }

    #[test]
    fn steady_slope_reversed() {
        let mut pix = shadow_image(1500, 600, 40, 200, 20);
        pix.reverse();
        let pos = scan_steady_slope(&pix, true, 0);
        assert!(
            (pos as i32 - (1499 - 620)).abs() <= 16,
            "position {} not near {}",
            pos,
            1499 - 620
        );
    }

    #[test]
    fn steady_slope_rejects_flat_frame() {
        let pix = vec![128u8; 1500];
        assert_eq!(scan_steady_slope(&pix, false, 777), 777);
    }

    #[test]
    fn steepest_slope_finds_sharp_edge() {
        let pix = shadow_image(1500, 700, 2, 180, 40);
        let pos = scan_steepest_slope(&pix, false, 0);
        assert!(
            (pos as i32 - 700).abs() <= 6,
            "position {} not near 700",
            pos
        );
    }

    #[test]
    fn steepest_slope_rejects_low_contrast() {
        let pix = shadow_image(1500, 700, 2, 128, 120);
        assert_eq!(scan_steepest_slope(&pix, false, 555), 555);
    }

    #[test]
    fn speed_gap_first_frame_matches_fixed_gap() {
        let mut hist = GapHistory::default();
        // Empty history gives the minimum gap, so the first frame reads
        // like mode 1.
        let pix = shadow_image(1500, 700, 2, 180, 40);
        let p0 = scan_speed_gap(&pix, false, 0, &mut hist);
        assert_eq!(p0, scan_steepest_slope(&pix, false, 0));
        assert_eq!(hist.prev0, p0);
    }

    #[test]
    fn speed_gap_converges_after_history_jump() {
        let mut hist = GapHistory::default();
        let pix = shadow_image(1500, 700, 2, 180, 40);
        // The first reading leaves a large delta in the history (from
        // the zero seed), which balloons the gap and biases the next
        // few readings toward the gap center. Rescanning a static edge
        // shrinks the delta each frame; it must settle back onto the
        // edge.
        let mut pos = 0;
        for _ in 0..10 {
            pos = scan_speed_gap(&pix, false, pos, &mut hist);
        }
        assert!(
            (pos as i32 - 700).abs() <= 2,
            "position {} did not converge to 700",
            pos
        );
    }

    /// TCD-style frame: inverted polarity, shielded dark reference,
    /// reflective tip block with slight brightness texture.
    fn tcd_image(tip_lo: usize, tip_hi: usize) -> Vec<u8> {
        let mut pix = vec![0xCCu8; TCD_FRAME_LEN];
        for i in tip_lo..tip_hi {
            pix[i] = 0x54 + (i % 3) as u8;
        }
        pix
    }

    #[test]
    fn bright_tip_found_from_tip_end() {
        let pix = tcd_image(400, 700);
        assert_eq!(scan_bright_tip(&pix, false, 0), 400);
    }

    #[test]
    fn bright_tip_reversed() {
        let pix = tcd_image(400, 700);
        assert_eq!(scan_bright_tip(&pix, true, 0), 699);
    }

    #[test]
    fn bright_tip_ignores_lone_noise_pixel() {
        let mut pix = tcd_image(400, 700);
        // One bright outlier well before the tip must not match.
        pix[100] = 0x10;
        pix[101] = 0x52;
        assert_eq!(scan_bright_tip(&pix, false, 0), 400);
    }

    #[test]
    fn bright_tip_rejects_underexposed_frame() {
        // Uniform dark frame with trivial texture: no usable contrast.
        let mut pix = vec![0xCCu8; TCD_FRAME_LEN];
        pix[500] = 0xCB;
        pix[600] = 0xCA;
        assert_eq!(scan_bright_tip(&pix, false, 321), 321);
    }
}
