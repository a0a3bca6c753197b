//! Interrupt-driven quadrature decoder.
//!
//! Two GPIO inputs carry the sensor's Gray-coded channel pair; every
//! edge on either line interrupts, and the handler feeds the *current*
//! level of both lines through the transition table (reading levels
//! rather than edge events keeps the state self-correcting after a
//! missed interrupt). The counter is a single 32-bit word written only
//! by the ISR, so readers need no lock; word loads and stores are the
//! whole synchronization story, made explicit with relaxed atomics.
//!
//! Latency rules here: a fast encoder can produce edges at tens of
//! kilohertz, and a missed edge is unrecoverable drift until the next
//! auto-zero. The GPIO IRQ gets the highest interrupt priority, and
//! the firmware binary is expected to place [`isr`] in RAM (flash XIP
//! misses cost more than the handler itself).

use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use plunger::quad::TRANSITION_DELTA;
use rp2040_pac as pac;

use super::funcsel;

// Decoder state. Single writer (the ISR); any number of readers.
static COUNT: AtomicI32 = AtomicI32::new(0);
static STATE: AtomicU32 = AtomicU32::new(0);
// GPIO numbers for channels A and B, set once at init.
static PIN_A: AtomicU32 = AtomicU32::new(0);
static PIN_B: AtomicU32 = AtomicU32::new(0);

/// Lines-per-inch of the attached encoder scale (AEDR-8300 modules
/// are 75 LPI; four quadrature states per line pair).
pub struct QuadratureDecoder {
    lpi: u32,
}

impl QuadratureDecoder {
    /// Claims the two channel GPIOs and enables edge interrupts on
    /// both edges of both lines. The caller unmasks `IO_IRQ_BANK0` at
    /// top priority once all GPIO users are configured.
    pub fn init(
        io: &pac::IO_BANK0,
        pads: &pac::PADS_BANK0,
        pin_a: u8,
        pin_b: u8,
        lpi: u32,
    ) -> QuadratureDecoder {
        PIN_A.store(pin_a as u32, Ordering::Relaxed);
        PIN_B.store(pin_b as u32, Ordering::Relaxed);

        for &pin in &[pin_a, pin_b] {
            // Input with pull-up, schmitt trigger on.
            pads.gpio[pin as usize].write(|w| {
                w.ie().set_bit()
                    .od().clear_bit()
                    .pue().set_bit()
                    .pde().clear_bit()
                    .schmitt().set_bit()
            });
            io.gpio[pin as usize]
                .gpio_ctrl
                .write(|w| unsafe { w.funcsel().bits(funcsel::SIO) });

            // Both edges, routed to proc0.
            let reg = (pin / 8) as usize;
            let shift = (pin % 8) * 4;
            // EDGE_LOW | EDGE_HIGH for this pin's 4-bit field.
            let mask = 0b1100u32 << shift;
            io.proc0_inte[reg].modify(|r, w| unsafe { w.bits(r.bits() | mask) });
        }

        // Seed the state from the live pin levels so the first edge
        // counts correctly.
        let sio = unsafe { &*pac::SIO::ptr() };
        let levels = sio.gpio_in.read().bits();
        let a = (levels >> pin_a) & 1;
        let b = (levels >> pin_b) & 1;
        STATE.store(a | (b << 1), Ordering::Relaxed);
        COUNT.store(0, Ordering::Relaxed);

        QuadratureDecoder { lpi }
    }

    /// Current signed count. Instantaneously accurate: the ISR updates
    /// it on every physical transition.
    pub fn count(&self) -> i32 {
        COUNT.load(Ordering::Relaxed)
    }

    /// Current A/B channel levels (A in bit 0).
    pub fn channel_state(&self) -> u8 {
        STATE.load(Ordering::Relaxed) as u8
    }

    /// Resets the counter. A single word store, so no interrupt
    /// masking is needed around it.
    pub fn zero(&self) {
        COUNT.store(0, Ordering::Relaxed);
    }

    pub fn lpi(&self) -> u32 {
        self.lpi
    }
}

/// GPIO edge ISR entry. The hardware shares one vector across all
/// GPIO interrupts, so this runs for unrelated pins too; reading the
/// current levels makes that harmless (a no-change update adds zero).
pub fn isr() {
    let pin_a = PIN_A.load(Ordering::Relaxed);
    let pin_b = PIN_B.load(Ordering::Relaxed);

    // Safety: reads of GPIO_IN and writes to our own INTR bits are
    // safe from this single ISR.
    let sio = unsafe { &*pac::SIO::ptr() };
    let io = unsafe { &*pac::IO_BANK0::ptr() };

    let levels = sio.gpio_in.read().bits();
    let a = (levels >> pin_a) & 1;
    let b = (levels >> pin_b) & 1;
    let new_state = a | (b << 1);

    let prev = STATE.load(Ordering::Relaxed);
    let delta = TRANSITION_DELTA[((prev << 2) | new_state) as usize] as i32;
    if delta != 0 {
        // Single-writer: a load/store pair is atomic enough, and the
        // M0+ has no RMW atomics to use instead.
        COUNT.store(
            COUNT.load(Ordering::Relaxed).wrapping_add(delta),
            Ordering::Relaxed,
        );
    }
    STATE.store(new_state, Ordering::Relaxed);

    // Acknowledge the edge flags for both channel pins.
    for pin in [pin_a, pin_b] {
        let reg = (pin / 8) as usize;
        let shift = (pin % 8) * 4;
        io.intr[reg].write(|w| unsafe { w.bits(0b1100u32 << shift) });
    }
}

/// Plunger sensor adapter for a quadrature encoder.
///
/// The encoder's natural zero is wherever the plunger sat at power-on,
/// which for a spring-loaded plunger is the rest position; the generic
/// layer wants unsigned readings with zero at the forward limit. The
/// adapter offsets the count by the calibrated rest point (default:
/// the 1/6 mark, standard plunger geometry) and clamps to the native
/// scale of 13 * LPI counts (3.25 inches of travel at 4 counts per
/// line pair).
pub struct QuadraturePlungerSensor {
    decoder: QuadratureDecoder,
    native_scale: u32,
    rest_count: i32,
}

impl QuadraturePlungerSensor {
    pub fn new(decoder: QuadratureDecoder) -> Self {
        let native_scale = 13 * decoder.lpi();
        QuadraturePlungerSensor {
            decoder,
            native_scale,
            rest_count: native_scale as i32 / 6,
        }
    }
}

impl plunger::Sensor for QuadraturePlungerSensor {
    fn name(&self) -> &'static str {
        "aedr8300"
    }

    fn native_scale(&self) -> u32 {
        self.native_scale
    }

    fn read_raw(&mut self) -> Option<plunger::RawSample> {
        // The count is always current, so the measurement time is now.
        let pos = self.decoder.count() + self.rest_count;
        Some(plunger::RawSample {
            t: super::clock::now_us(),
            pos: pos.max(0).min(self.native_scale as i32) as u32,
        })
    }

    fn auto_zero(&mut self, _cal: &plunger::CalibrationData) -> bool {
        // The plunger has been still long enough that it must be
        // parked; re-anchor the relative count there.
        self.decoder.zero();
        true
    }

    fn on_restore_calibration(&mut self, cal: &plunger::CalibrationData) {
        self.rest_count = cal.zero as i32;
    }

    fn begin_calibration(&mut self, cal: &mut plunger::CalibrationData) {
        // Calibration starts with the plunger at rest: make that the
        // count origin so the observed range lands where expected.
        self.decoder.zero();
        let _ = cal;
    }
}
