//! Linear imaging sensor acquisition engine (TCD1103-class CCDs).
//!
//! The sensor clocks ~1546 analog pixel samples out one pin per frame
//! and needs three continuously running logic signals from us: the
//! master pixel clock (FM), the shift gate (SH, the electronic
//! shutter), and the integration clear gate (ICG). The engine keeps
//! the sensor streaming with zero per-pixel CPU cost:
//!
//! - three PIO state machines generate FM, SH, and ICG, phase-locked
//!   to the system clock; SH and ICG each consume one FIFO word per
//!   frame giving the inter-frame delay, queued *two frames ahead* by
//!   the completion ISR;
//! - the ADC free-runs at the pixel rate (reclocked from the system
//!   PLL so it cannot drift against the PIO), draining through DMA;
//! - three DMA channels chain in a loop `A -> C -> B -> C -> A ...`:
//!   A and B fill the two pixel buffers, and C consumes the ADC's
//!   meaningless inter-frame samples into a discard word (the FIFO
//!   must keep draining or it overflows). Retargeting C's chain in its
//!   completion ISR sustains the double-buffering forever with no
//!   other CPU involvement, and the same ISR is the *only* writer of
//!   the published-frame index, so readers always see a complete
//!   frame.
//!
//! Clients needing a frame for longer than one frame period (edge
//! detection is allowed to be slow) take a stable copy via
//! [`ImagingSensor::stable_frame`], which memcpys the published buffer
//! in task context.
//!
//! If the ISR ever finds the chain dead (neither pixel channel
//! started after C completed), it only flags the condition; the task
//! loop notices and rebuilds the whole chain from scratch. No recovery
//! is attempted at interrupt level.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use plunger::scan::TCD_FRAME_LEN;
use rp2040_pac as pac;

use super::funcsel;
use crate::util::pingpong::PingPong;
use crate::util::spin_lock::SpinLock;

/// Buffer length rounded up to a word multiple so word-sized copies
/// and DMA ring alignment both work out.
const FRAME_BUF_LEN: usize = (TCD_FRAME_LEN + 3) & !3;

/// System-clock ticks per PIO cycle for the SH/ICG machines
/// (125 MHz / 16 = 128 ns per cycle).
const SLOW_TICKS: u32 = 16;

/// ADC samples consumed by channel C during the minimum inter-frame
/// gap (SH/ICG pulse train plus settling).
const MIN_GAP_SAMPLES: u32 = 32;

/// Pixel (= ADC sample) rate: 125 MHz / 256 = 488.28 kHz, just inside
/// the ADC's conversion limit. One frame is ~3.2 ms.
const PIXEL_RATE_HZ: u32 = 488_281;

/// DREQ number for the ADC FIFO.
const TREQ_ADC: u8 = 36;

/// DMA channel assignment.
const CH_A: usize = 0;
const CH_B: usize = 1;
const CH_C: usize = 2;

/// One pixel frame plus its completion timestamp.
pub struct PixBuf {
    pub t: u64,
    pub pix: [u8; FRAME_BUF_LEN],
}

impl PixBuf {
    const fn new() -> Self {
        PixBuf {
            t: 0,
            pix: [0; FRAME_BUF_LEN],
        }
    }
}

/// Ping-pong pixel buffers. Written by DMA, published by the
/// completion ISR, read by the task loop.
static FRAMES: PingPong<PixBuf> = PingPong::new(PixBuf::new(), PixBuf::new());

/// Discard target for channel C.
static mut DISCARD: u32 = 0;

/// Set by the ISR when the chain died; consumed by the task loop.
static STALLED: AtomicBool = AtomicBool::new(false);

/// Inter-frame gap for upcoming frames, in ADC samples. Written from
/// task context (integration-time changes), read by the ISR.
static GAP_SAMPLES: AtomicU32 = AtomicU32::new(MIN_GAP_SAMPLES);

/// Scan-time statistics shared with the ISR.
#[derive(Default)]
struct FrameStats {
    n_frames: u64,
    total_frame_us: u64,
    last_frame_t: u64,
}

static FRAME_STATS: SpinLock<FrameStats> = SpinLock::new(FrameStats {
    n_frames: 0,
    total_frame_us: 0,
    last_frame_t: 0,
});

// Hand-assembled PIO programs, loaded back to back in instruction
// memory. FM is a free-running square wave; SH and ICG park on a
// blocking PULL, count down the delay word, then fire their pulse.
//
//   fm:   set pins, 1            0xE001
//         set pins, 0            0xE000
//
//   sh:   pull block             0x80A0
//         out x, 32              0x6020
//   loop: jmp x--, loop          0x0040 | loop_addr
//         set pins, 1 [7]        0xE701   ; 8 cycles = 1.02 us high
//         set pins, 0            0xE000
//
//   icg:  pull block             0x80A0
//         out x, 32              0x6020
//   loop: jmp x--, loop          0x0040 | loop_addr
//         set pins, 1 [31]       0xFF01   ; 32 cycles high...
//         set pins, 1 [6]        0xE601   ; ...plus 7 = 5.0 us total
//         set pins, 0            0xE000
const FM_ORIGIN: u8 = 0;
const SH_ORIGIN: u8 = 2;
const ICG_ORIGIN: u8 = 7;
const PIO_PROGRAM: [u16; 13] = [
    0xE001,
    0xE000,
    0x80A0,
    0x6020,
    0x0040 | (SH_ORIGIN as u16 + 2),
    0xE701,
    0xE000,
    0x80A0,
    0x6020,
    0x0040 | (ICG_ORIGIN as u16 + 2),
    0xFF01,
    0xE601,
    0xE000,
];

/// GPIO assignment for the sensor's logic signals.
#[derive(Copy, Clone, Debug)]
pub struct ImagingPins {
    pub fm: u8,
    pub sh: u8,
    pub icg: u8,
    /// ADC-capable analog input (GPIO 26..=29) wired to the sensor's
    /// pixel output stage.
    pub os: u8,
}

/// The acquisition engine. Exclusively owns the DMA block, PIO0, and
/// the ADC.
pub struct ImagingSensor {
    dma: pac::DMA,
    pio: pac::PIO0,
    adc: pac::ADC,
    pins: ImagingPins,
    /// Private stable copy for long-running clients.
    stable: PixBuf,
    /// Requested minimum integration time, microseconds; 0 means the
    /// natural frame rate.
    integration_us: u32,
}

impl ImagingSensor {
    /// Brings the whole signal/ADC/DMA arrangement up and starts the
    /// continuous acquisition loop.
    ///
    /// `inverted_logic` matches an external inverter (the sensor data
    /// sheet recommends a 74HC04 buffer on the high-capacitance logic
    /// gates); the inversion is folded into the GPIO output override
    /// so the PIO programs stay polarity-neutral.
    pub fn init(
        dma: pac::DMA,
        pio: pac::PIO0,
        adc: pac::ADC,
        resets: &pac::RESETS,
        io: &pac::IO_BANK0,
        pads: &pac::PADS_BANK0,
        pins: ImagingPins,
        inverted_logic: bool,
    ) -> ImagingSensor {
        // Release the blocks from reset.
        resets.reset.modify(|_, w| {
            w.dma().clear_bit().pio0().clear_bit().adc().clear_bit()
        });
        while resets.reset_done.read().dma().bit_is_clear()
            || resets.reset_done.read().pio0().bit_is_clear()
            || resets.reset_done.read().adc().bit_is_clear()
        {}

        // Logic outputs: PIO function, optionally inverted at the pad
        // mux, full drive for the sensor's gate capacitance.
        for &pin in &[pins.fm, pins.sh, pins.icg] {
            pads.gpio[pin as usize].write(|w| {
                w.ie().clear_bit().od().clear_bit().drive()._12m_a()
            });
            io.gpio[pin as usize].gpio_ctrl.write(|w| unsafe {
                let w = w.funcsel().bits(funcsel::PIO0);
                if inverted_logic {
                    w.outover().bits(0x1) // invert the peripheral output
                } else {
                    w
                }
            });
        }
        // Analog input pad: digital functions off entirely.
        pads.gpio[pins.os as usize]
            .write(|w| w.ie().clear_bit().od().set_bit());
        io.gpio[pins.os as usize]
            .gpio_ctrl
            .write(|w| unsafe { w.funcsel().bits(funcsel::NULL) });

        let mut engine = ImagingSensor {
            dma,
            pio,
            adc,
            pins,
            stable: PixBuf::new(),
            integration_us: 0,
        };
        engine.load_pio_programs();
        engine.start();
        engine
    }

    fn load_pio_programs(&mut self) {
        let pio = &self.pio;

        for (i, &op) in PIO_PROGRAM.iter().enumerate() {
            pio.instr_mem[i].write(|w| unsafe { w.bits(op as u32) });
        }

        // SM0: FM master clock. Two-instruction wrap, clkdiv 32 for a
        // ~1.95 MHz square wave (4 FM periods per pixel).
        let sm = &pio.sm[0];
        sm.sm_clkdiv.write(|w| unsafe { w.int().bits(32) });
        sm.sm_execctrl.write(|w| unsafe {
            w.wrap_bottom().bits(FM_ORIGIN).wrap_top().bits(FM_ORIGIN + 1)
        });
        sm.sm_pinctrl.write(|w| unsafe {
            w.set_base().bits(self.pins.fm).set_count().bits(1)
        });

        // SM1: SH shutter pulses, delay-counted at 128 ns per cycle.
        let sm = &pio.sm[1];
        sm.sm_clkdiv.write(|w| unsafe { w.int().bits(SLOW_TICKS as u16) });
        sm.sm_execctrl.write(|w| unsafe {
            w.wrap_bottom().bits(SH_ORIGIN).wrap_top().bits(SH_ORIGIN + 4)
        });
        sm.sm_pinctrl.write(|w| unsafe {
            w.set_base().bits(self.pins.sh).set_count().bits(1)
        });

        // SM2: ICG clear pulses.
        let sm = &pio.sm[2];
        sm.sm_clkdiv.write(|w| unsafe { w.int().bits(SLOW_TICKS as u16) });
        sm.sm_execctrl.write(|w| unsafe {
            w.wrap_bottom().bits(ICG_ORIGIN).wrap_top().bits(ICG_ORIGIN + 5)
        });
        sm.sm_pinctrl.write(|w| unsafe {
            w.set_base().bits(self.pins.icg).set_count().bits(1)
        });

        // Jump every machine to its program origin.
        pio.sm[0]
            .sm_instr
            .write(|w| unsafe { w.bits(FM_ORIGIN as u32) });
        pio.sm[1]
            .sm_instr
            .write(|w| unsafe { w.bits(SH_ORIGIN as u32) });
        pio.sm[2]
            .sm_instr
            .write(|w| unsafe { w.bits(ICG_ORIGIN as u32) });
    }

    /// ADC free-running into its FIFO with DMA pacing.
    fn start_adc(&self) {
        let adc = &self.adc;
        adc.cs.write(|w| w.en().set_bit());
        while adc.cs.read().ready().bit_is_clear() {}

        // FIFO: 8-bit samples (shift), DREQ at one sample.
        adc.fcs.write(|w| unsafe {
            w.en().set_bit()
                .dreq_en().set_bit()
                .shift().set_bit()
                .thresh().bits(1)
        });
        // Pace conversions to the pixel rate. The divider counts
        // clk_adc ticks between conversion starts.
        let div = (48_000_000u32 / PIXEL_RATE_HZ) - 1;
        adc.div.write(|w| unsafe { w.int().bits(div as u16) });
        adc.cs.modify(|_, w| unsafe {
            w.ainsel().bits(self.pins.os - 26).start_many().set_bit()
        });
    }

    /// Programs the three channels and starts the chain at A.
    fn start_dma(&self) {
        let dma = &self.dma;
        let fifo_addr = pac::ADC::ptr() as u32 + 0x0C;

        // A and B: ADC FIFO -> pixel buffers, byte-wide. A fills the
        // initial *back* buffer (1), so the first publish at the end
        // of the first gap flips exactly the buffer A filled.
        for (ch, buf_idx) in [(CH_A, 1usize), (CH_B, 0usize)].iter().copied() {
            let dst = unsafe { core::ptr::addr_of_mut!((*FRAMES.buf_ptr(buf_idx)).pix) };
            dma.ch[ch].ch_read_addr.write(|w| unsafe { w.bits(fifo_addr) });
            dma.ch[ch].ch_write_addr.write(|w| unsafe { w.bits(dst as u32) });
            dma.ch[ch]
                .ch_trans_count
                .write(|w| unsafe { w.bits(TCD_FRAME_LEN as u32) });
            dma.ch[ch].ch_al1_ctrl.write(|w| unsafe {
                w.en().set_bit()
                    .data_size().size_byte()
                    .incr_read().clear_bit()
                    .incr_write().set_bit()
                    .treq_sel().bits(TREQ_ADC)
                    .chain_to().bits(CH_C as u8)
            });
        }

        // C: ADC FIFO -> discard, no increment; completion interrupt
        // drives the whole frame bookkeeping.
        dma.ch[CH_C].ch_read_addr.write(|w| unsafe { w.bits(fifo_addr) });
        dma.ch[CH_C].ch_write_addr.write(|w| unsafe {
            w.bits(core::ptr::addr_of!(DISCARD) as u32)
        });
        dma.ch[CH_C]
            .ch_trans_count
            .write(|w| unsafe { w.bits(GAP_SAMPLES.load(Ordering::Relaxed)) });
        dma.ch[CH_C].ch_al1_ctrl.write(|w| unsafe {
            w.en().set_bit()
                .data_size().size_byte()
                .incr_read().clear_bit()
                .incr_write().clear_bit()
                .treq_sel().bits(TREQ_ADC)
                // A fills first, so the gap after it hands off to B.
                .chain_to().bits(CH_B as u8)
        });

        dma.inte0.modify(|r, w| unsafe { w.bits(r.bits() | (1 << CH_C)) });

        // Fire A to start the loop.
        dma.ch[CH_A]
            .ch_ctrl_trig
            .modify(|r, w| unsafe { w.bits(r.bits()) });
    }

    fn start(&mut self) {
        STALLED.store(false, Ordering::Relaxed);
        self.recalc_gap();
        self.start_adc();
        self.start_dma();

        // Prime the pulse generators two frames ahead, then let all
        // three machines loose in the same cycle so their phase
        // relationship is fixed from the first edge.
        let gap = GAP_SAMPLES.load(Ordering::Relaxed);
        for _ in 0..2 {
            self.pio.txf[1].write(|w| unsafe { w.bits(Self::sh_delay_words(gap)) });
            self.pio.txf[2].write(|w| unsafe { w.bits(Self::icg_delay_words(gap)) });
        }
        self.pio
            .ctrl
            .modify(|_, w| unsafe { w.sm_enable().bits(0b0111) });
    }

    /// SH delay word for a given gap length: the frame period in
    /// 128 ns PIO cycles, less the pulse overhead.
    fn sh_delay_words(gap_samples: u32) -> u32 {
        let frame_samples = TCD_FRAME_LEN as u32 + gap_samples;
        // One pixel = 256 sys ticks = 16 slow PIO cycles.
        frame_samples * 16 - 10
    }

    fn icg_delay_words(gap_samples: u32) -> u32 {
        // ICG leads SH slightly so the clear gate brackets the shift.
        let frame_samples = TCD_FRAME_LEN as u32 + gap_samples;
        frame_samples * 16 - 44
    }

    /// Recomputes the inter-frame gap from the requested integration
    /// time. Integration runs from one clear pulse to the next, so
    /// longer exposures pad the gap beyond the hardware minimum.
    fn recalc_gap(&self) {
        let frame_us = (TCD_FRAME_LEN as u64 * 1_000_000 / PIXEL_RATE_HZ as u64) as u32;
        let gap = if self.integration_us > frame_us {
            let extra_us = self.integration_us - frame_us;
            let extra_samples = (extra_us as u64 * PIXEL_RATE_HZ as u64 / 1_000_000) as u32;
            MIN_GAP_SAMPLES + extra_samples
        } else {
            MIN_GAP_SAMPLES
        };
        GAP_SAMPLES.store(gap, Ordering::Relaxed);
    }

    /// Requests a minimum integration (exposure) time; zero returns to
    /// the natural frame rate. Takes effect from the next frame the
    /// ISR programs.
    pub fn set_integration_time(&mut self, us: u32) {
        self.integration_us = us;
        self.recalc_gap();
    }

    /// Timestamp of the most recently completed frame.
    pub fn frame_timestamp(&self) -> u64 {
        FRAMES.with_front(|f| f.t)
    }

    /// Copies the latest completed frame into the private stable
    /// buffer and returns it with its timestamp. The copy runs in
    /// task context and the result stays valid until the next call,
    /// however long the caller's image processing takes.
    pub fn stable_frame(&mut self) -> (&[u8], u64) {
        let stable = &mut self.stable;
        FRAMES.with_front(|f| {
            stable.pix.copy_from_slice(&f.pix);
            stable.t = f.t;
        });
        (&self.stable.pix[..TCD_FRAME_LEN], self.stable.t)
    }

    /// Average frame acquisition time, microseconds.
    pub fn avg_scan_time(&self) -> u32 {
        cortex_m::interrupt::free(|_| {
            let stats = FRAME_STATS.try_lock().expect("stats lock");
            if stats.n_frames != 0 {
                (stats.total_frame_us / stats.n_frames) as u32
            } else {
                0
            }
        })
    }

    /// Task-level stall recovery: if the ISR flagged a dead chain,
    /// tear the loop down and rebuild it from scratch.
    pub fn task(&mut self) {
        // Load/store consume is fine: the task loop is the only
        // consumer, and a redundant restart is harmless anyway.
        if STALLED.load(Ordering::Relaxed) {
            STALLED.store(false, Ordering::Relaxed);
            // Quiesce: abort channels, stop the ADC and PIO, then
            // restart the whole arrangement.
            self.adc.cs.modify(|_, w| w.start_many().clear_bit());
            self.pio.ctrl.modify(|_, w| unsafe { w.sm_enable().bits(0) });
            self.dma
                .chan_abort
                .write(|w| unsafe { w.bits((1 << CH_A) | (1 << CH_B) | (1 << CH_C)) });
            while self.dma.chan_abort.read().bits() != 0 {}
            // Drain whatever the ADC FIFO still holds.
            while self.adc.fcs.read().empty().bit_is_clear() {
                let _ = self.adc.fifo.read().bits();
            }
            self.start();
        }
    }
}

/// Plunger sensor adapter over the acquisition engine.
///
/// Readiness means "a frame newer than the last one scanned has been
/// published"; reading takes a stable copy and runs the configured
/// edge-detection scan over it. The TCD-style reflective scan is the
/// default; the shadow-detection modes are selectable for backlit
/// installations through the generic scan-mode setting (mode codes
/// 0..=2, shifted behind the reflective default).
pub struct PhotoPlungerSensor {
    engine: ImagingSensor,
    /// `None` selects the reflective bright-tip scan.
    shadow_mode: Option<plunger::scan::ScanMode>,
    gap_history: plunger::scan::GapHistory,
    last: plunger::RawSample,
    reverse_hint: bool,
}

impl PhotoPlungerSensor {
    pub fn new(engine: ImagingSensor) -> Self {
        PhotoPlungerSensor {
            engine,
            shadow_mode: None,
            gap_history: plunger::scan::GapHistory::default(),
            last: plunger::RawSample::default(),
            reverse_hint: false,
        }
    }

    /// The generic layer reverses readings numerically; the scan also
    /// wants to know which end to start from, since the tip edge is
    /// found by scanning in from the background side.
    pub fn set_reverse_hint(&mut self, reverse: bool) {
        self.reverse_hint = reverse;
    }

    /// Stall-recovery plumbing; call once per main-loop iteration.
    pub fn task(&mut self) {
        self.engine.task();
    }
}

impl plunger::Sensor for PhotoPlungerSensor {
    fn name(&self) -> &'static str {
        "tcd1103"
    }

    fn native_scale(&self) -> u32 {
        TCD_FRAME_LEN as u32
    }

    fn is_ready(&mut self) -> bool {
        self.engine.frame_timestamp() > self.last.t
    }

    fn read_raw(&mut self) -> Option<plunger::RawSample> {
        if !self.is_ready() {
            return Some(self.last);
        }
        let reverse = self.reverse_hint;
        let shadow_mode = self.shadow_mode;
        let last_pos = self.last.pos;
        let (pix, t) = self.engine.stable_frame();
        let pos = match shadow_mode {
            None => plunger::scan::scan_bright_tip(pix, reverse, last_pos),
            Some(mode) => {
                plunger::scan::scan_shadow(mode, pix, reverse, last_pos, &mut self.gap_history)
            }
        };
        self.last = plunger::RawSample { t, pos };
        Some(self.last)
    }

    fn set_integration_time(&mut self, us: u32) {
        self.engine.set_integration_time(us);
    }

    fn set_scan_mode(&mut self, mode: u8) {
        // 0 = reflective bright-tip (default); 1..=3 map onto the
        // shadow-scan variants.
        self.shadow_mode = match mode {
            0 => None,
            m => plunger::scan::ScanMode::from_code(m - 1),
        };
    }

    fn avg_scan_time(&self) -> u32 {
        self.engine.avg_scan_time()
    }
}

/// DMA completion ISR entry (channel C = end of the inter-frame gap).
/// The pixel transfer that preceded the gap is complete: publish its
/// buffer, retarget C for the frame after next, and top up the pulse
/// generators.
pub fn dma_irq() {
    // Safety: the ISR only touches the engine's own channels and
    // FIFOs; the engine quiesces them before reconfiguring.
    let dma = unsafe { &*pac::DMA::ptr() };
    let pio = unsafe { &*pac::PIO0::ptr() };

    let ints = dma.ints0.read().bits();
    if ints & (1 << CH_C) == 0 {
        return;
    }
    dma.ints0.write(|w| unsafe { w.bits(1 << CH_C) });

    // The buffer the chain just finished is the current back buffer;
    // stamp it and publish.
    let t = super::clock::now_us();
    unsafe {
        FRAMES.back_mut().t = t;
    }
    FRAMES.publish();

    // Stall check: by the time the gap ends, the chain must have
    // started the next pixel transfer. If neither pixel channel is
    // running, the loop is dead; leave recovery to the task loop.
    let a_busy = dma.ch[CH_A].ch_al1_ctrl.read().busy().bit_is_set();
    let b_busy = dma.ch[CH_B].ch_al1_ctrl.read().busy().bit_is_set();
    if !a_busy && !b_busy {
        STALLED.store(true, Ordering::Relaxed);
        return;
    }

    // Retarget C at the buffer that just published, for the gap after
    // the now-running transfer, and reload its count (which may have
    // changed with the integration time). One frame of lead is all C
    // needs; the wrong moment to do this would be while C is running,
    // and it cannot be - we are in its completion interrupt.
    let next_chain = if a_busy { CH_B as u8 } else { CH_A as u8 };
    let gap = GAP_SAMPLES.load(Ordering::Relaxed);
    dma.ch[CH_C].ch_al1_ctrl.modify(|_, w| unsafe {
        w.chain_to().bits(next_chain)
    });
    dma.ch[CH_C]
        .ch_trans_count
        .write(|w| unsafe { w.bits(gap) });

    // Queue the pulse timing for the frame after next, keeping the
    // FIFOs two frames deep.
    pio.txf[1].write(|w| unsafe { w.bits(ImagingSensor::sh_delay_words(gap)) });
    pio.txf[2].write(|w| unsafe { w.bits(ImagingSensor::icg_delay_words(gap)) });

    // Scan-time statistics.
    if let Some(mut stats) = FRAME_STATS.try_lock() {
        if stats.last_frame_t != 0 {
            stats.total_frame_us += t - stats.last_frame_t;
            stats.n_frames += 1;
        }
        stats.last_frame_t = t;
    }
}
