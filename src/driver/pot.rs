//! Potentiometer plunger input on the on-board ADC.
//!
//! A slide potentiometer coupled to the plunger rod is the simplest
//! position sensor there is: absolute, linear, and readable in one
//! ADC conversion. Each task tick runs one conversion; at 2 us per
//! conversion the poll is effectively free.

use plunger::{RawSample, Sensor};
use rp2040_pac as pac;

use super::clock::now_us;

pub struct PotPlungerSensor {
    adc: pac::ADC,
    channel: u8,
}

impl PotPlungerSensor {
    /// `channel` selects the ADC input 0..=3 (GPIO 26..=29). The ADC
    /// block is owned exclusively; a configuration using the imaging
    /// engine cannot also use the potentiometer input.
    pub fn init(
        adc: pac::ADC,
        resets: &pac::RESETS,
        pads: &pac::PADS_BANK0,
        channel: u8,
    ) -> PotPlungerSensor {
        resets.reset.modify(|_, w| w.adc().clear_bit());
        while resets.reset_done.read().adc().bit_is_clear() {}

        // Analog pad: all digital functions off.
        pads.gpio[26 + channel as usize]
            .write(|w| w.ie().clear_bit().od().set_bit());

        adc.cs.write(|w| w.en().set_bit());
        while adc.cs.read().ready().bit_is_clear() {}

        PotPlungerSensor { adc, channel }
    }
}

impl Sensor for PotPlungerSensor {
    fn name(&self) -> &'static str {
        "pico_adc"
    }

    fn native_scale(&self) -> u32 {
        4096
    }

    fn read_raw(&mut self) -> Option<RawSample> {
        // One-shot conversion; ~96 ADC clocks (2 us) to complete.
        self.adc
            .cs
            .modify(|_, w| unsafe { w.ainsel().bits(self.channel).start_once().set_bit() });
        while self.adc.cs.read().ready().bit_is_clear() {}
        Some(RawSample {
            t: now_us(),
            pos: self.adc.result.read().bits() & 0xFFF,
        })
    }
}
