//! RP2040 hardware drivers.
//!
//! Everything in here touches peripheral registers and only builds for
//! the embedded target. Each driver exclusively owns the peripheral
//! blocks it is constructed with; configuration code decides the split
//! once at boot (for example, the imaging engine and the potentiometer
//! input both want the ADC, and only one plunger sensor is active in
//! any configuration).
//!
//! ISR entry points are exposed as plain functions; the firmware
//! binary binds them to its vector table. Drivers loan their hardware
//! to their ISRs through `SpinLock<Option<_>>` statics, taken with
//! [`crate::util::spin_lock::with_hw`].

pub mod clock;
pub mod i2c;
pub mod imaging;
pub mod pot;
pub mod prox;
pub mod quadrature;
pub mod tof;

/// GPIO function-select codes for IO_BANK0 (the PAC models FUNCSEL
/// per-pin, so we write the raw codes).
pub(crate) mod funcsel {
    pub const I2C: u8 = 3;
    pub const SIO: u8 = 5;
    pub const PIO0: u8 = 6;
    pub const NULL: u8 = 0x1f;
}
