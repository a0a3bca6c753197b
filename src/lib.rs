//! Virtual-pinball-cabinet I/O controller firmware core.
//!
//! The crate splits along testability lines, the same way the rest of
//! the workspace does: the algorithm crates (`plunger`, `nudge`,
//! `hidio`) are architecture-independent and carry the host test
//! suites, while this crate owns the hardware: the imaging-sensor
//! acquisition engine, the quadrature decoder ISR, the I2C proximity
//! and distance sensors, and the monotonic clock, all against the
//! RP2040 peripheral registers. The portable utility modules here
//! (`thunk`, `timerange`, `util`) build everywhere.
//!
//! The main loop runs on core 0 and calls every subsystem's `task`
//! entry once per iteration, targeting an iteration period under a
//! millisecond; drivers never block, and long operations park a
//! deadline and resume on a later iteration.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod thunk;
pub mod timerange;
pub mod util;

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        pub mod driver;
        pub use driver::*;

        /// Second-stage boot loader for the boot ROM; see `memory.x`.
        #[link_section = ".boot2"]
        #[used]
        pub static BOOT2_FIRMWARE: [u8; 256] = rp2040_boot2::BOOT_LOADER_W25Q080;
    }
}
