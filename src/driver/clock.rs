//! Monotonic microsecond clock.
//!
//! The 64-bit timer counts microseconds from reset and never wraps
//! within a device lifetime (half a million years). The latched
//! TIMELR/TIMEHR pair is core-local state that other readers can
//! disturb, so we read the raw registers with the usual
//! high-low-high dance instead.

use rp2040_pac as pac;

/// Microseconds since boot.
pub fn now_us() -> u64 {
    // Safety: reads of the raw timer registers have no side effects,
    // so aliasing the TIMER block here is fine.
    let timer = unsafe { &*pac::TIMER::ptr() };
    loop {
        let hi = timer.timerawh.read().bits();
        let lo = timer.timerawl.read().bits();
        if timer.timerawh.read().bits() == hi {
            return ((hi as u64) << 32) | lo as u64;
        }
        // A carry slipped between the reads; go again.
    }
}
