//! Minimal polled I2C master over one of the RP2040's DW controllers.
//!
//! Sensor traffic here is a few bytes per transaction at 400 kHz, so
//! a polled master with a hard deadline is the right amount of
//! machinery: a transaction that overruns its deadline returns an
//! error, the caller bumps its error counter, and the operation is
//! simply reissued on a later task iteration. Nothing blocks the main
//! loop for longer than the deadline.

use rp2040_pac as pac;
use scopeguard::ScopeGuard;

use super::clock::now_us;
use super::funcsel;

/// Per-transaction deadline. Generous for a handful of bytes at
/// 400 kHz while still bounding a main-loop iteration.
const DEADLINE_US: u64 = 250;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum I2cError {
    /// The target NAKed or the controller aborted the transfer.
    Abort,
    /// The transaction overran its deadline.
    Timeout,
}

pub struct I2cBus {
    i2c: pac::I2C0,
}

impl I2cBus {
    /// Brings up I2C0 as a fast-mode master on the given pins.
    pub fn init(
        i2c: pac::I2C0,
        resets: &pac::RESETS,
        io: &pac::IO_BANK0,
        pads: &pac::PADS_BANK0,
        sda: u8,
        scl: u8,
    ) -> I2cBus {
        resets.reset.modify(|_, w| w.i2c0().clear_bit());
        while resets.reset_done.read().i2c0().bit_is_clear() {}

        for &pin in &[sda, scl] {
            // Open-drain bus: input enabled, pull-up on (external
            // pull-ups are still recommended, but this keeps a bare
            // bench setup working).
            pads.gpio[pin as usize]
                .write(|w| w.ie().set_bit().pue().set_bit().pde().clear_bit());
            io.gpio[pin as usize]
                .gpio_ctrl
                .write(|w| unsafe { w.funcsel().bits(funcsel::I2C) });
        }

        i2c.ic_enable.write(|w| w.enable().clear_bit());
        i2c.ic_con.write(|w| {
            w.master_mode().set_bit()
                .ic_slave_disable().set_bit()
                .ic_restart_en().set_bit()
                .speed().fast()
        });
        // 400 kHz timing from the 125 MHz system clock.
        i2c.ic_fs_scl_hcnt.write(|w| unsafe { w.bits(126) });
        i2c.ic_fs_scl_lcnt.write(|w| unsafe { w.bits(187) });
        i2c.ic_sda_hold.write(|w| unsafe { w.bits(38) });

        I2cBus { i2c }
    }

    fn set_target(&self, addr: u8) {
        self.i2c.ic_enable.write(|w| w.enable().clear_bit());
        self.i2c.ic_tar.write(|w| unsafe { w.bits(addr as u32) });
        self.i2c.ic_enable.write(|w| w.enable().set_bit());
    }

    fn check_abort(&self) -> Result<(), I2cError> {
        if self.i2c.ic_raw_intr_stat.read().tx_abrt().bit_is_set() {
            let _ = self.i2c.ic_clr_tx_abrt.read();
            Err(I2cError::Abort)
        } else {
            Ok(())
        }
    }

    /// Writes `bytes` to the target in one transaction.
    pub fn write(&self, addr: u8, bytes: &[u8]) -> Result<(), I2cError> {
        self.transaction(addr, bytes, &mut [])
    }

    /// Writes `bytes` (typically a register address), then reads
    /// `read` with a repeated start.
    pub fn write_read(&self, addr: u8, bytes: &[u8], read: &mut [u8]) -> Result<(), I2cError> {
        self.transaction(addr, bytes, read)
    }

    fn transaction(&self, addr: u8, bytes: &[u8], read: &mut [u8]) -> Result<(), I2cError> {
        self.set_target(addr);
        let deadline = now_us() + DEADLINE_US;

        // On any early exit, put the controller through a disable
        // cycle so a half-issued transfer can't wedge the bus for the
        // next caller.
        let cleanup = scopeguard::guard((), |_| {
            self.i2c.ic_enable.write(|w| w.enable().clear_bit());
        });

        let last_write = bytes.len().saturating_sub(1);
        for (i, &b) in bytes.iter().enumerate() {
            while self.i2c.ic_status.read().tfnf().bit_is_clear() {
                self.check_abort()?;
                if now_us() > deadline {
                    return Err(I2cError::Timeout);
                }
            }
            let stop = read.is_empty() && i == last_write;
            self.i2c
                .ic_data_cmd
                .write(|w| unsafe { w.dat().bits(b).stop().bit(stop) });
        }

        let last_read = read.len().saturating_sub(1);
        for i in 0..read.len() {
            // Issue the read command, restarting after the write
            // phase on the first one.
            while self.i2c.ic_status.read().tfnf().bit_is_clear() {
                self.check_abort()?;
                if now_us() > deadline {
                    return Err(I2cError::Timeout);
                }
            }
            self.i2c.ic_data_cmd.write(|w| {
                let w = w.cmd().set_bit();
                let w = if i == 0 && !bytes.is_empty() {
                    w.restart().set_bit()
                } else {
                    w
                };
                if i == last_read {
                    w.stop().set_bit()
                } else {
                    w
                }
            });
            while self.i2c.ic_rxflr.read().bits() == 0 {
                self.check_abort()?;
                if now_us() > deadline {
                    return Err(I2cError::Timeout);
                }
            }
            read[i] = self.i2c.ic_data_cmd.read().dat().bits();
        }

        // Wait for the transaction to drain off the wire.
        while self.i2c.ic_status.read().activity().bit_is_set() {
            self.check_abort()?;
            if now_us() > deadline {
                return Err(I2cError::Timeout);
            }
        }
        self.check_abort()?;

        // Clean completion: defuse the abort cleanup.
        ScopeGuard::into_inner(cleanup);
        Ok(())
    }
}
