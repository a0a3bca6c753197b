//! Wire formats for the logical input devices.
//!
//! Every layout here is a fixed byte-for-byte protocol with the host,
//! so each struct packs explicitly into little-endian bytes rather
//! than relying on in-memory representation.

use crate::clip_i16;

/// Boot-protocol keyboard input report: modifier bits, one reserved
/// byte, six concurrent key codes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyboardReport {
    pub modifiers: u8,
    pub keys: [u8; 6],
}

impl KeyboardReport {
    pub const LEN: usize = 8;

    /// Adds a key if a slot is free; duplicate codes are kept single.
    /// Returns false on rollover (more than six keys down).
    pub fn press(&mut self, code: u8) -> bool {
        if self.keys.iter().any(|&k| k == code) {
            return true;
        }
        for k in self.keys.iter_mut() {
            if *k == 0 {
                *k = code;
                return true;
            }
        }
        false
    }

    pub fn release(&mut self, code: u8) {
        for k in self.keys.iter_mut() {
            if *k == code {
                *k = 0;
            }
        }
    }

    pub fn pack(&self, buf: &mut [u8]) -> usize {
        buf[0] = self.modifiers;
        buf[1] = 0;
        buf[2..8].copy_from_slice(&self.keys);
        Self::LEN
    }
}

/// Media-control report: one bit per transport/volume usage.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MediaControlReport {
    pub usages: u8,
}

impl MediaControlReport {
    pub const LEN: usize = 1;

    pub fn pack(&self, buf: &mut [u8]) -> usize {
        buf[0] = self.usages;
        Self::LEN
    }
}

/// Gamepad report: 32 buttons, six 16-bit axes, two 16-bit sliders.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GamepadReport {
    pub buttons: u32,
    pub x: i16,
    pub y: i16,
    pub z: i16,
    pub rx: i16,
    pub ry: i16,
    pub rz: i16,
    pub slider0: i16,
    pub slider1: i16,
}

impl GamepadReport {
    pub const LEN: usize = 20;

    pub fn pack(&self, buf: &mut [u8]) -> usize {
        buf[0..4].copy_from_slice(&self.buttons.to_le_bytes());
        let axes = [
            self.x,
            self.y,
            self.z,
            self.rx,
            self.ry,
            self.rz,
            self.slider0,
            self.slider1,
        ];
        for (i, v) in axes.iter().enumerate() {
            buf[4 + i * 2..6 + i * 2].copy_from_slice(&v.to_le_bytes());
        }
        Self::LEN
    }
}

/// XInput control-surface input report (message type 0, 20 bytes).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct XInputReport {
    pub buttons: u16,
    pub left_trigger: u8,
    pub right_trigger: u8,
    pub x_left: i16,
    pub y_left: i16,
    pub x_right: i16,
    pub y_right: i16,
}

impl XInputReport {
    pub const LEN: usize = 20;

    pub fn pack(&self, buf: &mut [u8]) -> usize {
        buf[0] = 0x00; // message type: control surface state
        buf[1] = 0x14; // message length
        buf[2..4].copy_from_slice(&self.buttons.to_le_bytes());
        buf[4] = self.left_trigger;
        buf[5] = self.right_trigger;
        buf[6..8].copy_from_slice(&self.x_left.to_le_bytes());
        buf[8..10].copy_from_slice(&self.y_left.to_le_bytes());
        buf[10..12].copy_from_slice(&self.x_right.to_le_bytes());
        buf[12..14].copy_from_slice(&self.y_right.to_le_bytes());
        for b in buf[14..20].iter_mut() {
            *b = 0;
        }
        Self::LEN
    }
}

/// XInput host-to-device messages.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum XInputOutput {
    /// Vibration motor levels, 0..=255 each.
    Rumble { left: u8, right: u8 },
    /// Player-LED animation selector.
    Led { pattern: u8 },
}

impl XInputOutput {
    /// Decodes an OUT transfer; unknown or truncated messages are
    /// dropped (`None`).
    pub fn parse(data: &[u8]) -> Option<XInputOutput> {
        match (data.first()?, data.get(1)?) {
            (0x00, 0x08) if data.len() >= 5 => Some(XInputOutput::Rumble {
                left: data[3],
                right: data[4],
            }),
            (0x01, 0x03) if data.len() >= 3 => Some(XInputOutput::Led { pattern: data[2] }),
            _ => None,
        }
    }
}

/// Pinball-device report: a struct-shaped payload with everything a
/// pinball-aware host needs in one read, timestamped on the device
/// clock.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PinballDeviceReport {
    pub timestamp_us: u64,
    pub generic_buttons: u32,
    pub pinball_buttons: u32,
    pub nudge_ax: i16,
    pub nudge_ay: i16,
    pub nudge_vx: i16,
    pub nudge_vy: i16,
    pub plunger_z: i16,
    pub plunger_speed: i16,
}

impl PinballDeviceReport {
    pub const LEN: usize = 28;

    pub fn pack(&self, buf: &mut [u8]) -> usize {
        buf[0..8].copy_from_slice(&self.timestamp_us.to_le_bytes());
        buf[8..12].copy_from_slice(&self.generic_buttons.to_le_bytes());
        buf[12..16].copy_from_slice(&self.pinball_buttons.to_le_bytes());
        let words = [
            self.nudge_ax,
            self.nudge_ay,
            self.nudge_vx,
            self.nudge_vy,
            self.plunger_z,
            self.plunger_speed,
        ];
        for (i, v) in words.iter().enumerate() {
            buf[16 + i * 2..18 + i * 2].copy_from_slice(&v.to_le_bytes());
        }
        Self::LEN
    }
}

/// Widens an i32 into a report axis with saturation.
pub fn axis_value(v: i32) -> i16 {
    clip_i16(v)
}
