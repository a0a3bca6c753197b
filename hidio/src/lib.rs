//! USB/HID side of the input pipeline: button latching, report
//! scheduling, logical-axis sources, report packing, and composite
//! descriptor assembly.
//!
//! Architecture-independent by design: the USB controller is reached
//! only through the narrow staging interface in [`sched`], so all of
//! the timing and multiplexing logic runs under host tests. The
//! controller glue in the firmware layer implements that interface
//! over the real hardware.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod axis;
pub mod buttons;
pub mod descriptor;
pub mod devices;
pub mod reports;
pub mod sched;

pub use buttons::ButtonHelper;

/// Report IDs for the logical devices multiplexed on a HID interface.
/// These are fixed so PC clients can hard-code them as protocol.
pub mod report_id {
    pub const KEYBOARD: u8 = 1;
    pub const MEDIA_CONTROL: u8 = 2;
    pub const GAMEPAD: u8 = 3;
    pub const FEEDBACK_CONTROLLER: u8 = 4;
    pub const PINBALL_DEVICE: u8 = 5;
}

/// Fixed interface numbers in the composite configuration. CDC
/// occupies two interface numbers (data + notification); HID
/// interfaces are assigned sequentially from `HID0`.
pub mod ifc_num {
    pub const CDC: u8 = 0;
    pub const VENDOR: u8 = 2;
    pub const XINPUT: u8 = 3;
    pub const HID0: u8 = 4;
}

/// Endpoint addresses (IN endpoints have bit 7 set). Additional HID
/// interfaces take sequential endpoint numbers after `HID0`.
pub mod endpoint {
    pub const CDC_OUT: u8 = 0x01;
    pub const CDC_IN: u8 = 0x81;
    pub const CDC_NOTIFY: u8 = 0x82;
    pub const VENDOR_OUT: u8 = 0x03;
    pub const VENDOR_IN: u8 = 0x83;
    pub const XINPUT_OUT: u8 = 0x04;
    pub const XINPUT_IN: u8 = 0x84;
    pub const HID0_OUT: u8 = 0x05;
    pub const HID0_IN: u8 = 0x85;
}

#[inline]
pub(crate) fn clip_i16(v: i32) -> i16 {
    if v < -32768 {
        -32768
    } else if v > 32767 {
        32767
    } else {
        v as i16
    }
}
