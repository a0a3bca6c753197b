//! The logical input devices: the glue between physical-input state
//! (buttons, axis sources) and the reports the scheduler sends.
//!
//! Each device caches its analog readings once per main-loop tick via
//! `update` (which is where the per-device accelerometer view gets
//! snapshotted), and decides in `build_report` whether it has anything
//! worth staging: event-driven devices (keyboard, media) send only on
//! change, streaming devices (gamepad, pinball) send continuously
//! while enabled.

use crate::axis::{AxisEnv, AxisExpr};
use crate::buttons::ButtonHelper;
use crate::reports::{
    GamepadReport, KeyboardReport, MediaControlReport, PinballDeviceReport, XInputOutput,
    XInputReport,
};
use crate::sched::HidDevice;
use crate::{report_id, clip_i16};

/// Keyboard: boot-layout reports, sent on change only.
pub struct KeyboardDevice {
    pub enabled: bool,
    report: KeyboardReport,
    last_sent: Option<KeyboardReport>,
}

impl KeyboardDevice {
    pub fn new() -> Self {
        KeyboardDevice {
            enabled: true,
            report: KeyboardReport::default(),
            last_sent: None,
        }
    }

    /// Key press/release; `code` is a HID usage from the keyboard
    /// page. Returns false on rollover.
    pub fn key_event(&mut self, code: u8, down: bool) -> bool {
        if down {
            self.report.press(code)
        } else {
            self.report.release(code);
            true
        }
    }

    pub fn modifier_event(&mut self, mask: u8, down: bool) {
        if down {
            self.report.modifiers |= mask;
        } else {
            self.report.modifiers &= !mask;
        }
    }
}

impl HidDevice for KeyboardDevice {
    fn report_id(&self) -> u8 {
        report_id::KEYBOARD
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn build_report(&mut self, buf: &mut [u8]) -> usize {
        if self.last_sent == Some(self.report) {
            return 0;
        }
        self.last_sent = Some(self.report);
        self.report.pack(buf)
    }
}

/// Media controls: an 8-bit usage bitmap with the sticky-tap rule, so
/// a quick volume tap lands in a report even between polls.
pub struct MediaControlDevice {
    pub enabled: bool,
    buttons: ButtonHelper,
    last_sent: Option<u8>,
}

impl MediaControlDevice {
    pub fn new() -> Self {
        MediaControlDevice {
            enabled: true,
            buttons: ButtonHelper::new(),
            last_sent: None,
        }
    }

    /// Usage bit 1..=8 pressed or released.
    pub fn on_button_event(&mut self, num: u8, down: bool) {
        self.buttons.on_button_event(num, down);
    }

    /// True if an unreported change is pending.
    fn pending(&self) -> bool {
        self.last_sent != Some(self.buttons.next as u8)
    }
}

impl HidDevice for MediaControlDevice {
    fn report_id(&self) -> u8 {
        report_id::MEDIA_CONTROL
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn build_report(&mut self, buf: &mut [u8]) -> usize {
        if !self.pending() {
            return 0;
        }
        let usages = self.buttons.report() as u8;
        self.last_sent = Some(usages);
        MediaControlReport { usages }.pack(buf)
    }
}

/// Gamepad: 32 sticky-latched buttons plus eight axis expressions,
/// streaming continuously (the analog sources never stop changing).
pub struct GamepadDevice {
    pub enabled: bool,
    pub buttons: ButtonHelper,
    pub x: AxisExpr,
    pub y: AxisExpr,
    pub z: AxisExpr,
    pub rx: AxisExpr,
    pub ry: AxisExpr,
    pub rz: AxisExpr,
    pub slider0: AxisExpr,
    pub slider1: AxisExpr,
    cached: GamepadReport,
}

impl GamepadDevice {
    pub fn new() -> Self {
        GamepadDevice {
            enabled: true,
            buttons: ButtonHelper::new(),
            x: AxisExpr::null(),
            y: AxisExpr::null(),
            z: AxisExpr::null(),
            rx: AxisExpr::null(),
            ry: AxisExpr::null(),
            rz: AxisExpr::null(),
            slider0: AxisExpr::null(),
            slider1: AxisExpr::null(),
            cached: GamepadReport::default(),
        }
    }

    /// Samples all axis sources; called once per main-loop tick so a
    /// report staged later in the same tick carries coherent values.
    pub fn update(&mut self, env: &dyn AxisEnv) {
        self.cached.x = self.x.read_i16(env);
        self.cached.y = self.y.read_i16(env);
        self.cached.z = self.z.read_i16(env);
        self.cached.rx = self.rx.read_i16(env);
        self.cached.ry = self.ry.read_i16(env);
        self.cached.rz = self.rz.read_i16(env);
        self.cached.slider0 = self.slider0.read_i16(env);
        self.cached.slider1 = self.slider1.read_i16(env);
    }
}

impl HidDevice for GamepadDevice {
    fn report_id(&self) -> u8 {
        report_id::GAMEPAD
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn build_report(&mut self, buf: &mut [u8]) -> usize {
        let mut r = self.cached;
        r.buttons = self.buttons.report();
        r.pack(buf)
    }
}

/// Pinball device: the struct-shaped report with two button banks and
/// the nudge/plunger readings, streaming continuously.
pub struct PinballDevice {
    pub enabled: bool,
    pub generic_buttons: ButtonHelper,
    pub pinball_buttons: ButtonHelper,
    cached: PinballDeviceReport,
}

impl PinballDevice {
    pub fn new() -> Self {
        PinballDevice {
            enabled: true,
            generic_buttons: ButtonHelper::new(),
            pinball_buttons: ButtonHelper::new(),
            cached: PinballDeviceReport::default(),
        }
    }

    pub fn update(&mut self, env: &dyn AxisEnv) {
        let (ax, ay, _) = env.nudge();
        let (vx, vy, _) = env.nudge_velocity();
        self.cached.timestamp_us = env.now_us();
        self.cached.nudge_ax = ax;
        self.cached.nudge_ay = ay;
        self.cached.nudge_vx = vx;
        self.cached.nudge_vy = vy;
        self.cached.plunger_z = env.plunger_z0();
        self.cached.plunger_speed = env.plunger_speed();
    }
}

impl HidDevice for PinballDevice {
    fn report_id(&self) -> u8 {
        report_id::PINBALL_DEVICE
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn build_report(&mut self, buf: &mut [u8]) -> usize {
        let mut r = self.cached;
        r.generic_buttons = self.generic_buttons.report();
        r.pinball_buttons = self.pinball_buttons.report();
        r.pack(buf)
    }
}

/// XInput control surface. Not a `HidDevice` - it rides its own
/// non-HID vendor interface with its own endpoint - but it composes
/// the same way: sticky buttons, axis sources, report packing.
pub struct XInputDevice {
    pub enabled: bool,
    pub buttons: ButtonHelper,
    pub left_trigger: AxisExpr,
    pub right_trigger: AxisExpr,
    pub x_left: AxisExpr,
    pub y_left: AxisExpr,
    pub x_right: AxisExpr,
    pub y_right: AxisExpr,
    cached: XInputReport,
    /// Last rumble/LED commands from the host, for the feedback layer
    /// to consume.
    pub rumble: (u8, u8),
    pub led_pattern: u8,
}

impl XInputDevice {
    pub fn new() -> Self {
        XInputDevice {
            enabled: false,
            buttons: ButtonHelper::new(),
            left_trigger: AxisExpr::null(),
            right_trigger: AxisExpr::null(),
            x_left: AxisExpr::null(),
            y_left: AxisExpr::null(),
            x_right: AxisExpr::null(),
            y_right: AxisExpr::null(),
            cached: XInputReport::default(),
            rumble: (0, 0),
            led_pattern: 0,
        }
    }

    pub fn update(&mut self, env: &dyn AxisEnv) {
        self.cached.left_trigger = self.left_trigger.read_u8(env);
        self.cached.right_trigger = self.right_trigger.read_u8(env);
        self.cached.x_left = self.x_left.read_i16(env);
        self.cached.y_left = self.y_left.read_i16(env);
        self.cached.x_right = self.x_right.read_i16(env);
        self.cached.y_right = self.y_right.read_i16(env);
    }

    /// Builds the 20-byte IN report.
    pub fn build_report(&mut self, buf: &mut [u8]) -> usize {
        let mut r = self.cached;
        r.buttons = self.buttons.report() as u16;
        r.pack(buf)
    }

    /// Handles a host OUT transfer (rumble or LED).
    pub fn on_output(&mut self, data: &[u8]) {
        match XInputOutput::parse(data) {
            Some(XInputOutput::Rumble { left, right }) => self.rumble = (left, right),
            Some(XInputOutput::Led { pattern }) => self.led_pattern = pattern,
            None => {}
        }
    }
}

/// Scales a raw plunger reading onto the positive half of an axis, for
/// diagnostic report fields.
pub fn raw_plunger_axis(raw: u32) -> i16 {
    clip_i16((raw / 2) as i32)
}
