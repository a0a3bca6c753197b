//! USB composite descriptor assembly and serial-number derivation.
//!
//! The device presents a configurable set of interfaces: the vendor
//! (WinUSB) control interface is always there; CDC serial, XInput, and
//! one or more HID interfaces come and go with the configuration. All
//! descriptors are assembled into caller-provided buffers at startup,
//! so there is no allocation and the USB stack can hand out stable
//! pointers.
//!
//! # Serial numbers
//!
//! Hosts cache HID descriptors keyed by the device serial number. Two
//! configurations with different interface sets have different report
//! layouts, so they must present *different* serial numbers or the
//! host will misparse reports against stale cached descriptors. But
//! the serial must also be *stable* for any one configuration so
//! caching still works. The serial therefore encodes the board's
//! unique ID, a bitmask of the optional devices, and the protocol
//! version: `BBBBBBBBBBBBBBBB.DD.VV`.

use arrayvec::ArrayString;

/// USB protocol version embedded in the serial number. Bump this when
/// any report descriptor changes shape, to force hosts to re-query.
pub const USB_PROTOCOL_VERSION: u8 = 0x01;

/// Serial-number bit assigned to each optional device type.
pub mod device_bit {
    pub const KEYBOARD: u8 = 0x01;
    pub const GAMEPAD: u8 = 0x02;
    pub const XINPUT: u8 = 0x04;
    pub const PINBALL_DEVICE: u8 = 0x08;
}

/// `<board id: 16 hex>.<device bits: 2 hex>.<version: 2 hex>`
pub type SerialString = ArrayString<[u8; 22]>;

/// Derives the USB serial-number string.
pub fn derive_serial(board_id: &[u8; 8], device_bits: u8, version: u8) -> SerialString {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut s = SerialString::new();
    for &b in board_id.iter() {
        s.push(HEX[(b >> 4) as usize] as char);
        s.push(HEX[(b & 0xF) as usize] as char);
    }
    s.push('.');
    s.push(HEX[(device_bits >> 4) as usize] as char);
    s.push(HEX[(device_bits & 0xF) as usize] as char);
    s.push('.');
    s.push(HEX[(version >> 4) as usize] as char);
    s.push(HEX[(version & 0xF) as usize] as char);
    s
}

// --- HID report descriptors -------------------------------------------------

/// Keyboard, boot layout behind report ID 1: 8 modifier bits, one pad
/// byte, six key slots in, five LED bits out.
pub static KEYBOARD_REPORT_DESC: [u8; 65] = [
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x06, // Usage (Keyboard)
    0xA1, 0x01, // Collection (Application)
    0x85, 0x01, //   Report ID (1)
    0x05, 0x07, //   Usage Page (Keyboard)
    0x19, 0xE0, //   Usage Minimum (LeftControl)
    0x29, 0xE7, //   Usage Maximum (Right GUI)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x08, //   Report Count (8)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    0x95, 0x01, //   Report Count (1)
    0x75, 0x08, //   Report Size (8)
    0x81, 0x03, //   Input (Constant) - reserved byte
    0x95, 0x05, //   Report Count (5)
    0x75, 0x01, //   Report Size (1)
    0x05, 0x08, //   Usage Page (LEDs)
    0x19, 0x01, //   Usage Minimum (Num Lock)
    0x29, 0x05, //   Usage Maximum (Kana)
    0x91, 0x02, //   Output (Data, Variable, Absolute)
    0x95, 0x01, //   Report Count (1)
    0x75, 0x03, //   Report Size (3)
    0x91, 0x03, //   Output (Constant) - LED pad
    0x95, 0x06, //   Report Count (6)
    0x75, 0x08, //   Report Size (8)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0xFB, //   Logical Maximum (251)
    0x05, 0x07, //   Usage Page (Keyboard)
    0x19, 0x00, //   Usage Minimum (0)
    0x29, 0xFB, //   Usage Maximum (251)
    0x81, 0x00, //   Input (Data, Array)
    0xC0, //       End Collection
];

/// Media controls behind report ID 2: an 8-bit usage bitmap.
pub static MEDIA_REPORT_DESC: [u8; 35] = [
    0x05, 0x0C, // Usage Page (Consumer)
    0x09, 0x01, // Usage (Consumer Control)
    0xA1, 0x01, // Collection (Application)
    0x85, 0x02, //   Report ID (2)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x09, 0xE2, //   Usage (Mute)
    0x09, 0xE9, //   Usage (Volume Up)
    0x09, 0xEA, //   Usage (Volume Down)
    0x09, 0xCD, //   Usage (Play/Pause)
    0x09, 0xB5, //   Usage (Next Track)
    0x09, 0xB6, //   Usage (Previous Track)
    0x09, 0xB7, //   Usage (Stop)
    0x09, 0xB8, //   Usage (Eject)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x08, //   Report Count (8)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    0xC0, //       End Collection
];

/// Gamepad behind report ID 3: 32 buttons, X/Y/Z/Rx/Ry/Rz, 2 sliders.
pub static GAMEPAD_REPORT_DESC: [u8; 61] = [
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x05, // Usage (Gamepad)
    0xA1, 0x01, // Collection (Application)
    0x85, 0x03, //   Report ID (3)
    0x05, 0x09, //   Usage Page (Button)
    0x19, 0x01, //   Usage Minimum (Button 1)
    0x29, 0x20, //   Usage Maximum (Button 32)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x95, 0x20, //   Report Count (32)
    0x75, 0x01, //   Report Size (1)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    0x05, 0x01, //   Usage Page (Generic Desktop)
    0x09, 0x30, //   Usage (X)
    0x09, 0x31, //   Usage (Y)
    0x09, 0x32, //   Usage (Z)
    0x09, 0x33, //   Usage (Rx)
    0x09, 0x34, //   Usage (Ry)
    0x09, 0x35, //   Usage (Rz)
    0x16, 0x01, 0x80, // Logical Minimum (-32767)
    0x26, 0xFF, 0x7F, // Logical Maximum (32767)
    0x95, 0x06, //   Report Count (6)
    0x75, 0x10, //   Report Size (16)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    0x09, 0x36, //   Usage (Slider)
    0x09, 0x36, //   Usage (Slider)
    0x95, 0x02, //   Report Count (2)
    0x75, 0x10, //   Report Size (16)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    0xC0, //       End Collection
];

/// Feedback controller behind report ID 4: opaque 62-byte messages in
/// both directions on a vendor usage page.
pub static FEEDBACK_REPORT_DESC: [u8; 31] = [
    0x06, 0x00, 0xFF, // Usage Page (Vendor 0xFF00)
    0x09, 0x01, // Usage (1)
    0xA1, 0x01, // Collection (Application)
    0x85, 0x04, //   Report ID (4)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x00, // Logical Maximum (255)
    0x75, 0x08, //   Report Size (8)
    0x95, 0x3E, //   Report Count (62)
    0x09, 0x02, //   Usage (2)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    0x75, 0x08, //   Report Size (8)
    0x95, 0x3E, //   Report Count (62)
    0x09, 0x03, //   Usage (3)
    0x91, 0x02, //   Output (Data, Variable, Absolute)
    0xC0, //       End Collection
];

/// Pinball device behind report ID 5: Game Controls / Pinball Device
/// usage, carrying the struct-shaped payload from
/// [`crate::reports::PinballDeviceReport`].
pub static PINBALL_REPORT_DESC: [u8; 25] = [
    0x05, 0x05, // Usage Page (Game Controls)
    0x09, 0x02, // Usage (Pinball Device)
    0xA1, 0x01, // Collection (Application)
    0x85, 0x05, //   Report ID (5)
    0x06, 0x00, 0xFF, // Usage Page (Vendor 0xFF00)
    0x09, 0x01, //   Usage (1)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x00, // Logical Maximum (255)
    0x75, 0x08, //   Report Size (8)
    0x95, 0x1C, //   Report Count (28)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    0xC0, //       End Collection
];

/// Concatenates per-device report descriptors into one interface-level
/// descriptor (each interface returns the combined descriptor of its
/// member devices). Returns the total length, or `None` if the buffer
/// is too small.
pub fn combine_report_descriptors(parts: &[&[u8]], out: &mut [u8]) -> Option<usize> {
    let mut n = 0;
    for p in parts {
        if n + p.len() > out.len() {
            return None;
        }
        out[n..n + p.len()].copy_from_slice(p);
        n += p.len();
    }
    Some(n)
}

// --- configuration descriptor ----------------------------------------------

/// Which optional interfaces this configuration carries, and the HID
/// interface layout.
#[derive(Copy, Clone, Debug)]
pub struct UsbConfig {
    pub cdc: bool,
    pub xinput: bool,
    /// Combined report-descriptor length and polling interval (ms) for
    /// each HID interface, in order.
    pub hid: [Option<HidIfcConfig>; MAX_HID_IFCS],
}

pub const MAX_HID_IFCS: usize = 2;

#[derive(Copy, Clone, Debug)]
pub struct HidIfcConfig {
    pub report_desc_len: u16,
    pub polling_ms: u8,
    /// Whether the interface carries an OUT endpoint (any member
    /// device accepts host-to-device reports).
    pub in_out: bool,
}

/// Interface numbers assigned while building the configuration
/// descriptor. Numbers are packed contiguously as USB requires, so
/// disabling an optional interface shifts the ones after it.
#[derive(Copy, Clone, Debug, Default)]
pub struct InterfaceMap {
    pub vendor: u8,
    pub xinput: Option<u8>,
    pub hid0: u8,
    pub count: u8,
}

const DESC_DEVICE: u8 = 0x01;
const DESC_CONFIG: u8 = 0x02;
const DESC_INTERFACE: u8 = 0x04;
const DESC_ENDPOINT: u8 = 0x05;
const DESC_IAD: u8 = 0x0B;
const DESC_HID: u8 = 0x21;
const DESC_BOS: u8 = 0x0F;
const DESC_DEVICE_CAPABILITY: u8 = 0x10;

/// Vendor request code the host uses to fetch the MS OS 2.0 set.
pub const VENDOR_REQUEST_WINUSB: u8 = 1;

/// Builds the 18-byte device descriptor. bcdUSB is 2.1 so the host
/// knows to ask for the BOS descriptor.
pub fn build_device_descriptor(vid: u16, pid: u16, bcd_device: u16, out: &mut [u8; 18]) {
    out.copy_from_slice(&[
        18,
        DESC_DEVICE,
        0x10,
        0x02, // bcdUSB 2.10
        0xEF,
        0x02,
        0x01, // composite device using IADs
        64,   // EP0 max packet
        (vid & 0xFF) as u8,
        (vid >> 8) as u8,
        (pid & 0xFF) as u8,
        (pid >> 8) as u8,
        (bcd_device & 0xFF) as u8,
        (bcd_device >> 8) as u8,
        1, // iManufacturer
        2, // iProduct
        3, // iSerialNumber
        1, // bNumConfigurations
    ]);
}

struct Writer<'a> {
    out: &'a mut [u8],
    n: usize,
    overflow: bool,
}

impl<'a> Writer<'a> {
    fn put(&mut self, bytes: &[u8]) {
        if self.n + bytes.len() > self.out.len() {
            self.overflow = true;
            return;
        }
        self.out[self.n..self.n + bytes.len()].copy_from_slice(bytes);
        self.n += bytes.len();
    }

    fn endpoint(&mut self, addr: u8, attrs: u8, max_packet: u16, interval: u8) {
        self.put(&[
            7,
            DESC_ENDPOINT,
            addr,
            attrs,
            (max_packet & 0xFF) as u8,
            (max_packet >> 8) as u8,
            interval,
        ]);
    }
}

/// Builds the full configuration descriptor into `out`. Returns the
/// assigned interface numbers and the total length, or `None` if the
/// buffer overflows.
pub fn build_config_descriptor(
    cfg: &UsbConfig,
    out: &mut [u8],
) -> Option<(InterfaceMap, usize)> {
    let mut w = Writer {
        out,
        n: 0,
        overflow: false,
    };
    let mut map = InterfaceMap::default();
    let mut ifc = 0u8;
    let mut ep = 1u8;

    // Placeholder header; patched once the total is known.
    w.put(&[9, DESC_CONFIG, 0, 0, 0, 1, 0, 0x80, 250]);

    if cfg.cdc {
        // Interface association + the standard ACM pair.
        let notify_ep = 0x80 | ep;
        let data_out_ep = ep + 1;
        let data_in_ep = 0x80 | (ep + 1);
        ep += 2;

        w.put(&[8, DESC_IAD, ifc, 2, 0x02, 0x02, 0x00, 0]);
        // Control interface: one notification endpoint.
        w.put(&[9, DESC_INTERFACE, ifc, 0, 1, 0x02, 0x02, 0x00, 6]);
        w.put(&[5, 0x24, 0x00, 0x20, 0x01]); // header functional, CDC 1.20
        w.put(&[5, 0x24, 0x01, 0x00, ifc + 1]); // call management
        w.put(&[4, 0x24, 0x02, 0x02]); // ACM capabilities
        w.put(&[5, 0x24, 0x06, ifc, ifc + 1]); // union
        w.endpoint(notify_ep, 0x03, 8, 16);
        // Data interface: bulk in/out.
        w.put(&[9, DESC_INTERFACE, ifc + 1, 0, 2, 0x0A, 0x00, 0x00, 0]);
        w.endpoint(data_out_ep, 0x02, 64, 0);
        w.endpoint(data_in_ep, 0x02, 64, 0);
        ifc += 2;
    }

    // Vendor (WinUSB) control interface: always present.
    map.vendor = ifc;
    let vendor_out = ep;
    let vendor_in = 0x80 | ep;
    ep += 1;
    w.put(&[9, DESC_INTERFACE, ifc, 0, 2, 0xFF, 0x00, 0x00, 4]);
    w.endpoint(vendor_out, 0x02, 64, 0);
    w.endpoint(vendor_in, 0x02, 64, 0);
    ifc += 1;

    if cfg.xinput {
        map.xinput = Some(ifc);
        let x_out = ep;
        let x_in = 0x80 | ep;
        ep += 1;
        w.put(&[9, DESC_INTERFACE, ifc, 0, 2, 0xFF, 0x5D, 0x01, 5]);
        // Microsoft's undocumented class-specific descriptor; the
        // shape is fixed by the xbox controller protocol.
        w.put(&[
            0x10, 0x21, 0x10, 0x01, 0x01, 0x24, x_in, 0x14, 0x03, 0x00, 0x03, 0x13, x_out,
            0x08, 0x03, 0x00,
        ]);
        w.endpoint(x_in, 0x03, 32, 1);
        w.endpoint(x_out, 0x03, 32, 8);
        ifc += 1;
    }

    map.hid0 = ifc;
    for h in cfg.hid.iter().flatten() {
        let h_out = ep;
        let h_in = 0x80 | ep;
        ep += 1;
        let n_eps = if h.in_out { 2 } else { 1 };
        w.put(&[9, DESC_INTERFACE, ifc, 0, n_eps, 0x03, 0x00, 0x00, 0]);
        // HID class descriptor pointing at the combined report
        // descriptor for this interface.
        w.put(&[
            9,
            DESC_HID,
            0x11,
            0x01, // bcdHID 1.11
            0x00, // country code
            1,    // one class descriptor
            0x22, // report descriptor
            (h.report_desc_len & 0xFF) as u8,
            (h.report_desc_len >> 8) as u8,
        ]);
        w.endpoint(h_in, 0x03, 64, h.polling_ms);
        if h.in_out {
            w.endpoint(h_out, 0x03, 64, h.polling_ms);
        }
        ifc += 1;
    }

    if w.overflow {
        return None;
    }

    // Patch the header with the totals.
    let total = w.n;
    map.count = ifc;
    let out = w.out;
    out[2] = (total & 0xFF) as u8;
    out[3] = (total >> 8) as u8;
    out[4] = ifc;
    Some((map, total))
}

// --- BOS / MS OS 2.0 --------------------------------------------------------

/// Length of the MS OS 2.0 descriptor set produced by
/// [`build_msos2_descriptor`].
pub const MSOS2_SET_LEN: usize = 46;

/// Builds the MS OS 2.0 descriptor set: a function subset on the
/// vendor interface carrying the `WINUSB` compatible ID, which makes
/// Windows bind WinUSB to that interface with no user action or INF.
pub fn build_msos2_descriptor(vendor_ifc: u8, out: &mut [u8; MSOS2_SET_LEN]) {
    let windows_8_1 = [0x00, 0x00, 0x03, 0x06];
    let mut n = 0;
    let mut put = |bytes: &[u8], n: &mut usize| {
        out[*n..*n + bytes.len()].copy_from_slice(bytes);
        *n += bytes.len();
    };

    // Set header.
    put(&[10, 0, 0x00, 0x00], &mut n);
    put(&windows_8_1, &mut n);
    put(&[MSOS2_SET_LEN as u8, 0x00], &mut n);
    // Configuration subset header (configuration 0).
    put(&[8, 0, 0x01, 0x00, 0x00, 0x00, 36, 0x00], &mut n);
    // Function subset header for the vendor interface.
    put(&[8, 0, 0x02, 0x00, vendor_ifc, 0x00, 28, 0x00], &mut n);
    // Compatible ID: WINUSB.
    put(&[20, 0, 0x03, 0x00], &mut n);
    put(b"WINUSB\0\0", &mut n);
    put(&[0; 8], &mut n);
    debug_assert_eq!(n, MSOS2_SET_LEN);
}

/// Length of the BOS descriptor produced by [`build_bos_descriptor`].
pub const BOS_LEN: usize = 33;

/// Builds the BOS descriptor advertising MS OS 2.0 support, so Windows
/// issues the vendor request that fetches the descriptor set.
pub fn build_bos_descriptor(out: &mut [u8; BOS_LEN]) {
    let mut n = 0;
    let mut put = |bytes: &[u8], n: &mut usize| {
        out[*n..*n + bytes.len()].copy_from_slice(bytes);
        *n += bytes.len();
    };

    put(&[5, DESC_BOS, BOS_LEN as u8, 0x00, 1], &mut n);
    put(&[28, DESC_DEVICE_CAPABILITY, 0x05, 0x00], &mut n);
    // MS OS 2.0 platform capability UUID.
    put(
        &[
            0xDF, 0x60, 0xDD, 0xD8, 0x89, 0x45, 0xC7, 0x4C, 0x9C, 0xD2, 0x65, 0x9D, 0x9E,
            0x64, 0x8A, 0x9F,
        ],
        &mut n,
    );
    put(&[0x00, 0x00, 0x03, 0x06], &mut n); // Windows 8.1+
    put(&[MSOS2_SET_LEN as u8, 0x00], &mut n);
    put(&[VENDOR_REQUEST_WINUSB, 0x00], &mut n);
    debug_assert_eq!(n, BOS_LEN);
}
