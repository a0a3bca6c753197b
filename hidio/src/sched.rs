//! HID report scheduling.
//!
//! "Sending" a HID report only stages it in the USB controller's
//! endpoint buffer; the actual transmission happens whenever the host
//! next polls the interface, with no CPU involvement. A report staged
//! early in the polling cycle therefore goes stale in the buffer: any
//! input change after staging waits a whole extra cycle. The scheduler
//! counters this with a *refractory interval* after each completed
//! send - a bit shorter than the polling interval - so each report is
//! staged as late as safely possible and is maximally fresh when the
//! host reads it.
//!
//! One interface carries several logical devices, distinguished by
//! report ID, sharing one IN endpoint. After each completed send, the
//! next sender is chosen round-robin starting after the previous
//! sender, so a chatty device (a gamepad streaming accelerometer data)
//! cannot starve the others.

/// Stage the report this much earlier than the predicted next poll, to
/// cover the main-loop latency between the timer expiring and the
/// staging call actually happening.
pub const REFRACTORY_PADDING_US: u64 = 2_500;

/// Logical devices per interface.
pub const MAX_DEVICES: usize = 8;

/// A logical HID device multiplexed onto an interface.
pub trait HidDevice {
    /// Report ID prefixed to this device's input reports.
    fn report_id(&self) -> u8;

    fn enabled(&self) -> bool {
        true
    }

    /// Builds the next input report payload (excluding the report ID)
    /// into `buf`. Returns the payload length, or 0 when the device
    /// has nothing to report this cycle.
    fn build_report(&mut self, buf: &mut [u8]) -> usize;
}

/// The staging half of the USB controller, as seen by the scheduler.
pub trait ReportSink {
    /// Is the IN endpoint buffer free to accept a report?
    fn ready(&mut self) -> bool;

    /// Stages a report for transmission at the host's next poll.
    /// Returns false if the controller rejected it.
    fn stage(&mut self, report_id: u8, payload: &[u8]) -> bool;
}

/// Per-device transmission statistics, including end-to-end event
/// latency: the time from the first physical input event of a cycle to
/// the completed transmission of the report that carried it.
#[derive(Copy, Clone, Debug, Default)]
pub struct DeviceStats {
    pub reports_started: u64,
    pub reports_completed: u64,
    pub reports_completed_with_events: u64,
    pub total_completion_time_us: u64,
    pub total_time_between_reports_us: u64,
    pub total_event_latency_us: u64,

    t_send_start: u64,
    t_send_complete: u64,
    t_first_event_of_cycle: u64,
    t_first_event_of_send: u64,
}

impl DeviceStats {
    /// Records a physical input event feeding this device (a button
    /// edge, a fresh sensor sample). Only the first event per cycle
    /// matters: latency is measured from the oldest unreported event.
    pub fn mark_event(&mut self, t: u64) {
        if self.t_first_event_of_cycle == 0 {
            self.t_first_event_of_cycle = t;
        }
    }

    fn start_report(&mut self, t: u64) {
        self.reports_started += 1;
        self.t_send_start = t;
        self.t_first_event_of_send = self.t_first_event_of_cycle;
        self.t_first_event_of_cycle = 0;
    }

    fn complete_report(&mut self, t: u64) {
        self.reports_completed += 1;
        self.total_completion_time_us += t - self.t_send_start;
        self.total_time_between_reports_us += t - self.t_send_complete;
        if self.t_first_event_of_send != 0 {
            self.total_event_latency_us += t - self.t_first_event_of_send;
            self.reports_completed_with_events += 1;
            self.t_first_event_of_send = 0;
        }
        self.t_send_complete = t;
    }

    pub fn reset(&mut self) {
        *self = DeviceStats {
            t_send_complete: self.t_send_complete,
            ..DeviceStats::default()
        };
    }

    /// Average event-to-transmission latency in microseconds.
    pub fn avg_event_latency_us(&self) -> u64 {
        if self.reports_completed_with_events != 0 {
            self.total_event_latency_us / self.reports_completed_with_events
        } else {
            0
        }
    }
}

/// Scheduler state for one HID interface.
pub struct HidInterface {
    polling_interval_us: u64,
    refractory_us: u64,
    t_send_complete: u64,
    device_sending: Option<usize>,
    last_sender: usize,
    suspended: bool,
    pub stats: [DeviceStats; MAX_DEVICES],
}

impl HidInterface {
    /// `polling_interval_us` is the shortest interval requested by any
    /// device on the interface. Intervals at or below the padding get
    /// no refractory time at all: just stage whenever the buffer is
    /// free.
    pub fn new(polling_interval_us: u64) -> Self {
        HidInterface {
            polling_interval_us,
            refractory_us: polling_interval_us.saturating_sub(REFRACTORY_PADDING_US),
            t_send_complete: 0,
            device_sending: None,
            last_sender: 0,
            suspended: false,
            stats: [DeviceStats::default(); MAX_DEVICES],
        }
    }

    pub fn polling_interval_us(&self) -> u64 {
        self.polling_interval_us
    }

    /// Bus suspend/resume. While suspended no reports are staged; on
    /// resume the cycle restarts from the current time. Returns true
    /// if the state actually changed, so the caller can run its
    /// state-change side effects (shutting off output ports).
    pub fn set_suspended(&mut self, suspended: bool, now: u64) -> bool {
        if self.suspended == suspended {
            return false;
        }
        self.suspended = suspended;
        if !suspended {
            self.t_send_complete = now;
        }
        true
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Periodic tick: stages at most one report. Returns the index of
    /// the device that sent, if any.
    pub fn task(
        &mut self,
        now: u64,
        sink: &mut dyn ReportSink,
        devices: &mut [&mut dyn HidDevice],
    ) -> Option<usize> {
        if self.suspended {
            return None;
        }
        if self.refractory_us != 0 && now < self.t_send_complete + self.refractory_us {
            return None;
        }
        if !sink.ready() {
            return None;
        }

        let n = devices.len().min(MAX_DEVICES);
        for step in 1..=n {
            let idx = (self.last_sender + step) % n;
            let dev = &mut devices[idx];
            if !dev.enabled() {
                continue;
            }
            let mut buf = [0u8; 63];
            let len = dev.build_report(&mut buf);
            if len != 0 && sink.stage(dev.report_id(), &buf[..len]) {
                self.device_sending = Some(idx);
                self.last_sender = idx;
                self.stats[idx].start_report(now);
                return Some(idx);
            }
        }
        None
    }

    /// Controller callback: the staged report has been read by the
    /// host. Completions arrive in the order the controller finishes
    /// them, which on a single staged-report endpoint is send order.
    pub fn on_send_complete(&mut self, now: u64) {
        if let Some(idx) = self.device_sending.take() {
            self.stats[idx].complete_report(now);
        }
        self.t_send_complete = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    /// Sink that records staged reports and is always ready.
    #[derive(Default)]
    struct TestSink {
        staged: Vec<(u8, Vec<u8>)>,
        ready: bool,
    }

    impl TestSink {
        fn new() -> Self {
            TestSink {
                staged: Vec::new(),
                ready: true,
            }
        }
    }

    impl ReportSink for TestSink {
        fn ready(&mut self) -> bool {
            self.ready
        }
        fn stage(&mut self, report_id: u8, payload: &[u8]) -> bool {
            self.staged.push((report_id, payload.to_vec()));
            true
        }
    }

    /// Device with a scripted amount of data.
    struct TestDevice {
        id: u8,
        enabled: bool,
        pending: usize,
    }

    impl TestDevice {
        fn new(id: u8, pending: usize) -> Self {
            TestDevice {
                id,
                enabled: true,
                pending,
            }
        }
    }

    impl HidDevice for TestDevice {
        fn report_id(&self) -> u8 {
            self.id
        }
        fn enabled(&self) -> bool {
            self.enabled
        }
        fn build_report(&mut self, buf: &mut [u8]) -> usize {
            if self.pending == 0 {
                return 0;
            }
            self.pending -= 1;
            buf[0] = self.id;
            4
        }
    }

    #[test]
    fn refractory_interval_delays_next_stage() {
        let mut ifc = HidInterface::new(8_000);
        let mut sink = TestSink::new();
        let mut d = TestDevice::new(1, 100);
        let mut devices: [&mut dyn HidDevice; 1] = [&mut d];

        // The refractory clock starts at zero, so the very first stage
        // also waits out one interval.
        assert_eq!(ifc.task(5_000, &mut sink, &mut devices), None);
        assert_eq!(ifc.task(10_000, &mut sink, &mut devices), Some(0));
        ifc.on_send_complete(11_000);

        // 8ms polling - 2.5ms padding = 5.5ms refractory from the
        // completion at t=11000.
        assert_eq!(ifc.task(15_000, &mut sink, &mut devices), None);
        assert_eq!(ifc.task(16_499, &mut sink, &mut devices), None);
        assert_eq!(ifc.task(16_500, &mut sink, &mut devices), Some(0));
    }

    #[test]
    fn short_polling_interval_has_no_refractory() {
        let mut ifc = HidInterface::new(1_000);
        let mut sink = TestSink::new();
        let mut d = TestDevice::new(1, 100);
        let mut devices: [&mut dyn HidDevice; 1] = [&mut d];

        assert_eq!(ifc.task(0, &mut sink, &mut devices), Some(0));
        ifc.on_send_complete(100);
        assert_eq!(ifc.task(101, &mut sink, &mut devices), Some(0));
    }

    #[test]
    fn round_robin_is_fair_when_all_devices_have_data() {
        let mut ifc = HidInterface::new(8_000);
        let mut sink = TestSink::new();
        let mut a = TestDevice::new(1, 100);
        let mut b = TestDevice::new(2, 100);
        let mut c = TestDevice::new(3, 100);
        let mut devices: [&mut dyn HidDevice; 3] = [&mut a, &mut b, &mut c];

        let mut now = 8_000;
        for _ in 0..9 {
            let sent = ifc.task(now, &mut sink, &mut devices);
            assert!(sent.is_some());
            now += 8_000;
            ifc.on_send_complete(now);
            now += 8_000;
        }
        // Nine sends over three always-ready devices: exactly three
        // each, in rotation.
        let ids: Vec<u8> = sink.staged.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, [2, 3, 1, 2, 3, 1, 2, 3, 1]);
    }

    #[test]
    fn idle_devices_are_skipped() {
        let mut ifc = HidInterface::new(8_000);
        let mut sink = TestSink::new();
        let mut a = TestDevice::new(1, 0);
        let mut b = TestDevice::new(2, 2);
        let mut devices: [&mut dyn HidDevice; 2] = [&mut a, &mut b];

        assert_eq!(ifc.task(8_000, &mut sink, &mut devices), Some(1));
        ifc.on_send_complete(16_000);
        assert_eq!(ifc.task(24_000, &mut sink, &mut devices), Some(1));
        ifc.on_send_complete(32_000);
        // Nobody has data now.
        assert_eq!(ifc.task(40_000, &mut sink, &mut devices), None);
        assert_eq!(sink.staged.len(), 2);
    }

    #[test]
    fn disabled_devices_never_send() {
        let mut ifc = HidInterface::new(8_000);
        let mut sink = TestSink::new();
        let mut a = TestDevice::new(1, 5);
        a.enabled = false;
        let mut b = TestDevice::new(2, 5);
        let mut devices: [&mut dyn HidDevice; 2] = [&mut a, &mut b];

        for i in 1..=3 {
            assert_eq!(ifc.task(i * 16_000, &mut sink, &mut devices), Some(1));
            ifc.on_send_complete(i * 16_000 + 500);
        }
        assert!(sink.staged.iter().all(|(id, _)| *id == 2));
    }

    #[test]
    fn suspend_blocks_sends_and_resume_restarts_cycle() {
        let mut ifc = HidInterface::new(8_000);
        let mut sink = TestSink::new();
        let mut d = TestDevice::new(1, 100);
        let mut devices: [&mut dyn HidDevice; 1] = [&mut d];

        assert!(ifc.set_suspended(true, 0));
        assert!(!ifc.set_suspended(true, 0));
        assert_eq!(ifc.task(100_000, &mut sink, &mut devices), None);

        assert!(ifc.set_suspended(false, 200_000));
        // The refractory clock restarted at resume time.
        assert_eq!(ifc.task(201_000, &mut sink, &mut devices), None);
        assert_eq!(ifc.task(205_500, &mut sink, &mut devices), Some(0));
    }

    #[test]
    fn event_latency_accumulates_from_first_event() {
        let mut ifc = HidInterface::new(8_000);
        let mut sink = TestSink::new();
        let mut d = TestDevice::new(1, 100);
        let mut devices: [&mut dyn HidDevice; 1] = [&mut d];

        // Two events in the cycle; latency counts from the first.
        ifc.stats[0].mark_event(1_000);
        ifc.stats[0].mark_event(3_000);
        assert_eq!(ifc.task(6_000, &mut sink, &mut devices), Some(0));
        ifc.on_send_complete(7_000);

        assert_eq!(ifc.stats[0].total_event_latency_us, 6_000);
        assert_eq!(ifc.stats[0].reports_completed_with_events, 1);
        assert_eq!(ifc.stats[0].avg_event_latency_us(), 6_000);

        // A report with no events doesn't count toward latency.
        assert_eq!(ifc.task(20_000, &mut sink, &mut devices), Some(0));
        ifc.on_send_complete(21_000);
        assert_eq!(ifc.stats[0].reports_completed_with_events, 1);
        assert_eq!(ifc.stats[0].reports_completed, 2);
    }

    #[test]
    fn not_ready_sink_defers_staging() {
        let mut ifc = HidInterface::new(1_000);
        let mut sink = TestSink::new();
        sink.ready = false;
        let mut d = TestDevice::new(1, 100);
        let mut devices: [&mut dyn HidDevice; 1] = [&mut d];

        assert_eq!(ifc.task(0, &mut sink, &mut devices), None);
        sink.ready = true;
        assert_eq!(ifc.task(1, &mut sink, &mut devices), Some(0));
    }
}
