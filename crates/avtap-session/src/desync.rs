use std::time::{Duration, Instant};

/// Rate thresholds for stall detection. Rates are in bytes per millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesyncThresholds {
    /// Length of one measurement window.
    pub window: Duration,
    /// At or below this rate an active stream counts as stalled.
    pub stall_rate: u64,
    /// At or above this rate a stalled stream counts as recovered.
    pub recover_rate: u64,
    /// A window needs more than this many transfers to count as active.
    pub min_transfers: u32,
}

impl Default for DesyncThresholds {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(1000),
            stall_rate: 30,
            recover_rate: 100,
            min_transfers: 2,
        }
    }
}

/// Outcome of closing a measurement window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesyncEvent {
    /// Throughput collapsed while frames kept arriving.
    Stalled { rate: u64, transfers: u32 },
    /// Throughput came back after a stall; the channel should be paused and
    /// flushed.
    Recover { rate: u64 },
}

/// Rolling one-window throughput tracker for a single stream.
///
/// A quiet stream (few transfers) is never flagged; only a stream that keeps
/// transferring at a collapsed byte rate is. The only remedy it can suggest
/// is pause-and-flush once the rate bounces back.
#[derive(Debug, Clone)]
pub struct DesyncDetector {
    thresholds: DesyncThresholds,
    window_start: Instant,
    transfers: u32,
    bytes: u64,
    stalled: bool,
}

impl DesyncDetector {
    pub fn new(thresholds: DesyncThresholds, now: Instant) -> Self {
        Self {
            thresholds,
            window_start: now,
            transfers: 0,
            bytes: 0,
            stalled: false,
        }
    }

    /// Count one forwarded frame of `len` bytes.
    pub fn record(&mut self, len: usize) {
        self.transfers = self.transfers.saturating_add(1);
        self.bytes = self.bytes.saturating_add(len as u64);
    }

    /// Close the window if it has run its length.
    pub fn poll(&mut self, now: Instant) -> Option<DesyncEvent> {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.thresholds.window {
            return None;
        }

        let elapsed_ms = (elapsed.as_millis() as u64).max(1);
        // Thresholds compare against the exact rate; `rate` is only the
        // floored value reported in events.
        let rate = self.bytes / elapsed_ms;
        let at_most_stall = self.bytes <= self.thresholds.stall_rate.saturating_mul(elapsed_ms);
        let at_least_recover =
            self.bytes >= self.thresholds.recover_rate.saturating_mul(elapsed_ms);
        let transfers = self.transfers;

        let event = if at_most_stall && transfers > self.thresholds.min_transfers && !self.stalled
        {
            self.stalled = true;
            Some(DesyncEvent::Stalled { rate, transfers })
        } else if self.stalled && at_least_recover {
            self.stalled = false;
            Some(DesyncEvent::Recover { rate })
        } else {
            None
        };

        self.transfers = 0;
        self.bytes = 0;
        self.window_start = now;
        event
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Transfers counted in the open window.
    pub fn transfers(&self) -> u32 {
        self.transfers
    }

    /// Bytes counted in the open window.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_millis(1000);

    fn feed(detector: &mut DesyncDetector, transfers: usize, total: usize) {
        for i in 0..transfers {
            let share = total / transfers + usize::from(i < total % transfers);
            detector.record(share);
        }
    }

    #[test]
    fn window_stays_open_until_elapsed() {
        let start = Instant::now();
        let mut detector = DesyncDetector::new(DesyncThresholds::default(), start);
        feed(&mut detector, 5, 100);

        assert_eq!(detector.poll(start + Duration::from_millis(999)), None);
        assert_eq!(detector.transfers(), 5);
        assert_eq!(detector.bytes(), 100);
    }

    #[test]
    fn low_rate_with_activity_sets_stall() {
        let start = Instant::now();
        let mut detector = DesyncDetector::new(DesyncThresholds::default(), start);
        feed(&mut detector, 3, 30_000);

        let event = detector.poll(start + SECOND);
        assert_eq!(
            event,
            Some(DesyncEvent::Stalled {
                rate: 30,
                transfers: 3
            })
        );
        assert!(detector.is_stalled());
        assert_eq!(detector.transfers(), 0);
        assert_eq!(detector.bytes(), 0);
    }

    #[test]
    fn low_rate_with_few_transfers_is_idle_not_stalled() {
        let start = Instant::now();
        let mut detector = DesyncDetector::new(DesyncThresholds::default(), start);
        feed(&mut detector, 2, 10);

        assert_eq!(detector.poll(start + SECOND), None);
        assert!(!detector.is_stalled());
    }

    #[test]
    fn high_rate_without_stall_does_nothing() {
        let start = Instant::now();
        let mut detector = DesyncDetector::new(DesyncThresholds::default(), start);
        feed(&mut detector, 30, 500_000);

        assert_eq!(detector.poll(start + SECOND), None);
    }

    #[test]
    fn recovery_fires_once_per_stall() {
        let start = Instant::now();
        let mut detector = DesyncDetector::new(DesyncThresholds::default(), start);

        feed(&mut detector, 4, 4_000);
        let t1 = start + SECOND;
        assert!(matches!(
            detector.poll(t1),
            Some(DesyncEvent::Stalled { .. })
        ));

        // Still stalled: no second stall event.
        feed(&mut detector, 4, 4_000);
        let t2 = t1 + SECOND;
        assert_eq!(detector.poll(t2), None);
        assert!(detector.is_stalled());

        feed(&mut detector, 20, 150_000);
        let t3 = t2 + SECOND;
        assert_eq!(detector.poll(t3), Some(DesyncEvent::Recover { rate: 150 }));
        assert!(!detector.is_stalled());

        feed(&mut detector, 20, 150_000);
        let t4 = t3 + SECOND;
        assert_eq!(detector.poll(t4), None);

        feed(&mut detector, 3, 300);
        let t5 = t4 + SECOND;
        assert!(matches!(
            detector.poll(t5),
            Some(DesyncEvent::Stalled { .. })
        ));
    }

    #[test]
    fn middling_rate_keeps_stall_flag() {
        let start = Instant::now();
        let mut detector = DesyncDetector::new(DesyncThresholds::default(), start);
        feed(&mut detector, 3, 3_000);
        let t1 = start + SECOND;
        detector.poll(t1);

        feed(&mut detector, 10, 60_000);
        assert_eq!(detector.poll(t1 + SECOND), None);
        assert!(detector.is_stalled());
    }

    #[test]
    fn fractional_rate_above_threshold_is_not_a_stall() {
        let start = Instant::now();
        let mut detector = DesyncDetector::new(DesyncThresholds::default(), start);
        // 30.999 bytes/ms floors to 30 but is above the stall threshold.
        feed(&mut detector, 3, 30_999);

        assert_eq!(detector.poll(start + SECOND), None);
        assert!(!detector.is_stalled());
    }

    #[test]
    fn fractional_rate_below_recovery_keeps_stall() {
        let start = Instant::now();
        let mut detector = DesyncDetector::new(DesyncThresholds::default(), start);
        feed(&mut detector, 3, 3_000);
        let t1 = start + SECOND;
        detector.poll(t1);

        // 99.999 bytes/ms is short of the recovery threshold.
        feed(&mut detector, 10, 99_999);
        assert_eq!(detector.poll(t1 + SECOND), None);
        assert!(detector.is_stalled());

        feed(&mut detector, 10, 100_000);
        assert_eq!(
            detector.poll(t1 + 2 * SECOND),
            Some(DesyncEvent::Recover { rate: 100 })
        );
    }

    #[test]
    fn rate_uses_actual_elapsed_time() {
        let start = Instant::now();
        let mut detector = DesyncDetector::new(DesyncThresholds::default(), start);
        // 3 transfers, 60 KB over 2 s = 30 bytes/ms.
        feed(&mut detector, 3, 60_000);

        let event = detector.poll(start + 2 * SECOND);
        assert_eq!(
            event,
            Some(DesyncEvent::Stalled {
                rate: 30,
                transfers: 3
            })
        );
    }
}
