//! Wall-clock timestamps with microsecond resolution
//!
//! Capture timestamps carry seconds plus microseconds and must survive
//! two wire encodings: milliseconds since the Unix epoch and 64-bit
//! NTP format (seconds since 1900 in the high half, binary fraction in
//! the low half).

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_EPOCH_OFFSET: u64 = 2_208_988_800;

/// Packet timestamp: seconds + microseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp {
    pub sec: u64,
    pub usec: u32,
}

impl Timestamp {
    pub const fn new(sec: u64, usec: u32) -> Self {
        Self { sec, usec }
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        let d = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            sec: d.as_secs(),
            usec: d.subsec_micros(),
        }
    }

    /// Milliseconds since the Unix epoch.
    #[inline]
    pub fn as_unix_millis(&self) -> u64 {
        self.sec * 1000 + u64::from(self.usec) / 1000
    }

    /// 64-bit NTP timestamp.
    ///
    /// The fraction divides by 999 999 rather than 1 000 000 so that
    /// converting the fraction back to microseconds cannot round below
    /// the original value.
    #[inline]
    pub fn as_ntp64(&self) -> u64 {
        let frac = (u64::from(self.usec) << 32) / 999_999;
        ((self.sec + NTP_EPOCH_OFFSET) << 32) | (frac & 0xffff_ffff)
    }

    /// Whole seconds elapsed since `earlier`. Timeout arithmetic works
    /// on whole seconds only; sub-second idle gaps never expire a flow.
    #[inline]
    pub fn secs_since(&self, earlier: Timestamp) -> u64 {
        self.sec.saturating_sub(earlier.sec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_millis() {
        let ts = Timestamp::new(1_600_000_000, 123_456);
        assert_eq!(ts.as_unix_millis(), 1_600_000_000_123);
    }

    #[test]
    fn test_ntp_seconds_part() {
        let ts = Timestamp::new(0, 0);
        assert_eq!(ts.as_ntp64() >> 32, NTP_EPOCH_OFFSET);

        let ts = Timestamp::new(1_600_000_000, 0);
        assert_eq!(ts.as_ntp64() >> 32, 1_600_000_000 + NTP_EPOCH_OFFSET);
    }

    #[test]
    fn test_ntp_fraction_round_trip() {
        // Converting the fraction back to microseconds must not lose
        // a microsecond to rounding.
        for usec in [1u32, 999, 500_000, 999_998] {
            let ts = Timestamp::new(0, usec);
            let frac = ts.as_ntp64() & 0xffff_ffff;
            let back = (frac * 999_999) >> 32;
            assert!(back as u32 >= usec.saturating_sub(1) && back as u32 <= usec);
        }
    }

    #[test]
    fn test_secs_since_truncates() {
        let first = Timestamp::new(100, 900_000);
        let last = Timestamp::new(130, 100_000);
        // 29.2 real seconds, but whole-second arithmetic says 30.
        assert_eq!(last.secs_since(first), 30);
        assert_eq!(first.secs_since(last), 0);
    }

    #[test]
    fn test_ordering() {
        assert!(Timestamp::new(10, 5) < Timestamp::new(10, 6));
        assert!(Timestamp::new(9, 999_999) < Timestamp::new(10, 0));
    }
}
