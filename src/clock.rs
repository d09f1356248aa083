//! Wallclock and NTP time helpers shared by RTP timestamping and RTCP.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// NTP epoch offset from Unix (1900 to 1970), in seconds.
const NTP_UNIX_EPOCH_DIFF: u64 = 2_208_988_800;

/// Convert now() to an NTP timestamp (seconds since 1900) split into (msw, lsw).
pub fn ntp_now() -> (u32, u32) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0));
    let secs = now.as_secs() + NTP_UNIX_EPOCH_DIFF;
    let frac = ((u64::from(now.subsec_nanos())) << 32) / 1_000_000_000u64;
    (secs as u32, frac as u32)
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis()
}

/// The 32-bit "compact" NTP form used by RTCP LSR/DLSR:
/// `(MSW & 0xFFFF) << 16 | LSW >> 16`.
#[inline]
pub fn ntp_to_compact(msw: u32, lsw: u32) -> u32 {
    (msw << 16) | (lsw >> 16)
}

/// Compact NTP of the current instant.
#[inline]
pub fn now_ntp_compact() -> u32 {
    let (s, f) = ntp_now();
    ntp_to_compact(s, f)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn ntp_now_is_past_1900() {
        let (secs, _frac) = ntp_now();
        // 2^31 seconds after 1900 is in 1968; any current clock is later.
        assert!(secs > (1 << 31));
    }

    #[test]
    fn compact_keeps_middle_bits() {
        let compact = ntp_to_compact(0x1234_5678, 0x9ABC_DEF0);
        assert_eq!(compact, 0x5678_9ABC);
    }
}
