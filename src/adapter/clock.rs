// Clock-rate conversion for presentation timestamps coming from an
// external media pipeline, whose samples are clocked at whatever rate the
// codec uses (48 kHz audio, 90 kHz video, ...), into RTMP's fixed
// millisecond (1 kHz) timestamp domain.

/// Converts a timestamp from `clock_rate` ticks to milliseconds.
///
/// Splits the conversion into a whole-seconds term and a sub-second
/// remainder term instead of computing `pts * 1000 / clock_rate` directly,
/// so a multi-hour `pts` at a high clock rate never overflows a `u64`
/// intermediate.
pub fn pts_to_millis(pts: u64, clock_rate: u32) -> u32 {
    if clock_rate == 0 {
        return 0;
    }
    let clock_rate = clock_rate as u64;
    let whole_seconds = pts / clock_rate;
    let remainder = pts % clock_rate;
    let ms = whole_seconds.saturating_mul(1000) + (remainder * 1000) / clock_rate;
    ms as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pts_to_millis_basic() {
        assert_eq!(pts_to_millis(48000, 48000), 1000);
        assert_eq!(pts_to_millis(90000, 90000), 1000);
        assert_eq!(pts_to_millis(45000, 90000), 500);
    }

    #[test]
    fn test_pts_to_millis_does_not_overflow_past_30_hours() {
        // ~33 hours at a 90 kHz clock
        let pts: u64 = 90_000 * 60 * 60 * 33;
        let ms = pts_to_millis(pts, 90_000);
        assert_eq!(ms as u64, 60 * 60 * 33 * 1000);
    }

    #[test]
    fn test_zero_clock_rate_is_zero() {
        assert_eq!(pts_to_millis(1000, 0), 0);
    }
}
