//! Interval arithmetic on Unix-second timestamps
//!
//! Records use the interval-start convention: a sample stamped `t` in a
//! dataset with interval `I` describes the rate over `[t, t + I)`. Windows and
//! buckets are half-open as well. Converting a rate to a quantity always goes
//! through the overlap length, never through a raw count of samples.

/// Seconds in one hour; quantities are expressed in rate × hours.
pub const SECONDS_PER_HOUR: i64 = 3_600;

/// Seconds in one day.
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Floor `ts` to a multiple of `step` (works for negative timestamps).
pub fn align_down(ts: i64, step: i64) -> i64 {
    debug_assert!(step > 0);
    ts.div_euclid(step) * step
}

/// Whether `ts` sits exactly on a `step` boundary.
pub fn is_aligned(ts: i64, step: i64) -> bool {
    step > 0 && ts.rem_euclid(step) == 0
}

/// Length in seconds of the intersection of `[a_start, a_end)` and `[b_start, b_end)`.
pub fn overlap(a_start: i64, a_end: i64, b_start: i64, b_end: i64) -> i64 {
    a_end.min(b_end).saturating_sub(a_start.max(b_start)).max(0)
}

/// Quantity represented by `rate` sustained for `seconds`.
///
/// `quantity = rate × interval_hours`
pub fn rate_to_quantity(rate: f64, seconds: i64) -> f64 {
    rate * seconds as f64 / SECONDS_PER_HOUR as f64
}

/// Split the sample interval `[ts, ts + interval)`, clipped to the window
/// `[window_start, window_end)`, into `(bucket_start, seconds)` pieces along
/// `bucket_secs` boundaries.
///
/// Pieces of zero length are never produced.
pub fn split_into_buckets(
    ts: i64,
    interval: i64,
    bucket_secs: i64,
    window_start: i64,
    window_end: i64,
) -> Vec<(i64, i64)> {
    let start = ts.max(window_start);
    let end = (ts + interval).min(window_end);
    let mut pieces = Vec::new();
    if start >= end || bucket_secs <= 0 {
        return pieces;
    }

    let mut bucket = align_down(start, bucket_secs);
    while bucket < end {
        let secs = overlap(start, end, bucket, bucket + bucket_secs);
        if secs > 0 {
            pieces.push((bucket, secs));
        }
        bucket += bucket_secs;
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_align_down() {
        assert_eq!(align_down(3_599, 3_600), 0);
        assert_eq!(align_down(3_600, 3_600), 3_600);
        assert_eq!(align_down(-1, 300), -300);
    }

    #[test]
    fn test_is_aligned() {
        assert!(is_aligned(1_800, 300));
        assert!(!is_aligned(1_801, 300));
        assert!(!is_aligned(0, 0));
    }

    #[test]
    fn test_overlap() {
        assert_eq!(overlap(0, 300, 100, 1_000), 200);
        assert_eq!(overlap(0, 300, 300, 600), 0);
        assert_eq!(overlap(0, 300, 500, 600), 0);
    }

    #[test]
    fn test_rate_to_quantity() {
        // 100 units/hour for 5 minutes
        let q = rate_to_quantity(100.0, 300);
        assert!((q - 100.0 / 12.0).abs() < 1e-12);
        assert_eq!(rate_to_quantity(-50.0, 3_600), -50.0);
    }

    #[test]
    fn test_split_aligned_sample() {
        // A 30-minute sample inside one hourly bucket
        let pieces = split_into_buckets(1_800, 1_800, 3_600, 0, 86_400);
        assert_eq!(pieces, vec![(0, 1_800)]);
    }

    #[test]
    fn test_split_straddling_sample() {
        // A 1-hour sample starting at :30 splits over two hourly buckets
        let pieces = split_into_buckets(1_800, 3_600, 3_600, 0, 86_400);
        assert_eq!(pieces, vec![(0, 1_800), (3_600, 1_800)]);
    }

    #[test]
    fn test_split_clipped_by_window() {
        let pieces = split_into_buckets(0, 1_800, 3_600, 600, 1_200);
        assert_eq!(pieces, vec![(0, 600)]);
        assert!(split_into_buckets(0, 300, 3_600, 300, 600).is_empty());
    }

    proptest! {
        #[test]
        fn prop_split_pieces_cover_clipped_interval(
            ts in -100_000i64..100_000,
            interval in 1i64..7_200,
            bucket in 1i64..90_000,
            window_start in -100_000i64..100_000,
            window_len in 0i64..200_000,
        ) {
            let window_end = window_start + window_len;
            let pieces = split_into_buckets(ts, interval, bucket, window_start, window_end);
            let total: i64 = pieces.iter().map(|(_, secs)| secs).sum();
            prop_assert_eq!(total, overlap(ts, ts + interval, window_start, window_end));
            for (b, secs) in &pieces {
                prop_assert!(is_aligned(*b, bucket));
                prop_assert!(*secs > 0 && *secs <= bucket);
            }
        }
    }
}
