//! Cache capacity derived from expected trace throughput
//!
//! The executable and frame caches must hold every distinct entry that can
//! show up over several monitor intervals, otherwise entries are evicted
//! and re-resolved on every flush.

use std::time::Duration;

/// Number of monitor intervals worth of distinct traces the caches absorb
pub const TRACE_CACHE_INTERVALS: u64 = 6;

/// Lower bound for any throughput-derived cache
pub const TRACE_CACHE_MIN_SIZE: u64 = 65536;

/// Largest capacity handed out (largest power of two in a `u32`)
const TRACE_CACHE_MAX_SIZE: u64 = 1 << 31;

/// Compute the capacity of the throughput-sized caches
///
/// `samples_per_second * interval_seconds * present_cores`, times
/// [`TRACE_CACHE_INTERVALS`], floored at [`TRACE_CACHE_MIN_SIZE`] and rounded
/// up to the next power of two. Sub-second intervals count as zero seconds.
///
/// `interval` is the capture layer's monitor interval. The reporter passes
/// that rather than its report interval.
#[must_use]
pub fn trace_cache_size(samples_per_second: u32, interval: Duration, present_cores: u32) -> u32 {
    let max_elements = u64::from(samples_per_second)
        .saturating_mul(interval.as_secs())
        .saturating_mul(u64::from(present_cores));
    let size = max_elements.saturating_mul(TRACE_CACHE_INTERVALS).max(TRACE_CACHE_MIN_SIZE);

    let rounded = size.checked_next_power_of_two().unwrap_or(TRACE_CACHE_MAX_SIZE);
    #[allow(clippy::cast_possible_truncation)]
    {
        rounded.min(TRACE_CACHE_MAX_SIZE) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_inputs_hit_floor() {
        assert_eq!(trace_cache_size(20, Duration::from_secs(5), 4), 65536);
        assert_eq!(trace_cache_size(0, Duration::from_secs(5), 4), 65536);
        assert_eq!(trace_cache_size(20, Duration::from_millis(500), 64), 65536);
    }

    #[test]
    fn test_large_inputs_round_up() {
        // 100 * 10 * 16 * 6 = 96_000 -> 131_072
        assert_eq!(trace_cache_size(100, Duration::from_secs(10), 16), 131_072);
        // 1000 * 60 * 128 * 6 = 46_080_000 -> 67_108_864
        assert_eq!(trace_cache_size(1000, Duration::from_secs(60), 128), 67_108_864);
    }

    #[test]
    fn test_just_above_floor_rounds_to_next_power() {
        // 128 * 8 * 128 * 6 = 786_432 -> 1_048_576
        assert_eq!(trace_cache_size(128, Duration::from_secs(8), 128), 1_048_576);
        // 1366 * 1 * 8 * 6 = 65_568, just above the floor
        assert_eq!(trace_cache_size(1366, Duration::from_secs(1), 8), 131_072);
    }

    #[test]
    fn test_huge_inputs_saturate() {
        assert_eq!(trace_cache_size(u32::MAX, Duration::from_secs(u64::MAX), u32::MAX), 1 << 31);
    }

    #[test]
    fn test_size_properties_hold_across_inputs() {
        for freq in [1u32, 19, 20, 97, 100, 997, 5000] {
            for secs in [0u64, 1, 5, 10, 60, 300] {
                for cores in [1u32, 2, 4, 16, 96, 128] {
                    let size = u64::from(trace_cache_size(freq, Duration::from_secs(secs), cores));
                    let demand = u64::from(freq) * secs * u64::from(cores) * TRACE_CACHE_INTERVALS;
                    assert!(size.is_power_of_two(), "{size} for {freq}/{secs}/{cores}");
                    assert!(size >= TRACE_CACHE_MIN_SIZE);
                    assert!(size >= demand, "{size} < {demand} for {freq}/{secs}/{cores}");
                    // Never more than twice what is needed above the floor
                    assert!(size < 2 * demand.max(TRACE_CACHE_MIN_SIZE));
                }
            }
        }
    }
}
