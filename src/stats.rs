use std::time::Duration;

/// Counters reported by a completed sending run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    /// payload bytes read from the byte source (each counted once, regardless of how often
    ///  its frame went over the wire)
    pub payload_bytes: u64,
    /// DATA frames retransmitted after a timer expiry
    pub retransmits: u64,
}

/// Counters reported by a completed receiving run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub bytes_written: u64,
}

/// Renders a human-readable throughput summary. Sub-millisecond runs are clamped to 1 ms
///  so the rate stays finite.
pub fn format_rate(bytes: u64, elapsed: Duration) -> String {
    let elapsed_ms = (elapsed.as_millis() as u64).max(1);
    let mib = bytes as f64 / (1024.0 * 1024.0);
    let secs = elapsed_ms as f64 / 1000.0;
    let mibps = mib * 8.0 / secs;
    format!("{:.2} MiB in {:.2} s ({:.2} Mib/s)", mib, secs, mibps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::one_mib_per_second(1024 * 1024, Duration::from_secs(1), "1.00 MiB in 1.00 s (8.00 Mib/s)")]
    #[case::half_rate(1024 * 1024, Duration::from_secs(2), "1.00 MiB in 2.00 s (4.00 Mib/s)")]
    #[case::zero_bytes(0, Duration::from_secs(1), "0.00 MiB in 1.00 s (0.00 Mib/s)")]
    #[case::instant_run_is_clamped(1024 * 1024, Duration::ZERO, "1.00 MiB in 0.00 s (8000.00 Mib/s)")]
    fn test_format_rate(#[case] bytes: u64, #[case] elapsed: Duration, #[case] expected: &str) {
        assert_eq!(format_rate(bytes, elapsed), expected);
    }
}
