use std::time::Duration;

use anyhow::bail;

use crate::frame::MAX_PAYLOAD_LEN;

/// Tuning knobs for the sending side. The receiver needs no configuration: its window is
///  implicitly a single frame, and all timing is driven by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderConfig {
    /// Maximum payload bytes per DATA frame. Together with the 20-byte frame header this
    ///  must fit the path MTU - the default of 1000 leaves ample headroom below full
    ///  Ethernet frames, and the hard ceiling of 1400 keeps fragmentation unlikely even
    ///  with tunneling overhead on the route.
    pub mss: usize,

    /// Maximum number of *frames* (not bytes) in flight pending acknowledgement.
    pub window: usize,

    /// Retransmission timeout, anchored on the oldest unacknowledged frame. When it
    ///  expires the entire window is retransmitted in sequence order.
    pub retransmit_timeout: Duration,
}

impl SenderConfig {
    pub const MIN_MSS: usize = 1;
    pub const MAX_MSS: usize = MAX_PAYLOAD_LEN;
    pub const MIN_RETRANSMIT_TIMEOUT: Duration = Duration::from_millis(10);

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.mss < Self::MIN_MSS || self.mss > Self::MAX_MSS {
            bail!(
                "MSS must be in [{}, {}], was {}",
                Self::MIN_MSS,
                Self::MAX_MSS,
                self.mss
            );
        }
        if self.window == 0 {
            bail!("window must be at least 1 frame");
        }
        if self.retransmit_timeout < Self::MIN_RETRANSMIT_TIMEOUT {
            bail!(
                "retransmission timeout must be at least {:?}, was {:?}",
                Self::MIN_RETRANSMIT_TIMEOUT,
                self.retransmit_timeout
            );
        }
        Ok(())
    }
}

impl Default for SenderConfig {
    fn default() -> SenderConfig {
        SenderConfig {
            mss: 1000,
            window: 64,
            retransmit_timeout: Duration::from_millis(200),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::defaults(SenderConfig::default(), true)]
    #[case::minimal(SenderConfig { mss: 1, window: 1, retransmit_timeout: Duration::from_millis(10) }, true)]
    #[case::max_mss(SenderConfig { mss: 1400, ..SenderConfig::default() }, true)]
    #[case::mss_zero(SenderConfig { mss: 0, ..SenderConfig::default() }, false)]
    #[case::mss_too_big(SenderConfig { mss: 1401, ..SenderConfig::default() }, false)]
    #[case::window_zero(SenderConfig { window: 0, ..SenderConfig::default() }, false)]
    #[case::timeout_too_small(SenderConfig { retransmit_timeout: Duration::from_millis(9), ..SenderConfig::default() }, false)]
    fn test_validate(#[case] config: SenderConfig, #[case] expected_valid: bool) {
        assert_eq!(config.validate().is_ok(), expected_valid);
    }
}
