//! When the sequencer is allowed to move on.

use std::time::Duration;

/// Rule deciding which inbound frames complete the in-flight step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdvancePolicy {
    /// Any decoded frame completes the step, whatever its type or content.
    /// No timeout: a silent device stalls the update.
    #[default]
    AnyFrame,
    /// Only a reply of the same type as the command, or an ACK, completes the
    /// step. Silence for `timeout` re-sends the command, up to `max_retries`
    /// times, then aborts.
    Correlated {
        timeout: Duration,
        max_retries: u32,
        abort_on_nack: bool,
    },
}

impl AdvancePolicy {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);
    pub const DEFAULT_RETRIES: u32 = 3;

    /// Correlated policy with default limits and abort on NACK.
    pub fn hardened() -> Self {
        AdvancePolicy::Correlated {
            timeout: Self::DEFAULT_TIMEOUT,
            max_retries: Self::DEFAULT_RETRIES,
            abort_on_nack: true,
        }
    }

    /// Response deadline, if the policy has one.
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            AdvancePolicy::AnyFrame => None,
            AdvancePolicy::Correlated { timeout, .. } => Some(*timeout),
        }
    }

    pub fn is_correlated(&self) -> bool {
        matches!(self, AdvancePolicy::Correlated { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_any_frame() {
        assert_eq!(AdvancePolicy::default(), AdvancePolicy::AnyFrame);
        assert_eq!(AdvancePolicy::default().timeout(), None);
    }

    #[test]
    fn test_hardened() {
        let policy = AdvancePolicy::hardened();
        assert!(policy.is_correlated());
        assert_eq!(policy.timeout(), Some(Duration::from_millis(1000)));
    }
}
