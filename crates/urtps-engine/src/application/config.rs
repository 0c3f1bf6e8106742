//! Engine configuration.
//!
//! [`EngineConfig`] is the single source of truth for the scheduler's runtime
//! settings. The infrastructure layer fills it from the TOML peer config and
//! CLI arguments; tests build it directly.

use std::net::Ipv4Addr;
use std::time::Duration;

/// Multicast group used when none is configured.
pub const DEFAULT_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 253);
/// UDP port used when none is configured.
pub const DEFAULT_PORT: u16 = 5007;
/// Longest datagram, in bytes, the receive loop accepts; longer ones are dropped.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 1024;
/// Upper bound on a platform network bootstrap (e.g. joining Wi-Fi).
pub const DEFAULT_BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(10);

/// All runtime configuration for one engine.
///
/// # Example
///
/// ```rust
/// use urtps_engine::application::config::EngineConfig;
///
/// let cfg = EngineConfig::default();
/// assert_eq!(cfg.port, 5007);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// IPv4 multicast group every peer joins.
    pub group: Ipv4Addr,
    /// UDP port frames are sent to and received on.
    pub port: u16,
    /// Longest datagram the receive loop routes. Longer datagrams are
    /// counted as decode errors and dropped.
    pub recv_buffer_size: usize,
    /// Pause between scheduler passes. `Duration::ZERO` yields to the other
    /// loops without sleeping; a non-zero value bounds CPU use at the cost of
    /// latency.
    pub pass_interval: Duration,
    /// Time allowed for a network bootstrap hook before `connect` fails.
    pub bootstrap_timeout: Duration,
}

impl Default for EngineConfig {
    /// | Field             | Default        |
    /// |-------------------|----------------|
    /// | group             | `224.0.0.253`  |
    /// | port              | `5007`         |
    /// | recv_buffer_size  | 1024 bytes     |
    /// | pass_interval     | zero (yield)   |
    /// | bootstrap_timeout | 10 seconds     |
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP,
            port: DEFAULT_PORT,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            pass_interval: Duration::ZERO,
            bootstrap_timeout: DEFAULT_BOOTSTRAP_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_group_is_multicast() {
        // Arrange / Act
        let cfg = EngineConfig::default();

        // Assert
        assert!(cfg.group.is_multicast());
        assert_eq!(cfg.group, Ipv4Addr::new(224, 0, 0, 253));
    }

    #[test]
    fn test_default_port_is_5007() {
        assert_eq!(EngineConfig::default().port, 5007);
    }

    #[test]
    fn test_default_pass_interval_yields_without_delay() {
        assert_eq!(EngineConfig::default().pass_interval, Duration::ZERO);
    }

    #[test]
    fn test_default_bootstrap_timeout_is_10s() {
        assert_eq!(
            EngineConfig::default().bootstrap_timeout,
            Duration::from_secs(10)
        );
    }
}
