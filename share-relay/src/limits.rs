//! Per-address and per-peer quotas.
//!
//! WebSocket upgrades are counted per source IP (after `X-Forwarded-For`
//! resolution when enabled). Inbound messages are counted per peer id, so
//! peers behind one NAT do not share a message budget. Both quotas are
//! per minute, enforced by governor keyed limiters over a DashMap.

use crate::config::LimitsConfig;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use share_types::PeerId;
use std::hash::Hash;
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Keyed limiter with DashMap state.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Connection and message quotas.
#[derive(Clone)]
pub struct RateLimits {
    /// Limits WebSocket upgrades per source IP.
    ///
    /// Configured via `limits.connections_per_ip`.
    connection_limiter: Arc<KeyedLimiter<IpAddr>>,

    /// Limits inbound messages per peer.
    ///
    /// Configured via `limits.messages_per_minute`.
    message_limiter: Arc<KeyedLimiter<PeerId>>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("connection_limiter", &"KeyedLimiter<IpAddr>")
            .field("message_limiter", &"KeyedLimiter<PeerId>")
            .finish()
    }
}

fn per_minute(count: u32) -> Quota {
    // Zero would reject everything; treat it as the smallest quota instead.
    Quota::per_minute(NonZeroU32::new(count).unwrap_or(NonZeroU32::MIN))
}

fn keyed<K: Clone + Eq + Hash>(quota: Quota) -> Arc<KeyedLimiter<K>> {
    Arc::new(RateLimiter::keyed(quota))
}

impl RateLimits {
    /// Build both limiters from `[limits]`.
    pub fn new(config: &LimitsConfig) -> Self {
        Self {
            connection_limiter: keyed(per_minute(config.connections_per_ip)),
            message_limiter: keyed(per_minute(config.messages_per_minute)),
        }
    }

    /// Check if a connection attempt from `ip` is allowed.
    pub fn check_connection(&self, ip: &IpAddr) -> Result<(), RateLimitError> {
        self.connection_limiter
            .check_key(ip)
            .map_err(|_| RateLimitError::ConnectionLimitExceeded)
    }

    /// Check if a message from `peer_id` is allowed.
    pub fn check_message(&self, peer_id: &PeerId) -> Result<(), RateLimitError> {
        self.message_limiter
            .check_key(peer_id)
            .map_err(|_| RateLimitError::MessageLimitExceeded)
    }

    /// Source addresses currently tracked.
    pub fn tracked_addresses(&self) -> usize {
        self.connection_limiter.len()
    }

    /// Peers currently tracked.
    pub fn tracked_peers(&self) -> usize {
        self.message_limiter.len()
    }

    /// Forget keys whose quota has fully recharged.
    pub fn shrink(&self) {
        self.connection_limiter.retain_recent();
        self.message_limiter.retain_recent();
    }
}

/// Quota exhausted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Too many connection attempts from this address.
    #[error("connection rate limit exceeded")]
    ConnectionLimitExceeded,
    /// Too many messages from this peer.
    #[error("message rate limit exceeded")]
    MessageLimitExceeded,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(connections_per_ip: u32, messages_per_minute: u32) -> LimitsConfig {
        LimitsConfig {
            connections_per_ip,
            messages_per_minute,
            ..LimitsConfig::default()
        }
    }

    #[test]
    fn starts_with_no_tracked_keys() {
        let limits = RateLimits::new(&LimitsConfig::default());
        assert_eq!(limits.tracked_addresses(), 0);
        assert_eq!(limits.tracked_peers(), 0);
    }

    #[test]
    fn connection_limit_allows_within_quota() {
        let limits = RateLimits::new(&config(5, 100));
        let ip: IpAddr = "203.0.113.7".parse().unwrap();

        for _ in 0..5 {
            assert!(limits.check_connection(&ip).is_ok());
        }

        assert_eq!(
            limits.check_connection(&ip),
            Err(RateLimitError::ConnectionLimitExceeded)
        );
    }

    #[test]
    fn message_limits_are_per_peer() {
        let limits = RateLimits::new(&config(100, 2));
        let a = PeerId::new("a");
        let b = PeerId::new("b");

        assert!(limits.check_message(&a).is_ok());
        assert!(limits.check_message(&a).is_ok());
        assert_eq!(
            limits.check_message(&a),
            Err(RateLimitError::MessageLimitExceeded)
        );

        assert!(limits.check_message(&b).is_ok());
        assert!(limits.check_message(&b).is_ok());
        assert!(limits.check_message(&b).is_err());
    }

    #[test]
    fn zero_quota_still_admits_one() {
        let limits = RateLimits::new(&config(0, 0));
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(limits.check_connection(&ip).is_ok());
        assert!(limits.check_connection(&ip).is_err());
    }

    #[test]
    fn clones_share_quota() {
        let limits = RateLimits::new(&config(1, 100));
        let clone = limits.clone();
        let ip: IpAddr = "198.51.100.4".parse().unwrap();
        assert!(limits.check_connection(&ip).is_ok());
        assert_eq!(
            clone.check_connection(&ip),
            Err(RateLimitError::ConnectionLimitExceeded)
        );
    }

    #[test]
    fn shrink_never_grows_the_maps() {
        let limits = RateLimits::new(&LimitsConfig::default());
        let _ = limits.check_connection(&"10.0.0.1".parse().unwrap());
        let _ = limits.check_message(&PeerId::new("a"));
        assert_eq!(limits.tracked_addresses(), 1);
        assert_eq!(limits.tracked_peers(), 1);

        limits.shrink();
        assert!(limits.tracked_addresses() <= 1);
    }
}
