//! Client tuning.

use std::time::Duration;

/// Bytes per data frame.
pub const DEFAULT_FRAME_SIZE: usize = 64 * 1024;

/// Frames allowed in the send buffer before the sender waits.
pub const DEFAULT_HIGH_WATER_FRAMES: usize = 10;

/// How often a blocked sender re-checks the send buffer.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Deadline for the data channel to open.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Send-side backpressure parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControl {
    /// Bytes per frame.
    pub frame_size: usize,
    /// High-water mark in frames.
    pub high_water_frames: usize,
    /// Poll interval while blocked.
    pub poll_interval: Duration,
}

impl FlowControl {
    /// High-water mark in bytes.
    pub fn high_water(&self) -> usize {
        self.frame_size.saturating_mul(self.high_water_frames)
    }
}

impl Default for FlowControl {
    fn default() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
            high_water_frames: DEFAULT_HIGH_WATER_FRAMES,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Configuration for [`TransferController`](crate::TransferController).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the relay's HTTP endpoints.
    pub relay_url: String,
    /// Send-side backpressure.
    pub flow: FlowControl,
    /// Deadline for the data channel to open.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// Configuration for the relay at `relay_url`.
    pub fn new(relay_url: &str) -> Self {
        Self {
            relay_url: relay_url.trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    /// Set the frame size.
    pub fn with_frame_size(mut self, bytes: usize) -> Self {
        self.flow.frame_size = bytes.max(1);
        self
    }

    /// Set the high-water mark in frames.
    pub fn with_high_water_frames(mut self, frames: usize) -> Self {
        self.flow.high_water_frames = frames;
        self
    }

    /// Set the buffer poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.flow.poll_interval = interval;
        self
    }

    /// Set the connect deadline.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: "http://localhost:3000".to_string(),
            flow: FlowControl::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.flow.frame_size, 65_536);
        assert_eq!(config.flow.high_water(), 655_360);
        assert_eq!(config.flow.poll_interval, Duration::from_millis(10));
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn builders() {
        let config = ClientConfig::new("https://relay.example/")
            .with_frame_size(0)
            .with_high_water_frames(4)
            .with_connect_timeout(Duration::from_secs(5));
        assert_eq!(config.relay_url, "https://relay.example");
        assert_eq!(config.flow.frame_size, 1);
        assert_eq!(config.flow.high_water(), 4);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }
}
