//! Background sweep of stale sessions.
//!
//! Runs periodically to drop sessions older than `sessions.max_age_secs`
//! and to shrink the rate limiter maps.

use crate::server::ShareRelay;
use std::sync::Arc;
use tokio::time::interval;

/// Spawn a background cleanup task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_task(relay: Arc<ShareRelay>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let period = relay.config().sessions.sweep_interval();
        tracing::info!("Cleanup task started (interval: {}s)", period.as_secs());

        let mut timer = interval(period);
        // The first tick completes immediately.
        timer.tick().await;

        loop {
            timer.tick().await;

            let removed = relay.sweep_expired();
            if removed > 0 {
                tracing::info!("Cleanup: removed {} expired sessions", removed);
            } else {
                tracing::debug!("Cleanup: no expired sessions");
            }
            relay.rate_limits().shrink();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use share_types::{ClientMessage, CreateSession, FileMeta};
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn cleanup_task_removes_expired_sessions() {
        let mut config = Config::default();
        config.sessions.sweep_interval_secs = 10;
        config.sessions.max_age_secs = 15;
        let relay = Arc::new(ShareRelay::new(config));

        let (tx, _rx) = mpsc::unbounded_channel();
        let sender = relay.connect_peer("10.0.0.1".parse().unwrap(), tx);
        relay.handle_message(
            &sender,
            ClientMessage::CreateSession(CreateSession {
                files: vec![FileMeta::new("a.bin", 1, "application/octet-stream")],
            }),
        );
        assert_eq!(relay.session_count(), 1);

        let handle = spawn_cleanup_task(relay.clone());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(relay.session_count(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(relay.session_count(), 0);

        handle.abort();
    }
}
