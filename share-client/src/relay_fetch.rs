//! Opening the relay download stream.
//!
//! [`HttpRelayFetcher`] reads `GET /api/transfer/:id/download` with reqwest;
//! [`MockRelayFetcher`] replays canned stream text for tests.

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use peershare_types::SessionId;
use std::sync::{Arc, Mutex};

use crate::transport::TransportError;

/// Raw event-stream text, in arbitrary slices.
pub type EventStream = BoxStream<'static, Result<String, TransportError>>;

/// Opens the relay's download stream for a session.
#[async_trait]
pub trait RelayFetcher: Send + Sync {
    /// Attach to the download stream of `session_id`.
    async fn open_download(&self, session_id: &SessionId) -> Result<EventStream, TransportError>;
}

/// Fetcher speaking HTTP to the relay.
#[derive(Debug, Clone)]
pub struct HttpRelayFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRelayFetcher {
    /// Fetcher for the relay at `base_url`.
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// URL of the download stream for `session_id`.
    pub fn download_url(&self, session_id: &SessionId) -> String {
        format!("{}/api/transfer/{}/download", self.base_url, session_id)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            TransportError::ConnectionFailed(e.to_string())
        } else {
            TransportError::ReceiveFailed(e.to_string())
        }
    }
}

#[async_trait]
impl RelayFetcher for HttpRelayFetcher {
    async fn open_download(&self, session_id: &SessionId) -> Result<EventStream, TransportError> {
        let response = self
            .client
            .get(self.download_url(session_id))
            .header("accept", "text/event-stream")
            .send()
            .await?
            .error_for_status()?;

        // The download stream carries only ASCII (base64 and event names).
        let body = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .map_err(TransportError::from)
        });
        Ok(body.boxed())
    }
}

/// Fetcher replaying scripted stream slices.
#[derive(Debug, Clone, Default)]
pub struct MockRelayFetcher {
    inner: Arc<Mutex<MockFetcherInner>>,
}

#[derive(Debug, Default)]
struct MockFetcherInner {
    slices: Vec<String>,
    opened: Vec<SessionId>,
    fail_next_open: Option<String>,
}

impl MockRelayFetcher {
    /// Fetcher returning `slices` and then ending the stream.
    pub fn new(slices: Vec<String>) -> Self {
        let fetcher = Self::default();
        fetcher.inner.lock().unwrap().slices = slices;
        fetcher
    }

    /// Sessions opened so far.
    pub fn opened(&self) -> Vec<SessionId> {
        self.inner.lock().unwrap().opened.clone()
    }

    /// Cause the next open to fail.
    pub fn fail_next_open(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_open = Some(error.to_string());
    }
}

#[async_trait]
impl RelayFetcher for MockRelayFetcher {
    async fn open_download(&self, session_id: &SessionId) -> Result<EventStream, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_next_open.take() {
            return Err(TransportError::ConnectionFailed(error));
        }
        inner.opened.push(session_id.clone());
        let slices: Vec<Result<String, TransportError>> =
            inner.slices.iter().cloned().map(Ok).collect();
        Ok(stream::iter(slices).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_url_shape() {
        let fetcher = HttpRelayFetcher::new("http://relay.local:3000/");
        assert_eq!(
            fetcher.download_url(&SessionId::new("abc")),
            "http://relay.local:3000/api/transfer/abc/download"
        );
    }

    #[tokio::test]
    async fn mock_replays_slices() {
        let fetcher = MockRelayFetcher::new(vec!["a".into(), "b".into()]);
        let stream = fetcher.open_download(&SessionId::new("s")).await.unwrap();
        let parts: Vec<_> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(parts, vec!["a", "b"]);
        assert_eq!(fetcher.opened(), vec![SessionId::new("s")]);

        fetcher.fail_next_open("refused");
        assert!(fetcher.open_download(&SessionId::new("s")).await.is_err());
    }
}
