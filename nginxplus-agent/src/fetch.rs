//! Retrieval of the NGINX Plus status document

use crate::error::FetchError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Anything that can hand over a raw status payload
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<u8>, FetchError>;
}

/// HTTP GET against the status URL, bounded by a deadline
pub struct HttpStatusSource {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpStatusSource {
    pub fn new(url: &str, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("nginxplus-agent/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self { client, url: url.to_string(), timeout })
    }

    async fn get(&self) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { status: status.as_u16() });
        }

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                self.timeout_error()
            } else {
                FetchError::Body(e)
            }
        })?;

        debug!(url = %self.url, bytes = body.len(), "Fetched status document");
        Ok(body.to_vec())
    }

    fn request_error(&self, source: reqwest::Error) -> FetchError {
        if source.is_timeout() {
            self.timeout_error()
        } else {
            FetchError::Request { url: self.url.clone(), source }
        }
    }

    fn timeout_error(&self) -> FetchError {
        FetchError::Timeout { timeout_ms: self.timeout.as_millis() as u64 }
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn fetch(&self) -> Result<Vec<u8>, FetchError> {
        // reqwest's own timeout covers the body too; this is the outer
        // deadline in case DNS or connection setup stalls outside it
        match tokio::time::timeout(self.timeout, self.get()).await {
            Ok(result) => result,
            Err(_) => Err(self.timeout_error()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nginxplus_devkit::StatusServerStub;

    #[tokio::test]
    async fn test_fetch_returns_body() {
        let server = StatusServerStub::start(r#"{"requests":{"total":1}}"#).await.unwrap();
        let source = HttpStatusSource::new(&server.url(), Duration::from_secs(2)).unwrap();

        let body = source.fetch().await.unwrap();
        assert_eq!(body, br#"{"requests":{"total":1}}"#);
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn test_non_success_status_is_fetch_error() {
        let server = StatusServerStub::start("oops").await.unwrap();
        server.set_status(503);
        let source = HttpStatusSource::new(&server.url(), Duration::from_secs(2)).unwrap();

        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 503 }));
    }

    #[tokio::test]
    async fn test_slow_source_times_out() {
        let server = StatusServerStub::start("{}").await.unwrap();
        server.set_delay(Duration::from_millis(1500));
        let source = HttpStatusSource::new(&server.url(), Duration::from_millis(200)).unwrap();

        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_source_is_request_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = format!("http://127.0.0.1:{port}/status");
        let source = HttpStatusSource::new(&url, Duration::from_secs(2)).unwrap();
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Request { .. }));
    }
}
