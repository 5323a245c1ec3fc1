use crate::config::DownloadConfig;
use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

/// Errors raised while downloading an attachment
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to write staging file: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a download that reached the remote server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Body was written to the destination path
    Stored { bytes: u64 },
    /// Server answered with a non-success status; nothing was written
    Rejected { status: u16 },
}

/// Downloads attachment bytes into a local file
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AttachmentFetcher: Send + Sync {
    /// GET `url` and stream the body into `dest`.
    ///
    /// `dest` must not be created unless the server reports success.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<FetchOutcome, FetchError>;
}

/// `reqwest`-backed fetcher
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &DownloadConfig) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl AttachmentFetcher for HttpFetcher {
    #[instrument(skip(self), fields(dest = %dest.display()))]
    async fn fetch(&self, url: &str, dest: &Path) -> Result<FetchOutcome, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            debug!(status = status.as_u16(), "Attachment download rejected");
            return Ok(FetchOutcome::Rejected {
                status: status.as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut body = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(bytes = written, "Attachment downloaded");

        Ok(FetchOutcome::Stored { bytes: written })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_fetch_streams_body_to_file() {
        let base = serve(Router::new().route("/files/report.pdf", get(|| async { "%PDF-1.7 body" }))).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("report.pdf");

        let fetcher = HttpFetcher::new(&DownloadConfig::default()).unwrap();
        let outcome = fetcher
            .fetch(&format!("{base}/files/report.pdf"), &dest)
            .await
            .unwrap();

        assert_eq!(outcome, FetchOutcome::Stored { bytes: 13 });
        assert_eq!(std::fs::read(&dest).unwrap(), b"%PDF-1.7 body");
    }

    #[tokio::test]
    async fn test_non_success_status_creates_no_file() {
        let base = serve(Router::new().route(
            "/files/report.pdf",
            get(|| async { (StatusCode::FORBIDDEN, "expired link") }),
        ))
        .await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("report.pdf");

        let fetcher = HttpFetcher::new(&DownloadConfig::default()).unwrap();
        let outcome = fetcher
            .fetch(&format!("{base}/files/report.pdf"), &dest)
            .await
            .unwrap();

        assert_eq!(outcome, FetchOutcome::Rejected { status: 403 });
        assert!(!dest.exists());
    }
}
