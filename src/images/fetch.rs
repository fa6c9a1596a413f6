use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::ACCEPT;

use crate::config::Settings;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP {0}")]
    Status(u16),
    #[error("Response too large")]
    TooLarge,
    #[error("Request timeout")]
    Timeout,
    #[error("{0}")]
    Request(reqwest::Error),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Request(e)
        }
    }
}

/// Source of homepage HTML for the image resolver.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError>;
}

/// Plain GET with a whole-request timeout and a body size cap.
pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpFetcher {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .user_agent(settings.user_agent.as_str())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_client(client, settings.max_body_bytes))
    }

    pub fn with_client(client: reqwest::Client, max_bytes: usize) -> Self {
        HttpFetcher { client, max_bytes }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        let mut resp = self
            .client
            .get(url)
            .header(ACCEPT, "text/html,application/xhtml+xml")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        if resp.content_length().is_some_and(|n| n > self.max_bytes as u64) {
            return Err(FetchError::TooLarge);
        }

        // Returning early drops `resp`, which aborts the transfer.
        let mut body = Vec::new();
        while let Some(chunk) = resp.chunk().await? {
            body.extend_from_slice(&chunk);
            if body.len() > self.max_bytes {
                return Err(FetchError::TooLarge);
            }
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

#[cfg(test)]
pub mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    pub enum Reply {
        Html(String),
        Status(u16),
        TooLarge,
    }

    /// Canned replies keyed by URL; unknown URLs time out.
    #[derive(Default)]
    pub struct StubFetcher {
        replies: HashMap<String, Reply>,
        pub requests: Mutex<Vec<String>>,
    }

    impl StubFetcher {
        pub fn page(mut self, url: &str, html: &str) -> Self {
            self.replies.insert(url.to_string(), Reply::Html(html.to_string()));
            self
        }

        pub fn status(mut self, url: &str, code: u16) -> Self {
            self.replies.insert(url.to_string(), Reply::Status(code));
            self
        }

        pub fn too_large(mut self, url: &str) -> Self {
            self.replies.insert(url.to_string(), Reply::TooLarge);
            self
        }
    }

    #[async_trait]
    impl PageFetcher for StubFetcher {
        async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
            self.requests.lock().unwrap().push(url.to_string());
            match self.replies.get(url) {
                Some(Reply::Html(html)) => Ok(html.clone()),
                Some(Reply::Status(code)) => Err(FetchError::Status(*code)),
                Some(Reply::TooLarge) => Err(FetchError::TooLarge),
                None => Err(FetchError::Timeout),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a loopback port.
    async fn serve_once(response: Vec<u8>, hold: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = sock.read(&mut buf).await;
                tokio::time::sleep(hold).await;
                let _ = sock.write_all(&response).await;
                let _ = sock.shutdown().await;
            }
        });
        format!("http://{}", addr)
    }

    fn fetcher(max_bytes: usize, timeout: Duration) -> HttpFetcher {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .unwrap();
        HttpFetcher::with_client(client, max_bytes)
    }

    fn response(status: &str, body: &str, with_length: bool) -> Vec<u8> {
        let length = if with_length {
            format!("Content-Length: {}\r\n", body.len())
        } else {
            String::new()
        };
        format!(
            "HTTP/1.1 {}\r\nContent-Type: text/html\r\n{}Connection: close\r\n\r\n{}",
            status, length, body
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn returns_body_on_2xx() {
        let html = r#"<meta property="og:image" content="/logo.png">"#;
        let url = serve_once(response("200 OK", html, true), Duration::ZERO).await;
        let body = fetcher(1024, Duration::from_secs(5)).fetch_html(&url).await.unwrap();
        assert_eq!(body, html);
    }

    #[tokio::test]
    async fn non_2xx_is_a_failure() {
        let url = serve_once(response("404 Not Found", "gone", true), Duration::ZERO).await;
        let err = fetcher(1024, Duration::from_secs(5)).fetch_html(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Status(404)));
        assert_eq!(err.to_string(), "HTTP 404");
    }

    #[tokio::test]
    async fn declared_length_over_cap_is_rejected() {
        let body = "x".repeat(4096);
        let url = serve_once(response("200 OK", &body, true), Duration::ZERO).await;
        let err = fetcher(1024, Duration::from_secs(5)).fetch_html(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::TooLarge));
    }

    #[tokio::test]
    async fn streamed_body_over_cap_is_aborted() {
        let body = "x".repeat(4096);
        let url = serve_once(response("200 OK", &body, false), Duration::ZERO).await;
        let err = fetcher(1024, Duration::from_secs(5)).fetch_html(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::TooLarge));
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let url = serve_once(response("200 OK", "late", true), Duration::from_secs(3)).await;
        let err = fetcher(1024, Duration::from_millis(200)).fetch_html(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout));
        assert_eq!(err.to_string(), "Request timeout");
    }
}
