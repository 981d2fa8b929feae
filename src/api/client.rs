use anyhow::{Context, Result};
use bytes::Bytes;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;

use super::models::{Post, ThreadSnapshot};
use crate::constants::ARCHIVER_USER_AGENT;

/// A failed request for a single resource.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("server replied with status code {status} for {url}")]
    Status { url: String, status: StatusCode },
}

/// HTTP access to the thread API and the media host.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    api_base_url: String,
    media_base_url: String,
}

impl ApiClient {
    /// Create a client for the given hosts.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_base_url: &str, media_base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(ARCHIVER_USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            media_base_url: media_base_url.trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn thread_url(&self, board: &str, thread_no: u64) -> String {
        format!("{}/{board}/thread/{thread_no}.json", self.api_base_url)
    }

    #[must_use]
    pub fn media_url(&self, board: &str, file_name: &str) -> String {
        format!("{}/{board}/{file_name}", self.media_base_url)
    }

    /// Fetch and decode the current snapshot of a thread.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, a non-success status, or an
    /// undecodable body. All of these end the run.
    pub async fn fetch_thread(&self, board: &str, thread_no: u64) -> Result<ThreadSnapshot> {
        let url = self.thread_url(board, thread_no);
        let body = self.get_bytes(&url).await?;
        ThreadSnapshot::from_json(&body).with_context(|| format!("Invalid thread JSON at {url}"))
    }

    /// Fetch the raw bytes of a post's attachment.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] on transport failure or a non-success status.
    pub async fn fetch_attachment(&self, board: &str, post: &Post) -> Result<Bytes, FetchError> {
        self.get_bytes(&self.media_url(board, &post.media_file_name()))
            .await
    }

    /// Fetch the server-generated thumbnail of a post's attachment.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] on transport failure or a non-success status.
    pub async fn fetch_thumbnail(&self, board: &str, post: &Post) -> Result<Bytes, FetchError> {
        self.get_bytes(&self.media_url(board, &post.thumbnail_file_name()))
            .await
    }

    async fn get_bytes(&self, url: &str) -> Result<Bytes, FetchError> {
        debug!(url = %url, "GET");
        let transport = |source| FetchError::Transport {
            url: url.to_string(),
            source,
        };

        let response = self.http.get(url).send().await.map_err(transport)?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        response.bytes().await.map_err(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let client = ApiClient::new("https://a.example.org/", "https://i.example.org").unwrap();
        assert_eq!(
            client.thread_url("g", 123),
            "https://a.example.org/g/thread/123.json"
        );
        assert_eq!(
            client.media_url("g", "555.png"),
            "https://i.example.org/g/555.png"
        );
    }
}
