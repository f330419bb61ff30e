//! Authorized HTTP access to the archive

use std::io::Read;
use std::time::Duration;

use geoslice_core::CancelToken;
use geoslice_core::stream::{
    BodyReader, ByteCounter, HttpConfig, StreamError, build_client, open_body_reader, send,
};

use crate::auth::AccessToken;

/// Longest response body excerpt carried in error messages
const MAX_ERROR_BODY: usize = 512;

/// Archive endpoint plus the bearer token of this run.
///
/// Requests are sent on the shared runtime and awaited synchronously, so the
/// client can be used directly from rayon workers. Every request is bounded
/// by `request_timeout` and abandoned when the run is cancelled.
#[derive(Debug)]
pub struct ArchiveClient {
    http: reqwest::Client,
    base_url: String,
    token: AccessToken,
    request_timeout: Duration,
    read_timeout: Duration,
    cancel: CancelToken,
}

impl ArchiveClient {
    pub fn new(
        base_url: &str,
        token: AccessToken,
        config: &HttpConfig,
    ) -> Result<Self, StreamError> {
        Ok(Self {
            http: build_client(config)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            request_timeout: config.request_timeout,
            read_timeout: config.read_timeout,
            cancel: CancelToken::new(),
        })
    }

    /// Abandon in-flight requests and body reads once `cancel` fires
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn search_url(&self) -> String {
        format!("{}/stac/search", self.base_url)
    }

    /// POST a JSON document; any status is returned as a response
    pub fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, StreamError> {
        let payload = serde_json::to_vec(body).map_err(|e| StreamError::Http {
            status: None,
            message: format!("cannot encode request: {e}"),
        })?;
        let request = self
            .http
            .post(url)
            .bearer_auth(self.token.secret())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::ACCEPT, "application/json")
            .body(payload);
        send(request, self.request_timeout, &self.cancel)
    }

    /// GET a URL; any status is returned as a response
    pub fn get(&self, url: &str) -> Result<reqwest::Response, StreamError> {
        self.get_within(url, self.request_timeout)
    }

    /// GET with a tighter bound than `request_timeout`
    pub fn get_within(&self, url: &str, limit: Duration) -> Result<reqwest::Response, StreamError> {
        let request = self.http.get(url).bearer_auth(self.token.secret());
        send(request, limit.min(self.request_timeout), &self.cancel)
    }

    /// Streaming reader over a response body, stall- and cancel-aware
    pub fn body_reader(
        &self,
        response: reqwest::Response,
    ) -> (BodyReader, ByteCounter, Option<u64>) {
        open_body_reader(response, self.read_timeout, &self.cancel)
    }

    /// Read a (small) response body completely, with the same stall timeout
    /// as streamed downloads
    pub fn read_body(&self, response: reqwest::Response) -> Result<Vec<u8>, StreamError> {
        let (mut reader, _, _) = self.body_reader(response);
        let mut body = Vec::new();
        reader.read_to_end(&mut body)?;
        Ok(body)
    }
}

/// Body excerpt for error messages
pub fn error_excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return "empty response".to_string();
    }
    match text.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_url_trims_slash() {
        let client = ArchiveClient::new(
            "https://archive.example/",
            AccessToken::new("t").unwrap(),
            &HttpConfig::default(),
        )
        .unwrap();
        assert_eq!(client.search_url(), "https://archive.example/stac/search");
        assert_eq!(client.base_url(), "https://archive.example");
    }

    #[test]
    fn excerpt_truncates() {
        let long = "x".repeat(2000);
        let excerpt = error_excerpt(long.as_bytes());
        assert_eq!(excerpt.len(), MAX_ERROR_BODY + 3);
        assert_eq!(error_excerpt(b"  "), "empty response");
        assert_eq!(error_excerpt(b"Forbidden\n"), "Forbidden");
    }

    #[test]
    fn client_debug_hides_token() {
        let client = ArchiveClient::new(
            "https://archive.example",
            AccessToken::new("very-secret").unwrap(),
            &HttpConfig::default(),
        )
        .unwrap();
        assert!(!format!("{client:?}").contains("very-secret"));
    }
}
