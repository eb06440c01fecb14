use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EtlError;

/// Where JSON-stat documents come from.
pub trait SourceClient: Send + Sync {
    /// Returns the raw body of a 2xx response; any other status is an error.
    fn fetch_document(&self, url: &str) -> Result<Vec<u8>, EtlError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            max_retries: 2,
            retry_delay_ms: 200,
        }
    }
}

#[derive(Clone)]
pub struct HttpSourceClient {
    client: Client,
    settings: HttpSettings,
}

impl HttpSourceClient {
    pub fn new(settings: HttpSettings) -> Result<Self, EtlError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("crime-etl/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EtlError::SourceHttp(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|err| EtlError::SourceHttp(err.to_string()))?;
        Ok(Self { client, settings })
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, EtlError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .ok()
            .map(|body| body.chars().take(200).collect::<String>())
            .filter(|body| !body.trim().is_empty())
            .unwrap_or_else(|| "source request failed".to_string());
        Err(EtlError::SourceStatus { status, message })
    }

    fn send_with_retries(&self, url: &str) -> Result<reqwest::blocking::Response, EtlError> {
        let mut attempt = 0usize;
        loop {
            match self.client.get(url).send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < self.settings.max_retries && is_retryable_status(status) {
                        debug!(url, status, attempt, "retrying source request");
                        self.backoff(attempt);
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < self.settings.max_retries && is_retryable_error(&err) {
                        debug!(url, attempt, error = %err, "retrying source request");
                        self.backoff(attempt);
                        attempt += 1;
                        continue;
                    }
                    return Err(EtlError::SourceHttp(err.to_string()));
                }
            }
        }
    }

    fn backoff(&self, attempt: usize) {
        let delay = self.settings.retry_delay_ms * (attempt as u64 + 1);
        thread::sleep(Duration::from_millis(delay));
    }
}

impl SourceClient for HttpSourceClient {
    fn fetch_document(&self, url: &str) -> Result<Vec<u8>, EtlError> {
        let response = self.send_with_retries(url)?;
        let response = Self::handle_status(response)?;
        let body = response
            .bytes()
            .map_err(|err| EtlError::SourceHttp(err.to_string()))?;
        Ok(body.to_vec())
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(429));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(200));
    }

    #[test]
    fn settings_defaults_fill_partial_json() {
        let settings: HttpSettings = serde_json::from_str(r#"{"max_retries": 0}"#).unwrap();
        assert_eq!(settings.max_retries, 0);
        assert_eq!(settings.timeout_secs, 60);
    }
}
