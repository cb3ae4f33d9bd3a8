//! Manifest and artifact download.

use std::time::Duration;

use log::debug;

use crate::error::UpdateError;

/// Fetches a URL into memory.  Swapped for an in-memory map in tests.
pub trait Fetcher {
    fn get(&self, url: &str) -> Result<Vec<u8>, UpdateError>;
}

/// Blocking HTTPS client (rustls).
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, UpdateError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("aquamon/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UpdateError::Fetch(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn get(&self, url: &str) -> Result<Vec<u8>, UpdateError> {
        debug!("Update: GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|e| UpdateError::Fetch(e.to_string()))?;
        let body = response
            .bytes()
            .map_err(|e| UpdateError::Fetch(e.to_string()))?;
        Ok(body.to_vec())
    }
}

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hmac_sha256::Hash::hash(data)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
