pub mod http_fetcher;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::app::Result;

pub use http_fetcher::HttpFetcher;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub timeout: Duration,
    /// Extra request headers, e.g. `If-None-Match`
    pub headers: BTreeMap<String, String>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            headers: BTreeMap::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }
}

/// Any HTTP response, whatever its status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    /// Lower-cased header names; repeated headers are joined with ", "
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// HTTP GET capability.
///
/// Non-2xx statuses are responses, not errors. Only failures to get a
/// response at all are errors: [`FreshetError::Timeout`] when the request
/// ran out of time, [`FreshetError::Transport`] for everything else.
///
/// [`FreshetError::Timeout`]: crate::app::FreshetError::Timeout
/// [`FreshetError::Transport`]: crate::app::FreshetError::Transport
#[async_trait]
pub trait Fetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse>;
}
