use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::app::Result;
use crate::config::{DEFAULT_MAX_AGE, DEFAULT_TIMEOUT};
use crate::domain::{duration_millis, FeedMeta};

/// Outcome of the most recent poll attempt.
///
/// Timeouts and transport failures are internal tags, not HTTP codes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "code", rename_all = "snake_case")]
pub enum PollStatus {
    #[default]
    Never,
    Http(u16),
    Timeout,
    TransportError,
}

impl PollStatus {
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Http(code) => Some(*code),
            _ => None,
        }
    }

    /// Suffix used in `poll:status_<label>` event names.
    pub fn label(&self) -> String {
        match self {
            Self::Never => "never".to_string(),
            Self::Http(code) => code.to_string(),
            Self::Timeout => "timeout".to_string(),
            Self::TransportError => "error".to_string(),
        }
    }
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_max_age() -> Duration {
    DEFAULT_MAX_AGE
}

fn never() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// A polled feed endpoint and its last-known fetch state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default)]
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(with = "duration_millis", default = "default_timeout")]
    pub timeout: Duration,
    #[serde(with = "duration_millis", default = "default_max_age")]
    pub max_age: Duration,
    #[serde(with = "chrono::serde::ts_milliseconds", default = "never")]
    pub last_validated: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub status: PollStatus,
    /// Lower-cased response headers of the last HTTP response
    #[serde(default)]
    pub response_headers: BTreeMap<String, String>,
    /// Body of the last 200 response
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub meta: Option<FeedMeta>,
    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    pub modified: Option<DateTime<Utc>>,
}

impl Resource {
    /// A never-polled resource for `url`. Fails on malformed URLs.
    pub fn new(url: &str) -> Result<Self> {
        let url = url::Url::parse(url.trim())?.to_string();

        Ok(Self {
            id: Self::generate_id(&url),
            url,
            title: None,
            disabled: false,
            timeout: DEFAULT_TIMEOUT,
            max_age: DEFAULT_MAX_AGE,
            last_validated: never(),
            last_error: None,
            status: PollStatus::Never,
            response_headers: BTreeMap::new(),
            body: String::new(),
            meta: None,
            created: None,
            modified: None,
        })
    }

    /// The resource id: a SHA-256 of its URL.
    pub fn generate_id(url: &str) -> String {
        hex::encode(Sha256::digest(url.as_bytes()))
    }

    pub fn etag(&self) -> Option<&str> {
        self.response_headers.get("etag").map(String::as_str)
    }

    pub fn last_modified(&self) -> Option<&str> {
        self.response_headers.get("last-modified").map(String::as_str)
    }

    pub fn has_been_polled(&self) -> bool {
        self.last_validated > never()
    }

    /// Whether a poll at `now` would be served from the stored state.
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        match (now - self.last_validated).to_std() {
            Ok(age) => age < max_age,
            // last_validated lies in the future, so the age counts as zero
            Err(_) => !max_age.is_zero(),
        }
    }

    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .or_else(|| self.meta.as_ref().and_then(|m| m.title.as_deref()))
            .unwrap_or(&self.url)
    }
}
