use std::collections::BTreeMap;
use std::ops::Range;

use async_trait::async_trait;
use encoding_rs::{Encoding, UTF_8};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;

use crate::app::{FreshetError, Result};
use crate::fetcher::{FetchRequest, FetchResponse, Fetcher};

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// `pool_size` caps the idle connections kept per host; it should match
    /// the sweep concurrency.
    pub fn new(user_agent: &str, pool_size: usize) -> Result<Self> {
        let client = Client::builder()
            .gzip(true)
            .brotli(true)
            .user_agent(user_agent)
            .pool_max_idle_per_host(pool_size)
            .build()?;

        Ok(Self { client })
    }
}

/// `charset` parameter of a Content-Type value.
fn charset(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
    })
}

/// Byte range of the `encoding` value in a leading XML declaration.
fn declared_encoding(head: &[u8]) -> Option<Range<usize>> {
    if !head.starts_with(b"<?xml") {
        return None;
    }
    let end = head.windows(2).position(|w| w == b"?>")?;
    let decl = &head[..end];

    let attr = decl.windows(8).position(|w| w == b"encoding")?;
    let mut pos = attr + 8;
    while decl.get(pos).is_some_and(|b| b.is_ascii_whitespace() || *b == b'=') {
        pos += 1;
    }
    let quote = *decl.get(pos).filter(|b| **b == b'"' || **b == b'\'')?;
    let start = pos + 1;
    let len = decl[start..].iter().position(|b| *b == quote)?;
    Some(start..start + len)
}

/// Decode a body to UTF-8. A byte order mark wins, then the Content-Type
/// charset, then the XML declaration. The declaration of the result says
/// UTF-8, so parsers do not decode it a second time.
fn decode_body(bytes: &[u8], content_type: Option<&str>) -> String {
    let label = content_type
        .and_then(charset)
        .map(str::as_bytes)
        .or_else(|| declared_encoding(bytes).map(|range| &bytes[range]));
    let encoding = label.and_then(Encoding::for_label).unwrap_or(UTF_8);

    let (text, used, malformed) = encoding.decode(bytes);
    if malformed {
        tracing::debug!("Body is not valid {}, replaced bad sequences", used.name());
    }

    let mut text = text.into_owned();
    if let Some(range) = declared_encoding(text.as_bytes()) {
        if Encoding::for_label(text[range.clone()].as_bytes()) != Some(UTF_8) {
            text.replace_range(range, "UTF-8");
        }
    }
    text
}

fn classify(e: reqwest::Error) -> FreshetError {
    if e.is_timeout() {
        FreshetError::Timeout(e.to_string())
    } else {
        FreshetError::Transport(e.to_string())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        let mut headers = HeaderMap::new();

        for (name, value) in &request.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => tracing::warn!("Dropping invalid request header {}: {}", name, value),
            }
        }

        let response = self
            .client
            .get(&request.url)
            .timeout(request.timeout)
            .headers(headers)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status().as_u16();

        let mut response_headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in response.headers() {
            let Ok(value) = value.to_str() else {
                continue;
            };
            response_headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }

        let bytes = response.bytes().await.map_err(classify)?;
        let body = decode_body(
            &bytes,
            response_headers.get("content-type").map(String::as_str),
        );

        tracing::trace!("GET {} -> {} ({} bytes)", request.url, status, body.len());

        Ok(FetchResponse {
            status,
            headers: response_headers,
            body,
        })
    }
}
