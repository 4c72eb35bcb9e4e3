//! One conditional fetch of one resource.
//!
//! [`Poller::poll`] decides between skipping (disabled or still fresh) and
//! revalidating with `If-None-Match` / `If-Modified-Since`, folds the
//! response into the resource and persists it. Every call emits
//! `poll:start` first and `poll:end` exactly once last.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;

use crate::app::{FreshetError, Result};
use crate::domain::{PollStatus, Resource};
use crate::events::{EventSink, PollEvent};
use crate::fetcher::{FetchRequest, Fetcher};
use crate::store::{Record, Store, RESOURCES};

#[derive(Debug, Clone, Default)]
pub struct PollOptions {
    /// Overrides the resource's own `max_age`
    pub max_age: Option<Duration>,
    /// Shared fetch pool; a permit is held while the request is in flight
    pub pool: Option<Arc<Semaphore>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Disabled,
    Fresh,
    Fetched(PollStatus),
}

pub struct Poller {
    store: Arc<dyn Store>,
    fetcher: Arc<dyn Fetcher + Send + Sync>,
}

/// Emits `poll:end` when dropped.
struct EndGuard<'a> {
    events: &'a EventSink,
    resource_id: String,
}

impl Drop for EndGuard<'_> {
    fn drop(&mut self) {
        self.events.emit(PollEvent::End {
            resource_id: std::mem::take(&mut self.resource_id),
        });
    }
}

impl Poller {
    pub fn new(store: Arc<dyn Store>, fetcher: Arc<dyn Fetcher + Send + Sync>) -> Self {
        Self { store, fetcher }
    }

    pub async fn poll(
        &self,
        resource: &mut Resource,
        options: &PollOptions,
        events: &EventSink,
    ) -> Result<PollOutcome> {
        events.emit(PollEvent::Start {
            resource_id: resource.id.clone(),
        });
        self.poll_started(resource, options, events).await
    }

    /// [`poll`](Self::poll) for a caller that already emitted `poll:start`.
    pub(crate) async fn poll_started(
        &self,
        resource: &mut Resource,
        options: &PollOptions,
        events: &EventSink,
    ) -> Result<PollOutcome> {
        let resource_id = resource.id.clone();
        let _end = EndGuard {
            events,
            resource_id: resource_id.clone(),
        };

        if resource.disabled {
            events.emit(PollEvent::Disabled { resource_id });
            return Ok(PollOutcome::Disabled);
        }

        let max_age = options.max_age.unwrap_or(resource.max_age);
        if resource.is_fresh(Utc::now(), max_age) {
            events.emit(PollEvent::Fresh { resource_id });
            return Ok(PollOutcome::Fresh);
        }

        let request = conditional_request(resource);
        let response = {
            let _permit = match &options.pool {
                Some(pool) => Some(
                    pool.acquire()
                        .await
                        .map_err(|_| FreshetError::Other("fetch pool closed".to_string()))?,
                ),
                None => None,
            };
            self.fetcher.fetch(&request).await
        };

        match response {
            Ok(response) => {
                tracing::debug!("{} answered {}", resource.url, response.status);
                resource.status = PollStatus::Http(response.status);
                resource.response_headers = response.headers;
                resource.last_error = None;
                if response.status == 200 {
                    resource.body = response.body;
                }
            }
            Err(FreshetError::Timeout(e)) => {
                tracing::warn!("Timed out polling {}: {}", resource.url, e);
                resource.status = PollStatus::Timeout;
                resource.last_error = Some(e);
            }
            Err(e) => {
                tracing::warn!("Failed to poll {}: {}", resource.url, e);
                resource.status = PollStatus::TransportError;
                resource.last_error = Some(e.to_string());
            }
        }

        resource.last_validated = validated_at();

        let stored = self
            .store
            .update(RESOURCES, &resource_id, Record::from_model(&*resource)?)?;
        if let Some(modified) = stored.modified().and_then(DateTime::from_timestamp_millis) {
            resource.modified = Some(modified);
        }

        events.emit(PollEvent::Status {
            resource_id,
            status: resource.status,
        });
        Ok(PollOutcome::Fetched(resource.status))
    }
}

/// Now, rounded up to the whole millisecond that gets persisted.
fn validated_at() -> DateTime<Utc> {
    let now = Utc::now();
    let partial = now.timestamp_subsec_nanos() % 1_000_000 != 0;
    DateTime::from_timestamp_millis(now.timestamp_millis() + i64::from(partial)).unwrap_or(now)
}

fn conditional_request(resource: &Resource) -> FetchRequest {
    let mut request = FetchRequest::get(resource.url.clone(), resource.timeout);
    if let Some(etag) = resource.etag() {
        request = request.header("If-None-Match", etag);
    }
    if let Some(last_modified) = resource.last_modified() {
        request = request.header("If-Modified-Since", last_modified);
    }
    request
}
