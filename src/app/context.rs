use std::sync::Arc;

use crate::app::error::Result;
use crate::config::Config;
use crate::domain::Resource;
use crate::fetcher::http_fetcher::HttpFetcher;
use crate::fetcher::Fetcher;
use crate::ingest::Ingestor;
use crate::normalizer::{FeedParser, Normalizer};
use crate::poller::Poller;
use crate::scheduler::Scheduler;
use crate::store::{Backend, ListOptions, MemoryStore, Store, RESOURCES};

pub struct AppContext {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub poller: Arc<Poller>,
    pub ingestor: Arc<Ingestor>,
    pub scheduler: Scheduler,
}

impl AppContext {
    /// Open the configured backend and wire the HTTP fetcher and feed-rs
    /// parser around it.
    pub fn new(config: Config) -> Result<Self> {
        let store: Arc<dyn Store> = Arc::new(Backend::open(&config.storage)?);
        let fetcher: Arc<dyn Fetcher + Send + Sync> = Arc::new(HttpFetcher::new(
            &config.poll.user_agent,
            config.poll.concurrency,
        )?);
        Ok(Self::with_parts(config, store, fetcher, Arc::new(Normalizer::new())))
    }

    pub fn in_memory(fetcher: Arc<dyn Fetcher + Send + Sync>) -> Self {
        Self::with_parts(
            Config::default(),
            Arc::new(MemoryStore::new()),
            fetcher,
            Arc::new(Normalizer::new()),
        )
    }

    pub fn with_parts(
        config: Config,
        store: Arc<dyn Store>,
        fetcher: Arc<dyn Fetcher + Send + Sync>,
        parser: Arc<dyn FeedParser>,
    ) -> Self {
        let poller = Arc::new(Poller::new(store.clone(), fetcher));
        let ingestor = Arc::new(Ingestor::new(store.clone(), parser));
        let scheduler = Scheduler::new(poller.clone(), ingestor.clone());

        Self {
            config,
            store,
            poller,
            ingestor,
            scheduler,
        }
    }

    /// A new resource for `url` with the configured timeout and max age.
    pub fn new_resource(&self, url: &str) -> Result<Resource> {
        let mut resource = Resource::new(url)?;
        resource.timeout = self.config.poll.timeout;
        resource.max_age = self.config.poll.max_age;
        Ok(resource)
    }

    /// Every stored resource, oldest first.
    pub fn resources(&self) -> Result<Vec<Resource>> {
        self.store
            .list(RESOURCES, &ListOptions::new())?
            .into_iter()
            .map(|record| record.into_model())
            .collect()
    }
}
