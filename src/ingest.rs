//! Feed ingestion and deduplication.
//!
//! Items are content-addressed: their id is derived from the guid, or from
//! link and title, so submitting the same article twice is a storage
//! conflict rather than a duplicate.

use std::sync::Arc;

use chrono::DateTime;

use crate::app::Result;
use crate::domain::{FeedItem, Resource};
use crate::normalizer::FeedParser;
use crate::store::{Record, Store, FEED_ITEMS, RESOURCES};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Articles found in the body
    pub parsed: usize,
    /// Items stored for the first time
    pub new: usize,
    pub errors: usize,
}

pub struct Ingestor {
    store: Arc<dyn Store>,
    parser: Arc<dyn FeedParser>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn Store>, parser: Arc<dyn FeedParser>) -> Self {
        Self { store, parser }
    }

    /// Parse the resource's last good body and store items not seen before.
    pub fn ingest(&self, resource: &mut Resource) -> Result<IngestReport> {
        if resource.body.is_empty() {
            return Ok(IngestReport::default());
        }

        let parsed = match self.parser.parse(resource.body.as_bytes()) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Could not parse {}: {}", resource.url, e);
                return Ok(IngestReport {
                    errors: 1,
                    ..Default::default()
                });
            }
        };

        let mut report = IngestReport {
            parsed: parsed.articles.len(),
            new: 0,
            errors: parsed.errors,
        };

        if resource.meta.as_ref() != Some(&parsed.meta) {
            resource.meta = Some(parsed.meta);
            let stored = self
                .store
                .update(RESOURCES, &resource.id, Record::from_model(&*resource)?)?;
            if let Some(modified) = stored.modified().and_then(DateTime::from_timestamp_millis) {
                resource.modified = Some(modified);
            }
        }

        let mut records = Vec::with_capacity(parsed.articles.len());
        for article in parsed.articles {
            match FeedItem::from_article(resource, article) {
                Some(item) => records.push(Record::from_model(&item)?),
                None => report.errors += 1,
            }
        }

        if !records.is_empty() {
            let outcome = self.store.batch_upsert(FEED_ITEMS, records)?;
            report.new = outcome.successes.len();
        }

        tracing::info!(
            "Ingested {}: {} parsed, {} new, {} errors",
            resource.url,
            report.parsed,
            report.new,
            report.errors
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::app::FreshetError;
    use crate::domain::{Article, FeedMeta};
    use crate::normalizer::tests::RSS_SAMPLE;
    use crate::normalizer::{Normalizer, ParsedFeed};
    use crate::store::{ListOptions, MemoryStore};

    /// Parser returning a fixed result and counting calls.
    struct FixedParser {
        result: std::result::Result<ParsedFeed, String>,
        calls: AtomicUsize,
    }

    impl FeedParser for FixedParser {
        fn parse(&self, _body: &[u8]) -> Result<ParsedFeed> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone().map_err(FreshetError::FeedParse)
        }
    }

    fn fixed(result: std::result::Result<ParsedFeed, String>) -> Arc<FixedParser> {
        Arc::new(FixedParser {
            result,
            calls: AtomicUsize::new(0),
        })
    }

    fn polled_resource(body: &str) -> Resource {
        let mut resource = Resource::new("https://example.com/feed.xml").unwrap();
        resource.body = body.to_string();
        resource
    }

    fn items(store: &MemoryStore) -> Vec<FeedItem> {
        store
            .list(FEED_ITEMS, &ListOptions::new())
            .unwrap()
            .into_iter()
            .map(|r| r.into_model().unwrap())
            .collect()
    }

    #[test]
    fn test_reingest_stores_nothing_new() {
        let store = Arc::new(MemoryStore::new());
        let ingestor = Ingestor::new(store.clone(), Arc::new(Normalizer::new()));
        let mut resource = polled_resource(RSS_SAMPLE);

        let first = ingestor.ingest(&mut resource).unwrap();
        assert_eq!(
            first,
            IngestReport {
                parsed: 2,
                new: 2,
                errors: 0
            }
        );

        let second = ingestor.ingest(&mut resource).unwrap();
        assert_eq!(second.parsed, 2);
        assert_eq!(second.new, 0);

        let stored = items(&store);
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|i| i.resource_id == resource.id));
        assert!(stored.iter().all(|i| i.created.is_some()));
    }

    #[test]
    fn test_meta_is_written_back() {
        let store = Arc::new(MemoryStore::new());
        let ingestor = Ingestor::new(store.clone(), Arc::new(Normalizer::new()));
        let mut resource = polled_resource(RSS_SAMPLE);

        ingestor.ingest(&mut resource).unwrap();

        assert_eq!(resource.display_title(), "Test Feed");
        let stored: Resource = store.get(RESOURCES, &resource.id).unwrap().into_model().unwrap();
        assert_eq!(stored.meta, resource.meta);
        assert!(resource.modified.is_some());
    }

    #[test]
    fn test_empty_body_does_nothing() {
        let store = Arc::new(MemoryStore::new());
        let parser = fixed(Ok(ParsedFeed::default()));
        let ingestor = Ingestor::new(store.clone(), parser.clone());

        let report = ingestor.ingest(&mut polled_resource("")).unwrap();

        assert_eq!(report, IngestReport::default());
        assert_eq!(parser.calls.load(Ordering::SeqCst), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_unparseable_body_counts_one_error() {
        let store = Arc::new(MemoryStore::new());
        let ingestor = Ingestor::new(store.clone(), fixed(Err("bad xml".into())));

        let report = ingestor.ingest(&mut polled_resource("<oops")).unwrap();

        assert_eq!(
            report,
            IngestReport {
                parsed: 0,
                new: 0,
                errors: 1
            }
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_articles_without_identity_are_errors() {
        let store = Arc::new(MemoryStore::new());
        let parsed = ParsedFeed {
            meta: FeedMeta::default(),
            articles: vec![
                Article {
                    guid: Some("a".into()),
                    ..Default::default()
                },
                Article {
                    summary: Some("no identity".into()),
                    ..Default::default()
                },
                Article {
                    link: Some("https://example.com/b".into()),
                    title: Some("B".into()),
                    ..Default::default()
                },
            ],
            errors: 1,
        };
        let ingestor = Ingestor::new(store.clone(), fixed(Ok(parsed)));

        let report = ingestor.ingest(&mut polled_resource("body")).unwrap();

        assert_eq!(
            report,
            IngestReport {
                parsed: 3,
                new: 2,
                errors: 2
            }
        );
        assert_eq!(items(&store).len(), 2);
    }

    #[test]
    fn test_duplicate_articles_in_one_body_store_once() {
        let store = Arc::new(MemoryStore::new());
        let same = Article {
            guid: Some("dup".into()),
            ..Default::default()
        };
        let parsed = ParsedFeed {
            articles: vec![same.clone(), same],
            ..Default::default()
        };
        let ingestor = Ingestor::new(store.clone(), fixed(Ok(parsed)));

        let report = ingestor.ingest(&mut polled_resource("body")).unwrap();

        assert_eq!(report.new, 1);
        assert_eq!(items(&store).len(), 1);
    }

    #[test]
    fn test_unchanged_meta_is_not_rewritten() {
        let store = Arc::new(MemoryStore::new());
        let ingestor = Ingestor::new(store.clone(), fixed(Ok(ParsedFeed::default())));
        let mut resource = polled_resource("body");
        resource.meta = Some(FeedMeta::default());

        ingestor.ingest(&mut resource).unwrap();

        assert!(store.get(RESOURCES, &resource.id).unwrap_err().is_not_found());
    }
}
