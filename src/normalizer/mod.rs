use chrono::Utc;
use feed_rs::parser;
use html_escape::decode_html_entities;

use crate::app::{FreshetError, Result};
use crate::domain::{Article, FeedMeta};

/// What a parser extracted from one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFeed {
    pub meta: FeedMeta,
    pub articles: Vec<Article>,
    /// Entries the parser had to drop
    pub errors: usize,
}

/// Turns a fetched body into feed metadata and articles.
///
/// Returns [`FreshetError::FeedParse`] when the document as a whole cannot
/// be read.
pub trait FeedParser: Send + Sync {
    fn parse(&self, body: &[u8]) -> Result<ParsedFeed>;
}

#[derive(Clone)]
pub struct Normalizer;

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

fn decode(text: &str) -> String {
    decode_html_entities(text).trim().to_string()
}

impl Normalizer {
    pub fn new() -> Self {
        Self
    }
}

impl FeedParser for Normalizer {
    fn parse(&self, body: &[u8]) -> Result<ParsedFeed> {
        // Entries without an id stay empty so FeedItem derives its own
        let feed = parser::Builder::new()
            .id_generator(|_, _, _| String::new())
            .build()
            .parse(body)
            .map_err(|e| FreshetError::FeedParse(e.to_string()))?;

        let meta = FeedMeta {
            title: feed.title.map(|t| decode(&t.content)),
            description: feed.description.map(|d| decode(&d.content)),
            link: feed.links.first().map(|l| l.href.clone()),
        };

        let articles = feed
            .entries
            .into_iter()
            .map(|entry| Article {
                guid: Some(entry.id).filter(|id| !id.trim().is_empty()),
                title: entry.title.map(|t| decode(&t.content)),
                link: entry.links.first().map(|l| l.href.clone()),
                summary: entry
                    .summary
                    .map(|s| decode(&s.content))
                    .or_else(|| entry.content.and_then(|c| c.body).map(|b| decode(&b))),
                author: entry.authors.first().map(|a| a.name.clone()),
                published: entry
                    .published
                    .or(entry.updated)
                    .map(|dt| dt.with_timezone(&Utc)),
            })
            .collect();

        Ok(ParsedFeed {
            meta,
            articles,
            errors: 0,
        })
    }
}
