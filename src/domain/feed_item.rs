use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::Resource;

/// Feed-level metadata reported by the parser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedMeta {
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
}

/// One entry as produced by a feed parser, before deduplication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Article {
    pub guid: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

/// A deduplicated article, keyed by its content identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: String,
    pub resource_id: String,
    pub resource_url: String,
    #[serde(default)]
    pub guid: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    pub published: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    pub modified: Option<DateTime<Utc>>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl FeedItem {
    /// Build the stored item for `article`, or `None` when the article has
    /// nothing to derive an identity from.
    pub fn from_article(resource: &Resource, article: Article) -> Option<Self> {
        let id = Self::content_id(&article)?;

        Some(Self {
            id,
            resource_id: resource.id.clone(),
            resource_url: resource.url.clone(),
            guid: article.guid,
            title: article.title,
            link: article.link,
            summary: article.summary,
            author: article.author,
            published: article.published,
            created: None,
            modified: None,
        })
    }

    /// Content identity: a SHA-256 of the guid when there is one, otherwise
    /// of the link and title together.
    pub fn content_id(article: &Article) -> Option<String> {
        let mut hasher = Sha256::new();

        if let Some(guid) = non_empty(&article.guid) {
            hasher.update(b"guid\0");
            hasher.update(guid.as_bytes());
        } else {
            let link = non_empty(&article.link);
            let title = non_empty(&article.title);
            if link.is_none() && title.is_none() {
                return None;
            }
            hasher.update(b"link\0");
            hasher.update(link.unwrap_or_default().as_bytes());
            hasher.update(b"\0title\0");
            hasher.update(title.unwrap_or_default().as_bytes());
        }

        Some(hex::encode(hasher.finalize()))
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("(Untitled)")
    }
}
