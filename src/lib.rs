//! # Freshet
//!
//! Polls feed resources over HTTP, revalidates them with conditional
//! requests and keeps their items deduplicated in a pluggable store.
//!
//! ## Architecture
//!
//! ```text
//! Scheduler → Poller → Fetcher → Store
//!                 ↘ Ingestor → FeedParser → Store
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! # Add a resource
//! freshet add https://blog.rust-lang.org/feed.xml
//!
//! # Poll everything that is stale
//! freshet poll
//!
//! # Show the newest items
//! freshet items --limit 10
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together all components:
/// store, fetcher, parser, poller, scheduler.
pub mod app;

/// Command-line interface using clap.
///
/// - `add <url>` - Add a resource
/// - `list` - List resources and their poll state
/// - `items` - List stored items
/// - `poll` - Run one sweep
/// - `watch` - Sweep on an interval
pub mod cli;

/// Configuration loaded from `~/.config/freshet/config.toml`.
pub mod config;

/// Core domain models.
///
/// - [`Resource`](domain::Resource): a polled endpoint and its fetch state
/// - [`FeedItem`](domain::FeedItem): a deduplicated article with a content id
pub mod domain;

/// Poll lifecycle events (`poll:start`, `poll:status_304`, ...).
pub mod events;

/// HTTP fetching.
///
/// - [`Fetcher`](fetcher::Fetcher): Async trait for GET requests
/// - [`HttpFetcher`](fetcher::http_fetcher::HttpFetcher): reqwest-based implementation
pub mod fetcher;

/// Turning polled bodies into stored, deduplicated items.
pub mod ingest;

/// Feed parsing.
///
/// Converts RSS 0.9x/1.0/2.0, Atom 0.3/1.0, and JSON Feed 1.0
/// into [`Article`](domain::Article)s through feed-rs.
pub mod normalizer;

/// The per-resource poll state machine.
pub mod poller;

/// Bounded, cancellable sweeps over many resources.
pub mod scheduler;

/// Storage sync layer.
///
/// - [`Store`](store::Store): primitives plus the shared record contract
/// - [`MemoryStore`](store::MemoryStore), [`LogStore`](store::LogStore),
///   [`FsStore`](store::FsStore), [`SqliteStore`](store::SqliteStore)
pub mod store;
