pub mod cli;
pub mod config;
pub mod crawler;
pub mod documents;
pub mod index;
pub mod indexer;
pub mod logging;
pub mod network;
pub mod parser;
pub mod queue;
pub mod warc;

// Re-export main types for library usage
pub use config::Config;
pub use crawler::{CrawlStep, Crawler};
pub use documents::{DocStatus, Document, DocumentStore, PgDocumentStore, RecordLocation};
pub use index::InvertedIndex;
pub use indexer::{IndexStep, Indexer};
pub use network::{Fetcher, FetchError, HttpClient};
pub use queue::{JobQueue, RedisQueue};
pub use warc::WarcWriter;
