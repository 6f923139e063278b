//! Crawler worker: fetch, archive, record, hand off for indexing.
//!
//! One document moves through the loop at a time. For a given URL the
//! order is fixed: reserve the row, append to the archive, advance the
//! row to `crawled`, then push the id onto the indexing queue. The
//! indexer can therefore trust that any id it pops already has a valid
//! archive location.

use crate::config::{Config, CRAWL_QUEUE, INDEXING_QUEUE};
use crate::documents::DocumentStore;
use crate::network::Fetcher;
use crate::queue::{JobQueue, QueueError};
use crate::warc::WarcWriter;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

/// Outcome of a single pass through the crawl loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlStep {
    /// Crawl queue was empty.
    Idle,
    /// URL failed validation and was dropped.
    Rejected,
    /// URL already has a row; someone else got there first.
    Duplicate,
    /// Metadata store refused an operation; the URL was dropped.
    StoreFailed,
    /// Fetch failed or returned an empty body; row marked `fetch_failed`.
    FetchFailed(i32),
    /// Archive append failed; the row stays at `processing`.
    ArchiveFailed(i32),
    /// Document archived and queued for indexing.
    Crawled(i32),
    /// Document archived but the indexing handoff kept failing.
    CrawledNotQueued(i32),
}

pub struct Crawler<Q, S, F> {
    queue: Q,
    store: S,
    fetcher: F,
    warc: WarcWriter,
    warc_basename: String,
    seed_url: String,
}

impl<Q, S, F> Crawler<Q, S, F>
where
    Q: JobQueue,
    S: DocumentStore,
    F: Fetcher,
{
    pub fn new(
        queue: Q,
        store: S,
        fetcher: F,
        warc: WarcWriter,
        warc_basename: String,
        seed_url: String,
    ) -> Self {
        Self {
            queue,
            store,
            fetcher,
            warc,
            warc_basename,
            seed_url,
        }
    }

    /// Push the seed URL iff the crawl queue is empty. Returns whether a
    /// seed was pushed.
    pub async fn seed_if_empty(&self) -> Result<bool, QueueError> {
        if self.queue.length(CRAWL_QUEUE).await? > 0 {
            return Ok(false);
        }
        info!(url = %self.seed_url, "crawl queue empty, seeding");
        self.queue.push_tail(CRAWL_QUEUE, &self.seed_url).await?;
        Ok(true)
    }

    /// Re-enqueue crawled documents whose indexing handoff was lost, e.g.
    /// when the process died between the metadata update and the queue
    /// push. Safe to repeat: the posting merge is idempotent.
    pub async fn reconcile_unindexed(&self) -> Result<usize, CrawlSetupError> {
        let ids = self.store.unindexed(10_000).await?;
        let mut requeued = 0;
        for id in &ids {
            self.queue
                .push_tail(INDEXING_QUEUE, &id.to_string())
                .await?;
            requeued += 1;
        }
        Ok(requeued)
    }

    /// Run the crawl loop forever.
    pub async fn run(&self) {
        info!("crawler started");
        loop {
            match self.step().await {
                CrawlStep::Idle => {
                    sleep(Duration::from_secs(Config::EMPTY_QUEUE_DELAY_SECS)).await;
                }
                CrawlStep::Crawled(_) | CrawlStep::CrawledNotQueued(_) => {
                    // Politeness delay between completed fetches.
                    sleep(Duration::from_secs(Config::POLITENESS_DELAY_SECS)).await;
                }
                _ => {}
            }
        }
    }

    /// One pass: pop a URL and move it as far through the pipeline as it
    /// will go. Per-document failures are absorbed here; only the outcome
    /// is reported.
    pub async fn step(&self) -> CrawlStep {
        let url = match self.queue.pop_head_nowait(CRAWL_QUEUE).await {
            Ok(Some(url)) => url,
            Ok(None) => return CrawlStep::Idle,
            Err(e) => {
                warn!("crawl queue pop failed: {e}");
                return CrawlStep::Idle;
            }
        };

        if !is_fetchable_url(&url) {
            debug!(%url, "dropping invalid url");
            return CrawlStep::Rejected;
        }

        let id = match self.store.reserve(&url).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                debug!(%url, "skipping duplicate");
                return CrawlStep::Duplicate;
            }
            Err(e) => {
                warn!(%url, "reserve failed: {e}");
                return CrawlStep::StoreFailed;
            }
        };

        info!(%url, doc_id = id, "fetching");
        let body = match self.fetcher.fetch(&url).await {
            Ok(body) if !body.is_empty() => body,
            Ok(_) => {
                warn!(%url, doc_id = id, "fetch returned an empty body");
                self.note_fetch_failure(id).await;
                return CrawlStep::FetchFailed(id);
            }
            Err(e) => {
                warn!(%url, doc_id = id, "fetch failed: {e}");
                self.note_fetch_failure(id).await;
                return CrawlStep::FetchFailed(id);
            }
        };

        let (offset, length) = match self.warc.write_record(&url, &body) {
            Ok(location) => location,
            Err(e) => {
                // The row stays at `processing`; whatever bytes hit the
                // archive are unreachable without a metadata pointer.
                error!(%url, doc_id = id, "archive append failed: {e}");
                return CrawlStep::ArchiveFailed(id);
            }
        };

        if let Err(e) = self
            .store
            .mark_crawled(id, &self.warc_basename, offset, length)
            .await
        {
            warn!(%url, doc_id = id, "mark_crawled failed: {e}");
            return CrawlStep::StoreFailed;
        }

        let payload = id.to_string();
        for attempt in 1..=Config::ENQUEUE_ATTEMPTS {
            match self.queue.push_tail(INDEXING_QUEUE, &payload).await {
                Ok(()) => {
                    info!(%url, doc_id = id, offset, length, "archived and queued for indexing");
                    return CrawlStep::Crawled(id);
                }
                Err(e) => {
                    warn!(doc_id = id, attempt, "indexing enqueue failed: {e}");
                }
            }
        }

        if let Err(e) = self.store.mark_crawled_not_queued(id).await {
            warn!(doc_id = id, "mark_crawled_not_queued failed: {e}");
        }
        CrawlStep::CrawledNotQueued(id)
    }

    async fn note_fetch_failure(&self, id: i32) {
        if let Err(e) = self.store.mark_fetch_failed(id).await {
            warn!(doc_id = id, "mark_fetch_failed failed: {e}");
        }
    }
}

/// Errors surfaced during crawler startup (seeding / reconcile); the
/// running loop never returns them.
#[derive(Debug, thiserror::Error)]
pub enum CrawlSetupError {
    #[error(transparent)]
    Queue(#[from] crate::queue::QueueError),

    #[error(transparent)]
    Metadata(#[from] crate::documents::MetadataError),
}

/// A URL is worth fetching when it speaks HTTP(S) and is long enough to
/// name a host.
fn is_fetchable_url(url: &str) -> bool {
    (url.starts_with("http://") || url.starts_with("https://")) && url.len() >= 10
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::{DocStatus, MemoryDocumentStore};
    use crate::network::FixedFetcher;
    use crate::queue::MemoryQueue;
    use tempfile::TempDir;

    const SEED: &str = "https://en.wikipedia.org/wiki/Main_Page";

    fn make_crawler(
        dir: &TempDir,
        queue: MemoryQueue,
        store: MemoryDocumentStore,
        fetcher: FixedFetcher,
    ) -> Crawler<MemoryQueue, MemoryDocumentStore, FixedFetcher> {
        let warc = WarcWriter::open(dir.path().join("archive.warc.gz")).unwrap();
        Crawler::new(
            queue,
            store,
            fetcher,
            warc,
            "archive.warc.gz".to_string(),
            SEED.to_string(),
        )
    }

    #[test]
    fn test_url_validation() {
        assert!(is_fetchable_url("https://example.com/"));
        assert!(is_fetchable_url("http://abc.de"));
        assert!(!is_fetchable_url("ftp://example.com/"));
        assert!(!is_fetchable_url("http://x"));
        assert!(!is_fetchable_url("javascript:void(0)"));
        assert!(!is_fetchable_url(""));
    }

    #[tokio::test]
    async fn test_seed_then_crawl() {
        let dir = TempDir::new().unwrap();
        let queue = MemoryQueue::new();
        let store = MemoryDocumentStore::new();
        let fetcher = FixedFetcher::new(b"<html><body>Main page</body></html>".to_vec());
        let crawler = make_crawler(&dir, queue.clone(), store.clone(), fetcher);

        assert!(crawler.seed_if_empty().await.unwrap());
        // A second call sees the queued seed and does nothing.
        assert!(!crawler.seed_if_empty().await.unwrap());
        assert_eq!(queue.length(CRAWL_QUEUE).await.unwrap(), 1);

        assert_eq!(crawler.step().await, CrawlStep::Crawled(1));

        let doc = store.fetch(1).await.unwrap().unwrap();
        assert_eq!(doc.url, SEED);
        assert_eq!(doc.status, DocStatus::Crawled);
        assert_eq!(doc.file_path.as_deref(), Some("archive.warc.gz"));
        assert_eq!(
            queue.pop_head_nowait(INDEXING_QUEUE).await.unwrap().as_deref(),
            Some("1")
        );
    }

    #[tokio::test]
    async fn test_duplicate_url_is_skipped_without_fetch() {
        let dir = TempDir::new().unwrap();
        let queue = MemoryQueue::new();
        let store = MemoryDocumentStore::new();
        let fetcher = FixedFetcher::new(b"<html></html>".to_vec());

        // Pre-existing row for the URL.
        let id = store.reserve("https://x/same").await.unwrap().unwrap();
        store.mark_crawled(id, "archive.warc.gz", 0, 10).await.unwrap();

        let crawler = make_crawler(&dir, queue.clone(), store.clone(), fetcher);
        queue.push_tail(CRAWL_QUEUE, "https://x/same").await.unwrap();

        assert_eq!(crawler.step().await, CrawlStep::Duplicate);
        // No fetch happened and no archive file was written.
        assert_eq!(crawler.fetcher.calls(), 0);
        assert_eq!(
            std::fs::metadata(dir.path().join("archive.warc.gz")).unwrap().len(),
            0
        );
        assert_eq!(queue.length(INDEXING_QUEUE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalid_urls_are_dropped_silently() {
        let dir = TempDir::new().unwrap();
        let queue = MemoryQueue::new();
        let store = MemoryDocumentStore::new();
        let crawler = make_crawler(
            &dir,
            queue.clone(),
            store.clone(),
            FixedFetcher::new(b"body".to_vec()),
        );

        queue.push_tail(CRAWL_QUEUE, "ftp://example.com/").await.unwrap();
        queue.push_tail(CRAWL_QUEUE, "http://x").await.unwrap();

        assert_eq!(crawler.step().await, CrawlStep::Rejected);
        assert_eq!(crawler.step().await, CrawlStep::Rejected);
        assert_eq!(crawler.step().await, CrawlStep::Idle);
        assert!(store.fetch(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_failure_marks_row() {
        let dir = TempDir::new().unwrap();
        let queue = MemoryQueue::new();
        let store = MemoryDocumentStore::new();
        let crawler = make_crawler(&dir, queue.clone(), store.clone(), FixedFetcher::failing());

        queue.push_tail(CRAWL_QUEUE, "https://down.example/").await.unwrap();
        assert_eq!(crawler.step().await, CrawlStep::FetchFailed(1));

        let doc = store.fetch(1).await.unwrap().unwrap();
        assert_eq!(doc.status, DocStatus::FetchFailed);
        assert_eq!(queue.length(INDEXING_QUEUE).await.unwrap(), 0);

        // The tombstone blocks a later attempt at the same URL.
        queue.push_tail(CRAWL_QUEUE, "https://down.example/").await.unwrap();
        assert_eq!(crawler.step().await, CrawlStep::Duplicate);
    }

    #[tokio::test]
    async fn test_empty_body_counts_as_fetch_failure() {
        let dir = TempDir::new().unwrap();
        let queue = MemoryQueue::new();
        let store = MemoryDocumentStore::new();
        let crawler = make_crawler(
            &dir,
            queue.clone(),
            store.clone(),
            FixedFetcher::new(Vec::new()),
        );

        queue.push_tail(CRAWL_QUEUE, "https://empty.example/").await.unwrap();
        assert_eq!(crawler.step().await, CrawlStep::FetchFailed(1));
        let doc = store.fetch(1).await.unwrap().unwrap();
        assert_eq!(doc.status, DocStatus::FetchFailed);
    }

    #[tokio::test]
    async fn test_enqueue_failure_marks_crawled_not_queued() {
        let dir = TempDir::new().unwrap();
        let queue = MemoryQueue::new();
        let store = MemoryDocumentStore::new();
        let crawler = make_crawler(
            &dir,
            queue.clone(),
            store.clone(),
            FixedFetcher::new(b"<html><body>page</body></html>".to_vec()),
        );

        queue.push_tail(CRAWL_QUEUE, "https://ok.example/").await.unwrap();
        queue.fail_next_pushes(Config::ENQUEUE_ATTEMPTS);

        assert_eq!(crawler.step().await, CrawlStep::CrawledNotQueued(1));

        let doc = store.fetch(1).await.unwrap().unwrap();
        assert_eq!(doc.status, DocStatus::CrawledNotQueued);
        // The archive write still happened; the record is recoverable.
        assert!(doc.offset.is_some() && doc.length.is_some());
        assert_eq!(queue.length(INDEXING_QUEUE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_retries_before_giving_up() {
        let dir = TempDir::new().unwrap();
        let queue = MemoryQueue::new();
        let store = MemoryDocumentStore::new();
        let crawler = make_crawler(
            &dir,
            queue.clone(),
            store.clone(),
            FixedFetcher::new(b"<html><body>page</body></html>".to_vec()),
        );

        queue.push_tail(CRAWL_QUEUE, "https://ok.example/").await.unwrap();
        // Fewer failures than attempts: the retry succeeds.
        queue.fail_next_pushes(Config::ENQUEUE_ATTEMPTS - 1);

        assert_eq!(crawler.step().await, CrawlStep::Crawled(1));
        assert_eq!(
            queue.pop_head_nowait(INDEXING_QUEUE).await.unwrap().as_deref(),
            Some("1")
        );
    }

    #[tokio::test]
    async fn test_reconcile_requeues_unindexed() {
        let dir = TempDir::new().unwrap();
        let queue = MemoryQueue::new();
        let store = MemoryDocumentStore::new();

        let a = store.reserve("https://a.example/").await.unwrap().unwrap();
        store.mark_crawled(a, "archive.warc.gz", 0, 10).await.unwrap();
        let b = store.reserve("https://b.example/").await.unwrap().unwrap();
        store.mark_crawled(b, "archive.warc.gz", 10, 10).await.unwrap();
        store.set_doc_length(b, 3).await.unwrap();

        let crawler = make_crawler(
            &dir,
            queue.clone(),
            store.clone(),
            FixedFetcher::new(Vec::new()),
        );
        let requeued = crawler.reconcile_unindexed().await.unwrap();

        assert_eq!(requeued, 1);
        assert_eq!(
            queue.pop_head_nowait(INDEXING_QUEUE).await.unwrap(),
            Some(a.to_string())
        );
    }
}
