//! Indexer worker: read archived documents and grow the inverted index.
//!
//! Ids arrive on the indexing queue only after the crawler committed the
//! archive location, so a popped id always resolves to a readable record
//! unless something corrupted the archive underneath us. Per-document
//! failures are logged and skipped; the loop itself never exits.

use crate::config::INDEXING_QUEUE;
use crate::documents::{DocumentStore, MetadataError};
use crate::index::{IndexError, InvertedIndex};
use crate::parser;
use crate::queue::{JobQueue, QueueError};
use crate::warc::{self, WarcError};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

/// Outcome of a single pass through the indexing loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStep {
    /// Queue payload was not a decimal document id.
    BadPayload,
    /// Metadata, archive or index trouble; the document was skipped.
    Skipped(i32),
    /// Document fully indexed.
    Indexed {
        doc_id: i32,
        tokens: usize,
        unique: usize,
    },
}

/// Everything that can go wrong while indexing one document.
#[derive(Debug, thiserror::Error)]
pub enum IndexDocError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Archive(#[from] WarcError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

pub struct Indexer<Q, S> {
    queue: Q,
    store: S,
    index: InvertedIndex,
    warc_base_path: PathBuf,
}

impl<Q, S> Indexer<Q, S>
where
    Q: JobQueue,
    S: DocumentStore,
{
    pub fn new(queue: Q, store: S, index: InvertedIndex, warc_base_path: PathBuf) -> Self {
        Self {
            queue,
            store,
            index,
            warc_base_path,
        }
    }

    /// The index this worker writes to; tests and tooling read through it.
    pub fn index(&self) -> &InvertedIndex {
        &self.index
    }

    /// Run the indexing loop forever.
    pub async fn run(&self) {
        info!("indexer started");
        loop {
            match self.step().await {
                Ok(_) => {}
                Err(e) => {
                    // A dead queue connection would otherwise spin hot.
                    error!("indexing queue pop failed: {e}");
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Block for the next id and index it. Per-document failures are
    /// absorbed; only queue trouble is returned to the caller.
    pub async fn step(&self) -> Result<IndexStep, QueueError> {
        let payload = self.queue.pop_head_blocking(INDEXING_QUEUE).await?;
        let doc_id: i32 = match payload.trim().parse() {
            Ok(id) => id,
            Err(_) => {
                warn!(%payload, "dropping unparsable indexing job");
                return Ok(IndexStep::BadPayload);
            }
        };

        match self.index_document(doc_id).await {
            Ok((tokens, unique)) => {
                info!(doc_id, tokens, unique, "indexed");
                Ok(IndexStep::Indexed {
                    doc_id,
                    tokens,
                    unique,
                })
            }
            Err(e) => {
                warn!(doc_id, "indexing failed: {e}");
                Ok(IndexStep::Skipped(doc_id))
            }
        }
    }

    /// Index one document: locate, read, decompress, strip the record
    /// header, extract text, tokenize, merge postings, record the length.
    /// Returns `(raw_token_count, unique_token_count)`.
    async fn index_document(&self, doc_id: i32) -> Result<(usize, usize), IndexDocError> {
        let location = self.store.read_location(doc_id).await?;
        let path = self.warc_base_path.join(&location.file_path);

        let member = warc::read_member(&path, location.offset, location.length)?;
        let record = warc::decompress_member(&member)?;
        let (_header, payload) = warc::split_record(&record)?;

        let html = String::from_utf8_lossy(payload);
        let text = parser::extract_text(&html);
        let tokens = parser::tokenize(&text);

        let unique: BTreeSet<&str> = tokens.iter().map(String::as_str).collect();
        for token in &unique {
            self.index.merge(token, doc_id)?;
        }
        self.index.flush()?;

        // Raw sequence length, not the unique count; term-frequency math
        // downstream needs the former.
        self.store
            .set_doc_length(doc_id, tokens.len() as i32)
            .await?;

        Ok((tokens.len(), unique.len()))
    }
}
