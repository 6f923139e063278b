//! Persistent inverted index: token -> set of document ids.
//!
//! Backed by an ordered key-value store (sled). A posting list is stored
//! as the ids' decimal strings joined with `,`, kept in ascending
//! lexicographic order of those strings. That encoding is canonical for
//! the set, so merging an id that is already present rewrites nothing.

use sled::Db;
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index store error: {0}")]
    Store(#[from] sled::Error),

    #[error("posting list for token {0:?} is not valid UTF-8")]
    Corrupt(String),
}

/// Inverted index owned by the indexer process for its whole lifetime.
///
/// Single writer by design. Read-modify-write merges are only safe because
/// exactly one indexer runs; a second writer would need a merge operator
/// or per-key locking instead.
pub struct InvertedIndex {
    db: Db,
}

impl InvertedIndex {
    /// Open (or create) the index store at the given directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, IndexError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Merge a document id into a token's posting set.
    ///
    /// Returns `true` if the id was inserted, `false` if it was already
    /// present (in which case the stored bytes are untouched).
    pub fn merge(&self, token: &str, doc_id: i32) -> Result<bool, IndexError> {
        let mut ids = match self.db.get(token.as_bytes())? {
            Some(bytes) => decode_postings(token, &bytes)?,
            None => BTreeSet::new(),
        };

        if !ids.insert(doc_id.to_string()) {
            return Ok(false);
        }

        self.db
            .insert(token.as_bytes(), encode_postings(&ids).into_bytes())?;
        Ok(true)
    }

    /// Decoded posting set for a token; empty when the token is unknown.
    pub fn postings(&self, token: &str) -> Result<BTreeSet<String>, IndexError> {
        match self.db.get(token.as_bytes())? {
            Some(bytes) => decode_postings(token, &bytes),
            None => Ok(BTreeSet::new()),
        }
    }

    /// Raw stored bytes for a token, if any.
    pub fn raw_postings(&self, token: &str) -> Result<Option<Vec<u8>>, IndexError> {
        Ok(self.db.get(token.as_bytes())?.map(|v| v.to_vec()))
    }

    /// Flush the store to disk.
    pub fn flush(&self) -> Result<(), IndexError> {
        self.db.flush()?;
        Ok(())
    }
}

fn decode_postings(token: &str, bytes: &[u8]) -> Result<BTreeSet<String>, IndexError> {
    let text =
        std::str::from_utf8(bytes).map_err(|_| IndexError::Corrupt(token.to_string()))?;
    Ok(text
        .split(',')
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect())
}

fn encode_postings(ids: &BTreeSet<String>) -> String {
    ids.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}
