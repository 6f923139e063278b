//! Append-only WARC archive made of standalone gzip members.
//!
//! Every record is compressed as its own gzip member, so a record can be
//! located and decompressed from `(offset, length)` alone, without reading
//! any other part of the file. The writer returns exactly those byte
//! coordinates; the read helpers below are what the indexer (and the
//! tests) use to get the payload back out.

use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

/// Upper bound on a single decompressed record.
pub const MAX_RECORD_BYTES: usize = 100 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum WarcError {
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record at offset {offset} truncated: wanted {wanted} bytes, got {got}")]
    ShortRead { offset: u64, wanted: u64, got: u64 },

    #[error("decompressed record exceeds {0} bytes")]
    RecordTooLarge(usize),

    #[error("record header block is not terminated")]
    MissingHeaderEnd,

    #[error("record has no usable Content-Length header")]
    BadContentLength,

    #[error("record payload is shorter than its Content-Length")]
    TruncatedPayload,
}

/// Writer that appends gzip-member WARC records to a single archive file.
///
/// The file handle is held for the writer's lifetime and every append is
/// serialized through an internal mutex, so the `(offset, length)` a call
/// returns is exact even with multiple threads sharing one writer. Exactly
/// one writer process per archive is assumed; there is no cross-process
/// lock.
pub struct WarcWriter {
    file: Mutex<File>,
}

impl WarcWriter {
    /// Open the archive in append mode, creating it if missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WarcError> {
        let file = OpenOptions::new().append(true).create(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Append one response record and return `(offset, length)` of the
    /// compressed member inside the archive.
    ///
    /// On error nothing useful was committed: partial bytes may exist at
    /// the tail of the file, but since no coordinates are returned the
    /// record is unreachable and the next successful append's offset still
    /// comes from the real end of file. Callers must not record metadata
    /// for a failed append.
    pub fn write_record(&self, url: &str, content: &[u8]) -> Result<(u64, u64), WarcError> {
        let header = record_header(url, content.len());

        let mut record = Vec::with_capacity(header.len() + content.len() + 4);
        record.extend_from_slice(header.as_bytes());
        record.extend_from_slice(content);
        record.extend_from_slice(b"\r\n\r\n");

        // One self-terminating gzip member per record; concatenated members
        // are still a valid gzip file.
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&record)?;
        let member = encoder.finish()?;

        let mut file = self.file.lock();
        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(&member)?;
        file.flush()?;

        Ok((offset, member.len() as u64))
    }
}

/// WARC/1.0 response header block, CRLF line endings, terminated by a
/// blank line. Field order is fixed; readers in the wild depend on it.
fn record_header(url: &str, content_length: usize) -> String {
    let date = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    format!(
        "WARC/1.0\r\n\
         WARC-Type: response\r\n\
         WARC-Target-URI: {url}\r\n\
         WARC-Date: {date}\r\n\
         WARC-Record-ID: <urn:uuid:{record_id}>\r\n\
         Content-Type: application/http; msgtype=response\r\n\
         Content-Length: {content_length}\r\n\
         \r\n",
        record_id = Uuid::new_v4(),
    )
}

/// Read exactly `length` bytes at `offset`. A short read is an error, not
/// a truncated result.
pub fn read_member(path: &Path, offset: u64, length: u64) -> Result<Vec<u8>, WarcError> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;

    let mut buf = vec![0u8; length as usize];
    let mut got = 0usize;
    while got < buf.len() {
        let n = file.read(&mut buf[got..])?;
        if n == 0 {
            return Err(WarcError::ShortRead {
                offset,
                wanted: length,
                got: got as u64,
            });
        }
        got += n;
    }
    Ok(buf)
}

/// Decompress a single gzip member, refusing pathological expansions.
pub fn decompress_member(bytes: &[u8]) -> Result<Vec<u8>, WarcError> {
    let mut decoder = GzDecoder::new(bytes).take(MAX_RECORD_BYTES as u64 + 1);
    let mut record = Vec::new();
    decoder.read_to_end(&mut record)?;
    if record.len() > MAX_RECORD_BYTES {
        return Err(WarcError::RecordTooLarge(MAX_RECORD_BYTES));
    }
    Ok(record)
}

/// Split a decompressed record into `(header, payload)`.
///
/// The header block ends at the first `CRLF CRLF`; the payload is exactly
/// the header's `Content-Length` bytes after it, which excludes the
/// record-terminating `CRLF CRLF` the writer appends.
pub fn split_record(record: &[u8]) -> Result<(&[u8], &[u8]), WarcError> {
    let header_end = record
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or(WarcError::MissingHeaderEnd)?;
    let header = &record[..header_end];
    let rest = &record[header_end + 4..];

    let content_length: usize = header_field(header, "Content-Length")
        .and_then(|v| v.parse().ok())
        .ok_or(WarcError::BadContentLength)?;
    if rest.len() < content_length {
        return Err(WarcError::TruncatedPayload);
    }
    Ok((header, &rest[..content_length]))
}

/// Case-insensitive lookup of a field in a WARC header block.
pub fn header_field<'a>(header: &'a [u8], name: &str) -> Option<&'a str> {
    for line in header.split(|&b| b == b'\n') {
        let Ok(line) = std::str::from_utf8(line) else {
            continue;
        };
        let line = line.trim_end_matches('\r');
        if let Some((field, value)) = line.split_once(':') {
            if field.eq_ignore_ascii_case(name) {
                return Some(value.trim());
            }
        }
    }
    None
}
