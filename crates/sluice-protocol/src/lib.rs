//! Shared wire-format types and constants for sluice client ↔ server
//! communication.
//!
//! This crate is intentionally minimal: DTOs, header and setting-key
//! constants, and `Content-Range` validation. No I/O, no hashing.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ── Header names ───────────────────────────────────────────────────────────

/// Per-slice CRC-32 sent by the client on chunk uploads (8 hex, lowercase).
pub const CHUNK_CRC32_HEADER: &str = "X-Chunk-CRC32";

/// Percent-encoded destination path on stream uploads.
pub const FILE_PATH_HEADER: &str = "File-Path";

/// Millisecond epoch source mtime.
pub const LAST_MODIFIED_HEADER: &str = "Last-Modified";

/// "false" disables overwriting an existing object; anything else allows it.
pub const OVERWRITE_HEADER: &str = "Overwrite";

/// "true" queues a direct put instead of performing it inline.
pub const AS_TASK_HEADER: &str = "As-Task";

/// Declared size for direct puts whose body length is unknown.
pub const FILE_SIZE_HEADER: &str = "X-File-Size";

/// Pre-flight whole-file hash hints on direct puts.
pub const FILE_MD5_HEADER: &str = "X-File-Md5";
pub const FILE_SHA1_HEADER: &str = "X-File-Sha1";
pub const FILE_SHA256_HEADER: &str = "X-File-Sha256";

// ── Setting keys ───────────────────────────────────────────────────────────

/// Chunk size (MiB) the server advertises for disk-staged uploads.
pub const CHUNKED_UPLOAD_CHUNK_SIZE: &str = "chunked_upload_chunk_size";

/// Chunk size (MiB) the server advertises for pipe-streamed uploads.
pub const STREAM_UPLOAD_CHUNK_SIZE: &str = "stream_upload_chunk_size";

// ── Response envelope ──────────────────────────────────────────────────────

/// Common response envelope. `code == 200` is success; the HTTP status
/// carries the same value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: u16,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 200,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 200
    }
}

// ── Upload DTOs ────────────────────────────────────────────────────────────

/// Body of a successful chunk upload: the CRC-32 the server observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkUploadData {
    pub crc32: String,
}

/// JSON body of `POST /fs/put/chunk/merge`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRequest {
    pub upload_id: String,
    pub path: String,
    pub total_chunks: u64,
    #[serde(default)]
    pub as_task: bool,
    #[serde(default)]
    pub overwrite: bool,
    /// Millisecond epoch; <= 0 means "use the server clock".
    #[serde(default)]
    pub last_modified: i64,
    /// Client-computed XXH64 over the whole source; empty if unavailable.
    #[serde(default)]
    pub hash: String,
}

/// Synchronous merge result: whole-file digests keyed by algorithm name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeData {
    pub hash: BTreeMap<String, String>,
}

/// Asynchronous merge result: a pollable task handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskData {
    pub task: TaskInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: String,
    pub status: String,
    pub message: String,
}

/// Per-chunk response of the ranged-stream engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunkData {
    pub received: u64,
    pub total: u64,
    pub complete: bool,
}

/// Upload-related settings the server exposes to clients (both in MiB).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSettings {
    pub chunked_upload_chunk_size: u64,
    pub stream_upload_chunk_size: u64,
}

// ── Content-Range ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid Content-Range '{0}': expected 'bytes <start>-<end>/<total>'")]
pub struct ContentRangeError(pub String);

/// A validated `Content-Range: bytes <start>-<end>/<total>` header.
///
/// The grammar is deliberately strict: plain non-negative decimals,
/// `start <= end < total`, nothing else. Wildcard totals and suffix ranges
/// have no meaning on an upload surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

impl ContentRange {
    pub fn parse(header: &str) -> Result<Self, ContentRangeError> {
        let err = || ContentRangeError(header.to_string());

        let rest = header.strip_prefix("bytes ").ok_or_else(err)?;
        let (range_part, total_str) = rest.split_once('/').ok_or_else(err)?;
        let (start_str, end_str) = range_part.split_once('-').ok_or_else(err)?;

        let start = parse_decimal(start_str).ok_or_else(err)?;
        let end = parse_decimal(end_str).ok_or_else(err)?;
        let total = parse_decimal(total_str).ok_or_else(err)?;

        if start > end || end >= total {
            return Err(err());
        }
        Ok(Self { start, end, total })
    }

    /// Number of bytes the range covers. Never zero: `start <= end` holds
    /// for every parsed range.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl fmt::Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes {}-{}/{}", self.start, self.end, self.total)
    }
}

/// Strict decimal: non-empty, ASCII digits only. Rejects signs, whitespace,
/// hex, and the empty string, all of which `str::parse` alone would not.
fn parse_decimal(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
