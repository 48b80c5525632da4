//! Upload engines: disk-staged chunked, pipe-streamed ranged, and the
//! single-shot fallback for small files.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::{Duration, UNIX_EPOCH};

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use sluice_hash::HashAlgo;
use sluice_protocol::{
    ApiResponse, ChunkUploadData, ContentRange, MergeRequest, StreamChunkData, TaskData,
    TaskInfo, UploadSettings, CHUNK_CRC32_HEADER, FILE_PATH_HEADER, LAST_MODIFIED_HEADER,
    OVERWRITE_HEADER,
};

use crate::fingerprint::{upload_fingerprint, FINGERPRINT_WINDOW};
use crate::progress::{emit_progress, UploadProgressEvent};
use crate::retry::{retry_request, retry_request_with, UPLOAD_ATTEMPTS};
use crate::speed::SpeedTracker;
use crate::splitter::{FileSlices, Slice};

/// Fallback chunk size when the server's settings are unreachable.
pub const DEFAULT_CHUNK_SIZE: u64 = 95 * 1024 * 1024;

const TASK_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub type Result<T> = std::result::Result<T, UploadError>;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(Box<ureq::Error>),

    #[error("server rejected request ({code}): {message}")]
    Server { code: u16, message: String },

    #[error("upload aborted: {0}")]
    Aborted(String),
}

impl From<ureq::Error> for UploadError {
    fn from(e: ureq::Error) -> Self {
        match e {
            ureq::Error::Status(code, resp) => {
                // Error responses carry the envelope; prefer its message.
                let message = resp
                    .into_string()
                    .ok()
                    .and_then(|body| {
                        serde_json::from_str::<ApiResponse<serde_json::Value>>(&body).ok()
                    })
                    .map(|envelope| envelope.message)
                    .unwrap_or_else(|| format!("HTTP {code}"));
                UploadError::Server { code, message }
            }
            other => UploadError::Http(Box::new(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum UploadMode {
    /// Chunked when the file exceeds the server's chunk size, else direct.
    Auto,
    /// Disk-staged chunk engine with a merge step.
    Chunked,
    /// Pipe-streamed ranged engine; the server never touches disk.
    Stream,
}

pub struct UploadRequest {
    pub file: PathBuf,
    pub dest: String,
    pub overwrite: bool,
    pub mode: UploadMode,
    pub chunk_size: Option<u64>,
}

pub struct UploadClient {
    agent: ureq::Agent,
    base_url: String,
    token: String,
}

enum MergeOutcome {
    Hashes(std::collections::BTreeMap<String, String>),
    Task(TaskInfo),
}

impl UploadClient {
    pub fn new(base_url: &str, token: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(30))
            .timeout_read(Duration::from_secs(300))
            .timeout_write(Duration::from_secs(300))
            .build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn authed(&self, req: ureq::Request) -> ureq::Request {
        req.set("Authorization", &format!("Bearer {}", self.token))
    }

    /// Drive one upload end to end, reporting progress to the observer.
    pub fn upload(
        &self,
        req: &UploadRequest,
        mut progress: Option<&mut dyn FnMut(UploadProgressEvent)>,
    ) -> Result<()> {
        let meta = std::fs::metadata(&req.file)?;
        if !meta.is_file() {
            return Err(UploadError::Aborted(format!(
                "'{}' is not a regular file",
                req.file.display()
            )));
        }
        let size = meta.len();
        let last_modified = mtime_millis(&meta);
        let chunk_size = req
            .chunk_size
            .unwrap_or_else(|| self.advertised_chunk_size(req.mode));

        match req.mode {
            UploadMode::Stream => {
                self.upload_streamed(req, size, last_modified, chunk_size, &mut progress)
            }
            UploadMode::Chunked => {
                self.upload_chunked(req, size, last_modified, chunk_size, &mut progress)
            }
            UploadMode::Auto => {
                if size > chunk_size {
                    self.upload_chunked(req, size, last_modified, chunk_size, &mut progress)
                } else {
                    self.upload_single(req, size, last_modified, &mut progress)
                }
            }
        }
    }

    /// Chunk size from the server's settings, falling back to the default
    /// when the endpoint is unreachable.
    fn advertised_chunk_size(&self, mode: UploadMode) -> u64 {
        let url = format!("{}/settings", self.base_url);
        let settings: Option<UploadSettings> = self
            .agent
            .get(&url)
            .call()
            .ok()
            .and_then(|resp| parse_envelope(resp).ok());
        match settings {
            Some(settings) => {
                let mib = match mode {
                    UploadMode::Stream => settings.stream_upload_chunk_size,
                    _ => settings.chunked_upload_chunk_size,
                };
                mib.max(1) * 1024 * 1024
            }
            None => {
                warn!("could not read server settings; using default chunk size");
                DEFAULT_CHUNK_SIZE
            }
        }
    }

    // ── Disk-staged chunked engine ────────────────────────────────────────

    fn upload_chunked(
        &self,
        req: &UploadRequest,
        size: u64,
        last_modified: i64,
        chunk_size: u64,
        progress: &mut Option<&mut dyn FnMut(UploadProgressEvent)>,
    ) -> Result<()> {
        if size == 0 {
            return self.upload_single(req, size, last_modified, progress);
        }

        let slices = FileSlices::new(size, chunk_size);
        let chunk_count = slices.count();

        let mut file = File::open(&req.file)?;
        let window = if size < FINGERPRINT_WINDOW as u64 {
            size as usize
        } else {
            FINGERPRINT_WINDOW
        };
        let mut head = vec![0u8; window];
        file.read_exact(&mut head)?;
        let upload_id = upload_fingerprint(&req.dest, size, &head);

        // Whole-file digest runs beside the upload; awaited before the merge.
        let hash_thread = spawn_file_xxh64(req.file.clone());

        emit_progress(
            progress,
            UploadProgressEvent::Started {
                total_size: size,
                chunk_count,
            },
        );
        info!(
            upload_id = %upload_id,
            size,
            chunks = chunk_count,
            "starting chunked upload"
        );

        let mut speed = SpeedTracker::new();
        let mut uploaded = 0u64;
        for slice in slices.iter() {
            let data = read_slice(&mut file, slice)?;
            let crc32 = slice_crc32(&data);
            self.put_chunk(&upload_id, slice.index, &data, &crc32)
                .map_err(|e| {
                    UploadError::Aborted(format!(
                        "chunk {} failed after {UPLOAD_ATTEMPTS} attempts: {e}",
                        slice.index
                    ))
                })?;

            uploaded += slice.len;
            speed.on_bytes(slice.len);
            emit_progress(
                progress,
                UploadProgressEvent::ChunkUploaded {
                    index: slice.index,
                    uploaded_bytes: uploaded,
                    instant_bps: speed.instant_bps(),
                    average_bps: speed.average_bps(),
                },
            );
            debug!(index = slice.index, len = slice.len, "chunk uploaded");
        }

        let local_hash = match hash_thread.join() {
            Ok(Ok(hash)) => hash,
            Ok(Err(e)) => {
                warn!("whole-file hash failed: {e}; merging without verification");
                String::new()
            }
            Err(_) => {
                warn!("hash worker panicked; merging without verification");
                String::new()
            }
        };

        emit_progress(progress, UploadProgressEvent::MergeStarted);
        let outcome = self.merge(&MergeRequest {
            upload_id,
            path: req.dest.clone(),
            total_chunks: chunk_count,
            as_task: true,
            overwrite: req.overwrite,
            last_modified,
            hash: local_hash.clone(),
        })?;

        match outcome {
            MergeOutcome::Hashes(hashes) => {
                // The server already enforced the digest; a mismatch here
                // would mean it lied, so log loudly but do not fail the
                // completed upload.
                if let Some(remote) = hashes.get(HashAlgo::Xxh64.name()) {
                    if !local_hash.is_empty() && *remote != local_hash {
                        error!(
                            client = %local_hash,
                            server = %remote,
                            "server-reported hash does not match local digest"
                        );
                    }
                }
            }
            MergeOutcome::Task(task) => {
                info!(task = %task.id, "merge running on the server");
                self.wait_for_task(&task.id)?;
            }
        }

        emit_progress(
            progress,
            UploadProgressEvent::Finished {
                total_size: size,
                average_bps: speed.average_bps(),
            },
        );
        Ok(())
    }

    fn put_chunk(
        &self,
        upload_id: &str,
        index: u64,
        data: &[u8],
        crc32: &str,
    ) -> Result<ChunkUploadData> {
        let boundary = multipart_boundary();
        let body = multipart_file_body(&boundary, data);
        let content_type = format!("multipart/form-data; boundary={boundary}");
        let url = format!(
            "{}/fs/put/chunk?upload_id={upload_id}&index={index}",
            self.base_url
        );

        // Any failure is worth the flat attempt budget: corruption in
        // transit comes back as a CRC-mismatch 400 and resending is the fix.
        let resp = retry_request_with("chunk upload", |_| true, || {
            self.authed(self.agent.put(&url))
                .set("Content-Type", &content_type)
                .set(CHUNK_CRC32_HEADER, crc32)
                .send_bytes(&body)
        })?;
        parse_envelope(resp)
    }

    fn merge(&self, req: &MergeRequest) -> Result<MergeOutcome> {
        let url = format!("{}/fs/put/chunk/merge", self.base_url);
        let resp = self
            .authed(self.agent.post(&url))
            .send_json(req.clone())?;
        let data: serde_json::Value = parse_envelope(resp)?;

        if let Some(hashes) = data.get("hash") {
            let hashes = serde_json::from_value(hashes.clone())
                .map_err(|e| UploadError::Aborted(format!("malformed merge response: {e}")))?;
            return Ok(MergeOutcome::Hashes(hashes));
        }
        if let Some(task) = data.get("task") {
            let task = serde_json::from_value(task.clone())
                .map_err(|e| UploadError::Aborted(format!("malformed merge response: {e}")))?;
            return Ok(MergeOutcome::Task(task));
        }
        Err(UploadError::Aborted(
            "merge response carried neither hashes nor a task".into(),
        ))
    }

    /// Poll the task endpoint until the background merge lands.
    fn wait_for_task(&self, task_id: &str) -> Result<()> {
        loop {
            let task = self.task_status(task_id)?;
            match task.status.as_str() {
                "processing" => std::thread::sleep(TASK_POLL_INTERVAL),
                "succeeded" => return Ok(()),
                "failed" => {
                    return Err(UploadError::Aborted(format!(
                        "server-side merge failed: {}",
                        task.message
                    )))
                }
                other => {
                    return Err(UploadError::Aborted(format!(
                        "unknown task status '{other}'"
                    )))
                }
            }
        }
    }

    pub fn task_status(&self, task_id: &str) -> Result<TaskInfo> {
        let url = format!("{}/fs/task?id={task_id}", self.base_url);
        let resp = self.authed(self.agent.get(&url)).call()?;
        let data: TaskData = parse_envelope(resp)?;
        Ok(data.task)
    }

    // ── Pipe-streamed ranged engine ───────────────────────────────────────

    fn upload_streamed(
        &self,
        req: &UploadRequest,
        size: u64,
        last_modified: i64,
        chunk_size: u64,
        progress: &mut Option<&mut dyn FnMut(UploadProgressEvent)>,
    ) -> Result<()> {
        if size == 0 {
            // A ranged PUT cannot express zero bytes.
            return self.upload_single(req, size, last_modified, progress);
        }

        let slices = FileSlices::new(size, chunk_size);
        emit_progress(
            progress,
            UploadProgressEvent::Started {
                total_size: size,
                chunk_count: slices.count(),
            },
        );
        info!(size, chunks = slices.count(), "starting ranged stream upload");

        let encoded_path = encode_file_path(&req.dest);
        let url = format!("{}/fs/put", self.base_url);
        let last_modified_value = last_modified.to_string();

        let mut file = File::open(&req.file)?;
        let mut speed = SpeedTracker::new();
        let mut last_response: Option<StreamChunkData> = None;

        for slice in slices.iter() {
            let data = read_slice(&mut file, slice)?;
            let range = ContentRange {
                start: slice.offset,
                end: slice.offset + slice.len - 1,
                total: size,
            };
            let range_value = range.to_string();

            let resp = retry_request("stream chunk", || {
                let mut http = self
                    .authed(self.agent.put(&url))
                    .set(FILE_PATH_HEADER, &encoded_path)
                    .set("Content-Range", &range_value)
                    .set("Content-Type", "application/octet-stream")
                    .set(LAST_MODIFIED_HEADER, &last_modified_value);
                if !req.overwrite {
                    http = http.set(OVERWRITE_HEADER, "false");
                }
                http.send_bytes(&data)
            })
            .map_err(|e| {
                UploadError::Aborted(format!(
                    "range starting at {} failed after {UPLOAD_ATTEMPTS} attempts: {e}",
                    slice.offset
                ))
            })?;
            let chunk: StreamChunkData = parse_envelope(resp)?;

            speed.on_bytes(slice.len);
            emit_progress(
                progress,
                UploadProgressEvent::ChunkUploaded {
                    index: slice.index,
                    uploaded_bytes: chunk.received,
                    instant_bps: speed.instant_bps(),
                    average_bps: speed.average_bps(),
                },
            );
            last_response = Some(chunk);
        }

        match last_response {
            Some(chunk) if chunk.complete => {}
            _ => {
                return Err(UploadError::Aborted(
                    "server never acknowledged the final range".into(),
                ))
            }
        }

        emit_progress(
            progress,
            UploadProgressEvent::Finished {
                total_size: size,
                average_bps: speed.average_bps(),
            },
        );
        Ok(())
    }

    // ── Single-shot fallback ──────────────────────────────────────────────

    fn upload_single(
        &self,
        req: &UploadRequest,
        size: u64,
        last_modified: i64,
        progress: &mut Option<&mut dyn FnMut(UploadProgressEvent)>,
    ) -> Result<()> {
        emit_progress(
            progress,
            UploadProgressEvent::Started {
                total_size: size,
                chunk_count: 1,
            },
        );
        info!(size, "starting direct upload");

        let data = std::fs::read(&req.file)?;
        let encoded_path = encode_file_path(&req.dest);
        let url = format!("{}/fs/put", self.base_url);
        let last_modified_value = last_modified.to_string();

        let mut speed = SpeedTracker::new();
        let resp = retry_request("direct upload", || {
            let mut http = self
                .authed(self.agent.put(&url))
                .set(FILE_PATH_HEADER, &encoded_path)
                .set(LAST_MODIFIED_HEADER, &last_modified_value);
            if !req.overwrite {
                http = http.set(OVERWRITE_HEADER, "false");
            }
            http.send_bytes(&data)
        })?;
        check_envelope(resp)?;

        speed.on_bytes(size);
        emit_progress(
            progress,
            UploadProgressEvent::ChunkUploaded {
                index: 0,
                uploaded_bytes: size,
                instant_bps: speed.instant_bps(),
                average_bps: speed.average_bps(),
            },
        );
        emit_progress(
            progress,
            UploadProgressEvent::Finished {
                total_size: size,
                average_bps: speed.average_bps(),
            },
        );
        Ok(())
    }
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn parse_envelope<T: DeserializeOwned>(resp: ureq::Response) -> Result<T> {
    let envelope: ApiResponse<T> = resp.into_json()?;
    if !envelope.is_success() {
        return Err(UploadError::Server {
            code: envelope.code,
            message: envelope.message,
        });
    }
    envelope.data.ok_or_else(|| UploadError::Server {
        code: 200,
        message: "response carried no data".into(),
    })
}

fn check_envelope(resp: ureq::Response) -> Result<()> {
    let envelope: ApiResponse<serde_json::Value> = resp.into_json()?;
    if !envelope.is_success() {
        return Err(UploadError::Server {
            code: envelope.code,
            message: envelope.message,
        });
    }
    Ok(())
}

fn read_slice(file: &mut File, slice: Slice) -> std::io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(slice.offset))?;
    let mut data = vec![0u8; slice.len as usize];
    file.read_exact(&mut data)?;
    Ok(data)
}

fn slice_crc32(data: &[u8]) -> String {
    let mut digest = HashAlgo::Crc32.hasher();
    digest.update(data);
    digest.finish()
}

/// Stream the whole file through XXH64 on a side thread, yielding between
/// reads so the uploading thread keeps the scheduler.
fn spawn_file_xxh64(path: PathBuf) -> std::thread::JoinHandle<std::io::Result<String>> {
    std::thread::spawn(move || {
        let mut file = File::open(path)?;
        let mut digest = HashAlgo::Xxh64.hasher();
        let mut buf = vec![0u8; 1024 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            digest.update(&buf[..n]);
            std::thread::yield_now();
        }
        Ok(digest.finish())
    })
}

fn encode_file_path(path: &str) -> String {
    utf8_percent_encode(path, NON_ALPHANUMERIC).to_string()
}

fn mtime_millis(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn multipart_boundary() -> String {
    format!(
        "sluice{:016x}{:016x}",
        rand::random::<u64>(),
        rand::random::<u64>()
    )
}

fn multipart_file_body(boundary: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + 256);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"chunk\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn read_slice_returns_exact_ranges() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();
        let mut file = File::open(tmp.path()).unwrap();

        let slices = FileSlices::new(10, 4);
        let parts: Vec<Vec<u8>> = slices
            .iter()
            .map(|s| read_slice(&mut file, s).unwrap())
            .collect();
        assert_eq!(parts, vec![b"0123".to_vec(), b"4567".to_vec(), b"89".to_vec()]);
    }

    #[test]
    fn slice_crc32_matches_known_vector() {
        assert_eq!(slice_crc32(b"123456789"), "cbf43926");
    }

    #[test]
    fn hash_worker_digests_the_whole_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello\n").unwrap();
        let hash = spawn_file_xxh64(tmp.path().to_path_buf())
            .join()
            .unwrap()
            .unwrap();
        assert_eq!(hash, "26c7827d889f6da3");
    }

    #[test]
    fn parse_envelope_success_and_error() {
        let ok = ureq::Response::new(
            200,
            "OK",
            r#"{"code":200,"message":"success","data":{"crc32":"cbf43926"}}"#,
        )
        .unwrap();
        let data: ChunkUploadData = parse_envelope(ok).unwrap();
        assert_eq!(data.crc32, "cbf43926");

        let failed = ureq::Response::new(
            200,
            "OK",
            r#"{"code":400,"message":"chunk 2 not found","data":null}"#,
        )
        .unwrap();
        let err = parse_envelope::<ChunkUploadData>(failed).unwrap_err();
        match err {
            UploadError::Server { code, message } => {
                assert_eq!(code, 400);
                assert!(message.contains("chunk 2 not found"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn multipart_body_wraps_payload() {
        let body = multipart_file_body("bbb", b"DATA");
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with("--bbb\r\n"));
        assert!(text.contains("name=\"file\""));
        assert!(text.contains("DATA"));
        assert!(text.ends_with("--bbb--\r\n"));
    }

    #[test]
    fn file_path_encoding_survives_spaces_and_unicode() {
        let encoded = encode_file_path("/dir with space/fü.bin");
        assert!(!encoded.contains(' '));
        assert!(encoded.contains("%20"));
        // The server percent-decodes; nothing may pass through raw.
        assert!(encoded.is_ascii());
    }
}
