use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Multipart, State};
use axum::http::{header, HeaderMap};
use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::TryStreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::sync::oneshot;
use tokio_util::io::StreamReader;
use tracing::{error, info};

use sluice_hash::{HashAlgo, HashView};
use sluice_protocol::{
    ContentRange, StreamChunkData, TaskData, TaskInfo, AS_TASK_HEADER, FILE_MD5_HEADER,
    FILE_PATH_HEADER, FILE_SHA1_HEADER, FILE_SHA256_HEADER, FILE_SIZE_HEADER,
    LAST_MODIFIED_HEADER, OVERWRITE_HEADER,
};

use crate::driver::IngestStream;
use crate::error::ServerError;
use crate::pipe::{pipe, PipeWriter, PIPE_CAPACITY};
use crate::response::{success, success_empty};
use crate::session::{session_key, StreamSession};
use crate::state::{split_path, AppState};

static SPOOL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// PUT /fs/put — ranged stream chunk when `Content-Range` is present,
/// single-shot direct put otherwise.
pub async fn put_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ServerError> {
    if let Some(range_header) = header_str(&headers, header::CONTENT_RANGE.as_str()) {
        let range = ContentRange::parse(range_header)
            .map_err(|e| ServerError::BadRequest(e.to_string()))?;
        put_ranged(state, &headers, range, body).await
    } else {
        put_direct(state, &headers, body).await
    }
}

/// One ranged chunk of a pipe-streamed upload.
///
/// The range starting at offset 0 opens the session: a bounded pipe whose
/// read end is consumed by a dedicated store-driver task. Every request body
/// is copied straight into the write end, so ingress is paced by the store's
/// egress and per-session memory never exceeds the pipe buffer.
async fn put_ranged(
    state: AppState,
    headers: &HeaderMap,
    range: ContentRange,
    body: Body,
) -> Result<Response, ServerError> {
    let path = file_path_header(headers)?;
    let overwrite = overwrite_header(headers);
    let path = state.inner.user.join_path(&path)?;
    let (dir, name) = split_path(&path);
    if state.should_ignore_system_file(name) {
        return Err(ServerError::Forbidden("ignored system file".into()));
    }

    let key = session_key(state.inner.user.id, &path, range.total);

    if range.start == 0 {
        if !overwrite && state.driver().exists(&path).await.unwrap_or(false) {
            return Err(ServerError::Forbidden("file exists".into()));
        }

        // A restart from offset 0 supersedes any live session for the key;
        // fail its pipe so the old driver task cannot store a truncated
        // object on what would look like a clean EOF.
        if let Some(stale) = state.inner.sessions.get(&key) {
            stale.abort.close_with_error("superseded by a new session");
            if let Ok(mut stale_io) = stale.io.try_lock() {
                if let Some(writer) = stale_io.writer.take() {
                    writer.close_with_error("superseded by a new session");
                }
            }
        }

        let (writer, reader, abort) = pipe(PIPE_CAPACITY);
        let (done_tx, done_rx) = oneshot::channel();
        let stream = IngestStream {
            name: name.to_string(),
            size: range.total as i64,
            modified: last_modified_header(headers),
            mimetype: mimetype_for(headers, name),
            hashes: HashView::new(),
            reader: Box::new(reader),
        };

        // Sole reader of the pipe; lives until the store accepts or rejects
        // the whole object.
        let driver = state.driver();
        let dir_owned = dir.to_string();
        tokio::spawn(async move {
            let result = driver.put(&dir_owned, stream).await;
            let _ = done_tx.send(result);
        });

        state.inner.sessions.insert(
            key.clone(),
            Arc::new(StreamSession::new(range.total, writer, abort, done_rx)),
        );
        info!(path = %path, total = range.total, "stream session opened");
    }

    let Some(session) = state.inner.sessions.get(&key) else {
        return Err(ServerError::BadRequest(
            "upload session not found, please start from first chunk".into(),
        ));
    };
    session.touch();

    // Sole writer for the duration of the copy: overlapping requests for
    // the same session queue here instead of interleaving bytes.
    let mut session_io = session.io.lock().await;
    let copy_result = match session_io.writer.as_mut() {
        Some(writer) => copy_body_to_pipe(body, writer).await,
        None => {
            return Err(ServerError::BadRequest(
                "upload session not found, please start from first chunk".into(),
            ))
        }
    };

    let written = match copy_result {
        Ok(written) if session_io.received + written <= session.total_size => written,
        Ok(written) => {
            let received = session_io.received + written;
            let total = session.total_size;
            teardown(
                &state,
                &key,
                &mut session_io,
                format!("received {received} bytes of a declared {total}"),
            );
            return Err(ServerError::BadRequest(format!(
                "received more bytes than declared: {received} > {total}"
            )));
        }
        Err(e) => {
            // The copy fails when the body dies, the sweeper aborts the
            // pipe, or the driver gives up mid-object. Prefer reporting the
            // driver's own error when it already finished.
            let driver_error = match session_io.done.take() {
                Some(mut rx) => match rx.try_recv() {
                    Ok(Err(derr)) => Some(derr.to_string()),
                    _ => None,
                },
                None => None,
            };
            teardown(&state, &key, &mut session_io, e.to_string());
            return Err(ServerError::Internal(
                driver_error.unwrap_or_else(|| e.to_string()),
            ));
        }
    };

    session_io.received += written;
    let received = session_io.received;
    let total = session.total_size;
    let complete = received >= total;

    if complete {
        let writer = session_io.writer.take();
        let done = session_io.done.take();
        drop(session_io);

        if let Some(writer) = writer {
            if let Err(e) = writer.close().await {
                state.inner.sessions.remove(&key);
                return Err(ServerError::Internal(e.to_string()));
            }
        }
        let driver_result = match done {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| Err(io::Error::other("store worker vanished"))),
            None => Ok(()),
        };
        state.inner.sessions.remove(&key);
        driver_result.map_err(|e| ServerError::Internal(e.to_string()))?;
        info!(path = %path, size = total, "stream upload complete");
    } else {
        drop(session_io);
    }

    Ok(success(StreamChunkData {
        received,
        total,
        complete,
    }))
}

fn teardown(
    state: &AppState,
    key: &str,
    session_io: &mut crate::session::SessionIo,
    reason: String,
) {
    if let Some(writer) = session_io.writer.take() {
        writer.close_with_error(reason);
    }
    state.inner.sessions.remove(key);
}

async fn copy_body_to_pipe(body: Body, writer: &mut PipeWriter) -> io::Result<u64> {
    let stream = TryStreamExt::map_err(body.into_data_stream(), io::Error::other);
    let mut reader = StreamReader::new(stream);
    let mut written = 0u64;
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        written += n as u64;
    }
    Ok(written)
}

/// Single-shot direct put: the whole object in one request body.
async fn put_direct(
    state: AppState,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, ServerError> {
    let path = file_path_header(headers)?;
    let as_task = header_str(headers, AS_TASK_HEADER) == Some("true");
    let overwrite = overwrite_header(headers);
    let path = state.inner.user.join_path(&path)?;
    if !overwrite && state.driver().exists(&path).await.unwrap_or(false) {
        return Err(ServerError::Forbidden("file exists".into()));
    }
    let (dir, name) = split_path(&path);
    if state.should_ignore_system_file(name) {
        return Err(ServerError::Forbidden("ignored system file".into()));
    }

    // Content-Length, else the explicit size header, else unknown (-1).
    let mut size: i64 = header_str(headers, header::CONTENT_LENGTH.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(-1);
    if size < 0 {
        if let Some(s) = header_str(headers, FILE_SIZE_HEADER) {
            size = s.parse().map_err(|_| {
                ServerError::BadRequest(format!("invalid {FILE_SIZE_HEADER} '{s}'"))
            })?;
        }
    }

    let stream = IngestStream {
        name: name.to_string(),
        size,
        modified: last_modified_header(headers),
        mimetype: mimetype_for(headers, name),
        hashes: hash_hint_headers(headers),
        reader: Box::new(StreamReader::new(TryStreamExt::map_err(
            body.into_data_stream(),
            io::Error::other,
        ))),
    };

    if as_task {
        return put_as_task(state, dir.to_string(), stream).await;
    }

    state
        .driver()
        .put(dir, stream)
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    info!(path = %path, "direct upload stored");
    Ok(success_empty())
}

/// PUT /fs/form — single-shot multipart put (legacy browser surface).
pub async fn put_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, ServerError> {
    let path = file_path_header(&headers)?;
    let as_task = header_str(&headers, AS_TASK_HEADER) == Some("true");
    let overwrite = overwrite_header(&headers);
    let path = state.inner.user.join_path(&path)?;
    if !overwrite && state.driver().exists(&path).await.unwrap_or(false) {
        return Err(ServerError::Forbidden("file exists".into()));
    }
    let (dir, name) = split_path(&path);
    if state.should_ignore_system_file(name) {
        return Err(ServerError::Forbidden("ignored system file".into()));
    }

    // Multipart bodies carry no usable length up front; spool to disk to
    // learn the size before the driver sees the stream.
    let spool = spool_path(&state).await?;
    let size = match spool_file_part(&mut multipart, &spool).await {
        Ok(size) => size,
        Err(e) => {
            let _ = tokio::fs::remove_file(&spool).await;
            return Err(e);
        }
    };

    let file = match tokio::fs::File::open(&spool).await {
        Ok(file) => file,
        Err(e) => {
            let _ = tokio::fs::remove_file(&spool).await;
            return Err(ServerError::from(e));
        }
    };
    let stream = IngestStream {
        name: name.to_string(),
        size: size as i64,
        modified: last_modified_header(&headers),
        mimetype: mimetype_for(&headers, name),
        hashes: hash_hint_headers(&headers),
        reader: Box::new(file),
    };

    if as_task {
        let response = put_as_task_spooled(state, dir.to_string(), stream, spool);
        return response.await;
    }

    let put_result = state.driver().put(dir, stream).await;
    let _ = tokio::fs::remove_file(&spool).await;
    put_result.map_err(|e| ServerError::Internal(e.to_string()))?;
    info!(path = %path, size, "form upload stored");
    Ok(success_empty())
}

/// Queue a direct put: spool the body first so the detached worker does not
/// outlive the request body it reads from.
async fn put_as_task(
    state: AppState,
    dir: String,
    mut stream: IngestStream,
) -> Result<Response, ServerError> {
    let spool = spool_path(&state).await?;
    let spooled = match spool_reader(&mut stream.reader, &spool).await {
        Ok(size) => size,
        Err(e) => {
            let _ = tokio::fs::remove_file(&spool).await;
            return Err(ServerError::from(e));
        }
    };
    if stream.size < 0 {
        stream.size = spooled as i64;
    }
    let file = match tokio::fs::File::open(&spool).await {
        Ok(file) => file,
        Err(e) => {
            let _ = tokio::fs::remove_file(&spool).await;
            return Err(ServerError::from(e));
        }
    };
    stream.reader = Box::new(file);
    put_as_task_spooled(state, dir, stream, spool).await
}

/// Run the driver hand-off on a detached worker, reading from an on-disk
/// spool file, and answer immediately with a pollable task id.
async fn put_as_task_spooled(
    state: AppState,
    dir: String,
    stream: IngestStream,
    spool: PathBuf,
) -> Result<Response, ServerError> {
    let task_id = format!("put-{}", SPOOL_COUNTER.fetch_add(1, Relaxed));
    state.inner.tasks.begin(&task_id, "upload queued");

    let driver = state.driver();
    let worker_state = state.clone();
    let worker_task_id = task_id.clone();
    let name = stream.name.clone();
    tokio::spawn(async move {
        info!(task = %worker_task_id, name = %name, "starting queued upload");
        let result = driver.put(&dir, stream).await;
        let _ = tokio::fs::remove_file(&spool).await;
        match result {
            Ok(()) => worker_state
                .inner
                .tasks
                .succeed(&worker_task_id, "object stored"),
            Err(e) => {
                error!(task = %worker_task_id, error = %e, "queued upload failed");
                worker_state.inner.tasks.fail(&worker_task_id, &e.to_string());
            }
        }
    });

    Ok(success(TaskData {
        task: TaskInfo {
            id: task_id,
            status: "processing".to_string(),
            message: "upload queued; poll /fs/task for progress".to_string(),
        },
    }))
}

async fn spool_path(state: &AppState) -> Result<PathBuf, ServerError> {
    let dir = PathBuf::from(&state.inner.config.temp_dir).join("spool");
    tokio::fs::create_dir_all(&dir).await?;
    Ok(dir.join(SPOOL_COUNTER.fetch_add(1, Relaxed).to_string()))
}

async fn spool_reader(
    reader: &mut (dyn AsyncRead + Send + Unpin),
    path: &PathBuf,
) -> io::Result<u64> {
    let file = tokio::fs::File::create(path).await?;
    let mut writer = BufWriter::new(file);
    let mut size = 0u64;
    let mut buf = vec![0u8; 256 * 1024];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        size += n as u64;
    }
    writer.flush().await?;
    Ok(size)
}

/// Stream the multipart `file` part into `path`; returns its size.
async fn spool_file_part(multipart: &mut Multipart, path: &PathBuf) -> Result<u64, ServerError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file = tokio::fs::File::create(path).await?;
        let mut writer = BufWriter::new(file);
        let mut size = 0u64;
        while let Some(bytes) = field
            .chunk()
            .await
            .map_err(|e| ServerError::BadRequest(format!("truncated multipart body: {e}")))?
        {
            writer.write_all(&bytes).await?;
            size += bytes.len() as u64;
        }
        writer.flush().await?;
        return Ok(size);
    }
    Err(ServerError::BadRequest("missing 'file' part".into()))
}

// ── Header helpers ─────────────────────────────────────────────────────────

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn file_path_header(headers: &HeaderMap) -> Result<String, ServerError> {
    let raw = header_str(headers, FILE_PATH_HEADER)
        .ok_or_else(|| ServerError::BadRequest("File-Path header is required".into()))?;
    percent_encoding::percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| ServerError::BadRequest(format!("invalid File-Path encoding: {e}")))
}

fn overwrite_header(headers: &HeaderMap) -> bool {
    header_str(headers, OVERWRITE_HEADER) != Some("false")
}

fn last_modified_header(headers: &HeaderMap) -> DateTime<Utc> {
    header_str(headers, LAST_MODIFIED_HEADER)
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

fn mimetype_for(headers: &HeaderMap, name: &str) -> String {
    match header_str(headers, header::CONTENT_TYPE.as_str()) {
        Some(ct) if !ct.is_empty() && ct != "application/octet-stream" => ct.to_string(),
        _ => mime_guess::from_path(name)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

fn hash_hint_headers(headers: &HeaderMap) -> HashView {
    let mut hashes = HashView::new();
    for (algo, header_name) in [
        (HashAlgo::Md5, FILE_MD5_HEADER),
        (HashAlgo::Sha1, FILE_SHA1_HEADER),
        (HashAlgo::Sha256, FILE_SHA256_HEADER),
    ] {
        if let Some(value) = header_str(headers, header_name) {
            if !value.is_empty() {
                hashes.insert(algo, value.to_ascii_lowercase());
            }
        }
    }
    hashes
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering::Relaxed;
    use std::time::Duration;

    use axum::http::StatusCode;

    use sluice_protocol::ContentRange;

    use super::super::test_helpers::*;

    fn range_header(start: u64, end: u64, total: u64) -> String {
        ContentRange { start, end, total }.to_string()
    }

    async fn put_range(
        router: axum::Router,
        path: &str,
        start: u64,
        total: u64,
        data: &[u8],
    ) -> axum::response::Response {
        let end = start + data.len() as u64 - 1;
        request(
            router,
            "PUT",
            "/fs/put",
            &[
                ("File-Path", path),
                ("Content-Range", &range_header(start, end, total)),
                ("Content-Type", "application/octet-stream"),
            ],
            data.to_vec(),
        )
        .await
    }

    #[tokio::test]
    async fn ranged_stream_happy_path() {
        let (router, state, driver, _tmp) = setup_app();
        let data: Vec<u8> = (0..3000u32).map(|i| (i % 13) as u8).collect();
        let total = data.len() as u64;

        let resp = put_range(router.clone(), "/big.bin", 0, total, &data[..1000]).await;
        assert_status(&resp, StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["data"]["received"], 1000);
        assert_eq!(json["data"]["complete"], false);

        let resp = put_range(router.clone(), "/big.bin", 1000, total, &data[1000..2000]).await;
        assert_status(&resp, StatusCode::OK);

        let resp = put_range(router, "/big.bin", 2000, total, &data[2000..]).await;
        assert_status(&resp, StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["data"]["complete"], true);
        assert_eq!(json["data"]["received"], total);

        assert_eq!(driver.object("/big.bin").unwrap(), data);
        assert_eq!(driver.put_calls.load(Relaxed), 1);
        assert!(state.inner.sessions.is_empty());
    }

    #[tokio::test]
    async fn nonzero_start_without_session_rejected() {
        let (router, _state, driver, _tmp) = setup_app();
        let resp = put_range(router, "/orphan.bin", 500, 1000, &[1u8; 100]).await;
        assert_status(&resp, StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert!(json["message"]
            .as_str()
            .unwrap()
            .contains("please start from first chunk"));
        assert_eq!(driver.put_calls.load(Relaxed), 0);
    }

    #[tokio::test]
    async fn malformed_content_range_rejected() {
        let (router, _state, _driver, _tmp) = setup_app();
        let resp = request(
            router,
            "PUT",
            "/fs/put",
            &[
                ("File-Path", "/x.bin"),
                ("Content-Range", "bytes=0-99/1000"),
            ],
            vec![0u8; 100],
        )
        .await;
        assert_status(&resp, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn swept_session_fails_driver_and_next_chunk() {
        let (router, state, driver, _tmp) = setup_app();
        let data = vec![2u8; 400];

        let resp = put_range(router.clone(), "/stale.bin", 0, 1000, &data).await;
        assert_status(&resp, StatusCode::OK);
        assert_eq!(state.inner.sessions.len(), 1);

        // Evict everything currently idle, as the sweeper would after the
        // session timeout.
        assert_eq!(state.inner.sessions.sweep(Duration::ZERO), 1);
        assert!(state.inner.sessions.is_empty());

        let resp = put_range(router, "/stale.bin", 400, 1000, &[2u8; 100]).await;
        assert_status(&resp, StatusCode::BAD_REQUEST);

        // The driver task observed the timeout error and stored nothing.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while driver.put_calls.load(Relaxed) == 0 {
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(driver.object("/stale.bin").is_none());
    }

    #[tokio::test]
    async fn overwrite_guard_on_first_range() {
        let (router, _state, driver, _tmp) = setup_app();
        seed_object(&driver, "/taken.bin", b"old");

        let resp = request(
            router,
            "PUT",
            "/fs/put",
            &[
                ("File-Path", "/taken.bin"),
                ("Content-Range", &range_header(0, 99, 1000)),
                ("Overwrite", "false"),
            ],
            vec![0u8; 100],
        )
        .await;
        assert_status(&resp, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn driver_failure_surfaces_to_completing_request() {
        let (router, state, driver, _tmp) = setup_app();
        driver.fail_puts.store(true, Relaxed);

        let data = vec![5u8; 256];
        let resp = put_range(router, "/doomed.bin", 0, 256, &data).await;
        assert_status(&resp, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(state.inner.sessions.is_empty());
        assert!(driver.object("/doomed.bin").is_none());
    }

    #[tokio::test]
    async fn overlong_body_tears_session_down() {
        let (router, state, _driver, _tmp) = setup_app();
        // Declare 100 bytes total but send 150 in the first range.
        let resp = request(
            router,
            "PUT",
            "/fs/put",
            &[
                ("File-Path", "/liar.bin"),
                ("Content-Range", &range_header(0, 99, 100)),
            ],
            vec![1u8; 150],
        )
        .await;
        assert_status(&resp, StatusCode::BAD_REQUEST);
        assert!(state.inner.sessions.is_empty());
    }

    #[tokio::test]
    async fn direct_put_stores_body() {
        let (router, _state, driver, _tmp) = setup_app();
        let resp = request(
            router,
            "PUT",
            "/fs/put",
            &[
                ("File-Path", "/notes/hello.txt"),
                ("Last-Modified", "1700000000000"),
            ],
            b"hello\n".to_vec(),
        )
        .await;
        assert_status(&resp, StatusCode::OK);

        assert_eq!(driver.object("/notes/hello.txt").unwrap(), b"hello\n");
        let object = driver.objects.get("/notes/hello.txt").unwrap();
        assert_eq!(object.mimetype, "text/plain");
        assert_eq!(object.declared_size, 6);
        assert_eq!(object.modified.timestamp_millis(), 1_700_000_000_000);
    }

    #[tokio::test]
    async fn direct_put_percent_decodes_path() {
        let (router, _state, driver, _tmp) = setup_app();
        let resp = request(
            router,
            "PUT",
            "/fs/put",
            &[("File-Path", "/dir%20with%20space/f%C3%BC.bin")],
            vec![9u8; 3],
        )
        .await;
        assert_status(&resp, StatusCode::OK);
        assert!(driver.object("/dir with space/fü.bin").is_some());
    }

    #[tokio::test]
    async fn direct_put_as_task_completes_in_background() {
        let (router, state, driver, _tmp) = setup_app();
        let data = vec![8u8; 5000];
        let resp = request(
            router.clone(),
            "PUT",
            "/fs/put",
            &[("File-Path", "/queued.bin"), ("As-Task", "true")],
            data.clone(),
        )
        .await;
        assert_status(&resp, StatusCode::OK);
        let json = body_json(resp).await;
        let task_id = json["data"]["task"]["id"].as_str().unwrap().to_string();

        // Wait for the detached worker's terminal status, then check the
        // object it stored.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            match state.inner.tasks.get(&task_id) {
                Some(task) if task.status == "succeeded" => break,
                Some(task) => assert_ne!(task.status, "failed", "{}", task.message),
                None => {}
            }
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(driver.object("/queued.bin").unwrap(), data);

        let resp = request(router, "GET", &format!("/fs/task?id={task_id}"), &[], Vec::new()).await;
        let json = body_json(resp).await;
        assert_eq!(json["data"]["task"]["status"], "succeeded");
    }

    #[tokio::test]
    async fn form_put_stores_file_part() {
        let (router, _state, driver, _tmp) = setup_app();
        let data = b"form payload".to_vec();
        let resp = request(
            router,
            "PUT",
            "/fs/form",
            &[
                ("File-Path", "/form.bin"),
                ("Content-Type", &multipart_content_type()),
            ],
            multipart_file_body(&data),
        )
        .await;
        assert_status(&resp, StatusCode::OK);
        assert_eq!(driver.object("/form.bin").unwrap(), data);
    }

    #[tokio::test]
    async fn system_file_rejected_when_policy_active() {
        let (router, _state, _driver, _tmp) = setup_app_with(|config| {
            config.ignore_system_files = true;
        });
        let resp = request(
            router,
            "PUT",
            "/fs/put",
            &[("File-Path", "/photos/.DS_Store")],
            vec![0u8; 10],
        )
        .await;
        assert_status(&resp, StatusCode::FORBIDDEN);
    }
}
