use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::{error, info};

use sluice_hash::{HashAlgo, HashView, MultiHasher};
use sluice_protocol::{MergeData, MergeRequest, TaskData, TaskInfo};

use crate::driver::{IngestStream, StoreDriver};
use crate::error::ServerError;
use crate::response::success;
use crate::state::{split_path, validate_upload_id, AppState};

/// POST /fs/put/chunk/merge — concatenate staged slices in ascending index
/// order, verify the whole-file hash, and hand the object to the backing
/// store. With `as_task` the work runs on a detached worker and the request
/// returns immediately with a pollable task id.
pub async fn merge_chunks(
    State(state): State<AppState>,
    Json(req): Json<MergeRequest>,
) -> Result<Response, ServerError> {
    validate_upload_id(&req.upload_id)?;
    if req.total_chunks == 0 {
        return Err(ServerError::BadRequest(
            "total_chunks must be positive".into(),
        ));
    }

    let path = state.inner.user.join_path(&req.path)?;
    if !req.overwrite && state.driver().exists(&path).await.unwrap_or(false) {
        return Err(ServerError::Forbidden("file exists".into()));
    }

    let staging = state.staging_dir(&req.upload_id);

    // Cheap stat pass before any heavy I/O.
    for i in 0..req.total_chunks {
        match tokio::fs::metadata(staging.join(i.to_string())).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ServerError::BadRequest(format!("chunk {i} not found")));
            }
            Err(e) => return Err(ServerError::from(e)),
        }
    }

    let (dir, name) = split_path(&path);
    if state.should_ignore_system_file(name) {
        let _ = tokio::fs::remove_dir_all(&staging).await;
        return Err(ServerError::Forbidden("ignored system file".into()));
    }

    let modified = if req.last_modified > 0 {
        Utc.timestamp_millis_opt(req.last_modified)
            .single()
            .unwrap_or_else(Utc::now)
    } else {
        Utc::now()
    };

    let job = MergeJob {
        staging,
        total_chunks: req.total_chunks,
        client_hash: req.hash.clone(),
        dir: dir.to_string(),
        name: name.to_string(),
        modified,
    };

    if req.as_task {
        let task_id = format!("merge-{}", req.upload_id);
        state
            .inner
            .tasks
            .begin(&task_id, "merge running in background");

        // Detached scope: the merge must outlive this request, which is
        // about to be answered and cancelled. Everything the worker needs
        // was copied into `job`.
        let driver = state.driver();
        let worker_state = state.clone();
        let worker_task_id = task_id.clone();
        tokio::spawn(async move {
            info!(task = %worker_task_id, name = %job.name, "starting background merge");
            match run_merge(driver, &job, true).await {
                Ok(_) => {
                    worker_state
                        .inner
                        .tasks
                        .succeed(&worker_task_id, "object stored");
                }
                Err(e) => {
                    error!(task = %worker_task_id, error = %e, "background merge failed");
                    worker_state.inner.tasks.fail(&worker_task_id, &e.to_string());
                }
            }
        });

        return Ok(success(TaskData {
            task: TaskInfo {
                id: task_id,
                status: "processing".to_string(),
                message: "merge started in background; poll /fs/task for progress".to_string(),
            },
        }));
    }

    let hashes = run_merge(state.driver(), &job, false).await?;
    Ok(success(MergeData {
        hash: hashes.into_inner(),
    }))
}

struct MergeJob {
    staging: PathBuf,
    total_chunks: u64,
    client_hash: String,
    dir: String,
    name: String,
    modified: DateTime<Utc>,
}

/// Concatenate, verify, store.
///
/// Cleanup is deliberately asymmetric: before the driver hand-off, I/O
/// errors leave staging in place so the client can retry the merge. A hash
/// mismatch removes only the merged scratch file inline, but removes the
/// whole staging area on the detached path, where a retry would re-pay the
/// full merge cost. From the driver hand-off on, staging is removed on
/// every exit.
async fn run_merge(
    driver: Arc<dyn StoreDriver>,
    job: &MergeJob,
    remove_staging_on_mismatch: bool,
) -> Result<HashView, ServerError> {
    let merged_path = job.staging.join("merged");
    // Merge-stage I/O failures are Internal no matter the error kind: a
    // chunk that vanished between the stat pass and this open (a concurrent
    // merge already cleaned the staging area) must not surface as NotFound.
    let (total_size, hashes) = concat_chunks(&job.staging, &merged_path, job.total_chunks)
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))?;

    if !job.client_hash.is_empty() {
        let server_hash = hashes.get(HashAlgo::Xxh64).unwrap_or("");
        if server_hash != job.client_hash {
            let server_hash = server_hash.to_string();
            if remove_staging_on_mismatch {
                let _ = tokio::fs::remove_dir_all(&job.staging).await;
            } else {
                let _ = tokio::fs::remove_file(&merged_path).await;
            }
            return Err(ServerError::BadRequest(format!(
                "hash mismatch: client={}, server={server_hash}",
                job.client_hash
            )));
        }
    }

    let merged = tokio::fs::File::open(&merged_path)
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    let stream = IngestStream {
        name: job.name.clone(),
        size: total_size as i64,
        modified: job.modified,
        mimetype: mime_guess::from_path(&job.name)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
        hashes: HashView::new(),
        reader: Box::new(merged),
    };

    let put_result = driver.put(&job.dir, stream).await;
    let _ = tokio::fs::remove_dir_all(&job.staging).await;
    put_result.map_err(|e| ServerError::Internal(e.to_string()))?;

    info!(name = %job.name, size = total_size, "merged upload stored");
    Ok(hashes)
}

/// Single read loop feeding a tee: the merged scratch file and the
/// whole-file digests advance in lockstep. Plain `io::Result` so the caller
/// owns the status mapping.
async fn concat_chunks(
    staging: &Path,
    merged_path: &Path,
    total_chunks: u64,
) -> std::io::Result<(u64, HashView)> {
    let merged = tokio::fs::File::create(merged_path).await?;
    let mut writer = BufWriter::new(merged);
    let mut hasher = MultiHasher::new(&[HashAlgo::Xxh64, HashAlgo::Crc64]);
    let mut total_size: u64 = 0;
    let mut buf = vec![0u8; 256 * 1024];

    for i in 0..total_chunks {
        let mut chunk = tokio::fs::File::open(staging.join(i.to_string())).await?;
        loop {
            let n = chunk.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            writer.write_all(&buf[..n]).await?;
            total_size += n as u64;
        }
    }
    writer.flush().await?;
    Ok((total_size, hasher.finish()))
}

#[derive(Deserialize, Default)]
pub struct TaskQuery {
    pub id: Option<String>,
}

/// GET /fs/task?id=… — status of a background finalize job.
pub async fn task_info(
    State(state): State<AppState>,
    Query(query): Query<TaskQuery>,
) -> Result<Response, ServerError> {
    let id = query
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ServerError::BadRequest("id is required".into()))?;
    match state.inner.tasks.get(&id) {
        Some(task) => Ok(success(TaskData { task })),
        None => Err(ServerError::NotFound(format!("task '{id}' not found"))),
    }
}
