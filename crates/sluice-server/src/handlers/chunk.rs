use std::path::Path;

use axum::extract::{Multipart, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};

use sluice_hash::HashAlgo;
use sluice_protocol::{ChunkUploadData, CHUNK_CRC32_HEADER};

use crate::error::ServerError;
use crate::response::success;
use crate::state::{validate_upload_id, AppState};

#[derive(Deserialize, Default)]
pub struct ChunkQuery {
    pub upload_id: Option<String>,
    pub index: Option<String>,
}

/// PUT /fs/put/chunk?upload_id=…&index=… — persist one slice into the
/// upload's staging area and verify it against the client CRC-32.
///
/// Slices are independent and idempotent: re-uploading an index overwrites
/// the staged file and re-verifies it.
pub async fn put_chunk(
    State(state): State<AppState>,
    Query(query): Query<ChunkQuery>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, ServerError> {
    let (upload_id, index_str) = match (&query.upload_id, &query.index) {
        (Some(id), Some(index)) if !id.is_empty() => (id.as_str(), index.as_str()),
        _ => {
            return Err(ServerError::BadRequest(
                "upload_id and index are required".into(),
            ))
        }
    };
    validate_upload_id(upload_id)?;
    let index: u64 = index_str
        .parse()
        .map_err(|_| ServerError::BadRequest(format!("invalid chunk index '{index_str}'")))?;

    let expected_crc32 = headers
        .get(CHUNK_CRC32_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned);

    let staging = state.staging_dir(upload_id);
    tokio::fs::create_dir_all(&staging).await?;
    let chunk_path = staging.join(index.to_string());

    save_file_part(&mut multipart, &chunk_path).await?;

    // Digest what actually hit the disk, not what was seen in flight.
    let actual_crc32 = crc32_of_file(&chunk_path).await?;

    if let Some(expected) = expected_crc32 {
        if actual_crc32 != expected {
            let _ = tokio::fs::remove_file(&chunk_path).await;
            return Err(ServerError::BadRequest(format!(
                "chunk CRC32 mismatch: client={expected}, server={actual_crc32}"
            )));
        }
    }

    Ok(success(ChunkUploadData {
        crc32: actual_crc32,
    }))
}

/// Stream the multipart `file` part to `path`. A body that dies mid-part
/// removes the partial file so a later merge cannot pick it up.
async fn save_file_part(multipart: &mut Multipart, path: &Path) -> Result<(), ServerError> {
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
        let copy_result: Result<(), ServerError> = async {
            while let Some(bytes) = field.chunk().await.map_err(|e| {
                ServerError::BadRequest(format!("truncated multipart body: {e}"))
            })? {
                writer.write_all(&bytes).await?;
            }
            writer.flush().await?;
            Ok(())
        }
        .await;
        drop(writer);

        if let Err(e) = copy_result {
            let _ = tokio::fs::remove_file(path).await;
            return Err(e);
        }
        return Ok(());
    }
    Err(ServerError::BadRequest("missing 'file' part".into()))
}

pub(crate) async fn crc32_of_file(path: &Path) -> Result<String, ServerError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut digest = HashAlgo::Crc32.hasher();
    let mut buf = vec![0u8; 256 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        digest.update(&buf[..n]);
    }
    Ok(digest.finish())
}
