//! Backing-store driver seam.
//!
//! The upload engines never talk to storage directly; they hand a finished
//! byte stream to a [`StoreDriver`]. `put` consumes the stream's reader to
//! the end and returns only once the object is durable; its errors bubble to
//! callers unchanged.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter};

use sluice_hash::HashView;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// One object on its way into the backing store.
pub struct IngestStream {
    pub name: String,
    /// Declared size in bytes; -1 when unknown.
    pub size: i64,
    pub modified: DateTime<Utc>,
    pub mimetype: String,
    /// Pre-flight whole-file hash hints; may be empty.
    pub hashes: HashView,
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

#[async_trait]
pub trait StoreDriver: Send + Sync {
    /// Store `stream` as `<dir>/<stream.name>`, blocking until durable.
    async fn put(&self, dir: &str, stream: IngestStream) -> io::Result<()>;

    /// Whether an object exists at the given virtual path.
    async fn exists(&self, path: &str) -> io::Result<bool>;
}

/// Join a virtual directory and base name into a virtual path.
pub fn join_virtual(dir: &str, name: &str) -> String {
    let dir = dir.trim_matches('/');
    if dir.is_empty() {
        format!("/{name}")
    } else {
        format!("/{dir}/{name}")
    }
}

/// Local-filesystem driver. Streams the body to a hidden temp file and
/// renames into place, so a crashed upload never leaves a half-written
/// object under its final name.
pub struct LocalDriver {
    root: PathBuf,
}

impl LocalDriver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            self.root.clone()
        } else {
            self.root.join(trimmed)
        }
    }
}

#[async_trait]
impl StoreDriver for LocalDriver {
    async fn put(&self, dir: &str, mut stream: IngestStream) -> io::Result<()> {
        let dir_path = self.resolve(dir);
        tokio::fs::create_dir_all(&dir_path).await?;

        let unique = TEMP_COUNTER.fetch_add(1, Relaxed);
        let temp_path = dir_path.join(format!(".tmp.{}.{unique}", stream.name));
        let final_path = dir_path.join(&stream.name);

        let file = tokio::fs::File::create(&temp_path).await?;
        let mut writer = BufWriter::new(file);
        let mut written: i64 = 0;
        let mut buf = vec![0u8; 256 * 1024];

        let copy_result: io::Result<()> = async {
            loop {
                let n = stream.reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                written += n as i64;
                writer.write_all(&buf[..n]).await?;
            }
            writer.flush().await?;
            Ok(())
        }
        .await;

        // Close the handle before any cleanup or rename.
        drop(writer);

        if let Err(e) = copy_result {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }

        if stream.size >= 0 && written != stream.size {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(io::Error::other(format!(
                "short object body for '{}': declared {} bytes, received {written}",
                stream.name, stream.size
            )));
        }

        if let Err(e) = tokio::fs::rename(&temp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }

        tracing::debug!(
            path = %final_path.display(),
            size = written,
            mimetype = %stream.mimetype,
            "object stored"
        );
        Ok(())
    }

    async fn exists(&self, path: &str) -> io::Result<bool> {
        match tokio::fs::metadata(self.resolve(path)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! Recording in-memory driver for handler tests.

    use std::sync::atomic::AtomicBool;

    use dashmap::DashMap;

    use super::*;

    pub struct StoredObject {
        pub data: Vec<u8>,
        pub declared_size: i64,
        pub mimetype: String,
        pub modified: DateTime<Utc>,
    }

    #[derive(Default)]
    pub struct MemDriver {
        pub objects: DashMap<String, StoredObject>,
        pub put_calls: AtomicU64,
        /// When set, `put` fails before consuming any of the stream,
        /// simulating a backing store dying mid-upload.
        pub fail_puts: AtomicBool,
    }

    impl MemDriver {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn object(&self, path: &str) -> Option<Vec<u8>> {
            self.objects.get(path).map(|o| o.data.clone())
        }
    }

    #[async_trait]
    impl StoreDriver for MemDriver {
        async fn put(&self, dir: &str, mut stream: IngestStream) -> io::Result<()> {
            self.put_calls.fetch_add(1, Relaxed);
            if self.fail_puts.load(Relaxed) {
                return Err(io::Error::other("backing store unavailable"));
            }
            let mut data = Vec::new();
            stream.reader.read_to_end(&mut data).await?;
            if stream.size >= 0 && data.len() as i64 != stream.size {
                return Err(io::Error::other("short object body"));
            }
            self.objects.insert(
                join_virtual(dir, &stream.name),
                StoredObject {
                    data,
                    declared_size: stream.size,
                    mimetype: stream.mimetype,
                    modified: stream.modified,
                },
            );
            Ok(())
        }

        async fn exists(&self, path: &str) -> io::Result<bool> {
            Ok(self.objects.contains_key(path))
        }
    }
}
