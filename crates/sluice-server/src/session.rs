//! In-memory registry of pipe-streamed upload sessions.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::pipe::{PipeAbort, PipeWriter};

/// Sessions idle longer than this are evicted by the sweeper.
pub const STREAM_SESSION_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// How often the sweeper wakes.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Abort reason an evicted session's pipe carries.
pub const SESSION_TIMEOUT_ERROR: &str = "session timeout";

/// One session per (user, path, declared size) at any time.
pub fn session_key(user_id: u64, path: &str, total_size: u64) -> String {
    format!("stream:{user_id}:{path}:{total_size}")
}

/// State of one pipe-streamed upload.
///
/// The write end lives behind an async mutex: overlapping requests for the
/// same session serialize on it for the whole body copy, so bytes cannot
/// interleave. The abort handle is outside the mutex so the sweeper can fail
/// the pipe even while a write is in flight.
pub struct StreamSession {
    pub total_size: u64,
    pub abort: PipeAbort,
    pub io: tokio::sync::Mutex<SessionIo>,
    last_active: Mutex<Instant>,
}

pub struct SessionIo {
    /// Taken (and dropped) exactly once, on completion or teardown.
    pub writer: Option<PipeWriter>,
    /// Bytes accepted so far; monotonically increasing, never above total.
    pub received: u64,
    /// Terminal result of the driver task; consumed by the completing request.
    pub done: Option<oneshot::Receiver<io::Result<()>>>,
}

impl StreamSession {
    pub fn new(
        total_size: u64,
        writer: PipeWriter,
        abort: PipeAbort,
        done: oneshot::Receiver<io::Result<()>>,
    ) -> Self {
        Self {
            total_size,
            abort,
            io: tokio::sync::Mutex::new(SessionIo {
                writer: Some(writer),
                received: 0,
                done: Some(done),
            }),
            last_active: Mutex::new(Instant::now()),
        }
    }

    pub fn touch(&self) {
        *lock_unpoisoned(&self.last_active) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        lock_unpoisoned(&self.last_active).elapsed()
    }
}

fn lock_unpoisoned<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Concurrent map of active sessions keyed by [`session_key`].
#[derive(Default)]
pub struct SessionRegistry {
    map: DashMap<String, Arc<StreamSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: String, session: Arc<StreamSession>) {
        self.map.insert(key, session);
    }

    pub fn get(&self, key: &str) -> Option<Arc<StreamSession>> {
        self.map.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, key: &str) {
        self.map.remove(key);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Evict every session idle strictly longer than `timeout`. Returns the
    /// number evicted.
    pub fn sweep(&self, timeout: Duration) -> usize {
        // Collect first: failing pipes under a shard lock could deadlock
        // against a handler that holds a session and touches the map.
        let expired: Vec<(String, Arc<StreamSession>)> = self
            .map
            .iter()
            .filter(|entry| entry.value().idle_for() > timeout)
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut evicted = 0;
        for (key, session) in expired {
            session.abort.close_with_error(SESSION_TIMEOUT_ERROR);
            // If no write is in flight, drop the write end so a reader blocked
            // on an empty pipe wakes. If one is in flight, the abort above
            // already failed it and the handler tears the pipe down itself.
            if let Ok(mut io) = session.io.try_lock() {
                if let Some(writer) = io.writer.take() {
                    writer.close_with_error(SESSION_TIMEOUT_ERROR);
                }
            }
            // A handler may have deleted and re-created the key concurrently;
            // only remove the entry this sweep decided to evict.
            self.map
                .remove_if(&key, |_, current| Arc::ptr_eq(current, &session));
            evicted += 1;
        }
        evicted
    }
}
