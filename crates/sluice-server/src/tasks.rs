//! In-memory registry of background finalize jobs.
//!
//! Async merges hand the caller a task id before the work runs; this registry
//! is what makes that id real: the detached worker records its terminal state
//! here and `GET /fs/task` reads it back.

use dashmap::DashMap;

use sluice_protocol::TaskInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Processing,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Processing => "processing",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        }
    }
}

#[derive(Default)]
pub struct TaskRegistry {
    map: DashMap<String, (TaskStatus, String)>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, id: &str, message: &str) {
        self.map
            .insert(id.to_string(), (TaskStatus::Processing, message.to_string()));
    }

    pub fn succeed(&self, id: &str, message: &str) {
        self.map
            .insert(id.to_string(), (TaskStatus::Succeeded, message.to_string()));
    }

    pub fn fail(&self, id: &str, message: &str) {
        self.map
            .insert(id.to_string(), (TaskStatus::Failed, message.to_string()));
    }

    pub fn get(&self, id: &str) -> Option<TaskInfo> {
        self.map.get(id).map(|entry| {
            let (status, message) = entry.value();
            TaskInfo {
                id: id.to_string(),
                status: status.as_str().to_string(),
                message: message.clone(),
            }
        })
    }
}
