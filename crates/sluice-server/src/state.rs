use std::path::PathBuf;
use std::sync::Arc;

use crate::config::ServerSection;
use crate::driver::StoreDriver;
use crate::error::ServerError;
use crate::session::SessionRegistry;
use crate::tasks::TaskRegistry;

/// Shared application state, wrapped in Arc for axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<AppStateInner>,
}

pub struct AppStateInner {
    pub config: ServerSection,
    pub driver: Arc<dyn StoreDriver>,
    /// Active pipe-streamed upload sessions.
    pub sessions: SessionRegistry,
    /// Background finalize jobs.
    pub tasks: TaskRegistry,
    pub user: User,
}

impl AppState {
    pub fn new(config: ServerSection, driver: Arc<dyn StoreDriver>) -> Self {
        let user = User {
            id: 1,
            base_path: config.base_path.clone(),
        };
        Self {
            inner: Arc::new(AppStateInner {
                config,
                driver,
                sessions: SessionRegistry::new(),
                tasks: TaskRegistry::new(),
                user,
            }),
        }
    }

    pub fn driver(&self) -> Arc<dyn StoreDriver> {
        Arc::clone(&self.inner.driver)
    }

    /// Staging area for one disk-staged upload.
    pub fn staging_dir(&self, upload_id: &str) -> PathBuf {
        PathBuf::from(&self.inner.config.temp_dir)
            .join("chunks")
            .join(upload_id)
    }

    pub fn should_ignore_system_file(&self, name: &str) -> bool {
        self.inner.config.ignore_system_files && is_system_file(name)
    }
}

/// The authenticated identity: an id for session keys and a virtual root
/// that every request path is jailed under.
pub struct User {
    pub id: u64,
    pub base_path: String,
}

impl User {
    /// Join a request path under the user's root. Traversal out of the root
    /// is a policy violation, not a malformed request.
    pub fn join_path(&self, path: &str) -> Result<String, ServerError> {
        if path.contains('\0') || path.contains('\\') {
            return Err(ServerError::Forbidden("invalid path".into()));
        }
        let mut parts: Vec<&str> = Vec::new();
        for segment in self.base_path.split('/').chain(path.split('/')) {
            match segment {
                "" | "." => continue,
                ".." => {
                    return Err(ServerError::Forbidden("path escapes user root".into()));
                }
                other => parts.push(other),
            }
        }
        if parts.is_empty() {
            return Err(ServerError::BadRequest("empty path".into()));
        }
        Ok(format!("/{}", parts.join("/")))
    }
}

/// Split a joined virtual path into (parent dir, base name).
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((dir, name)) => (dir, name),
        None => ("/", path),
    }
}

const SYSTEM_FILE_NAMES: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini"];

/// OS metadata files rejected when the ignore-system-files policy is active.
pub fn is_system_file(name: &str) -> bool {
    SYSTEM_FILE_NAMES.contains(&name) || name.starts_with("._")
}

/// Upload ids arrive from clients and name staging directories. Restrict
/// them to the fingerprint alphabet (base64 with `+/=` folded to `_`) so an
/// id can never walk out of the staging root.
pub fn validate_upload_id(upload_id: &str) -> Result<(), ServerError> {
    let valid = !upload_id.is_empty()
        && upload_id.len() <= 255
        && upload_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(ServerError::BadRequest("invalid upload_id".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: 1,
            base_path: "/".to_string(),
        }
    }

    #[test]
    fn join_path_normalizes() {
        let u = user();
        assert_eq!(u.join_path("/videos/raw.mkv").unwrap(), "/videos/raw.mkv");
        assert_eq!(u.join_path("videos//raw.mkv").unwrap(), "/videos/raw.mkv");
        assert_eq!(u.join_path("./a/./b").unwrap(), "/a/b");
    }

    #[test]
    fn join_path_applies_base() {
        let u = User {
            id: 7,
            base_path: "/tenants/acme".to_string(),
        };
        assert_eq!(u.join_path("/in.bin").unwrap(), "/tenants/acme/in.bin");
    }

    #[test]
    fn join_path_rejects_escape() {
        let u = user();
        assert!(matches!(
            u.join_path("/../etc/passwd"),
            Err(ServerError::Forbidden(_))
        ));
        assert!(matches!(
            u.join_path("a/../../b"),
            Err(ServerError::Forbidden(_))
        ));
        assert!(matches!(u.join_path("a\\b"), Err(ServerError::Forbidden(_))));
        assert!(matches!(u.join_path("/"), Err(ServerError::BadRequest(_))));
    }

    #[test]
    fn split_path_cases() {
        assert_eq!(split_path("/videos/raw.mkv"), ("/videos", "raw.mkv"));
        assert_eq!(split_path("/raw.mkv"), ("/", "raw.mkv"));
        assert_eq!(split_path("/a/b/c"), ("/a/b", "c"));
    }

    #[test]
    fn system_file_detection() {
        assert!(is_system_file(".DS_Store"));
        assert!(is_system_file("._resource"));
        assert!(is_system_file("Thumbs.db"));
        assert!(!is_system_file("notes.txt"));
    }

    #[test]
    fn upload_id_validation() {
        assert!(validate_upload_id("aGVsbG8_d29ybGQ_").is_ok());
        assert!(validate_upload_id("").is_err());
        assert!(validate_upload_id("../escape").is_err());
        assert!(validate_upload_id("a/b").is_err());
    }
}
