use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Address to listen on.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Root directory of the local backing store.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Directory for per-upload chunk staging areas.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: String,

    /// Shared bearer token for authentication.
    pub token: String,

    /// Virtual root all request paths are jailed under.
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Log output format: "json" or "pretty".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Chunk size advertised for disk-staged uploads, in MiB.
    #[serde(default = "default_chunk_size")]
    pub chunked_upload_chunk_size: u64,

    /// Chunk size advertised for pipe-streamed uploads, in MiB.
    #[serde(default = "default_chunk_size")]
    pub stream_upload_chunk_size: u64,

    /// Reject uploads of OS metadata files (.DS_Store and friends).
    #[serde(default)]
    pub ignore_system_files: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            data_dir: default_data_dir(),
            temp_dir: default_temp_dir(),
            token: String::new(),
            base_path: default_base_path(),
            log_format: default_log_format(),
            chunked_upload_chunk_size: default_chunk_size(),
            stream_upload_chunk_size: default_chunk_size(),
            ignore_system_files: false,
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8686".to_string()
}

fn default_data_dir() -> String {
    "/var/lib/sluice/data".to_string()
}

fn default_temp_dir() -> String {
    "/var/lib/sluice/temp".to_string()
}

fn default_base_path() -> String {
    "/".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_chunk_size() -> u64 {
    95
}
