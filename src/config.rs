use crate::ADDR;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Settings for the watermark service. Every field has a default, so a config
/// file only needs the keys it changes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceConfig {
    pub bind_addr: String,
    /// Codec jobs allowed to run at the same time.
    pub max_concurrent_jobs: usize,
    /// Largest frame (header or image) accepted from a client.
    pub max_frame_bytes: u64,
    /// Socket send/receive buffer size; 0 keeps the OS default.
    pub socket_buffer_bytes: usize,
    /// Time a client gets to send its whole request.
    pub read_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: ADDR.to_string(),
            max_concurrent_jobs: 4,
            max_frame_bytes: 64 * 1024 * 1024,
            socket_buffer_bytes: 8 * 1024 * 1024, // 8MB buffer
            read_timeout_ms: 30_000,
        }
    }
}

impl ServiceConfig {
    /// Reads a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config '{}'", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("parsing config '{}'", path.display()))?;
        Ok(config)
    }
}
