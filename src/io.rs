//! Content storage: read a source document, write a converted one.
//!
//! Runners only talk to a [`ContentStore`]; the bundled [`LocalFileStore`]
//! maps locations to file-system paths. Writes go to a sibling temp file that
//! is renamed into place, so a crashed or aborted run never leaves a truncated
//! output that a later `--resume` would mistake for a finished one.

use crate::error::PipelineError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Read/write primitives over opaque location strings.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn read_all(&self, location: &str) -> Result<Vec<u8>, PipelineError>;

    async fn write(&self, location: &str, data: &[u8]) -> Result<(), PipelineError>;

    async fn exists(&self, location: &str) -> bool;
}

/// [`ContentStore`] backed by the local file system.
#[derive(Debug, Clone, Default)]
pub struct LocalFileStore;

impl LocalFileStore {
    pub fn new() -> Self {
        Self
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[async_trait]
impl ContentStore for LocalFileStore {
    async fn read_all(&self, location: &str) -> Result<Vec<u8>, PipelineError> {
        tokio::fs::read(location)
            .await
            .map_err(|source| PipelineError::ReadFailed {
                location: location.to_string(),
                source,
            })
    }

    async fn write(&self, location: &str, data: &[u8]) -> Result<(), PipelineError> {
        let path = Path::new(location);
        let write_err = |source| PipelineError::WriteFailed {
            location: location.to_string(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let tmp_path = tmp_path_for(path);
        tokio::fs::write(&tmp_path, data).await.map_err(write_err)?;
        tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
        debug!("wrote {} bytes to {}", data.len(), location);
        Ok(())
    }

    async fn exists(&self, location: &str) -> bool {
        tokio::fs::try_exists(location).await.unwrap_or(false)
    }
}

/// Human-readable byte size, e.g. `1.2 KB`.
pub fn format_size(bytes: usize) -> String {
    const UNITS: &[&str] = &["bytes", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} bytes");
    }
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}
