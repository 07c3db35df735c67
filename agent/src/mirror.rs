//! Dwell log replication into a mirror directory (e.g. a mounted share).

use async_trait::async_trait;
use lanegate_core::dwell_log::write_sorted_copy;
use lanegate_env::{EnvError, LogReplicator};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Mirrors the dwell log into `dir`, sorted by date, arrival and exit.
pub struct DirectoryReplicator {
    dir: PathBuf,
}

impl DirectoryReplicator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl LogReplicator for DirectoryReplicator {
    async fn replicate(&self, path: &Path) -> Result<(), EnvError> {
        let file_name = path
            .file_name()
            .ok_or_else(|| EnvError::replication(format!("{} is not a file", path.display())))?;
        let src = path.to_path_buf();
        let dst = self.dir.join(file_name);
        let dir = self.dir.clone();

        let rows = tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&dir).map_err(|e| EnvError::replication(e.to_string()))?;
            write_sorted_copy(&src, &dst).map_err(|e| EnvError::replication(e.to_string()))
        })
        .await
        .map_err(|e| EnvError::replication(e.to_string()))??;

        debug!("Mirrored {} dwell rows to {}", rows, self.dir.display());
        Ok(())
    }
}
