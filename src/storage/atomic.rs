//! Crash-safe file replacement: write a sibling temp file, sync it, rename it
//! over the target. Readers only ever see the old bytes or the new bytes.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;

/// A fully written and synced temp file waiting to replace its target.
#[derive(Debug)]
pub(crate) struct StagedWrite {
    temp_path: PathBuf,
    target: PathBuf,
}

impl StagedWrite {
    #[cfg(test)]
    pub(crate) fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Renames the temp file over the target. On failure the temp file is
    /// removed and the target is left as it was.
    pub(crate) async fn commit(self) -> io::Result<()> {
        if let Err(e) = tokio::fs::rename(&self.temp_path, &self.target).await {
            let _ = tokio::fs::remove_file(&self.temp_path).await;
            return Err(e);
        }
        Ok(())
    }

    /// Drops the staged bytes without touching the target.
    #[cfg(test)]
    pub(crate) async fn discard(self) -> io::Result<()> {
        tokio::fs::remove_file(&self.temp_path).await
    }
}

/// Writes `bytes` to a fresh temp file next to `target` and syncs it.
///
/// The temp name is randomized and opened with `create_new`, so a leftover
/// file or a planted symlink makes this fail instead of being followed.
pub(crate) async fn stage(target: &Path, bytes: &[u8]) -> io::Result<StagedWrite> {
    let temp_path = temp_path_for(target);

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .await?;

    let written = async {
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    drop(file);

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }

    Ok(StagedWrite {
        temp_path,
        target: target.to_path_buf(),
    })
}

/// Atomically replaces `target` with `bytes`.
pub(crate) async fn write_atomic(target: &Path, bytes: &[u8]) -> io::Result<()> {
    stage(target, bytes).await?.commit().await
}

/// `.<name>.tmp.<nanos>` in the target's own directory, so the final rename
/// never crosses a filesystem boundary.
fn temp_path_for(target: &Path) -> PathBuf {
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "feed".to_string());
    let dir = target.parent().unwrap_or_else(|| Path::new(""));
    dir.join(format!(".{name}.tmp.{random_suffix:016x}"))
}
