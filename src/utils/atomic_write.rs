//! Atomic file replacement: write-tmp-then-rename.
//!
//! Required wherever the spec calls for atomic publication (the proxy pool
//! file, §4.2.4/§8, and checkpoints, §4.4.6). `sandboxed_file_manager`'s
//! `SandboxedManager::write` is a plain `tokio::fs::write` with no tmp/rename
//! step, so it cannot satisfy the "readers see prior-or-new, never partial"
//! invariant on its own; this helper is used directly via `tokio::fs` instead.

use std::path::Path;

use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Writes `contents` to `path` by first writing to a sibling `.tmp` file and
/// then renaming it into place. A `rename` within the same filesystem is
/// atomic, so a concurrent reader either sees the previous complete file or
/// the new complete file, never a partial write.
pub async fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let tmp_path = tmp_path_for(path);
    {
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
    }
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("tmp");
    path.with_file_name(format!(".{file_name}.tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_and_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");

        atomic_write(&path, b"first").await.unwrap();
        assert_eq!(fs::read(&path).await.unwrap(), b"first");

        atomic_write(&path, b"second-generation").await.unwrap();
        assert_eq!(fs::read(&path).await.unwrap(), b"second-generation");

        assert!(!tmp_path_for(&path).exists());
    }

    #[tokio::test]
    async fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deep/data.json");

        atomic_write(&path, b"content").await.unwrap();
        assert_eq!(fs::read(&path).await.unwrap(), b"content");
    }
}
