//! Small filesystem primitives shared by the upload and burn paths.

use pyre_core::StorageLayout;
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Write `data` to `path` atomically.
///
/// The bytes go to a uniquely named sibling first, are fsynced, then renamed
/// over `path`, so readers never observe a partial file.
pub async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{file_name}.tmp.{}", Uuid::new_v4().simple()));

    let written = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await
    }
    .await;

    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }
    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }
    Ok(())
}

/// Remove a file. Returns false when it was already gone.
pub async fn remove_file_if_exists(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remove a directory tree. Returns false when it was already gone.
pub async fn remove_dir_if_exists(path: &Path) -> std::io::Result<bool> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Create the metadata, temp-chunk and final-upload roots.
pub async fn ensure_directories(layout: &StorageLayout) -> std::io::Result<()> {
    for dir in [layout.data_dir(), layout.temp_dir(), layout.final_dir()] {
        fs::create_dir_all(dir).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_atomic_replaces_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");

        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn write_atomic_fails_without_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("doc.json");
        assert!(write_atomic(&path, b"x").await.is_err());
    }

    #[tokio::test]
    async fn removals_report_whether_anything_existed() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        let tree = dir.path().join("t");
        std::fs::write(&file, b"x").unwrap();
        std::fs::create_dir_all(tree.join("nested")).unwrap();

        assert!(remove_file_if_exists(&file).await.unwrap());
        assert!(!remove_file_if_exists(&file).await.unwrap());
        assert!(remove_dir_if_exists(&tree).await.unwrap());
        assert!(!remove_dir_if_exists(&tree).await.unwrap());
    }

    #[tokio::test]
    async fn ensure_directories_creates_roots() {
        let dir = tempfile::tempdir().unwrap();
        let layout =
            StorageLayout::new(&pyre_core::config::StorageConfig::rooted_at(dir.path()));
        ensure_directories(&layout).await.unwrap();
        ensure_directories(&layout).await.unwrap();

        assert!(layout.data_dir().is_dir());
        assert!(layout.temp_dir().is_dir());
        assert!(layout.final_dir().is_dir());
    }
}
