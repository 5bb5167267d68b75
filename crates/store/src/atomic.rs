//! Write-then-rename persistence
//!
//! A file is replaced by writing a sibling `*.tmp`, flushing it to disk,
//! renaming it over the target and flushing the parent directory. After a
//! crash the target holds either the old or the new bytes, never a mix.

use rbk_errors::{Error, StorageError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub(crate) const TMP_SUFFIX: &str = "tmp";

/// Sibling temp path used while replacing `path`
pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(TMP_SUFFIX);
    path.with_file_name(name)
}

pub(crate) fn is_tmp(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == TMP_SUFFIX)
}

/// Atomically replace `path` with `bytes`
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let tmp = tmp_path(path);

    let mut file = fs::File::create(&tmp)
        .await
        .map_err(|e| StorageError::from_io_with_path(&e, &tmp))?;
    file.write_all(bytes)
        .await
        .map_err(|e| StorageError::from_io_with_path(&e, &tmp))?;
    file.sync_all()
        .await
        .map_err(|e| StorageError::from_io_with_path(&e, &tmp))?;
    drop(file);

    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(StorageError::AtomicRenameFailed {
            message: format!("{} -> {}: {e}", tmp.display(), path.display()),
        }
        .into());
    }

    sync_parent(path).await
}

/// Remove `path` durably; a missing file is not an error
pub(crate) async fn remove_durable(path: &Path) -> Result<bool, Error> {
    match fs::remove_file(path).await {
        Ok(()) => {
            sync_parent(path).await?;
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::from_io_with_path(&e, path).into()),
    }
}

/// Rename `from` to `to` and flush both directories
pub(crate) async fn move_durable(from: &Path, to: &Path) -> Result<(), Error> {
    fs::rename(from, to)
        .await
        .map_err(|e| StorageError::AtomicRenameFailed {
            message: format!("{} -> {}: {e}", from.display(), to.display()),
        })?;
    sync_parent(from).await?;
    sync_parent(to).await
}

#[cfg(unix)]
async fn sync_parent(path: &Path) -> Result<(), Error> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    let dir = fs::File::open(parent)
        .await
        .map_err(|e| StorageError::from_io_with_path(&e, parent))?;
    dir.sync_all()
        .await
        .map_err(|e| StorageError::from_io_with_path(&e, parent).into())
}

#[cfg(not(unix))]
async fn sync_parent(_path: &Path) -> Result<(), Error> {
    Ok(())
}
