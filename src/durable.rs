use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt as _;

use crate::layout::backup_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOrigin {
    Primary,
    Backup,
    Missing,
    Reset,
}

#[derive(Debug)]
pub struct Loaded<T> {
    pub value: T,
    pub origin: LoadOrigin,
}

pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    replace_with_backup(path, move |target| async move { write_synced(&target, &data).await })
        .await
}

pub(crate) async fn replace_with_backup<F, Fut>(path: &Path, write: F) -> anyhow::Result<()>
where
    F: FnOnce(PathBuf) -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let backup = backup_path(path);
    let had_primary = fs::try_exists(path)
        .await
        .with_context(|| format!("stat: {}", path.display()))?;
    if had_primary {
        fs::rename(path, &backup)
            .await
            .with_context(|| format!("move to backup: {}", backup.display()))?;
    }

    match write(path.to_path_buf()).await {
        Ok(()) => {
            if had_primary && let Err(err) = fs::remove_file(&backup).await {
                tracing::warn!(path = %backup.display(), ?err, "failed to remove backup");
            }
            Ok(())
        }
        Err(write_err) => {
            let restored = if had_primary {
                fs::rename(&backup, path).await
            } else {
                match fs::remove_file(path).await {
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    other => other,
                }
            };
            if let Err(err) = restored {
                tracing::error!(
                    path = %path.display(),
                    ?err,
                    "failed to roll back after write failure"
                );
            }
            Err(write_err).with_context(|| format!("write: {}", path.display()))
        }
    }
}

async fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await
}

pub async fn load_or_default<T, P, D>(path: &Path, parse: P, default: D) -> Loaded<T>
where
    P: Fn(&[u8]) -> anyhow::Result<T>,
    D: FnOnce() -> T,
{
    let backup = backup_path(path);
    let mut existed = false;

    match read_optional(path).await {
        Ok(Some(bytes)) => {
            existed = true;
            match parse(&bytes) {
                Ok(value) => {
                    return Loaded {
                        value,
                        origin: LoadOrigin::Primary,
                    };
                }
                Err(err) => {
                    tracing::error!(path = %path.display(), ?err, "unreadable file; trying backup");
                }
            }
        }
        Ok(None) => {}
        Err(err) => {
            existed = true;
            tracing::error!(path = %path.display(), ?err, "failed to read file; trying backup");
        }
    }

    match read_optional(&backup).await {
        Ok(Some(bytes)) => {
            existed = true;
            match parse(&bytes) {
                Ok(value) => {
                    tracing::warn!(path = %path.display(), "recovered from backup");
                    if let Err(err) = fs::rename(&backup, path).await {
                        tracing::warn!(path = %path.display(), ?err, "failed to restore backup over primary");
                    }
                    return Loaded {
                        value,
                        origin: LoadOrigin::Backup,
                    };
                }
                Err(err) => {
                    tracing::error!(path = %backup.display(), ?err, "backup also unreadable");
                }
            }
        }
        Ok(None) => {}
        Err(err) => {
            existed = true;
            tracing::error!(path = %backup.display(), ?err, "failed to read backup");
        }
    }

    if existed {
        tracing::warn!(path = %path.display(), "data loss: resetting file to its default content");
    }
    Loaded {
        value: default(),
        origin: if existed {
            LoadOrigin::Reset
        } else {
            LoadOrigin::Missing
        },
    }
}

pub async fn load_json_or_default<T, D>(path: &Path, default: D) -> Loaded<T>
where
    T: DeserializeOwned,
    D: FnOnce() -> T,
{
    load_or_default(
        path,
        |bytes| serde_json::from_slice(bytes).context("parse json"),
        default,
    )
    .await
}

async fn read_optional(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}
