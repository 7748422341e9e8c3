// Copyright 2024 Argus Project Authors. Licensed under Apache-2.0.

//! The filesystem actor.
//!
//! All persistence in the core goes through this actor; it is the only task
//! permitted to issue blocking system calls (the memory mapping below). Every
//! other actor treats disk I/O as an asynchronous request/response exchange.

use std::path::PathBuf;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{StorageError, StorageResult};

enum FsRequest {
    Write {
        path: PathBuf,
        data: Bytes,
        reply: oneshot::Sender<StorageResult<()>>,
    },
    Read {
        path: PathBuf,
        reply: oneshot::Sender<StorageResult<Bytes>>,
    },
    Mmap {
        path: PathBuf,
        reply: oneshot::Sender<StorageResult<Bytes>>,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        reply: oneshot::Sender<StorageResult<()>>,
    },
    RemoveFile {
        path: PathBuf,
        reply: oneshot::Sender<StorageResult<()>>,
    },
    ListDir {
        path: PathBuf,
        reply: oneshot::Sender<StorageResult<Vec<PathBuf>>>,
    },
}

/// Cheap handle to the filesystem actor. Paths are resolved relative to the
/// actor's root directory.
#[derive(Clone)]
pub struct FsHandle {
    tx: mpsc::UnboundedSender<FsRequest>,
}

impl FsHandle {
    pub async fn write(&self, path: impl Into<PathBuf>, data: Bytes) -> StorageResult<()> {
        self.request(|reply| FsRequest::Write {
            path: path.into(),
            data,
            reply,
        })
        .await
    }

    pub async fn read(&self, path: impl Into<PathBuf>) -> StorageResult<Bytes> {
        self.request(|reply| FsRequest::Read {
            path: path.into(),
            reply,
        })
        .await
    }

    /// Map a file and hand it out as a reference-counted chunk.
    pub async fn mmap(&self, path: impl Into<PathBuf>) -> StorageResult<Bytes> {
        self.request(|reply| FsRequest::Mmap {
            path: path.into(),
            reply,
        })
        .await
    }

    pub async fn rename(
        &self,
        from: impl Into<PathBuf>,
        to: impl Into<PathBuf>,
    ) -> StorageResult<()> {
        self.request(|reply| FsRequest::Rename {
            from: from.into(),
            to: to.into(),
            reply,
        })
        .await
    }

    pub async fn remove_file(&self, path: impl Into<PathBuf>) -> StorageResult<()> {
        self.request(|reply| FsRequest::RemoveFile {
            path: path.into(),
            reply,
        })
        .await
    }

    pub async fn list_dir(&self, path: impl Into<PathBuf>) -> StorageResult<Vec<PathBuf>> {
        self.request(|reply| FsRequest::ListDir {
            path: path.into(),
            reply,
        })
        .await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<StorageResult<T>>) -> FsRequest,
    ) -> StorageResult<T> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(make(tx))
            .map_err(|_| StorageError::Lookup("filesystem actor terminated".into()))?;
        rx.await
            .map_err(|_| StorageError::Lookup("filesystem actor terminated".into()))?
    }
}

/// Spawn the filesystem actor rooted at `root`.
pub fn spawn_filesystem(root: PathBuf, enable_fsync: bool) -> FsHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run(root, enable_fsync, rx));
    FsHandle { tx }
}

async fn run(root: PathBuf, enable_fsync: bool, mut rx: mpsc::UnboundedReceiver<FsRequest>) {
    while let Some(req) = rx.recv().await {
        match req {
            FsRequest::Write { path, data, reply } => {
                let _ = reply.send(write(&root.join(path), data, enable_fsync).await);
            }
            FsRequest::Read { path, reply } => {
                let res = tokio::fs::read(root.join(path))
                    .await
                    .map(Bytes::from)
                    .map_err(StorageError::from);
                let _ = reply.send(res);
            }
            FsRequest::Mmap { path, reply } => {
                let _ = reply.send(mmap(&root.join(path)));
            }
            FsRequest::Rename { from, to, reply } => {
                let res = tokio::fs::rename(root.join(from), root.join(to))
                    .await
                    .map_err(StorageError::from);
                let _ = reply.send(res);
            }
            FsRequest::RemoveFile { path, reply } => {
                let res = tokio::fs::remove_file(root.join(path))
                    .await
                    .map_err(StorageError::from);
                let _ = reply.send(res);
            }
            FsRequest::ListDir { path, reply } => {
                let _ = reply.send(list_dir(&root.join(path)).await);
            }
        }
    }
    debug!("filesystem actor terminated");
}

async fn write(path: &PathBuf, data: Bytes, enable_fsync: bool) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(&data).await?;
    if enable_fsync {
        file.sync_data().await?;
    }
    Ok(())
}

fn mmap(path: &PathBuf) -> StorageResult<Bytes> {
    let file = std::fs::File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(Bytes::new());
    }
    // Safety: segment files are replaced only by atomic rename; the old inode
    // stays valid for as long as this mapping is referenced.
    let map = unsafe { memmap2::Mmap::map(&file)? };
    Ok(Bytes::from_owner(map))
}

async fn list_dir(path: &PathBuf) -> StorageResult<Vec<PathBuf>> {
    let mut entries = Vec::new();
    let mut dir = match tokio::fs::read_dir(path).await {
        Ok(dir) => dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = dir.next_entry().await? {
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let fs = spawn_filesystem(dir.path().to_path_buf(), false);
        fs.write("a/b.bin", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(fs.read("a/b.bin").await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(fs.mmap("a/b.bin").await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_rename_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let fs = spawn_filesystem(dir.path().to_path_buf(), false);
        fs.write("d/x.next", Bytes::from_static(b"1")).await.unwrap();
        fs.rename("d/x.next", "d/x").await.unwrap();
        let entries = fs.list_dir("d").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].ends_with("x"));
        assert!(fs.read("d/x.next").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let fs = spawn_filesystem(dir.path().to_path_buf(), false);
        assert!(fs.mmap("nope.bin").await.is_err());
        assert!(fs.list_dir("absent").await.unwrap().is_empty());
    }
}
