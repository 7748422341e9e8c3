// Copyright 2024 Argus Project Authors. Licensed under Apache-2.0.

//! Store-level scenarios: deferred request handling and the atomic erase
//! replace protocol.

use std::path::PathBuf;

use argus::fs::{spawn_filesystem, FsHandle};
use argus::store::{spawn_active_store, spawn_passive_store};
use argus::{
    response_channel, CountMode, Encoding, Expression, Field, FieldType, IdSet, Query, QueryReply,
    Segment, SegmentBuilder, StorageError, TableSlice, Value,
};
use tempfile::TempDir;
use uuid::Uuid;

fn conn_layout() -> argus::Layout {
    argus::Layout::new("conn", vec![Field::new("x", FieldType::Int)])
}

fn slice(offset: u64, len: u64) -> TableSlice {
    TableSlice::new(
        conn_layout(),
        offset,
        Encoding::Row,
        (offset..offset + len)
            .map(|id| vec![Value::Int(id as i64)])
            .collect(),
    )
}

/// Build a segment of `len` records starting at id 0 and write it under
/// `archive/` of a fresh store directory.
fn write_segment(dir: &TempDir, len: u64) -> (FsHandle, PathBuf, Uuid) {
    let id = Uuid::new_v4();
    let mut builder = SegmentBuilder::new(id, 1 << 20);
    builder.add(slice(0, len)).unwrap();
    let segment = builder.finish();
    let path = PathBuf::from("archive").join(format!("{id}.store"));
    let absolute = dir.path().join(&path);
    std::fs::create_dir_all(absolute.parent().unwrap()).unwrap();
    std::fs::write(&absolute, segment.encode().unwrap()).unwrap();
    let fs = spawn_filesystem(dir.path().to_path_buf(), false);
    (fs, path, id)
}

async fn count(store: &argus::store::StoreHandle, ids: IdSet) -> Result<u64, StorageError> {
    let (sink, mut rx) = response_channel();
    store
        .query(Query::count(Expression::True, CountMode::Exact, sink), ids)
        .await?;
    let mut total = 0;
    while let Ok(QueryReply::Count(c)) = rx.try_recv() {
        total += c;
    }
    Ok(total)
}

#[tokio::test]
async fn test_deferred_requests_answered_in_fifo_order() {
    let dir = tempfile::tempdir().unwrap();
    let (fs, path, _) = write_segment(&dir, 10);
    let store = spawn_passive_store(fs, path);

    // All three requests are enqueued before the store's first poll, so they
    // take the deferred path and must drain in order.
    let (sink, mut rx) = response_channel();
    let query = |ids| {
        store.query(
            Query::count(Expression::True, CountMode::Exact, sink.clone()),
            ids,
        )
    };
    let (r1, r2, r3) = tokio::join!(
        query(IdSet::from_range(0, 1)),
        query(IdSet::from_range(0, 2)),
        query(IdSet::from_range(0, 3)),
    );
    r1.unwrap();
    r2.unwrap();
    r3.unwrap();

    let mut counts = vec![];
    while let Ok(QueryReply::Count(c)) = rx.try_recv() {
        counts.push(c);
    }
    assert_eq!(counts, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_deferred_requests_all_fail_when_loading_fails() {
    let dir = tempfile::tempdir().unwrap();
    let fs = spawn_filesystem(dir.path().to_path_buf(), false);
    let store = spawn_passive_store(fs, PathBuf::from("archive/missing.store"));

    let (r1, r2) = tokio::join!(
        count(&store, IdSet::from_range(0, 1)),
        count(&store, IdSet::from_range(0, 2)),
    );
    assert!(matches!(r1, Err(StorageError::Lookup(_))));
    assert!(matches!(r2, Err(StorageError::Lookup(_))));

    // The store exited; later requests fail too instead of hanging.
    assert!(count(&store, IdSet::from_range(0, 1)).await.is_err());
}

#[tokio::test]
async fn test_corrupt_segment_fails_requests() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("archive").join("bad.store");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"definitely not a segment").unwrap();
    let fs = spawn_filesystem(dir.path().to_path_buf(), false);
    let store = spawn_passive_store(fs, PathBuf::from("archive/bad.store"));
    assert!(count(&store, IdSet::from_range(0, 1)).await.is_err());
}

#[tokio::test]
async fn test_erase_rewrites_the_segment_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let (fs, path, id) = write_segment(&dir, 100);
    let store = spawn_passive_store(fs, path.clone());

    let (sink, _rx) = response_channel();
    store
        .query(Query::erase(sink), IdSet::from_range(0, 50))
        .await
        .unwrap();

    // An erase that completed before a subsequent query is observed by it.
    assert_eq!(count(&store, IdSet::from_range(0, 100)).await.unwrap(), 50);

    // The file was replaced under the same name, keeping the uuid.
    let bytes = bytes::Bytes::from(std::fs::read(dir.path().join(&path)).unwrap());
    let on_disk = Segment::decode(&bytes).unwrap();
    assert_eq!(on_disk.id(), id);
    assert_eq!(on_disk.num_events(), 50);
    let mut next = dir.path().join(&path).into_os_string();
    next.push(".next");
    assert!(!PathBuf::from(next).exists());
}

#[tokio::test]
async fn test_interrupted_erase_preserves_pre_erase_state() {
    let dir = tempfile::tempdir().unwrap();
    let (fs, path, _) = write_segment(&dir, 100);

    // Simulate a crash between the `.next` write and the rename: the staging
    // file exists but the commit never happened.
    let bytes = bytes::Bytes::from(std::fs::read(dir.path().join(&path)).unwrap());
    let post_erase = Segment::decode(&bytes)
        .unwrap()
        .copy_without(&IdSet::from_range(0, 50));
    let mut next = dir.path().join(&path).into_os_string();
    next.push(".next");
    std::fs::write(PathBuf::from(next), post_erase.encode().unwrap()).unwrap();

    let store = spawn_passive_store(fs, path);
    assert_eq!(count(&store, IdSet::from_range(0, 100)).await.unwrap(), 100);
}

#[tokio::test]
async fn test_active_store_serves_and_erases_from_memory() {
    let dir = tempfile::tempdir().unwrap();
    let fs = spawn_filesystem(dir.path().to_path_buf(), false);
    let id = Uuid::new_v4();
    let path = PathBuf::from("archive").join(format!("{id}.store"));
    let (store, slices) = spawn_active_store(fs.clone(), path.clone(), id, 1 << 20, 8);

    for offset in (0..10).step_by(2) {
        slices.send(slice(offset, 2)).await.unwrap();
    }
    // Let the store drain its ingest stream.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert_eq!(count(&store, IdSet::from_range(0, 10)).await.unwrap(), 10);

    // Erase rebuilds the builder and preserves the remaining ids.
    let (sink, _rx) = response_channel();
    store
        .query(Query::erase(sink), IdSet::from_range(0, 5))
        .await
        .unwrap();
    assert_eq!(count(&store, IdSet::from_range(0, 10)).await.unwrap(), 5);

    // Flush seals the builder; a passive store takes over from the file.
    store.flush().await.unwrap();
    let passive = spawn_passive_store(fs, path);
    assert_eq!(count(&passive, IdSet::from_range(0, 10)).await.unwrap(), 5);
    // The sealed store keeps answering from memory meanwhile.
    assert_eq!(count(&store, IdSet::from_range(0, 10)).await.unwrap(), 5);
}
