// Copyright 2024 Argus Project Authors. Licensed under Apache-2.0.

//! Binary layout of a segment file.
//!
//! ```text
//! [magic u32][version u32][header_len u32][header][payload...]
//! ```
//!
//! The header is a bincode-encoded [`SegmentHeader`]; payload offsets in the
//! slice index are relative to the end of the header, never to the start of
//! the file. Each slice payload carries a crc32 checksum verified on decode.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::slice::TableSlice;
use crate::types::Layout;

pub const SEGMENT_MAGIC: u32 = 0x4153_4547; // "ASEG"
pub const SEGMENT_VERSION: u32 = 1;

/// Location of one slice payload, relative to end-of-header.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SliceEntry {
    pub id_begin: u64,
    pub id_end: u64,
    pub offset: u64,
    pub len: u64,
    pub checksum: u32,
}

/// Self-describing segment header.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SegmentHeader {
    pub id: Uuid,
    pub layouts: Vec<Layout>,
    /// Sorted by ascending id range.
    pub index: Vec<SliceEntry>,
}

pub fn encode_segment(id: Uuid, slices: &[TableSlice]) -> StorageResult<Bytes> {
    let mut payload = Vec::new();
    let mut index = Vec::with_capacity(slices.len());
    let mut layouts: Vec<Layout> = Vec::new();
    for slice in slices {
        if !layouts.contains(slice.layout()) {
            layouts.push(slice.layout().clone());
        }
        let offset = payload.len() as u64;
        let bytes = bincode::serialize(slice)?;
        let (id_begin, id_end) = slice.id_range();
        index.push(SliceEntry {
            id_begin,
            id_end,
            offset,
            len: bytes.len() as u64,
            checksum: crc32fast::hash(&bytes),
        });
        payload.extend_from_slice(&bytes);
    }

    let header = bincode::serialize(&SegmentHeader {
        id,
        layouts,
        index,
    })?;

    let mut out = BytesMut::with_capacity(12 + header.len() + payload.len());
    out.put_u32(SEGMENT_MAGIC);
    out.put_u32(SEGMENT_VERSION);
    out.put_u32(header.len() as u32);
    out.put_slice(&header);
    out.put_slice(&payload);
    Ok(out.freeze())
}

pub fn decode_segment(data: &Bytes) -> StorageResult<(SegmentHeader, Vec<TableSlice>)> {
    if data.len() < 12 {
        return Err(StorageError::Format("segment file truncated".into()));
    }
    let mut buf = &data[..];
    let magic = buf.get_u32();
    if magic != SEGMENT_MAGIC {
        return Err(StorageError::Format(format!(
            "bad segment magic {magic:#010x}"
        )));
    }
    let version = buf.get_u32();
    if version != SEGMENT_VERSION {
        return Err(StorageError::Format(format!(
            "unsupported segment version {version}"
        )));
    }
    let header_len = buf.get_u32() as usize;
    if buf.remaining() < header_len {
        return Err(StorageError::Format("segment header truncated".into()));
    }
    let header: SegmentHeader = bincode::deserialize(&buf[..header_len])?;
    let payload = &buf[header_len..];

    let mut slices = Vec::with_capacity(header.index.len());
    for entry in &header.index {
        let begin = entry.offset as usize;
        let end = begin + entry.len as usize;
        if end > payload.len() {
            return Err(StorageError::Format("slice payload out of bounds".into()));
        }
        let bytes = &payload[begin..end];
        let found = crc32fast::hash(bytes);
        if found != entry.checksum {
            return Err(StorageError::Checksum {
                found,
                expected: entry.checksum,
            });
        }
        slices.push(bincode::deserialize(bytes)?);
    }
    Ok((header, slices))
}
