// Copyright 2024 Argus Project Authors. Licensed under Apache-2.0.

//! Immutable segments and the append-only builder that seals them.

mod format;

use bytes::Bytes;
pub use format::{SegmentHeader, SliceEntry, SEGMENT_MAGIC, SEGMENT_VERSION};
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::ids::IdSet;
use crate::slice::TableSlice;
use crate::types::Layout;

/// A read-only container of table slices keyed by id range.
///
/// Segments are never rewritten in place: erase produces a new segment with
/// the same id that atomically replaces the old file by rename.
#[derive(Clone, Debug)]
pub struct Segment {
    id: Uuid,
    /// Sorted by ascending id range; ids are unique across slices.
    slices: Vec<TableSlice>,
}

impl Segment {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn slices(&self) -> &[TableSlice] {
        &self.slices
    }

    pub fn num_events(&self) -> u64 {
        self.slices.iter().map(|s| s.len() as u64).sum()
    }

    /// Parse a segment from an opaque byte chunk (typically a file mapping).
    pub fn decode(data: &Bytes) -> StorageResult<Self> {
        let (header, slices) = format::decode_segment(data)?;
        Ok(Self {
            id: header.id,
            slices,
        })
    }

    /// Serialize into the on-disk representation.
    pub fn encode(&self) -> StorageResult<Bytes> {
        format::encode_segment(self.id, &self.slices)
    }

    /// All slices whose id range intersects `ids`, in ascending id order.
    ///
    /// Records are not filtered here; that is the caller's responsibility.
    /// Disjoint or empty `ids` yield an empty vector, which is a success.
    pub fn lookup(&self, ids: &IdSet) -> Vec<TableSlice> {
        self.slices
            .iter()
            .filter(|s| {
                let (begin, end) = s.id_range();
                ids.overlaps_range(begin, end)
            })
            .cloned()
            .collect()
    }

    /// The slices obtained by removing every record whose id is in `ids`.
    ///
    /// Fully-erased slices are preserved as empty slices; the caller decides
    /// whether to drop them.
    pub fn erase(&self, ids: &IdSet) -> Vec<TableSlice> {
        self.slices
            .iter()
            .flat_map(|s| s.without(ids))
            .collect()
    }

    /// A new segment with the same id, minus the records in `ids`.
    pub fn copy_without(&self, ids: &IdSet) -> Segment {
        Segment {
            id: self.id,
            slices: self.erase(ids).into_iter().filter(|s| !s.is_empty()).collect(),
        }
    }
}

/// Append-only accumulator that seals into a [`Segment`].
///
/// `finish` moves the accumulated slices out; the builder must be `reset`
/// with a fresh id before further use.
pub struct SegmentBuilder {
    id: Uuid,
    max_segment_size: usize,
    layouts: Vec<Layout>,
    slices: Vec<TableSlice>,
    current_size: usize,
}

impl SegmentBuilder {
    pub fn new(id: Uuid, max_segment_size: usize) -> Self {
        Self {
            id,
            max_segment_size,
            layouts: Vec::new(),
            slices: Vec::new(),
            current_size: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Accumulated payload bytes.
    pub fn current_size(&self) -> usize {
        self.current_size
    }

    /// Whether the configured size limit is reached. Callers consult this to
    /// drive sealing; `add` itself never refuses on size.
    pub fn is_full(&self) -> bool {
        self.current_size >= self.max_segment_size
    }

    /// Append a slice.
    ///
    /// Fails if the slice's layout conflicts with an already-recorded layout
    /// of the same name, or if its ids are not ahead of everything added so
    /// far (ids within a segment are unique and monotone).
    pub fn add(&mut self, slice: TableSlice) -> StorageResult<()> {
        match self
            .layouts
            .iter()
            .position(|l| l.name == slice.layout().name)
        {
            Some(pos) if &self.layouts[pos] != slice.layout() => {
                return Err(StorageError::Format(format!(
                    "layout {} conflicts with a previously added layout group",
                    slice.layout().name
                )));
            }
            Some(_) => {}
            None => self.layouts.push(slice.layout().clone()),
        }
        if let Some(last) = self.slices.last() {
            if slice.id_range().0 < last.id_range().1 {
                return Err(StorageError::Format(format!(
                    "slice ids {:?} overlap segment {}",
                    slice.id_range(),
                    self.id
                )));
            }
        }
        self.current_size += slice.estimated_size();
        self.slices.push(slice);
        Ok(())
    }

    /// Read directly from the in-memory slices, same contract as
    /// [`Segment::lookup`].
    pub fn lookup(&self, ids: &IdSet) -> Vec<TableSlice> {
        self.slices
            .iter()
            .filter(|s| {
                let (begin, end) = s.id_range();
                ids.overlaps_range(begin, end)
            })
            .cloned()
            .collect()
    }

    pub fn num_events(&self) -> u64 {
        self.slices.iter().map(|s| s.len() as u64).sum()
    }

    /// Seal into an immutable segment, moving the slices out.
    pub fn finish(&mut self) -> Segment {
        let slices = std::mem::take(&mut self.slices);
        self.layouts.clear();
        self.current_size = 0;
        Segment {
            id: self.id,
            slices,
        }
    }

    /// Make the builder usable again after `finish`.
    pub fn reset(&mut self, id: Uuid) {
        self.id = id;
        self.layouts.clear();
        self.slices.clear();
        self.current_size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slice::Encoding;
    use crate::types::{Field, FieldType, Value};

    fn layout() -> Layout {
        Layout::new("conn", vec![Field::new("x", FieldType::Int)])
    }

    fn slice(offset: u64, values: &[i64]) -> TableSlice {
        TableSlice::new(
            layout(),
            offset,
            Encoding::Row,
            values.iter().map(|&v| vec![Value::Int(v)]).collect(),
        )
    }

    fn build(slices: Vec<TableSlice>) -> Segment {
        let mut builder = SegmentBuilder::new(Uuid::new_v4(), 1 << 20);
        for s in slices {
            builder.add(s).unwrap();
        }
        builder.finish()
    }

    #[test]
    fn test_roundtrip_preserves_records() {
        let segment = build(vec![slice(0, &[1, 2, 3]), slice(3, &[4, 5])]);
        let bytes = segment.encode().unwrap();
        let decoded = Segment::decode(&bytes).unwrap();
        assert_eq!(decoded.id(), segment.id());
        let out = decoded.lookup(&IdSet::from_range(0, 5));
        let values: Vec<_> = out
            .iter()
            .flat_map(|s| s.rows().map(|r| r[0].clone()))
            .collect();
        assert_eq!(
            values,
            vec![1, 2, 3, 4, 5].into_iter().map(Value::Int).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_decode_rejects_corruption() {
        let segment = build(vec![slice(0, &[1, 2, 3])]);
        let bytes = segment.encode().unwrap();
        let mut corrupt = bytes.to_vec();
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xff;
        assert!(matches!(
            Segment::decode(&Bytes::from(corrupt)),
            Err(StorageError::Checksum { .. })
        ));
        assert!(Segment::decode(&Bytes::from_static(b"junk")).is_err());
    }

    #[test]
    fn test_lookup_intersects_by_range() {
        let segment = build(vec![slice(0, &[1, 2]), slice(10, &[3, 4])]);
        let out = segment.lookup(&IdSet::from_range(10, 11));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id_range(), (10, 12));
        assert!(segment.lookup(&IdSet::from_range(100, 200)).is_empty());
        assert!(segment.lookup(&IdSet::empty()).is_empty());
    }

    #[test]
    fn test_erase_correctness_and_idempotence() {
        let segment = build(vec![slice(0, &[0, 1, 2, 3, 4])]);
        let victims = IdSet::from_range(1, 3);
        let once = segment.copy_without(&victims);
        let surviving: Vec<u64> = once
            .slices()
            .iter()
            .flat_map(|s| {
                let (b, e) = s.id_range();
                b..e
            })
            .collect();
        assert_eq!(surviving, vec![0, 3, 4]);

        let twice = once.copy_without(&victims);
        assert_eq!(twice.num_events(), once.num_events());
        assert_eq!(twice.id(), segment.id());
    }

    #[test]
    fn test_erase_preserves_empty_results() {
        let segment = build(vec![slice(0, &[1, 2])]);
        let out = segment.erase(&IdSet::from_range(0, 2));
        assert_eq!(out.len(), 1);
        assert!(out[0].is_empty());
        // copy_without drops them from the rebuilt segment.
        assert_eq!(segment.copy_without(&IdSet::from_range(0, 2)).num_events(), 0);
    }

    #[test]
    fn test_builder_rejects_layout_conflict() {
        let mut builder = SegmentBuilder::new(Uuid::new_v4(), 1 << 20);
        builder.add(slice(0, &[1])).unwrap();
        let other = TableSlice::new(
            Layout::new("conn", vec![Field::new("y", FieldType::Int)]),
            1,
            Encoding::Row,
            vec![vec![Value::Int(2)]],
        );
        assert!(builder.add(other).is_err());
    }

    #[test]
    fn test_builder_rejects_overlapping_ids() {
        let mut builder = SegmentBuilder::new(Uuid::new_v4(), 1 << 20);
        builder.add(slice(0, &[1, 2])).unwrap();
        assert!(builder.add(slice(1, &[3])).is_err());
        builder.add(slice(2, &[3])).unwrap();
    }

    #[test]
    fn test_finish_then_reset() {
        let id = Uuid::new_v4();
        let mut builder = SegmentBuilder::new(id, 1 << 20);
        builder.add(slice(0, &[1])).unwrap();
        let segment = builder.finish();
        assert_eq!(segment.id(), id);
        assert_eq!(segment.num_events(), 1);

        builder.reset(id);
        assert_eq!(builder.num_events(), 0);
        builder.add(slice(0, &[9])).unwrap();
        assert_eq!(builder.finish().num_events(), 1);
    }
}
