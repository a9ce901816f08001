//! Series read path: reconstructs one instant profile per sample index by
//! driving every column iterator in lockstep.

use crate::encoding::MultiChunkIterator;
use crate::error::StoreError;
use crate::series::{ColumnSet, MemSeries, MemSeriesInner, ValueColumn};
use crate::tree::SeriesTreeNode;
use crate::types::{
    InstantProfileMeta, LocationId, NumLabels, NumUnits, StringLabels, Timestamp, ValueType,
};

use std::sync::Arc;

/// Iterator over one sparse value column.
///
/// The column stores values only for sample indices in `[start, end)`; outside
/// that span `next` emits zero without consuming chunk data, so legally sparse
/// columns keep lockstep with the dense ones. Chunk data running out *inside*
/// the span is a hard error. Stored values before index 0 (left over when a
/// chunk straddled a truncation boundary) are discarded up front.
#[derive(Debug)]
pub(crate) struct SparseColumnIterator {
    inner: MultiChunkIterator,
    skip: u64,
    start: u64,
    end: u64,
    read: u64,
    value: i64,
    primed: bool,
    err: Option<StoreError>,
}

impl SparseColumnIterator {
    fn new(col: &ValueColumn) -> Self {
        SparseColumnIterator {
            inner: MultiChunkIterator::new(col.chunks.clone()),
            skip: (-col.start).max(0) as u64,
            start: col.start.max(0) as u64,
            end: col.end.max(0) as u64,
            read: 0,
            value: 0,
            primed: false,
            err: None,
        }
    }

    fn next(&mut self) -> bool {
        if self.err.is_some() {
            return false;
        }
        if !self.primed {
            for _ in 0..self.skip {
                if !self.inner.next() {
                    self.err = Some(StoreError::UnexpectedEnd("value"));
                    return false;
                }
            }
            self.primed = true;
        }
        let idx = self.read;
        if idx < self.start || idx >= self.end {
            self.value = 0;
            self.read += 1;
            return true;
        }
        if !self.inner.next() {
            self.err = Some(match self.inner.err() {
                Some(e) => StoreError::Encoding(e.to_string()),
                None => StoreError::UnexpectedEnd("value"),
            });
            return false;
        }
        self.value = self.inner.at();
        self.read += 1;
        true
    }

    fn at(&self) -> i64 {
        self.value
    }

    fn read_count(&self) -> u64 {
        self.read
    }

    fn take_err(&mut self) -> Option<StoreError> {
        self.err.take()
    }
}

/// A value column's iterator plus the label payload captured at snapshot time.
#[derive(Debug)]
pub(crate) struct IteratorValueNode {
    values: SparseColumnIterator,
    labels: Option<Arc<StringLabels>>,
    num_labels: Option<Arc<NumLabels>>,
    num_units: Option<Arc<NumUnits>>,
}

/// Node of the iterator tree: same shape as the series tree, with per-key
/// flat and cumulative value iterators attached.
#[derive(Debug)]
pub struct IteratorTreeNode {
    location_id: LocationId,
    flat: Vec<IteratorValueNode>,
    cumulative: Vec<IteratorValueNode>,
    children: Vec<IteratorTreeNode>,
}

impl IteratorTreeNode {
    pub fn location_id(&self) -> LocationId {
        self.location_id
    }

    pub fn children(&self) -> &[IteratorTreeNode] {
        &self.children
    }

    /// Current flat values, one per value key observed at this node.
    pub fn flat_values(&self) -> Vec<ProfileValue> {
        self.flat.iter().map(ProfileValue::capture).collect()
    }

    /// Current cumulative values, one per value key observed at this node.
    pub fn cumulative_values(&self) -> Vec<ProfileValue> {
        self.cumulative.iter().map(ProfileValue::capture).collect()
    }

    /// Sum of the current flat values across label payloads.
    pub fn flat_value(&self) -> i64 {
        self.flat.iter().map(|v| v.values.at()).sum()
    }

    /// Sum of the current cumulative values across label payloads.
    pub fn cumulative_value(&self) -> i64 {
        self.cumulative.iter().map(|v| v.values.at()).sum()
    }
}

/// One value read out of a column at the current sample index, with the label
/// payload bound to its key.
#[derive(Debug, Clone)]
pub struct ProfileValue {
    pub value: i64,
    pub labels: Option<Arc<StringLabels>>,
    pub num_labels: Option<Arc<NumLabels>>,
    pub num_units: Option<Arc<NumUnits>>,
}

impl ProfileValue {
    fn capture(v: &IteratorValueNode) -> Self {
        ProfileValue {
            value: v.values.at(),
            labels: v.labels.clone(),
            num_labels: v.num_labels.clone(),
            num_units: v.num_units.clone(),
        }
    }
}

/// The reconstructed profile at the iterator's current position.
#[derive(Debug)]
pub struct InstantProfile<'a> {
    root: &'a IteratorTreeNode,
    meta: InstantProfileMeta,
}

impl<'a> InstantProfile<'a> {
    pub fn meta(&self) -> &InstantProfileMeta {
        &self.meta
    }

    pub fn tree_root(&self) -> &'a IteratorTreeNode {
        self.root
    }
}

/// Iterator over every sample of a series, yielding one instant profile per
/// sample index.
///
/// Construction snapshots the chunk lists of all columns and the series tree
/// shape under the read lock; afterwards the iterator is independent of the
/// series, so concurrent appends and truncation never invalidate it.
#[derive(Debug)]
pub struct MemSeriesIterator {
    root: IteratorTreeNode,
    timestamps: MultiChunkIterator,
    durations: MultiChunkIterator,
    periods: MultiChunkIterator,
    period_type: ValueType,
    sample_type: ValueType,
    num_samples: usize,
    err: Option<StoreError>,
}

impl MemSeriesIterator {
    /// Advances to the next sample. Returns false at the end of the series or
    /// on the first error; [`MemSeriesIterator::err`] distinguishes the two.
    pub fn next(&mut self) -> bool {
        if self.err.is_some() || self.num_samples == 0 {
            return false;
        }

        if !self.timestamps.next() {
            self.err = Some(match self.timestamps.err() {
                Some(e) => StoreError::Encoding(e.to_string()),
                None => StoreError::UnexpectedEnd("timestamps"),
            });
            return false;
        }
        let read = self.timestamps.read();

        for (it, name) in [
            (&mut self.durations, "durations"),
            (&mut self.periods, "periods"),
        ] {
            if !it.next() {
                self.err = Some(match it.err() {
                    Some(e) => StoreError::Encoding(e.to_string()),
                    None => StoreError::UnexpectedEnd(name),
                });
                return false;
            }
            if it.read() != read {
                self.err = Some(StoreError::IteratorDesync {
                    column: name,
                    expected: read,
                    got: it.read(),
                });
                return false;
            }
        }

        if let Err(e) = advance_node(&mut self.root, read) {
            self.err = Some(e);
            return false;
        }

        self.num_samples -= 1;
        true
    }

    pub fn at(&self) -> InstantProfile<'_> {
        InstantProfile {
            root: &self.root,
            meta: InstantProfileMeta {
                period_type: self.period_type.clone(),
                sample_type: self.sample_type.clone(),
                timestamp: self.timestamps.at(),
                duration: self.durations.at(),
                period: self.periods.at(),
            },
        }
    }

    pub fn err(&self) -> Option<&StoreError> {
        self.err.as_ref()
    }
}

fn advance_values(
    values: &mut [IteratorValueNode],
    column: &'static str,
    read: u64,
) -> Result<(), StoreError> {
    for v in values {
        if !v.values.next() {
            return Err(match v.values.take_err() {
                Some(StoreError::Encoding(msg)) => StoreError::Encoding(msg),
                _ => StoreError::IteratorDesync {
                    column,
                    expected: read,
                    got: v.values.read_count(),
                },
            });
        }
        if v.values.read_count() != read {
            return Err(StoreError::IteratorDesync {
                column,
                expected: read,
                got: v.values.read_count(),
            });
        }
    }
    Ok(())
}

fn advance_node(node: &mut IteratorTreeNode, read: u64) -> Result<(), StoreError> {
    advance_values(&mut node.flat, "flat value", read)?;
    advance_values(&mut node.cumulative, "cumulative value", read)?;
    for child in &mut node.children {
        advance_node(child, read)?;
    }
    Ok(())
}

fn build_value_node(col: &ValueColumn, columns: &ColumnSet, key: &crate::profile::ValueKey) -> IteratorValueNode {
    IteratorValueNode {
        values: SparseColumnIterator::new(col),
        labels: columns.labels.get(key).cloned(),
        num_labels: columns.num_labels.get(key).cloned(),
        num_units: columns.num_units.get(key).cloned(),
    }
}

fn build_iter_node(snode: &SeriesTreeNode, columns: &ColumnSet) -> IteratorTreeNode {
    let mut node = IteratorTreeNode {
        location_id: snode.location_id,
        flat: Vec::new(),
        cumulative: Vec::new(),
        children: Vec::with_capacity(snode.children.len()),
    };
    for key in &snode.keys {
        if let Some(col) = columns.flat.get(key) {
            node.flat.push(build_value_node(col, columns, key));
        }
        if let Some(col) = columns.cumulative.get(key) {
            node.cumulative.push(build_value_node(col, columns, key));
        }
    }
    for child in &snode.children {
        node.children.push(build_iter_node(child, columns));
    }
    node
}

fn build_iterator(inner: &MemSeriesInner) -> MemSeriesIterator {
    MemSeriesIterator {
        root: build_iter_node(&inner.tree.root, &inner.columns),
        timestamps: MultiChunkIterator::new(
            inner.timestamps.iter().map(|tc| tc.chunk.clone()).collect(),
        ),
        durations: MultiChunkIterator::new(inner.durations.clone()),
        periods: MultiChunkIterator::new(inner.periods.clone()),
        period_type: inner.period_type.clone().unwrap_or_default(),
        sample_type: inner.sample_type.clone().unwrap_or_default(),
        num_samples: inner.num_samples,
        err: None,
    }
}

/// Computes the index bounds `[start, end)` of the samples whose timestamp lies
/// in `[mint, maxt]`, by scanning the timestamps iterator.
pub(crate) fn index_range(
    it: &mut MultiChunkIterator,
    num_samples: usize,
    mint: Timestamp,
    maxt: Timestamp,
) -> Result<(u64, u64), StoreError> {
    let mut start = 0u64;
    let mut end = 0u64;
    let mut i = 0usize;
    while i < num_samples && it.next() {
        let t = it.at();
        if t < mint {
            start += 1;
        }
        if t <= maxt {
            end += 1;
        } else {
            break;
        }
        i += 1;
    }
    if let Some(e) = it.err() {
        return Err(StoreError::Encoding(e.to_string()));
    }
    Ok((start, end.max(start)))
}

/// Iterator over the samples of a series clipped to a `[mint, maxt]` window.
#[derive(Debug)]
pub struct RangeSeriesIterator {
    inner: MemSeriesIterator,
    skip: u64,
    remaining: u64,
    primed: bool,
}

impl RangeSeriesIterator {
    pub fn next(&mut self) -> bool {
        if !self.primed {
            for _ in 0..self.skip {
                if !self.inner.next() {
                    return false;
                }
            }
            self.primed = true;
        }
        if self.remaining == 0 {
            return false;
        }
        if !self.inner.next() {
            return false;
        }
        self.remaining -= 1;
        true
    }

    pub fn at(&self) -> InstantProfile<'_> {
        self.inner.at()
    }

    pub fn err(&self) -> Option<&StoreError> {
        self.inner.err()
    }
}

impl MemSeries {
    /// Snapshots the series under the read lock and returns an iterator over
    /// all samples currently stored.
    pub fn iterator(&self) -> Result<MemSeriesIterator, StoreError> {
        let inner = self.read_inner()?;
        Ok(build_iterator(&inner))
    }

    /// Like [`MemSeries::iterator`], clipped to samples with
    /// `mint <= timestamp <= maxt`.
    pub fn iterator_range(
        &self,
        mint: Timestamp,
        maxt: Timestamp,
    ) -> Result<RangeSeriesIterator, StoreError> {
        let inner = self.read_inner()?;
        let mut ts = MultiChunkIterator::new(
            inner.timestamps.iter().map(|tc| tc.chunk.clone()).collect(),
        );
        let (start, end) = index_range(&mut ts, inner.num_samples, mint, maxt)?;
        Ok(RangeSeriesIterator {
            inner: build_iterator(&inner),
            skip: start,
            remaining: end - start,
            primed: false,
        })
    }
}
