//! In-memory series: dense meta columns, sparse per-key value columns, the
//! appender that advances them in lockstep, and chunk truncation.

use crate::encoding::XorChunk;
use crate::error::StoreError;
use crate::profile::{Profile, ProfileTreeValueNode, ValueKey};
use crate::telemetry::{store_metrics, StoreEvent, StoreEventListener};
use crate::tree::SeriesTree;
use crate::types::{LabelSet, NumLabels, NumUnits, StringLabels, Timestamp, ValueType};

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard};

/// Sentinel for a series that has never stored a timestamp.
const MIN_TIME_UNSET: Timestamp = i64::MAX;

/// A sparse column: the ordered chunks holding one value key's samples.
///
/// `start` is the global sample index of the first stored value and `end` the
/// index after the last one, so `end - start` values are stored. Indices before
/// `start` and at/after `end` implicitly read as zero. `start` can become
/// negative after truncation when the first surviving chunk straddles the
/// truncation boundary; the leading `-start` stored values are then stale and
/// skipped by readers.
#[derive(Debug, Default)]
pub(crate) struct ValueColumn {
    pub start: i64,
    pub end: i64,
    pub chunks: Vec<Arc<XorChunk>>,
}

impl ValueColumn {
    /// Writes `v` at the given sample index. Indices must be appended in
    /// increasing order; a gap since the last write is materialized as zeros
    /// because in-chunk holes are not representable.
    fn append_at(&mut self, index: usize, v: i64, capacity: u16) {
        let index = index as i64;
        if self.chunks.is_empty() {
            self.start = index;
            self.end = index;
        }
        debug_assert!(index >= self.end, "column writes must advance");
        while self.end < index {
            self.push(0, capacity);
        }
        self.push(v, capacity);
    }

    fn push(&mut self, v: i64, capacity: u16) {
        if self.chunks.last().map_or(true, |c| c.is_full()) {
            self.chunks
                .push(Arc::new(XorChunk::with_capacity(capacity)));
        }
        let last = self.chunks.len() - 1;
        Arc::make_mut(&mut self.chunks[last]).append(v);
        self.end += 1;
    }

    #[cfg(test)]
    pub(crate) fn start_index(&self) -> i64 {
        self.start
    }

    /// Decodes the stored values (stale pre-truncation values excluded).
    #[cfg(test)]
    pub(crate) fn decoded(&self) -> Result<Vec<i64>, StoreError> {
        let mut it = crate::encoding::MultiChunkIterator::new(self.chunks.clone());
        let mut out = Vec::new();
        while it.next() {
            out.push(it.at());
        }
        if let Some(e) = it.err() {
            return Err(StoreError::Encoding(e.to_string()));
        }
        let stale = (-self.start).max(0) as usize;
        Ok(out.split_off(stale))
    }
}

/// The sparse column families plus the immutable label payloads, keyed by value
/// key. Label payloads are bound to their key on first observation and never
/// mutated afterwards; readers capture the `Arc`, not a copy.
#[derive(Debug)]
pub(crate) struct ColumnSet {
    chunk_capacity: u16,
    pub flat: HashMap<ValueKey, ValueColumn>,
    pub cumulative: HashMap<ValueKey, ValueColumn>,
    pub labels: HashMap<ValueKey, Arc<StringLabels>>,
    pub num_labels: HashMap<ValueKey, Arc<NumLabels>>,
    pub num_units: HashMap<ValueKey, Arc<NumUnits>>,
}

impl ColumnSet {
    pub fn new(chunk_capacity: u16) -> Self {
        ColumnSet {
            chunk_capacity,
            flat: HashMap::new(),
            cumulative: HashMap::new(),
            labels: HashMap::new(),
            num_labels: HashMap::new(),
            num_units: HashMap::new(),
        }
    }

    pub fn append_flat(&mut self, key: &ValueKey, index: usize, v: i64) {
        let cap = self.chunk_capacity;
        self.flat
            .entry(key.clone())
            .or_default()
            .append_at(index, v, cap);
    }

    pub fn append_cumulative(&mut self, key: &ValueKey, index: usize, v: i64) {
        let cap = self.chunk_capacity;
        self.cumulative
            .entry(key.clone())
            .or_default()
            .append_at(index, v, cap);
    }

    pub fn set_labels_once(&mut self, key: &ValueKey, v: &ProfileTreeValueNode) {
        if !v.labels.is_empty() {
            self.labels
                .entry(key.clone())
                .or_insert_with(|| Arc::new(v.labels.clone()));
        }
        if !v.num_labels.is_empty() {
            self.num_labels
                .entry(key.clone())
                .or_insert_with(|| Arc::new(v.num_labels.clone()));
        }
        if !v.num_units.is_empty() {
            self.num_units
                .entry(key.clone())
                .or_insert_with(|| Arc::new(v.num_units.clone()));
        }
    }
}

/// One timestamps chunk together with the time range it covers, so truncation
/// can select whole chunks by timestamp without decoding them.
#[derive(Debug)]
pub(crate) struct TimestampedChunk {
    pub min_time: Timestamp,
    pub max_time: Timestamp,
    pub chunk: Arc<XorChunk>,
}

impl TimestampedChunk {
    fn new(capacity: u16) -> Self {
        TimestampedChunk {
            min_time: i64::MAX,
            max_time: i64::MIN,
            chunk: Arc::new(XorChunk::with_capacity(capacity)),
        }
    }
}

#[derive(Debug)]
pub(crate) struct MemSeriesInner {
    pub period_type: Option<ValueType>,
    pub sample_type: Option<ValueType>,

    pub timestamps: Vec<TimestampedChunk>,
    pub durations: Vec<Arc<XorChunk>>,
    pub periods: Vec<Arc<XorChunk>>,

    pub tree: SeriesTree,
    pub columns: ColumnSet,

    pub num_samples: usize,
    pub min_time: Timestamp,
    pub max_time: Timestamp,
}

/// All profiles sharing one label set, stored columnar and chunk-encoded.
///
/// A single reader-writer lock guards everything mutable; appends and
/// truncation take the write lock, iterator construction the read lock.
#[derive(Debug)]
pub struct MemSeries {
    id: u64,
    label_set: LabelSet,
    chunk_capacity: u16,
    pub(crate) inner: RwLock<MemSeriesInner>,
}

impl MemSeries {
    pub fn new(id: u64, label_set: LabelSet) -> Self {
        Self::with_chunk_capacity(id, label_set, crate::encoding::DEFAULT_SAMPLES_PER_CHUNK)
    }

    pub fn with_chunk_capacity(id: u64, label_set: LabelSet, chunk_capacity: u16) -> Self {
        MemSeries {
            id,
            label_set,
            chunk_capacity,
            inner: RwLock::new(MemSeriesInner {
                period_type: None,
                sample_type: None,
                timestamps: Vec::new(),
                durations: Vec::new(),
                periods: Vec::new(),
                tree: SeriesTree::new(),
                columns: ColumnSet::new(chunk_capacity),
                num_samples: 0,
                min_time: MIN_TIME_UNSET,
                max_time: i64::MIN,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label_set(&self) -> &LabelSet {
        &self.label_set
    }

    pub fn num_samples(&self) -> Result<usize, StoreError> {
        Ok(self.inner.read()?.num_samples)
    }

    /// Timestamp of the first stored sample; `i64::MIN` after all chunks were
    /// truncated, `i64::MAX` if nothing was ever appended.
    pub fn min_time(&self) -> Result<Timestamp, StoreError> {
        Ok(self.inner.read()?.min_time)
    }

    /// Timestamp of the last appended sample, retained across truncation.
    pub fn max_time(&self) -> Result<Timestamp, StoreError> {
        Ok(self.inner.read()?.max_time)
    }

    pub fn appender(self: &Arc<Self>) -> Appender {
        Appender {
            series: Arc::clone(self),
            events: crate::telemetry::noop_event_listener(),
        }
    }

    pub(crate) fn read_inner(&self) -> Result<RwLockReadGuard<'_, MemSeriesInner>, StoreError> {
        Ok(self.inner.read()?)
    }

    /// Appends one profile. Validates schema and timestamp order before any
    /// mutation, so a rejected append leaves the series untouched.
    pub fn append(&self, profile: &Profile) -> Result<(), StoreError> {
        let mut guard = self.inner.write()?;
        let inner = &mut *guard;

        if let Some(pt) = &inner.period_type {
            if *pt != profile.meta.period_type {
                return Err(StoreError::SchemaMismatch {
                    what: "period type",
                    series: pt.to_string(),
                    append: profile.meta.period_type.to_string(),
                });
            }
        }
        if let Some(st) = &inner.sample_type {
            if *st != profile.meta.sample_type {
                return Err(StoreError::SchemaMismatch {
                    what: "sample type",
                    series: st.to_string(),
                    append: profile.meta.sample_type.to_string(),
                });
            }
        }

        let ts = profile.meta.timestamp;
        if ts <= inner.max_time {
            return Err(StoreError::OutOfOrder {
                timestamp: ts,
                max_time: inner.max_time,
            });
        }

        let index = inner.num_samples;
        inner.tree.insert(index, &profile.tree, &mut inner.columns)?;

        append_timestamp(&mut inner.timestamps, ts, self.chunk_capacity);
        append_dense(&mut inner.durations, profile.meta.duration, self.chunk_capacity);
        append_dense(&mut inner.periods, profile.meta.period, self.chunk_capacity);

        if inner.period_type.is_none() {
            inner.period_type = Some(profile.meta.period_type.clone());
            inner.sample_type = Some(profile.meta.sample_type.clone());
        }
        inner.num_samples += 1;
        inner.max_time = ts;
        if inner.min_time == MIN_TIME_UNSET {
            inner.min_time = ts;
        }
        Ok(())
    }

    /// Removes every leading chunk whose maximum timestamp is strictly below
    /// `cutoff` and keeps all columns mutually consistent. Returns the number
    /// of chunks removed from the timestamps column.
    ///
    /// Post-conditions: `min_time` is the first surviving timestamp, or
    /// `i64::MIN` when nothing survives; `max_time` is unchanged; when all
    /// chunks are removed each dense column is reset to a single fresh chunk so
    /// the appender resumes without reallocation, and `num_samples` is 0.
    pub fn truncate_chunks_before(&self, cutoff: Timestamp) -> Result<usize, StoreError> {
        let mut guard = self.inner.write()?;
        let inner = &mut *guard;

        let k = inner
            .timestamps
            .iter()
            .take_while(|tc| !tc.chunk.is_empty() && tc.max_time < cutoff)
            .count();
        if k == 0 {
            return Ok(0);
        }

        let dropped: usize = inner.timestamps[..k]
            .iter()
            .map(|tc| tc.chunk.num_samples())
            .sum();

        inner.timestamps.drain(..k);
        inner.durations.drain(..k);
        inner.periods.drain(..k);

        if inner.timestamps.is_empty() {
            inner.timestamps.push(TimestampedChunk::new(self.chunk_capacity));
            inner
                .durations
                .push(Arc::new(XorChunk::with_capacity(self.chunk_capacity)));
            inner
                .periods
                .push(Arc::new(XorChunk::with_capacity(self.chunk_capacity)));
            inner.min_time = i64::MIN;
        } else {
            inner.min_time = inner.timestamps[0].min_time;
        }
        inner.num_samples -= dropped;

        let cap = self.chunk_capacity as i64;
        let dropped = dropped as i64;
        for col in inner
            .columns
            .flat
            .values_mut()
            .chain(inner.columns.cumulative.values_mut())
        {
            if col.chunks.is_empty() {
                continue;
            }
            if col.end <= dropped {
                // Everything this key ever stored lies in the removed prefix.
                col.chunks.clear();
                col.start = 0;
                col.end = 0;
                continue;
            }
            let mut d = 0;
            while d < col.chunks.len() && col.start + (d as i64 + 1) * cap <= dropped {
                d += 1;
            }
            col.chunks.drain(..d);
            col.start += d as i64 * cap - dropped;
            col.end -= dropped;
        }

        Ok(k)
    }
}

fn append_dense(chunks: &mut Vec<Arc<XorChunk>>, v: i64, capacity: u16) {
    if chunks.last().map_or(true, |c| c.is_full()) {
        chunks.push(Arc::new(XorChunk::with_capacity(capacity)));
    }
    let last = chunks.len() - 1;
    Arc::make_mut(&mut chunks[last]).append(v);
}

fn append_timestamp(chunks: &mut Vec<TimestampedChunk>, ts: Timestamp, capacity: u16) {
    if chunks.last().map_or(true, |tc| tc.chunk.is_full()) {
        chunks.push(TimestampedChunk::new(capacity));
    }
    let last = chunks.len() - 1;
    let tc = &mut chunks[last];
    Arc::make_mut(&mut tc.chunk).append(ts);
    if tc.chunk.num_samples() == 1 {
        tc.min_time = ts;
    }
    tc.max_time = ts;
}

/// Write handle for one series. All appends go through the series write lock;
/// the handle itself is cheap to clone around worker threads.
#[derive(Debug, Clone)]
pub struct Appender {
    series: Arc<MemSeries>,
    pub(crate) events: Arc<dyn StoreEventListener>,
}

impl Appender {
    pub(crate) fn with_events(series: Arc<MemSeries>, events: Arc<dyn StoreEventListener>) -> Self {
        Appender { series, events }
    }

    pub fn series(&self) -> &Arc<MemSeries> {
        &self.series
    }

    pub fn append(&self, profile: &Profile) -> Result<(), StoreError> {
        match self.series.append(profile) {
            Ok(()) => {
                store_metrics::record_appended_sample();
                Ok(())
            }
            Err(e) => {
                store_metrics::record_append_rejected();
                self.events.on_event(StoreEvent::AppendRejected {
                    series_id: self.series.id,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }
}
