//! Multi-series storage: one [`MemSeries`] per label set, plus the retention
//! sweep that truncates old chunks across every series.

use crate::encoding::DEFAULT_SAMPLES_PER_CHUNK;
use crate::error::StoreError;
use crate::series::{Appender, MemSeries};
use crate::telemetry::{noop_event_listener, store_metrics, StoreEvent, StoreEventListener};
use crate::types::{LabelSet, Timestamp};

use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Configuration options for the profile store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Number of samples per chunk in every column.
    pub chunk_capacity: u16,
    /// Optional retention window. When set, [`ProfileStore::apply_retention`]
    /// truncates chunks older than `now - retention` across all series.
    pub retention: Option<Duration>,
    /// Structured event hook for observability (no-op by default).
    pub event_listener: Arc<dyn StoreEventListener>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            chunk_capacity: DEFAULT_SAMPLES_PER_CHUNK,
            retention: None,
            event_listener: noop_event_listener(),
        }
    }
}

/// In-memory store of all profile series, keyed by their label set.
/// Uses RwLock for concurrent series lookup during ingestion and queries.
#[derive(Debug)]
pub struct ProfileStore {
    config: StoreConfig,
    series: RwLock<HashMap<LabelSet, Arc<MemSeries>>>,
    next_id: AtomicU64,
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        ProfileStore {
            config,
            series: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn get(&self, label_set: &LabelSet) -> Result<Option<Arc<MemSeries>>, StoreError> {
        Ok(self.series.read()?.get(label_set).cloned())
    }

    /// Returns the series for `label_set`, creating it on first use.
    pub fn get_or_create(&self, label_set: LabelSet) -> Result<Arc<MemSeries>, StoreError> {
        if let Some(series) = self.series.read()?.get(&label_set) {
            return Ok(Arc::clone(series));
        }

        let mut map = self.series.write()?;
        // Re-check: another writer may have created it between the locks.
        if let Some(series) = map.get(&label_set) {
            return Ok(Arc::clone(series));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let series = Arc::new(MemSeries::with_chunk_capacity(
            id,
            label_set.clone(),
            self.config.chunk_capacity,
        ));
        map.insert(label_set.clone(), Arc::clone(&series));
        store_metrics::set_active_series(map.len());
        self.config.event_listener.on_event(StoreEvent::SeriesCreated {
            id,
            label_set: label_set.to_string(),
        });
        Ok(series)
    }

    /// Write handle for the series with the given label set, creating the
    /// series if needed.
    pub fn appender(&self, label_set: LabelSet) -> Result<Appender, StoreError> {
        let series = self.get_or_create(label_set)?;
        Ok(Appender::with_events(
            series,
            Arc::clone(&self.config.event_listener),
        ))
    }

    pub fn series_count(&self) -> Result<usize, StoreError> {
        Ok(self.series.read()?.len())
    }

    /// Applies the configured retention window relative to `now` (milliseconds
    /// since epoch): chunks whose newest sample is older than `now - retention`
    /// are truncated in every series. A no-op returning 0 when no retention
    /// window is configured. The store spawns no threads; callers drive this
    /// from their own tick.
    pub fn apply_retention(&self, now: Timestamp) -> Result<usize, StoreError> {
        let retention = match self.config.retention {
            Some(retention) => retention,
            None => return Ok(0),
        };
        let cutoff = now.saturating_sub(retention.as_millis() as i64);
        self.truncate_before(cutoff)
    }

    /// Truncates chunks older than `cutoff` in every series. Returns the total
    /// number of timestamp chunks removed. Series are swept in parallel; a
    /// failing series is reported through the event listener and skipped.
    pub fn truncate_before(&self, cutoff: Timestamp) -> Result<usize, StoreError> {
        let all: Vec<Arc<MemSeries>> = self.series.read()?.values().cloned().collect();
        let listener = &self.config.event_listener;

        let total: usize = all
            .par_iter()
            .map(|series| match series.truncate_chunks_before(cutoff) {
                Ok(chunks) => {
                    if chunks > 0 {
                        listener.on_event(StoreEvent::ChunksTruncated {
                            series_id: series.id(),
                            chunks,
                        });
                    }
                    chunks
                }
                Err(e) => {
                    listener.on_event(StoreEvent::TruncateFailed {
                        series_id: series.id(),
                        error: e.to_string(),
                    });
                    0
                }
            })
            .sum();

        store_metrics::record_truncated_chunks(total as u64);
        Ok(total)
    }
}
