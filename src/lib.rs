#![doc = r#"
smolder: In-memory Profile Time-Series Core in Rust

This crate provides the storage core of a continuous-profiling backend. It
ingests periodically sampled call-stack profiles tagged with a label set and
stores them in a columnar, chunk-encoded form so that slices of
(stack-location, value) over time can be reconstructed cheaply, with support
for:
- A merged-trie series tree over all call stacks ever observed per label set
- XOR-delta-compressed columns of 64-bit values, split into fixed-capacity chunks
- Sparse per-stack value columns alongside dense timestamp/duration/period columns
- Lockstep reconstruction of per-timestamp profile trees across thousands of columns
- Chunk truncation by timestamp that keeps all columns mutually consistent
- Thread-safe architecture: concurrent readers, serialized writers per series

See the README for usage examples and more details.
"#]
// Declare modules
pub mod encoding;
pub mod error;
pub mod iterator;
pub mod metastore;
pub mod profile;
pub mod series;
pub mod storage;
pub mod telemetry;
mod tree;
pub mod types;

/// Main entry point: all profile series, keyed by label set.
pub use crate::storage::{ProfileStore, StoreConfig};
/// A single series and its write handle.
pub use crate::series::{Appender, MemSeries};
/// Error type for store operations.
pub use crate::error::StoreError;
/// Input profiles and the canonical column keys derived from them.
pub use crate::profile::{Profile, ProfileTree, ProfileTreeValueNode, StackSample, ValueKey};
/// Series read path.
pub use crate::iterator::{
    InstantProfile, IteratorTreeNode, MemSeriesIterator, ProfileValue, RangeSeriesIterator,
};
/// Chunk codec.
pub use crate::encoding::{MultiChunkIterator, XorChunk, DEFAULT_SAMPLES_PER_CHUNK};
/// Metadata collaborator interface.
pub use crate::metastore::{Function, InMemoryMetaStore, Line, Location, Mapping, MetaStore};
/// Structured event hook for observability.
pub use crate::telemetry::{noop_event_listener, StoreEvent, StoreEventListener};
pub use crate::types::{
    InstantProfileMeta, Label, LabelSet, LocationId, NumLabels, NumUnits, SampleValue,
    StringLabels, Timestamp, ValueType,
};
