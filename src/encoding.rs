//! Chunk encoding: XOR-delta compression for streams of `int64` samples, plus
//! single- and multi-chunk iterators used by the series read path.

use crate::error::StoreError;
use std::sync::Arc;

/// Default number of samples a chunk holds before the appender rolls a new one.
pub const DEFAULT_SAMPLES_PER_CHUNK: u16 = 120;

/// Append-only bit buffer. The last byte may be partially filled; `spare` is the
/// number of free bits remaining in it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct BitBuf {
    bytes: Vec<u8>,
    spare: u8,
}

impl BitBuf {
    fn push_bit(&mut self, bit: bool) {
        if self.spare == 0 {
            self.bytes.push(0);
            self.spare = 8;
        }
        if bit {
            let last = self.bytes.len() - 1;
            self.bytes[last] |= 1 << (self.spare - 1);
        }
        self.spare -= 1;
    }

    fn push_bits(&mut self, mut v: u64, count: u8) {
        if count == 0 {
            return;
        }
        if count < 64 {
            v &= (1u64 << count) - 1;
        }
        for i in (0..count).rev() {
            self.push_bit(((v >> i) & 1) == 1);
        }
    }

    fn bit_len(&self) -> usize {
        self.bytes.len() * 8 - self.spare as usize
    }
}

fn read_bit(bytes: &[u8], pos: &mut usize, limit: usize) -> Result<bool, StoreError> {
    if *pos >= limit {
        return Err(StoreError::Encoding(
            "chunk bitstream truncated".to_string(),
        ));
    }
    let byte = bytes[*pos / 8];
    let bit = (byte >> (7 - (*pos % 8))) & 1 == 1;
    *pos += 1;
    Ok(bit)
}

fn read_bits(bytes: &[u8], pos: &mut usize, limit: usize, count: u8) -> Result<u64, StoreError> {
    let mut out = 0u64;
    for _ in 0..count {
        out <<= 1;
        if read_bit(bytes, pos, limit)? {
            out |= 1;
        }
    }
    Ok(out)
}

/// Fixed-capacity chunk of XOR-delta-encoded `int64` samples.
///
/// The first value is stored verbatim (64 bits). Every further value is encoded
/// as the XOR with its predecessor: a single `0` bit when unchanged, otherwise
/// `1` followed by either a reuse of the previous leading/trailing-zero window
/// (`0` + significant bits) or a fresh window (`1` + 6-bit leading-zero count +
/// 6-bit significant-bit count + significant bits).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XorChunk {
    bits: BitBuf,
    num: u16,
    capacity: u16,
    prev: u64,
    leading: u8,
    trailing: u8,
    sigbits: u8,
}

impl Default for XorChunk {
    fn default() -> Self {
        Self::new()
    }
}

impl XorChunk {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SAMPLES_PER_CHUNK)
    }

    pub fn with_capacity(capacity: u16) -> Self {
        XorChunk {
            bits: BitBuf::default(),
            num: 0,
            capacity,
            prev: 0,
            leading: 0,
            trailing: 0,
            sigbits: 0,
        }
    }

    /// Builds a chunk holding exactly `values`, with the default capacity.
    pub fn from_values(values: &[i64]) -> Self {
        let mut c = Self::new();
        for &v in values {
            c.append(v);
        }
        c
    }

    pub fn num_samples(&self) -> usize {
        self.num as usize
    }

    pub fn is_empty(&self) -> bool {
        self.num == 0
    }

    pub fn is_full(&self) -> bool {
        self.num >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Pushes one value. The caller is responsible for rolling a new chunk once
    /// [`XorChunk::is_full`] reports true; appending past capacity still encodes
    /// correctly but defeats the chunk-alignment the columns rely on.
    pub fn append(&mut self, v: i64) {
        let bits = v as u64;
        if self.num == 0 {
            self.bits.push_bits(bits, 64);
        } else {
            let x = self.prev ^ bits;
            if x == 0 {
                self.bits.push_bit(false);
            } else {
                self.bits.push_bit(true);
                let leading = x.leading_zeros() as u8;
                let trailing = x.trailing_zeros() as u8;
                let sigbits = 64 - leading - trailing;

                if self.sigbits != 0 && leading >= self.leading && trailing >= self.trailing {
                    self.bits.push_bit(false);
                    self.bits.push_bits(x >> self.trailing, self.sigbits);
                } else {
                    self.bits.push_bit(true);
                    self.bits.push_bits(leading as u64, 6);
                    self.bits.push_bits((sigbits - 1) as u64, 6);
                    self.bits.push_bits(x >> trailing, sigbits);
                    self.leading = leading;
                    self.trailing = trailing;
                    self.sigbits = sigbits;
                }
            }
        }
        self.prev = bits;
        self.num += 1;
    }

    pub fn iter(&self) -> XorChunkIterator<'_> {
        XorChunkIterator {
            chunk: self,
            cursor: ChunkCursor::default(),
        }
    }

    /// Decodes the whole chunk.
    pub fn values(&self) -> Result<Vec<i64>, StoreError> {
        let mut out = Vec::with_capacity(self.num as usize);
        let mut cursor = ChunkCursor::default();
        while cursor.read < self.num {
            out.push(cursor.next_value(self)?);
        }
        Ok(out)
    }
}

/// Decoder state for one chunk. Tracks the bit position, the previous value and
/// the current leading/trailing-zero window.
#[derive(Debug, Clone, Default)]
struct ChunkCursor {
    bit: usize,
    read: u16,
    value: u64,
    leading: u8,
    trailing: u8,
    sigbits: u8,
}

impl ChunkCursor {
    fn next_value(&mut self, chunk: &XorChunk) -> Result<i64, StoreError> {
        let bytes = &chunk.bits.bytes;
        let limit = chunk.bits.bit_len();

        if self.read == 0 {
            self.value = read_bits(bytes, &mut self.bit, limit, 64)?;
        } else {
            let changed = read_bit(bytes, &mut self.bit, limit)?;
            if changed {
                let fresh_window = read_bit(bytes, &mut self.bit, limit)?;
                if fresh_window {
                    let leading = read_bits(bytes, &mut self.bit, limit, 6)? as u8;
                    let sigbits = read_bits(bytes, &mut self.bit, limit, 6)? as u8 + 1;
                    let trailing = 64u8
                        .checked_sub(leading)
                        .and_then(|r| r.checked_sub(sigbits))
                        .ok_or_else(|| {
                            StoreError::Encoding("invalid xor bit widths".to_string())
                        })?;
                    self.leading = leading;
                    self.trailing = trailing;
                    self.sigbits = sigbits;
                } else if self.sigbits == 0 {
                    return Err(StoreError::Encoding(
                        "xor window reuse before initialization".to_string(),
                    ));
                }
                let significant = read_bits(bytes, &mut self.bit, limit, self.sigbits)?;
                self.value ^= significant << self.trailing;
            }
        }
        self.read += 1;
        Ok(self.value as i64)
    }
}

/// Iterator over a single chunk's decoded values.
pub struct XorChunkIterator<'a> {
    chunk: &'a XorChunk,
    cursor: ChunkCursor,
}

impl Iterator for XorChunkIterator<'_> {
    type Item = Result<i64, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.read >= self.chunk.num {
            return None;
        }
        Some(self.cursor.next_value(self.chunk))
    }
}

/// Iterator over the concatenated values of a snapshotted chunk list.
///
/// Follows the series read-path contract: `next` advances and reports whether a
/// value is available, `at` returns the current value, `read` returns how many
/// values have been emitted so far (the cross-column lockstep probe), and `err`
/// surfaces the first decode failure.
#[derive(Debug)]
pub struct MultiChunkIterator {
    chunks: Vec<Arc<XorChunk>>,
    idx: usize,
    cursor: ChunkCursor,
    value: i64,
    read: u64,
    err: Option<StoreError>,
}

impl MultiChunkIterator {
    pub fn new(chunks: Vec<Arc<XorChunk>>) -> Self {
        MultiChunkIterator {
            chunks,
            idx: 0,
            cursor: ChunkCursor::default(),
            value: 0,
            read: 0,
            err: None,
        }
    }

    pub fn next(&mut self) -> bool {
        if self.err.is_some() {
            return false;
        }
        loop {
            let chunk = match self.chunks.get(self.idx) {
                Some(c) => c,
                None => return false,
            };
            if self.cursor.read >= chunk.num {
                self.idx += 1;
                self.cursor = ChunkCursor::default();
                continue;
            }
            match self.cursor.next_value(chunk) {
                Ok(v) => {
                    self.value = v;
                    self.read += 1;
                    return true;
                }
                Err(e) => {
                    self.err = Some(e);
                    return false;
                }
            }
        }
    }

    pub fn at(&self) -> i64 {
        self.value
    }

    /// Total values emitted so far in this iteration.
    pub fn read(&self) -> u64 {
        self.read
    }

    pub fn err(&self) -> Option<&StoreError> {
        self.err.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trip_single_chunk() {
        let values = [3, 3, -1, 0, i64::MAX, i64::MIN, 42, 42, 43];
        let chunk = XorChunk::from_values(&values);
        assert_eq!(chunk.num_samples(), values.len());
        assert_eq!(chunk.values().unwrap(), values);
    }

    #[test]
    fn constant_stream_stays_small() {
        let mut chunk = XorChunk::new();
        for _ in 0..120 {
            chunk.append(7);
        }
        assert!(chunk.is_full());
        // 64 bits for the first value, one bit per repeat.
        assert!(chunk.bits.bytes.len() <= 8 + 120 / 8 + 1);
        assert_eq!(chunk.values().unwrap(), vec![7; 120]);
    }

    #[test]
    fn window_reuse_and_reset() {
        // Small deltas first (narrow window), then a wide jump forcing a fresh window.
        let values = [1000, 1001, 1003, 1002, i64::MIN / 3, 17];
        let chunk = XorChunk::from_values(&values);
        assert_eq!(chunk.values().unwrap(), values);
    }

    #[test]
    fn capacity_tracking() {
        let mut chunk = XorChunk::with_capacity(3);
        assert!(!chunk.is_full());
        chunk.append(1);
        chunk.append(2);
        assert!(!chunk.is_full());
        chunk.append(3);
        assert!(chunk.is_full());
        assert_eq!(chunk.capacity(), 3);
    }

    #[test]
    fn single_chunk_iterator_matches_values() {
        let values = [5, -5, 5, -5];
        let chunk = XorChunk::from_values(&values);
        let decoded: Result<Vec<_>, _> = chunk.iter().collect();
        assert_eq!(decoded.unwrap(), values);
    }

    #[test]
    fn multi_chunk_iterator_concatenates_and_counts() {
        let a = Arc::new(XorChunk::from_values(&[1, 2, 3]));
        let b = Arc::new(XorChunk::from_values(&[4, 5]));
        let mut it = MultiChunkIterator::new(vec![a, b]);

        let mut seen = Vec::new();
        while it.next() {
            seen.push(it.at());
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        assert_eq!(it.read(), 5);
        assert!(it.err().is_none());
        // Exhausted iterator stays exhausted.
        assert!(!it.next());
        assert_eq!(it.read(), 5);
    }

    #[test]
    fn multi_chunk_iterator_skips_empty_chunks() {
        let empty = Arc::new(XorChunk::new());
        let b = Arc::new(XorChunk::from_values(&[9]));
        let mut it = MultiChunkIterator::new(vec![empty, b]);
        assert!(it.next());
        assert_eq!(it.at(), 9);
        assert!(!it.next());
    }

    #[test]
    fn empty_iterator() {
        let mut it = MultiChunkIterator::new(Vec::new());
        assert!(!it.next());
        assert_eq!(it.read(), 0);
        assert!(it.err().is_none());
    }

    #[test]
    fn snapshot_is_isolated_from_later_appends() {
        let mut column = vec![Arc::new(XorChunk::from_values(&[1, 2]))];
        let mut it = MultiChunkIterator::new(column.clone());

        // Appender-style copy-on-write: the snapshot above keeps a strong
        // reference, so make_mut clones before mutating.
        Arc::make_mut(&mut column[0]).append(3);

        let mut seen = Vec::new();
        while it.next() {
            seen.push(it.at());
        }
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(column[0].values().unwrap(), vec![1, 2, 3]);
    }

    proptest! {
        #[test]
        fn round_trip_any_values(values in prop::collection::vec(any::<i64>(), 1..300)) {
            let mut chunks: Vec<Arc<XorChunk>> = Vec::new();
            let mut open = XorChunk::new();
            for &v in &values {
                if open.is_full() {
                    chunks.push(Arc::new(std::mem::take(&mut open)));
                }
                open.append(v);
            }
            chunks.push(Arc::new(open));

            let mut it = MultiChunkIterator::new(chunks);
            let mut decoded = Vec::new();
            while it.next() {
                decoded.push(it.at());
            }
            prop_assert!(it.err().is_none());
            prop_assert_eq!(decoded, values.clone());
            prop_assert_eq!(it.read(), values.len() as u64);
        }
    }
}
