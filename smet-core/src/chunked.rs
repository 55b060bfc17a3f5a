//! # Chunked Associative Array
//!
//! Provide a key-ordered multimap of `(i64 key, i64 value)` pairs split into
//! fixed-size chunks, so that time-windowed reservoirs can append cheaply and
//! drop stale ranges without touching every entry.
//!
//! ## Design Principles
//!
//! 1. **Append Fast Path**: In-order puts take the shared list lock plus the
//!    tail chunk's own mutex; concurrent readers are not excluded.
//! 2. **Structural Changes Are Exclusive**: Adding, splitting, or dropping
//!    chunks takes the list lock exclusively and is rare (once per chunk).
//! 3. **Ordered Chunks**: Every key in chunk `i` is `<=` every key in chunk
//!    `i + 1`. Out-of-order keys are inserted into the chunk that covers them
//!    (splitting it if full) rather than appended.
//! 4. **Chunk Recycling**: Retired chunks are kept in a small spare pool and
//!    reused, so a steady load stops allocating.
//!
//! ## Structure Overview
//!
//! ```text
//! ChunkedAssociativeArray
//!   └── inner: RwLock<ChunkList>
//!         ├── chunks: VecDeque<Mutex<Chunk>>   (head = oldest keys)
//!         │     └── Chunk { keys, values, start }
//!         │           live entries are keys[start..]
//!         └── spare: Vec<Chunk>                (recycled, at most 128)
//!
//! [(-3: 3) (-2: 1) (0: 5) ]->[(3: 0) (9: 8) (15: 0) ]->[(19: 5) ]
//!       |-2 ____________________________ 20|               trim(-2, 20)
//! ```

use std::collections::VecDeque;
use std::fmt;

use parking_lot::{Mutex, RwLock};

use smet_common::{SmetError, SmetResult};

/// Default number of entries per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Upper bound on retired chunks kept for reuse.
const MAX_SPARE_CHUNKS: usize = 128;

/// Fixed-capacity run of entries sorted by key.
#[derive(Debug)]
struct Chunk {
    keys: Vec<i64>,
    values: Vec<i64>,
    /// Entries before `start` were trimmed from the head.
    start: usize,
    capacity: usize,
}

impl Chunk {
    fn with_capacity(capacity: usize) -> Self {
        Chunk {
            keys: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
            start: 0,
            capacity,
        }
    }

    fn reset(&mut self) {
        self.keys.clear();
        self.values.clear();
        self.start = 0;
    }

    #[inline]
    fn len(&self) -> usize {
        self.keys.len() - self.start
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.keys.len() >= self.capacity
    }

    #[inline]
    fn first_key(&self) -> Option<i64> {
        self.keys.get(self.start).copied()
    }

    #[inline]
    fn last_key(&self) -> Option<i64> {
        if self.len() == 0 {
            None
        } else {
            self.keys.last().copied()
        }
    }

    /// Returns true when `key` can be appended without breaking order.
    #[inline]
    fn accepts_append(&self, key: i64) -> bool {
        !self.is_full() && self.last_key().map_or(true, |last| last <= key)
    }

    #[inline]
    fn push(&mut self, key: i64, value: i64) {
        self.keys.push(key);
        self.values.push(value);
    }

    /// Drops head-trimmed slots so their space can be reused.
    fn compact(&mut self) {
        if self.start > 0 {
            self.keys.drain(..self.start);
            self.values.drain(..self.start);
            self.start = 0;
        }
    }

    /// Inserts after any equal keys; returns the upper half if the chunk overflowed.
    fn insert_sorted(&mut self, key: i64, value: i64) -> Option<Chunk> {
        self.compact();
        let pos = self.keys.partition_point(|&k| k <= key);
        self.keys.insert(pos, key);
        self.values.insert(pos, value);

        if self.keys.len() <= self.capacity {
            return None;
        }

        let mid = self.keys.len() / 2;
        let mut upper = Chunk::with_capacity(self.capacity);
        upper.keys.extend(self.keys.drain(mid..));
        upper.values.extend(self.values.drain(mid..));
        Some(upper)
    }

    /// Keeps only keys `<= max_key`. Returns the remaining length.
    fn truncate_above(&mut self, max_key: i64) -> usize {
        let keep = self.keys[self.start..].partition_point(|&k| k <= max_key);
        self.keys.truncate(self.start + keep);
        self.values.truncate(self.start + keep);
        self.len()
    }

    /// Skips keys `< min_key`. Returns the remaining length.
    fn skip_below(&mut self, min_key: i64) -> usize {
        self.start += self.keys[self.start..].partition_point(|&k| k < min_key);
        self.len()
    }

    fn copy_values_into(&self, out: &mut Vec<i64>) {
        out.extend_from_slice(&self.values[self.start..]);
    }
}

/// Chunk list plus the recycle pool; guarded as one unit.
#[derive(Debug)]
struct ChunkList {
    chunks: VecDeque<Mutex<Chunk>>,
    spare: Vec<Chunk>,
}

impl ChunkList {
    fn allocate(&mut self, chunk_size: usize) -> Chunk {
        match self.spare.pop() {
            Some(mut chunk) => {
                chunk.reset();
                chunk
            }
            None => Chunk::with_capacity(chunk_size),
        }
    }

    fn recycle(&mut self, chunk: Chunk) {
        if self.spare.len() < MAX_SPARE_CHUNKS {
            self.spare.push(chunk);
        }
    }

    fn pop_front(&mut self) {
        if let Some(chunk) = self.chunks.pop_front() {
            self.recycle(chunk.into_inner());
        }
    }

    fn pop_back(&mut self) {
        if let Some(chunk) = self.chunks.pop_back() {
            self.recycle(chunk.into_inner());
        }
    }
}

/// Concurrent, key-ordered, chunked multimap of `i64` pairs.
pub struct ChunkedAssociativeArray {
    inner: RwLock<ChunkList>,
    chunk_size: usize,
}

impl ChunkedAssociativeArray {
    /// Creates an empty array with `DEFAULT_CHUNK_SIZE` entries per chunk.
    pub fn new() -> Self {
        ChunkedAssociativeArray {
            inner: RwLock::new(ChunkList {
                chunks: VecDeque::new(),
                spare: Vec::new(),
            }),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Creates an empty array with a caller-provided chunk size.
    ///
    /// # Errors
    /// Returns `SmetError::InvalidChunkSize` for a zero chunk size.
    pub fn with_chunk_size(chunk_size: usize) -> SmetResult<Self> {
        if chunk_size == 0 {
            return Err(SmetError::InvalidChunkSize(chunk_size));
        }
        let mut array = Self::new();
        array.chunk_size = chunk_size;
        Ok(array)
    }

    /// Inserts a pair, keeping all entries ordered by key.
    ///
    /// **Logic**:
    /// 1. Shared lock: if the tail chunk has room and `key` is not below its
    ///    last key, append under the tail's mutex and return.
    /// 2. Otherwise take the exclusive lock and either start a new tail chunk
    ///    or insert into the chunk covering `key`, splitting it when full.
    pub fn put(&self, key: i64, value: i64) {
        {
            let list = self.inner.read();
            if let Some(tail) = list.chunks.back() {
                let mut tail = tail.lock();
                if tail.accepts_append(key) {
                    tail.push(key, value);
                    return;
                }
            }
        }
        self.put_slow(key, value);
    }

    fn put_slow(&self, key: i64, value: i64) {
        let mut list = self.inner.write();
        let chunk_size = self.chunk_size;

        let tail_last = match list.chunks.back_mut() {
            Some(tail) => {
                let tail = tail.get_mut();
                // Re-check: another writer may have made room or moved the tail.
                if tail.accepts_append(key) {
                    tail.push(key, value);
                    return;
                }
                tail.last_key()
            }
            None => None,
        };

        if tail_last.map_or(true, |last| last <= key) {
            let mut chunk = list.allocate(chunk_size);
            chunk.push(key, value);
            list.chunks.push_back(Mutex::new(chunk));
            return;
        }

        // Out of order: the last chunk starting at or below `key` owns it,
        // or the head chunk when `key` precedes everything.
        let target = list
            .chunks
            .iter_mut()
            .rposition(|chunk| chunk.get_mut().first_key().map_or(false, |first| first <= key))
            .unwrap_or(0);

        if let Some(upper) = list.chunks[target].get_mut().insert_sorted(key, value) {
            list.chunks.insert(target + 1, Mutex::new(upper));
        }
    }

    /// Removes every entry whose key lies outside `[min_key, max_key]`.
    ///
    /// Only chunks at the two ends are visited: whole chunks outside the
    /// range are dropped and the straddling chunk at each end is pruned.
    pub fn trim(&self, min_key: i64, max_key: i64) {
        if min_key > max_key {
            self.clear();
            return;
        }

        {
            let list = self.inner.read();
            let head_ok = list
                .chunks
                .front()
                .and_then(|chunk| chunk.lock().first_key())
                .map_or(true, |first| first >= min_key);
            let tail_ok = list
                .chunks
                .back()
                .and_then(|chunk| chunk.lock().last_key())
                .map_or(true, |last| last <= max_key);
            if head_ok && tail_ok {
                return;
            }
        }

        let mut list = self.inner.write();

        while let Some(tail) = list.chunks.back_mut() {
            let tail = tail.get_mut();
            let beyond = tail.first_key().map_or(true, |first| first > max_key);
            if beyond || tail.truncate_above(max_key) == 0 {
                list.pop_back();
            } else {
                break;
            }
        }

        while let Some(head) = list.chunks.front_mut() {
            let head = head.get_mut();
            let before = head.last_key().map_or(true, |last| last < min_key);
            if before || head.skip_below(min_key) == 0 {
                list.pop_front();
            } else {
                break;
            }
        }
    }

    /// Subtracts `delta` from every key.
    ///
    /// Callers must first trim keys that would underflow; order is preserved
    /// as long as no key leaves the `i64` range.
    pub fn shift_keys(&self, delta: i64) {
        let mut list = self.inner.write();
        for chunk in list.chunks.iter_mut() {
            let chunk = chunk.get_mut();
            let start = chunk.start;
            for key in &mut chunk.keys[start..] {
                *key = key.wrapping_sub(delta);
            }
        }
    }

    /// Returns all values in key order.
    pub fn values(&self) -> Vec<i64> {
        let list = self.inner.read();
        let guards: Vec<_> = list.chunks.iter().map(|chunk| chunk.lock()).collect();
        let total = guards.iter().map(|chunk| chunk.len()).sum();
        let mut out = Vec::with_capacity(total);
        for chunk in &guards {
            chunk.copy_values_into(&mut out);
        }
        out
    }

    /// Returns the number of live entries.
    pub fn size(&self) -> usize {
        let list = self.inner.read();
        list.chunks.iter().map(|chunk| chunk.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Removes every entry, recycling the chunks.
    pub fn clear(&self) {
        let mut list = self.inner.write();
        while !list.chunks.is_empty() {
            list.pop_front();
        }
    }

    /// Returns the number of live chunks.
    pub fn chunk_count(&self) -> usize {
        self.inner.read().chunks.len()
    }

    /// Renders the chunk layout, e.g. `[(1: 10) (2: 20) ]->[(3: 30) ]`.
    pub fn render(&self) -> String {
        let list = self.inner.read();
        let mut out = String::new();
        for (idx, chunk) in list.chunks.iter().enumerate() {
            if idx > 0 {
                out.push_str("->");
            }
            let chunk = chunk.lock();
            out.push('[');
            for i in chunk.start..chunk.keys.len() {
                out.push_str(&format!("({}: {}) ", chunk.keys[i], chunk.values[i]));
            }
            out.push(']');
        }
        out
    }
}

impl Default for ChunkedAssociativeArray {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChunkedAssociativeArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedAssociativeArray")
            .field("chunk_size", &self.chunk_size)
            .field("chunks", &self.render())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;

    fn sample_array() -> ChunkedAssociativeArray {
        let array = ChunkedAssociativeArray::with_chunk_size(3).unwrap();
        let pairs = [
            (-3, 3),
            (-2, 1),
            (0, 5),
            (3, 0),
            (9, 8),
            (15, 0),
            (19, 5),
            (21, 5),
            (34, -9),
            (109, 5),
        ];
        for (key, value) in pairs {
            array.put(key, value);
        }
        array
    }

    #[test]
    fn test_put_fills_chunks_in_order() {
        let array = sample_array();
        assert_eq!(
            array.render(),
            "[(-3: 3) (-2: 1) (0: 5) ]->[(3: 0) (9: 8) (15: 0) ]->[(19: 5) (21: 5) (34: -9) ]->[(109: 5) ]"
        );
        assert_eq!(array.values(), vec![3, 1, 5, 0, 8, 0, 5, 5, -9, 5]);
        assert_eq!(array.size(), 10);
    }

    #[test]
    fn test_trim_prunes_both_ends() {
        let array = sample_array();
        array.trim(-2, 20);
        assert_eq!(
            array.render(),
            "[(-2: 1) (0: 5) ]->[(3: 0) (9: 8) (15: 0) ]->[(19: 5) ]"
        );
        assert_eq!(array.values(), vec![1, 5, 0, 8, 0, 5]);
        assert_eq!(array.size(), 6);
    }

    #[test]
    fn test_trim_bounds_are_inclusive() {
        let array = sample_array();
        array.trim(3, 21);
        assert_eq!(array.values(), vec![0, 8, 0, 5, 5]);
    }

    #[test]
    fn test_trim_everything() {
        let array = sample_array();
        array.trim(200, 300);
        assert!(array.is_empty());
        assert_eq!(array.chunk_count(), 0);

        let array = sample_array();
        array.trim(5, 4);
        assert!(array.is_empty());
    }

    #[test]
    fn test_out_of_order_key_lands_in_covering_chunk() {
        let array = sample_array();
        array.put(10, 42);
        assert_eq!(
            array.render(),
            "[(-3: 3) (-2: 1) (0: 5) ]->[(3: 0) (9: 8) ]->[(10: 42) (15: 0) ]->[(19: 5) (21: 5) (34: -9) ]->[(109: 5) ]"
        );

        array.put(-10, 7);
        assert_eq!(array.values()[0], 7);
        assert_eq!(array.size(), 12);
    }

    #[test]
    fn test_duplicate_keys_keep_insertion_order() {
        let array = ChunkedAssociativeArray::with_chunk_size(2).unwrap();
        array.put(1, 1);
        array.put(5, 2);
        array.put(5, 3);
        array.put(5, 4);
        array.put(3, 5);
        array.put(5, 6);
        assert_eq!(array.values(), vec![1, 5, 2, 3, 4, 6]);
    }

    #[test]
    fn test_clear_recycles_chunks() {
        let array = sample_array();
        array.clear();
        assert_eq!(array.size(), 0);
        assert_eq!(array.render(), "");

        array.put(1, 1);
        array.put(2, 2);
        assert_eq!(array.values(), vec![1, 2]);
    }

    #[test]
    fn test_shift_keys_preserves_order() {
        let array = sample_array();
        array.trim(0, 200);
        array.shift_keys(10);
        assert_eq!(
            array.render(),
            "[(-10: 5) ]->[(-7: 0) (-1: 8) (5: 0) ]->[(9: 5) (11: 5) (24: -9) ]->[(99: 5) ]"
        );
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        assert!(matches!(
            ChunkedAssociativeArray::with_chunk_size(0),
            Err(SmetError::InvalidChunkSize(0))
        ));
    }

    #[test]
    fn test_matches_model_under_random_operations() {
        let mut rng = StdRng::seed_from_u64(0x5EED);
        for chunk_size in [1, 2, 3, 7, 64] {
            let array = ChunkedAssociativeArray::with_chunk_size(chunk_size).unwrap();
            // (key, sequence, value); sequence orders equal keys.
            let mut model: Vec<(i64, u64, i64)> = Vec::new();
            let mut seq = 0u64;

            for _ in 0..2_000 {
                if rng.gen_bool(0.9) {
                    let key = if rng.gen_bool(0.8) {
                        model.last().map_or(0, |e| e.0) + rng.gen_range(0..3)
                    } else {
                        rng.gen_range(-50..500)
                    };
                    let value = rng.gen_range(-1_000..1_000);
                    array.put(key, value);
                    model.push((key, seq, value));
                    seq += 1;
                    model.sort_by_key(|e| (e.0, e.1));
                } else {
                    let lo = rng.gen_range(-60..300);
                    let hi = lo + rng.gen_range(0..400);
                    array.trim(lo, hi);
                    model.retain(|e| e.0 >= lo && e.0 <= hi);
                }

                let expected: Vec<i64> = model.iter().map(|e| e.2).collect();
                assert_eq!(array.values(), expected, "chunk_size={chunk_size}");
                assert_eq!(array.size(), expected.len());
            }
        }
    }

    #[test]
    fn test_concurrent_puts_are_not_lost() {
        let array = Arc::new(ChunkedAssociativeArray::with_chunk_size(16).unwrap());
        let mut handles = Vec::new();
        for thread in 0..4i64 {
            let array = Arc::clone(&array);
            handles.push(std::thread::spawn(move || {
                for i in 0..5_000i64 {
                    array.put(i * 4 + thread, thread);
                    if i % 500 == 0 {
                        let _ = array.values();
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(array.size(), 20_000);
        let rendered_keys: Vec<i64> = {
            let list = array.inner.read();
            list.chunks
                .iter()
                .flat_map(|c| {
                    let c = c.lock();
                    c.keys[c.start..].to_vec()
                })
                .collect()
        };
        assert!(rendered_keys.windows(2).all(|w| w[0] <= w[1]));
    }
}
