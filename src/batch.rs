//! Arena-backed record batches and the bounded pool that recycles them.
//!
//! A [`RecordBatch`] holds up to `capacity` parsed records whose bytes all
//! live in one contiguous arena; each record is just four `(offset, len)`
//! spans into that arena. Batches are handed out by a [`BatchPool`] of
//! fixed size, which is what bounds the memory of a whole pipeline run:
//! at most `pool_size * arena_capacity` record bytes are ever live.

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::{Condvar, Mutex};

/// A byte range inside a batch arena.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    start: u32,
    len: u32,
}

impl Span {
    pub fn new(start: usize, len: usize) -> Self {
        debug_assert!(start <= u32::MAX as usize && len <= u32::MAX as usize);
        Span {
            start: start as u32,
            len: len as u32,
        }
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn range(&self) -> Range<usize> {
        let start = self.start as usize;
        start..start + self.len as usize
    }

    /// Narrows the span to `keep` relative offsets, used when trimming.
    pub fn slice(&self, keep: Range<usize>) -> Span {
        debug_assert!(keep.end <= self.len as usize && keep.start <= keep.end);
        Span {
            start: self.start + keep.start as u32,
            len: (keep.end - keep.start) as u32,
        }
    }
}

/// Location of one record's four fields inside the arena.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordDesc {
    pub name: Span,
    pub seq: Span,
    pub plus: Span,
    pub qual: Span,
}

impl RecordDesc {
    /// Shift all spans by `delta` bytes, used when a record is moved
    /// between arenas.
    pub(crate) fn rebase(&self, delta: i64) -> RecordDesc {
        let shift = |s: Span| Span {
            start: (s.start as i64 + delta) as u32,
            len: s.len,
        };
        RecordDesc {
            name: shift(self.name),
            seq: shift(self.seq),
            plus: shift(self.plus),
            qual: shift(self.qual),
        }
    }
}

/// Immutable view of one record inside a batch.
#[derive(Clone, Copy)]
pub struct Record<'a> {
    arena: &'a [u8],
    desc: &'a RecordDesc,
}

impl<'a> Record<'a> {
    pub fn name(&self) -> &'a [u8] {
        &self.arena[self.desc.name.range()]
    }

    pub fn seq(&self) -> &'a [u8] {
        &self.arena[self.desc.seq.range()]
    }

    pub fn plus(&self) -> &'a [u8] {
        &self.arena[self.desc.plus.range()]
    }

    pub fn qual(&self) -> &'a [u8] {
        &self.arena[self.desc.qual.range()]
    }
}

/// Mutable handle over one record. The arena itself stays read-only;
/// mutation means narrowing the sequence and quality spans in lockstep,
/// which keeps `seq.len() == qual.len()` by construction.
pub struct RecordMut<'a> {
    arena: &'a [u8],
    desc: &'a mut RecordDesc,
}

impl<'a> RecordMut<'a> {
    pub fn name(&self) -> &[u8] {
        &self.arena[self.desc.name.range()]
    }

    pub fn seq(&self) -> &[u8] {
        &self.arena[self.desc.seq.range()]
    }

    pub fn qual(&self) -> &[u8] {
        &self.arena[self.desc.qual.range()]
    }

    pub fn len(&self) -> usize {
        self.desc.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.desc.seq.is_empty()
    }

    /// Keeps only `[start, end)` of the sequence and its quality bytes.
    pub fn trim(&mut self, keep: Range<usize>) {
        self.desc.seq = self.desc.seq.slice(keep.clone());
        self.desc.qual = self.desc.qual.slice(keep);
    }
}

/// A fixed-capacity set of records sharing one byte arena.
pub struct RecordBatch {
    arena: Vec<u8>,
    records: Vec<RecordDesc>,
    arena_capacity: usize,
    record_capacity: usize,
    seq_no: u64,
}

impl RecordBatch {
    pub fn with_capacity(record_capacity: usize, arena_capacity: usize) -> Self {
        RecordBatch {
            arena: Vec::with_capacity(arena_capacity),
            records: Vec::with_capacity(record_capacity),
            arena_capacity,
            record_capacity,
            seq_no: 0,
        }
    }

    pub fn seq_no(&self) -> u64 {
        self.seq_no
    }

    pub fn set_seq_no(&mut self, seq_no: u64) {
        self.seq_no = seq_no;
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True once either the record table or the arena budget is used up.
    pub fn is_full(&self) -> bool {
        self.records.len() >= self.record_capacity || self.arena.len() >= self.arena_capacity
    }

    pub fn arena_capacity(&self) -> usize {
        self.arena_capacity
    }

    pub fn arena_len(&self) -> usize {
        self.arena.len()
    }

    pub fn record(&self, idx: usize) -> Record<'_> {
        Record {
            arena: &self.arena,
            desc: &self.records[idx],
        }
    }

    pub fn record_mut(&mut self, idx: usize) -> RecordMut<'_> {
        RecordMut {
            arena: &self.arena,
            desc: &mut self.records[idx],
        }
    }

    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        self.records.iter().map(move |desc| Record {
            arena: &self.arena,
            desc,
        })
    }

    /// Resets the batch for reuse. Capacity and arena allocation are kept.
    pub fn clear(&mut self) {
        self.records.clear();
        self.arena.clear();
        self.seq_no = 0;
    }

    /// Keeps only the records whose flag is set, preserving order.
    pub fn compact(&mut self, keep: &[bool]) {
        debug_assert_eq!(keep.len(), self.records.len());
        let mut write = 0;
        for read in 0..self.records.len() {
            if keep[read] {
                self.records[write] = self.records[read];
                write += 1;
            }
        }
        self.records.truncate(write);
    }

    // Arena plumbing for the parser. The arena is append-only within a
    // fill pass; bytes of dropped or moved records are reclaimed only by
    // `clear` when the batch goes back to the pool.

    pub(crate) fn arena_extend(&mut self, bytes: &[u8]) {
        self.arena.extend_from_slice(bytes);
    }

    pub(crate) fn arena_truncate(&mut self, len: usize) {
        self.arena.truncate(len);
    }

    pub(crate) fn arena_pop(&mut self) -> Option<u8> {
        self.arena.pop()
    }

    pub(crate) fn arena_slice(&self, range: Range<usize>) -> &[u8] {
        &self.arena[range]
    }

    pub(crate) fn push_record(&mut self, desc: RecordDesc) {
        debug_assert!(self.records.len() < self.record_capacity);
        self.records.push(desc);
    }
}

struct PoolState {
    idle: VecDeque<RecordBatch>,
    closed: bool,
}

/// Bounded pool of identically-sized batches.
///
/// `acquire` blocks while every batch is in flight; that blocking is the
/// pipeline's only back-pressure mechanism. `close` wakes all waiters and
/// makes further acquires return `None`.
pub struct BatchPool {
    state: Mutex<PoolState>,
    available: Condvar,
    size: usize,
}

impl BatchPool {
    pub fn new(pool_size: usize, record_capacity: usize, arena_capacity: usize) -> Self {
        let idle = (0..pool_size)
            .map(|_| RecordBatch::with_capacity(record_capacity, arena_capacity))
            .collect();
        BatchPool {
            state: Mutex::new(PoolState {
                idle,
                closed: false,
            }),
            available: Condvar::new(),
            size: pool_size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Takes an idle batch, blocking until one is released. Returns `None`
    /// once the pool has been closed.
    pub fn acquire(&self) -> Option<RecordBatch> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.closed {
                return None;
            }
            if let Some(batch) = state.idle.pop_front() {
                return Some(batch);
            }
            state = self.available.wait(state).unwrap();
        }
    }

    /// Returns a batch to the idle set after wiping its contents.
    pub fn release(&self, mut batch: RecordBatch) {
        batch.clear();
        let mut state = self.state.lock().unwrap();
        state.idle.push_back(batch);
        self.available.notify_one();
    }

    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        self.available.notify_all();
    }

    pub fn idle_count(&self) -> usize {
        self.state.lock().unwrap().idle.len()
    }
}
