//! Per-record processing: mutators that may rewrite or drop a record,
//! predicates that decide whether to keep it, and the ordered chain a
//! worker applies to every record of a batch.

use crate::batch::{Record, RecordBatch, RecordMut};
use crate::config::FilterOptions;

/// Result of applying a mutator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutateOutcome {
    Kept,
    Dropped,
}

/// Rewrites a record in place, or drops it outright.
pub trait Mutator: Send + Sync {
    fn apply(&self, rec: &mut RecordMut<'_>) -> MutateOutcome;
}

/// Decides whether a record survives. `false` drops it.
pub trait Predicate: Send + Sync {
    fn test(&self, rec: &Record<'_>) -> bool;
}

/// Which read end(s) the quality trimmer works from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrimMode {
    #[default]
    Both,
    FivePrime,
    ThreePrime,
}

/// Trims low-quality bases from the read ends: from each selected end,
/// bases are removed while their Phred score is below `threshold`. A
/// read left shorter than `min_len` is dropped.
pub struct QualityTrimmer {
    pub threshold: f64,
    pub min_len: usize,
    pub mode: TrimMode,
    pub offset: u8,
}

impl Mutator for QualityTrimmer {
    fn apply(&self, rec: &mut RecordMut<'_>) -> MutateOutcome {
        let qual = rec.qual();
        let below = |q: u8| (q.saturating_sub(self.offset) as f64) < self.threshold;

        let mut start = 0;
        let mut end = qual.len();
        if matches!(self.mode, TrimMode::Both | TrimMode::FivePrime) {
            while start < end && below(qual[start]) {
                start += 1;
            }
        }
        if matches!(self.mode, TrimMode::Both | TrimMode::ThreePrime) {
            while end > start && below(qual[end - 1]) {
                end -= 1;
            }
        }

        if end - start < self.min_len {
            return MutateOutcome::Dropped;
        }
        if start > 0 || end < rec.len() {
            rec.trim(start..end);
        }
        MutateOutcome::Kept
    }
}

/// Keeps records whose mean Phred score reaches the threshold. Records
/// without quality bytes are dropped.
pub struct MinQuality {
    pub threshold: f64,
    pub offset: u8,
}

impl Predicate for MinQuality {
    fn test(&self, rec: &Record<'_>) -> bool {
        let qual = rec.qual();
        if qual.is_empty() {
            return false;
        }
        let sum: u64 = qual
            .iter()
            .map(|&q| q.saturating_sub(self.offset) as u64)
            .sum();
        sum as f64 / qual.len() as f64 >= self.threshold
    }
}

pub struct MinLength(pub usize);

impl Predicate for MinLength {
    fn test(&self, rec: &Record<'_>) -> bool {
        rec.seq().len() >= self.0
    }
}

pub struct MaxLength(pub usize);

impl Predicate for MaxLength {
    fn test(&self, rec: &Record<'_>) -> bool {
        rec.seq().len() <= self.0
    }
}

/// Keeps records whose fraction of `N` bases does not exceed the bound.
/// Empty records are dropped.
pub struct MaxNRatio(pub f64);

impl Predicate for MaxNRatio {
    fn test(&self, rec: &Record<'_>) -> bool {
        let seq = rec.seq();
        if seq.is_empty() {
            return false;
        }
        let n = seq.iter().filter(|&&b| b == b'N' || b == b'n').count();
        n as f64 / seq.len() as f64 <= self.0
    }
}

/// Ordered mutators followed by ordered predicates. The first mutator
/// `Dropped` or predicate `false` wins; later steps are skipped.
#[derive(Default)]
pub struct ProcessorChain {
    mutators: Vec<Box<dyn Mutator>>,
    predicates: Vec<Box<dyn Predicate>>,
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_mutator(&mut self, m: Box<dyn Mutator>) {
        self.mutators.push(m);
    }

    pub fn push_predicate(&mut self, p: Box<dyn Predicate>) {
        self.predicates.push(p);
    }

    pub fn is_empty(&self) -> bool {
        self.mutators.is_empty() && self.predicates.is_empty()
    }

    /// Builds the chain the `filter` command described by its flags.
    /// Trimming runs before the predicates so that length and quality
    /// bounds judge the trimmed read.
    pub fn from_options(opts: &FilterOptions, offset: u8) -> Self {
        let mut chain = ProcessorChain::new();
        if let Some(threshold) = opts.trim_quality {
            chain.push_mutator(Box::new(QualityTrimmer {
                threshold,
                min_len: opts.trim_min_length,
                mode: opts.trim_mode,
                offset,
            }));
        }
        if let Some(threshold) = opts.min_quality {
            chain.push_predicate(Box::new(MinQuality { threshold, offset }));
        }
        if let Some(n) = opts.min_length {
            chain.push_predicate(Box::new(MinLength(n)));
        }
        if let Some(n) = opts.max_length {
            chain.push_predicate(Box::new(MaxLength(n)));
        }
        if let Some(r) = opts.max_n_ratio {
            chain.push_predicate(Box::new(MaxNRatio(r)));
        }
        chain
    }

    /// Runs the chain over every record and compacts the survivors to
    /// the front of the batch. Returns `(kept, dropped)`.
    pub fn process_batch(&self, batch: &mut RecordBatch) -> (usize, usize) {
        let total = batch.len();
        if self.is_empty() || total == 0 {
            return (total, 0);
        }

        let mut keep = vec![true; total];
        for idx in 0..total {
            for mutator in &self.mutators {
                let mut rec = batch.record_mut(idx);
                if mutator.apply(&mut rec) == MutateOutcome::Dropped {
                    keep[idx] = false;
                    break;
                }
            }
            if keep[idx] {
                let rec = batch.record(idx);
                keep[idx] = self.predicates.iter().all(|p| p.test(&rec));
            }
        }

        batch.compact(&keep);
        let kept = batch.len();
        (kept, total - kept)
    }
}
