//! Per-position quality and base-composition statistics.
//!
//! Workers fold the records of each batch into a [`PartialStat`]; the
//! output stage merges those partials into one final tally. Merging is
//! componentwise integer addition, so the result is independent of both
//! batch boundaries and merge order.

use std::io::Write;

use crate::batch::{Record, RecordBatch};
use crate::phred::MAX_PHRED;

pub const PHRED_BINS: usize = MAX_PHRED as usize + 1;
pub const BASE_BINS: usize = 5;

/// A→0, C→1, G→2, T→3, anything else (N) → 4; case-insensitive.
fn classify_base(b: u8) -> usize {
    match b {
        b'A' | b'a' => 0,
        b'C' | b'c' => 1,
        b'G' | b'g' => 2,
        b'T' | b't' => 3,
        _ => 4,
    }
}

/// Histogram tally over some subset of the input records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialStat {
    records: u64,
    read_length: usize,
    qual: Vec<[u64; PHRED_BINS]>,
    bases: Vec<[u64; BASE_BINS]>,
}

impl PartialStat {
    pub fn new(read_length: usize) -> Self {
        PartialStat {
            records: 0,
            read_length,
            qual: vec![[0; PHRED_BINS]; read_length],
            bases: vec![[0; BASE_BINS]; read_length],
        }
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn read_length(&self) -> usize {
        self.read_length
    }

    /// Adds one record. Scores above [`MAX_PHRED`] clamp into the top bin.
    pub fn fold(&mut self, rec: &Record<'_>, offset: u8) {
        let seq = rec.seq();
        let qual = rec.qual();
        let len = self.read_length.min(seq.len());
        for i in 0..len {
            self.bases[i][classify_base(seq[i])] += 1;
            let score = qual[i].saturating_sub(offset).min(MAX_PHRED) as usize;
            self.qual[i][score] += 1;
        }
        self.records += 1;
    }

    /// Componentwise addition; commutative and associative.
    pub fn merge(&mut self, other: &PartialStat) {
        debug_assert_eq!(self.read_length, other.read_length);
        self.records += other.records;
        for (a, b) in self.qual.iter_mut().zip(&other.qual) {
            for (x, y) in a.iter_mut().zip(b) {
                *x += y;
            }
        }
        for (a, b) in self.bases.iter_mut().zip(&other.bases) {
            for (x, y) in a.iter_mut().zip(b) {
                *x += y;
            }
        }
    }

    pub fn total_bases(&self) -> u64 {
        self.records * self.read_length as u64
    }

    /// Bases scoring at or above `threshold`, across all positions.
    pub fn bases_at_or_above(&self, threshold: u8) -> u64 {
        self.qual
            .iter()
            .map(|pos| pos[threshold as usize..].iter().sum::<u64>())
            .sum()
    }

    /// Totals of the A, C, G, T and N columns.
    pub fn base_totals(&self) -> [u64; BASE_BINS] {
        let mut totals = [0; BASE_BINS];
        for pos in &self.bases {
            for (t, c) in totals.iter_mut().zip(pos) {
                *t += c;
            }
        }
        totals
    }

    fn position_avg_qual(&self, pos: usize) -> f64 {
        let sum: u64 = self.qual[pos]
            .iter()
            .enumerate()
            .map(|(score, &count)| score as u64 * count)
            .sum();
        sum as f64 / self.records as f64
    }

    fn position_error_rate(&self, pos: usize) -> f64 {
        let sum: f64 = self.qual[pos]
            .iter()
            .enumerate()
            .map(|(score, &count)| count as f64 * 10f64.powf(-(score as f64) / 10.0))
            .sum();
        sum / self.records as f64
    }
}

/// Folds all records of a batch into a fresh partial.
pub fn fold_batch(batch: &RecordBatch, offset: u8, read_length: usize) -> PartialStat {
    let mut partial = PartialStat::new(read_length);
    for rec in batch.records() {
        partial.fold(&rec, offset);
    }
    partial
}

fn pct(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Writes the tab-separated report: summary header lines, then one row
/// per read position (1-indexed). Percentages and averages use two
/// decimals, error rates scientific notation.
pub fn write_report<W: Write>(
    w: &mut W,
    stat: &PartialStat,
    offset: u8,
    name: &str,
) -> std::io::Result<()> {
    let total = stat.total_bases();
    let q20 = stat.bases_at_or_above(20);
    let q30 = stat.bases_at_or_above(30);
    let [a, c, g, t, n] = stat.base_totals();
    let gc = g + c;

    writeln!(w, "#Name\t{name}")?;
    writeln!(w, "#PhredQual\t{offset}")?;
    writeln!(w, "#ReadNum\t{}", stat.records())?;
    writeln!(w, "#ReadLength\t{}", stat.read_length())?;
    writeln!(w, "#BaseCount\t{total}")?;
    writeln!(w, "#Q20(>=20)\t{q20}\t{:.2}%", pct(q20, total))?;
    writeln!(w, "#Q30(>=30)\t{q30}\t{:.2}%", pct(q30, total))?;
    writeln!(w, "#A\t{a}\t{:.2}%", pct(a, total))?;
    writeln!(w, "#C\t{c}\t{:.2}%", pct(c, total))?;
    writeln!(w, "#G\t{g}\t{:.2}%", pct(g, total))?;
    writeln!(w, "#T\t{t}\t{:.2}%", pct(t, total))?;
    writeln!(w, "#N\t{n}\t{:.2}%", pct(n, total))?;
    writeln!(w, "#GC\t{gc}\t{:.2}%", pct(gc, total))?;
    writeln!(w, "#Pos\tA\tC\tG\tT\tN\tAvgQual\tErrRate")?;

    if stat.records() == 0 {
        return Ok(());
    }
    for pos in 0..stat.read_length() {
        let row = &stat.bases[pos];
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}\t{}\t{:.2}\t{:.2e}",
            pos + 1,
            row[0],
            row[1],
            row[2],
            row[3],
            row[4],
            stat.position_avg_qual(pos),
            stat.position_error_rate(pos),
        )?;
    }
    Ok(())
}
