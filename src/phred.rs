//! Phred quality-scheme inference.
//!
//! FASTQ does not declare its quality encoding; the ASCII offset has to
//! be deduced from the data. A bounded sample of records from the head
//! of the input is enough: Sanger/Illumina 1.8+ scores stay at or below
//! ASCII 73 ('I'), while Illumina 1.3/1.5 scores start at ASCII 64 ('@').

use std::path::Path;

use crate::batch::RecordBatch;
use crate::error::Result;
use crate::fastq::Parser;
use crate::stream::open_source;

/// Highest Phred score tracked by the statistics histograms; observed
/// scores above this clamp down to it.
pub const MAX_PHRED: u8 = 42;

/// Records sampled from the head of the input during inference.
pub const DEFAULT_SAMPLE_RECORDS: usize = 10_000;

const SAMPLE_BATCH_RECORDS: usize = 1_000;
const SAMPLE_BATCH_ARENA: usize = 1 << 20;

/// Quality encoding and record-length shape of an input, deduced from a
/// sample of its head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityScheme {
    /// ASCII offset of the Phred encoding, 33 or 64.
    pub offset: u8,
    /// Whether every sampled record had the same length.
    pub is_fixed_length: bool,
    /// Longest sampled record length.
    pub read_length: usize,
}

impl QualityScheme {
    pub fn phred33(read_length: usize) -> Self {
        QualityScheme {
            offset: 33,
            is_fixed_length: true,
            read_length,
        }
    }
}

/// Reads up to `sample_records` records from a fresh stream on `path`
/// and infers the quality scheme. The main pipeline re-opens the input
/// from byte zero afterwards.
pub fn infer_scheme(path: &Path, sample_records: usize) -> Result<QualityScheme> {
    let source = open_source(path)?;
    let mut parser = Parser::new(source, path);
    let mut batch = RecordBatch::with_capacity(SAMPLE_BATCH_RECORDS, SAMPLE_BATCH_ARENA);

    let mut min_byte = u8::MAX;
    let mut max_byte = u8::MIN;
    let mut min_len = usize::MAX;
    let mut max_len = 0usize;
    let mut sampled = 0usize;

    while sampled < sample_records && !parser.at_eof() {
        batch.clear();
        let n = parser.fill_batch(&mut batch)?;
        if n == 0 {
            break;
        }
        for rec in batch.records().take(sample_records - sampled) {
            let qual = rec.qual();
            min_len = min_len.min(qual.len());
            max_len = max_len.max(qual.len());
            for &q in qual {
                min_byte = min_byte.min(q);
                max_byte = max_byte.max(q);
            }
        }
        sampled += n.min(sample_records - sampled);
    }

    if sampled == 0 {
        return Ok(QualityScheme::phred33(0));
    }

    let offset = if max_byte <= 73 {
        33
    } else if min_byte >= 64 {
        64
    } else {
        log::warn!(
            "ambiguous quality bytes in {} (min {}, max {}), assuming Phred+33",
            path.display(),
            min_byte,
            max_byte
        );
        33
    };

    let scheme = QualityScheme {
        offset,
        is_fixed_length: min_len == max_len,
        read_length: max_len,
    };
    log::debug!(
        "inferred Phred+{} over {} sampled records of {}",
        scheme.offset,
        sampled,
        path.display()
    );
    Ok(scheme)
}
