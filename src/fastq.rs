//! FASTQ record framing: parsing into batch arenas and serialization.
//!
//! The parser reads line-wise through a `BufRead`, appending each line's
//! payload directly to the tail of the destination batch's arena and
//! recording `(offset, len)` spans, so record bytes are written exactly
//! once. CR before LF is stripped, the trailing newline on the last
//! record is optional, and a record that no longer fits the arena budget
//! is carried over into the next batch unchanged.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use memchr::memchr;

use crate::batch::{RecordBatch, RecordDesc, Span};
use crate::error::{FormatErrorKind, FqError, Result};

const fn build_base_table() -> [bool; 256] {
    let mut table = [false; 256];
    let valid = b"ACGTNacgtn";
    let mut i = 0;
    while i < valid.len() {
        table[valid[i] as usize] = true;
        i += 1;
    }
    table
}

static BASE_VALID: [bool; 256] = build_base_table();

/// True for bytes allowed in a sequence line.
pub fn is_valid_base(b: u8) -> bool {
    BASE_VALID[b as usize]
}

/// A complete record that exceeded its batch's arena budget and is
/// waiting to open the next batch. Spans are relative to byte 0.
struct Carry {
    bytes: Vec<u8>,
    desc: RecordDesc,
}

enum ReadOutcome {
    /// A record was appended to the batch.
    Appended,
    /// The record was parsed but moved to the carry slot; the batch is done.
    Deferred,
    /// Clean end of input.
    Eof,
}

/// Streaming FASTQ parser filling [`RecordBatch`]es.
pub struct Parser<R> {
    reader: R,
    path: PathBuf,
    /// Bytes consumed from the (decompressed) stream so far.
    offset: u64,
    eof: bool,
    carry: Option<Carry>,
}

impl<R: BufRead> Parser<R> {
    pub fn new(reader: R, path: &Path) -> Self {
        Parser {
            reader,
            path: path.to_path_buf(),
            offset: 0,
            eof: false,
            carry: None,
        }
    }

    /// Everything has been consumed and no record is waiting to be placed.
    pub fn at_eof(&self) -> bool {
        self.eof && self.carry.is_none()
    }

    /// Current byte offset into the decompressed input.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Parses records into `batch` until it is full or input ends.
    /// Returns the number of records appended.
    pub fn fill_batch(&mut self, batch: &mut RecordBatch) -> Result<usize> {
        let mut appended = 0;

        if let Some(carry) = self.carry.take() {
            if carry.bytes.len() > batch.arena_capacity() {
                return Err(FqError::Resource(format!(
                    "record of {} bytes exceeds the batch arena capacity of {} bytes",
                    carry.bytes.len(),
                    batch.arena_capacity()
                )));
            }
            let base = batch.arena_len() as i64;
            batch.arena_extend(&carry.bytes);
            batch.push_record(carry.desc.rebase(base));
            appended += 1;
        }

        while !batch.is_full() && !self.eof {
            match self.read_record(batch)? {
                ReadOutcome::Appended => appended += 1,
                ReadOutcome::Deferred => break,
                ReadOutcome::Eof => break,
            }
        }
        Ok(appended)
    }

    /// Parses one record into the batch arena, enforcing the framing
    /// rules: `@` header, valid sequence alphabet, `+` separator, and
    /// quality of the same length as the sequence.
    fn read_record(&mut self, batch: &mut RecordBatch) -> Result<ReadOutcome> {
        let record_start = batch.arena_len();
        let record_offset = self.offset;

        // Header; blank lines between records are skipped.
        let name = loop {
            let line_offset = self.offset;
            let Some(line) = self.read_line(batch)? else {
                self.eof = true;
                return Ok(ReadOutcome::Eof);
            };
            if line.is_empty() {
                continue;
            }
            let first = batch.arena_slice(line.range())[0];
            if first != b'@' {
                self.eof = true;
                return Err(self.format_err(
                    FormatErrorKind::BadHeader {
                        found: first as char,
                    },
                    line_offset,
                ));
            }
            break line.slice(1..line.len());
        };

        // Sequence.
        let seq_offset = self.offset;
        let Some(seq) = self.read_line(batch)? else {
            self.eof = true;
            return Err(self.format_err(FormatErrorKind::Truncated, record_offset));
        };
        let seq_bytes = batch.arena_slice(seq.range());
        if let Some(pos) = seq_bytes.iter().position(|&b| !is_valid_base(b)) {
            let found = seq_bytes[pos] as char;
            self.eof = true;
            return Err(self.format_err(
                FormatErrorKind::BadSequence { found },
                seq_offset + pos as u64,
            ));
        }

        // Separator, with optional tag.
        let sep_offset = self.offset;
        let Some(sep) = self.read_line(batch)? else {
            self.eof = true;
            return Err(self.format_err(FormatErrorKind::Truncated, record_offset));
        };
        if sep.is_empty() || batch.arena_slice(sep.range())[0] != b'+' {
            let found = if sep.is_empty() {
                '\n'
            } else {
                batch.arena_slice(sep.range())[0] as char
            };
            self.eof = true;
            return Err(self.format_err(FormatErrorKind::BadSeparator { found }, sep_offset));
        }
        let plus = sep.slice(1..sep.len());

        // Quality.
        let Some(qual) = self.read_line(batch)? else {
            self.eof = true;
            return Err(self.format_err(FormatErrorKind::Truncated, record_offset));
        };
        if qual.len() != seq.len() {
            self.eof = true;
            return Err(self.format_err(
                FormatErrorKind::UnequalLengths {
                    seq: seq.len(),
                    qual: qual.len(),
                },
                record_offset,
            ));
        }

        let desc = RecordDesc {
            name,
            seq,
            plus,
            qual,
        };

        // The arena budget is a soft limit: a record is parsed in place
        // and only then checked. One that lands past the budget moves to
        // the carry slot and opens the next batch instead.
        if batch.arena_len() > batch.arena_capacity() {
            if batch.is_empty() {
                return Err(FqError::Resource(format!(
                    "record of {} bytes exceeds the batch arena capacity of {} bytes",
                    batch.arena_len() - record_start,
                    batch.arena_capacity()
                )));
            }
            let bytes = batch.arena_slice(record_start..batch.arena_len()).to_vec();
            batch.arena_truncate(record_start);
            self.carry = Some(Carry {
                bytes,
                desc: desc.rebase(-(record_start as i64)),
            });
            return Ok(ReadOutcome::Deferred);
        }

        batch.push_record(desc);
        Ok(ReadOutcome::Appended)
    }

    /// Appends one line's payload (no terminator, CR stripped) to the
    /// arena tail. `None` means the input ended before any byte of the
    /// line was read.
    fn read_line(&mut self, batch: &mut RecordBatch) -> Result<Option<Span>> {
        let start = batch.arena_len();
        loop {
            let buf = self
                .reader
                .fill_buf()
                .map_err(|e| FqError::io(&self.path, e))?;
            if buf.is_empty() {
                if batch.arena_len() == start {
                    return Ok(None);
                }
                break;
            }
            match memchr(b'\n', buf) {
                Some(i) => {
                    batch.arena_extend(&buf[..i]);
                    self.reader.consume(i + 1);
                    self.offset += (i + 1) as u64;
                    break;
                }
                None => {
                    let n = buf.len();
                    batch.arena_extend(buf);
                    self.reader.consume(n);
                    self.offset += n as u64;
                }
            }
        }
        if batch.arena_len() > start && batch.arena_slice(start..batch.arena_len()).last() == Some(&b'\r')
        {
            batch.arena_pop();
        }
        Ok(Some(Span::new(start, batch.arena_len() - start)))
    }

    fn format_err(&self, kind: FormatErrorKind, offset: u64) -> FqError {
        FqError::Format {
            kind,
            path: self.path.clone(),
            offset,
        }
    }
}

/// Writes one record with LF terminators. The tag after `+` is dropped
/// unless `preserve_plus` is set.
pub fn write_record<W: Write>(
    w: &mut W,
    rec: &crate::batch::Record<'_>,
    preserve_plus: bool,
) -> std::io::Result<()> {
    w.write_all(b"@")?;
    w.write_all(rec.name())?;
    w.write_all(b"\n")?;
    w.write_all(rec.seq())?;
    w.write_all(b"\n+")?;
    if preserve_plus {
        w.write_all(rec.plus())?;
    }
    w.write_all(b"\n")?;
    w.write_all(rec.qual())?;
    w.write_all(b"\n")
}
