//! Byte-stream access with transparent compression.
//!
//! Input format is sniffed from magic bytes (gzip, bzip2, xz, otherwise
//! plain), output format is chosen from the file suffix. Compression
//! framing is not preserved between input and output.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{FqError, Result};

const STREAM_BUF_SIZE: usize = 64 * 1024;

/// Opens `path` for reading, decoding gzip/bzip2/xz on the fly.
pub fn open_source(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path).map_err(|e| FqError::io(path, e))?;

    // niffler rejects streams shorter than its magic probe; a zero-byte
    // file is simply an empty FASTQ.
    let meta = file.metadata().map_err(|e| FqError::io(path, e))?;
    if meta.len() == 0 {
        return Ok(Box::new(BufReader::new(std::io::empty())));
    }

    let raw: Box<dyn std::io::Read + Send> = Box::new(BufReader::with_capacity(STREAM_BUF_SIZE, file));
    let (reader, format) = niffler::send::get_reader(raw)
        .map_err(|e| FqError::UnsupportedFormat(format!("{} ({})", e, path.display())))?;
    log::debug!("opened {} as {:?}", path.display(), format);
    Ok(Box::new(BufReader::with_capacity(STREAM_BUF_SIZE, reader)))
}

/// Creates `path` for writing, compressing according to its suffix
/// (`.gz`, `.bz2`, `.xz`, otherwise plain).
pub fn open_sink(path: &Path) -> Result<Box<dyn Write + Send>> {
    let file = File::create(path).map_err(|e| FqError::io(path, e))?;
    let raw: Box<dyn Write + Send> = Box::new(BufWriter::with_capacity(STREAM_BUF_SIZE, file));
    let format = match path.extension().and_then(|ext| ext.to_str()) {
        Some("gz") => niffler::send::compression::Format::Gzip,
        Some("bz2") => niffler::send::compression::Format::Bzip,
        Some("xz") => niffler::send::compression::Format::Lzma,
        Some("zst") => niffler::send::compression::Format::Zstd,
        _ => niffler::send::compression::Format::No,
    };
    let writer = niffler::send::get_writer(raw, format, niffler::Level::Six)
        .map_err(|e| FqError::UnsupportedFormat(format!("{} ({})", e, path.display())))?;
    Ok(writer)
}
