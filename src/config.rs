//! Run configuration handed from the CLI (or a library caller) to the
//! pipeline engine. No global state: everything the core needs travels
//! in these values.

use std::path::PathBuf;

use crate::error::{FqError, Result};
use crate::processor::TrimMode;

pub const DEFAULT_BATCH_CAPACITY: usize = 10_000;
pub const DEFAULT_ARENA_CAPACITY: usize = 8 * 1024 * 1024;
pub const DEFAULT_POOL_SIZE: usize = 16;

/// Callback invoked by the output stage with the cumulative number of
/// committed records; the CLI wires a progress bar into it.
pub type ProgressFn = Box<dyn Fn(u64) + Send + Sync>;

pub struct RunConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Worker count `W` for the middle pipeline stage.
    pub threads: usize,
    /// Records per batch.
    pub batch_capacity: usize,
    /// Arena bytes per batch; together with `pool_size` this caps the
    /// memory held in record bytes.
    pub arena_capacity: usize,
    /// Number of batches cycling through the pool.
    pub pool_size: usize,
    /// Keep the tag after `+` when writing filtered records.
    pub preserve_plus: bool,
    pub progress: Option<ProgressFn>,
}

impl RunConfig {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        RunConfig {
            input: input.into(),
            output: output.into(),
            threads: 1,
            batch_capacity: DEFAULT_BATCH_CAPACITY,
            arena_capacity: DEFAULT_ARENA_CAPACITY,
            pool_size: DEFAULT_POOL_SIZE,
            preserve_plus: false,
            progress: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(FqError::Config("worker count must be at least 1".into()));
        }
        if self.batch_capacity == 0 {
            return Err(FqError::Config("batch capacity must be at least 1 record".into()));
        }
        if self.arena_capacity == 0 {
            return Err(FqError::Config("arena capacity must be non-zero".into()));
        }
        if self.pool_size == 0 {
            return Err(FqError::Config("pool size must be at least 1 batch".into()));
        }
        Ok(())
    }
}

/// The `filter` subcommand's knobs. An absent knob means the
/// corresponding processor is not instantiated at all.
#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    /// Forced quality encoding; inferred from the input when absent.
    pub quality_encoding: Option<u8>,
    pub min_quality: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub max_n_ratio: Option<f64>,
    pub trim_quality: Option<f64>,
    pub trim_mode: TrimMode,
    /// Shortest read the quality trimmer may leave behind.
    pub trim_min_length: usize,
}

impl FilterOptions {
    pub fn validate(&self) -> Result<()> {
        if let Some(enc) = self.quality_encoding {
            if enc != 33 && enc != 64 {
                return Err(FqError::Config(format!(
                    "quality encoding must be 33 or 64, got {enc}"
                )));
            }
        }
        if let (Some(min), Some(max)) = (self.min_length, self.max_length) {
            if min > max {
                return Err(FqError::Config(format!(
                    "minimum length {min} exceeds maximum length {max}"
                )));
            }
        }
        if let Some(ratio) = self.max_n_ratio {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(FqError::Config(format!(
                    "N ratio must lie in [0, 1], got {ratio}"
                )));
            }
        }
        Ok(())
    }

    /// True when no processor would be built, i.e. the identity filter.
    pub fn is_identity(&self) -> bool {
        self.min_quality.is_none()
            && self.min_length.is_none()
            && self.max_length.is_none()
            && self.max_n_ratio.is_none()
            && self.trim_quality.is_none()
    }

    /// Whether any configured processor needs to decode quality scores.
    pub fn needs_quality_offset(&self) -> bool {
        self.min_quality.is_some() || self.trim_quality.is_some()
    }
}
