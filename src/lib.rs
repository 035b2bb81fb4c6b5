//! Parallel quality statistics and filtering for FASTQ files.
//!
//! Records stream through a three-stage pipeline: a serial parser fills
//! arena-backed batches from a recycled pool, parallel workers apply the
//! per-record job, and a serial output stage restores input order before
//! committing results. The pool bounds memory and provides back-pressure;
//! cancellation is cooperative and drains cleanly.

pub mod batch;
pub mod config;
pub mod error;
pub mod fastq;
pub mod phred;
pub mod pipeline;
pub mod processor;
pub mod stats;
pub mod stream;

pub use config::{FilterOptions, RunConfig};
pub use error::{FqError, Result};
pub use phred::{infer_scheme, QualityScheme, DEFAULT_SAMPLE_RECORDS};
pub use pipeline::{CancelToken, Job, Pipeline, PipelineStats, RunOutput};
pub use processor::ProcessorChain;
