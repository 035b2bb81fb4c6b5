//! The three-stage record pipeline.
//!
//! One input thread parses records into pooled batches and stamps each
//! batch with a monotonic sequence number. `W` worker threads apply the
//! job to batches in parallel. The output stage (running on the calling
//! thread) restores input order by sequence number before committing
//! results, then recycles each batch back to the pool.
//!
//! The pool is the back-pressure mechanism: with `P` batches in
//! existence, at most `P` are in flight and the input stage blocks on
//! `acquire` once downstream falls behind. Cancellation is cooperative;
//! every stage checks the flag at its next batch boundary, drains what
//! it holds back to the pool and shuts down. The first error wins and
//! triggers the same drain.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;

use crate::batch::{BatchPool, RecordBatch};
use crate::config::RunConfig;
use crate::error::{FqError, Result};
use crate::fastq::{write_record, Parser};
use crate::processor::ProcessorChain;
use crate::stats::{fold_batch, PartialStat};
use crate::stream::{open_sink, open_source};

/// What the workers do with each batch.
pub enum Job {
    /// Apply the chain and write survivors to the output file.
    Filter(ProcessorChain),
    /// Fold every record into per-batch statistics.
    Stat { offset: u8, read_length: usize },
}

/// Counters and timing for a finished (or canceled) run.
#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub records_in: u64,
    pub records_out: u64,
    pub batches: u64,
    pub elapsed: Duration,
}

impl PipelineStats {
    pub fn records_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.records_in as f64 / secs
        } else {
            0.0
        }
    }
}

/// Result of a run: counters plus, for `stat` jobs, the merged tally.
#[derive(Debug)]
pub struct RunOutput {
    pub stats: PipelineStats,
    pub stat: Option<PartialStat>,
}

/// Shared cooperative-cancellation flag.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// A batch on its way from the workers to the output stage.
struct Processed {
    batch: RecordBatch,
    partial: Option<PartialStat>,
    kept: u64,
}

fn set_error(slot: &Mutex<Option<FqError>>, err: FqError) {
    let mut guard = slot.lock().unwrap();
    if guard.is_none() {
        *guard = Some(err);
    }
}

pub struct Pipeline {
    config: RunConfig,
    cancel: CancelToken,
}

impl Pipeline {
    pub fn new(config: RunConfig) -> Self {
        Self::with_cancel_token(config, CancelToken::new())
    }

    /// Builds a pipeline observing an externally owned cancellation flag.
    pub fn with_cancel_token(config: RunConfig, cancel: CancelToken) -> Self {
        Pipeline { config, cancel }
    }

    /// Handle for requesting cancellation from another thread, e.g. a
    /// signal handler.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Drives the full pipeline to completion. Returns `Canceled` when
    /// the token fired before the input was exhausted.
    pub fn run(&self, job: Job) -> Result<RunOutput> {
        self.config.validate()?;
        let start = Instant::now();

        let source = open_source(&self.config.input)?;
        let mut parser = Parser::new(source, &self.config.input);

        // For filter jobs the sink is opened before any thread starts, so
        // a bad output path fails fast.
        let mut sink = match &job {
            Job::Filter(_) => Some(open_sink(&self.config.output)?),
            Job::Stat { .. } => None,
        };
        let mut merged = match &job {
            Job::Stat { read_length, .. } => Some(PartialStat::new(*read_length)),
            Job::Filter(_) => None,
        };

        let pool = BatchPool::new(
            self.config.pool_size,
            self.config.batch_capacity,
            self.config.arena_capacity,
        );
        let (work_tx, work_rx) = bounded::<RecordBatch>(self.config.pool_size);
        let (done_tx, done_rx) = bounded::<Processed>(self.config.pool_size);
        let error_slot: Mutex<Option<FqError>> = Mutex::new(None);

        let pool = &pool;
        let job = &job;
        let cancel = &self.cancel;
        let error_slot_ref = &error_slot;

        let mut records_out = 0u64;

        let (records_in, batches) = thread::scope(|s| {
            // Input stage: serial parse into pooled batches.
            let input = s.spawn(move || {
                let mut records = 0u64;
                let mut batches = 0u64;
                let mut seq_no = 0u64;
                loop {
                    if cancel.is_canceled() {
                        break;
                    }
                    let Some(mut batch) = pool.acquire() else {
                        break;
                    };
                    if cancel.is_canceled() {
                        pool.release(batch);
                        break;
                    }
                    batch.set_seq_no(seq_no);
                    match parser.fill_batch(&mut batch) {
                        Ok(0) => {
                            pool.release(batch);
                            break;
                        }
                        Ok(n) => {
                            records += n as u64;
                            batches += 1;
                            seq_no += 1;
                            if let Err(e) = work_tx.send(batch) {
                                pool.release(e.into_inner());
                                break;
                            }
                            if parser.at_eof() {
                                break;
                            }
                        }
                        Err(e) => {
                            pool.release(batch);
                            set_error(error_slot_ref, e);
                            cancel.cancel();
                            break;
                        }
                    }
                }
                (records, batches)
            });

            // Worker stage: parallel, one batch per worker at a time.
            for _ in 0..self.config.threads {
                let work_rx = work_rx.clone();
                let done_tx = done_tx.clone();
                s.spawn(move || {
                    for mut batch in work_rx.iter() {
                        if cancel.is_canceled() {
                            pool.release(batch);
                            continue;
                        }
                        let processed = match job {
                            Job::Filter(chain) => {
                                let (kept, _) = chain.process_batch(&mut batch);
                                Processed {
                                    batch,
                                    partial: None,
                                    kept: kept as u64,
                                }
                            }
                            Job::Stat {
                                offset,
                                read_length,
                            } => {
                                let partial = fold_batch(&batch, *offset, *read_length);
                                let kept = partial.records();
                                Processed {
                                    batch,
                                    partial: Some(partial),
                                    kept,
                                }
                            }
                        };
                        if let Err(e) = done_tx.send(processed) {
                            pool.release(e.into_inner().batch);
                            break;
                        }
                    }
                });
            }
            drop(work_rx);
            drop(done_tx);

            // Output stage on this thread: restore sequence order, commit,
            // recycle.
            let mut pending: BTreeMap<u64, Processed> = BTreeMap::new();
            let mut expected = 0u64;
            for processed in done_rx.iter() {
                if cancel.is_canceled() {
                    pool.release(processed.batch);
                    continue;
                }
                pending.insert(processed.batch.seq_no(), processed);
                while let Some(next) = pending.remove(&expected) {
                    match self.commit(next, pool, sink.as_mut(), merged.as_mut()) {
                        Ok(kept) => {
                            expected += 1;
                            records_out += kept;
                            if let Some(cb) = &self.config.progress {
                                cb(records_out);
                            }
                        }
                        Err(e) => {
                            set_error(error_slot_ref, e);
                            cancel.cancel();
                        }
                    }
                }
            }
            for (_, p) in pending {
                pool.release(p.batch);
            }

            input.join().expect("input stage panicked")
        });

        if let Some(mut sink) = sink {
            if let Err(e) = sink.flush() {
                set_error(&error_slot, FqError::io(&self.config.output, e));
            }
        }

        debug_assert_eq!(pool.idle_count(), self.config.pool_size);

        if let Some(err) = error_slot.lock().unwrap().take() {
            return Err(err);
        }
        if self.cancel.is_canceled() {
            return Err(FqError::Canceled);
        }

        let stats = PipelineStats {
            records_in,
            records_out,
            batches,
            elapsed: start.elapsed(),
        };
        log::info!(
            "processed {} records in {} batches ({:.0} records/s)",
            stats.records_in,
            stats.batches,
            stats.records_per_sec()
        );
        Ok(RunOutput {
            stats,
            stat: merged,
        })
    }

    /// Commits one batch in order: writes survivors or merges the
    /// partial tally, then recycles the batch in every outcome.
    fn commit(
        &self,
        processed: Processed,
        pool: &BatchPool,
        sink: Option<&mut Box<dyn Write + Send>>,
        merged: Option<&mut PartialStat>,
    ) -> Result<u64> {
        let Processed {
            batch,
            partial,
            kept,
        } = processed;

        let mut write_err = None;
        if let Some(sink) = sink {
            for rec in batch.records() {
                if let Err(e) = write_record(sink, &rec, self.config.preserve_plus) {
                    write_err = Some(FqError::io(&self.config.output, e));
                    break;
                }
            }
        }
        if let (Some(merged), Some(partial)) = (merged, partial) {
            merged.merge(&partial);
        }
        pool.release(batch);

        match write_err {
            Some(e) => Err(e),
            None => Ok(kept),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterOptions;
    use crate::phred::infer_scheme;
    use std::fs;
    use tempfile::tempdir;

    fn write_input(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn identity_filter_preserves_bytes() {
        let dir = tempdir().unwrap();
        let data = "@r1\nACGT\n+\nIIII\n@r2\nACGN\n+\n!!!!\n@r3\nAAAA\n+\n####\n";
        let input = write_input(&dir, "in.fq", data);
        let output = dir.path().join("out.fq");

        let config = RunConfig::new(&input, &output);
        let pipeline = Pipeline::new(config);
        let out = pipeline.run(Job::Filter(ProcessorChain::new())).unwrap();

        assert_eq!(out.stats.records_in, 3);
        assert_eq!(out.stats.records_out, 3);
        assert_eq!(fs::read_to_string(&output).unwrap(), data);
    }

    #[test]
    fn parallel_run_preserves_record_order() {
        let dir = tempdir().unwrap();
        let mut data = String::new();
        for i in 0..2000 {
            data.push_str(&format!("@r{i}\nACGTACGT\n+\nIIIIIIII\n"));
        }
        let input = write_input(&dir, "in.fq", &data);
        let output = dir.path().join("out.fq");

        let mut config = RunConfig::new(&input, &output);
        config.threads = 4;
        config.batch_capacity = 64;
        config.pool_size = 8;
        let pipeline = Pipeline::new(config);
        let out = pipeline.run(Job::Filter(ProcessorChain::new())).unwrap();
        assert_eq!(out.stats.records_in, 2000);

        let written = fs::read_to_string(&output).unwrap();
        let names: Vec<&str> = written
            .lines()
            .step_by(4)
            .map(|l| l.trim_start_matches('@'))
            .collect();
        let expected: Vec<String> = (0..2000).map(|i| format!("r{i}")).collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn filter_chain_drops_and_keeps_across_batches() {
        let dir = tempdir().unwrap();
        let mut data = String::new();
        for i in 0..100 {
            // every other record is low quality throughout
            let qual = if i % 2 == 0 { "IIII" } else { "!!!!" };
            data.push_str(&format!("@r{i}\nACGT\n+\n{qual}\n"));
        }
        let input = write_input(&dir, "in.fq", &data);
        let output = dir.path().join("out.fq");

        let mut config = RunConfig::new(&input, &output);
        config.threads = 2;
        config.batch_capacity = 16;
        let pipeline = Pipeline::new(config);

        let opts = FilterOptions {
            min_quality: Some(30.0),
            ..Default::default()
        };
        let chain = ProcessorChain::from_options(&opts, 33);
        let out = pipeline.run(Job::Filter(chain)).unwrap();
        assert_eq!(out.stats.records_in, 100);
        assert_eq!(out.stats.records_out, 50);

        let written = fs::read_to_string(&output).unwrap();
        assert!(written.lines().step_by(4).all(|name| {
            let idx: usize = name.trim_start_matches("@r").parse().unwrap();
            idx % 2 == 0
        }));
    }

    #[test]
    fn stat_job_matches_serial_fold() {
        let dir = tempdir().unwrap();
        let mut data = String::new();
        for i in 0..500 {
            data.push_str(&format!("@r{i}\nACGT\n+\nII!I\n"));
        }
        let input = write_input(&dir, "in.fq", &data);
        let output = dir.path().join("report.txt");

        let scheme = infer_scheme(&input, 10_000).unwrap();
        assert_eq!(scheme.offset, 33);
        assert!(scheme.is_fixed_length);

        let mut config = RunConfig::new(&input, &output);
        config.threads = 3;
        config.batch_capacity = 33;
        let pipeline = Pipeline::new(config);
        let out = pipeline
            .run(Job::Stat {
                offset: scheme.offset,
                read_length: scheme.read_length,
            })
            .unwrap();

        let stat = out.stat.unwrap();
        assert_eq!(stat.records(), 500);
        assert_eq!(stat.total_bases(), 2000);
        assert_eq!(stat.base_totals(), [500, 500, 500, 500, 0]);
        // one '!' per record
        assert_eq!(stat.bases_at_or_above(20), 1500);
    }

    #[test]
    fn canceled_before_start_returns_canceled() {
        let dir = tempdir().unwrap();
        let input = write_input(&dir, "in.fq", "@r1\nACGT\n+\nIIII\n");
        let output = dir.path().join("out.fq");

        let pipeline = Pipeline::new(RunConfig::new(&input, &output));
        pipeline.cancel_token().cancel();
        let err = pipeline.run(Job::Filter(ProcessorChain::new())).unwrap_err();
        assert!(err.is_canceled());
    }

    #[test]
    fn empty_input_runs_cleanly() {
        let dir = tempdir().unwrap();
        let input = write_input(&dir, "in.fq", "");
        let output = dir.path().join("out.fq");

        let pipeline = Pipeline::new(RunConfig::new(&input, &output));
        let out = pipeline
            .run(Job::Stat {
                offset: 33,
                read_length: 0,
            })
            .unwrap();
        assert_eq!(out.stats.records_in, 0);
        assert_eq!(out.stat.unwrap().records(), 0);
    }

    #[test]
    fn parse_error_surfaces_with_offset() {
        let dir = tempdir().unwrap();
        let input = write_input(&dir, "in.fq", "@r1\nACGT\n+\nIIII\nnot a record\n");
        let output = dir.path().join("out.fq");

        let pipeline = Pipeline::new(RunConfig::new(&input, &output));
        let err = pipeline.run(Job::Filter(ProcessorChain::new())).unwrap_err();
        assert_eq!(err.kind_name(), "format");
        assert!(err.to_string().contains("in.fq:16"), "{err}");
    }
}
