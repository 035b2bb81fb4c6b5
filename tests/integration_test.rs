use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;

use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::tempdir;

use fqpipe::config::{FilterOptions, RunConfig};
use fqpipe::pipeline::{CancelToken, Job, Pipeline};
use fqpipe::processor::ProcessorChain;
use fqpipe::{infer_scheme, stream, DEFAULT_SAMPLE_RECORDS};

fn write_plain(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn write_gzip(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    let file = fs::File::create(&path).unwrap();
    let mut enc = GzEncoder::new(file, Compression::default());
    enc.write_all(contents.as_bytes()).unwrap();
    enc.finish().unwrap();
    path
}

fn read_through_decoder(path: &PathBuf) -> String {
    let mut out = String::new();
    stream::open_source(path)
        .unwrap()
        .read_to_string(&mut out)
        .unwrap();
    out
}

#[test]
fn gzip_in_gzip_out_identity_filter() {
    let dir = tempdir().unwrap();
    let data = "@r1\nACGT\n+\nIIII\n@r2\nGGCC\n+\n####\n";
    let input = write_gzip(&dir, "in.fq.gz", data);
    let output = dir.path().join("out.fq.gz");

    let config = RunConfig::new(&input, &output);
    let pipeline = Pipeline::new(config);
    let out = pipeline.run(Job::Filter(ProcessorChain::new())).unwrap();

    assert_eq!(out.stats.records_in, 2);
    // output is real gzip on disk, identical records after decoding
    let mut magic = [0u8; 2];
    fs::File::open(&output)
        .unwrap()
        .read_exact(&mut magic)
        .unwrap();
    assert_eq!(magic, [0x1f, 0x8b]);
    assert_eq!(read_through_decoder(&output), data);
}

#[test]
fn trimming_composes_with_length_filter() {
    let dir = tempdir().unwrap();
    let input = write_plain(&dir, "in.fq", "@r\nACGTACGT\n+\n!!IIII!!\n");
    let output = dir.path().join("out.fq");

    let opts = FilterOptions {
        trim_quality: Some(30.0),
        trim_min_length: 1,
        min_length: Some(1),
        ..Default::default()
    };
    let chain = ProcessorChain::from_options(&opts, 33);
    let pipeline = Pipeline::new(RunConfig::new(&input, &output));
    pipeline.run(Job::Filter(chain)).unwrap();

    assert_eq!(fs::read_to_string(&output).unwrap(), "@r\nGTAC\n+\nIIII\n");
}

#[test]
fn preserve_plus_round_trips_exact_bytes() {
    let dir = tempdir().unwrap();
    let data = "@r1 lane1\nACGT\n+comment\nIIII\n@r2\nGGNN\n+\n!!!!\n";
    let input = write_plain(&dir, "in.fq", data);
    let output = dir.path().join("out.fq");

    let mut config = RunConfig::new(&input, &output);
    config.preserve_plus = true;
    let pipeline = Pipeline::new(config);
    pipeline.run(Job::Filter(ProcessorChain::new())).unwrap();

    assert_eq!(fs::read_to_string(&output).unwrap(), data);
}

#[test]
fn stat_tally_is_independent_of_thread_count_and_batching() {
    let dir = tempdir().unwrap();
    let mut data = String::new();
    for i in 0..5000 {
        let qual = match i % 3 {
            0 => "IIIIIIII",
            1 => "!!!!IIII",
            _ => "########",
        };
        data.push_str(&format!("@r{i}\nACGTNNGT\n+\n{qual}\n"));
    }
    let input = write_plain(&dir, "in.fq", &data);

    let scheme = infer_scheme(&input, DEFAULT_SAMPLE_RECORDS).unwrap();
    assert!(scheme.is_fixed_length);
    assert_eq!(scheme.read_length, 8);

    let run_with = |threads: usize, batch_capacity: usize| {
        let mut config = RunConfig::new(&input, dir.path().join("unused.txt"));
        config.threads = threads;
        config.batch_capacity = batch_capacity;
        let pipeline = Pipeline::new(config);
        pipeline
            .run(Job::Stat {
                offset: scheme.offset,
                read_length: scheme.read_length,
            })
            .unwrap()
            .stat
            .unwrap()
    };

    let serial = run_with(1, 10_000);
    let parallel = run_with(4, 128);
    assert_eq!(serial, parallel);
    assert_eq!(serial.records(), 5000);
}

#[test]
fn variable_length_input_is_fine_for_filter() {
    let dir = tempdir().unwrap();
    let data = "@r1\nACGTACGT\n+\nIIIIIIII\n@r2\nAC\n+\nII\n";
    let input = write_plain(&dir, "in.fq", data);
    let output = dir.path().join("out.fq");

    let scheme = infer_scheme(&input, DEFAULT_SAMPLE_RECORDS).unwrap();
    assert!(!scheme.is_fixed_length);

    let opts = FilterOptions {
        min_length: Some(4),
        ..Default::default()
    };
    let chain = ProcessorChain::from_options(&opts, 33);
    let pipeline = Pipeline::new(RunConfig::new(&input, &output));
    pipeline.run(Job::Filter(chain)).unwrap();

    let written = fs::read_to_string(&output).unwrap();
    assert!(written.contains("@r1\n"));
    assert!(!written.contains("@r2\n"));
}

#[test]
fn cancellation_leaves_a_syntactically_complete_prefix() {
    let dir = tempdir().unwrap();
    let mut data = String::new();
    for i in 0..50_000 {
        data.push_str(&format!("@r{i}\nACGTACGTACGTACGT\n+\nIIIIIIIIIIIIIIII\n"));
    }
    let input = write_plain(&dir, "in.fq", &data);
    let output = dir.path().join("out.fq");

    let token = CancelToken::new();
    let mut config = RunConfig::new(&input, &output);
    config.threads = 2;
    config.batch_capacity = 256;
    // fire cancellation from the first committed batch
    let trigger = token.clone();
    config.progress = Some(Box::new(move |_| trigger.cancel()));

    let pipeline = Pipeline::with_cancel_token(config, token);
    let err = pipeline.run(Job::Filter(ProcessorChain::new())).unwrap_err();
    assert!(err.is_canceled());

    // whatever was committed is whole records, a prefix of the input
    let written = fs::read_to_string(&output).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines.len() % 4, 0);
    assert!(lines.len() < 4 * 50_000);
    for (i, chunk) in lines.chunks(4).enumerate() {
        assert_eq!(chunk[0], format!("@r{i}"));
        assert_eq!(chunk[1], "ACGTACGTACGTACGT");
    }
}

#[test]
fn single_record_input_survives_generous_batching() {
    let dir = tempdir().unwrap();
    let data = "@only\nACGT\n+\nIIII\n";
    let input = write_plain(&dir, "in.fq", data);
    let output = dir.path().join("out.fq");

    let mut config = RunConfig::new(&input, &output);
    config.threads = 4;
    let pipeline = Pipeline::new(config);
    let out = pipeline.run(Job::Filter(ProcessorChain::new())).unwrap();
    assert_eq!(out.stats.records_in, 1);
    assert_eq!(fs::read_to_string(&output).unwrap(), data);
}
