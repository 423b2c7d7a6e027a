//! Top-level counting orchestration: ties the sequence source (C3), the
//! k-mer iterator (C4), Simple/Complex counting (C5), and the block writer
//! plus master index (C6) into one `count_to_database` entry point that
//! produces a complete `<name>.meryl` directory (`spec.md` §4.5, §6).
//!
//! Grounded in the inherited `run.rs`/`streaming.rs` top-level driver idiom:
//! resolve inputs, pick a counting mode, stream buffers through it, persist.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use crate::bits::StuffedBits;
use crate::block::{Block, BlockWriter, FileIndex, FileIndexEntry};
use crate::count::config::{configure, estimate_expected_kmers, Compression};
use crate::count::{ComplexEngine, EngineConfig, PrefixPlan, SimpleCounter};
use crate::database::DatabaseLayout;
use crate::error::MerylError;
use crate::format::SequenceFormat;
use crate::histogram::KmerHistogram;
use crate::input::Input;
use crate::master_index::MasterIndex;
use crate::progress::ProgressTracker;
use crate::seq_index;
use crate::sequence::{chunk_with_carry, BaseBuffer, SequenceSource};

/// Maximum bases handed to the counting engine per [`BaseBuffer`], matching
/// the "page-sized" granularity `SEG_BYTES` is chosen around (`spec.md` §3).
const MAX_BUFFER_BASES: usize = 1 << 20;

/// Which of the two `spec.md` §4.5 algorithms a run used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountMode {
    Simple,
    Complex,
}

/// Summary of a finished counting run, for CLI reporting.
#[derive(Debug, Clone)]
pub struct EngineOutcome {
    pub out_dir: PathBuf,
    pub mode: CountMode,
    pub plan: PrefixPlan,
    pub distinct_kmers: u64,
    pub total_kmers: u64,
    pub progress: crate::progress::Progress,
}

/// Picks Simple mode when the dense `4^k` table fits the memory ceiling and
/// no count-suffix is configured; Complex mode otherwise (`spec.md` §4.5).
#[must_use]
pub fn decide_mode(cfg: &EngineConfig) -> CountMode {
    if cfg.forces_simple_mode() {
        return CountMode::Simple;
    }
    if SimpleCounter::dense_capacity_bytes(cfg.k, 0) <= cfg.memory_bytes {
        CountMode::Simple
    } else {
        CountMode::Complex
    }
}

/// Opens `input` as a buffered byte reader, transparently decompressing
/// gzip-suffixed files when the `gzip` feature is enabled and memory-mapping
/// non-gzip files when the `mmap` feature is enabled (mapping a file that
/// will just be streamed through a `flate2` decoder gains nothing, so gzip
/// always takes the plain-file path even with `mmap` on).
fn open_reader(input: &Input) -> Result<Box<dyn BufRead>, MerylError> {
    match input {
        Input::Stdin => Ok(Box::new(std::io::BufReader::new(std::io::stdin()))),
        Input::File(path) => {
            let is_gz = path.extension().and_then(std::ffi::OsStr::to_str) == Some("gz");

            #[cfg(feature = "mmap")]
            if !is_gz {
                let mapped = crate::mmap::MmapFasta::open(path).map_err(|source| MerylError::SequenceRead {
                    source,
                    path: path.clone(),
                })?;
                return Ok(Box::new(std::io::Cursor::new(mapped)));
            }

            let file = std::fs::File::open(path).map_err(|source| MerylError::SequenceRead {
                source,
                path: path.clone(),
            })?;
            #[cfg(feature = "gzip")]
            if is_gz {
                let decoder = flate2::read::MultiGzDecoder::new(file);
                return Ok(Box::new(std::io::BufReader::new(decoder)));
            }
            #[cfg(not(any(feature = "gzip", feature = "mmap")))]
            let _ = is_gz;
            Ok(Box::new(std::io::BufReader::new(file)))
        }
    }
}

/// Refreshes `path`'s `.dnaSeqIndex` sidecar if missing or stale (`spec.md`
/// §7 category 6: "Missing or stale sequence index — silently rebuilt").
/// Gzip-suffixed inputs are skipped: their true on-disk offsets aren't the
/// uncompressed offsets the sidecar records, so there's nothing useful to
/// cache for them.
fn refresh_sequence_index(path: &Path, format: SequenceFormat) -> Result<(), MerylError> {
    if path.extension().and_then(std::ffi::OsStr::to_str) == Some("gz") {
        return Ok(());
    }
    if seq_index::load_if_fresh(path).is_some() {
        return Ok(());
    }
    let entries = seq_index::scan(path, format)?;
    if let Some(index) = seq_index::build(path, entries) {
        seq_index::save(path, &index)?;
    }
    Ok(())
}

/// Drains one input's sequence source into breaker-carrying, carry-joined
/// `BaseBuffer`s bounded to [`MAX_BUFFER_BASES`] bases each, recording each
/// source sequence's length in `progress` as it's read.
fn buffers_for(
    input: &Input,
    k: u32,
    progress: &ProgressTracker,
) -> Result<Vec<Result<BaseBuffer, MerylError>>, MerylError> {
    let format = SequenceFormat::Auto.resolve(input.as_path());
    if let Input::File(path) = input {
        refresh_sequence_index(path, format)?;
    }
    let reader = open_reader(input)?;
    let mut source = SequenceSource::new(reader, format);
    let carry = (k as usize).saturating_sub(1);

    let mut out = Vec::new();
    while let Some(next) = source.next_buffer() {
        match next {
            Ok(buf) => {
                progress.record_sequence(buf.bases.len() as u64);
                for chunk in chunk_with_carry(&buf.bases, MAX_BUFFER_BASES, carry) {
                    out.push(Ok(BaseBuffer {
                        bases: chunk,
                        end_of_sequence: buf.end_of_sequence,
                    }));
                }
            }
            Err(e) => out.push(Err(e)),
        }
    }
    Ok(out)
}

/// Estimates the total expected k-mer count across `inputs`, for the §4.5.1
/// configurator, from on-disk file sizes (stdin counts as zero).
fn estimate_total_kmers(inputs: &[Input], cfg: &EngineConfig) -> u64 {
    if let Some(e) = cfg.expected_kmers {
        return e;
    }
    let mut total = 0u64;
    for input in inputs {
        if let Input::File(path) = input {
            if let Ok(meta) = std::fs::metadata(path) {
                let compression = if path.extension().and_then(std::ffi::OsStr::to_str) == Some("gz")
                {
                    Compression::Gzip
                } else {
                    Compression::None
                };
                total += estimate_expected_kmers(meta.len(), compression);
            }
        }
    }
    total.max(1)
}

/// Runs a complete counting pass over `inputs` and persists a database at
/// `out_dir`, including the top-level master `merylIndex` (the gap left by
/// [`ComplexEngine::run`], which only produces per-file block data).
pub fn count_to_database(
    cfg: &EngineConfig,
    inputs: &[Input],
    out_dir: &Path,
) -> Result<EngineOutcome, MerylError> {
    let mode = decide_mode(cfg);
    let expected = estimate_total_kmers(inputs, cfg);
    let plan = configure(cfg, expected)?;
    let progress = ProgressTracker::new();

    let mut all_buffers = Vec::new();
    for input in inputs {
        all_buffers.extend(buffers_for(input, u32::from(cfg.k.get()), &progress)?);
    }
    let progress = progress.snapshot();

    match mode {
        CountMode::Simple => run_simple(cfg, plan, all_buffers, out_dir, progress),
        CountMode::Complex => run_complex(cfg, plan, all_buffers, out_dir, progress),
    }
}

fn run_complex(
    cfg: &EngineConfig,
    plan: PrefixPlan,
    buffers: Vec<Result<BaseBuffer, MerylError>>,
    out_dir: &Path,
    progress: crate::progress::Progress,
) -> Result<EngineOutcome, MerylError> {
    let work_root = out_dir.with_extension("meryl.work");
    let mut engine = ComplexEngine::new(cfg, plan, work_root.clone());
    engine.run(buffers, out_dir)?;
    let _ = std::fs::remove_dir_all(&work_root);

    let layout = DatabaseLayout::new(out_dir, plan.w_prefix.min(10));
    let (histogram, distinct, total) = histogram_from_database(&layout)?;
    write_master_index(&layout, cfg, plan, histogram)?;

    Ok(EngineOutcome {
        out_dir: out_dir.to_path_buf(),
        mode: CountMode::Complex,
        plan,
        distinct_kmers: distinct,
        total_kmers: total,
        progress,
    })
}

fn run_simple(
    cfg: &EngineConfig,
    plan: PrefixPlan,
    buffers: Vec<Result<BaseBuffer, MerylError>>,
    out_dir: &Path,
    progress: crate::progress::Progress,
) -> Result<EngineOutcome, MerylError> {
    let mut counter = SimpleCounter::new(cfg.k, cfg.count_suffix.as_deref());
    for buf in buffers {
        match buf {
            Ok(b) => counter.count_sequence(&b.bases),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "skipping malformed sequence record");
                #[cfg(not(feature = "tracing"))]
                eprintln!("warning: skipping malformed sequence record: {e}");
            }
        }
    }
    let counts = counter.into_counts();

    let layout = DatabaseLayout::new(out_dir, plan.w_prefix.min(10));
    let suffix_bits = plan.suffix_bits(cfg.k);
    let suffix_mask: u64 = if suffix_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << suffix_bits) - 1
    };

    let mut by_file: std::collections::BTreeMap<u32, std::collections::BTreeMap<u64, Vec<(u64, u64)>>> =
        std::collections::BTreeMap::new();
    let mut histogram = KmerHistogram::new();
    let mut distinct = 0u64;
    let mut total = 0u64;

    for (kmer, value) in counts {
        let prefix = (kmer >> suffix_bits) as u64;
        let suffix = (kmer as u64) & suffix_mask;
        let file_id = layout.file_for_prefix(prefix, plan.w_prefix);
        by_file
            .entry(file_id)
            .or_default()
            .entry(prefix)
            .or_default()
            .push((suffix, value));
        *histogram.entry(value).or_insert(0) += 1;
        distinct += 1;
        total += value;
    }

    std::fs::create_dir_all(out_dir).map_err(|source| MerylError::DatabaseWrite {
        source,
        path: out_dir.to_path_buf(),
    })?;

    for file_id in 0..layout.num_files() {
        let Some(prefixes) = by_file.get(&file_id) else {
            continue;
        };
        let mut writer = BlockWriter::new();
        let mut entries = Vec::new();
        for (&prefix, pairs) in prefixes {
            let mut sorted = pairs.clone();
            sorted.sort_unstable_by_key(|(s, _)| *s);
            let block = Block {
                prefix,
                suffixes: sorted.iter().map(|(s, _)| *s).collect(),
                values: sorted.iter().map(|(_, v)| *v).collect(),
            };
            let pos = writer.write_block(&block);
            entries.push(FileIndexEntry {
                block_prefix: prefix,
                block_position_bits: pos,
                n_kmers: block.n_kmers() as u64,
            });
        }
        let data_bytes = writer.into_stream().dump_to_buffer();
        let index_bytes = FileIndex { entries }.write().dump_to_buffer();
        std::fs::write(layout.data_path(file_id), data_bytes).map_err(|source| {
            MerylError::DatabaseWrite {
                source,
                path: layout.data_path(file_id),
            }
        })?;
        std::fs::write(layout.index_path(file_id), index_bytes).map_err(|source| {
            MerylError::DatabaseWrite {
                source,
                path: layout.index_path(file_id),
            }
        })?;
    }

    write_master_index(&layout, cfg, plan, histogram)?;

    Ok(EngineOutcome {
        out_dir: out_dir.to_path_buf(),
        mode: CountMode::Simple,
        plan,
        distinct_kmers: distinct,
        total_kmers: total,
        progress,
    })
}

/// Rescans every block of a finished database to build its value histogram
/// (needed after [`ComplexEngine::run`], which writes blocks but no master
/// index).
fn histogram_from_database(layout: &DatabaseLayout) -> Result<(KmerHistogram, u64, u64), MerylError> {
    use crate::block::BlockReader;

    let mut histogram = KmerHistogram::new();
    let mut distinct = 0u64;
    let mut total = 0u64;
    for file_id in 0..layout.num_files() {
        let path = layout.data_path(file_id);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(source) => return Err(MerylError::DatabaseRead { source, path }),
        };
        let mut reader = BlockReader::new(StuffedBits::load_from_buffer(&bytes));
        while let Some(block) = reader.read_block()? {
            for value in block.values {
                *histogram.entry(value).or_insert(0) += 1;
                distinct += 1;
                total += value;
            }
        }
    }
    Ok((histogram, distinct, total))
}

fn write_master_index(
    layout: &DatabaseLayout,
    cfg: &EngineConfig,
    plan: PrefixPlan,
    histogram: KmerHistogram,
) -> Result<(), MerylError> {
    let master = MasterIndex {
        prefix_size: plan.w_prefix,
        suffix_size: plan.suffix_bits(cfg.k),
        num_files_bits: layout.num_files_bits(),
        num_blocks_bits: plan.w_prefix.saturating_sub(layout.num_files_bits()),
        flags: 0,
        histogram,
    };
    let bytes = master.write().dump_to_buffer();
    std::fs::write(layout.master_index_path(), bytes).map_err(|source| MerylError::DatabaseWrite {
        source,
        path: layout.master_index_path(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kmer::KmerSize;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_fasta(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn cfg(k: u32, memory_bytes: u64) -> EngineConfig {
        EngineConfig {
            k: KmerSize::new(k).unwrap(),
            memory_bytes,
            threads: 2,
            expected_kmers: None,
            count_suffix: None,
        }
    }

    #[test]
    fn simple_mode_chosen_for_small_k_and_generous_memory() {
        let c = cfg(4, 1024 * 1024);
        assert_eq!(decide_mode(&c), CountMode::Simple);
    }

    #[test]
    fn complex_mode_chosen_when_dense_table_does_not_fit() {
        let c = cfg(21, 1024);
        assert_eq!(decide_mode(&c), CountMode::Complex);
    }

    #[test]
    fn count_suffix_forces_simple_even_for_large_k() {
        let mut c = cfg(21, 1024);
        c.count_suffix = Some(b"AT".to_vec());
        assert_eq!(decide_mode(&c), CountMode::Simple);
    }

    #[test]
    fn end_to_end_simple_run_writes_a_readable_database() {
        // S1 from spec.md: ">s\nACGTACGTN\n", k=4 -> ACGT=2, CGTA=1, GTAC=1.
        // Memory large enough that both Simple-mode selection (dense table
        // fits) and the §4.5.1 configurator's wPrefix=7 floor (~8 MiB for
        // this k) are satisfied.
        let dir = tempdir().unwrap();
        let fasta = write_fasta(dir.path(), "s.fa", ">s\nACGTACGTN\n");
        let c = cfg(4, 64 * 1024 * 1024);
        let out_dir = dir.path().join("out.meryl");

        let outcome = count_to_database(&c, &[Input::File(fasta)], &out_dir).unwrap();
        assert_eq!(outcome.mode, CountMode::Simple);
        assert_eq!(outcome.total_kmers, 4);

        let bytes = std::fs::read(out_dir.join("merylIndex")).unwrap();
        let master = MasterIndex::read(StuffedBits::load_from_buffer(&bytes)).unwrap();
        let total: u64 = master.histogram.iter().map(|(v, c)| v * c).sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn end_to_end_count_suffix_filters_by_trailing_bases() {
        // k=4, suffix "GT": of ACGT,CGTA,GTAC,TACG,ACGG only ACGT ends in GT.
        let dir = tempdir().unwrap();
        let fasta = write_fasta(dir.path(), "s.fa", ">s\nACGTACGG\n");
        let mut c = cfg(4, 64 * 1024 * 1024);
        c.count_suffix = Some(b"GT".to_vec());
        let out_dir = dir.path().join("out.meryl");

        let outcome = count_to_database(&c, &[Input::File(fasta)], &out_dir).unwrap();
        assert_eq!(outcome.mode, CountMode::Simple);
        assert_eq!(outcome.distinct_kmers, 1);
        assert_eq!(outcome.total_kmers, 1);
    }

    #[test]
    fn end_to_end_complex_run_matches_simple_totals() {
        // k=13 so the dense Simple table (4^13*4 bytes) overflows a 100 MiB
        // ceiling, forcing Complex mode, while still leaving the §4.5.1
        // configurator's ~64 MiB wPrefix=10 floor comfortably feasible.
        let dir = tempdir().unwrap();
        let seq = "ACGTACGTACGTACGTACGTACGTACGTACGTACGTACGT";
        let fasta = write_fasta(dir.path(), "s.fa", &format!(">s\n{seq}\n"));

        let simple_cfg = cfg(13, 1024 * 1024 * 1024);
        let simple_out = dir.path().join("simple.meryl");
        let simple = count_to_database(&simple_cfg, &[Input::File(fasta.clone())], &simple_out).unwrap();

        let mut complex_cfg = cfg(13, 100 * 1024 * 1024);
        complex_cfg.expected_kmers = Some(1000);
        let complex_out = dir.path().join("complex.meryl");
        let complex = count_to_database(&complex_cfg, &[Input::File(fasta)], &complex_out).unwrap();

        assert_eq!(decide_mode(&complex_cfg), CountMode::Complex);
        assert_eq!(simple.total_kmers, complex.total_kmers);
        assert_eq!(simple.distinct_kmers, complex.distinct_kmers);
    }

    #[test]
    fn counting_reports_sequence_and_base_progress() {
        let dir = tempdir().unwrap();
        let fasta = write_fasta(dir.path(), "s.fa", ">a\nACGTACGT\n>b\nTTTT\n");
        let c = cfg(4, 64 * 1024 * 1024);
        let out_dir = dir.path().join("out.meryl");

        let outcome = count_to_database(&c, &[Input::File(fasta)], &out_dir).unwrap();
        assert_eq!(outcome.progress.sequences_processed, 2);
        // 8 bases for ">a" + a breaker sentinel + 4 bases for ">b".
        assert_eq!(outcome.progress.bases_processed, 13);
    }

    #[test]
    fn counting_writes_a_fresh_sequence_index_sidecar() {
        let dir = tempdir().unwrap();
        let fasta = write_fasta(dir.path(), "s.fa", ">s\nACGTACGT\n");
        let c = cfg(4, 64 * 1024 * 1024);
        let out_dir = dir.path().join("out.meryl");

        count_to_database(&c, &[Input::File(fasta.clone())], &out_dir).unwrap();

        let sidecar = crate::seq_index::sidecar_path(&fasta);
        assert!(sidecar.exists());
        let index = crate::seq_index::load_if_fresh(&fasta).unwrap();
        assert_eq!(index.entries.len(), 1);
        assert_eq!(index.entries[0].sequence_length, 8);
    }
}
