//! Complex counting mode (`spec.md` §4.5.2-§4.5.4): per-prefix `CountArray`
//! buckets filled by a worker pool, spilled to disk under memory pressure,
//! and merged into the final database.
//!
//! The per-prefix synchronization is a hand-rolled compare-and-swap
//! spinlock rather than `std::sync::Mutex`, per the explicit instruction in
//! `spec.md` §9 to keep the spinlock design ("it is the reason throughput
//! scales"). This is the one place in the crate that reaches for `unsafe`,
//! mirroring how the inherited `mmap.rs` isolates its single unsafe call
//! behind a narrow, documented function.

use std::cell::UnsafeCell;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use crate::block::{Block, BlockReader, BlockWriter, FileIndex, FileIndexEntry};
use crate::bits::StuffedBits;
use crate::database::DatabaseLayout;
use crate::error::MerylError;
use crate::iterator::KmerIterator;
use crate::kmer::KmerSize;
use crate::sequence::BaseBuffer;

use super::config::{EngineConfig, PrefixPlan, SEG_BYTES};

const IDLE: u8 = 0;
const LOCKED: u8 = 1;

/// The in-memory bucket for one prefix during counting (`spec.md` §3).
/// Append-only until [`Self::finalize`] sorts and run-length-collapses it.
#[derive(Debug, Default)]
pub struct CountArray {
    suffixes: Vec<u64>,
    values: Vec<u64>,
    counted: bool,
}

impl CountArray {
    fn push(&mut self, suffix: u64) {
        self.suffixes.push(suffix);
    }

    fn byte_footprint(&self) -> u64 {
        ((self.suffixes.len() + self.values.len()) * std::mem::size_of::<u64>()) as u64
    }

    /// `countKmers` (§4.5.3 step 1): sort then run-length-collapse
    /// duplicate suffixes into `(suffix, count)` pairs, in place.
    fn finalize(&mut self) {
        if self.counted || self.suffixes.is_empty() {
            self.counted = true;
            return;
        }
        self.suffixes.sort_unstable();
        let mut suffixes = Vec::with_capacity(self.suffixes.len());
        let mut values = Vec::with_capacity(self.suffixes.len());
        let mut iter = self.suffixes.iter().copied();
        let mut current = iter.next().expect("checked non-empty above");
        let mut count = 1u64;
        for s in iter {
            if s == current {
                count += 1;
            } else {
                suffixes.push(current);
                values.push(count);
                current = s;
                count = 1;
            }
        }
        suffixes.push(current);
        values.push(count);
        self.suffixes = suffixes;
        self.values = values;
        self.counted = true;
    }

    /// `removeCountedKmers` (§4.5.3 step 3): drains into a [`Block`] and
    /// empties the bucket so it is reusable for the next batch.
    fn take_block(&mut self, prefix: u64) -> Block {
        debug_assert!(self.counted);
        let block = Block {
            prefix,
            suffixes: std::mem::take(&mut self.suffixes),
            values: std::mem::take(&mut self.values),
        };
        self.counted = false;
        block
    }
}

/// One prefix's `CountArray` behind a CAS spinlock. Workers call
/// [`Self::worker_append`], which defers to the global `dumping` flag; the
/// writer calls [`Self::writer_acquire`]/[`Self::writer_release`], which
/// always contends for the flag (it is the one that set `dumping`).
struct Bucket {
    state: AtomicU8,
    data: UnsafeCell<CountArray>,
}

// SAFETY: access to `data` is gated by `state`'s compare-and-swap in
// `worker_append`/`writer_acquire`; only one thread ever holds the
// `LOCKED` state for a given bucket at a time.
unsafe impl Sync for Bucket {}

impl Default for Bucket {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
            data: UnsafeCell::new(CountArray::default()),
        }
    }
}

impl Bucket {
    /// Appends `suffix`, busy-waiting 1ms whenever `dumping` is set instead
    /// of contending for the lock (`spec.md` §4.5.2/§5).
    fn worker_append(&self, suffix: u64, dumping: &AtomicBool) {
        loop {
            if dumping.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(1));
                continue;
            }
            if self
                .state
                .compare_exchange(IDLE, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                // SAFETY: CAS above gives this thread exclusive access
                // until `state` is stored back to IDLE below.
                unsafe { (*self.data.get()).push(suffix) };
                self.state.store(IDLE, Ordering::Release);
                return;
            }
            std::thread::yield_now();
        }
    }

    /// Takes exclusive access for the spill writer, which contends for the
    /// lock unconditionally (it already raised `dumping`).
    fn writer_acquire(&self) -> &mut CountArray {
        loop {
            if self
                .state
                .compare_exchange(IDLE, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                // SAFETY: see worker_append.
                return unsafe { &mut *self.data.get() };
            }
            std::thread::yield_now();
        }
    }

    fn writer_release(&self) {
        self.state.store(IDLE, Ordering::Release);
    }

    fn byte_footprint(&self) -> u64 {
        // SAFETY: called only between batches, when no worker is active.
        unsafe { (*self.data.get()).byte_footprint() }
    }
}

/// One spilled or final set of per-file block streams, laid out exactly
/// like a finished database directory so the merge pass can read batches
/// with the same [`BlockReader`]/[`FileIndex`] machinery as the real thing.
struct BatchFiles {
    layout: DatabaseLayout,
}

impl BatchFiles {
    fn write_file(
        dir: &Path,
        layout: &DatabaseLayout,
        file_id: u32,
        blocks: &[Block],
    ) -> Result<(), MerylError> {
        let mut writer = BlockWriter::new();
        let mut entries = Vec::with_capacity(blocks.len());
        for block in blocks {
            let pos = writer.write_block(block);
            entries.push(FileIndexEntry {
                block_prefix: block.prefix,
                block_position_bits: pos,
                n_kmers: block.n_kmers() as u64,
            });
        }
        let data_bytes = writer.into_stream().dump_to_buffer();
        let index_bytes = FileIndex { entries }.write().dump_to_buffer();
        std::fs::create_dir_all(dir).map_err(|source| MerylError::DatabaseWrite {
            source,
            path: dir.to_path_buf(),
        })?;
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
        Ok(())
    }

    fn read_all_blocks(&self, file_id: u32) -> Result<Vec<Block>, MerylError> {
        let path = self.layout.data_path(file_id);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(MerylError::DatabaseRead { source, path }),
        };
        let stream = StuffedBits::load_from_buffer(&bytes);
        let mut reader = BlockReader::new(stream);
        let mut blocks = Vec::new();
        while let Some(b) = reader.read_block()? {
            blocks.push(b);
        }
        Ok(blocks)
    }
}

/// Drives Complex-mode counting: fills per-prefix [`CountArray`]s from a
/// stream of [`BaseBuffer`]s, spilling to disk whenever the memory ceiling
/// is approached, then performs the §4.5.4 N-way merge.
pub struct ComplexEngine {
    k: KmerSize,
    plan: PrefixPlan,
    buckets: Vec<Bucket>,
    dumping: AtomicBool,
    memory_bytes: u64,
    worker_threads: u32,
    layout: DatabaseLayout,
    batch_dirs: Vec<PathBuf>,
    work_root: PathBuf,
}

impl ComplexEngine {
    #[must_use]
    pub fn new(cfg: &EngineConfig, plan: PrefixPlan, work_root: PathBuf) -> Self {
        let n_prefix = plan.n_prefix();
        let mut buckets = Vec::with_capacity(n_prefix as usize);
        buckets.resize_with(n_prefix as usize, Bucket::default);
        let num_files_bits = plan.w_prefix.min(10);
        Self {
            k: cfg.k,
            plan,
            buckets,
            dumping: AtomicBool::new(false),
            memory_bytes: cfg.memory_bytes,
            worker_threads: cfg.worker_threads(),
            layout: DatabaseLayout::new(&work_root, num_files_bits),
            batch_dirs: Vec::new(),
            work_root,
        }
    }

    fn suffix_bits(&self) -> u32 {
        self.plan.suffix_bits(self.k)
    }

    fn suffix_mask(&self) -> u64 {
        let bits = self.suffix_bits();
        if bits >= 64 {
            u64::MAX
        } else {
            (1u64 << bits) - 1
        }
    }

    /// One worker's contribution: runs the k-mer iterator over `buf` and
    /// appends each canonical k-mer's suffix to its prefix bucket.
    fn ingest_buffer(&self, buf: &BaseBuffer) {
        let mut it = KmerIterator::new(self.k);
        it.add_sequence(&buf.bases);
        let suffix_bits = self.suffix_bits();
        let suffix_mask = self.suffix_mask();
        while it.next_mer() {
            let kmer = it.canonical_mer();
            let prefix = (kmer >> suffix_bits) as u64;
            let suffix = (kmer as u64) & suffix_mask;
            self.buckets[prefix as usize].worker_append(suffix, &self.dumping);
        }
    }

    fn memory_used(&self) -> u64 {
        self.buckets.iter().map(Bucket::byte_footprint).sum()
    }

    fn sort_overhead_estimate(&self) -> u64 {
        u64::from(self.worker_threads) * SEG_BYTES
    }

    fn has_unflushed_data(&self) -> bool {
        self.memory_used() > 0
    }

    /// Spill decision body of §4.5.2: raise `dumping`, drain every bucket
    /// (sort + write a block), then lower `dumping`.
    fn spill(&mut self) -> Result<(), MerylError> {
        self.dumping.store(true, Ordering::Release);

        let batch_id = self.batch_dirs.len();
        let batch_dir = self.work_root.join(format!(".batch_{batch_id:04}"));
        let batch_layout = DatabaseLayout::new(&batch_dir, self.layout.num_files_bits());

        let mut per_file_blocks: std::collections::BTreeMap<u32, Vec<Block>> =
            std::collections::BTreeMap::new();

        for (prefix, bucket) in self.buckets.iter().enumerate() {
            let data = bucket.writer_acquire();
            data.finalize();
            if data.n_kmers() > 0 {
                let block = data.take_block(prefix as u64);
                let file_id = self
                    .layout
                    .file_for_prefix(prefix as u64, self.plan.w_prefix);
                per_file_blocks.entry(file_id).or_default().push(block);
            }
            bucket.writer_release();
        }

        for (file_id, blocks) in per_file_blocks {
            BatchFiles::write_file(&batch_dir, &batch_layout, file_id, &blocks)?;
        }

        self.batch_dirs.push(batch_dir);
        self.dumping.store(false, Ordering::Release);
        Ok(())
    }

    /// Runs the full counting pass over `buffers`, spilling as needed, then
    /// merges every spill into the final database at `out_dir`
    /// (`spec.md` §4.5.2-§4.5.4).
    pub fn run<I>(&mut self, buffers: I, out_dir: &Path) -> Result<(), MerylError>
    where
        I: IntoIterator<Item = Result<BaseBuffer, MerylError>>,
    {
        let worker_threads = self.worker_threads.max(1) as usize;
        let mut chunk: Vec<BaseBuffer> = Vec::with_capacity(worker_threads * 4);

        for item in buffers {
            match item {
                Ok(buf) => chunk.push(buf),
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %e, "skipping malformed sequence record");
                    #[cfg(not(feature = "tracing"))]
                    eprintln!("warning: skipping malformed sequence record: {e}");
                    continue;
                }
            }

            if chunk.len() >= worker_threads * 4 {
                self.ingest_chunk(&chunk);
                chunk.clear();
                if self.memory_used() + self.sort_overhead_estimate() > self.memory_bytes {
                    self.spill()?;
                }
            }
        }
        if !chunk.is_empty() {
            self.ingest_chunk(&chunk);
        }
        if self.has_unflushed_data() || self.batch_dirs.is_empty() {
            self.spill()?;
        }

        self.merge_batches(out_dir)
    }

    fn ingest_chunk(&self, chunk: &[BaseBuffer]) {
        std::thread::scope(|scope| {
            let worker_threads = self.worker_threads.max(1) as usize;
            let per_worker = chunk.len().div_ceil(worker_threads).max(1);
            for part in chunk.chunks(per_worker) {
                scope.spawn(move || {
                    for buf in part {
                        self.ingest_buffer(buf);
                    }
                });
            }
        });
    }

    /// N-way merge across every spilled batch, keyed by `(prefix, suffix)`,
    /// summing counts on equality (`spec.md` §4.5.4). The per-file index is
    /// regenerated during merge.
    fn merge_batches(&self, out_dir: &Path) -> Result<(), MerylError> {
        let out_layout = DatabaseLayout::new(out_dir, self.layout.num_files_bits());
        let batches: Vec<BatchFiles> = self
            .batch_dirs
            .iter()
            .map(|dir| BatchFiles {
                layout: DatabaseLayout::new(dir, self.layout.num_files_bits()),
            })
            .collect();

        for file_id in 0..out_layout.num_files() {
            let mut by_prefix: std::collections::BTreeMap<u64, std::collections::BTreeMap<u64, u64>> =
                std::collections::BTreeMap::new();

            for batch in &batches {
                for block in batch.read_all_blocks(file_id)? {
                    let entry = by_prefix.entry(block.prefix).or_default();
                    for (suffix, value) in block.suffixes.into_iter().zip(block.values) {
                        *entry.entry(suffix).or_insert(0) += value;
                    }
                }
            }

            let blocks: Vec<Block> = by_prefix
                .into_iter()
                .map(|(prefix, suffix_counts)| Block {
                    prefix,
                    suffixes: suffix_counts.keys().copied().collect(),
                    values: suffix_counts.values().copied().collect(),
                })
                .collect();

            if !blocks.is_empty() {
                BatchFiles::write_file(out_dir, &out_layout, file_id, &blocks)?;
            }
        }

        for dir in &self.batch_dirs {
            let _ = std::fs::remove_dir_all(dir);
        }

        Ok(())
    }

    #[must_use]
    pub fn layout(&self) -> &DatabaseLayout {
        &self.layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::count::config::EngineConfig;
    use crate::kmer;
    use tempfile::tempdir;

    fn plan_for(k: KmerSize, w_prefix: u32) -> PrefixPlan {
        PrefixPlan {
            w_prefix,
            n_batches: 1,
        }
    }

    #[test]
    fn finalize_collapses_duplicate_suffixes() {
        let mut arr = CountArray::default();
        for s in [5, 2, 5, 2, 5, 9] {
            arr.push(s);
        }
        arr.finalize();
        assert_eq!(arr.suffixes, vec![2, 5, 9]);
        assert_eq!(arr.values, vec![2, 3, 1]);
    }

    #[test]
    fn complex_mode_matches_simple_mode_p4() {
        // P4: Complex mode, single batch, must agree with direct counting.
        let k = KmerSize::new(4).unwrap();
        let cfg = EngineConfig {
            k,
            memory_bytes: 1024 * 1024 * 1024,
            threads: 2,
            expected_kmers: None,
            count_suffix: None,
        };
        let plan = plan_for(k, 6); // wPrefix in [6, 2k-1] per P4.
        let dir = tempdir().unwrap();
        let mut engine = ComplexEngine::new(&cfg, plan, dir.path().join("work"));

        let bases = b"ACGTACGTN".to_vec();
        let buffers = vec![Ok(BaseBuffer {
            bases,
            end_of_sequence: true,
        })];

        let out_dir = dir.path().join("out.meryl");
        engine.run(buffers, &out_dir).unwrap();

        let mut totals: std::collections::HashMap<u64, u64> = std::collections::HashMap::new();
        for file_id in 0..engine.layout().num_files() {
            let batch = BatchFiles {
                layout: DatabaseLayout::new(&out_dir, engine.layout().num_files_bits()),
            };
            for block in batch.read_all_blocks(file_id).unwrap() {
                for (suffix, value) in block.suffixes.into_iter().zip(block.values) {
                    let kmer = (block.prefix << plan_for(k, 6).suffix_bits(k)) | suffix;
                    totals.insert(kmer, value);
                }
            }
        }

        let get = |s: &[u8]| -> u64 {
            let bits = kmer::canonical(kmer::pack(s).unwrap(), k) as u64;
            *totals.get(&bits).unwrap_or(&0)
        };
        assert_eq!(get(b"ACGT"), 2);
        assert_eq!(get(b"CGTA"), 1);
        assert_eq!(get(b"GTAC"), 1);
        let sum: u64 = totals.values().sum();
        assert_eq!(sum, 4);
    }

    #[test]
    fn spill_forced_still_sums_correctly_p5() {
        // P5: tiny memory ceiling forces multiple spills; sums must still match.
        let k = KmerSize::new(3).unwrap();
        let cfg = EngineConfig {
            k,
            memory_bytes: 64, // force a spill almost immediately
            threads: 2,
            expected_kmers: None,
            count_suffix: None,
        };
        let plan = plan_for(k, 6);
        let dir = tempdir().unwrap();
        let mut engine = ComplexEngine::new(&cfg, plan, dir.path().join("work"));

        let seq = b"ACGTACGTACGTACGTACGTACGTACGT".to_vec();
        let buffers = vec![Ok(BaseBuffer {
            bases: seq.clone(),
            end_of_sequence: true,
        })];
        let out_dir = dir.path().join("out.meryl");
        engine.run(buffers, &out_dir).unwrap();

        let mut total = 0u64;
        for file_id in 0..engine.layout().num_files() {
            let batch = BatchFiles {
                layout: DatabaseLayout::new(&out_dir, engine.layout().num_files_bits()),
            };
            for block in batch.read_all_blocks(file_id).unwrap() {
                total += block.values.iter().sum::<u64>();
            }
        }
        assert_eq!(total, (seq.len() - k.get() as usize + 1) as u64);
        assert!(engine.batch_dirs.len() >= 1);
    }
}
