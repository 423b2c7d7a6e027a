//! Exact-lookup index (C6.4, `spec.md` §4.6.4): a static, prefix-bucketed
//! in-memory table built from a database in three passes (Configure, Count,
//! Load), answering `value(k)`/`contains(k)` in constant time.
//!
//! Grounded in the same `WordArray` primitive as the rest of the on-disk
//! format (`bits.rs`), so the builder's output is just two more bit-packed
//! arrays alongside the per-prefix `(bgn, len)` table.

use std::path::Path;

use crate::bits::{StuffedBits, WordArray};
use crate::block::BlockReader;
use crate::database::DatabaseLayout;
use crate::error::MerylError;
use crate::kmer::{KmerBits, KmerSize};
use crate::master_index::MasterIndex;

/// The chosen partitioning for one lookup index build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupPlan {
    pub w_prefix: u32,
    pub n: u64,
}

fn bit_width(max_value: u64) -> u32 {
    64 - max_value.leading_zeros().min(64)
}

fn footprint_for(w_prefix: u32, k: KmerSize, n: u64) -> u64 {
    // Saturates rather than panics once wPrefix >= 64 (reachable for k > 32,
    // since wPrefix ranges up to 2k); a saturated footprint always exceeds
    // any real memory budget, which is the correct outcome.
    let n_prefix = 1u64.checked_shl(w_prefix).unwrap_or(u64::MAX);
    let suffix_bits = u64::from(k.bits() - w_prefix);
    // wPointer/wLen: conservative shared estimate, both bounded by
    // ceil(log2(N)) since neither a bgn nor a len can exceed N.
    let pointer_bits = u64::from(bit_width(n.max(1)));
    let value_bits = u64::from(bit_width(n.max(1)));
    n_prefix
        .saturating_mul(pointer_bits)
        .saturating_add(n_prefix.saturating_mul(pointer_bits))
        .saturating_add(n.saturating_mul(suffix_bits))
        .saturating_add(n.saturating_mul(value_bits))
}

/// Runs the §4.6.4 configurator: counts `N` in-range k-mers from the
/// database's histogram, then picks the smallest `wPrefix` in `[6, 2k]`
/// whose footprint fits `memory_bytes`.
pub fn configure(
    k: KmerSize,
    master: &MasterIndex,
    min_value: u64,
    max_value: u64,
    memory_bytes: u64,
) -> Result<LookupPlan, MerylError> {
    let n: u64 = master
        .histogram
        .range(min_value..=max_value)
        .map(|(_, &count)| count)
        .sum();

    let max_w_prefix = k.bits();
    let mut smallest = u64::MAX;
    for w_prefix in 6..=max_w_prefix {
        let mem = footprint_for(w_prefix, k, n);
        smallest = smallest.min(mem);
        if mem <= memory_bytes {
            return Ok(LookupPlan { w_prefix, n });
        }
    }

    Err(MerylError::LookupBudgetExceeded {
        required: smallest,
        allowed: memory_bytes,
    })
}

fn read_all_blocks(layout: &DatabaseLayout, file_id: u32) -> Result<Vec<crate::block::Block>, MerylError> {
    let path = layout.data_path(file_id);
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

/// A built exact-lookup index: read-only, thread-safe once constructed
/// (`spec.md` §4.6.4's "Lookups are read-only and thread-safe").
#[derive(Debug)]
pub struct LookupIndex {
    k: KmerSize,
    min_value: u64,
    max_value: u64,
    w_prefix: u32,
    bgn: Vec<u64>,
    len: Vec<u64>,
    suffixes: WordArray,
    values: WordArray,
}

impl LookupIndex {
    fn suffix_bits(&self) -> u32 {
        self.k.bits() - self.w_prefix
    }

    fn suffix_mask(&self) -> KmerBits {
        let bits = self.suffix_bits();
        if bits >= 128 {
            KmerBits::MAX
        } else {
            ((1 as KmerBits) << bits) - 1
        }
    }

    /// Builds an index from `db_dir` (a completed `.meryl` directory) and
    /// `plan` (the result of [`configure`]), keeping only k-mers whose value
    /// falls in `[min_value, max_value]` (`spec.md` §4.6.4). Values are
    /// stored zero-based (`value - min_value`) rather than with the
    /// spec's literal `value - (minValue - 1)` bias, which underflows when
    /// `min_value` is `0`; [`Self::value`] adds `min_value` back.
    pub fn build(
        db_dir: &Path,
        k: KmerSize,
        master: &MasterIndex,
        plan: LookupPlan,
        min_value: u64,
        max_value: u64,
    ) -> Result<Self, MerylError> {
        let db_layout = DatabaseLayout::new(db_dir, master.num_files_bits);
        let db_suffix_bits = master.suffix_size;

        let n_prefix = 1u64.checked_shl(plan.w_prefix).unwrap_or(u64::MAX);
        let suffix_bits = k.bits() - plan.w_prefix;
        let suffix_mask: KmerBits = if suffix_bits >= 128 {
            KmerBits::MAX
        } else {
            ((1 as KmerBits) << suffix_bits) - 1
        };

        // Count pass: how many in-range k-mers land in each lookup prefix.
        let mut block_lengths = vec![0u64; n_prefix as usize];
        for file_id in 0..db_layout.num_files() {
            for block in read_all_blocks(&db_layout, file_id)? {
                for (&suffix, &value) in block.suffixes.iter().zip(&block.values) {
                    if value < min_value || value > max_value {
                        continue;
                    }
                    let kmer = ((block.prefix as KmerBits) << db_suffix_bits) | suffix as KmerBits;
                    let prefix = (kmer >> suffix_bits) as usize;
                    block_lengths[prefix] += 1;
                }
            }
        }

        let mut bgn = vec![0u64; n_prefix as usize];
        let mut running = 0u64;
        for (i, &l) in block_lengths.iter().enumerate() {
            bgn[i] = running;
            running += l;
        }
        let total = running;

        let mut suffixes = WordArray::new(total.max(1), suffix_bits.max(1));
        let value_bits = bit_width((max_value - min_value).saturating_add(1).max(1));
        let mut values = WordArray::new(total.max(1), value_bits.max(1));

        // Load pass: refill the backing arrays at bgn[prefix] + local offset.
        let mut cursor = bgn.clone();
        for file_id in 0..db_layout.num_files() {
            for block in read_all_blocks(&db_layout, file_id)? {
                for (&suffix, &value) in block.suffixes.iter().zip(&block.values) {
                    if value < min_value || value > max_value {
                        continue;
                    }
                    let kmer = ((block.prefix as KmerBits) << db_suffix_bits) | suffix as KmerBits;
                    let prefix = (kmer >> suffix_bits) as usize;
                    let local_suffix = (kmer & suffix_mask) as u128;
                    let pos = cursor[prefix];
                    suffixes.set(pos, local_suffix);
                    values.set(pos, u128::from(value - min_value));
                    cursor[prefix] += 1;
                }
            }
        }

        Ok(Self {
            k,
            min_value,
            max_value,
            w_prefix: plan.w_prefix,
            bgn,
            len: block_lengths,
            suffixes,
            values,
        })
    }

    /// `value(k)` (`spec.md` §4.6.4): returns the persisted value for `kmer`
    /// if it is present and in-range, else `0`.
    #[must_use]
    pub fn value(&self, kmer: KmerBits) -> u64 {
        let suffix_bits = self.suffix_bits();
        let prefix = (kmer >> suffix_bits) as usize;
        let suffix = kmer & self.suffix_mask();

        let Some(&bgn) = self.bgn.get(prefix) else {
            return 0;
        };
        let len = self.len.get(prefix).copied().unwrap_or(0);
        if len == 0 {
            return 0;
        }

        let (mut lo, mut hi) = (bgn, bgn + len);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let mid_suffix = self.suffixes.get(mid);
            match mid_suffix.cmp(&suffix) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => {
                    return self.values.get(mid) as u64 + self.min_value;
                }
            }
        }
        0
    }

    /// `contains(k) == (value(k) > 0)` (`spec.md` §4.6.4).
    #[must_use]
    pub fn contains(&self, kmer: KmerBits) -> bool {
        self.value(kmer) > 0
    }

    #[must_use]
    pub fn k(&self) -> KmerSize {
        self.k
    }

    #[must_use]
    pub fn range(&self) -> (u64, u64) {
        (self.min_value, self.max_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, BlockWriter, FileIndex, FileIndexEntry};
    use crate::histogram::KmerHistogram;
    use crate::kmer;
    use tempfile::tempdir;

    fn write_single_file_db(dir: &Path, k: KmerSize, entries: &[(u64, u64)]) -> MasterIndex {
        let layout = DatabaseLayout::new(dir, 0);
        let mut by_prefix: std::collections::BTreeMap<u64, Vec<(u64, u64)>> =
            std::collections::BTreeMap::new();
        let w_prefix = 6u32.min(k.bits() - 1);
        let suffix_bits = k.bits() - w_prefix;
        for &(kmer, value) in entries {
            let prefix = kmer >> suffix_bits;
            let suffix = kmer & ((1u64 << suffix_bits) - 1);
            by_prefix.entry(prefix).or_default().push((suffix, value));
        }

        let mut writer = BlockWriter::new();
        let mut file_entries = Vec::new();
        let mut histogram = KmerHistogram::new();
        for (&prefix, pairs) in &by_prefix {
            let mut pairs = pairs.clone();
            pairs.sort_unstable();
            let block = Block {
                prefix,
                suffixes: pairs.iter().map(|(s, _)| *s).collect(),
                values: pairs.iter().map(|(_, v)| *v).collect(),
            };
            for &v in &block.values {
                *histogram.entry(v).or_insert(0) += 1;
            }
            let pos = writer.write_block(&block);
            file_entries.push(FileIndexEntry {
                block_prefix: prefix,
                block_position_bits: pos,
                n_kmers: block.n_kmers() as u64,
            });
        }
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(layout.data_path(0), writer.into_stream().dump_to_buffer()).unwrap();
        std::fs::write(
            layout.index_path(0),
            FileIndex {
                entries: file_entries,
            }
            .write()
            .dump_to_buffer(),
        )
        .unwrap();

        MasterIndex {
            prefix_size: w_prefix,
            suffix_size: suffix_bits,
            num_files_bits: 0,
            num_blocks_bits: 0,
            flags: 0,
            histogram,
        }
    }

    #[test]
    fn exact_lookup_finds_in_range_and_rejects_out_of_range() {
        // S6-style scenario, small N.
        let k = KmerSize::new(4).unwrap();
        let dir = tempdir().unwrap();

        let a = kmer::canonical(kmer::pack(b"ACGT").unwrap(), k) as u64;
        let b = kmer::canonical(kmer::pack(b"TTTT").unwrap(), k) as u64;
        let c = kmer::canonical(kmer::pack(b"GGGG").unwrap(), k) as u64;

        let master = write_single_file_db(dir.path(), k, &[(a, 5), (b, 1), (c, 25)]);

        let plan = configure(k, &master, 2, 20, 1024 * 1024).unwrap();
        let index =
            LookupIndex::build(dir.path(), k, &master, plan, 2, 20).unwrap();

        assert_eq!(index.value(a as KmerBits), 5);
        assert!(index.contains(a as KmerBits));
        assert_eq!(index.value(b as KmerBits), 0); // below minValue
        assert_eq!(index.value(c as KmerBits), 0); // above maxValue

        let not_present = kmer::canonical(kmer::pack(b"ACGA").unwrap(), k) as u64;
        assert_eq!(index.value(not_present as KmerBits), 0);
    }

    #[test]
    fn min_value_zero_does_not_underflow() {
        let k = KmerSize::new(4).unwrap();
        let dir = tempdir().unwrap();

        let a = kmer::canonical(kmer::pack(b"ACGT").unwrap(), k) as u64;
        let master = write_single_file_db(dir.path(), k, &[(a, 5)]);

        let plan = configure(k, &master, 0, 20, 1024 * 1024).unwrap();
        let index = LookupIndex::build(dir.path(), k, &master, plan, 0, 20).unwrap();

        assert_eq!(index.value(a as KmerBits), 5);
    }

    #[test]
    fn infeasible_budget_is_an_error() {
        let k = KmerSize::new(21).unwrap();
        let master = MasterIndex {
            prefix_size: 10,
            suffix_size: 32,
            num_files_bits: 0,
            num_blocks_bits: 0,
            flags: 0,
            histogram: {
                let mut h = KmerHistogram::new();
                h.insert(5, 10_000_000);
                h
            },
        };
        assert!(configure(k, &master, 1, 10, 1).is_err());
    }
}
