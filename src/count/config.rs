//! Counting engine configuration (`spec.md` §4.5.1): chooses `wPrefix` and
//! the batch count from a memory ceiling, thread count, and an expected
//! (or estimated) k-mer count.

use crate::error::MerylError;
use crate::kmer::KmerSize;

/// Bytes of a `CountArray` append-only segment (`spec.md` §4.2.2's "default
/// 32 MiB per segment" sized down here to the §3 "page-sized (~64 KiB)"
/// figure actually used for CountArray growth).
pub const SEG_BYTES: u64 = 64 * 1024;

/// Per-prefix `CountArray` struct overhead, a rough fixed-size estimate
/// (pointer + length + capacity bookkeeping).
const COUNT_ARRAY_STRUCT_BYTES: u64 = 48;
/// Size of one segment pointer in the per-prefix segment list.
const POINTER_BYTES: u64 = 8;

/// Multipliers applied to on-disk size to estimate k-mer count when the
/// user does not supply `E` (`spec.md` §4.5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    Xz,
}

impl Compression {
    #[must_use]
    pub fn multiplier(self) -> f64 {
        match self {
            Self::None => 1.0,
            Self::Gzip => 3.0,
            Self::Bzip2 => 3.5,
            Self::Xz => 4.0,
        }
    }
}

/// User-facing configuration for one counting run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub k: KmerSize,
    /// Memory ceiling in bytes (`M`).
    pub memory_bytes: u64,
    /// Thread count (`T`); at least 1 worker is always used.
    pub threads: u32,
    /// User-supplied expected k-mer count (`E`), if known.
    pub expected_kmers: Option<u64>,
    /// A fixed trailing base sequence: only k-mers ending in this suffix
    /// are counted. Forces Simple mode and disables reverse-complement
    /// canonicalization for the suffix portion (`spec.md` §9).
    pub count_suffix: Option<Vec<u8>>,
}

impl EngineConfig {
    #[must_use]
    pub fn worker_threads(&self) -> u32 {
        (self.threads.saturating_sub(2)).max(1)
    }

    #[must_use]
    pub fn forces_simple_mode(&self) -> bool {
        self.count_suffix.is_some()
    }
}

/// The chosen partitioning for Complex mode: `wPrefix` and how many
/// independent batches the input will be split into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixPlan {
    pub w_prefix: u32,
    pub n_batches: u32,
}

impl PrefixPlan {
    /// `2^wPrefix`, saturating to `u64::MAX` once `wPrefix >= 64` (reachable
    /// for `k > 32`, since `wPrefix` ranges up to `2k-1`). A saturated count
    /// always fails any real memory budget, which is the correct outcome —
    /// such a `wPrefix` would never be selected anyway.
    #[must_use]
    pub fn n_prefix(self) -> u64 {
        1u64.checked_shl(self.w_prefix).unwrap_or(u64::MAX)
    }

    #[must_use]
    pub fn suffix_bits(self, k: KmerSize) -> u32 {
        k.bits() - self.w_prefix
    }
}

/// Saturating `2^exp` as `u64`, used for `wPrefix` up to 127 (`k` up to 64).
fn saturating_pow2(exp: u32) -> u64 {
    1u64.checked_shl(exp).unwrap_or(u64::MAX)
}

fn footprint_for(w_prefix: u32, k: KmerSize, expected_kmers: u64) -> u64 {
    let n_prefix = saturating_pow2(w_prefix);
    let kmers_per_prefix = expected_kmers.div_ceil(n_prefix.max(1)).max(1);
    let suffix_bits = u64::from(k.bits() - w_prefix);
    let kmers_per_segment = ((8 * SEG_BYTES) / suffix_bits.max(1)).max(1);
    let segments_per_prefix = kmers_per_prefix.div_ceil(kmers_per_segment).max(1);

    n_prefix
        .saturating_mul(COUNT_ARRAY_STRUCT_BYTES)
        .saturating_add(
            n_prefix
                .saturating_mul(segments_per_prefix)
                .saturating_mul(POINTER_BYTES),
        )
        .saturating_add(
            n_prefix
                .saturating_mul(segments_per_prefix)
                .saturating_mul(SEG_BYTES),
        )
}

/// Runs the §4.5.1 configurator: enumerates `wPrefix` in `[7, 2k-1]`
/// (clamped to `>= 10`, per the "pick the smallest wPrefix >= 10" rule),
/// computing `memory(wPrefix)` for each, and picks the smallest one whose
/// footprint fits `M`, preferring a larger `wPrefix` only when it reduces
/// total memory by more than a 1.06x factor per bit.
///
/// Also grows `nBatches` until a single batch's share of `E` fits `M`.
pub fn configure(cfg: &EngineConfig, expected_kmers: u64) -> Result<PrefixPlan, MerylError> {
    let k_bits = cfg.k.bits();
    let max_w_prefix = (2 * cfg.k.get() as u32).saturating_sub(1);
    // The block/CountArray suffix representation is a u64 (`spec.md` §4.6.1's
    // "a high-order word is carried separately when suffixBits > 64" is not
    // implemented), so wPrefix must never leave more than 64 suffix bits.
    // This floor is always <= max_w_prefix (2k-1 >= 2k-64 for any k >= 1).
    let suffix_floor = k_bits.saturating_sub(64);
    let min_w_prefix = 10u32
        .min(max_w_prefix)
        .max(7.min(k_bits.saturating_sub(1)))
        .max(suffix_floor);

    let mut best: Option<(u32, u64)> = None;
    for w_prefix in min_w_prefix..=max_w_prefix.max(min_w_prefix) {
        if w_prefix >= k_bits {
            break;
        }
        let mem = footprint_for(w_prefix, cfg.k, expected_kmers);
        best = Some(match best {
            None => (w_prefix, mem),
            Some((prev_w, prev_mem)) => {
                // Prefer the larger wPrefix only if it shrinks memory by
                // more than 1.06x per additional bit of prefix width.
                let bits_gained = (w_prefix - prev_w).max(1);
                let threshold = prev_mem as f64 / 1.06f64.powi(bits_gained as i32);
                if (mem as f64) < threshold {
                    (w_prefix, mem)
                } else {
                    (prev_w, prev_mem)
                }
            }
        });
    }

    let (w_prefix, smallest) = match best {
        Some((w, m)) if m <= cfg.memory_bytes => (w, m),
        _ => {
            return Err(MerylError::MemoryBudgetInfeasible {
                budget: cfg.memory_bytes,
                smallest: best.map_or(0, |(_, m)| m),
                max_w_prefix,
            })
        }
    };
    let _ = smallest;

    let mut n_batches = 1u32;
    loop {
        let per_batch = expected_kmers.div_ceil(u64::from(n_batches));
        let mem = footprint_for(w_prefix, cfg.k, per_batch);
        if mem <= cfg.memory_bytes || n_batches >= 1_000_000 {
            break;
        }
        n_batches += 1;
    }

    Ok(PrefixPlan {
        w_prefix,
        n_batches,
    })
}

/// Estimates `E` from input byte sizes and their compression, when the user
/// does not supply an expected k-mer count (`spec.md` §4.5.1).
#[must_use]
pub fn estimate_expected_kmers(input_bytes: u64, compression: Compression) -> u64 {
    (input_bytes as f64 * compression.multiplier()) as u64
}
