//! Error types for the counting and database engine.
//!
//! This module provides exhaustive, strongly-typed errors for all operations
//! in the library, enabling precise error handling and informative messages.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur building or reading a k-mer database.
#[derive(Debug, Error)]
pub enum MerylError {
    /// K-mer length is outside the valid range (1-64).
    #[error("invalid k-mer size {k}: must be between {min} and {max}")]
    InvalidKmerSize { k: u32, min: u8, max: u8 },

    /// Two handles constructed with disagreeing k were used together.
    #[error("k-mer size mismatch: handle expects k={expected}, got k={found}")]
    KSizeMismatch { expected: u8, found: u8 },

    /// Encountered an invalid DNA base while indexing (not a recoverable breaker).
    #[error("invalid base '{base}' at position {position}")]
    InvalidBase { base: u8, position: usize },

    /// Failed to read a sequence file.
    #[error("failed to read sequence file '{path}': {source}")]
    SequenceRead {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to parse a sequence record.
    #[error("failed to parse sequence record: {details}")]
    SequenceParse { details: String },

    /// The memory ceiling cannot accommodate any valid `wPrefix` (§4.5.5).
    #[error(
        "no wPrefix in [10, {max_w_prefix}] fits memory budget {budget} bytes (smallest footprint {smallest} bytes)"
    )]
    MemoryBudgetInfeasible {
        budget: u64,
        smallest: u64,
        max_w_prefix: u32,
    },

    /// Allocator failure during CountArray segment growth; fatal per §4.5.5.
    #[error("failed to allocate counting segment: {details}")]
    SegmentAllocation { details: String },

    /// Generic I/O failure during spill or merge (§4.5.5): fatal.
    #[error("I/O failure during {phase}: {source}")]
    SpillOrMerge {
        phase: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Database magic mismatch or truncated block (§4.6.2, §6).
    #[error("bad magic in '{path}' at bit position {bit_position}: expected {expected}, found {found:?}")]
    BadMagic {
        path: PathBuf,
        bit_position: u64,
        expected: &'static str,
        found: [u8; 16],
    },

    /// Truncated or short block/stream read.
    #[error("truncated database stream '{path}': expected at least {expected} bytes, found {found}")]
    Truncated {
        path: PathBuf,
        expected: u64,
        found: u64,
    },

    /// Unknown or unsupported master-index version.
    #[error("unsupported master index version '{version}' in '{path}'")]
    UnsupportedVersion { path: PathBuf, version: String },

    /// Exact-lookup builder could not fit the index in the memory budget (§4.6.4, §7.5).
    #[error("lookup index requires {required} bytes, budget allows {allowed} bytes")]
    LookupBudgetExceeded { required: u64, allowed: u64 },

    /// Failed to read a database component file.
    #[error("failed to read '{path}': {source}")]
    DatabaseRead {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to write a database component file.
    #[error("failed to write '{path}': {source}")]
    DatabaseWrite {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// I/O error with no more specific variant.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MerylError {
    /// True for the fatal error categories of §7 (1, 3, 4, 5); false for the
    /// recoverable input-parsing category (2), which callers log and continue past.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, MerylError::SequenceParse { .. })
    }
}

/// Error for an invalid k-mer size, usable before an `EngineConfig` exists.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("k-mer size {k} is out of range: must be between {min} and {max}")]
pub struct KmerSizeError {
    pub k: u32,
    pub min: u8,
    pub max: u8,
}

impl From<KmerSizeError> for MerylError {
    fn from(err: KmerSizeError) -> Self {
        MerylError::InvalidKmerSize {
            k: err.k,
            min: err.min,
            max: err.max,
        }
    }
}
