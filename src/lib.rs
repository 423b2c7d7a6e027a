//! # Meryl
//!
//! Meryl is a k-mer counting and set-algebra engine for genomic sequence
//! data. It ingests DNA sequence files (FASTA/FASTQ), extracts k-mers,
//! counts their occurrences under a user-specified memory ceiling, and
//! persists the result as a compressed, prefix-partitioned on-disk database
//! that downstream set-algebra operators can stream without fully
//! decompressing.
//!
//! The crate is organized leaves-first, mirroring the component order of
//! the design this was built from:
//!
//! - [`kmer`] — base codec, reverse-complement, canonicalization (C1).
//! - [`bits`] — `BitArray`/`WordArray`/`StuffedBits` bit-packed stores (C2).
//! - [`sequence`] — FASTA/FASTQ ingestion with k-mer-breaker insertion (C3).
//! - [`iterator`] — the sliding-window k-mer emitter (C4).
//! - [`count`] — Simple and Complex counting modes (C5).
//! - [`database`], [`block`], [`master_index`] — on-disk layout, block
//!   writer/reader, and the master index (C6.1-C6.3).
//! - [`lookup`] — the in-memory exact-lookup index (C6.4).
//! - [`engine`] — ties C3-C6 together into one counting run.
//! - [`label`] — the optional per-k-mer bitfield and its union/intersect
//!   combine rule.
//! - [`seq_index`] — the optional `.dnaSeqIndex` companion file.
//! - [`histogram`], [`progress`] — reporting and progress-tracking helpers
//!   shared by the engine and the CLI.
//! - [`format`], [`input`] — input-source resolution shared across readers.
//! - [`cli`] — the `clap`-derived command surface for the `meryl` binary.

pub mod bits;
pub mod block;
pub mod cli;
pub mod count;
pub mod database;
pub mod engine;
pub mod error;
pub mod format;
pub mod histogram;
pub mod input;
pub mod iterator;
pub mod kmer;
pub mod label;
pub mod lookup;
pub mod master_index;
#[cfg(feature = "mmap")]
pub mod mmap;
pub mod progress;
pub mod seq_index;
pub mod sequence;
