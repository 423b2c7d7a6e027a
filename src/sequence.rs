//! Sequence source (C3): turns FASTA/FASTQ records into contiguous base
//! buffers with a k-mer-breaker sentinel inserted at every sequence boundary
//! (`spec.md` §4.3).
//!
//! Grounded in the inherited `reader.rs`/`format.rs` input-handling idiom:
//! `bio::io::{fasta, fastq}` readers, dispatched on [`crate::format::SequenceFormat`].

use std::io::BufRead;

use bio::io::{fasta, fastq};

use crate::error::MerylError;
use crate::format::SequenceFormat;

/// A non-ACGT byte used to break the k-mer window between sequences. `N` is
/// itself a breaker, so any such byte works; `N` is used for readability in
/// diagnostics.
pub const BREAKER: u8 = b'N';

/// One buffer handed from the sequence source to the counting engine: a
/// run of bases (upper- or lower-case ACGT, or breakers), whether it ends a
/// sequence, and whether it is the last buffer of the whole input.
#[derive(Debug, Clone, Default)]
pub struct BaseBuffer {
    pub bases: Vec<u8>,
    pub end_of_sequence: bool,
}

/// Produces successive [`BaseBuffer`]s from one input source, one sequence
/// at a time, each preceded by a breaker (except the very first).
///
/// Mirrors `loadBases(buf, maxLen, &outLen, &endOfSeq)` from §4.3: the
/// engine is responsible for carrying the last `k-1` bases of one buffer
/// into the next so that k-mers spanning a chunk boundary are still
/// emitted exactly once; this source only guarantees the per-sequence
/// breaker insertion and malformed-record resync.
pub struct SequenceSource {
    records: Box<dyn Iterator<Item = Result<Vec<u8>, MerylError>>>,
    pending_breaker: bool,
    exhausted: bool,
}

impl SequenceSource {
    /// Builds a source over `reader`, dispatching on `format` (already
    /// resolved via [`SequenceFormat::resolve`] — `Auto` is treated as FASTA).
    pub fn new<R: BufRead + 'static>(reader: R, format: SequenceFormat) -> Self {
        let records: Box<dyn Iterator<Item = Result<Vec<u8>, MerylError>>> = if format.is_fastq() {
            Box::new(FastqRecords::new(reader))
        } else {
            Box::new(FastaRecords::new(reader))
        };
        Self {
            records,
            pending_breaker: false,
            exhausted: false,
        }
    }

    /// Yields the next base buffer, or `None` at true end-of-input
    /// (`spec.md` §4.3's `loadBases` returning false).
    pub fn next_buffer(&mut self) -> Option<Result<BaseBuffer, MerylError>> {
        if self.exhausted {
            return None;
        }
        match self.records.next() {
            Some(Ok(mut bases)) => {
                if self.pending_breaker {
                    let mut buf = Vec::with_capacity(bases.len() + 1);
                    buf.push(BREAKER);
                    buf.append(&mut bases);
                    bases = buf;
                }
                self.pending_breaker = true;
                Some(Ok(BaseBuffer {
                    bases,
                    end_of_sequence: true,
                }))
            }
            Some(Err(e)) => Some(Err(e)),
            None => {
                self.exhausted = true;
                None
            }
        }
    }
}

struct FastaRecords<R> {
    inner: fasta::Records<R>,
}

impl<R: BufRead> FastaRecords<R> {
    fn new(reader: R) -> Self {
        Self {
            inner: fasta::Reader::new(reader).records(),
        }
    }
}

impl<R: BufRead> Iterator for FastaRecords<R> {
    type Item = Result<Vec<u8>, MerylError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok(record) => Some(Ok(record.seq().to_vec())),
            Err(e) => Some(Err(MerylError::SequenceParse {
                details: e.to_string(),
            })),
        }
    }
}

struct FastqRecords<R> {
    inner: fastq::Records<R>,
}

impl<R: BufRead> FastqRecords<R> {
    fn new(reader: R) -> Self {
        Self {
            inner: fastq::Reader::new(reader).records(),
        }
    }
}

impl<R: BufRead> Iterator for FastqRecords<R> {
    type Item = Result<Vec<u8>, MerylError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok(record) => Some(Ok(record.seq().to_vec())),
            Err(e) => Some(Err(MerylError::SequenceParse {
                details: e.to_string(),
            })),
        }
    }
}

/// Splits one long base buffer into chunks of at most `max_len` bytes, each
/// chunk after the first prefixed with the trailing `carry` bytes of the
/// previous chunk, so that k-mers spanning a chunk boundary are still
/// produced exactly once by [`crate::iterator::KmerIterator`] (`spec.md`
/// §4.3's "first k-1 bases of the next buffer must duplicate the last k-1
/// bases of the previous buffer").
#[must_use]
pub fn chunk_with_carry(bases: &[u8], max_len: usize, carry: usize) -> Vec<Vec<u8>> {
    if bases.len() <= max_len {
        return vec![bases.to_vec()];
    }
    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < bases.len() {
        let end = (start + max_len).min(bases.len());
        let carry_start = start.saturating_sub(carry);
        chunks.push(bases[carry_start..end].to_vec());
        if end == bases.len() {
            break;
        }
        start = end;
    }
    chunks
}
