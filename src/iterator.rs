//! K-mer iterator (C4): turns a stream of bases into successive forward and
//! reverse-complement k-mers, resetting on breakers (`spec.md` §4.4).

use crate::kmer::{self, KmerBits, KmerSize};

/// Stateful sliding-window k-mer emitter over one base buffer at a time.
///
/// `addSequence` (here [`Self::add_sequence`]) loads a new buffer; `nextMer`
/// (here [`Self::next_mer`]) advances exactly one base and reports whether a
/// full, breaker-free window of `k` bases is now available. `reset` drops
/// the current window without discarding the buffer, matching the
/// end-of-sequence boundary behavior required by §4.4.
pub struct KmerIterator<'a> {
    k: KmerSize,
    mask: KmerBits,
    buf: &'a [u8],
    pos: usize,
    valid_run: u8,
    window: KmerBits,
    fmer: KmerBits,
    rmer: KmerBits,
}

impl<'a> KmerIterator<'a> {
    #[must_use]
    pub fn new(k: KmerSize) -> Self {
        Self {
            k,
            mask: k.mask(),
            buf: &[],
            pos: 0,
            valid_run: 0,
            window: 0,
            fmer: 0,
            rmer: 0,
        }
    }

    /// Resets the iterator onto a new buffer of bases. The window from any
    /// previous buffer is dropped — callers crossing a chunk boundary within
    /// one sequence must supply the trailing `k-1` bases of the previous
    /// buffer at the head of `buf` (see [`crate::sequence::chunk_with_carry`]).
    pub fn add_sequence(&mut self, buf: &'a [u8]) {
        self.buf = buf;
        self.pos = 0;
        self.valid_run = 0;
        self.window = 0;
    }

    /// Invalidates the current window without advancing the buffer cursor;
    /// used at a k-mer-breaker or an explicit end-of-sequence.
    pub fn reset(&mut self) {
        self.valid_run = 0;
        self.window = 0;
    }

    /// Advances one base. Returns `true` if the window now holds `k`
    /// consecutive valid bases, in which case [`Self::fmer`]/[`Self::rmer`]
    /// and [`Self::position`] describe the newly completed k-mer.
    pub fn next_mer(&mut self) -> bool {
        if self.pos >= self.buf.len() {
            return false;
        }
        let base = self.buf[self.pos];
        self.pos += 1;

        match kmer::base_to_code(base) {
            Some(code) => {
                self.window = ((self.window << 2) | KmerBits::from(code)) & self.mask;
                if u32::from(self.valid_run) < self.k.bits() / 2 {
                    self.valid_run += 1;
                }
                if u32::from(self.valid_run) >= self.k.bits() / 2 {
                    self.fmer = self.window;
                    self.rmer = kmer::reverse_complement(self.window, self.k);
                    true
                } else {
                    false
                }
            }
            None => {
                self.reset();
                false
            }
        }
    }

    /// The forward k-mer most recently completed.
    #[must_use]
    pub fn fmer(&self) -> KmerBits {
        self.fmer
    }

    /// The reverse-complement of the forward k-mer most recently completed.
    #[must_use]
    pub fn rmer(&self) -> KmerBits {
        self.rmer
    }

    /// The canonical (numerically smaller) form of the current k-mer.
    #[must_use]
    pub fn canonical_mer(&self) -> KmerBits {
        self.fmer.min(self.rmer)
    }

    /// 0-based index, in the current buffer, of the first base of the
    /// k-mer most recently completed.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos - self.k.get() as usize
    }
}
