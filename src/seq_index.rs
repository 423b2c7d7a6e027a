//! Sequence-index companion file (`spec.md` §6): an optional
//! `<input>.dnaSeqIndex` sidecar recording each sequence's byte offset and
//! length within a FASTA file, so a second pass can seek directly to a
//! sequence instead of re-scanning. Staleness (source size/mtime changed
//! since the index was written) is detected and the index rebuilt
//! (`spec.md` §7 category 6: "Missing or stale sequence index — silently
//! rebuilt").

use std::fs;
use std::path::{Path, PathBuf};

use crate::bits::StuffedBits;
use crate::database::SEQ_INDEX_MAGIC;
use crate::error::MerylError;
use crate::format::SequenceFormat;

/// One sequence's location within its source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceEntry {
    pub file_offset: u64,
    pub sequence_length: u64,
}

/// The `<input>.dnaSeqIndex` sidecar: source file size/mtime plus a flat
/// array of [`SequenceEntry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceIndex {
    pub source_size: u64,
    pub source_mtime: u64,
    pub entries: Vec<SequenceEntry>,
}

impl SequenceIndex {
    #[must_use]
    pub fn write(&self) -> StuffedBits {
        let mut s = StuffedBits::new();
        s.set_binary(64, SEQ_INDEX_MAGIC);
        s.set_binary(64, self.source_size);
        s.set_binary(64, self.source_mtime);
        s.set_binary(64, self.entries.len() as u64);
        for e in &self.entries {
            s.set_binary(64, e.file_offset);
            s.set_binary(64, e.sequence_length);
        }
        s
    }

    pub fn read(mut s: StuffedBits) -> Result<Self, MerylError> {
        s.set_position(0);
        let magic = s.get_binary(64);
        if magic != SEQ_INDEX_MAGIC {
            return Err(MerylError::BadMagic {
                path: PathBuf::new(),
                bit_position: 0,
                expected: "dnaSeq01",
                found: magic_bytes(magic),
            });
        }
        let source_size = s.get_binary(64);
        let source_mtime = s.get_binary(64);
        let n = s.get_binary(64);
        let mut entries = Vec::with_capacity(n as usize);
        for _ in 0..n {
            entries.push(SequenceEntry {
                file_offset: s.get_binary(64),
                sequence_length: s.get_binary(64),
            });
        }
        Ok(Self {
            source_size,
            source_mtime,
            entries,
        })
    }

    /// True when `source_path`'s current size/mtime disagree with what this
    /// index recorded — the index is stale and must be rebuilt.
    #[must_use]
    pub fn is_stale(&self, source_path: &Path) -> bool {
        match current_size_and_mtime(source_path) {
            Some((size, mtime)) => size != self.source_size || mtime != self.source_mtime,
            None => true,
        }
    }
}

fn current_size_and_mtime(path: &Path) -> Option<(u64, u64)> {
    let meta = fs::metadata(path).ok()?;
    let mtime = meta
        .modified()
        .ok()?
        .duration_since(std::time::UNIX_EPOCH)
        .ok()?
        .as_secs();
    Some((meta.len(), mtime))
}

fn magic_bytes(magic: u64) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[0..8].copy_from_slice(&magic.to_be_bytes());
    out
}

/// Path convention for the sidecar: `<input>.dnaSeqIndex`.
#[must_use]
pub fn sidecar_path(source_path: &Path) -> PathBuf {
    let mut name = source_path.as_os_str().to_owned();
    name.push(".dnaSeqIndex");
    PathBuf::from(name)
}

/// Loads the sidecar for `source_path` if present and fresh, else `None`
/// (caller should rebuild it by re-scanning the source).
#[must_use]
pub fn load_if_fresh(source_path: &Path) -> Option<SequenceIndex> {
    let sidecar = sidecar_path(source_path);
    let bytes = fs::read(sidecar).ok()?;
    let index = SequenceIndex::read(StuffedBits::load_from_buffer(&bytes)).ok()?;
    if index.is_stale(source_path) {
        None
    } else {
        Some(index)
    }
}

/// Writes the sidecar for `source_path` to `<source_path>.dnaSeqIndex`.
pub fn save(source_path: &Path, index: &SequenceIndex) -> Result<(), MerylError> {
    let sidecar = sidecar_path(source_path);
    fs::write(&sidecar, index.write().dump_to_buffer()).map_err(|source| MerylError::DatabaseWrite {
        source,
        path: sidecar,
    })
}

/// Builds a fresh [`SequenceIndex`] for `source_path` from scratch by
/// recording every returned `(offset, length)` pair as the sequences are
/// scanned, e.g. by [`crate::sequence::SequenceSource`].
#[must_use]
pub fn build(source_path: &Path, entries: Vec<SequenceEntry>) -> Option<SequenceIndex> {
    let (source_size, source_mtime) = current_size_and_mtime(source_path)?;
    Some(SequenceIndex {
        source_size,
        source_mtime,
        entries,
    })
}

/// Scans `source_path` directly (independent of
/// [`crate::sequence::SequenceSource`]'s `bio`-backed record iterator) to
/// recover each sequence's true byte offset and length within the file, for
/// building a fresh [`SequenceIndex`].
pub fn scan(source_path: &Path, format: SequenceFormat) -> Result<Vec<SequenceEntry>, MerylError> {
    let bytes = fs::read(source_path).map_err(|source| MerylError::SequenceRead {
        source,
        path: source_path.to_path_buf(),
    })?;
    Ok(if format.is_fastq() {
        scan_fastq(&bytes)
    } else {
        scan_fasta(&bytes)
    })
}

fn trimmed_len(line: &[u8]) -> u64 {
    line.iter()
        .rev()
        .skip_while(|&&b| b == b'\n' || b == b'\r')
        .count() as u64
}

fn scan_fasta(bytes: &[u8]) -> Vec<SequenceEntry> {
    let mut entries = Vec::new();
    let mut offset = 0u64;
    let mut current: Option<SequenceEntry> = None;
    for line in bytes.split_inclusive(|&b| b == b'\n') {
        if line.first() == Some(&b'>') {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(SequenceEntry {
                file_offset: offset,
                sequence_length: 0,
            });
        } else if let Some(entry) = current.as_mut() {
            entry.sequence_length += trimmed_len(line);
        }
        offset += line.len() as u64;
    }
    if let Some(entry) = current {
        entries.push(entry);
    }
    entries
}

fn scan_fastq(bytes: &[u8]) -> Vec<SequenceEntry> {
    let mut entries = Vec::new();
    let mut offset = 0u64;
    let mut record_offset = 0u64;
    let mut sequence_length = 0u64;
    for (line_no, line) in bytes.split_inclusive(|&b| b == b'\n').enumerate() {
        match line_no % 4 {
            0 => record_offset = offset,
            1 => sequence_length = trimmed_len(line),
            3 => entries.push(SequenceEntry {
                file_offset: record_offset,
                sequence_length,
            }),
            _ => {}
        }
        offset += line.len() as u64;
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn sample(source_size: u64, source_mtime: u64) -> SequenceIndex {
        SequenceIndex {
            source_size,
            source_mtime,
            entries: vec![
                SequenceEntry {
                    file_offset: 0,
                    sequence_length: 120,
                },
                SequenceEntry {
                    file_offset: 130,
                    sequence_length: 80,
                },
            ],
        }
    }

    #[test]
    fn round_trips_through_stuffed_bits() {
        let original = sample(1000, 1_700_000_000);
        let stream = original.write();
        let decoded = SequenceIndex::read(stream).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut s = StuffedBits::new();
        s.set_binary(64, 0xdead_beef);
        assert!(SequenceIndex::read(s).is_err());
    }

    #[test]
    fn stale_when_size_changed_on_disk() {
        let mut temp = NamedTempFile::new().unwrap();
        writeln!(temp, ">s\nACGT").unwrap();
        temp.flush().unwrap();
        let meta = std::fs::metadata(temp.path()).unwrap();

        let fresh = SequenceIndex {
            source_size: meta.len(),
            source_mtime: meta
                .modified()
                .unwrap()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_secs(),
            entries: vec![],
        };
        assert!(!fresh.is_stale(temp.path()));

        writeln!(temp, ">s2\nACGTACGT").unwrap();
        temp.flush().unwrap();
        assert!(fresh.is_stale(temp.path()));
    }

    #[test]
    fn sidecar_path_appends_suffix() {
        let p = sidecar_path(Path::new("/tmp/genome.fa"));
        assert_eq!(p, Path::new("/tmp/genome.fa.dnaSeqIndex"));
    }

    #[test]
    fn scan_fasta_records_offsets_and_lengths() {
        let fasta = b">seq1\nACGT\nACGT\n>seq2\nTTTT\n";
        let entries = scan_fasta(fasta);
        assert_eq!(
            entries,
            vec![
                SequenceEntry {
                    file_offset: 0,
                    sequence_length: 8,
                },
                SequenceEntry {
                    file_offset: 21,
                    sequence_length: 4,
                },
            ]
        );
    }

    #[test]
    fn scan_fastq_records_one_entry_per_record() {
        let fastq = b"@seq1\nACGT\n+\nIIII\n@seq2\nTTTTTT\n+\nIIIIII\n";
        let entries = scan_fastq(fastq);
        assert_eq!(
            entries,
            vec![
                SequenceEntry {
                    file_offset: 0,
                    sequence_length: 4,
                },
                SequenceEntry {
                    file_offset: 16,
                    sequence_length: 6,
                },
            ]
        );
    }

    #[test]
    fn scan_dispatches_on_format() {
        let mut temp = NamedTempFile::new().unwrap();
        writeln!(temp, ">s").unwrap();
        writeln!(temp, "ACGTACGT").unwrap();
        temp.flush().unwrap();

        let entries = scan(temp.path(), SequenceFormat::Fasta).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sequence_length, 8);
    }
}
