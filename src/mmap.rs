//! Memory-mapped file support for efficient I/O.
//!
//! This module provides memory-mapped file reading for large FASTA files,
//! which can be more efficient than regular I/O for certain access patterns.
//!
//! # Example
//!
//! ```rust,no_run
//! use meryl::mmap::MmapFasta;
//!
//! let mmap = MmapFasta::open("genome.fa")?;
//! let data = mmap.as_bytes();
//! // Process the memory-mapped data...
//! # Ok::<(), std::io::Error>(())
//! ```
//!
//! # Safety
//!
//! Memory mapping relies on the underlying file not being modified while
//! the mapping is active. Modifying a mapped file leads to undefined behavior.

use memmap2::Mmap;
use std::{fs::File, io, path::Path};

/// A memory-mapped FASTA file.
///
/// Provides zero-copy access to file contents through memory mapping.
/// The file is mapped read-only and remains mapped for the lifetime of this struct.
pub struct MmapFasta {
    mmap: Mmap,
}

impl MmapFasta {
    /// Open and memory-map a FASTA file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the FASTA file to map
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or mapped.
    ///
    /// # Safety
    ///
    /// The underlying file must not be modified while this mapping exists.
    /// Modifying a mapped file leads to undefined behavior.
    #[allow(unsafe_code)]
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        // SAFETY: We rely on the file not being modified while mapped.
        // This is documented behavior that callers must ensure.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { mmap })
    }

    /// Get a slice of the mapped file contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }

    /// Get the length of the mapped file in bytes.
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Check if the mapped file is empty.
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

impl AsRef<[u8]> for MmapFasta {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}
