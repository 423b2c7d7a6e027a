//! On-disk database layout and the magic numbers every component must
//! produce and accept bit-exactly (`spec.md` §6).

use std::path::{Path, PathBuf};

/// First half of the block-stream magic, ASCII `"merylDat"`.
pub const BLOCK_MAGIC_1: u64 = 0x7461_446c_7972_656d;
/// Second half of the block-stream magic, ASCII `"aFile00\n"`.
/// Concatenated, `BLOCK_MAGIC_1 || BLOCK_MAGIC_2` spells `merylDataFile00\n`.
pub const BLOCK_MAGIC_2: u64 = 0x0a30_3065_6c69_4661;

/// First 8 bytes shared by all master-index magics, ASCII `"merylInd"`.
const MASTER_MAGIC_HEAD: u64 = 0x6d65_7279_6c49_6e64;
/// Master-index magic, v01: ASCII `"merylIndex__v.01"`, split into two
/// 64-bit big-endian halves for sequential `setBinary(64, _)` writes.
pub const MASTER_MAGIC_V01: (u64, u64) = (MASTER_MAGIC_HEAD, 0x6578_5f5f_762e_3031);
/// Master-index magic, v02: ASCII `"merylIndex__v.02"`.
pub const MASTER_MAGIC_V02: (u64, u64) = (MASTER_MAGIC_HEAD, 0x6578_5f5f_762e_3032);
/// Master-index magic, v03: ASCII `"merylIndex__v.03"`.
pub const MASTER_MAGIC_V03: (u64, u64) = (MASTER_MAGIC_HEAD, 0x6578_5f5f_762e_3033);

/// Sequence-index companion-file magic, ASCII `"dnaSeq01"`.
pub const SEQ_INDEX_MAGIC: u64 = 0x646e_6153_6571_3031;

/// Master index on-disk version, used to dispatch the reader (`spec.md` §4.6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterIndexVersion {
    V01,
    V02,
    V03,
}

impl MasterIndexVersion {
    #[must_use]
    pub fn magic(self) -> (u64, u64) {
        match self {
            Self::V01 => MASTER_MAGIC_V01,
            Self::V02 => MASTER_MAGIC_V02,
            Self::V03 => MASTER_MAGIC_V03,
        }
    }

    #[must_use]
    pub fn from_magic(magic: (u64, u64)) -> Option<Self> {
        if magic == MASTER_MAGIC_V01 {
            Some(Self::V01)
        } else if magic == MASTER_MAGIC_V02 {
            Some(Self::V02)
        } else if magic == MASTER_MAGIC_V03 {
            Some(Self::V03)
        } else {
            None
        }
    }

    /// Older versions lack the `flags` field introduced in v02.
    #[must_use]
    pub fn has_flags(self) -> bool {
        !matches!(self, Self::V01)
    }
}

/// Layout helper for a `<dbname>.meryl/` directory (`spec.md` §6).
#[derive(Debug, Clone)]
pub struct DatabaseLayout {
    root: PathBuf,
    num_files_bits: u32,
}

impl DatabaseLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, num_files_bits: u32) -> Self {
        Self {
            root: root.into(),
            num_files_bits,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn num_files(&self) -> u32 {
        1u32 << self.num_files_bits
    }

    #[must_use]
    pub fn num_files_bits(&self) -> u32 {
        self.num_files_bits
    }

    #[must_use]
    pub fn master_index_path(&self) -> PathBuf {
        self.root.join("merylIndex")
    }

    #[must_use]
    pub fn data_path(&self, file_id: u32) -> PathBuf {
        self.root.join(format!("0x{file_id:06x}.merylData"))
    }

    #[must_use]
    pub fn index_path(&self, file_id: u32) -> PathBuf {
        self.root.join(format!("0x{file_id:06x}.merylIndex"))
    }

    /// Assigns a k-mer prefix to the output file that owns it
    /// (`spec.md` §3: `file = p >> (wPrefix - numFilesBits)`).
    #[must_use]
    pub fn file_for_prefix(&self, prefix: u64, w_prefix: u32) -> u32 {
        if self.num_files_bits >= w_prefix {
            0
        } else {
            (prefix >> (w_prefix - self.num_files_bits)) as u32
        }
    }
}
