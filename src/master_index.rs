//! Master index (C6, `spec.md` §4.6.3): the `merylIndex` file at a
//! database's root — header fields plus the value histogram.

use crate::bits::StuffedBits;
use crate::database::MasterIndexVersion;
use crate::error::MerylError;
use crate::histogram::KmerHistogram;

/// Bit 0 of the v02+ `flags` field.
pub const FLAG_IS_MULTI_SET: u32 = 1;

/// Header + histogram for one database (`spec.md` §4.6.3).
#[derive(Debug, Clone, PartialEq)]
pub struct MasterIndex {
    pub prefix_size: u32,
    pub suffix_size: u32,
    pub num_files_bits: u32,
    pub num_blocks_bits: u32,
    pub flags: u32,
    pub histogram: KmerHistogram,
}

impl MasterIndex {
    #[must_use]
    pub fn is_multi_set(&self) -> bool {
        self.flags & FLAG_IS_MULTI_SET != 0
    }

    /// Serializes as the latest version (v03); `spec.md` §9: "Writes always
    /// use the latest (v03)."
    #[must_use]
    pub fn write(&self) -> StuffedBits {
        let mut s = StuffedBits::new();
        let (m1, m2) = MasterIndexVersion::V03.magic();
        s.set_binary(64, m1);
        s.set_binary(64, m2);
        s.set_binary(32, u64::from(self.prefix_size));
        s.set_binary(32, u64::from(self.suffix_size));
        s.set_binary(32, u64::from(self.num_files_bits));
        s.set_binary(32, u64::from(self.num_blocks_bits));
        s.set_binary(32, u64::from(self.flags));
        write_histogram(&mut s, &self.histogram);
        s
    }

    /// Reads a master index, dispatching on its magic across v01/v02/v03
    /// (`spec.md` §9: "Maintain a dispatched read path over the three
    /// master-index versions").
    pub fn read(mut s: StuffedBits) -> Result<Self, MerylError> {
        s.set_position(0);
        let m1 = s.get_binary(64);
        let m2 = s.get_binary(64);
        let version = MasterIndexVersion::from_magic((m1, m2)).ok_or(MerylError::BadMagic {
            path: std::path::PathBuf::new(),
            bit_position: 0,
            expected: "merylIndex__v.0{1,2,3}",
            found: magic_bytes(m1, m2),
        })?;

        let prefix_size = s.get_binary(32) as u32;
        let suffix_size = s.get_binary(32) as u32;
        let num_files_bits = s.get_binary(32) as u32;
        let num_blocks_bits = s.get_binary(32) as u32;
        let flags = if version.has_flags() {
            s.get_binary(32) as u32
        } else {
            0
        };
        let histogram = read_histogram(&mut s);

        Ok(Self {
            prefix_size,
            suffix_size,
            num_files_bits,
            num_blocks_bits,
            flags,
            histogram,
        })
    }
}

fn write_histogram(s: &mut StuffedBits, histogram: &KmerHistogram) {
    s.set_binary(64, histogram.len() as u64);
    for (&value, &count) in histogram {
        s.set_binary(64, value);
        s.set_binary(64, count);
    }
}

fn read_histogram(s: &mut StuffedBits) -> KmerHistogram {
    let n = s.get_binary(64);
    let mut histogram = KmerHistogram::new();
    for _ in 0..n {
        let value = s.get_binary(64);
        let count = s.get_binary(64);
        histogram.insert(value, count);
    }
    histogram
}

fn magic_bytes(m1: u64, m2: u64) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[0..8].copy_from_slice(&m1.to_be_bytes());
    out[8..16].copy_from_slice(&m2.to_be_bytes());
    out
}
