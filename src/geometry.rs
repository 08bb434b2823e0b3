use anyhow::{bail, Result};

/// Size of the metadata block that precedes each run of ciphertext sectors.
pub const META_SZ: usize = 128 * 1024;

/// Interleave constants for one on-disk area, fixed by the sector size.
///
/// An area is a 128 KiB metadata block followed by `sec_per_area` ciphertext
/// sectors; whatever the sector size, an area always covers 32768 blocks of
/// 512 bytes worth of payload.
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub sec_sz: usize,
    pub sec_per_area: usize,
    pub area_sz: usize,
}

impl Geometry {
    pub fn new(sec_sz: usize) -> Result<Self> {
        match sec_sz {
            512 | 1024 | 2048 | 4096 => {}
            other => bail!("bad sector_size {other} (want 512, 1024, 2048 or 4096)"),
        }
        let sec_per_area = 32768 / (sec_sz / 512);
        Ok(Self {
            sec_sz,
            sec_per_area,
            area_sz: sec_per_area * sec_sz + META_SZ,
        })
    }

    /// IV/AAD sector numbering counts 512-byte units regardless of the
    /// configured sector size.
    pub fn iv_units(&self, logical_sec: u64) -> u64 {
        logical_sec * (self.sec_sz as u64 / 512)
    }
}
