//! The offset finder and the sector-by-sector rescue pass.
//!
//! Two sector numberings meet here and must not be mixed: sectors inside an
//! area are addressed by their *logical* index, while IV/AAD derivation
//! counts 512-byte units (`logical * sec_sz / 512`). [`Geometry::iv_units`]
//! is the only bridge between the two.

use crate::crypto::{SectorGcm, IV_SZ, TAG_SZ};
use crate::geometry::{Geometry, META_SZ};
use crate::sink::Sink;
use anyhow::{ensure, Context, Result};
use std::io::Write;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// Sampling stride divisor for the offset scan. Four area probes of four
/// sector probes each fix the confidence scale; changing this changes what
/// the certainty percentages mean.
const STEPS: usize = 4;

fn step(n: usize) -> usize {
    (n + (STEPS - 1)) / STEPS
}

/// Per-sector IV/AAD scratch: LE64 sector index, the same LE64 again, four
/// zero bytes. The 12-byte IV aliases bytes 8..20; the duplicated halves
/// are the dm-integrity on-disk framing, not a redundancy to collapse.
struct SectorFrame {
    aad: [u8; 8 + IV_SZ],
}

impl SectorFrame {
    fn new(iv_units: u64) -> Self {
        let mut aad = [0u8; 8 + IV_SZ];
        let le = iv_units.to_le_bytes();
        aad[..8].copy_from_slice(&le);
        aad[8..16].copy_from_slice(&le);
        Self { aad }
    }

    fn iv(&self) -> &[u8; IV_SZ] {
        self.aad[8..].try_into().unwrap()
    }

    fn aad(&self) -> &[u8] {
        &self.aad
    }
}

/// The recovery engine: borrows the mapped image for its whole lifetime,
/// owns the keyed GCM context and the discovered payload offset.
pub struct RescueEngine<'a> {
    img: &'a [u8],
    gcm: SectorGcm,
    geo: Geometry,
    sec_cnt: u64,
    offset: usize,
}

impl<'a> RescueEngine<'a> {
    pub fn new(img: &'a [u8], key: &[u8], sec_cnt: u64, geo: Geometry) -> Result<Self> {
        ensure!(sec_cnt > 0, "sector_count must be positive");
        Ok(Self {
            img,
            gcm: SectorGcm::new(key)?,
            geo,
            sec_cnt,
            offset: 0,
        })
    }

    /// The discovered payload offset; meaningful after a successful
    /// [`find_offset`](Self::find_offset).
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Scan candidate payload offsets on multiples of `align_sz`, scoring
    /// each with sampled tag verifications. The lowest candidate whose
    /// confidence reaches `min_cert` wins; returns that confidence, or 0
    /// when the scan is exhausted (or the image is smaller than one area).
    pub fn find_offset(&mut self, align_sz: usize, min_cert: u32) -> u32 {
        debug_assert!(align_sz > 0);
        if self.img.len() < self.geo.area_sz {
            return 0;
        }
        let max_offset = self.img.len() - self.geo.area_sz;
        let mut plain = vec![0u8; self.geo.sec_sz];
        let mut offset = 0usize;
        let mut found = 0;
        while offset <= max_offset {
            let cert = self.score_offset(offset, &mut plain);
            if cert >= min_cert {
                self.offset = offset;
                found = cert;
                break;
            }
            match offset.checked_add(align_sz) {
                Some(next) => offset = next,
                None => break,
            }
        }
        plain.zeroize();
        found
    }

    // Up to four areas sampled, each contributing a 0..100 score.
    fn score_offset(&self, offset: usize, plain: &mut [u8]) -> u32 {
        let area_cnt = (self.img.len() - offset) / self.geo.area_sz;
        let mut percent = 0;
        for area in (0..area_cnt).step_by(step(area_cnt)) {
            percent += self.score_area(offset, area, plain);
        }
        percent / STEPS as u32
    }

    // Up to four sectors probed with a full decrypt+digest cycle; each
    // stored-tag match is worth 100 points.
    fn score_area(&self, offset: usize, area: usize, plain: &mut [u8]) -> u32 {
        let geo = &self.geo;
        let base = offset + area * geo.area_sz;
        let meta = &self.img[base..base + META_SZ];
        let data = &self.img[base + META_SZ..base + geo.area_sz];
        let mut percent = 0;
        for sec in (0..geo.sec_per_area).step_by(step(geo.sec_per_area)) {
            let abs = (area * geo.sec_per_area + sec) as u64;
            let frame = SectorFrame::new(geo.iv_units(abs));
            let tag = self.gcm.decrypt(
                frame.iv(),
                frame.aad(),
                &data[sec * geo.sec_sz..(sec + 1) * geo.sec_sz],
                plain,
            );
            if tag.ct_eq(&meta[sec * TAG_SZ..(sec + 1) * TAG_SZ]).unwrap_u8() == 1 {
                percent += 100;
            }
        }
        percent / STEPS as u32
    }

    /// Decrypt every sector from the discovered offset, pushing plaintext to
    /// `data` and the computed (not stored) tag to `tags`. A sector whose
    /// tag does not verify is still written out; damage only shows up in the
    /// per-area glyph on `diag` (`.` all verified, `o` some, `O` none) and
    /// in the emitted tag stream.
    pub fn rescue(&self, data: &mut Sink, tags: &mut Sink, diag: &mut dyn Write) -> Result<()> {
        let geo = &self.geo;
        let spa = geo.sec_per_area as u64;
        let area_cnt = self.sec_cnt.div_ceil(spa);
        let mut plain = vec![0u8; geo.sec_sz];

        for area in 0..area_cnt {
            let base = usize::try_from(area)
                .ok()
                .and_then(|a| a.checked_mul(geo.area_sz))
                .and_then(|v| v.checked_add(self.offset))
                .with_context(|| format!("area {area} lies beyond the address space"))?;
            let used = (self.sec_cnt - area * spa).min(spa) as usize;
            let need = META_SZ + used * geo.sec_sz;
            ensure!(
                base.checked_add(need)
                    .is_some_and(|end| end <= self.img.len()),
                "image truncated in area {area} ({need} bytes needed at {base:#x})"
            );
            let meta = &self.img[base..base + META_SZ];
            let sectors = &self.img[base + META_SZ..base + need];

            let mut ok = 0usize;
            for sec in 0..used {
                let abs = area * spa + sec as u64;
                let frame = SectorFrame::new(geo.iv_units(abs));
                let tag = self.gcm.decrypt(
                    frame.iv(),
                    frame.aad(),
                    &sectors[sec * geo.sec_sz..(sec + 1) * geo.sec_sz],
                    &mut plain,
                );
                if tag.ct_eq(&meta[sec * TAG_SZ..(sec + 1) * TAG_SZ]).unwrap_u8() == 1 {
                    ok += 1;
                }
                data.write_all(&plain)?;
                tags.write_all(&tag)?;
            }

            let glyph = if ok == 0 {
                'O'
            } else if ok == used {
                '.'
            } else {
                'o'
            };
            write!(diag, "{glyph}").context("writing progress")?;
        }
        writeln!(diag).context("writing progress")?;
        plain.zeroize();
        Ok(())
    }
}
