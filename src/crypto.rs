//! AES-GCM assembled from its block-cipher and GHASH halves.
//!
//! The recovery pass must keep the plaintext and the *computed* tag of a
//! sector even when authentication fails, and the high-level AEAD APIs
//! withhold both on a tag mismatch. Composing `aes` with `ghash` gives the
//! same construction with the two results decoupled: decryption is plain
//! CTR, the digest is GHASH over AAD and ciphertext XORed with E(K, J0).

use aes::cipher::{consts::U16, generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256};
use anyhow::{bail, Result};
use ghash::{universal_hash::UniversalHash, GHash};

/// GCM authentication tag size.
pub const TAG_SZ: usize = 16;
/// GCM initialization vector size.
pub const IV_SZ: usize = 12;

type Block = GenericArray<u8, U16>;

enum AesCipher {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl AesCipher {
    fn new(key: &[u8]) -> Result<Self> {
        Ok(match key.len() {
            16 => Self::Aes128(Aes128::new(GenericArray::from_slice(key))),
            24 => Self::Aes192(Aes192::new(GenericArray::from_slice(key))),
            32 => Self::Aes256(Aes256::new(GenericArray::from_slice(key))),
            n => bail!("bad master key length {n} (want 16, 24 or 32 bytes)"),
        })
    }

    fn encrypt_block(&self, block: &mut Block) {
        match self {
            Self::Aes128(c) => c.encrypt_block(block),
            Self::Aes192(c) => c.encrypt_block(block),
            Self::Aes256(c) => c.encrypt_block(block),
        }
    }
}

/// One AES-GCM context, keyed once with the master volume key.
///
/// Every sector is a fresh GCM message: [`SectorGcm::decrypt`] runs one
/// complete IV/AAD/decrypt/digest cycle and leaves no state behind.
pub struct SectorGcm {
    cipher: AesCipher,
    ghash: GHash,
}

impl SectorGcm {
    pub fn new(key: &[u8]) -> Result<Self> {
        let cipher = AesCipher::new(key)?;
        let mut h = Block::default();
        cipher.encrypt_block(&mut h);
        let ghash = GHash::new(&h);
        Ok(Self { cipher, ghash })
    }

    /// Decrypt one sector and return the tag computed over `aad` and `ct`.
    ///
    /// The tag is produced unconditionally; comparing it against a stored
    /// tag is the caller's business. `out` must be the same length as `ct`.
    pub fn decrypt(&self, iv: &[u8; IV_SZ], aad: &[u8], ct: &[u8], out: &mut [u8]) -> [u8; TAG_SZ] {
        debug_assert_eq!(ct.len(), out.len());

        let mut j0 = Block::default();
        j0[..IV_SZ].copy_from_slice(iv);
        j0[15] = 1;

        let mut mask = j0;
        self.cipher.encrypt_block(&mut mask);

        // The digest covers the ciphertext, so it is settled before the
        // keystream runs.
        let mut gh = self.ghash.clone();
        gh.update_padded(aad);
        gh.update_padded(ct);
        let mut lens = Block::default();
        lens[..8].copy_from_slice(&(8 * aad.len() as u64).to_be_bytes());
        lens[8..].copy_from_slice(&(8 * ct.len() as u64).to_be_bytes());
        gh.update(&[lens]);
        let mut tag = gh.finalize();
        for (t, m) in tag.iter_mut().zip(mask.iter()) {
            *t ^= m;
        }

        self.ctr32(&j0, ct, out);

        tag.into()
    }

    // CTR with a 32-bit big-endian counter; the first payload block uses
    // inc32(J0), J0 itself being reserved for the tag mask.
    fn ctr32(&self, j0: &Block, src: &[u8], dst: &mut [u8]) {
        let mut ctr = u32::from_be_bytes([j0[12], j0[13], j0[14], j0[15]]);
        for (s, d) in src.chunks(16).zip(dst.chunks_mut(16)) {
            ctr = ctr.wrapping_add(1);
            let mut ks = *j0;
            ks[12..].copy_from_slice(&ctr.to_be_bytes());
            self.cipher.encrypt_block(&mut ks);
            for (i, b) in d.iter_mut().enumerate() {
                *b = s[i] ^ ks[i];
            }
        }
    }
}
