//! Sector-level recovery for LUKS2 volumes in the AES-GCM "authenticated"
//! integrity mode.
//!
//! When the LUKS2 header is destroyed the on-disk payload is still a regular
//! dm-integrity superposition: 128 KiB metadata blocks (per-sector GCM tags
//! packed back to back) interleaved with runs of ciphertext sectors. Given
//! the raw image and the master volume key, [`RescueEngine`] locates the
//! payload offset by sampled tag verification and streams a best-effort
//! decrypt of every sector.

pub mod crypto;
pub mod engine;
pub mod geometry;
pub mod mapping;
pub mod sink;

pub use crypto::{SectorGcm, IV_SZ, TAG_SZ};
pub use engine::RescueEngine;
pub use geometry::{Geometry, META_SZ};
pub use mapping::RoMapping;
pub use sink::Sink;
