//! End-to-end recovery on synthetic volumes built by the inverse procedure:
//! script a plaintext, encrypt each sector with the dm-integrity IV/AAD
//! framing, pack the tags, interleave, then ask the engine to find the
//! payload and pull the plaintext back out.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::AeadInPlace;
use aes_gcm::{Aes256Gcm, KeyInit};
use luks_rescue::{Geometry, RescueEngine, Sink, META_SZ, TAG_SZ};
use std::path::Path;

const KEY: [u8; 32] = [
    0x9f, 0x1a, 0x5b, 0xc4, 0x3d, 0x02, 0x77, 0xe8, 0x61, 0x0c, 0xaa, 0x35, 0xd9, 0x4e, 0x12,
    0xf0, 0x28, 0xb7, 0x6a, 0x93, 0x05, 0xdc, 0x41, 0x8e, 0x57, 0xc2, 0x1f, 0x60, 0xbd, 0x34,
    0xe9, 0x7b,
];

/// Sector `abs` is `sec_sz` repetitions of `abs mod 256`.
fn sector_plain(abs: u64, sec_sz: usize) -> Vec<u8> {
    vec![(abs % 256) as u8; sec_sz]
}

fn expected_plain(geo: &Geometry, sec_cnt: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(sec_cnt as usize * geo.sec_sz);
    for abs in 0..sec_cnt {
        out.extend_from_slice(&sector_plain(abs, geo.sec_sz));
    }
    out
}

fn frame(iv_units: u64) -> ([u8; 12], [u8; 20]) {
    let mut aad = [0u8; 20];
    let le = iv_units.to_le_bytes();
    aad[..8].copy_from_slice(&le);
    aad[8..16].copy_from_slice(&le);
    let iv: [u8; 12] = aad[8..].try_into().unwrap();
    (iv, aad)
}

/// Encrypt one full area at `base`, numbering its sectors from `first_abs`.
fn fill_area(img: &mut [u8], geo: &Geometry, base: usize, first_abs: u64) {
    let cipher = Aes256Gcm::new(GenericArray::from_slice(&KEY));
    for sec in 0..geo.sec_per_area {
        let abs = first_abs + sec as u64;
        let mut buf = sector_plain(abs, geo.sec_sz);
        let units = abs * (geo.sec_sz / 512) as u64;
        let (iv, aad) = frame(units);
        let tag = cipher
            .encrypt_in_place_detached(GenericArray::from_slice(&iv), &aad, &mut buf)
            .unwrap();
        img[base + sec * TAG_SZ..base + (sec + 1) * TAG_SZ].copy_from_slice(&tag);
        let data = base + META_SZ + sec * geo.sec_sz;
        img[data..data + geo.sec_sz].copy_from_slice(&buf);
    }
}

fn build_image(geo: &Geometry, areas: usize, offset: usize) -> Vec<u8> {
    let mut img = vec![0u8; offset + areas * geo.area_sz];
    for area in 0..areas {
        fill_area(
            &mut img,
            geo,
            offset + area * geo.area_sz,
            (area * geo.sec_per_area) as u64,
        );
    }
    img
}

fn run_rescue(engine: &RescueEngine, dir: &Path) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let data_path = dir.join("data.bin");
    let tag_path = dir.join("tags.bin");
    let mut data = Sink::create(&data_path).unwrap();
    let mut tags = Sink::create(&tag_path).unwrap();
    let mut diag = Vec::new();
    engine.rescue(&mut data, &mut tags, &mut diag).unwrap();
    data.finish().unwrap();
    tags.finish().unwrap();
    (
        std::fs::read(data_path).unwrap(),
        std::fs::read(tag_path).unwrap(),
        diag,
    )
}

// Deterministic filler that cannot accidentally verify.
fn noise(len: usize, mut state: u64) -> Vec<u8> {
    let mut out = vec![0u8; len];
    for chunk in out.chunks_mut(8) {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        chunk.copy_from_slice(&state.to_le_bytes()[..chunk.len()]);
    }
    out
}

#[test]
fn recovers_a_single_area_at_offset_zero() {
    let geo = Geometry::new(512).unwrap();
    let img = build_image(&geo, 1, 0);
    let mut engine = RescueEngine::new(&img, &KEY, 32768, geo).unwrap();

    // one sampled area contributing 100 points, divided by the stride of 4
    let cert = engine.find_offset(0x8000, 25);
    assert_eq!(cert, 25);
    assert_eq!(engine.offset(), 0);

    let dir = tempfile::tempdir().unwrap();
    let (data, tags, diag) = run_rescue(&engine, dir.path());
    assert_eq!(data, expected_plain(&geo, 32768));
    // every sector verified, so the computed tags equal the stored ones
    assert_eq!(tags, &img[..32768 * TAG_SZ]);
    assert_eq!(diag, b".\n");
}

#[test]
fn finds_a_payload_preceded_by_a_megabyte_of_zeros() {
    let geo = Geometry::new(512).unwrap();
    let img = build_image(&geo, 1, 0x100000);
    let mut engine = RescueEngine::new(&img, &KEY, 32768, geo).unwrap();

    let cert = engine.find_offset(0x8000, 25);
    assert_eq!(cert, 25);
    assert_eq!(engine.offset(), 0x100000);

    let dir = tempfile::tempdir().unwrap();
    let (data, tags, diag) = run_rescue(&engine, dir.path());
    assert_eq!(data, expected_plain(&geo, 32768));
    assert_eq!(tags, &img[0x100000..0x100000 + 32768 * TAG_SZ]);
    assert_eq!(diag, b".\n");
}

#[test]
fn partial_last_area_emits_exactly_sec_cnt_sectors() {
    let geo = Geometry::new(4096).unwrap();
    let img = build_image(&geo, 1, 0x8000);
    let mut engine = RescueEngine::new(&img, &KEY, 4095, geo).unwrap();

    assert_eq!(engine.find_offset(0x8000, 25), 25);
    assert_eq!(engine.offset(), 0x8000);

    let dir = tempfile::tempdir().unwrap();
    let (data, tags, diag) = run_rescue(&engine, dir.path());
    assert_eq!(data.len(), 4095 * 4096);
    assert_eq!(data, expected_plain(&geo, 4095));
    assert_eq!(tags.len(), 4095 * TAG_SZ);
    assert_eq!(diag, b".\n");
}

#[test]
fn damaged_stored_tags_change_the_glyph_but_not_the_streams() {
    let geo = Geometry::new(512).unwrap();
    let pristine = build_image(&geo, 1, 0);
    let mut damaged = pristine.clone();
    // flip one byte in every fifth stored tag; the probe sectors
    // (0, 8192, 16384, 24576) are all ≢ 3 (mod 5) and stay intact
    for sec in (3..geo.sec_per_area).step_by(5) {
        damaged[sec * TAG_SZ] ^= 0x80;
    }

    let mut engine = RescueEngine::new(&damaged, &KEY, 32768, geo).unwrap();
    assert_eq!(engine.find_offset(0x8000, 25), 25);
    assert_eq!(engine.offset(), 0);
    let dir = tempfile::tempdir().unwrap();
    let (data_d, tags_d, diag_d) = run_rescue(&engine, dir.path());

    let mut baseline = RescueEngine::new(&pristine, &KEY, 32768, geo).unwrap();
    assert_eq!(baseline.find_offset(0x8000, 25), 25);
    let dir2 = tempfile::tempdir().unwrap();
    let (data_p, tags_p, diag_p) = run_rescue(&baseline, dir2.path());

    // decryption ignores the stored tag, and the tag stream carries the
    // computed tags, so both streams survive the damage unchanged
    assert_eq!(data_d, data_p);
    assert_eq!(tags_d, tags_p);
    assert_eq!(diag_d, b"o\n");
    assert_eq!(diag_p, b".\n");
}

#[test]
fn random_image_yields_no_offset() {
    let geo = Geometry::new(512).unwrap();

    // 16 MiB is smaller than one area: rejected before any probing
    let img = noise(16 << 20, 0xfeed_cafe);
    let mut engine = RescueEngine::new(&img, &KEY, 32768, geo).unwrap();
    assert_eq!(engine.find_offset(0x8000, 25), 0);

    // larger than one area: every candidate probes and scores zero
    let img = noise(geo.area_sz + (1 << 20), 0xdead_beef);
    let mut engine = RescueEngine::new(&img, &KEY, 32768, geo).unwrap();
    assert_eq!(engine.find_offset(0x8000, 25), 0);
}

#[test]
fn payload_off_the_alignment_grid_is_not_found() {
    let geo = Geometry::new(512).unwrap();
    let img = build_image(&geo, 1, 0x8000);
    let mut engine = RescueEngine::new(&img, &KEY, 32768, geo).unwrap();
    assert_eq!(engine.find_offset(0x100000, 25), 0);
}

#[test]
fn lowest_qualifying_offset_wins() {
    let geo = Geometry::new(512).unwrap();
    // two areas that each look like a volume start; both offsets are on
    // the default grid and both score the single-area confidence of 25
    assert_eq!(geo.area_sz % 0x8000, 0);
    let mut img = vec![0u8; 2 * geo.area_sz];
    fill_area(&mut img, &geo, 0, 0);
    fill_area(&mut img, &geo, geo.area_sz, 0);

    let mut engine = RescueEngine::new(&img, &KEY, 32768, geo).unwrap();
    assert_eq!(engine.find_offset(0x8000, 25), 25);
    assert_eq!(engine.offset(), 0);
}

#[test]
fn rescue_is_idempotent() {
    let geo = Geometry::new(512).unwrap();
    let img = build_image(&geo, 1, 0);
    let mut engine = RescueEngine::new(&img, &KEY, 32768, geo).unwrap();
    assert_eq!(engine.find_offset(0x8000, 25), 25);

    let dir = tempfile::tempdir().unwrap();
    let first = run_rescue(&engine, dir.path());
    let second = run_rescue(&engine, dir.path());
    assert_eq!(first, second);
}
