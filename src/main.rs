//! luks-rescue – pull sectors out of a headerless LUKS2 AES-GCM volume.
//!
//! The LUKS2 metadata is gone but the master key is known: scan the image
//! for the dm-integrity payload offset, then decrypt and verify every
//! sector, writing best-effort plaintext (and, on request, the per-sector
//! computed tags).

use anyhow::{bail, ensure, Context, Result};
use clap::Parser;
use luks_rescue::{Geometry, RescueEngine, RoMapping, Sink};
use std::io;
use std::path::PathBuf;
use std::process;

#[derive(Parser, Debug)]
#[command(author, version, about, disable_help_subcommand = true)]
struct Cli {
    /// Disk image holding the encrypted payload
    #[arg(long, value_name = "PATH")]
    image_file: PathBuf,

    /// Raw master volume key (16, 24 or 32 bytes)
    #[arg(long, value_name = "PATH")]
    master_key_file: PathBuf,

    /// Number of logical sectors in the volume
    #[arg(long, value_name = "N", value_parser = parse_size)]
    sector_count: u64,

    /// Sector size in bytes (512, 1024, 2048 or 4096)
    #[arg(long, value_name = "N", default_value = "0x200", value_parser = parse_size)]
    sector_size: u64,

    /// Probe candidate offsets on multiples of this stride
    #[arg(long, value_name = "N", default_value = "0x8000", value_parser = parse_size)]
    alignment: u64,

    /// Minimum confidence (percent) required to accept an offset
    #[arg(long, value_name = "PCT", default_value_t = 25,
          value_parser = clap::value_parser!(u32).range(0..=100))]
    certainty: u32,

    /// Write recovered plaintext sectors here
    #[arg(long, value_name = "PATH")]
    data_file: Option<PathBuf>,

    /// Write the computed 16-byte GCM tag of every sector here
    #[arg(long, value_name = "PATH")]
    tag_file: Option<PathBuf>,
}

/// Size argument: decimal or 0x-prefixed hex, with an optional K/M/G/T
/// binary suffix.
fn parse_size(arg: &str) -> Result<u64, String> {
    let (digits, radix) = match arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X")) {
        Some(rest) => (rest, 16),
        None => (arg, 10),
    };
    let (digits, shift) = match digits.as_bytes().last() {
        Some(b'K') => (&digits[..digits.len() - 1], 10),
        Some(b'M') => (&digits[..digits.len() - 1], 20),
        Some(b'G') => (&digits[..digits.len() - 1], 30),
        Some(b'T') => (&digits[..digits.len() - 1], 40),
        _ => (digits, 0),
    };
    let val = u64::from_str_radix(digits, radix).map_err(|e| format!("bad size '{arg}': {e}"))?;
    val.checked_mul(1u64 << shift)
        .ok_or_else(|| format!("size '{arg}' does not fit in 64 bits"))
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    ensure!(cli.alignment > 0, "alignment must be positive");
    let alignment = usize::try_from(cli.alignment).context("alignment")?;
    let geo = Geometry::new(usize::try_from(cli.sector_size).context("sector_size")?)?;

    let img = RoMapping::open(&cli.image_file)?;
    let key = RoMapping::open(&cli.master_key_file)?;
    let mut engine = RescueEngine::new(img.bytes(), key.bytes(), cli.sector_count, geo)?;

    eprintln!("searching data offset ...");
    let cert = engine.find_offset(alignment, cli.certainty);
    if cert == 0 {
        bail!("Cannot find offset.");
    }
    eprintln!("found offset {:#x} with {}% certainty", engine.offset(), cert);

    if cli.data_file.is_some() || cli.tag_file.is_some() {
        let mut data = match &cli.data_file {
            Some(path) => Sink::create(path)?,
            None => Sink::discard(),
        };
        let mut tags = match &cli.tag_file {
            Some(path) => Sink::create(path)?,
            None => Sink::discard(),
        };
        engine.rescue(&mut data, &mut tags, &mut io::stderr())?;
        data.finish()?;
        tags.finish()?;
    }
    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
