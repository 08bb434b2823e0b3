//! mark-sectors – stamp every sector of a device with its own index.
//!
//! Each sector is written as zeros except bytes 0..8, the little-endian
//! sector number. A device marked this way makes a self-describing
//! plaintext fixture: after encryption and recovery, every sector says
//! where it belongs.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Block device or regular file to stamp
    device: PathBuf,
}

#[cfg(target_os = "linux")]
const BLKGETSIZE64: libc::c_ulong = 0x80081272;

#[cfg(target_os = "linux")]
fn probe(dev: &File, path: &Path) -> Result<(usize, u64)> {
    use std::os::unix::fs::FileTypeExt;
    use std::os::unix::io::AsRawFd;

    let meta = dev
        .metadata()
        .with_context(|| format!("stat '{}'", path.display()))?;
    if !meta.file_type().is_block_device() {
        return Ok((512, meta.len()));
    }

    let fd = dev.as_raw_fd();
    let mut sec_sz: libc::c_int = 0;
    if unsafe { libc::ioctl(fd, libc::BLKSSZGET, &mut sec_sz) } != 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("ioctl(BLKSSZGET) on '{}'", path.display()));
    }
    let mut dev_sz: u64 = 0;
    if unsafe { libc::ioctl(fd, BLKGETSIZE64, &mut dev_sz) } != 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("ioctl(BLKGETSIZE64) on '{}'", path.display()));
    }
    Ok((sec_sz as usize, dev_sz))
}

#[cfg(not(target_os = "linux"))]
fn probe(dev: &File, path: &Path) -> Result<(usize, u64)> {
    let meta = dev
        .metadata()
        .with_context(|| format!("stat '{}'", path.display()))?;
    Ok((512, meta.len()))
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut dev = OpenOptions::new()
        .write(true)
        .open(&cli.device)
        .with_context(|| format!("opening '{}'", cli.device.display()))?;
    let (sec_sz, dev_sz) = probe(&dev, &cli.device)?;
    eprintln!("sector size: {sec_sz}");
    eprintln!("device size: {dev_sz}");

    let mut buf = vec![0u8; sec_sz];
    let total = dev_sz / sec_sz as u64;
    let mut last_perc = -1i64;
    for i in 0..total {
        buf[..8].copy_from_slice(&i.to_le_bytes());
        dev.write_all(&buf)
            .with_context(|| format!("writing sector {i}"))?;
        let perc = (100 * (i + 1) / total) as i64;
        if perc > last_perc {
            eprint!("written: {perc}%\r");
            last_perc = perc;
        }
    }
    eprintln!();
    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
