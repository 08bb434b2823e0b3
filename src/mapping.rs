use anyhow::{ensure, Context, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// Whole-file read-only shared mapping. The byte view borrows from `self`,
/// so the mapping outlives every crypto operation that reads it.
#[derive(Debug)]
pub struct RoMapping {
    map: Mmap,
}

impl RoMapping {
    pub fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("opening '{}'", path.display()))?;
        let meta = file
            .metadata()
            .with_context(|| format!("stat '{}'", path.display()))?;
        ensure!(meta.is_file(), "'{}' is not a regular file", path.display());
        ensure!(
            usize::try_from(meta.len()).is_ok(),
            "'{}' is too big to mmap",
            path.display()
        );
        let map = unsafe { Mmap::map(&file) }
            .with_context(|| format!("mmap '{}'", path.display()))?;
        Ok(Self { map })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.map
    }
}
