use anyhow::{bail, Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Sequential output for recovered sector data.
///
/// `Discard` stands in when the caller wants only one of the two output
/// streams; it accepts and drops everything.
pub enum Sink {
    File { file: File, path: PathBuf },
    Discard,
}

impl Sink {
    pub fn create(path: &Path) -> Result<Self> {
        let mut opts = OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.custom_flags(libc::O_CLOEXEC | libc::O_NOFOLLOW);
        }
        let file = opts
            .open(path)
            .with_context(|| format!("creating output '{}'", path.display()))?;
        Ok(Self::File {
            file,
            path: path.to_owned(),
        })
    }

    pub fn discard() -> Self {
        Self::Discard
    }

    /// Write exactly `buf.len()` bytes, absorbing interrupted and
    /// would-block conditions; every other failure is fatal.
    pub fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        let (file, path) = match self {
            Self::File { file, path } => (file, path),
            Self::Discard => return Ok(()),
        };
        while !buf.is_empty() {
            match file.write(buf) {
                Ok(0) => bail!("writing '{}': no progress", path.display()),
                Ok(n) => buf = &buf[n..],
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                    ) => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("writing '{}'", path.display()))
                }
            }
        }
        Ok(())
    }

    /// Push the stream to stable storage and surface the close-path result.
    pub fn finish(self) -> Result<()> {
        if let Self::File { file, path } = self {
            file.sync_all()
                .with_context(|| format!("syncing '{}'", path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_every_byte_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let mut sink = Sink::create(&path).unwrap();
        sink.write_all(b"abc").unwrap();
        sink.write_all(b"defg").unwrap();
        sink.finish().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdefg");
    }

    #[test]
    fn create_truncates_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"stale bytes").unwrap();
        let mut sink = Sink::create(&path).unwrap();
        sink.write_all(b"new").unwrap();
        sink.finish().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn discard_swallows_everything() {
        let mut sink = Sink::discard();
        sink.write_all(&[0u8; 4096]).unwrap();
        sink.finish().unwrap();
    }
}
