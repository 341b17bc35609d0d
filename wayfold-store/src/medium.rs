//! Append-only byte medium backing the paged stores.
//!
//! A medium starts either in memory or in a scratch file. In-memory media
//! move to disk on [`Medium::spill`], which callers invoke during a flush
//! once the medium has outgrown its in-memory allowance. Writes to a file
//! medium are staged in a small buffer that is written out before any read
//! touches it.

use std::io::{self, Read, Seek, SeekFrom, Write};

use camino::Utf8PathBuf;
use log::debug;
use wayfold_fs::{ScratchFile, ScratchSpace};

const WRITE_BUFFER_BYTES: usize = 1 << 20;

#[derive(Debug)]
enum Backing {
    Memory(Vec<u8>),
    File {
        file: ScratchFile,
        written: u64,
        pending: Vec<u8>,
    },
}

/// Append-only storage for encoded pages and records.
#[derive(Debug)]
pub struct Medium {
    backing: Backing,
    scratch: ScratchSpace,
    prefix: &'static str,
    max_in_memory_bytes: u64,
}

impl Medium {
    /// Create a medium, on disk from the start when `in_memory` is false.
    ///
    /// # Errors
    /// Returns an I/O error when the scratch file cannot be created.
    pub fn new(
        scratch: ScratchSpace,
        prefix: &'static str,
        in_memory: bool,
        max_in_memory_bytes: u64,
    ) -> io::Result<Self> {
        let backing = if in_memory {
            Backing::Memory(Vec::new())
        } else {
            Backing::File {
                file: scratch.create_file(prefix, ".bin")?,
                written: 0,
                pending: Vec::new(),
            }
        };
        Ok(Self {
            backing,
            scratch,
            prefix,
            max_in_memory_bytes,
        })
    }

    /// Total bytes appended so far.
    #[must_use]
    pub fn len(&self) -> u64 {
        match &self.backing {
            Backing::Memory(bytes) => bytes.len() as u64,
            Backing::File {
                written, pending, ..
            } => written + pending.len() as u64,
        }
    }

    /// Bytes currently held in process memory.
    #[must_use]
    pub fn resident_bytes(&self) -> u64 {
        match &self.backing {
            Backing::Memory(bytes) => bytes.len() as u64,
            Backing::File { pending, .. } => pending.len() as u64,
        }
    }

    /// Whether the medium lives in a scratch file.
    #[must_use]
    pub const fn is_on_disk(&self) -> bool {
        matches!(self.backing, Backing::File { .. })
    }

    /// Whether an in-memory medium has grown past its allowance.
    #[must_use]
    pub fn exceeds_memory_allowance(&self) -> bool {
        matches!(&self.backing, Backing::Memory(bytes) if bytes.len() as u64 > self.max_in_memory_bytes)
    }

    /// Append `bytes`, returning the offset they were written at.
    ///
    /// # Errors
    /// Returns an I/O error when staged bytes cannot be written out.
    pub fn append(&mut self, bytes: &[u8]) -> io::Result<u64> {
        let offset = self.len();
        match &mut self.backing {
            Backing::Memory(buffer) => buffer.extend_from_slice(bytes),
            Backing::File {
                file,
                written,
                pending,
            } => {
                pending.extend_from_slice(bytes);
                if pending.len() >= WRITE_BUFFER_BYTES {
                    write_pending(file, written, pending)?;
                }
            }
        }
        Ok(offset)
    }

    /// Fill `buf` with the bytes stored at `offset`.
    ///
    /// # Errors
    /// Returns an I/O error when the range lies beyond the appended data or
    /// the file read fails.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or_else(|| io::Error::other("read range overflows"))?;
        if end > self.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read of {offset}..{end} beyond medium length {}", self.len()),
            ));
        }
        match &mut self.backing {
            Backing::Memory(bytes) => copy_range(bytes, offset, buf),
            Backing::File {
                file,
                written,
                pending,
            } => {
                if offset >= *written {
                    return copy_range(pending, offset - *written, buf);
                }
                if end > *written {
                    write_pending(file, written, pending)?;
                }
                let handle = file.file_mut();
                handle.seek(SeekFrom::Start(offset))?;
                handle.read_exact(buf)
            }
        }
    }

    /// Move an in-memory medium into a scratch file. No-op when already on
    /// disk.
    ///
    /// # Errors
    /// Returns an I/O error when the scratch file cannot be written.
    pub fn spill(&mut self) -> io::Result<()> {
        let Backing::Memory(bytes) = &self.backing else {
            return Ok(());
        };
        let written = bytes.len() as u64;
        let mut file = self.scratch.create_file(self.prefix, ".bin")?;
        file.file_mut().write_all(bytes)?;
        debug!("spilled {written} in-memory bytes to {}", file.path());
        self.backing = Backing::File {
            file,
            written,
            pending: Vec::new(),
        };
        Ok(())
    }

    /// Write staged bytes out to the scratch file.
    ///
    /// # Errors
    /// Returns an I/O error when the write fails.
    pub fn sync(&mut self) -> io::Result<()> {
        if let Backing::File {
            file,
            written,
            pending,
        } = &mut self.backing
        {
            write_pending(file, written, pending)?;
        }
        Ok(())
    }

    /// Release the medium, keeping its scratch file when `retain` is set.
    ///
    /// Returns the retained path, if any.
    ///
    /// # Errors
    /// Returns an I/O error when the file cannot be written, kept or removed.
    pub fn close(mut self, retain: bool) -> io::Result<Option<Utf8PathBuf>> {
        self.sync()?;
        match self.backing {
            Backing::Memory(_) => Ok(None),
            Backing::File { file, .. } if retain => file.retain().map(Some),
            Backing::File { file, .. } => file.discard().map(|()| None),
        }
    }
}

fn write_pending(file: &mut ScratchFile, written: &mut u64, pending: &mut Vec<u8>) -> io::Result<()> {
    if pending.is_empty() {
        return Ok(());
    }
    let handle = file.file_mut();
    handle.seek(SeekFrom::Start(*written))?;
    handle.write_all(pending)?;
    *written += pending.len() as u64;
    pending.clear();
    Ok(())
}

fn copy_range(source: &[u8], offset: u64, buf: &mut [u8]) -> io::Result<()> {
    let start = usize::try_from(offset).map_err(io::Error::other)?;
    let end = start
        .checked_add(buf.len())
        .ok_or_else(|| io::Error::other("read range overflows"))?;
    let slice = source
        .get(start..end)
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "read beyond medium"))?;
    buf.copy_from_slice(slice);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn temp_dir() -> TempDir {
        TempDir::new().expect("create temp dir")
    }

    fn scratch(dir: &TempDir) -> ScratchSpace {
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 path");
        ScratchSpace::new(Some(&path)).expect("scratch space")
    }

    #[rstest]
    #[case(true)]
    #[case(false)]
    fn appended_bytes_read_back(temp_dir: TempDir, #[case] in_memory: bool) {
        let mut medium = Medium::new(scratch(&temp_dir), "medium-", in_memory, 1024)
            .expect("create medium");
        let first = medium.append(b"hello").expect("append");
        let second = medium.append(b"world").expect("append");
        assert_eq!((first, second), (0, 5));

        let mut buf = [0_u8; 5];
        medium.read_at(second, &mut buf).expect("read");
        assert_eq!(&buf, b"world");
        assert_eq!(medium.is_on_disk(), !in_memory);
    }

    #[rstest]
    fn spill_preserves_contents(temp_dir: TempDir) {
        let mut medium =
            Medium::new(scratch(&temp_dir), "medium-", true, 4).expect("create medium");
        medium.append(b"0123456789").expect("append");
        assert!(medium.exceeds_memory_allowance());

        medium.spill().expect("spill");
        assert!(medium.is_on_disk());
        assert_eq!(medium.resident_bytes(), 0);
        medium.append(b"ab").expect("append after spill");

        let mut buf = [0_u8; 4];
        medium.read_at(8, &mut buf).expect("read across spill boundary");
        assert_eq!(&buf, b"89ab");
    }

    #[rstest]
    fn reading_past_the_end_fails(temp_dir: TempDir) {
        let mut medium =
            Medium::new(scratch(&temp_dir), "medium-", true, 1024).expect("create medium");
        medium.append(b"abc").expect("append");
        let mut buf = [0_u8; 4];
        let err = medium.read_at(0, &mut buf).expect_err("out of range");
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[rstest]
    fn retained_file_outlives_medium(temp_dir: TempDir) {
        let mut medium =
            Medium::new(scratch(&temp_dir), "medium-", false, 0).expect("create medium");
        medium.append(b"kept").expect("append");
        let path = medium.close(true).expect("close").expect("retained path");
        assert_eq!(std::fs::read(path).expect("read retained"), b"kept");
    }
}
