//! Filesystem helpers for ingestion scratch space, built on `cap-std`,
//! `camino` and `tempfile`.
//!
//! Scratch files are deleted when dropped. A caller that wants to reuse a
//! backing file across runs calls [`ScratchFile::retain`] (or
//! [`ScratchPath::retain`]) once the pass has completed successfully.
#![forbid(unsafe_code)]

use std::fs::File;
use std::io;
use std::path::Component;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8};
use log::debug;
use tempfile::{Builder, NamedTempFile, TempPath};

/// Open a UTF-8 file path using ambient authority.
pub fn open_utf8_file(path: &Utf8Path) -> io::Result<fs_utf8::File> {
    fs_utf8::File::open_ambient(path, ambient_authority())
}

/// Resolve an ambient directory for the given path and return the directory with the file name.
pub fn open_dir_and_file(path: &Utf8Path) -> io::Result<(fs_utf8::Dir, String)> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::other("target should include a file name"))?
        .to_owned();
    let dir = fs_utf8::Dir::open_ambient_dir(parent, ambient_authority())?;
    Ok((dir, file_name))
}

/// Return whether a path exists and is a regular file using capability-based IO.
pub fn file_is_file(path: &Utf8Path) -> io::Result<bool> {
    let (dir, name) = open_dir_and_file(path)?;
    dir.metadata(name.as_str()).map(|meta| meta.is_file())
}

/// Create `path` and any missing ancestors.
pub fn ensure_dir(path: &Utf8Path) -> io::Result<()> {
    if path.as_os_str().is_empty() || path == Utf8Path::new("/") {
        return Ok(());
    }
    let (base_dir, relative) = base_dir_and_relative(path)?;
    if relative.as_os_str().is_empty() {
        return Ok(());
    }
    base_dir.create_dir_all(&relative)
}

/// Split an absolute or relative path into an ambient base directory and a relative suffix.
pub fn base_dir_and_relative(path: &Utf8Path) -> io::Result<(fs_utf8::Dir, Utf8PathBuf)> {
    let std_path = path.as_std_path();

    let (base, relative) = match std_path.components().next() {
        // Windows absolute path with a drive or UNC prefix.
        Some(Component::Prefix(prefix)) => {
            let prefix_str = prefix
                .as_os_str()
                .to_str()
                .ok_or_else(|| io::Error::other("non-UTF-8 path prefix"))?;

            let base = Utf8PathBuf::from(prefix_str).join(std::path::MAIN_SEPARATOR.to_string());
            let relative = std_path
                .strip_prefix(base.as_std_path())
                .or_else(|_| std_path.strip_prefix(prefix.as_os_str()))
                .map_err(|_| io::Error::other("failed to strip prefix from path"))?
                .to_path_buf();
            (base, relative)
        }
        // Unix-style absolute path.
        Some(Component::RootDir) => {
            let base = Utf8PathBuf::from(std::path::MAIN_SEPARATOR.to_string());
            let relative = std_path
                .strip_prefix(base.as_std_path())
                .map_err(|_| io::Error::other("failed to strip root from absolute path"))?
                .to_path_buf();
            (base, relative)
        }
        _ => (Utf8PathBuf::from("."), std_path.to_path_buf()),
    };

    let dir = fs_utf8::Dir::open_ambient_dir(&base, ambient_authority())?;
    let relative =
        Utf8PathBuf::from_path_buf(relative).map_err(|_| io::Error::other("non-UTF-8 path"))?;

    Ok((dir, relative))
}

/// A directory in which scratch files are created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchSpace {
    dir: Utf8PathBuf,
}

impl ScratchSpace {
    /// Use `dir`, creating it when missing, or the system temporary
    /// directory when `dir` is `None`.
    ///
    /// # Errors
    /// Returns an I/O error when the directory cannot be created or the
    /// temporary directory path is not UTF-8.
    pub fn new(dir: Option<&Utf8Path>) -> io::Result<Self> {
        let dir = match dir {
            Some(path) => {
                ensure_dir(path)?;
                path.to_path_buf()
            }
            None => Utf8PathBuf::from_path_buf(std::env::temp_dir())
                .map_err(|_| io::Error::other("non-UTF-8 temporary directory"))?,
        };
        Ok(Self { dir })
    }

    /// Directory holding the scratch files.
    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Create an empty read/write scratch file named `{prefix}XXXX{suffix}`.
    ///
    /// # Errors
    /// Returns an I/O error when the file cannot be created.
    pub fn create_file(&self, prefix: &str, suffix: &str) -> io::Result<ScratchFile> {
        let file = Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(&self.dir)?;
        let path = utf8_path(file.path())?;
        debug!("created scratch file {path}");
        Ok(ScratchFile { file, path })
    }

    /// Reserve a scratch path without keeping a handle open.
    ///
    /// The file exists and is empty, which `SQLite` accepts as a fresh
    /// database.
    ///
    /// # Errors
    /// Returns an I/O error when the file cannot be created.
    pub fn reserve_path(&self, prefix: &str, suffix: &str) -> io::Result<ScratchPath> {
        self.create_file(prefix, suffix)
            .map(ScratchFile::into_scratch_path)
    }
}

fn utf8_path(path: &std::path::Path) -> io::Result<Utf8PathBuf> {
    Utf8PathBuf::from_path_buf(path.to_path_buf())
        .map_err(|_| io::Error::other("non-UTF-8 scratch path"))
}

/// An open scratch file, removed on drop unless retained.
#[derive(Debug)]
pub struct ScratchFile {
    file: NamedTempFile,
    path: Utf8PathBuf,
}

impl ScratchFile {
    /// Location of the file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Handle for reading and writing.
    pub fn file_mut(&mut self) -> &mut File {
        self.file.as_file_mut()
    }

    /// Close the handle but keep the delete-on-drop guard.
    #[must_use]
    pub fn into_scratch_path(self) -> ScratchPath {
        ScratchPath {
            path: self.path,
            guard: self.file.into_temp_path(),
        }
    }

    /// Keep the file on disk and return its path.
    ///
    /// # Errors
    /// Returns an I/O error when the file cannot be persisted.
    pub fn retain(self) -> io::Result<Utf8PathBuf> {
        self.into_scratch_path().retain()
    }

    /// Delete the file now, reporting any failure.
    ///
    /// # Errors
    /// Returns an I/O error when removal fails.
    pub fn discard(self) -> io::Result<()> {
        self.into_scratch_path().discard()
    }
}

/// A scratch path without an open handle, removed on drop unless retained.
#[derive(Debug)]
pub struct ScratchPath {
    path: Utf8PathBuf,
    guard: TempPath,
}

impl ScratchPath {
    /// Location of the file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Keep the file on disk and return its path.
    ///
    /// # Errors
    /// Returns an I/O error when the file cannot be persisted.
    pub fn retain(self) -> io::Result<Utf8PathBuf> {
        self.guard.keep().map_err(io::Error::from)?;
        debug!("retained scratch file {}", self.path);
        Ok(self.path)
    }

    /// Delete the file now, reporting any failure.
    ///
    /// # Errors
    /// Returns an I/O error when removal fails.
    pub fn discard(self) -> io::Result<()> {
        self.guard.close()
    }
}
