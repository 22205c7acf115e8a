//! Byte storage backends for rrdb databases.
//!
//! The engine never interprets a backend as anything more than a flat,
//! fixed-size byte region: it reads and writes N bytes at an offset, sets
//! the region's length once at creation, and flushes/closes it. Two
//! backends are provided:
//!
//! - [`FileBackend`]: a memory-mapped file, one database per file.
//! - [`MemoryBackend`]: a heap buffer shared through a
//!   [`MemoryBackendFactory`], useful for tests and ephemeral databases.
//!
//! A [`BackendFactory`] decides which backend a path maps to and whether
//! the header of an existing database should be validated on open.
//!
//! # Safety
//!
//! [`FileBackend`] maps files with `memmap2`. All access goes through
//! bounds-checked slice copies; the only unsafe operations are the map
//! calls themselves.

use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::{Mmap, MmapMut, MmapOptions};
use parking_lot::Mutex;

use crate::error::{BackendError, Result};

/// Fixed-offset byte storage used by a database.
///
/// Implementations must reject any access outside `[0, len())` with
/// [`BackendError::BoundsViolation`].
pub trait Backend: Send + fmt::Debug {
    /// Returns the path (or key) this backend was opened with.
    fn path(&self) -> &Path;

    /// Fills `buf` with the bytes stored at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the range is out of bounds or the read fails.
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Writes `bytes` at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the range is out of bounds, the backend is
    /// read-only, or the write fails.
    fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<()>;

    /// Returns the current length of the byte region.
    fn len(&self) -> u64;

    /// Returns `true` if the byte region is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resizes the byte region to exactly `length` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the backend is read-only or resizing fails.
    fn set_len(&mut self, length: u64) -> Result<()>;

    /// Flushes pending writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::SyncFailed`] if the flush fails.
    fn sync(&mut self) -> Result<()>;

    /// Flushes and releases the backend. Further calls fail.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the final flush fails.
    fn close(&mut self) -> Result<()>;

    /// Returns a copy of the whole byte region.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the read fails.
    fn read_all(&self) -> Result<Vec<u8>> {
        let length = usize::try_from(self.len()).map_err(|_| BackendError::BoundsViolation {
            offset: 0,
            length: self.len(),
            size: self.len(),
        })?;
        let mut buf = vec![0u8; length];
        self.read(0, &mut buf)?;
        Ok(buf)
    }
}

/// Creates backends for database paths.
pub trait BackendFactory: Send + Sync + fmt::Debug {
    /// Short name of the factory, for diagnostics.
    fn name(&self) -> &'static str;

    /// Returns `true` if a database target exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Opens (creating if necessary and not read-only) the target at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the target cannot be opened.
    fn open(&self, path: &Path, read_only: bool) -> Result<Box<dyn Backend>>;

    /// Returns `true` if the header of an existing target should be
    /// validated before its bytes are trusted.
    fn should_validate_header(&self, _path: &Path) -> bool {
        true
    }
}

/// Checks that `offset..offset + length` fits within `size`.
fn check_bounds(offset: u64, length: usize, size: u64) -> Result<(usize, usize)> {
    let length = length as u64;
    match offset.checked_add(length) {
        Some(end) if end <= size => {
            // Both values are bounded by a size that is already addressable.
            #[allow(clippy::cast_possible_truncation)]
            Ok((offset as usize, end as usize))
        }
        _ => Err(BackendError::BoundsViolation {
            offset,
            length,
            size,
        }
        .into()),
    }
}

/// Memory mapping state of a [`FileBackend`].
#[derive(Debug)]
enum Mapping {
    /// Zero-length file or closed backend; nothing is mapped.
    Unmapped,
    /// Read-only mapping.
    ReadOnly(Mmap),
    /// Read-write mapping.
    ReadWrite(MmapMut),
}

impl Mapping {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::Unmapped => &[],
            Self::ReadOnly(mmap) => mmap,
            Self::ReadWrite(mmap) => mmap,
        }
    }
}

/// Memory-mapped file backend.
///
/// The file is mapped in full; reads and writes are plain copies into and
/// out of the mapping. Resizing drops and re-creates the mapping.
#[derive(Debug)]
pub struct FileBackend {
    /// The open file handle, `None` once closed.
    file: Option<File>,
    /// Current mapping of the file.
    mapping: Mapping,
    /// Path to the file.
    path: PathBuf,
    /// Whether the file was opened read-only.
    read_only: bool,
}

impl FileBackend {
    /// Opens the file at `path`, creating it when `read_only` is false.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Io`] if the file cannot be opened or mapped.
    pub fn open<P: AsRef<Path>>(path: P, read_only: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = if read_only {
            File::open(&path)
        } else {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
        }
        .map_err(|e| BackendError::Io {
            path: path.display().to_string(),
            offset: 0,
            source: e,
        })?;

        let mut backend = Self {
            file: Some(file),
            mapping: Mapping::Unmapped,
            path,
            read_only,
        };
        backend.remap()?;
        Ok(backend)
    }

    /// Returns the open file or an error if the backend was closed.
    fn file(&self) -> Result<&File> {
        self.file.as_ref().ok_or_else(|| {
            BackendError::Io {
                path: self.path.display().to_string(),
                offset: 0,
                source: std::io::Error::other("backend is closed"),
            }
            .into()
        })
    }

    /// Maps the file at its current length.
    fn remap(&mut self) -> Result<()> {
        let file = self.file()?;
        let length = file
            .metadata()
            .map_err(|e| BackendError::Io {
                path: self.path.display().to_string(),
                offset: 0,
                source: e,
            })?
            .len();

        let mapping = if length == 0 {
            Mapping::Unmapped
        } else if self.read_only {
            // SAFETY: The file is open for the lifetime of the mapping and the
            // engine's single-writer discipline means no other handle in this
            // process mutates it while mapped.
            let mmap = unsafe { MmapOptions::new().map(file) };
            Mapping::ReadOnly(mmap.map_err(|e| BackendError::Io {
                path: self.path.display().to_string(),
                offset: 0,
                source: e,
            })?)
        } else {
            // SAFETY: The file was opened read-write and stays open while mapped;
            // all writes go through this mapping under the database lock.
            let mmap = unsafe { MmapMut::map_mut(file) };
            Mapping::ReadWrite(mmap.map_err(|e| BackendError::Io {
                path: self.path.display().to_string(),
                offset: 0,
                source: e,
            })?)
        };

        self.mapping = mapping;
        Ok(())
    }

    fn read_only_error(&self) -> BackendError {
        BackendError::ReadOnly {
            path: self.path.display().to_string(),
        }
    }
}

impl Backend for FileBackend {
    fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let bytes = self.mapping.bytes();
        let (start, end) = check_bounds(offset, buf.len(), bytes.len() as u64)?;
        buf.copy_from_slice(&bytes[start..end]);
        Ok(())
    }

    fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(self.read_only_error().into());
        }
        let size = self.len();
        let (start, end) = check_bounds(offset, bytes.len(), size)?;
        match &mut self.mapping {
            Mapping::ReadWrite(mmap) => {
                mmap[start..end].copy_from_slice(bytes);
                Ok(())
            }
            // Only reachable for zero-length writes on an empty file.
            _ => Ok(()),
        }
    }

    fn len(&self) -> u64 {
        self.mapping.bytes().len() as u64
    }

    fn set_len(&mut self, length: u64) -> Result<()> {
        if self.read_only {
            return Err(self.read_only_error().into());
        }
        if let Mapping::ReadWrite(mmap) = &self.mapping {
            mmap.flush().map_err(|e| BackendError::SyncFailed {
                path: self.path.display().to_string(),
                source: e,
            })?;
        }
        self.mapping = Mapping::Unmapped;
        self.file()?.set_len(length).map_err(|e| BackendError::Io {
            path: self.path.display().to_string(),
            offset: length,
            source: e,
        })?;
        self.remap()
    }

    fn sync(&mut self) -> Result<()> {
        if let Mapping::ReadWrite(mmap) = &self.mapping {
            mmap.flush().map_err(|e| BackendError::SyncFailed {
                path: self.path.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let result = self.sync();
        self.mapping = Mapping::Unmapped;
        self.file = None;
        result
    }
}

/// Factory producing [`FileBackend`]s; paths are file system paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileBackendFactory;

impl BackendFactory for FileBackendFactory {
    fn name(&self) -> &'static str {
        "FILE"
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn open(&self, path: &Path, read_only: bool) -> Result<Box<dyn Backend>> {
        Ok(Box::new(FileBackend::open(path, read_only)?))
    }
}

/// Heap-allocated backend whose buffer is shared with its factory.
///
/// Closing a memory backend does not discard the data: reopening the same
/// path through the same [`MemoryBackendFactory`] sees the stored bytes.
#[derive(Debug)]
pub struct MemoryBackend {
    path: PathBuf,
    buffer: Arc<Mutex<Vec<u8>>>,
    read_only: bool,
}

impl MemoryBackend {
    /// Creates a standalone, empty, writable memory backend.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            buffer: Arc::new(Mutex::new(Vec::new())),
            read_only: false,
        }
    }
}

impl Backend for MemoryBackend {
    fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let buffer = self.buffer.lock();
        let (start, end) = check_bounds(offset, buf.len(), buffer.len() as u64)?;
        buf.copy_from_slice(&buffer[start..end]);
        Ok(())
    }

    fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(BackendError::ReadOnly {
                path: self.path.display().to_string(),
            }
            .into());
        }
        let mut buffer = self.buffer.lock();
        let (start, end) = check_bounds(offset, bytes.len(), buffer.len() as u64)?;
        buffer[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.buffer.lock().len() as u64
    }

    fn set_len(&mut self, length: u64) -> Result<()> {
        if self.read_only {
            return Err(BackendError::ReadOnly {
                path: self.path.display().to_string(),
            }
            .into());
        }
        let length = usize::try_from(length).map_err(|_| BackendError::BoundsViolation {
            offset: 0,
            length,
            size: 0,
        })?;
        self.buffer.lock().resize(length, 0);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Factory keeping memory backends alive by path for the factory's lifetime.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackendFactory {
    buffers: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<Vec<u8>>>>>>,
}

impl MemoryBackendFactory {
    /// Creates a factory with no stored databases.
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes the buffer stored under `path`, returning `true` if it existed.
    pub fn delete<P: AsRef<Path>>(&self, path: P) -> bool {
        self.buffers.lock().remove(path.as_ref()).is_some()
    }
}

impl BackendFactory for MemoryBackendFactory {
    fn name(&self) -> &'static str {
        "MEMORY"
    }

    fn exists(&self, path: &Path) -> bool {
        self.buffers.lock().contains_key(path)
    }

    fn open(&self, path: &Path, read_only: bool) -> Result<Box<dyn Backend>> {
        let buffer = Arc::clone(self.buffers.lock().entry(path.to_path_buf()).or_default());
        Ok(Box::new(MemoryBackend {
            path: path.to_path_buf(),
            buffer,
            read_only,
        }))
    }

    fn should_validate_header(&self, _path: &Path) -> bool {
        false
    }
}
