//! Database-wide header block.
//!
//! The header is the first record in every database image:
//!
//! ```text
//! magic[8] version:u32 step:i64 dsCount:u32 arcCount:u32 lastUpdate:i64 info[128]
//! ```

use crate::allocator::Allocator;
use crate::backend::Backend;
use crate::error::{BackendError, Result};
use crate::field::{INT_SIZE, LONG_SIZE, RrdInt, RrdLong, RrdString};
use crate::schema::{FORMAT_VERSION, INFO_CAPACITY, RrdDef};

/// Magic string identifying an rrdb image.
pub const MAGIC: &str = "RRDB";

const MAGIC_CAPACITY: usize = 8;

/// Field handles of the header record.
#[derive(Debug, Clone)]
pub struct Header {
    magic: RrdString,
    version: RrdInt,
    step: RrdLong,
    ds_count: RrdInt,
    arc_count: RrdInt,
    last_update_time: RrdLong,
    info: RrdString,
}

impl Header {
    /// Size of the header record in bytes.
    pub const SIZE: u64 =
        MAGIC_CAPACITY as u64 + INT_SIZE + LONG_SIZE + INT_SIZE + INT_SIZE + LONG_SIZE + INFO_CAPACITY as u64;

    /// Reserves the header fields.
    pub fn allocate(allocator: &mut Allocator) -> Self {
        Self {
            magic: RrdString::allocate(allocator, MAGIC_CAPACITY),
            version: RrdInt::allocate(allocator),
            step: RrdLong::allocate(allocator),
            ds_count: RrdInt::allocate(allocator),
            arc_count: RrdInt::allocate(allocator),
            last_update_time: RrdLong::allocate(allocator),
            info: RrdString::allocate(allocator, INFO_CAPACITY),
        }
    }

    /// Writes the initial header for `def`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if a write fails, or a definition error if the
    /// info string does not fit.
    pub fn initialize(&self, backend: &mut dyn Backend, def: &RrdDef) -> Result<()> {
        self.magic.set(backend, MAGIC)?;
        self.version.set(backend, def.version)?;
        self.step.set(backend, def.step)?;
        self.ds_count.set(backend, count_u32(def.datasources.len()))?;
        self.arc_count.set(backend, count_u32(def.archives.len()))?;
        self.last_update_time.set(backend, def.start_time)?;
        self.info.set(backend, &def.info)
    }

    /// Checks the magic string, format version, and step of a stored header.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Corrupted`] if any check fails.
    pub fn validate(&self, backend: &dyn Backend) -> Result<()> {
        let corrupted = |reason: String| BackendError::Corrupted {
            path: backend.path().display().to_string(),
            reason,
        };

        let magic = self
            .magic
            .get(backend)
            .map_err(|_| corrupted("unreadable magic".to_string()))?;
        if magic != MAGIC {
            return Err(corrupted(format!("invalid magic '{magic}'")).into());
        }

        let version = self.version.get(backend)?;
        if version == 0 || version > FORMAT_VERSION {
            return Err(corrupted(format!("unsupported format version {version}")).into());
        }

        let step = self.step.get(backend)?;
        if step < 1 {
            return Err(corrupted(format!("invalid step {step}")).into());
        }
        Ok(())
    }

    /// Format version.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the read fails.
    pub fn version(&self, backend: &dyn Backend) -> Result<u32> {
        self.version.get(backend)
    }

    /// Primary step in seconds.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the read fails.
    pub fn step(&self, backend: &dyn Backend) -> Result<i64> {
        self.step.get(backend)
    }

    /// Number of datasources.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the read fails.
    pub fn ds_count(&self, backend: &dyn Backend) -> Result<usize> {
        Ok(self.ds_count.get(backend)? as usize)
    }

    /// Number of archives.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the read fails.
    pub fn arc_count(&self, backend: &dyn Backend) -> Result<usize> {
        Ok(self.arc_count.get(backend)? as usize)
    }

    /// Time of the last accepted update.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the read fails.
    pub fn last_update_time(&self, backend: &dyn Backend) -> Result<i64> {
        self.last_update_time.get(backend)
    }

    /// Stores the time of the last accepted update.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the write fails.
    pub fn set_last_update_time(&self, backend: &mut dyn Backend, time: i64) -> Result<()> {
        self.last_update_time.set(backend, time)
    }

    /// Free-form info string.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the read fails.
    pub fn info(&self, backend: &dyn Backend) -> Result<String> {
        self.info.get(backend)
    }

    /// Stores the info string.
    ///
    /// # Errors
    ///
    /// Returns a definition error if `info` is longer than the field, or
    /// [`BackendError`] if the write fails.
    pub fn set_info(&self, backend: &mut dyn Backend, info: &str) -> Result<()> {
        self.info.set(backend, info)
    }

    /// Copies the last update time into `other`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if a read or write fails.
    pub fn copy_state_to(
        &self,
        backend: &dyn Backend,
        other: &Self,
        other_backend: &mut dyn Backend,
    ) -> Result<()> {
        other.set_last_update_time(other_backend, self.last_update_time(backend)?)
    }
}

/// Converts a collection length to its stored `u32` count.
///
/// Definitions with more than `u32::MAX` entries cannot be allocated anyway,
/// so saturating is enough.
pub(crate) fn count_u32(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}
