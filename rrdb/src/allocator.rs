//! Sequential byte offset allocation for the database layout.
//!
//! Every persistent field claims its offset from an [`Allocator`] in
//! declaration order. Offsets are never reused, and the final
//! [`Allocator::allocated`] value is the exact size of the database image.

use crate::archive::{ArcState, Archive};
use crate::datasource::Datasource;
use crate::header::Header;
use crate::robin::Robin;

/// Hands out increasing byte offsets.
#[derive(Debug, Default, Clone)]
pub struct Allocator {
    next: u64,
}

impl Allocator {
    /// Creates an allocator starting at offset zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `size` bytes and returns the offset of the first one.
    pub fn allocate(&mut self, size: u64) -> u64 {
        let offset = self.next;
        self.next += size;
        offset
    }

    /// Total number of bytes reserved so far.
    pub fn allocated(&self) -> u64 {
        self.next
    }
}

/// Computes the size in bytes of a database with `ds_count` datasources and
/// one archive per entry in `archive_rows`.
///
/// # Examples
///
/// ```rust
/// use rrdb::allocator::database_size;
///
/// let one_by_one = database_size(1, &[10]);
/// let two_by_one = database_size(2, &[10]);
/// assert!(two_by_one > one_by_one);
/// ```
pub fn database_size(ds_count: usize, archive_rows: &[u32]) -> u64 {
    let ds_count = ds_count as u64;
    let arc_count = archive_rows.len() as u64;
    let robins: u64 = archive_rows
        .iter()
        .map(|&rows| Robin::size(rows) * ds_count)
        .sum();

    Header::SIZE
        + ds_count * Datasource::SIZE
        + arc_count * Archive::SIZE
        + arc_count * ds_count * ArcState::SIZE
        + robins
}
