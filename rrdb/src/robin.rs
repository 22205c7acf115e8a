//! Fixed-length circular value buffers ("robins").
//!
//! A robin stores `rows` doubles plus a write pointer. The pointer always
//! names the oldest slot, which is also the next one to be overwritten, so
//! the logical view starting at the pointer runs oldest to newest:
//!
//! ```text
//! slots:    [ v3 | v4 | v0 | v1 | v2 ]
//! pointer:             ^
//! logical:  [ v0, v1, v2, v3, v4 ]
//! ```
//!
//! Unwritten slots hold NaN.

use crate::allocator::Allocator;
use crate::backend::Backend;
use crate::error::{BackendError, DefinitionError, Result};
use crate::field::{DOUBLE_SIZE, INT_SIZE, RrdDoubleArray, RrdInt};

/// Field handles of a robin.
#[derive(Debug, Clone)]
pub struct Robin {
    pointer: RrdInt,
    values: RrdDoubleArray,
}

impl Robin {
    /// Size in bytes of a robin with `rows` rows.
    pub fn size(rows: u32) -> u64 {
        INT_SIZE + u64::from(rows) * DOUBLE_SIZE
    }

    /// Reserves a robin of `rows` rows.
    pub fn allocate(allocator: &mut Allocator, rows: u32) -> Self {
        Self {
            pointer: RrdInt::allocate(allocator),
            values: RrdDoubleArray::allocate(allocator, rows as usize),
        }
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.values.len()
    }

    /// Resets the pointer and fills every slot with NaN.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if a write fails.
    pub fn initialize(&self, backend: &mut dyn Backend) -> Result<()> {
        self.pointer.set(backend, 0)?;
        self.values.fill(backend, f64::NAN)
    }

    /// Physical index of the oldest slot.
    fn pointer(&self, backend: &dyn Backend) -> Result<usize> {
        let rows = self.rows().max(1);
        Ok(self.pointer.get(backend)? as usize % rows)
    }

    fn set_pointer(&self, backend: &mut dyn Backend, pointer: usize) -> Result<()> {
        let pointer = u32::try_from(pointer % self.rows().max(1)).unwrap_or(0);
        self.pointer.set(backend, pointer)
    }

    /// Writes `value` into the oldest slot and advances the pointer.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if a read or write fails.
    pub fn store(&self, backend: &mut dyn Backend, value: f64) -> Result<()> {
        let pointer = self.pointer(backend)?;
        self.values.set(backend, pointer, value)?;
        self.set_pointer(backend, pointer + 1)
    }

    /// Stores `value` `count` times, as `count` consecutive [`store`](Self::store)
    /// calls would. `count` is capped at the number of rows.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if a read or write fails.
    pub fn bulk_store(&self, backend: &mut dyn Backend, value: f64, count: usize) -> Result<()> {
        let rows = self.rows();
        let count = count.min(rows);
        if count == 0 {
            return Ok(());
        }

        let pointer = self.pointer(backend)?;
        let tail = count.min(rows - pointer);
        self.values.set_range(backend, pointer, &vec![value; tail])?;
        if count > tail {
            self.values.set_range(backend, 0, &vec![value; count - tail])?;
        }
        self.set_pointer(backend, pointer + count)
    }

    /// Value at logical `index` (0 is the oldest).
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if `index` is out
    /// of range or a read fails.
    pub fn get_value(&self, backend: &dyn Backend, index: usize) -> Result<f64> {
        let pointer = self.pointer(backend)?;
        self.values.get(backend, (pointer + index) % self.rows().max(1))
    }

    /// All values, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if a read fails.
    pub fn get_values(&self, backend: &dyn Backend) -> Result<Vec<f64>> {
        let pointer = self.pointer(backend)?;
        let mut values = self.values.get_range(backend, 0, self.rows())?;
        values.rotate_left(pointer);
        Ok(values)
    }

    /// `count` values starting at logical `start`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::BoundsViolation`] (in rows) if the range
    /// exceeds the robin, or another backend error if a read fails.
    pub fn get_range(&self, backend: &dyn Backend, start: usize, count: usize) -> Result<Vec<f64>> {
        let values = self.get_values(backend)?;
        values
            .get(start..start.saturating_add(count))
            .map(<[f64]>::to_vec)
            .ok_or_else(|| {
                BackendError::BoundsViolation {
                    offset: start as u64,
                    length: count as u64,
                    size: values.len() as u64,
                }
                .into()
            })
    }

    /// Replaces all values (given oldest first) and resets the pointer.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::IncompatibleState`] if `values` does not
    /// have exactly one entry per row.
    pub fn update(&self, backend: &mut dyn Backend, values: &[f64]) -> Result<()> {
        if values.len() != self.rows() {
            return Err(DefinitionError::IncompatibleState {
                reason: format!(
                    "robin has {} rows, {} values supplied",
                    self.rows(),
                    values.len()
                ),
            }
            .into());
        }
        self.values.set_range(backend, 0, values)?;
        self.pointer.set(backend, 0)
    }

    /// Sets every value outside `[min, max]` to NaN.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if a read or write fails.
    pub fn filter_values(
        &self,
        backend: &mut dyn Backend,
        min: Option<f64>,
        max: Option<f64>,
    ) -> Result<()> {
        let mut values = self.values.get_range(backend, 0, self.rows())?;
        let mut changed = false;
        for value in &mut values {
            let out_of_range =
                min.is_some_and(|min| *value < min) || max.is_some_and(|max| *value > max);
            if out_of_range {
                *value = f64::NAN;
                changed = true;
            }
        }
        if changed {
            self.values.set_range(backend, 0, &values)?;
        }
        Ok(())
    }

    /// Copies the values into `other`, aligned on the newest row.
    ///
    /// A shorter destination keeps only the newest values; a longer one is
    /// NaN-padded at the oldest end.
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
        let values = self.get_values(backend)?;
        let other_rows = other.rows();
        let copied: Vec<f64> = if values.len() >= other_rows {
            values[values.len() - other_rows..].to_vec()
        } else {
            let mut padded = vec![f64::NAN; other_rows - values.len()];
            padded.extend_from_slice(&values);
            padded
        };
        other.update(other_backend, &copied)
    }
}
