//! Typed fixed-width fields stored at byte offsets in a [`Backend`].
//!
//! Each field type is a small `Copy` handle holding its offset. Handles are
//! created by [`allocate`](RrdDouble::allocate) calls on an [`Allocator`] in
//! declaration order, so declaring the same fields in the same order always
//! yields the same layout. Values are encoded big-endian:
//!
//! | Type               | Width             | Encoding                     |
//! |--------------------|-------------------|------------------------------|
//! | [`RrdDouble`]      | 8                 | IEEE-754 `f64`               |
//! | [`RrdLong`]        | 8                 | two's complement `i64`       |
//! | [`RrdInt`]         | 4                 | `u32`                        |
//! | [`RrdString`]      | capacity          | UTF-8, zero padded           |
//! | [`RrdDoubleArray`] | 8 × len           | consecutive `f64` values     |

use crate::allocator::Allocator;
use crate::backend::Backend;
use crate::error::{BackendError, DefinitionError, Result};

/// Width of a stored `f64`.
pub const DOUBLE_SIZE: u64 = 8;
/// Width of a stored `i64`.
pub const LONG_SIZE: u64 = 8;
/// Width of a stored `u32`.
pub const INT_SIZE: u64 = 4;

/// An `f64` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RrdDouble {
    offset: u64,
}

impl RrdDouble {
    /// Reserves space for the field.
    pub fn allocate(allocator: &mut Allocator) -> Self {
        Self {
            offset: allocator.allocate(DOUBLE_SIZE),
        }
    }

    /// Byte offset of the field.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reads the stored value.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the read fails.
    pub fn get(&self, backend: &dyn Backend) -> Result<f64> {
        let mut buf = [0u8; 8];
        backend.read(self.offset, &mut buf)?;
        Ok(f64::from_be_bytes(buf))
    }

    /// Stores `value`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the write fails.
    pub fn set(&self, backend: &mut dyn Backend, value: f64) -> Result<()> {
        backend.write(self.offset, &value.to_be_bytes())
    }
}

/// An `i64` field, used for timestamps and durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RrdLong {
    offset: u64,
}

impl RrdLong {
    /// Reserves space for the field.
    pub fn allocate(allocator: &mut Allocator) -> Self {
        Self {
            offset: allocator.allocate(LONG_SIZE),
        }
    }

    /// Reads the stored value.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the read fails.
    pub fn get(&self, backend: &dyn Backend) -> Result<i64> {
        let mut buf = [0u8; 8];
        backend.read(self.offset, &mut buf)?;
        Ok(i64::from_be_bytes(buf))
    }

    /// Stores `value`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the write fails.
    pub fn set(&self, backend: &mut dyn Backend, value: i64) -> Result<()> {
        backend.write(self.offset, &value.to_be_bytes())
    }
}

/// A `u32` field, used for counts, tags, and flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RrdInt {
    offset: u64,
}

impl RrdInt {
    /// Reserves space for the field.
    pub fn allocate(allocator: &mut Allocator) -> Self {
        Self {
            offset: allocator.allocate(INT_SIZE),
        }
    }

    /// Reads the stored value.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the read fails.
    pub fn get(&self, backend: &dyn Backend) -> Result<u32> {
        let mut buf = [0u8; 4];
        backend.read(self.offset, &mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    /// Stores `value`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the write fails.
    pub fn set(&self, backend: &mut dyn Backend, value: u32) -> Result<()> {
        backend.write(self.offset, &value.to_be_bytes())
    }

    /// Reads the value as a boolean flag (non-zero is `true`).
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the read fails.
    pub fn get_flag(&self, backend: &dyn Backend) -> Result<bool> {
        Ok(self.get(backend)? != 0)
    }

    /// Stores a boolean flag as `1` or `0`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the write fails.
    pub fn set_flag(&self, backend: &mut dyn Backend, flag: bool) -> Result<()> {
        self.set(backend, u32::from(flag))
    }
}

/// A fixed-capacity UTF-8 string field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RrdString {
    offset: u64,
    capacity: usize,
}

impl RrdString {
    /// Reserves `capacity` bytes for the field.
    pub fn allocate(allocator: &mut Allocator, capacity: usize) -> Self {
        Self {
            offset: allocator.allocate(capacity as u64),
            capacity,
        }
    }

    /// Maximum encoded length in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Checks that `value` fits into a field of `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::StringTooLong`] if it does not fit.
    pub fn check(value: &str, capacity: usize) -> Result<()> {
        if value.len() > capacity {
            return Err(DefinitionError::StringTooLong {
                value: value.to_string(),
                length: value.len(),
                capacity,
            }
            .into());
        }
        Ok(())
    }

    /// Reads the stored string, dropping the zero padding.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Corrupted`] if the bytes are not valid UTF-8.
    pub fn get(&self, backend: &dyn Backend) -> Result<String> {
        let mut buf = vec![0u8; self.capacity];
        backend.read(self.offset, &mut buf)?;
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        buf.truncate(end);
        String::from_utf8(buf).map_err(|e| {
            BackendError::Corrupted {
                path: backend.path().display().to_string(),
                reason: format!("invalid UTF-8 string at offset {}: {e}", self.offset),
            }
            .into()
        })
    }

    /// Stores `value`, zero padding the remainder of the field.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::StringTooLong`] if `value` does not fit, or
    /// [`BackendError`] if the write fails.
    pub fn set(&self, backend: &mut dyn Backend, value: &str) -> Result<()> {
        Self::check(value, self.capacity)?;
        let mut buf = vec![0u8; self.capacity];
        buf[..value.len()].copy_from_slice(value.as_bytes());
        backend.write(self.offset, &buf)
    }
}

/// A fixed-length array of `f64` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RrdDoubleArray {
    offset: u64,
    len: usize,
}

impl RrdDoubleArray {
    /// Reserves space for `len` values.
    pub fn allocate(allocator: &mut Allocator, len: usize) -> Self {
        Self {
            offset: allocator.allocate(len as u64 * DOUBLE_SIZE),
            len,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn element_offset(&self, index: usize) -> u64 {
        self.offset + index as u64 * DOUBLE_SIZE
    }

    fn check_range(&self, start: usize, count: usize) -> Result<()> {
        if start.checked_add(count).is_none_or(|end| end > self.len) {
            return Err(BackendError::BoundsViolation {
                offset: self.element_offset(start),
                length: count as u64 * DOUBLE_SIZE,
                size: self.element_offset(self.len),
            }
            .into());
        }
        Ok(())
    }

    /// Reads the element at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if `index` is out of range or the read fails.
    pub fn get(&self, backend: &dyn Backend, index: usize) -> Result<f64> {
        self.check_range(index, 1)?;
        let mut buf = [0u8; 8];
        backend.read(self.element_offset(index), &mut buf)?;
        Ok(f64::from_be_bytes(buf))
    }

    /// Stores `value` at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if `index` is out of range or the write fails.
    pub fn set(&self, backend: &mut dyn Backend, index: usize, value: f64) -> Result<()> {
        self.check_range(index, 1)?;
        backend.write(self.element_offset(index), &value.to_be_bytes())
    }

    /// Reads `count` consecutive elements starting at `start`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the range is out of bounds or the read fails.
    pub fn get_range(&self, backend: &dyn Backend, start: usize, count: usize) -> Result<Vec<f64>> {
        self.check_range(start, count)?;
        let mut buf = vec![0u8; count * 8];
        backend.read(self.element_offset(start), &mut buf)?;
        Ok(buf
            .chunks_exact(8)
            .map(|chunk| {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(chunk);
                f64::from_be_bytes(bytes)
            })
            .collect())
    }

    /// Stores `values` at consecutive positions starting at `start`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the range is out of bounds or the write fails.
    pub fn set_range(&self, backend: &mut dyn Backend, start: usize, values: &[f64]) -> Result<()> {
        self.check_range(start, values.len())?;
        let buf: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        backend.write(self.element_offset(start), &buf)
    }

    /// Sets every element to `value`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the write fails.
    pub fn fill(&self, backend: &mut dyn Backend, value: f64) -> Result<()> {
        self.set_range(backend, 0, &vec![value; self.len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::error::RrdError;

    fn backend_for(allocator: &Allocator) -> MemoryBackend {
        let mut backend = MemoryBackend::new("fields");
        backend.set_len(allocator.allocated()).unwrap();
        backend
    }

    #[test]
    fn test_fields_are_laid_out_in_declaration_order() {
        let mut allocator = Allocator::new();
        let double = RrdDouble::allocate(&mut allocator);
        let int = RrdInt::allocate(&mut allocator);
        let long = RrdLong::allocate(&mut allocator);
        let string = RrdString::allocate(&mut allocator, 10);
        let array = RrdDoubleArray::allocate(&mut allocator, 3);

        assert_eq!(double.offset(), 0);
        assert_eq!(allocator.allocated(), 8 + 4 + 8 + 10 + 24);

        let mut backend = backend_for(&allocator);
        double.set(&mut backend, 1.5).unwrap();
        int.set(&mut backend, 7).unwrap();
        long.set(&mut backend, -42).unwrap();
        string.set(&mut backend, "abc").unwrap();
        array.set_range(&mut backend, 0, &[1.0, 2.0, 3.0]).unwrap();

        assert_eq!(double.get(&backend).unwrap(), 1.5);
        assert_eq!(int.get(&backend).unwrap(), 7);
        assert_eq!(long.get(&backend).unwrap(), -42);
        assert_eq!(string.get(&backend).unwrap(), "abc");
        assert_eq!(array.get_range(&backend, 1, 2).unwrap(), vec![2.0, 3.0]);

        // Big-endian on the wire
        let mut raw = [0u8; 4];
        backend.read(8, &mut raw).unwrap();
        assert_eq!(raw, [0, 0, 0, 7]);
    }

    #[test]
    fn test_string_capacity() {
        let mut allocator = Allocator::new();
        let string = RrdString::allocate(&mut allocator, 4);
        let mut backend = backend_for(&allocator);

        string.set(&mut backend, "abcd").unwrap();
        assert_eq!(string.get(&backend).unwrap(), "abcd");

        string.set(&mut backend, "ab").unwrap();
        assert_eq!(string.get(&backend).unwrap(), "ab");

        let result = string.set(&mut backend, "abcde");
        assert!(matches!(
            result,
            Err(RrdError::Definition(DefinitionError::StringTooLong {
                length: 5,
                capacity: 4,
                ..
            }))
        ));
    }

    #[test]
    fn test_nan_and_flags() {
        let mut allocator = Allocator::new();
        let double = RrdDouble::allocate(&mut allocator);
        let flag = RrdInt::allocate(&mut allocator);
        let mut backend = backend_for(&allocator);

        double.set(&mut backend, f64::NAN).unwrap();
        assert!(double.get(&backend).unwrap().is_nan());

        flag.set_flag(&mut backend, true).unwrap();
        assert!(flag.get_flag(&backend).unwrap());
        flag.set_flag(&mut backend, false).unwrap();
        assert!(!flag.get_flag(&backend).unwrap());
    }

    #[test]
    fn test_array_bounds() {
        let mut allocator = Allocator::new();
        let array = RrdDoubleArray::allocate(&mut allocator, 2);
        let mut backend = backend_for(&allocator);

        array.fill(&mut backend, f64::NAN).unwrap();
        assert!(array.get(&backend, 1).unwrap().is_nan());
        assert!(array.get(&backend, 2).is_err());
        assert!(array.set_range(&mut backend, 1, &[1.0, 2.0]).is_err());
        assert!(array.get_range(&backend, 0, 0).unwrap().is_empty());
    }
}
