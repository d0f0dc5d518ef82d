// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Typed slots bound to a fixed `(offset, width)` byte range, read/written
//! through a [`Backend`] on every access. Cells carry no reference to a
//! backend themselves — callers pass one in at each access, which keeps
//! entities free of cyclic ownership back into the database that built
//! them.

use byteorder::{BigEndian, ByteOrder};

use crate::allocator::Allocator;
use crate::backend::Backend;
use crate::error::{RrdError, Result};

/// An 8-byte big-endian signed integer.
#[derive(Clone, Copy, Debug)]
pub struct IntCell {
    offset: u64,
}

impl IntCell {
    pub const WIDTH: u64 = 8;

    pub fn bind(alloc: &mut Allocator) -> Self {
        IntCell { offset: alloc.allocate(Self::WIDTH) }
    }

    /// Bind to a caller-supplied offset, used when re-opening an existing
    /// database instead of allocating fresh cells.
    pub fn at(offset: u64) -> Self {
        IntCell { offset }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn get(&self, backend: &dyn Backend) -> Result<i64> {
        let mut buf = [0u8; 8];
        backend.read(self.offset, &mut buf)?;
        Ok(BigEndian::read_i64(&buf))
    }

    pub fn set(&self, backend: &mut dyn Backend, value: i64) -> Result<()> {
        let mut buf = [0u8; 8];
        BigEndian::write_i64(&mut buf, value);
        backend.write(self.offset, &buf)
    }
}

/// An 8-byte big-endian IEEE-754 double. NaN is a valid, round-trippable
/// value (it represents "unknown").
#[derive(Clone, Copy, Debug)]
pub struct DoubleCell {
    offset: u64,
}

impl DoubleCell {
    pub const WIDTH: u64 = 8;

    pub fn bind(alloc: &mut Allocator) -> Self {
        DoubleCell { offset: alloc.allocate(Self::WIDTH) }
    }

    pub fn at(offset: u64) -> Self {
        DoubleCell { offset }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn get(&self, backend: &dyn Backend) -> Result<f64> {
        let mut buf = [0u8; 8];
        backend.read(self.offset, &mut buf)?;
        Ok(BigEndian::read_f64(&buf))
    }

    pub fn set(&self, backend: &mut dyn Backend, value: f64) -> Result<()> {
        let mut buf = [0u8; 8];
        BigEndian::write_f64(&mut buf, value);
        backend.write(self.offset, &buf)
    }
}

/// A fixed-capacity UTF-8 string, NUL-padded on disk and trimmed on read.
#[derive(Clone, Copy, Debug)]
pub struct StringCell {
    offset: u64,
    capacity: usize,
}

impl StringCell {
    pub fn bind(alloc: &mut Allocator, capacity: usize) -> Self {
        StringCell { offset: alloc.allocate(capacity as u64), capacity }
    }

    pub fn at(offset: u64, capacity: usize) -> Self {
        StringCell { offset, capacity }
    }

    pub fn width(&self) -> u64 {
        self.capacity as u64
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, backend: &dyn Backend) -> Result<String> {
        let mut buf = vec![0u8; self.capacity];
        backend.read(self.offset, &mut buf)?;
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        String::from_utf8(buf[..end].to_vec())
            .map_err(|e| RrdError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }

    /// Write `value`, NUL-padding up to capacity.
    ///
    /// Errors with `InvalidDefinition` if `value` doesn't fit (byte length,
    /// not char count, since the on-disk capacity is a byte capacity).
    pub fn set(&self, backend: &mut dyn Backend, value: &str) -> Result<()> {
        if value.len() > self.capacity {
            return Err(RrdError::InvalidDefinition(format!(
                "string {:?} ({} bytes) exceeds cell capacity of {} bytes",
                value,
                value.len(),
                self.capacity
            )));
        }
        let mut buf = vec![0u8; self.capacity];
        buf[..value.len()].copy_from_slice(value.as_bytes());
        backend.write(self.offset, &buf)
    }
}

/// A fixed-length array of big-endian doubles, stride 8 bytes, element 0 at
/// the cell's base offset.
#[derive(Clone, Copy, Debug)]
pub struct DoubleArrayCell {
    offset: u64,
    len: usize,
}

impl DoubleArrayCell {
    pub fn bind(alloc: &mut Allocator, len: usize) -> Self {
        DoubleArrayCell { offset: alloc.allocate(len as u64 * 8), len }
    }

    pub fn at(offset: u64, len: usize) -> Self {
        DoubleArrayCell { offset, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn width(&self) -> u64 {
        self.len as u64 * 8
    }

    fn element_offset(&self, index: usize) -> u64 {
        debug_assert!(index < self.len, "array index {} out of bounds ({})", index, self.len);
        self.offset + index as u64 * 8
    }

    pub fn get(&self, backend: &dyn Backend, index: usize) -> Result<f64> {
        let mut buf = [0u8; 8];
        backend.read(self.element_offset(index), &mut buf)?;
        Ok(BigEndian::read_f64(&buf))
    }

    pub fn set(&self, backend: &mut dyn Backend, index: usize, value: f64) -> Result<()> {
        let mut buf = [0u8; 8];
        BigEndian::write_f64(&mut buf, value);
        backend.write(self.element_offset(index), &buf)
    }
}

/// A fixed-length array of big-endian 64-bit signed integers.
#[derive(Clone, Copy, Debug)]
pub struct LongArrayCell {
    offset: u64,
    len: usize,
}

impl LongArrayCell {
    pub fn bind(alloc: &mut Allocator, len: usize) -> Self {
        LongArrayCell { offset: alloc.allocate(len as u64 * 8), len }
    }

    pub fn at(offset: u64, len: usize) -> Self {
        LongArrayCell { offset, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn width(&self) -> u64 {
        self.len as u64 * 8
    }

    fn element_offset(&self, index: usize) -> u64 {
        debug_assert!(index < self.len, "array index {} out of bounds ({})", index, self.len);
        self.offset + index as u64 * 8
    }

    pub fn get(&self, backend: &dyn Backend, index: usize) -> Result<i64> {
        let mut buf = [0u8; 8];
        backend.read(self.element_offset(index), &mut buf)?;
        Ok(BigEndian::read_i64(&buf))
    }

    pub fn set(&self, backend: &mut dyn Backend, index: usize, value: i64) -> Result<()> {
        let mut buf = [0u8; 8];
        BigEndian::write_i64(&mut buf, value);
        backend.write(self.element_offset(index), &buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, MemoryBackend};

    fn backend_with_len(n: u64) -> MemoryBackend {
        let mut b = MemoryBackend::new("mem://cells");
        b.set_length(n).unwrap();
        b
    }

    #[test]
    fn int_cell_round_trips_negative_values() {
        let mut alloc = Allocator::new();
        let cell = IntCell::bind(&mut alloc);
        let mut backend = backend_with_len(alloc.total());
        cell.set(&mut backend, -42).unwrap();
        assert_eq!(cell.get(&backend).unwrap(), -42);
    }

    #[test]
    fn double_cell_round_trips_nan() {
        let mut alloc = Allocator::new();
        let cell = DoubleCell::bind(&mut alloc);
        let mut backend = backend_with_len(alloc.total());
        cell.set(&mut backend, f64::NAN).unwrap();
        assert!(cell.get(&backend).unwrap().is_nan());
    }

    #[test]
    fn string_cell_pads_and_trims() {
        let mut alloc = Allocator::new();
        let cell = StringCell::bind(&mut alloc, 8);
        let mut backend = backend_with_len(alloc.total());
        cell.set(&mut backend, "hi").unwrap();
        assert_eq!(cell.get(&backend).unwrap(), "hi");
    }

    #[test]
    fn string_cell_rejects_overlong_values() {
        let mut alloc = Allocator::new();
        let cell = StringCell::bind(&mut alloc, 4);
        let mut backend = backend_with_len(alloc.total());
        assert!(matches!(
            cell.set(&mut backend, "toolong"),
            Err(RrdError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn double_array_cell_elements_are_independent() {
        let mut alloc = Allocator::new();
        let cell = DoubleArrayCell::bind(&mut alloc, 4);
        let mut backend = backend_with_len(alloc.total());
        for i in 0..4 {
            cell.set(&mut backend, i, i as f64 * 1.5).unwrap();
        }
        for i in 0..4 {
            assert_eq!(cell.get(&backend, i).unwrap(), i as f64 * 1.5);
        }
    }

    #[test]
    fn cells_allocated_in_order_do_not_overlap() {
        let mut alloc = Allocator::new();
        let a = IntCell::bind(&mut alloc);
        let b = StringCell::bind(&mut alloc, 10);
        let c = DoubleArrayCell::bind(&mut alloc, 3);
        assert_eq!(a.offset(), 0);
        assert_eq!(b.offset(), 8);
        assert_eq!(c.offset(), 18);
        assert_eq!(alloc.total(), 18 + 24);
    }
}
