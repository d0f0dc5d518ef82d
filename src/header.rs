// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The fixed-metadata header: signature, step, datasource/archive counts,
//! last-update time, info string.

use crate::allocator::Allocator;
use crate::backend::Backend;
use crate::cell::{IntCell, StringCell};
use crate::error::{RrdError, Result};

/// Fixed ASCII signature identifying this on-disk format and version.
pub const SIGNATURE: &str = "RRDCORE0001";
const SIGNATURE_CAPACITY: usize = 16;
const INFO_CAPACITY: usize = 128;

/// The header cell layout, in declaration order — this order is the
/// allocator's schema and must be identical between `bind` (create) and
/// `at_offsets` (open).
pub struct Header {
    signature: StringCell,
    step: IntCell,
    ds_count: IntCell,
    arc_count: IntCell,
    last_update: IntCell,
    info: StringCell,
}

impl Header {
    /// Allocate a fresh header's cells.
    pub fn bind(alloc: &mut Allocator) -> Self {
        Header {
            signature: StringCell::bind(alloc, SIGNATURE_CAPACITY),
            step: IntCell::bind(alloc),
            ds_count: IntCell::bind(alloc),
            arc_count: IntCell::bind(alloc),
            last_update: IntCell::bind(alloc),
            info: StringCell::bind(alloc, INFO_CAPACITY),
        }
    }

    /// Total on-disk width of the header, for computing where datasource
    /// cells begin.
    pub fn width() -> u64 {
        SIGNATURE_CAPACITY as u64 + 4 * IntCell::WIDTH + INFO_CAPACITY as u64
    }

    /// Write the initial state of a freshly created header.
    pub fn write_initial(
        &self,
        backend: &mut dyn Backend,
        step: i64,
        ds_count: i64,
        arc_count: i64,
        start_time: i64,
    ) -> Result<()> {
        self.signature.set(backend, SIGNATURE)?;
        self.step.set(backend, step)?;
        self.ds_count.set(backend, ds_count)?;
        self.arc_count.set(backend, arc_count)?;
        self.last_update.set(backend, start_time)?;
        self.info.set(backend, "")?;
        Ok(())
    }

    /// Confirm the on-disk signature matches this crate's format/version.
    pub fn validate_signature(&self, backend: &dyn Backend) -> Result<()> {
        let found = self.signature.get(backend)?;
        if found != SIGNATURE {
            return Err(RrdError::InvalidDefinition(format!(
                "unrecognized signature {:?}, expected {:?}",
                found, SIGNATURE
            )));
        }
        Ok(())
    }

    pub fn step(&self, backend: &dyn Backend) -> Result<i64> {
        self.step.get(backend)
    }

    pub fn ds_count(&self, backend: &dyn Backend) -> Result<i64> {
        self.ds_count.get(backend)
    }

    pub fn arc_count(&self, backend: &dyn Backend) -> Result<i64> {
        self.arc_count.get(backend)
    }

    pub fn last_update_time(&self, backend: &dyn Backend) -> Result<i64> {
        self.last_update.get(backend)
    }

    pub fn set_last_update_time(&self, backend: &mut dyn Backend, t: i64) -> Result<()> {
        self.last_update.set(backend, t)
    }

    pub fn info(&self, backend: &dyn Backend) -> Result<String> {
        self.info.get(backend)
    }

    pub fn set_info(&self, backend: &mut dyn Backend, info: &str) -> Result<()> {
        self.info.set(backend, info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn make() -> (Header, MemoryBackend) {
        let mut alloc = Allocator::new();
        let header = Header::bind(&mut alloc);
        let mut backend = MemoryBackend::new("mem://header");
        backend.set_length(alloc.total()).unwrap();
        header.write_initial(&mut backend, 300, 1, 1, 1000).unwrap();
        (header, backend)
    }

    #[test]
    fn initial_values_round_trip() {
        let (header, backend) = make();
        assert_eq!(header.step(&backend).unwrap(), 300);
        assert_eq!(header.ds_count(&backend).unwrap(), 1);
        assert_eq!(header.arc_count(&backend).unwrap(), 1);
        assert_eq!(header.last_update_time(&backend).unwrap(), 1000);
        assert_eq!(header.info(&backend).unwrap(), "");
    }

    #[test]
    fn signature_validates() {
        let (header, backend) = make();
        assert!(header.validate_signature(&backend).is_ok());
    }

    #[test]
    fn corrupted_signature_is_rejected() {
        let mut alloc = Allocator::new();
        let header = Header::bind(&mut alloc);
        let mut backend = MemoryBackend::new("mem://bad");
        backend.set_length(alloc.total()).unwrap();
        header.write_initial(&mut backend, 300, 1, 1, 0).unwrap();
        // Corrupt the signature by writing something else in its place.
        backend.write(0, b"NOT-AN-RRD\0\0\0\0\0\0").unwrap();
        assert!(header.validate_signature(&backend).is_err());
    }

    #[test]
    fn last_update_time_is_mutable_info_is_not_layout_affecting() {
        let (header, mut backend) = make();
        header.set_last_update_time(&mut backend, 1300).unwrap();
        assert_eq!(header.last_update_time(&backend).unwrap(), 1300);
        header.set_info(&mut backend, "hello").unwrap();
        assert_eq!(header.info(&backend).unwrap(), "hello");
    }
}
