// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Archives: fixed-size ring buffers of consolidated data points (CDPs),
//! one per datasource, fed by the PDP windows a [`crate::datasource`]
//! produces.

use crate::allocator::Allocator;
use crate::backend::Backend;
use crate::cell::{DoubleArrayCell, DoubleCell, IntCell, StringCell};
use crate::datasource::PdpWindow;
use crate::error::{RrdError, Result};

const CF_CAPACITY: usize = 4;

/// How a run of PDPs within one consolidated row is folded into a single
/// value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsolidationFn {
    Average,
    Min,
    Max,
    Last,
    First,
    Total,
}

impl ConsolidationFn {
    fn tag(self) -> &'static str {
        match self {
            ConsolidationFn::Average => "AVRG",
            ConsolidationFn::Min => "MIN ",
            ConsolidationFn::Max => "MAX ",
            ConsolidationFn::Last => "LAST",
            ConsolidationFn::First => "FRST",
            ConsolidationFn::Total => "TOTL",
        }
    }

    fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "AVRG" => Ok(ConsolidationFn::Average),
            "MIN" => Ok(ConsolidationFn::Min),
            "MAX" => Ok(ConsolidationFn::Max),
            "LAST" => Ok(ConsolidationFn::Last),
            "FRST" => Ok(ConsolidationFn::First),
            "TOTL" => Ok(ConsolidationFn::Total),
            other => Err(RrdError::InvalidDefinition(format!("unknown consolidation function tag {:?}", other))),
        }
    }
}

/// The definition of an archive, as supplied at database creation.
#[derive(Clone, Copy, Debug)]
pub struct ArcDef {
    pub cf: ConsolidationFn,
    /// Number of PDP steps folded into one consolidated row.
    pub steps: u32,
    /// Number of rows kept in the ring buffer.
    pub rows: u32,
    /// Fraction of unknown PDPs within a row beyond which the row itself
    /// becomes unknown, regardless of `cf`.
    pub xff: f64,
}

impl ArcDef {
    pub fn new(cf: ConsolidationFn, xff: f64, steps: u32, rows: u32) -> Self {
        ArcDef { cf, steps, rows, xff }
    }

    pub fn validate(&self) -> Result<()> {
        if self.steps == 0 {
            return Err(RrdError::InvalidDefinition("archive steps must be positive".into()));
        }
        if self.rows == 0 {
            return Err(RrdError::InvalidDefinition("archive rows must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.xff) {
            return Err(RrdError::InvalidDefinition(format!("archive xff {} must be in [0, 1)", self.xff)));
        }
        Ok(())
    }
}

/// Per-datasource mutable accumulator and ring buffer within one archive.
struct ArchiveDsState {
    robin: DoubleArrayCell,
    accumulator: DoubleCell,
    first_value: DoubleCell,
    pdps_so_far: IntCell,
    unknown_pdps: IntCell,
}

/// The archive cells shared across all its datasources. Bound on its own
/// when opening an existing database, since `rows` must be read back
/// before the per-datasource cells (whose size depends on it) can be
/// allocated.
pub struct ArchiveHeaderCells {
    cf: StringCell,
    steps: IntCell,
    rows: IntCell,
    xff: DoubleCell,
    write_ptr: IntCell,
}

impl ArchiveHeaderCells {
    pub fn bind(alloc: &mut Allocator) -> Self {
        ArchiveHeaderCells {
            cf: StringCell::bind(alloc, CF_CAPACITY),
            steps: IntCell::bind(alloc),
            rows: IntCell::bind(alloc),
            xff: DoubleCell::bind(alloc),
            write_ptr: IntCell::bind(alloc),
        }
    }

    pub fn rows(&self, backend: &dyn Backend) -> Result<u32> {
        Ok(self.rows.get(backend)? as u32)
    }
}

/// One archive: shared consolidation parameters plus one ring buffer and
/// accumulator per datasource.
pub struct Archive {
    header: ArchiveHeaderCells,
    per_ds: Vec<ArchiveDsState>,
}

impl Archive {
    /// Allocate a fresh archive's cells: the shared header fields, then one
    /// `(robin, accumulator, first_value, pdps_so_far, unknown_pdps)` group
    /// per datasource, in datasource order. Used when `rows` is already
    /// known from an `ArcDef` at creation time.
    pub fn bind(alloc: &mut Allocator, ds_count: usize, rows: usize) -> Self {
        let header = ArchiveHeaderCells::bind(alloc);
        Archive::bind_body(alloc, header, ds_count, rows)
    }

    /// Allocate only the shared header cells; pair with [`Archive::bind_body`]
    /// once `rows` has been read back from the backend.
    pub fn bind_header(alloc: &mut Allocator) -> ArchiveHeaderCells {
        ArchiveHeaderCells::bind(alloc)
    }

    /// Allocate the per-datasource cells following a header bound via
    /// [`Archive::bind_header`].
    pub fn bind_body(alloc: &mut Allocator, header: ArchiveHeaderCells, ds_count: usize, rows: usize) -> Self {
        let per_ds = (0..ds_count)
            .map(|_| ArchiveDsState {
                robin: DoubleArrayCell::bind(alloc, rows),
                accumulator: DoubleCell::bind(alloc),
                first_value: DoubleCell::bind(alloc),
                pdps_so_far: IntCell::bind(alloc),
                unknown_pdps: IntCell::bind(alloc),
            })
            .collect();
        Archive { header, per_ds }
    }

    pub fn width(ds_count: usize, rows: usize) -> u64 {
        let header_width = CF_CAPACITY as u64 + 3 * IntCell::WIDTH + DoubleCell::WIDTH;
        let per_ds_width = rows as u64 * 8 + 2 * DoubleCell::WIDTH + 2 * IntCell::WIDTH;
        header_width + ds_count as u64 * per_ds_width
    }

    pub fn write_initial(&self, backend: &mut dyn Backend, def: &ArcDef) -> Result<()> {
        self.header.cf.set(backend, def.cf.tag())?;
        self.header.steps.set(backend, def.steps as i64)?;
        self.header.rows.set(backend, def.rows as i64)?;
        self.header.xff.set(backend, def.xff)?;
        self.header.write_ptr.set(backend, -1)?;
        for ds in &self.per_ds {
            for i in 0..ds.robin.len() {
                ds.robin.set(backend, i, f64::NAN)?;
            }
            ds.accumulator.set(backend, initial_accumulator(def.cf))?;
            ds.first_value.set(backend, f64::NAN)?;
            ds.pdps_so_far.set(backend, 0)?;
            ds.unknown_pdps.set(backend, 0)?;
        }
        Ok(())
    }

    pub fn cf(&self, backend: &dyn Backend) -> Result<ConsolidationFn> {
        ConsolidationFn::from_tag(self.header.cf.get(backend)?.trim_end())
    }

    pub fn steps(&self, backend: &dyn Backend) -> Result<u32> {
        Ok(self.header.steps.get(backend)? as u32)
    }

    pub fn rows(&self, backend: &dyn Backend) -> Result<u32> {
        self.header.rows(backend)
    }

    pub fn xff(&self, backend: &dyn Backend) -> Result<f64> {
        self.header.xff.get(backend)
    }

    /// The archive's step width in seconds: `header.step * self.steps`.
    pub fn arc_step(&self, backend: &dyn Backend, header_step: i64) -> Result<i64> {
        Ok(header_step * self.steps(backend)? as i64)
    }

    /// The end time of the most recently consolidated row, derived from
    /// `last_update` rather than stored on disk.
    pub fn end_time(last_update: i64, arc_step: i64) -> i64 {
        last_update.div_euclid(arc_step) * arc_step
    }

    /// The start time of the oldest row still held in the ring buffer.
    pub fn start_time(last_update: i64, arc_step: i64, rows: u32) -> i64 {
        Archive::end_time(last_update, arc_step) - (rows as i64 - 1) * arc_step
    }

    /// Physical ring-buffer index of the row whose end time is `end_time`,
    /// given the physical index of the most recently written row.
    fn physical_index(write_ptr_phys: i64, rows: u32, steps_back: i64) -> usize {
        let rows = rows as i64;
        (((write_ptr_phys - steps_back) % rows + rows) % rows) as usize
    }

    /// Read the row ending at `end_time` for datasource `ds_index`, or
    /// `None` if `end_time` falls outside the archive's retained window.
    pub fn read_row(
        &self,
        backend: &dyn Backend,
        ds_index: usize,
        header_step: i64,
        last_update: i64,
        end_time: i64,
    ) -> Result<Option<f64>> {
        let rows = self.rows(backend)?;
        let arc_step = self.arc_step(backend, header_step)?;
        let newest = Archive::end_time(last_update, arc_step);
        let oldest = newest - (rows as i64 - 1) * arc_step;
        if end_time < oldest || end_time > newest || (newest - end_time) % arc_step != 0 {
            return Ok(None);
        }
        let write_ptr = self.header.write_ptr.get(backend)?;
        if write_ptr < 0 {
            return Ok(None);
        }
        let steps_back = (newest - end_time) / arc_step;
        let idx = Archive::physical_index(write_ptr, rows, steps_back);
        Ok(Some(self.per_ds[ds_index].robin.get(backend, idx)?))
    }

    /// Fold a run of `windows` produced by one datasource's PDP pipeline
    /// into this archive's ring buffer, writing every row the run
    /// completes.
    pub fn archive_one_datasource(
        &self,
        backend: &mut dyn Backend,
        ds_index: usize,
        cf: ConsolidationFn,
        steps: u32,
        xff: f64,
        windows: &[PdpWindow],
    ) -> Result<()> {
        let state = &self.per_ds[ds_index];
        let mut accumulator = state.accumulator.get(backend)?;
        let mut first_value = state.first_value.get(backend)?;
        let mut pdps_so_far = state.pdps_so_far.get(backend)? as u64;
        let mut unknown_pdps = state.unknown_pdps.get(backend)? as u64;

        for window in windows {
            let mut remaining = window.count;
            while remaining > 0 {
                let take = remaining.min(steps as u64 - pdps_so_far);
                accumulate(cf, &mut accumulator, &mut first_value, window.value, take);
                if window.value.is_nan() {
                    unknown_pdps += take;
                }
                pdps_so_far += take;
                remaining -= take;

                if pdps_so_far == steps as u64 {
                    let row_value = finalize(cf, accumulator, first_value, pdps_so_far, unknown_pdps, steps, xff);
                    self.push_row(backend, ds_index, row_value)?;
                    accumulator = initial_accumulator(cf);
                    first_value = f64::NAN;
                    pdps_so_far = 0;
                    unknown_pdps = 0;
                }
            }
        }

        let state = &self.per_ds[ds_index];
        state.accumulator.set(backend, accumulator)?;
        state.first_value.set(backend, first_value)?;
        state.pdps_so_far.set(backend, pdps_so_far as i64)?;
        state.unknown_pdps.set(backend, unknown_pdps as i64)?;
        Ok(())
    }

    /// The physical write-pointer position (an index into each `robin`, or
    /// -1 before the first row is ever written).
    pub fn write_ptr(&self, backend: &dyn Backend) -> Result<i64> {
        self.header.write_ptr.get(backend)
    }

    pub fn set_write_ptr(&self, backend: &mut dyn Backend, write_ptr: i64) -> Result<()> {
        self.header.write_ptr.set(backend, write_ptr)
    }

    /// Snapshot one datasource's consolidation state (ring contents plus
    /// in-progress accumulator), used to transplant state between archives
    /// matched by `(cf, steps, rows)` in `Database::copy_state_to`.
    pub fn snapshot_ds(&self, backend: &dyn Backend, ds_index: usize) -> Result<ArchiveDsSnapshot> {
        let state = &self.per_ds[ds_index];
        let mut robin = Vec::with_capacity(state.robin.len());
        for i in 0..state.robin.len() {
            robin.push(state.robin.get(backend, i)?);
        }
        Ok(ArchiveDsSnapshot {
            robin,
            accumulator: state.accumulator.get(backend)?,
            first_value: state.first_value.get(backend)?,
            pdps_so_far: state.pdps_so_far.get(backend)?,
            unknown_pdps: state.unknown_pdps.get(backend)?,
        })
    }

    /// Restore a snapshot taken by [`Archive::snapshot_ds`]. `snapshot.robin`
    /// must be exactly `rows` elements long.
    pub fn restore_ds(&self, backend: &mut dyn Backend, ds_index: usize, snapshot: &ArchiveDsSnapshot) -> Result<()> {
        let state = &self.per_ds[ds_index];
        debug_assert_eq!(snapshot.robin.len(), state.robin.len());
        for (i, &v) in snapshot.robin.iter().enumerate() {
            state.robin.set(backend, i, v)?;
        }
        state.accumulator.set(backend, snapshot.accumulator)?;
        state.first_value.set(backend, snapshot.first_value)?;
        state.pdps_so_far.set(backend, snapshot.pdps_so_far)?;
        state.unknown_pdps.set(backend, snapshot.unknown_pdps)?;
        Ok(())
    }

    fn push_row(&self, backend: &mut dyn Backend, ds_index: usize, value: f64) -> Result<()> {
        let rows = self.rows(backend)?;
        let write_ptr = self.header.write_ptr.get(backend)?;
        let next = if write_ptr < 0 { 0 } else { (write_ptr + 1) % rows as i64 };
        self.per_ds[ds_index].robin.set(backend, next as usize, value)?;
        // Every datasource in an archive shares one write pointer: they're
        // all folded from the same header step and advance in lockstep.
        if ds_index == self.per_ds.len() - 1 {
            self.header.write_ptr.set(backend, next)?;
        }
        Ok(())
    }
}

/// One datasource's full consolidation state within an archive, read back
/// as a value so it can be copied into a structurally matching archive on
/// another database. See [`Archive::snapshot_ds`]/[`Archive::restore_ds`].
#[derive(Clone, Debug)]
pub struct ArchiveDsSnapshot {
    /// Ring contents in raw physical-index order (not chronological).
    pub robin: Vec<f64>,
    pub accumulator: f64,
    pub first_value: f64,
    pub pdps_so_far: i64,
    pub unknown_pdps: i64,
}

fn initial_accumulator(cf: ConsolidationFn) -> f64 {
    match cf {
        ConsolidationFn::Average | ConsolidationFn::Total => 0.0,
        ConsolidationFn::Min => f64::INFINITY,
        ConsolidationFn::Max => f64::NEG_INFINITY,
        ConsolidationFn::Last | ConsolidationFn::First => f64::NAN,
    }
}

/// Fold `take` repetitions of `value` (a PDP run) into `accumulator`.
fn accumulate(cf: ConsolidationFn, accumulator: &mut f64, first_value: &mut f64, value: f64, take: u64) {
    if value.is_nan() {
        return;
    }
    match cf {
        ConsolidationFn::Average | ConsolidationFn::Total => {
            *accumulator += value * take as f64;
        }
        ConsolidationFn::Min => {
            *accumulator = accumulator.min(value);
        }
        ConsolidationFn::Max => {
            *accumulator = accumulator.max(value);
        }
        ConsolidationFn::Last => {
            *accumulator = value;
        }
        ConsolidationFn::First => {
            if first_value.is_nan() {
                *first_value = value;
            }
        }
    }
}

fn finalize(
    cf: ConsolidationFn,
    accumulator: f64,
    first_value: f64,
    pdps_so_far: u64,
    unknown_pdps: u64,
    steps: u32,
    xff: f64,
) -> f64 {
    if unknown_pdps as f64 / steps as f64 >= xff {
        return f64::NAN;
    }
    let known = pdps_so_far - unknown_pdps;
    match cf {
        ConsolidationFn::Average => {
            if known == 0 {
                f64::NAN
            } else {
                accumulator / known as f64
            }
        }
        ConsolidationFn::Total => accumulator,
        ConsolidationFn::Min | ConsolidationFn::Max => {
            if known == 0 {
                f64::NAN
            } else {
                accumulator
            }
        }
        ConsolidationFn::Last => accumulator,
        ConsolidationFn::First => first_value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn make(def: &ArcDef, ds_count: usize) -> (Archive, MemoryBackend) {
        let mut alloc = Allocator::new();
        let archive = Archive::bind(&mut alloc, ds_count, def.rows as usize);
        let mut backend = MemoryBackend::new("mem://archive");
        backend.set_length(alloc.total()).unwrap();
        archive.write_initial(&mut backend, def).unwrap();
        (archive, backend)
    }

    #[test]
    fn average_consolidation_over_two_steps() {
        let def = ArcDef::new(ConsolidationFn::Average, 0.5, 2, 3);
        let (archive, mut backend) = make(&def, 1);
        let windows = vec![PdpWindow { end_time: 300, value: 10.0, count: 2 }];
        archive.archive_one_datasource(&mut backend, 0, def.cf, def.steps, def.xff, &windows).unwrap();
        let value = archive.read_row(&backend, 0, 150, 300, 300).unwrap();
        assert_eq!(value, Some(10.0));
    }

    #[test]
    fn xff_rule_blanks_row_with_too_many_unknowns() {
        let def = ArcDef::new(ConsolidationFn::Average, 0.5, 4, 3);
        let (archive, mut backend) = make(&def, 1);
        let windows = vec![
            PdpWindow { end_time: 300, value: f64::NAN, count: 3 },
            PdpWindow { end_time: 400, value: 10.0, count: 1 },
        ];
        archive.archive_one_datasource(&mut backend, 0, def.cf, def.steps, def.xff, &windows).unwrap();
        let value = archive.read_row(&backend, 0, 100, 400, 400).unwrap().unwrap();
        assert!(value.is_nan());
    }

    #[test]
    fn ring_buffer_wraps_after_capacity() {
        let def = ArcDef::new(ConsolidationFn::Last, 0.5, 1, 2);
        let (archive, mut backend) = make(&def, 1);
        for (end_time, value) in [(100, 1.0), (200, 2.0), (300, 3.0)] {
            let windows = vec![PdpWindow { end_time, value, count: 1 }];
            archive.archive_one_datasource(&mut backend, 0, def.cf, def.steps, def.xff, &windows).unwrap();
        }
        // Only the last 2 rows (200, 300) remain; row 100 has been evicted.
        assert_eq!(archive.read_row(&backend, 0, 100, 300, 300).unwrap(), Some(3.0));
        assert_eq!(archive.read_row(&backend, 0, 100, 300, 200).unwrap(), Some(2.0));
        assert_eq!(archive.read_row(&backend, 0, 100, 300, 100).unwrap(), None);
    }

    #[test]
    fn first_consolidation_captures_first_non_nan_pdp_in_window() {
        let def = ArcDef::new(ConsolidationFn::First, 0.9, 2, 2);
        let (archive, mut backend) = make(&def, 1);
        let windows = vec![
            PdpWindow { end_time: 100, value: f64::NAN, count: 1 },
            PdpWindow { end_time: 200, value: 5.0, count: 1 },
        ];
        archive.archive_one_datasource(&mut backend, 0, def.cf, def.steps, def.xff, &windows).unwrap();
        let value = archive.read_row(&backend, 0, 100, 200, 200).unwrap().unwrap();
        assert_eq!(value, 5.0);
    }

    #[test]
    fn min_and_max_track_extremes_within_a_row() {
        let def = ArcDef::new(ConsolidationFn::Min, 0.5, 3, 2);
        let (archive, mut backend) = make(&def, 1);
        let windows = vec![
            PdpWindow { end_time: 100, value: 5.0, count: 1 },
            PdpWindow { end_time: 200, value: 1.0, count: 1 },
            PdpWindow { end_time: 300, value: 9.0, count: 1 },
        ];
        archive.archive_one_datasource(&mut backend, 0, def.cf, def.steps, def.xff, &windows).unwrap();
        assert_eq!(archive.read_row(&backend, 0, 100, 300, 300).unwrap(), Some(1.0));
    }
}
