// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The database: orchestrates the header, datasources and archives behind
//! a single-writer exclusive guard, and implements update/fetch/lifecycle.

use std::result;

use log::debug;
use parking_lot::Mutex;

use crate::allocator::Allocator;
use crate::archive::{Archive, ArchiveHeaderCells, ConsolidationFn};
use crate::backend::{default_factory, Backend};
use crate::datasource::{CounterWrapPolicy, Datasource, DsDef, DsType};
use crate::error::{RrdError, Result};
use crate::header::Header;
use crate::sample::{FetchData, FetchRequest, RrdDef, Sample};

/// Cached, read-only archive parameters that never change after creation,
/// kept out of the backend so selecting a fetch plan doesn't need a lock
/// round-trip per candidate.
struct ArchiveMeta {
    cf: ConsolidationFn,
    steps: u32,
    xff: f64,
}

struct Inner {
    backend: Box<dyn Backend>,
    closed: bool,
}

/// A round-robin database: a header, a fixed set of datasources, and a
/// fixed set of archives, all backed by one [`Backend`].
pub struct Database {
    inner: Mutex<Inner>,
    header: Header,
    datasources: Vec<Datasource>,
    ds_names: Vec<String>,
    wrap_policies: Vec<CounterWrapPolicy>,
    archives: Vec<Archive>,
    archive_meta: Vec<ArchiveMeta>,
    header_step: i64,
}

fn default_wrap_policy(ds_type: DsType) -> CounterWrapPolicy {
    match ds_type {
        DsType::Counter => CounterWrapPolicy::SixtyFourBit,
        _ => CounterWrapPolicy::Never,
    }
}

impl Database {
    /// Create a new database from `def`, using `backend` as its storage.
    pub fn create(def: &RrdDef, backend: Box<dyn Backend>) -> Result<Database> {
        def.validate()?;
        match Self::create_inner(def, backend) {
            Ok(db) => Ok(db),
            Err((mut backend, e)) => {
                let _ = backend.close();
                Err(e)
            }
        }
    }

    /// Create a new database via the process-wide default backend factory.
    pub fn create_with_default_backend(def: &RrdDef, uri: &str) -> Result<Database> {
        let factory = default_factory()
            .ok_or_else(|| RrdError::InvalidDefinition("no default backend factory configured".into()))?;
        let backend = factory.open(uri, false)?;
        Self::create(def, backend)
    }

    #[allow(clippy::type_complexity)]
    fn create_inner(def: &RrdDef, mut backend: Box<dyn Backend>) -> result::Result<Database, (Box<dyn Backend>, RrdError)> {
        let mut alloc = Allocator::new();
        let header = Header::bind(&mut alloc);
        let datasources: Vec<_> = def.ds_defs.iter().map(|_| Datasource::bind(&mut alloc)).collect();
        let archives: Vec<Archive> =
            def.arc_defs.iter().map(|a| Archive::bind(&mut alloc, def.ds_defs.len(), a.rows as usize)).collect();

        let result = (|| -> Result<Vec<ArchiveMeta>> {
            backend.set_length(alloc.total())?;
            header.write_initial(
                backend.as_mut(),
                def.step,
                def.ds_defs.len() as i64,
                def.arc_defs.len() as i64,
                def.start_time,
            )?;
            for (ds, ds_def) in datasources.iter().zip(&def.ds_defs) {
                ds.write_initial(backend.as_mut(), ds_def)?;
            }
            for (archive, arc_def) in archives.iter().zip(&def.arc_defs) {
                archive.write_initial(backend.as_mut(), arc_def)?;
            }
            archives
                .iter()
                .map(|archive| {
                    Ok(ArchiveMeta {
                        cf: archive.cf(backend.as_ref())?,
                        steps: archive.steps(backend.as_ref())?,
                        xff: archive.xff(backend.as_ref())?,
                    })
                })
                .collect()
        })();

        match result {
            Ok(archive_meta) => {
                let ds_names = def.ds_defs.iter().map(|d| d.name.clone()).collect();
                let wrap_policies = def.ds_defs.iter().map(|d| d.wrap_policy).collect();
                debug!(
                    "created rrd database uri={} step={} ds={} archives={}",
                    backend.uri(),
                    def.step,
                    datasources.len(),
                    archives.len()
                );
                Ok(Database {
                    inner: Mutex::new(Inner { backend, closed: false }),
                    header,
                    datasources,
                    ds_names,
                    wrap_policies,
                    archives,
                    archive_meta,
                    header_step: def.step,
                })
            }
            Err(e) => Err((backend, e)),
        }
    }

    /// Open an existing database. `validate_header` should come from
    /// `BackendFactory::should_validate_header`.
    pub fn open(backend: Box<dyn Backend>, validate_header: bool) -> Result<Database> {
        match Self::open_inner(backend, validate_header) {
            Ok(db) => Ok(db),
            Err((mut backend, e)) => {
                let _ = backend.close();
                Err(e)
            }
        }
    }

    /// Open an existing database via the process-wide default backend
    /// factory, looking up its URI first to surface `NotFound` up front.
    pub fn open_with_default_backend(uri: &str) -> Result<Database> {
        let factory = default_factory()
            .ok_or_else(|| RrdError::InvalidDefinition("no default backend factory configured".into()))?;
        if !factory.exists(uri) {
            return Err(RrdError::NotFound);
        }
        let backend = factory.open(uri, false)?;
        Self::open(backend, factory.should_validate_header(uri))
    }

    #[allow(clippy::type_complexity)]
    fn open_inner(
        mut backend: Box<dyn Backend>,
        validate_header: bool,
    ) -> result::Result<Database, (Box<dyn Backend>, RrdError)> {
        type Opened = (Header, Vec<Datasource>, Vec<Archive>, Vec<ArchiveMeta>, Vec<String>, Vec<CounterWrapPolicy>, i64);

        let result = (|| -> Result<Opened> {
            let mut alloc = Allocator::new();
            let header = Header::bind(&mut alloc);
            if validate_header {
                header.validate_signature(backend.as_ref())?;
            }
            let step = header.step(backend.as_ref())?;
            let ds_count = header.ds_count(backend.as_ref())? as usize;
            let arc_count = header.arc_count(backend.as_ref())? as usize;

            let datasources: Vec<_> = (0..ds_count).map(|_| Datasource::bind(&mut alloc)).collect();

            let mut archives = Vec::with_capacity(arc_count);
            let mut archive_meta = Vec::with_capacity(arc_count);
            for _ in 0..arc_count {
                let header_cells: ArchiveHeaderCells = Archive::bind_header(&mut alloc);
                let rows = header_cells.rows(backend.as_ref())?;
                let archive = Archive::bind_body(&mut alloc, header_cells, ds_count, rows as usize);
                archive_meta.push(ArchiveMeta {
                    cf: archive.cf(backend.as_ref())?,
                    steps: archive.steps(backend.as_ref())?,
                    xff: archive.xff(backend.as_ref())?,
                });
                archives.push(archive);
            }

            let mut ds_names = Vec::with_capacity(ds_count);
            let mut wrap_policies = Vec::with_capacity(ds_count);
            for ds in &datasources {
                ds_names.push(ds.name(backend.as_ref())?);
                wrap_policies.push(default_wrap_policy(ds.ds_type(backend.as_ref())?));
            }

            Ok((header, datasources, archives, archive_meta, ds_names, wrap_policies, step))
        })();

        match result {
            Ok((header, datasources, archives, archive_meta, ds_names, wrap_policies, step)) => {
                debug!(
                    "opened rrd database uri={} step={} ds={} archives={}",
                    backend.uri(),
                    step,
                    datasources.len(),
                    archives.len()
                );
                Ok(Database {
                    inner: Mutex::new(Inner { backend, closed: false }),
                    header,
                    datasources,
                    ds_names,
                    wrap_policies,
                    archives,
                    archive_meta,
                    header_step: step,
                })
            }
            Err(e) => Err((backend, e)),
        }
    }

    /// Feed one timestamped sample through every datasource's PDP pipeline
    /// and every archive's consolidation.
    pub fn update(&self, sample: &Sample) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(RrdError::Closed);
        }
        let backend = inner.backend.as_mut();

        let last_update = self.header.last_update_time(backend)?;
        if sample.time <= last_update {
            return Err(RrdError::InvalidTimestamp { given: sample.time, last_update });
        }

        for (i, ds) in self.datasources.iter().enumerate() {
            let name = &self.ds_names[i];
            let raw = sample.get(name).unwrap_or(f64::NAN);
            let windows = ds.process_sample(backend, name, self.wrap_policies[i], self.header_step, last_update, sample.time, raw)?;
            if windows.is_empty() {
                continue;
            }
            for (archive, meta) in self.archives.iter().zip(&self.archive_meta) {
                archive.archive_one_datasource(backend, i, meta.cf, meta.steps, meta.xff, &windows)?;
            }
        }

        self.header.set_last_update_time(backend, sample.time)?;
        debug!("update: t={} ds={}", sample.time, self.datasources.len());
        Ok(())
    }

    /// Select the best-matching archive for `req` and read its data back.
    pub fn fetch(&self, req: &FetchRequest) -> Result<FetchData> {
        let inner = self.inner.lock();
        if inner.closed {
            return Err(RrdError::Closed);
        }
        let backend = inner.backend.as_ref();
        let last_update = self.header.last_update_time(backend)?;

        struct Candidate {
            idx: usize,
            arc_step: i64,
            coverage_start: i64,
            end_time: i64,
            full: bool,
        }

        let mut candidates = Vec::new();
        for (idx, meta) in self.archive_meta.iter().enumerate() {
            if let Some(cf) = req.cf {
                if meta.cf != cf {
                    continue;
                }
            }
            let rows = self.archives[idx].rows(backend)?;
            let arc_step = self.header_step * meta.steps as i64;
            let end_time = Archive::end_time(last_update, arc_step);
            let coverage_start = end_time - rows as i64 * arc_step;
            candidates.push(Candidate { idx, arc_step, coverage_start, end_time, full: coverage_start <= req.start });
        }

        if candidates.is_empty() {
            return Err(RrdError::NoMatchingArchive);
        }

        // With no explicit resolution request, a bias toward 1 favors the
        // finest-grained archive among otherwise-tied candidates.
        let resolution = req.resolution.unwrap_or(1);

        let mut best_full: Option<&Candidate> = None;
        for c in candidates.iter().filter(|c| c.full) {
            let diff = (c.arc_step - resolution).abs();
            let replace = match best_full {
                None => true,
                Some(b) => diff < (b.arc_step - resolution).abs(),
            };
            if replace {
                best_full = Some(c);
            }
        }

        let chosen = if let Some(c) = best_full {
            c
        } else {
            let mut best: Option<&Candidate> = None;
            let mut best_coverage = i64::MIN;
            let mut best_diff = i64::MAX;
            for c in &candidates {
                let coverage = req.end - req.start.max(c.coverage_start);
                let diff = (c.arc_step - resolution).abs();
                let replace = best.is_none() || coverage > best_coverage || (coverage == best_coverage && diff < best_diff);
                if replace {
                    best = Some(c);
                    best_coverage = coverage;
                    best_diff = diff;
                }
            }
            match best {
                Some(c) => c,
                None => return Err(RrdError::NoMatchingArchive),
            }
        };

        let archive = &self.archives[chosen.idx];
        let rows = archive.rows(backend)?;
        let mut end_times = Vec::new();
        for k in (0..rows as i64).rev() {
            let t = chosen.end_time - k * chosen.arc_step;
            if t >= req.start && t <= req.end {
                end_times.push(t);
            }
        }

        let mut rows_out = Vec::with_capacity(end_times.len());
        for &t in &end_times {
            let mut row = Vec::with_capacity(self.ds_names.len());
            for ds_index in 0..self.ds_names.len() {
                let v = archive.read_row(backend, ds_index, self.header_step, last_update, t)?.unwrap_or(f64::NAN);
                row.push(v);
            }
            rows_out.push(row);
        }

        let start = end_times.first().map(|t| t - chosen.arc_step).unwrap_or(req.start);
        debug!("fetch: archive#{} arc_step={} rows={}", chosen.idx, chosen.arc_step, rows_out.len());

        Ok(FetchData { start, step: chosen.arc_step, ds_names: self.ds_names.clone(), rows: rows_out })
    }

    /// Reconstruct the definition this database was created with (plus its
    /// current `last_update_time` in place of the original `start_time`,
    /// which is not retained once the database is running).
    pub fn get_rrd_def(&self) -> Result<RrdDef> {
        let inner = self.inner.lock();
        if inner.closed {
            return Err(RrdError::Closed);
        }
        let backend = inner.backend.as_ref();

        let mut ds_defs = Vec::with_capacity(self.datasources.len());
        for (i, ds) in self.datasources.iter().enumerate() {
            ds_defs.push(DsDef {
                name: ds.name(backend)?,
                ds_type: ds.ds_type(backend)?,
                heartbeat: ds.heartbeat(backend)?,
                min: ds.min(backend)?,
                max: ds.max(backend)?,
                wrap_policy: self.wrap_policies[i],
            });
        }

        let mut arc_defs = Vec::with_capacity(self.archives.len());
        for archive in &self.archives {
            arc_defs.push(crate::archive::ArcDef::new(
                archive.cf(backend)?,
                archive.xff(backend)?,
                archive.steps(backend)?,
                archive.rows(backend)?,
            ));
        }

        Ok(RrdDef { start_time: self.header.last_update_time(backend)?, step: self.header_step, ds_defs, arc_defs })
    }

    /// Update the header's free-form info string.
    pub fn set_info(&self, info: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(RrdError::Closed);
        }
        self.header.set_info(inner.backend.as_mut(), info)
    }

    /// Read the entire backing store, for diagnostics/export.
    pub fn dump(&self) -> Result<Vec<u8>> {
        let inner = self.inner.lock();
        if inner.closed {
            return Err(RrdError::Closed);
        }
        inner.backend.read_all()
    }

    /// Copy this database's state into `target`: the header's
    /// `last_update_time` and info string unconditionally, per-datasource
    /// state matched by name, and per-archive state matched by
    /// `(cf, steps, rows)` — spec.md §4.7's "unmatched entities are skipped
    /// silently" rather than a raw structural-equality requirement, so
    /// archives declared in a different order (or an extra/missing
    /// datasource) copy whatever does line up.
    pub fn copy_state_to(&self, target: &Database) -> Result<()> {
        if self.header_step != target.header_step {
            return Err(RrdError::IncompatibleCopy);
        }
        let self_inner = self.inner.lock();
        if self_inner.closed {
            return Err(RrdError::Closed);
        }
        let mut target_inner = target.inner.lock();
        if target_inner.closed {
            return Err(RrdError::Closed);
        }

        let src = self_inner.backend.as_ref();
        let dst = target_inner.backend.as_mut();

        let last_update = self.header.last_update_time(src)?;
        let info = self.header.info(src)?;
        target.header.set_last_update_time(dst, last_update)?;
        target.header.set_info(dst, &info)?;

        let ds_map: Vec<(usize, usize)> = self
            .ds_names
            .iter()
            .enumerate()
            .filter_map(|(src_idx, name)| {
                target.ds_names.iter().position(|n| n == name).map(|dst_idx| (src_idx, dst_idx))
            })
            .collect();

        for &(src_idx, dst_idx) in &ds_map {
            let state = self.datasources[src_idx].state(src)?;
            target.datasources[dst_idx].set_state(dst, state)?;
        }

        for (src_arc_idx, src_meta) in self.archive_meta.iter().enumerate() {
            let dst_arc_idx = match target.archive_meta.iter().position(|m| m.cf == src_meta.cf && m.steps == src_meta.steps)
            {
                Some(i) => i,
                None => continue,
            };
            let src_archive = &self.archives[src_arc_idx];
            let dst_archive = &target.archives[dst_arc_idx];
            if src_archive.rows(src)? != dst_archive.rows(dst)? {
                continue;
            }
            for &(src_ds_idx, dst_ds_idx) in &ds_map {
                let snapshot = src_archive.snapshot_ds(src, src_ds_idx)?;
                dst_archive.restore_ds(dst, dst_ds_idx, &snapshot)?;
            }
            let write_ptr = src_archive.write_ptr(src)?;
            dst_archive.set_write_ptr(dst, write_ptr)?;
        }

        Ok(())
    }

    /// Close the database. Idempotent; every operation after this fails
    /// with `Closed`.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        inner.backend.close()?;
        inner.closed = true;
        debug!("closed rrd database");
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArcDef;
    use crate::backend::MemoryBackend;
    use crate::datasource::DsDef;

    fn def() -> RrdDef {
        RrdDef::new(1000, 300)
            .with_ds(DsDef::gauge("temp", 600, 0.0, 100.0))
            .with_archive(ArcDef::new(ConsolidationFn::Average, 0.5, 1, 10))
            .with_archive(ArcDef::new(ConsolidationFn::Max, 0.5, 2, 5))
    }

    fn create() -> Database {
        let _ = env_logger::try_init();
        let backend: Box<dyn Backend> = Box::new(MemoryBackend::new("mem://db"));
        Database::create(&def(), backend).unwrap()
    }

    #[test]
    fn scenario_round_trip_definition() {
        let db = create();
        let rrd_def = db.get_rrd_def().unwrap();
        assert_eq!(rrd_def.step, 300);
        assert_eq!(rrd_def.ds_defs.len(), 1);
        assert_eq!(rrd_def.ds_defs[0].name, "temp");
        assert_eq!(rrd_def.arc_defs.len(), 2);
    }

    #[test]
    fn scenario_monotonic_time_is_enforced() {
        let db = create();
        db.update(&Sample::new(1300).set("temp", 10.0)).unwrap();
        let err = db.update(&Sample::new(1300).set("temp", 20.0)).unwrap_err();
        assert!(matches!(err, RrdError::InvalidTimestamp { .. }));
        let err = db.update(&Sample::new(1200).set("temp", 20.0)).unwrap_err();
        assert!(matches!(err, RrdError::InvalidTimestamp { .. }));
    }

    #[test]
    fn scenario_update_then_fetch_round_trips_values() {
        // Mirrors spec.md's scenario 1 verbatim: step=300, one GAUGE
        // (heartbeat=600, min=0, max unknown), one AVERAGE archive
        // (steps=1, rows=10, xff=0.5). Updates at t=300/600/900 with
        // v=10/20/30; fetching [0, 900] at resolution=300 must yield
        // [NaN, 10, 20, 30] on timestamps aligned to 300 — the leading NaN
        // is the row ending at t=0, which is the archive's untouched
        // initial boundary rather than a consolidated sample.
        let def = RrdDef::new(0, 300)
            .with_ds(DsDef::gauge("temp", 600, 0.0, f64::NAN))
            .with_archive(ArcDef::new(ConsolidationFn::Average, 0.5, 1, 10));
        let backend: Box<dyn Backend> = Box::new(MemoryBackend::new("mem://scenario1"));
        let db = Database::create(&def, backend).unwrap();
        for (t, v) in [(300, 10.0), (600, 20.0), (900, 30.0)] {
            db.update(&Sample::new(t).set("temp", v)).unwrap();
        }
        let data = db.fetch(&FetchRequest::new(0, 900).with_cf(ConsolidationFn::Average).with_resolution(300)).unwrap();
        assert_eq!(data.step, 300);
        let series = data.get("temp").unwrap();
        assert_eq!(series.len(), 4);
        assert!(series[0].is_nan());
        assert_eq!(&series[1..], &[10.0, 20.0, 30.0]);
    }

    #[test]
    fn scenario_archive_selection_prefers_closest_resolution() {
        // spec.md §8 scenario 5: two AVERAGE archives, steps=1 rows=100 and
        // steps=6 rows=100; requesting resolution=60 must select the
        // steps=1 (arc_step=300) archive, the closer of the two to 60s,
        // deterministically across repeated calls.
        let def = RrdDef::new(0, 300)
            .with_ds(DsDef::gauge("temp", 600, 0.0, f64::NAN))
            .with_archive(ArcDef::new(ConsolidationFn::Average, 0.5, 1, 100))
            .with_archive(ArcDef::new(ConsolidationFn::Average, 0.5, 6, 100));
        let backend: Box<dyn Backend> = Box::new(MemoryBackend::new("mem://selection"));
        let db = Database::create(&def, backend).unwrap();
        for t in (300..=3600).step_by(300) {
            db.update(&Sample::new(t).set("temp", t as f64)).unwrap();
        }

        let req = FetchRequest::new(0, 3600).with_cf(ConsolidationFn::Average).with_resolution(60);
        let first = db.fetch(&req).unwrap();
        let second = db.fetch(&req).unwrap();
        assert_eq!(first.step, 300);
        assert_eq!(first.start, second.start);
        assert_eq!(first.ds_names, second.ds_names);
        assert_eq!(first.rows.len(), second.rows.len());
        for (a, b) in first.rows.iter().zip(second.rows.iter()) {
            assert_eq!(a.len(), b.len());
            for (x, y) in a.iter().zip(b.iter()) {
                assert!(x.is_nan() && y.is_nan() || x == y, "mismatched rows: {:?} vs {:?}", a, b);
            }
        }
    }

    #[test]
    fn scenario_fetch_with_no_matching_cf_fails() {
        let db = create();
        db.update(&Sample::new(1300).set("temp", 1.0)).unwrap();
        let err = db.fetch(&FetchRequest::new(1000, 1300).with_cf(ConsolidationFn::Min)).unwrap_err();
        assert!(matches!(err, RrdError::NoMatchingArchive));
    }

    #[test]
    fn scenario_closed_database_rejects_every_operation() {
        let db = create();
        db.close().unwrap();
        assert!(matches!(db.update(&Sample::new(1300).set("temp", 1.0)), Err(RrdError::Closed)));
        assert!(matches!(db.fetch(&FetchRequest::new(0, 100)), Err(RrdError::Closed)));
        assert!(matches!(db.get_rrd_def(), Err(RrdError::Closed)));
        assert!(matches!(db.set_info("x"), Err(RrdError::Closed)));
        assert!(matches!(db.dump(), Err(RrdError::Closed)));
        // close() itself stays idempotent.
        assert!(db.close().is_ok());
    }

    #[test]
    fn scenario_copy_state_to_matches_by_name_and_cf_steps() {
        let db = create();
        db.update(&Sample::new(1300).set("temp", 5.0)).unwrap();

        let target_backend: Box<dyn Backend> = Box::new(MemoryBackend::new("mem://target"));
        let target = Database::create(&def(), target_backend).unwrap();
        db.copy_state_to(&target).unwrap();
        assert_eq!(target.header.last_update_time(&*target.inner.lock().backend).unwrap(), 1300);

        let mismatched_backend: Box<dyn Backend> = Box::new(MemoryBackend::new("mem://mismatch"));
        let mismatched = Database::create(
            &RrdDef::new(0, 600)
                .with_ds(DsDef::gauge("other", 600, 0.0, 100.0))
                .with_archive(ArcDef::new(ConsolidationFn::Average, 0.5, 1, 10)),
            mismatched_backend,
        )
        .unwrap();
        assert!(matches!(db.copy_state_to(&mismatched), Err(RrdError::IncompatibleCopy)));
    }

    #[test]
    fn scenario_copy_state_to_matches_archives_out_of_declaration_order() {
        // spec.md §8 scenario 6: target declares the same archives in
        // reversed order; per-archive state must still transplant correctly
        // by (cf, steps), not by declaration position.
        let src_def = RrdDef::new(0, 300)
            .with_ds(DsDef::gauge("temp", 600, 0.0, f64::NAN))
            .with_archive(ArcDef::new(ConsolidationFn::Average, 0.5, 1, 10))
            .with_archive(ArcDef::new(ConsolidationFn::Max, 0.5, 2, 5));
        let src_backend: Box<dyn Backend> = Box::new(MemoryBackend::new("mem://copy-src"));
        let src = Database::create(&src_def, src_backend).unwrap();
        for (t, v) in [(300, 1.0), (600, 9.0), (900, 3.0), (1200, 7.0)] {
            src.update(&Sample::new(t).set("temp", v)).unwrap();
        }

        let dst_def = RrdDef::new(0, 300)
            .with_ds(DsDef::gauge("temp", 600, 0.0, f64::NAN))
            .with_archive(ArcDef::new(ConsolidationFn::Max, 0.5, 2, 5))
            .with_archive(ArcDef::new(ConsolidationFn::Average, 0.5, 1, 10));
        let dst_backend: Box<dyn Backend> = Box::new(MemoryBackend::new("mem://copy-dst"));
        let dst = Database::create(&dst_def, dst_backend).unwrap();

        src.copy_state_to(&dst).unwrap();

        let src_fetch = src.fetch(&FetchRequest::new(0, 1200).with_cf(ConsolidationFn::Max).with_resolution(600)).unwrap();
        let dst_fetch = dst.fetch(&FetchRequest::new(0, 1200).with_cf(ConsolidationFn::Max).with_resolution(600)).unwrap();
        assert_eq!(src_fetch.get("temp"), dst_fetch.get("temp"));

        let src_avg = src.fetch(&FetchRequest::new(0, 1200).with_cf(ConsolidationFn::Average).with_resolution(300)).unwrap();
        let dst_avg = dst.fetch(&FetchRequest::new(0, 1200).with_cf(ConsolidationFn::Average).with_resolution(300)).unwrap();
        assert_eq!(src_avg.get("temp"), dst_avg.get("temp"));
    }

    #[test]
    fn scenario_open_round_trips_an_existing_database() {
        let backend: Box<dyn Backend> = Box::new(MemoryBackend::new("mem://reopen"));
        let db = Database::create(&def(), backend).unwrap();
        db.update(&Sample::new(1300).set("temp", 7.0)).unwrap();
        let bytes = db.dump().unwrap();
        db.close().unwrap();

        let mut reopened_backend = MemoryBackend::new("mem://reopen");
        reopened_backend.set_length(bytes.len() as u64).unwrap();
        reopened_backend.write(0, &bytes).unwrap();
        let reopened = Database::open(Box::new(reopened_backend), false).unwrap();
        let rrd_def = reopened.get_rrd_def().unwrap();
        assert_eq!(rrd_def.ds_defs[0].name, "temp");
        assert_eq!(rrd_def.step, 300);
    }
}
