// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Value objects exchanged across the database boundary: samples, fetch
//! requests/results, and the definition used to create a new database.

use crate::archive::ArcDef;
use crate::datasource::DsDef;
use crate::error::{RrdError, Result};

/// One timestamped update, covering every datasource by name.
#[derive(Clone, Debug)]
pub struct Sample {
    pub time: i64,
    pub values: Vec<(String, f64)>,
}

impl Sample {
    pub fn new(time: i64) -> Self {
        Sample { time, values: Vec::new() }
    }

    pub fn set(mut self, ds_name: impl Into<String>, value: f64) -> Self {
        self.values.push((ds_name.into(), value));
        self
    }

    pub fn get(&self, ds_name: &str) -> Option<f64> {
        self.values.iter().find(|(name, _)| name == ds_name).map(|(_, v)| *v)
    }
}

/// A request to read a time range back out of a database.
#[derive(Clone, Debug)]
pub struct FetchRequest {
    pub start: i64,
    pub end: i64,
    /// If set, only this archive's consolidation function is eligible;
    /// otherwise the best-matching archive of any function is selected.
    pub cf: Option<crate::archive::ConsolidationFn>,
    /// If set, prefer the coarsest archive whose step divides this value;
    /// otherwise the finest archive covering the range is selected.
    pub resolution: Option<i64>,
}

impl FetchRequest {
    pub fn new(start: i64, end: i64) -> Self {
        FetchRequest { start, end, cf: None, resolution: None }
    }

    pub fn with_cf(mut self, cf: crate::archive::ConsolidationFn) -> Self {
        self.cf = Some(cf);
        self
    }

    pub fn with_resolution(mut self, resolution: i64) -> Self {
        self.resolution = Some(resolution);
        self
    }
}

/// The result of a fetch: one row per consolidated step, in ascending time
/// order, with every datasource's value for that row.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchData {
    pub start: i64,
    pub step: i64,
    pub ds_names: Vec<String>,
    /// `rows[i]` holds `ds_names.len()` values for the row ending at
    /// `start + (i + 1) * step`.
    pub rows: Vec<Vec<f64>>,
}

impl FetchData {
    /// The series for a single datasource, by name.
    pub fn get(&self, ds_name: &str) -> Option<Vec<f64>> {
        let index = self.ds_names.iter().position(|n| n == ds_name)?;
        Some(self.rows.iter().map(|row| row[index]).collect())
    }
}

/// The definition of a new database: its step and the datasources and
/// archives it will hold.
#[derive(Clone, Debug, Default)]
pub struct RrdDef {
    pub start_time: i64,
    pub step: i64,
    pub ds_defs: Vec<DsDef>,
    pub arc_defs: Vec<ArcDef>,
}

impl RrdDef {
    pub fn new(start_time: i64, step: i64) -> Self {
        RrdDef { start_time, step, ds_defs: Vec::new(), arc_defs: Vec::new() }
    }

    pub fn with_ds(mut self, ds: DsDef) -> Self {
        self.ds_defs.push(ds);
        self
    }

    pub fn with_archive(mut self, arc: ArcDef) -> Self {
        self.arc_defs.push(arc);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.step <= 0 {
            return Err(RrdError::InvalidDefinition(format!("step must be positive, got {}", self.step)));
        }
        if self.ds_defs.is_empty() {
            return Err(RrdError::InvalidDefinition("at least one datasource is required".into()));
        }
        if self.arc_defs.is_empty() {
            return Err(RrdError::InvalidDefinition("at least one archive is required".into()));
        }
        for ds in &self.ds_defs {
            ds.validate()?;
        }
        let mut seen = std::collections::HashSet::new();
        for ds in &self.ds_defs {
            if !seen.insert(ds.name.as_str()) {
                return Err(RrdError::InvalidDefinition(format!("duplicate datasource name {:?}", ds.name)));
            }
        }
        for arc in &self.arc_defs {
            arc.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ConsolidationFn;

    #[test]
    fn sample_looks_up_values_by_name() {
        let sample = Sample::new(100).set("temp", 10.0).set("humidity", 50.0);
        assert_eq!(sample.get("temp"), Some(10.0));
        assert_eq!(sample.get("missing"), None);
    }

    #[test]
    fn rrd_def_rejects_duplicate_ds_names() {
        let def = RrdDef::new(0, 300)
            .with_ds(DsDef::gauge("temp", 600, 0.0, f64::NAN))
            .with_ds(DsDef::gauge("temp", 600, 0.0, f64::NAN))
            .with_archive(ArcDef::new(ConsolidationFn::Average, 0.5, 1, 100));
        assert!(def.validate().is_err());
    }

    #[test]
    fn rrd_def_requires_at_least_one_ds_and_archive() {
        assert!(RrdDef::new(0, 300).validate().is_err());
        let with_ds_only = RrdDef::new(0, 300).with_ds(DsDef::gauge("temp", 600, 0.0, f64::NAN));
        assert!(with_ds_only.validate().is_err());
    }

    #[test]
    fn fetch_data_extracts_a_single_series() {
        let data = FetchData {
            start: 0,
            step: 300,
            ds_names: vec!["a".into(), "b".into()],
            rows: vec![vec![1.0, 2.0], vec![3.0, 4.0]],
        };
        assert_eq!(data.get("b"), Some(vec![2.0, 4.0]));
        assert_eq!(data.get("missing"), None);
    }
}
