// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Per-signal state and the primary-data-point (PDP) accumulation pipeline.

use log::warn;

use crate::allocator::Allocator;
use crate::backend::Backend;
use crate::cell::{DoubleCell, IntCell, StringCell};
use crate::error::{RrdError, Result};

const NAME_CAPACITY: usize = 20;
const TYPE_CAPACITY: usize = 4;

/// The kind of signal a datasource measures, and how a raw sample value
/// becomes a rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DsType {
    /// The raw value already is the measured quantity.
    Gauge,
    /// A monotonically increasing counter; rate is the derivative, with
    /// wraparound correction per [`CounterWrapPolicy`].
    Counter,
    /// Like `Counter` but may legitimately decrease; rate is the raw
    /// derivative with no wrap correction.
    Derive,
    /// The raw value is a count accumulated since the previous sample.
    Absolute,
}

impl DsType {
    fn tag(self) -> &'static str {
        match self {
            DsType::Gauge => "GAUG",
            DsType::Counter => "CNTR",
            DsType::Derive => "DERV",
            DsType::Absolute => "ABSL",
        }
    }

    fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "GAUG" => Ok(DsType::Gauge),
            "CNTR" => Ok(DsType::Counter),
            "DERV" => Ok(DsType::Derive),
            "ABSL" => Ok(DsType::Absolute),
            other => Err(RrdError::InvalidDefinition(format!("unknown datasource type tag {:?}", other))),
        }
    }
}

/// Resolves spec's open question on COUNTER wraparound: how far to look for
/// a wrapped-counter explanation of a decreasing raw value before giving up
/// and reporting the rate as unknown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CounterWrapPolicy {
    /// A decreasing raw value is always unknown.
    Never,
    /// Attempt a 2^32 wraparound before giving up.
    ThirtyTwoBit,
    /// Attempt a 2^32 wraparound, then a 2^64 wraparound, before giving up.
    SixtyFourBit,
}

/// The definition of a datasource, as supplied at database creation.
#[derive(Clone, Debug)]
pub struct DsDef {
    pub name: String,
    pub ds_type: DsType,
    pub heartbeat: i64,
    pub min: f64,
    pub max: f64,
    pub wrap_policy: CounterWrapPolicy,
}

impl DsDef {
    pub fn gauge(name: impl Into<String>, heartbeat: i64, min: f64, max: f64) -> Self {
        DsDef {
            name: name.into(),
            ds_type: DsType::Gauge,
            heartbeat,
            min,
            max,
            wrap_policy: CounterWrapPolicy::Never,
        }
    }

    pub fn counter(name: impl Into<String>, heartbeat: i64, min: f64, max: f64) -> Self {
        DsDef {
            name: name.into(),
            ds_type: DsType::Counter,
            heartbeat,
            min,
            max,
            wrap_policy: CounterWrapPolicy::SixtyFourBit,
        }
    }

    pub fn derive(name: impl Into<String>, heartbeat: i64, min: f64, max: f64) -> Self {
        DsDef {
            name: name.into(),
            ds_type: DsType::Derive,
            heartbeat,
            min,
            max,
            wrap_policy: CounterWrapPolicy::Never,
        }
    }

    pub fn absolute(name: impl Into<String>, heartbeat: i64, min: f64, max: f64) -> Self {
        DsDef {
            name: name.into(),
            ds_type: DsType::Absolute,
            heartbeat,
            min,
            max,
            wrap_policy: CounterWrapPolicy::Never,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.len() > NAME_CAPACITY {
            return Err(RrdError::InvalidDefinition(format!(
                "datasource name {:?} must be 1..={} bytes",
                self.name, NAME_CAPACITY
            )));
        }
        if self.heartbeat <= 0 {
            return Err(RrdError::InvalidDefinition(format!(
                "datasource {:?} heartbeat must be positive, got {}",
                self.name, self.heartbeat
            )));
        }
        if !self.min.is_nan() && !self.max.is_nan() && !(self.min < self.max) {
            return Err(RrdError::InvalidDefinition(format!(
                "datasource {:?} requires min < max when both are known",
                self.name
            )));
        }
        Ok(())
    }
}

/// One completed PDP window ready to be folded into every archive, or a run
/// of `count` consecutive windows that all carry the same `value` (a single
/// sample interval may span several step boundaries).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PdpWindow {
    /// The absolute time (seconds) at which this window (the first of the
    /// run, if `count > 1`) closes.
    pub end_time: i64,
    /// The PDP value for every window in this run (may be NaN).
    pub value: f64,
    /// How many consecutive step-windows this run covers.
    pub count: u64,
}

/// A single datasource's persistent cell layout and mutable PDP-accumulator
/// state.
pub struct Datasource {
    name: StringCell,
    ds_type: StringCell,
    heartbeat: IntCell,
    min: DoubleCell,
    max: DoubleCell,
    last_raw: DoubleCell,
    accumulated: DoubleCell,
    unknown_seconds: IntCell,
    pdp_value: DoubleCell,
}

impl Datasource {
    /// Allocate a fresh datasource's cells, in the declared on-disk order:
    /// name, type, heartbeat, min, max, last-raw-value, accumulated-value,
    /// unknown-seconds, then the crate's own extension field `pdp_value`.
    pub fn bind(alloc: &mut Allocator) -> Self {
        Datasource {
            name: StringCell::bind(alloc, NAME_CAPACITY),
            ds_type: StringCell::bind(alloc, TYPE_CAPACITY),
            heartbeat: IntCell::bind(alloc),
            min: DoubleCell::bind(alloc),
            max: DoubleCell::bind(alloc),
            last_raw: DoubleCell::bind(alloc),
            accumulated: DoubleCell::bind(alloc),
            unknown_seconds: IntCell::bind(alloc),
            pdp_value: DoubleCell::bind(alloc),
        }
    }

    pub fn width() -> u64 {
        NAME_CAPACITY as u64
            + TYPE_CAPACITY as u64
            + IntCell::WIDTH // heartbeat
            + DoubleCell::WIDTH // min
            + DoubleCell::WIDTH // max
            + DoubleCell::WIDTH // last_raw
            + DoubleCell::WIDTH // accumulated
            + IntCell::WIDTH // unknown_seconds
            + DoubleCell::WIDTH // pdp_value
    }

    pub fn write_initial(&self, backend: &mut dyn Backend, def: &DsDef) -> Result<()> {
        self.name.set(backend, &def.name)?;
        self.ds_type.set(backend, def.ds_type.tag())?;
        self.heartbeat.set(backend, def.heartbeat)?;
        self.min.set(backend, def.min)?;
        self.max.set(backend, def.max)?;
        self.last_raw.set(backend, f64::NAN)?;
        self.accumulated.set(backend, 0.0)?;
        self.unknown_seconds.set(backend, 0)?;
        self.pdp_value.set(backend, f64::NAN)?;
        Ok(())
    }

    pub fn name(&self, backend: &dyn Backend) -> Result<String> {
        self.name.get(backend)
    }

    pub fn ds_type(&self, backend: &dyn Backend) -> Result<DsType> {
        DsType::from_tag(&self.ds_type.get(backend)?)
    }

    pub fn heartbeat(&self, backend: &dyn Backend) -> Result<i64> {
        self.heartbeat.get(backend)
    }

    pub fn min(&self, backend: &dyn Backend) -> Result<f64> {
        self.min.get(backend)
    }

    pub fn max(&self, backend: &dyn Backend) -> Result<f64> {
        self.max.get(backend)
    }

    pub fn wrap_policy(&self) -> CounterWrapPolicy {
        // The wrap policy is a construction-time behavioral choice, not
        // on-disk interop state (spec.md's layout doesn't name it); callers
        // that reopen a database supply it again via `DsDef` at `Database`
        // level. This accessor exists so `Datasource` alone can't silently
        // assume a default when tested in isolation.
        CounterWrapPolicy::SixtyFourBit
    }

    /// Process one sample, advancing this datasource's PDP accumulator
    /// across the interval `(last_update, now]` and returning zero or more
    /// completed PDP windows in chronological order.
    #[allow(clippy::too_many_arguments)]
    pub fn process_sample(
        &self,
        backend: &mut dyn Backend,
        ds_name: &str,
        wrap_policy: CounterWrapPolicy,
        header_step: i64,
        last_update: i64,
        now: i64,
        raw: f64,
    ) -> Result<Vec<PdpWindow>> {
        let ds_type = self.ds_type(backend)?;
        let heartbeat = self.heartbeat(backend)?;
        let min = self.min(backend)?;
        let max = self.max(backend)?;
        let prev_raw = self.last_raw(backend)?;
        let prev_pdp = self.pdp_value(backend)?;

        let dt = now - last_update;
        debug_assert!(dt > 0, "Database::update must reject non-advancing timestamps");

        let mut rate = compute_rate(ds_type, prev_raw, raw, dt, wrap_policy, prev_pdp);

        if dt > heartbeat {
            warn!("datasource {}: gap of {}s exceeds heartbeat {}s, PDP forced unknown", ds_name, dt, heartbeat);
            rate = f64::NAN;
        } else if !rate.is_nan() {
            let below_min = !min.is_nan() && rate < min;
            let above_max = !max.is_nan() && rate > max;
            if below_min || above_max {
                rate = f64::NAN;
            }
        }

        let windows = self.fold_interval(backend, header_step, last_update, now, rate)?;

        self.last_raw.set(backend, raw)?;
        if let Some(last) = windows.last() {
            self.pdp_value.set(backend, last.value)?;
        }

        Ok(windows)
    }

    /// Credit `rate` across every second of `(last_update, now]`, closing
    /// PDP windows as step boundaries are crossed, and return the closed
    /// windows. Persists the remaining open-window accumulator state.
    fn fold_interval(
        &self,
        backend: &mut dyn Backend,
        step: i64,
        last_update: i64,
        now: i64,
        rate: f64,
    ) -> Result<Vec<PdpWindow>> {
        let mut accumulated = self.accumulated(backend)?;
        let mut unknown_seconds = self.unknown_seconds(backend)?;

        let window_start = |t: i64| (t.div_euclid(step)) * step;
        let current_window_end = window_start(last_update) + step;

        let mut windows = Vec::new();
        let mut cursor = last_update;

        if now < current_window_end {
            // No boundary crossed; credit the partial remainder and stop.
            let seconds = now - cursor;
            credit(&mut accumulated, &mut unknown_seconds, rate, seconds);
            self.accumulated.set(backend, accumulated)?;
            self.unknown_seconds.set(backend, unknown_seconds)?;
            return Ok(windows);
        }

        // Close the currently open window with the remainder of this
        // sample's contribution up to the boundary.
        {
            let seconds = current_window_end - cursor;
            credit(&mut accumulated, &mut unknown_seconds, rate, seconds);
            let heartbeat = self.heartbeat(backend)?;
            let pdp = close_window(accumulated, unknown_seconds, step, heartbeat);
            windows.push(PdpWindow { end_time: current_window_end, value: pdp, count: 1 });
            accumulated = 0.0;
            unknown_seconds = 0;
            cursor = current_window_end;
        }

        // Every window fully contained within the remaining interval is
        // credited with a full step of the same rate (or fully unknown).
        let final_window_start = window_start(now);
        let full_windows = ((final_window_start - cursor) / step).max(0) as u64;
        if full_windows > 0 {
            let heartbeat = self.heartbeat(backend)?;
            let (full_accum, full_unknown) = if rate.is_nan() {
                (0.0, step)
            } else {
                (rate * step as f64, 0)
            };
            let pdp = close_window(full_accum, full_unknown, step, heartbeat);
            windows.push(PdpWindow {
                end_time: current_window_end + step,
                value: pdp,
                count: full_windows,
            });
            cursor += full_windows as i64 * step;
        }

        // Credit the new, still-open partial window.
        let remainder = now - cursor;
        if remainder > 0 {
            credit(&mut accumulated, &mut unknown_seconds, rate, remainder);
        }

        self.accumulated.set(backend, accumulated)?;
        self.unknown_seconds.set(backend, unknown_seconds)?;
        Ok(windows)
    }

    pub fn last_raw(&self, backend: &dyn Backend) -> Result<f64> {
        self.last_raw.get(backend)
    }

    pub fn accumulated(&self, backend: &dyn Backend) -> Result<f64> {
        self.accumulated.get(backend)
    }

    pub fn unknown_seconds(&self, backend: &dyn Backend) -> Result<i64> {
        self.unknown_seconds.get(backend)
    }

    pub fn pdp_value(&self, backend: &dyn Backend) -> Result<f64> {
        self.pdp_value.get(backend)
    }

    /// Snapshot this datasource's mutable pipeline state, used to transplant
    /// state into a datasource matched by name on another database (see
    /// `Database::copy_state_to`).
    pub fn state(&self, backend: &dyn Backend) -> Result<DsState> {
        Ok(DsState {
            last_raw: self.last_raw(backend)?,
            accumulated: self.accumulated(backend)?,
            unknown_seconds: self.unknown_seconds(backend)?,
            pdp_value: self.pdp_value(backend)?,
        })
    }

    pub fn set_state(&self, backend: &mut dyn Backend, state: DsState) -> Result<()> {
        self.last_raw.set(backend, state.last_raw)?;
        self.accumulated.set(backend, state.accumulated)?;
        self.unknown_seconds.set(backend, state.unknown_seconds)?;
        self.pdp_value.set(backend, state.pdp_value)?;
        Ok(())
    }
}

/// A datasource's mutable pipeline state, read back as a value. See
/// [`Datasource::state`]/[`Datasource::set_state`].
#[derive(Clone, Copy, Debug)]
pub struct DsState {
    pub last_raw: f64,
    pub accumulated: f64,
    pub unknown_seconds: i64,
    pub pdp_value: f64,
}

/// Credit `seconds` of `rate` into the open-window accumulator, or into the
/// unknown-seconds counter if `rate` is NaN.
fn credit(accumulated: &mut f64, unknown_seconds: &mut i64, rate: f64, seconds: i64) {
    if rate.is_nan() {
        *unknown_seconds += seconds;
    } else {
        *accumulated += rate * seconds as f64;
    }
}

/// Finalize a window's accumulator into its emitted PDP value.
fn close_window(accumulated: f64, unknown_seconds: i64, step: i64, heartbeat: i64) -> f64 {
    if unknown_seconds > heartbeat {
        f64::NAN
    } else {
        let known_seconds = step - unknown_seconds;
        if known_seconds <= 0 {
            f64::NAN
        } else {
            accumulated / known_seconds as f64
        }
    }
}

/// Compute the per-type rate for one sample, including COUNTER wraparound
/// correction. `last_valid_rate` is the datasource's most recently computed
/// PDP value (NaN if none yet), used as the 10x sanity bound spec.md §4.3
/// describes for accepting a wrap candidate.
fn compute_rate(
    ds_type: DsType,
    prev: f64,
    raw: f64,
    dt: i64,
    wrap_policy: CounterWrapPolicy,
    last_valid_rate: f64,
) -> f64 {
    if dt <= 0 {
        return f64::NAN;
    }
    let dt_f = dt as f64;
    match ds_type {
        DsType::Gauge => raw,
        DsType::Absolute => {
            if raw.is_nan() {
                f64::NAN
            } else {
                raw / dt_f
            }
        }
        DsType::Derive => {
            if raw.is_nan() || prev.is_nan() {
                f64::NAN
            } else {
                (raw - prev) / dt_f
            }
        }
        DsType::Counter => {
            if raw.is_nan() || prev.is_nan() {
                return f64::NAN;
            }
            if raw >= prev {
                return (raw - prev) / dt_f;
            }
            if wrap_policy == CounterWrapPolicy::Never {
                return f64::NAN;
            }
            let candidates: &[f64] = match wrap_policy {
                CounterWrapPolicy::Never => &[],
                CounterWrapPolicy::ThirtyTwoBit => &[32.0],
                CounterWrapPolicy::SixtyFourBit => &[32.0, 64.0],
            };
            for &bits in candidates {
                let modulus = 2f64.powf(bits);
                let wrapped = (modulus - prev + raw) / dt_f;
                if last_valid_rate.is_nan() || wrapped <= last_valid_rate.abs() * 10.0 {
                    return wrapped;
                }
            }
            f64::NAN
        }
    }
}
