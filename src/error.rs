// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Crate-wide error taxonomy.

use std::{error, fmt, io, result};

/// Result type returned by every fallible `rrd-core` operation.
pub type Result<T> = result::Result<T, RrdError>;

/// Errors surfaced by the RRD core.
#[derive(Debug)]
pub enum RrdError {
    /// The backend factory reported that the URI does not exist on open.
    NotFound,
    /// A backend read/write failed; the database's in-memory state should be
    /// considered indeterminate from this point on.
    Io(io::Error),
    /// Zero datasources/archives at creation, or an invalid field (step,
    /// heartbeat, min/max, xff, a string exceeding its declared capacity, …).
    InvalidDefinition(String),
    /// A sample's timestamp was not strictly greater than `last_update_time`.
    InvalidTimestamp {
        /// The timestamp that was rejected.
        given: i64,
        /// The header's `last_update_time` at the time of rejection.
        last_update: i64,
    },
    /// No datasource with the given name exists.
    UnknownDatasource(String),
    /// No archive with the given (consolidation function, steps) exists.
    UnknownArchive {
        /// Requested consolidation function, formatted for display.
        cf: String,
        /// Requested step multiple.
        steps: u32,
    },
    /// The fetch planner found no archive matching the requested
    /// consolidation function.
    NoMatchingArchive,
    /// The operation was attempted on a closed database.
    Closed,
    /// `copy_state_to` was given a target with an incompatible time base
    /// (a different header step), so no `(cf, steps)` match between the
    /// two archive sets would mean the same thing.
    IncompatibleCopy,
}

impl fmt::Display for RrdError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RrdError::NotFound => write!(f, "backend URI does not exist"),
            RrdError::Io(e) => write!(f, "backend I/O failure: {}", e),
            RrdError::InvalidDefinition(msg) => write!(f, "invalid definition: {}", msg),
            RrdError::InvalidTimestamp { given, last_update } => write!(
                f,
                "sample time {} is not after last update time {}",
                given, last_update
            ),
            RrdError::UnknownDatasource(name) => write!(f, "unknown datasource: {}", name),
            RrdError::UnknownArchive { cf, steps } => {
                write!(f, "unknown archive: cf={} steps={}", cf, steps)
            }
            RrdError::NoMatchingArchive => write!(f, "no archive matches the fetch request"),
            RrdError::Closed => write!(f, "database is closed"),
            RrdError::IncompatibleCopy => write!(f, "copy target is not compatible"),
        }
    }
}

impl error::Error for RrdError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            RrdError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for RrdError {
    fn from(e: io::Error) -> Self {
        RrdError::Io(e)
    }
}
