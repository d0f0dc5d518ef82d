// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A round-robin database storage engine.
//!
//! A database is a fixed-size binary layout — chosen once at creation and
//! never reallocated — holding a [`Header`](header::Header), a set of
//! [`Datasource`](datasource::Datasource) PDP pipelines and a set of
//! [`Archive`](archive::Archive) ring buffers, all addressed through a
//! pluggable [`Backend`](backend::Backend). Samples come in through
//! [`Database::update`](database::Database::update); ranges come back out
//! through [`Database::fetch`](database::Database::fetch).

pub mod allocator;
pub mod archive;
pub mod backend;
pub mod cell;
pub mod database;
pub mod datasource;
pub mod error;
pub mod header;
pub mod sample;

pub use archive::{ArcDef, ConsolidationFn};
pub use backend::{Backend, BackendFactory, MemoryBackend, MemoryBackendFactory};
pub use database::Database;
pub use datasource::{CounterWrapPolicy, DsDef, DsType};
pub use error::{RrdError, Result};
pub use sample::{FetchData, FetchRequest, RrdDef, Sample};
